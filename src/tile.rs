//! XYZ tile addressing in the spherical Mercator scheme.
//!
//! Longitude is linear across the `2^zoom` columns, latitude follows the
//! Mercator projection, so rows get taller (in degrees) towards the poles.
use std::f64::consts::PI;
use std::fmt;

use once_cell::sync::Lazy;
use serde::Serialize;
use slippy_map_tilenames::{lonlat2tile, tile2lonlat};

use crate::error::{Error, Result};

/// Deepest zoom we address. `x + 1` must still fit the `u32` tile index.
pub const MAX_ZOOM: u8 = 30;

/// Latitude at which the square Mercator world ends (~85.0511°).
pub static MAX_LATITUDE: Lazy<f64> = Lazy::new(|| PI.sinh().atan().to_degrees());

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TileCoordinate {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoordinate {
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self> {
        if zoom > MAX_ZOOM {
            return Err(Error::invalid_address("z", zoom, zoom));
        }
        let size = 1u64 << zoom;
        if u64::from(x) >= size {
            return Err(Error::invalid_address("x", x, zoom));
        }
        if u64::from(y) >= size {
            return Err(Error::invalid_address("y", y, zoom));
        }

        Ok(TileCoordinate { zoom, x, y })
    }

    /// Parses the raw path segments of a `z/x/y` request. Anything that is
    /// not a non-negative integer is reported against the offending segment.
    pub fn parse(z: &str, x: &str, y: &str) -> Result<Self> {
        let zoom: u8 = z
            .trim()
            .parse()
            .map_err(|_| Error::invalid_address("z", z, z))?;
        let x: u32 = x
            .trim()
            .parse()
            .map_err(|_| Error::invalid_address("x", x, zoom))?;
        let y: u32 = y
            .trim()
            .parse()
            .map_err(|_| Error::invalid_address("y", y, zoom))?;

        TileCoordinate::new(zoom, x, y)
    }

    pub fn bbox(&self) -> BoundingBox {
        tile_to_bbox(*self)
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// A geographic bounding box in EPSG:4326 degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Grows the box on every side by `fraction` of its own span, measured in
    /// spherical Mercator like the tile grid. Latitude is kept inside the
    /// Mercator world.
    pub fn buffered(&self, fraction: f64) -> BoundingBox {
        let dx = self.width() * fraction;
        let north = lat_to_mercator_y(self.max_lat);
        let south = lat_to_mercator_y(self.min_lat);
        let dy = (north - south) * fraction;
        BoundingBox {
            min_lon: (self.min_lon - dx).max(-180.0),
            min_lat: mercator_y_to_lat(south - dy).max(-*MAX_LATITUDE),
            max_lon: (self.max_lon + dx).min(180.0),
            max_lat: mercator_y_to_lat(north + dy).min(*MAX_LATITUDE),
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// Geographic bounds of a tile. The north-west corner is the tile's own
/// origin, the south-east corner is the origin of the diagonal neighbour, so
/// adjacent tiles share their edge exactly.
pub fn tile_to_bbox(tile: TileCoordinate) -> BoundingBox {
    let (west, north) = tile2lonlat(tile.x, tile.y, tile.zoom);
    let (east, south) = tile2lonlat(tile.x + 1, tile.y + 1, tile.zoom);

    BoundingBox {
        min_lon: west,
        min_lat: south,
        max_lon: east,
        max_lat: north,
    }
}

/// The tile at `zoom` containing a geographic point. Points on the antimeridian
/// or beyond the Mercator limits are clamped into the last column/row.
pub fn lonlat_to_tile(lon: f64, lat: f64, zoom: u8) -> Result<TileCoordinate> {
    if !lon.is_finite() || !lat.is_finite() {
        return Err(Error::invalid_address("lon/lat", format!("{lon},{lat}"), zoom));
    }
    let lat = lat.clamp(-*MAX_LATITUDE, *MAX_LATITUDE);
    let (x, y) = lonlat2tile(lon.clamp(-180.0, 180.0), lat, zoom);
    let last = ((1u64 << zoom) - 1) as u32;

    TileCoordinate::new(zoom, x.min(last), y.min(last))
}

/// Spherical Mercator `y` (in radians of the unit sphere) for a latitude.
pub fn lat_to_mercator_y(lat: f64) -> f64 {
    let lat = lat.clamp(-*MAX_LATITUDE, *MAX_LATITUDE).to_radians();
    (PI / 4.0 + lat / 2.0).tan().ln()
}

/// Inverse of [`lat_to_mercator_y`].
pub fn mercator_y_to_lat(y: f64) -> f64 {
    (2.0 * y.exp().atan() - PI / 2.0).to_degrees()
}
