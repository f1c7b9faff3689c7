//! Projection of geographic geometries into tile space and clipping to the
//! buffered tile square.
//!
//! Rings come out in MVT 2.1 orientation: exterior rings have a positive
//! surveyor's-formula area in tile coordinates (clockwise on screen, since
//! tile `y` grows downward), interior rings a negative one. Rings are open;
//! the encoder closes them with `ClosePath`.
use geo::{Coord, Geometry, LineString, Point, Polygon};

use crate::error::{Error, Result};
use crate::mvt::GeomType;
use crate::tile::{lat_to_mercator_y, BoundingBox};

/// Geometry in tile-local integer coordinates, ready for encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClippedGeometry {
    pub geom_type: GeomType,
    /// Rings for polygons (each exterior followed by its holes), lines for
    /// line strings, a single list of positions for points.
    pub parts: Vec<Vec<(i32, i32)>>,
}

impl ClippedGeometry {
    fn empty(geom_type: GeomType) -> Self {
        ClippedGeometry {
            geom_type,
            parts: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(Vec::is_empty)
    }
}

/// Maps EPSG:4326 coordinates onto a tile's `[0, extent]` grid. Longitude is
/// linear; latitude goes through spherical Mercator first so the mapping is
/// linear in projected space, which is what XYZ clients draw in.
#[derive(Clone, Copy, Debug)]
pub struct TileTransform {
    west: f64,
    east: f64,
    north: f64,
    south: f64,
    extent: f64,
}

impl TileTransform {
    pub fn new(bbox: &BoundingBox, extent: u32) -> Self {
        TileTransform {
            west: bbox.min_lon,
            east: bbox.max_lon,
            north: lat_to_mercator_y(bbox.max_lat),
            south: lat_to_mercator_y(bbox.min_lat),
            extent: f64::from(extent),
        }
    }

    pub fn project(&self, coord: Coord<f64>) -> (f64, f64) {
        let x = (coord.x - self.west) / (self.east - self.west) * self.extent;
        let y = (self.north - lat_to_mercator_y(coord.y)) / (self.north - self.south) * self.extent;
        (x, y)
    }
}

/// Projects and clips `geometry` into the tile described by `bbox`, keeping
/// `buffer` extra units around each edge so neighbouring tiles overlap.
///
/// Rings that collapse after rounding are pruned; a geometry may therefore
/// come back empty. Non-finite coordinates and geometry kinds that have no
/// polygon or point rendering are reported as [`Error::MalformedGeometry`].
pub fn clip(
    geometry: &Geometry<f64>,
    bbox: &BoundingBox,
    extent: u32,
    buffer: u32,
) -> Result<ClippedGeometry> {
    let clipper = Clipper {
        transform: TileTransform::new(bbox, extent),
        min: -f64::from(buffer),
        max: f64::from(extent) + f64::from(buffer),
    };

    match geometry {
        Geometry::Polygon(polygon) => clipper.polygons(std::iter::once(polygon)),
        Geometry::MultiPolygon(multi) => clipper.polygons(multi.0.iter()),
        Geometry::Rect(rect) => clipper.polygons(std::iter::once(&rect.to_polygon())),
        Geometry::Point(point) => clipper.points(std::iter::once(point)),
        Geometry::MultiPoint(multi) => clipper.points(multi.0.iter()),
        other => Err(Error::MalformedGeometry(format!(
            "unsupported geometry kind {}",
            kind_name(other)
        ))),
    }
}

fn kind_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

struct Clipper {
    transform: TileTransform,
    min: f64,
    max: f64,
}

impl Clipper {
    fn polygons<'a>(&self, polygons: impl Iterator<Item = &'a Polygon<f64>>) -> Result<ClippedGeometry> {
        let mut out = ClippedGeometry::empty(GeomType::Polygon);
        for polygon in polygons {
            // A polygon whose exterior vanishes takes its holes with it.
            let exterior = match self.ring(polygon.exterior(), true)? {
                Some(ring) => ring,
                None => continue,
            };
            out.parts.push(exterior);
            for interior in polygon.interiors() {
                if let Some(ring) = self.ring(interior, false)? {
                    out.parts.push(ring);
                }
            }
        }
        Ok(out)
    }

    fn points<'a>(&self, points: impl Iterator<Item = &'a Point<f64>>) -> Result<ClippedGeometry> {
        let mut positions = Vec::new();
        for point in points {
            let (x, y) = self.project(point.0)?;
            if (self.min..=self.max).contains(&x) && (self.min..=self.max).contains(&y) {
                positions.push((x.round() as i32, y.round() as i32));
            }
        }

        let mut out = ClippedGeometry::empty(GeomType::Point);
        if !positions.is_empty() {
            out.parts.push(positions);
        }
        Ok(out)
    }

    fn project(&self, coord: Coord<f64>) -> Result<(f64, f64)> {
        if !coord.x.is_finite() || !coord.y.is_finite() {
            return Err(Error::MalformedGeometry(format!(
                "non-finite coordinate ({}, {})",
                coord.x, coord.y
            )));
        }
        Ok(self.transform.project(coord))
    }

    fn ring(&self, ring: &LineString<f64>, exterior: bool) -> Result<Option<Vec<(i32, i32)>>> {
        let mut projected = ring
            .0
            .iter()
            .map(|c| self.project(*c))
            .collect::<Result<Vec<_>>>()?;
        if projected.len() > 1 && projected.first() == projected.last() {
            projected.pop();
        }

        let clipped = self.clip_ring(projected);
        let mut rounded = clean_ring(
            clipped
                .into_iter()
                .map(|(x, y)| (x.round() as i32, y.round() as i32))
                .collect(),
        );

        let area = signed_area(&rounded);
        if rounded.len() < 3 || area == 0 {
            return Ok(None);
        }
        if (area > 0) != exterior {
            rounded.reverse();
        }
        Ok(Some(rounded))
    }

    /// Sutherland–Hodgman against the four buffered tile edges. Output keeps
    /// the input's starting vertex and direction when nothing is cut.
    fn clip_ring(&self, ring: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
        let (min, max) = (self.min, self.max);

        let ring = clip_against_edge(&ring, |p| p.0 >= min, |a, b| {
            let t = (min - a.0) / (b.0 - a.0);
            (min, a.1 + t * (b.1 - a.1))
        });
        let ring = clip_against_edge(&ring, |p| p.0 <= max, |a, b| {
            let t = (max - a.0) / (b.0 - a.0);
            (max, a.1 + t * (b.1 - a.1))
        });
        let ring = clip_against_edge(&ring, |p| p.1 >= min, |a, b| {
            let t = (min - a.1) / (b.1 - a.1);
            (a.0 + t * (b.0 - a.0), min)
        });
        clip_against_edge(&ring, |p| p.1 <= max, |a, b| {
            let t = (max - a.1) / (b.1 - a.1);
            (a.0 + t * (b.0 - a.0), max)
        })
    }
}

fn clip_against_edge<F, I>(ring: &[(f64, f64)], inside: F, intersect: I) -> Vec<(f64, f64)>
where
    F: Fn(&(f64, f64)) -> bool,
    I: Fn(&(f64, f64), &(f64, f64)) -> (f64, f64),
{
    let n = ring.len();
    let mut out = Vec::with_capacity(n + 4);
    for (i, current) in ring.iter().enumerate() {
        let previous = &ring[(i + n - 1) % n];
        match (inside(previous), inside(current)) {
            (true, true) => out.push(*current),
            (true, false) => out.push(intersect(previous, current)),
            (false, true) => {
                out.push(intersect(previous, current));
                out.push(*current);
            }
            (false, false) => {}
        }
    }
    out
}

/// Drops repeated vertices, including a trailing copy of the first one.
fn clean_ring(ring: Vec<(i32, i32)>) -> Vec<(i32, i32)> {
    let mut out: Vec<(i32, i32)> = Vec::with_capacity(ring.len());
    for point in ring {
        if out.last() != Some(&point) {
            out.push(point);
        }
    }
    while out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    out
}

/// Twice the signed area in tile coordinates; positive means clockwise on
/// screen.
pub fn signed_area(ring: &[(i32, i32)]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            i64::from(x0) * i64::from(y1) - i64::from(x1) * i64::from(y0)
        })
        .sum()
}
