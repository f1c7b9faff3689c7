/// Tile source YAML format
///
/// Modelled on TileMill sources: a list of layers, each backed by one table of
/// the spatial store, plus the tile-wide extent, zoom window and cache policy.
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::tile::MAX_ZOOM;

/// A tile source (.yml) data structure.
#[derive(Clone, Deserialize, Debug)]
pub struct TileSourceConfig {
    pub name: String,
    #[serde(default)]
    pub attribution: String,
    #[serde(rename = "minzoom", default)]
    pub min_zoom: u8,
    #[serde(rename = "maxzoom", default = "default_max_zoom")]
    pub max_zoom: u8,
    #[serde(default)]
    pub center: Option<[f64; 3]>,
    #[serde(default = "default_bounds")]
    pub bounds: [f64; 4],
    #[serde(default = "default_extent")]
    pub extent: u32,
    /// `Cache-Control: max-age` for tiles, in seconds.
    #[serde(rename = "tile-max-age", default = "default_tile_max_age")]
    pub tile_max_age: u64,
    /// `Cache-Control: max-age` for label responses, in seconds.
    #[serde(rename = "label-max-age", default = "default_label_max_age")]
    pub label_max_age: u64,
    #[serde(rename = "query-timeout-ms", default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(rename = "Layer")]
    pub layers: Vec<DataLayer>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct DataLayer {
    pub id: String,
    #[serde(default)]
    pub properties: DataLayerProperties,
    #[serde(rename = "Datasource")]
    pub source: LayerSource,
}

#[derive(Clone, Deserialize, Debug)]
pub struct LayerSource {
    pub table: String,
    #[serde(default = "default_geometry_column")]
    pub geometry: String,
    #[serde(default = "default_id_column")]
    pub id: String,
    #[serde(default = "default_code_column")]
    pub code: String,
    #[serde(default = "default_srid")]
    pub srid: i32,
}

#[derive(Clone, Deserialize, Debug)]
pub struct DataLayerProperties {
    #[serde(rename = "buffer-size", default = "default_buffer_size")]
    pub buffer_size: u32,
}

impl Default for DataLayerProperties {
    fn default() -> Self {
        DataLayerProperties {
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_max_zoom() -> u8 {
    22
}

fn default_bounds() -> [f64; 4] {
    [-180.0, -85.0511, 180.0, 85.0511]
}

fn default_extent() -> u32 {
    4096
}

fn default_tile_max_age() -> u64 {
    300
}

fn default_label_max_age() -> u64 {
    3600
}

fn default_query_timeout_ms() -> u64 {
    5000
}

fn default_geometry_column() -> String {
    String::from("geom")
}

fn default_id_column() -> String {
    String::from("id")
}

fn default_code_column() -> String {
    String::from("nop")
}

fn default_srid() -> i32 {
    4326
}

fn default_buffer_size() -> u32 {
    64
}

impl TileSourceConfig {
    /// Constructs a new tile source from a YAML string and validates it.
    pub fn from_yaml(data: &str) -> Result<TileSourceConfig> {
        let source: TileSourceConfig = serde_yaml::from_str(data)?;
        source.validate()?;

        Ok(source)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<TileSourceConfig> {
        let data = std::fs::read_to_string(path)?;
        TileSourceConfig::from_yaml(&data)
    }

    pub fn layer(&self, id: &str) -> Result<&DataLayer> {
        self.layers
            .iter()
            .find(|layer| layer.id == id)
            .ok_or_else(|| Error::UnknownLayer(id.to_string()))
    }

    pub fn serves_zoom(&self, zoom: u8) -> bool {
        (self.min_zoom..=self.max_zoom).contains(&zoom)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_ZOOM {
            return Err(Error::InvalidSource(format!(
                "zoom window {}..={} must lie within 0..={}",
                self.min_zoom, self.max_zoom, MAX_ZOOM
            )));
        }
        if self.extent == 0 {
            return Err(Error::InvalidSource(String::from("extent must be positive")));
        }
        if self.layers.is_empty() {
            return Err(Error::InvalidSource(String::from("no layers defined")));
        }

        let mut seen = HashSet::new();
        for layer in &self.layers {
            if !seen.insert(layer.id.as_str()) {
                return Err(Error::InvalidSource(format!(
                    "duplicate layer id {:?}",
                    layer.id
                )));
            }
            let source = &layer.source;
            for identifier in [&source.table, &source.geometry, &source.id, &source.code] {
                if !is_sql_identifier(identifier) {
                    return Err(Error::InvalidSource(format!(
                        "layer {:?}: {:?} is not a plain SQL identifier",
                        layer.id, identifier
                    )));
                }
            }
        }

        Ok(())
    }
}

impl DataLayer {
    /// Fraction of the tile span added on each side of the fetch and clip box.
    pub fn buffer_fraction(&self, extent: u32) -> f64 {
        f64::from(self.properties.buffer_size) / f64::from(extent)
    }

    /// `geometry` is the expression shipped back as WKB in EPSG:4326.
    fn select_list(&self, geometry: &str) -> String {
        let source = &self.source;
        format!(
            "SELECT {id}::bigint AS id, {code}::text AS code, ST_AsBinary(ST_Transform({geometry}, 4326)) AS wkb FROM {table}",
            id = source.id,
            code = source.code,
            geometry = geometry,
            table = source.table,
        )
    }

    /// Bounding-box query. `$1..$4` are west, south, east, north in degrees,
    /// `$5` an optional code prefix. The envelope is moved into the table's
    /// SRID rather than transforming the column, so the spatial index applies.
    pub(crate) fn bbox_query_sql(&self) -> String {
        let source = &self.source;
        let envelope = if source.srid == 4326 {
            String::from("ST_MakeEnvelope($1, $2, $3, $4, 4326)")
        } else {
            format!(
                "ST_Transform(ST_MakeEnvelope($1, $2, $3, $4, 4326), {})",
                source.srid
            )
        };

        format!(
            "{select} WHERE {geom} && {envelope} AND ($5::text IS NULL OR {code} LIKE $5::text || '%') ORDER BY {id}",
            select = self.select_list(&source.geometry),
            geom = source.geometry,
            envelope = envelope,
            code = source.code,
            id = source.id,
        )
    }

    /// Centroids of all features whose code starts with `$1`. Only the point
    /// travels back; the centroid is taken in the table's own SRID.
    pub(crate) fn district_query_sql(&self) -> String {
        format!(
            "{select} WHERE {code} LIKE $1::text || '%' ORDER BY {id}",
            select = self.select_list(&format!("ST_Centroid({})", self.source.geometry)),
            code = self.source.code,
            id = self.source.id,
        )
    }
}

fn is_sql_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}
