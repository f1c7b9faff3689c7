//! Mapbox Vector Tile (2.1) encoding.
//!
//! Geometry command streams and the protobuf messages come from the `mvt`
//! crate. Its layers intern keys and values in first-seen order, which
//! together with the caller's feature order makes the output byte-for-byte
//! reproducible.
use std::collections::BTreeMap;

use ::mvt::{Feature, GeomData, GeomEncoder, Tile};
use serde::Serialize;

use crate::clip::ClippedGeometry;
use crate::error::{Error, Result};

pub const CONTENT_TYPE: &str = "application/vnd.mapbox-vector-tile";

/// A feature attribute value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Float(f32),
    Double(f64),
    Int(i64),
    UInt(u64),
    SInt(i64),
    Bool(bool),
}

/// Geometry kinds the clipper produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GeomType {
    Point,
    Polygon,
}

fn encoding_error(e: ::mvt::Error) -> Error {
    Error::EncodingFailure(e.to_string())
}

/// Turns tile-space parts into an MVT command stream. Points become one
/// multi-point `MoveTo`; polygon rings are closed with `ClosePath`.
pub fn encode_geometry(geometry: &ClippedGeometry) -> Result<GeomData> {
    match geometry.geom_type {
        GeomType::Point => {
            let mut encoder = GeomEncoder::new(::mvt::GeomType::Point);
            let mut count = 0;
            for &(x, y) in geometry.parts.iter().flatten() {
                encoder = encoder
                    .point(f64::from(x), f64::from(y))
                    .map_err(encoding_error)?;
                count += 1;
            }
            if count == 0 {
                return Err(Error::EncodingFailure(String::from(
                    "point feature without points",
                )));
            }
            encoder.encode().map_err(encoding_error)
        }
        GeomType::Polygon => {
            if geometry.parts.is_empty() {
                return Err(Error::EncodingFailure(String::from("empty geometry")));
            }
            let mut encoder = GeomEncoder::new(::mvt::GeomType::Polygon);
            for ring in &geometry.parts {
                if ring.len() < 3 {
                    return Err(Error::EncodingFailure(String::from(
                        "polygon ring with fewer than 3 vertices",
                    )));
                }
                for &(x, y) in ring {
                    encoder = encoder
                        .point(f64::from(x), f64::from(y))
                        .map_err(encoding_error)?;
                }
                encoder = encoder.complete().map_err(encoding_error)?;
            }
            encoder.encode().map_err(encoding_error)
        }
    }
}

fn add_tag(feature: &mut Feature, key: &str, value: &Value) {
    match value {
        Value::String(s) => feature.add_tag_string(key, s),
        Value::Float(f) => feature.add_tag_float(key, *f),
        Value::Double(d) => feature.add_tag_double(key, *d),
        Value::Int(i) => feature.add_tag_int(key, *i),
        Value::UInt(u) => feature.add_tag_uint(key, *u),
        Value::SInt(i) => feature.add_tag_sint(key, *i),
        Value::Bool(b) => feature.add_tag_bool(key, *b),
    }
}

struct EncodedFeature {
    id: Option<u64>,
    geometry: GeomData,
    attributes: BTreeMap<String, Value>,
}

/// Accumulates the features of one layer. Geometry is encoded as features
/// are added, so a bad feature is reported before the tile is assembled.
pub struct LayerBuilder {
    name: String,
    features: Vec<EncodedFeature>,
}

impl LayerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        LayerBuilder {
            name: name.into(),
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Encodes one feature. Nothing is added to the layer if the geometry
    /// cannot be encoded.
    pub fn add_feature(
        &mut self,
        id: Option<u64>,
        geometry: &ClippedGeometry,
        attributes: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let geometry = encode_geometry(geometry)?;
        self.features.push(EncodedFeature {
            id,
            geometry,
            attributes: attributes.clone(),
        });
        Ok(())
    }
}

/// Assembles a tile from layers. Empty layers are left out, so a tile
/// without features is a valid zero-length message.
pub fn encode_tile(extent: u32, layers: Vec<LayerBuilder>) -> Result<Vec<u8>> {
    let mut tile = Tile::new(extent);
    for builder in layers.into_iter().filter(|l| !l.is_empty()) {
        let mut layer = tile.create_layer(&builder.name);
        for encoded in builder.features {
            let mut feature = layer.into_feature(encoded.geometry);
            if let Some(id) = encoded.id {
                feature.set_id(id);
            }
            for (key, value) in &encoded.attributes {
                add_tag(&mut feature, key, value);
            }
            layer = feature.into_layer();
        }
        tile.add_layer(layer).map_err(encoding_error)?;
    }
    tile.to_bytes().map_err(encoding_error)
}

/// Encodes a single-layer tile.
pub fn encode(
    features: &[(Option<u64>, ClippedGeometry, BTreeMap<String, Value>)],
    layer_name: &str,
    extent: u32,
) -> Result<Vec<u8>> {
    let mut layer = LayerBuilder::new(layer_name);
    for (id, geometry, attributes) in features {
        layer.add_feature(*id, geometry, attributes)?;
    }
    encode_tile(extent, vec![layer])
}
