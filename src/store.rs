//! Spatial query gateway.
//!
//! The bounding-box and code-prefix predicates are always evaluated by the
//! store; callers never receive more than the features touching the box.
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

// TODO: remove once async fn in traits become object safe
use async_trait::async_trait;
use futures::TryStreamExt;
use geo::{BoundingRect, Geometry};
use geozero::wkb::Wkb;
use geozero::ToGeo;
use sqlx::postgres::PgRow;
use sqlx::{query, PgPool, Row};
use tracing::{debug, warn};

use crate::cadastral::{CadastralCode, DistrictCode};
use crate::error::{Error, Result};
use crate::mvt::Value;
use crate::source::DataLayer;
use crate::tile::BoundingBox;

/// Attribute carrying the short parcel label.
pub const VIEW_CODE_ATTRIBUTE: &str = "view_nop";
/// Attribute carrying the raw identifier of features that are not parcels.
pub const CODE_ATTRIBUTE: &str = "code";

/// A stored feature in EPSG:4326. Read-only for this crate.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub id: i64,
    pub code: String,
    pub geometry: Option<Geometry<f64>>,
    pub attributes: BTreeMap<String, Value>,
}

impl Feature {
    pub fn new(id: i64, code: impl Into<String>, geometry: Option<Geometry<f64>>) -> Self {
        let code = code.into();
        let mut attributes = BTreeMap::new();
        match CadastralCode::parse(&code) {
            Ok(nop) => {
                attributes.insert(
                    VIEW_CODE_ATTRIBUTE.to_string(),
                    Value::String(nop.view_code().to_string()),
                );
            }
            Err(_) => {
                attributes.insert(CODE_ATTRIBUTE.to_string(), Value::String(code.clone()));
            }
        }

        Feature {
            id,
            code,
            geometry,
            attributes,
        }
    }

    pub fn cadastral_code(&self) -> Result<CadastralCode> {
        CadastralCode::parse(&self.code)
    }

    fn bounds(&self) -> Option<BoundingBox> {
        let rect = self.geometry.as_ref()?.bounding_rect()?;
        Some(BoundingBox {
            min_lon: rect.min().x,
            min_lat: rect.min().y,
            max_lon: rect.max().x,
            max_lat: rect.max().y,
        })
    }
}

#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Features of `layer` whose geometry intersects `bbox`, optionally
    /// restricted to codes starting with `district`. Ordered by id.
    async fn query_features(
        &self,
        layer: &DataLayer,
        bbox: &BoundingBox,
        district: Option<&DistrictCode>,
    ) -> Result<Vec<Feature>>;

    /// Every feature of `layer` whose code starts with `district`, ordered by
    /// id. Only used for labels, so a store may return each geometry already
    /// reduced to its centroid.
    async fn district_features(
        &self,
        layer: &DataLayer,
        district: &DistrictCode,
    ) -> Result<Vec<Feature>>;
}

/// PostGIS-backed store. Geometries are returned as WKB transformed to 4326;
/// district queries return centroids computed by PostGIS.
#[derive(Clone, Debug)]
pub struct PgFeatureStore {
    pool: PgPool,
}

impl PgFeatureStore {
    pub fn new(pool: PgPool) -> Self {
        PgFeatureStore { pool }
    }
}

/// Decodes the WKB returned by `ST_AsBinary`.
pub fn read_geometry(bytes: Vec<u8>) -> Result<Geometry<f64>> {
    Wkb(bytes)
        .to_geo()
        .map_err(|e| Error::MalformedGeometry(e.to_string()))
}

/// Builds a feature from the raw columns of a row. Rows with undecodable
/// geometry are skipped with a warning rather than failing the whole query.
fn decode_feature(layer: &str, id: i64, code: Option<String>, raw: Option<Vec<u8>>) -> Option<Feature> {
    let geometry = match raw.map(read_geometry) {
        None => None,
        Some(Ok(geometry)) => Some(geometry),
        Some(Err(e)) => {
            warn!(layer, feature_id = id, error = %e, "skipping feature with unreadable geometry");
            return None;
        }
    };

    Some(Feature::new(id, code.unwrap_or_default(), geometry))
}

fn feature_from_row(layer: &str, row: &PgRow) -> Result<Option<Feature>> {
    let id: i64 = row.try_get("id")?;
    let code: Option<String> = row.try_get("code")?;
    let raw: Option<Vec<u8>> = row.try_get("wkb")?;

    Ok(decode_feature(layer, id, code, raw))
}

#[async_trait]
impl FeatureStore for PgFeatureStore {
    async fn query_features(
        &self,
        layer: &DataLayer,
        bbox: &BoundingBox,
        district: Option<&DistrictCode>,
    ) -> Result<Vec<Feature>> {
        let started = Instant::now();
        let sql = layer.bbox_query_sql();
        let mut rows = query(&sql)
            .bind(bbox.min_lon)
            .bind(bbox.min_lat)
            .bind(bbox.max_lon)
            .bind(bbox.max_lat)
            .bind(district.map(DistrictCode::as_str))
            .fetch(&self.pool);

        let mut features = Vec::new();
        while let Some(row) = rows.try_next().await? {
            if let Some(feature) = feature_from_row(&layer.id, &row)? {
                features.push(feature);
            }
        }

        debug!(
            layer = %layer.id,
            bbox = %bbox,
            count = features.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bbox query"
        );
        Ok(features)
    }

    async fn district_features(
        &self,
        layer: &DataLayer,
        district: &DistrictCode,
    ) -> Result<Vec<Feature>> {
        let sql = layer.district_query_sql();
        let mut rows = query(&sql).bind(district.as_str()).fetch(&self.pool);

        let mut features = Vec::new();
        while let Some(row) = rows.try_next().await? {
            if let Some(feature) = feature_from_row(&layer.id, &row)? {
                features.push(feature);
            }
        }

        debug!(layer = %layer.id, district = %district, count = features.len(), "district query");
        Ok(features)
    }
}

/// In-process store keyed by layer id, for development and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryFeatureStore {
    layers: HashMap<String, Vec<Feature>>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer: impl Into<String>, feature: Feature) {
        let features = self.layers.entry(layer.into()).or_default();
        features.push(feature);
        features.sort_by_key(|f| f.id);
    }

    fn layer_features(&self, layer: &DataLayer) -> &[Feature] {
        self.layers
            .get(&layer.id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[async_trait]
impl FeatureStore for MemoryFeatureStore {
    async fn query_features(
        &self,
        layer: &DataLayer,
        bbox: &BoundingBox,
        district: Option<&DistrictCode>,
    ) -> Result<Vec<Feature>> {
        Ok(self
            .layer_features(layer)
            .iter()
            .filter(|f| district.map_or(true, |d| d.matches(&f.code)))
            .filter(|f| f.bounds().map_or(false, |b| b.intersects(bbox)))
            .cloned()
            .collect())
    }

    async fn district_features(
        &self,
        layer: &DataLayer,
        district: &DistrictCode,
    ) -> Result<Vec<Feature>> {
        Ok(self
            .layer_features(layer)
            .iter()
            .filter(|f| district.matches(&f.code))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use geo::{polygon, Point};
    use geozero::{CoordDimensions, ToWkb};

    use super::*;
    use crate::source::TileSourceConfig;
    use crate::tile::TileCoordinate;

    fn parcel(id: i64, code: &str, west: f64, south: f64) -> Feature {
        let geometry = polygon![
            (x: west, y: south),
            (x: west + 0.005, y: south),
            (x: west + 0.005, y: south + 0.005),
            (x: west, y: south + 0.005),
            (x: west, y: south),
        ];
        Feature::new(id, code, Some(Geometry::Polygon(geometry)))
    }

    fn config() -> TileSourceConfig {
        TileSourceConfig::load("test_data/cadastre.yml").unwrap()
    }

    #[test]
    fn test_read_geometry() {
        let square = parcel(1, "357502000100100010", 112.725, -7.615).geometry.unwrap();
        let bytes = square.to_wkb(CoordDimensions::xy()).unwrap();
        assert_eq!(read_geometry(bytes.clone()).unwrap(), square);

        assert!(matches!(
            read_geometry(bytes[..bytes.len() - 3].to_vec()),
            Err(Error::MalformedGeometry(_))
        ));
        assert!(read_geometry(Vec::new()).is_err());
    }

    #[test]
    fn test_decode_feature_skips_unreadable_geometry() {
        let square = parcel(1, "357502000100100010", 112.725, -7.615).geometry.unwrap();
        let bytes = square.to_wkb(CoordDimensions::xy()).unwrap();

        let feature = decode_feature("nops", 1, Some("357502000100100010".into()), Some(bytes)).unwrap();
        assert_eq!(feature.geometry, Some(square));

        let empty = decode_feature("nops", 2, Some("357502000100100020".into()), None).unwrap();
        assert_eq!(empty.geometry, None);

        assert!(decode_feature("nops", 3, None, Some(vec![1, 3, 0])).is_none());
    }

    #[test]
    fn test_feature_attributes() {
        let nop = parcel(1, "357502000100100010", 0.0, 0.0);
        assert_eq!(
            nop.attributes.get(VIEW_CODE_ATTRIBUTE),
            Some(&Value::String("0001".to_string()))
        );
        assert!(nop.cadastral_code().is_ok());

        let kecamatan = Feature::new(2, "3575020", None);
        assert_eq!(
            kecamatan.attributes.get(CODE_ATTRIBUTE),
            Some(&Value::String("3575020".to_string()))
        );
        assert!(kecamatan.attributes.get(VIEW_CODE_ATTRIBUTE).is_none());
    }

    #[tokio::test]
    async fn test_memory_store_filters() {
        let config = config();
        let layer = config.layer("nops").unwrap();
        let mut store = MemoryFeatureStore::new();
        store.insert("nops", parcel(2, "357502000200100020", 112.726, -7.614));
        store.insert("nops", parcel(1, "357502000100100010", 112.725, -7.615));
        store.insert("nops", parcel(3, "357502000100100030", 100.0, 0.0));
        store.insert("nops", Feature::new(4, "357502000100100040", None));
        store.insert(
            "bangunans",
            Feature::new(9, "357502000100100010", Some(Geometry::Point(Point::new(112.727, -7.613)))),
        );

        let bbox = TileCoordinate::new(14, 13322, 8539).unwrap().bbox();
        let all = store.query_features(layer, &bbox, None).await.unwrap();
        assert_eq!(all.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 2]);

        let district = DistrictCode::parse("3575020001").unwrap();
        let filtered = store
            .query_features(layer, &bbox, Some(&district))
            .await
            .unwrap();
        assert_eq!(filtered.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1]);

        let in_district = store.district_features(layer, &district).await.unwrap();
        assert_eq!(
            in_district.iter().map(|f| f.id).collect::<Vec<_>>(),
            vec![1, 3, 4]
        );

        let nothing = DistrictCode::parse("9999999999").unwrap();
        assert!(store.district_features(layer, &nothing).await.unwrap().is_empty());

        let elsewhere = TileCoordinate::new(14, 0, 0).unwrap().bbox();
        assert!(store
            .query_features(layer, &elsewhere, None)
            .await
            .unwrap()
            .is_empty());
    }
}
