//! Label points: one centroid per parcel of a district, in degrees.
use geo::{Centroid, CoordsIter};
use serde::Serialize;
use tracing::{debug, warn};

use crate::cadastral::DistrictCode;
use crate::error::Result;
use crate::source::DataLayer;
use crate::store::{Feature, FeatureStore};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LabelPoint {
    pub id: i64,
    pub view_nop: String,
    pub centroid_lat: f64,
    pub centroid_lng: f64,
}

impl LabelPoint {
    /// `None` for features without a usable geometry or parcel number.
    pub fn from_feature(feature: &Feature) -> Option<LabelPoint> {
        let geometry = feature.geometry.as_ref()?;
        // Rings with non-finite vertices cannot be closed, and geo asserts
        // closed rings while computing centroids.
        if !geometry
            .coords_iter()
            .all(|c| c.x.is_finite() && c.y.is_finite())
        {
            warn!(feature_id = feature.id, "no label for feature with non-finite coordinates");
            return None;
        }
        let centroid = geometry.centroid()?;
        if !centroid.x().is_finite() || !centroid.y().is_finite() {
            return None;
        }
        let code = match feature.cadastral_code() {
            Ok(code) => code,
            Err(e) => {
                warn!(feature_id = feature.id, error = %e, "no label for feature");
                return None;
            }
        };

        Some(LabelPoint {
            id: feature.id,
            view_nop: code.view_code().to_string(),
            centroid_lat: centroid.y(),
            centroid_lng: centroid.x(),
        })
    }
}

/// Label points of every feature of `layer` inside `district`. Features with
/// null or empty geometry are left out silently.
pub async fn extract_labels(
    store: &dyn FeatureStore,
    layer: &DataLayer,
    district: &DistrictCode,
) -> Result<Vec<LabelPoint>> {
    let features = store.district_features(layer, district).await?;
    let labels: Vec<LabelPoint> = features.iter().filter_map(LabelPoint::from_feature).collect();

    debug!(
        layer = %layer.id,
        district = %district,
        features = features.len(),
        labels = labels.len(),
        "extracted labels"
    );
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use geo::{polygon, Geometry, MultiPolygon, Polygon};

    use super::*;
    use crate::source::TileSourceConfig;
    use crate::store::MemoryFeatureStore;

    fn rectangle(west: f64, south: f64, east: f64, north: f64) -> Polygon<f64> {
        polygon![
            (x: west, y: south),
            (x: west, y: north),
            (x: east, y: north),
            (x: east, y: south),
            (x: west, y: south),
        ]
    }

    #[tokio::test]
    async fn test_extract_labels() {
        let config = TileSourceConfig::load("test_data/cadastre.yml").unwrap();
        let layer = config.layer("nops").unwrap();

        let mut store = MemoryFeatureStore::new();
        store.insert(
            "nops",
            Feature::new(
                1,
                "357502000100100010",
                Some(Geometry::Polygon(rectangle(112.725, -7.615, 112.730, -7.610))),
            ),
        );
        store.insert("nops", Feature::new(2, "357502000100100020", None));
        store.insert(
            "nops",
            Feature::new(
                3,
                "357502000100100030",
                Some(Geometry::MultiPolygon(MultiPolygon(Vec::new()))),
            ),
        );
        store.insert(
            "nops",
            Feature::new(
                4,
                "357502000200200070",
                Some(Geometry::Polygon(rectangle(112.74, -7.62, 112.75, -7.61))),
            ),
        );

        let district = DistrictCode::parse("3575020001").unwrap();
        let labels = extract_labels(&store, layer, &district).await.unwrap();

        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].id, 1);
        assert_eq!(labels[0].view_nop, "0001");
        assert_approx_eq!(labels[0].centroid_lng, 112.7275, 1e-9);
        assert_approx_eq!(labels[0].centroid_lat, -7.6125, 1e-9);

        let wider = DistrictCode::parse("3575020").unwrap();
        let labels = extract_labels(&store, layer, &wider).await.unwrap();
        assert_eq!(labels.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(labels[1].view_nop, "0007");

        let nothing = DistrictCode::parse("9999999999").unwrap();
        assert!(extract_labels(&store, layer, &nothing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_parcel_is_skipped() {
        let config = TileSourceConfig::load("test_data/cadastre.yml").unwrap();
        let layer = config.layer("nops").unwrap();

        let broken = Feature::new(
            3,
            "357502000100100030",
            Some(Geometry::Polygon(polygon![
                (x: f64::NAN, y: -7.615),
                (x: 112.726, y: -7.611),
                (x: 112.727, y: -7.611),
            ])),
        );
        assert_eq!(LabelPoint::from_feature(&broken), None);

        let mut store = MemoryFeatureStore::new();
        store.insert("nops", broken);
        store.insert(
            "nops",
            Feature::new(
                1,
                "357502000100100010",
                Some(Geometry::Polygon(rectangle(112.725, -7.615, 112.730, -7.610))),
            ),
        );
        store.insert(
            "nops",
            Feature::new(
                5,
                "357502000100100050",
                Some(Geometry::Point(geo::Point::new(f64::NAN, f64::NAN))),
            ),
        );

        let district = DistrictCode::parse("3575020001").unwrap();
        let labels = extract_labels(&store, layer, &district).await.unwrap();
        assert_eq!(labels.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_label_from_store_centroid() {
        let feature = Feature::new(
            9,
            "357502000100100090",
            Some(Geometry::Point(geo::Point::new(112.7275, -7.6125))),
        );
        let label = LabelPoint::from_feature(&feature).unwrap();
        assert_eq!(label.view_nop, "0009");
        assert_approx_eq!(label.centroid_lng, 112.7275);
        assert_approx_eq!(label.centroid_lat, -7.6125);
    }

    #[test]
    fn test_label_needs_parcel_number() {
        let feature = Feature::new(
            7,
            "3575020",
            Some(Geometry::Polygon(rectangle(0.0, 0.0, 1.0, 1.0))),
        );
        assert_eq!(LabelPoint::from_feature(&feature), None);
    }

    #[test]
    fn test_label_serialization() {
        let label = LabelPoint {
            id: 1,
            view_nop: String::from("0001"),
            centroid_lat: -7.6125,
            centroid_lng: 112.7275,
        };
        assert_eq!(
            serde_json::to_value(&label).unwrap(),
            serde_json::json!({
                "id": 1,
                "view_nop": "0001",
                "centroid_lat": -7.6125,
                "centroid_lng": 112.7275
            })
        );
    }
}
