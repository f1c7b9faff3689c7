//! Request orchestration: address → query → clip → encode, and the label
//! branch that skips clipping.
use std::future::Future;
use std::sync::Arc;

// TODO: remove once async fn in traits become object safe
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::cadastral::DistrictCode;
use crate::clip::clip;
use crate::error::{Error, Result};
use crate::labels::{extract_labels, LabelPoint};
use crate::mvt::{self, LayerBuilder};
use crate::source::TileSourceConfig;
use crate::store::FeatureStore;
use crate::tile::TileCoordinate;
use crate::TileSource;

/// A rendered tile. Immutable once produced.
#[derive(Clone, Debug)]
pub struct Tile {
    pub layer: String,
    pub coordinate: TileCoordinate,
    pub data: Vec<u8>,
    pub feature_count: usize,
    pub content_type: &'static str,
    pub cache_control: String,
}

/// Label points of one district, shaped like the JSON response.
#[derive(Clone, Debug, Serialize)]
pub struct LabelSet {
    pub labels: Vec<LabelPoint>,
    pub count: usize,
    #[serde(skip)]
    pub cache_control: String,
}

pub struct TileService {
    config: Arc<TileSourceConfig>,
    store: Arc<dyn FeatureStore>,
}

impl TileService {
    pub fn new(config: TileSourceConfig, store: Arc<dyn FeatureStore>) -> Self {
        TileService {
            config: Arc::new(config),
            store,
        }
    }

    fn tile_cache_control(&self) -> String {
        format!("public, max-age={}", self.config.tile_max_age)
    }

    fn label_cache_control(&self) -> String {
        format!("public, max-age={}", self.config.label_max_age)
    }

    /// Bounds a store call by the configured deadline. Dropping the inner
    /// future on expiry drops the in-flight query with it.
    async fn with_deadline<T>(&self, query: impl Future<Output = Result<T>>) -> Result<T> {
        let deadline = self.config.query_timeout();
        match tokio::time::timeout(deadline, query).await {
            Ok(result) => result,
            Err(_) => Err(Error::StoreTimeout(deadline)),
        }
    }

    fn empty_tile(&self, layer: &str, coordinate: TileCoordinate) -> Tile {
        Tile {
            layer: layer.to_string(),
            coordinate,
            data: Vec::new(),
            feature_count: 0,
            content_type: mvt::CONTENT_TYPE,
            cache_control: self.tile_cache_control(),
        }
    }
}

#[async_trait]
impl TileSource for TileService {
    async fn render_mvt(
        &self,
        layer_id: &str,
        coordinate: TileCoordinate,
        district: Option<&DistrictCode>,
    ) -> Result<Tile> {
        let layer = self.config.layer(layer_id)?;
        if !self.config.serves_zoom(coordinate.zoom) {
            debug!(layer = layer_id, tile = %coordinate, "zoom outside source window");
            return Ok(self.empty_tile(layer_id, coordinate));
        }

        let extent = self.config.extent;
        let bbox = coordinate.bbox();
        let fetch_bbox = bbox.buffered(layer.buffer_fraction(extent));

        let features = self
            .with_deadline(self.store.query_features(layer, &fetch_bbox, district))
            .await
            .map_err(|e| {
                error!(
                    layer = layer_id,
                    tile = %coordinate,
                    bbox = %fetch_bbox,
                    district = ?district.map(DistrictCode::as_str),
                    error = %e,
                    "tile query failed"
                );
                e
            })?;

        let mut builder = LayerBuilder::new(layer_id);
        for feature in &features {
            let geometry = match &feature.geometry {
                Some(geometry) => geometry,
                None => continue,
            };
            let clipped = match clip(geometry, &bbox, extent, layer.properties.buffer_size) {
                Ok(clipped) => clipped,
                Err(e) => {
                    warn!(layer = layer_id, tile = %coordinate, feature_id = feature.id, error = %e, "skipping feature");
                    continue;
                }
            };
            if clipped.is_empty() {
                continue;
            }

            let id = u64::try_from(feature.id).ok();
            builder
                .add_feature(id, &clipped, &feature.attributes)
                .map_err(|e| {
                    error!(layer = layer_id, tile = %coordinate, feature_id = feature.id, error = %e, "tile encoding failed");
                    e
                })?;
        }

        let feature_count = builder.len();
        let data = mvt::encode_tile(extent, vec![builder]).map_err(|e| {
            error!(layer = layer_id, tile = %coordinate, error = %e, "tile encoding failed");
            e
        })?;
        debug!(
            layer = layer_id,
            tile = %coordinate,
            fetched = features.len(),
            encoded = feature_count,
            bytes = data.len(),
            "rendered tile"
        );

        Ok(Tile {
            layer: layer_id.to_string(),
            coordinate,
            data,
            feature_count,
            content_type: mvt::CONTENT_TYPE,
            cache_control: self.tile_cache_control(),
        })
    }

    async fn labels(&self, layer_id: &str, district: Option<&DistrictCode>) -> Result<LabelSet> {
        let layer = self.config.layer(layer_id)?;
        let labels = match district {
            Some(district) => self
                .with_deadline(extract_labels(self.store.as_ref(), layer, district))
                .await
                .map_err(|e| {
                    error!(layer = layer_id, district = %district, error = %e, "label query failed");
                    e
                })?,
            None => Vec::new(),
        };

        Ok(LabelSet {
            count: labels.len(),
            labels,
            cache_control: self.label_cache_control(),
        })
    }
}
