//! # NOP Tiles
//!
//! Vector tiles and label points for cadastral map layers: parcels (`nops`),
//! blocks (`bloks`), buildings (`bangunans`) and districts (`kecamatans`).
//!
//! ## Current features
//!
//! Given a PostGIS database and a tile source YAML describing its layers, this
//! crate serves Mapbox Vector Tiles for XYZ addresses and per-parcel label
//! centroids for an administrative area. Parcels are filtered by a prefix of
//! their 18-digit parcel number (NOP), which encodes province, regency,
//! district and village.
//!
//! The store only answers bounding-box and prefix queries. Projection into
//! tile space, clipping and MVT encoding happen in process, so the output is
//! identical for identical data regardless of the database version.
//!
//! ## Known Limitations
//!
//! Layers are expected to hold polygons (or points). Line layers are skipped
//! feature by feature with a warning. Tiles are not cached server-side; the
//! `Cache-Control` headers leave that to intermediate caches.

#![deny(warnings)]

// TODO: remove once async fn in traits become object safe
use async_trait::async_trait;

pub mod cadastral;
pub mod clip;
pub mod error;
pub mod http;
pub mod labels;
pub mod mvt;
pub mod service;
pub mod source;
pub mod store;
pub mod tile;

pub use cadastral::{CadastralCode, DistrictCode};
pub use error::{Error, Result};
pub use service::{LabelSet, Tile, TileService};
pub use source::TileSourceConfig;
pub use tile::{BoundingBox, TileCoordinate};

/// This is the main trait exported by this crate: something that can render
/// a layer's tile and list its label points.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Renders the Mapbox vector tile of `layer` for a slippy map tile in XYZ
    /// format, optionally restricted to one administrative area.
    async fn render_mvt(
        &self,
        layer: &str,
        tile: TileCoordinate,
        district: Option<&DistrictCode>,
    ) -> Result<Tile>;

    /// Label centroids of `layer` inside `district`. No district, no labels.
    async fn labels(&self, layer: &str, district: Option<&DistrictCode>) -> Result<LabelSet>;
}
