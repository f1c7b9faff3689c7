//! HTTP facade.
//!
//! ```text
//! GET /tiles/{layer}/mvt/{z}/{x}/{y}[.mvt|.pbf]?districtCode=<code>
//! GET /tiles/{layer}/labels?districtCode=<code>
//! ```
//!
//! Tiles are binary with no envelope; every error is JSON `{error, message}`.
use std::sync::Arc;

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::cadastral::DistrictCode;
use crate::error::Error;
use crate::tile::TileCoordinate;
use crate::TileSource;

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn TileSource>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DistrictParams {
    #[serde(rename = "districtCode")]
    pub district_code: Option<String>,
}

pub fn router(source: Arc<dyn TileSource>) -> Router {
    Router::new()
        .route("/tiles/:layer/mvt/:z/:x/:y", get(tile))
        .route("/tiles/:layer/mvt", get(tile_without_address))
        .route("/tiles/:layer/labels", get(labels))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { source })
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidTileAddress { .. }
        | Error::InvalidCadastralCode(_)
        | Error::InvalidDistrictCode(_)
        | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::UnknownLayer(_) | Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::StoreUnavailable(_) | Error::StoreTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::MalformedGeometry(_)
        | Error::EncodingFailure(_)
        | Error::Config(_)
        | Error::InvalidSource(_)
        | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if self.is_client_error() {
            debug!(status = status.as_u16(), error = %self, "rejected request");
        } else {
            error!(status = status.as_u16(), kind = self.kind(), error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        Error::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Error::InvalidRequest(rejection.body_text())
    }
}

fn strip_tile_suffix(y: &str) -> &str {
    y.strip_suffix(".mvt")
        .or_else(|| y.strip_suffix(".pbf"))
        .unwrap_or(y)
}

async fn tile(
    State(state): State<AppState>,
    path: Result<Path<(String, String, String, String)>, PathRejection>,
    query: Result<Query<DistrictParams>, QueryRejection>,
) -> Result<Response, Error> {
    let Path((layer, z, x, y)) = path?;
    let Query(params) = query?;
    let coordinate = TileCoordinate::parse(&z, &x, strip_tile_suffix(&y))?;
    let district = DistrictCode::from_param(params.district_code.as_deref())?;

    let tile = state
        .source
        .render_mvt(&layer, coordinate, district.as_ref())
        .await?;

    let headers = [
        (header::CONTENT_TYPE, tile.content_type.to_string()),
        (header::CACHE_CONTROL, tile.cache_control),
    ];
    Ok((StatusCode::OK, headers, tile.data).into_response())
}

/// The old unparameterised tile route; kept so stale clients get guidance
/// instead of a bare 404.
async fn tile_without_address(Path(layer): Path<String>) -> Response {
    let body = Json(json!({
        "success": false,
        "message": format!("Use /tiles/{}/mvt/{{z}}/{{x}}/{{y}} to request vector tiles.", layer),
    }));
    (StatusCode::NOT_FOUND, body).into_response()
}

async fn labels(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<DistrictParams>, QueryRejection>,
) -> Result<Response, Error> {
    let Path(layer) = path?;
    let Query(params) = query?;
    let district = DistrictCode::from_param(params.district_code.as_deref())?;
    let set = state.source.labels(&layer, district.as_ref()).await?;

    let headers = [(header::CACHE_CONTROL, set.cache_control.clone())];
    Ok((StatusCode::OK, headers, Json(set)).into_response())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found(uri: Uri) -> Error {
    Error::NotFound(uri.path().to_string())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::mvt::decode;
    use crate::service::tests::fixture_service;

    async fn get_response(uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let app = router(Arc::new(fixture_service()));
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, _, body) = get_response(uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_tile_endpoint() {
        let (status, headers, body) =
            get_response("/tiles/nops/mvt/14/13322/8539?districtCode=3575020001").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "application/vnd.mapbox-vector-tile"
        );
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=300");

        let layers = decode::tile(&body);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].features.len(), 1);
    }

    #[tokio::test]
    async fn test_tile_suffix_and_empty_tile() {
        let (status, _, body) =
            get_response("/tiles/nops/mvt/14/13322/8539.pbf?districtCode=3575020001").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode::tile(&body).len(), 1);

        let (status, headers, body) =
            get_response("/tiles/nops/mvt/14/13323/8539?districtCode=3575020001").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "application/vnd.mapbox-vector-tile"
        );
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_tile_address() {
        let (status, body) = get_json("/tiles/nops/mvt/14/16384/8539").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "InvalidTileAddress");
        assert!(body["message"].as_str().unwrap().contains("x=16384"));

        let (status, body) = get_json("/tiles/nops/mvt/0/0/1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("y=1"));

        let (status, body) = get_json("/tiles/nops/mvt/abc/0/0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "InvalidTileAddress");
    }

    #[tokio::test]
    async fn test_invalid_district_and_unknown_layer() {
        let (status, body) = get_json("/tiles/nops/mvt/14/13322/8539?districtCode=35%25").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "InvalidDistrictCode");

        let (status, body) = get_json("/tiles/roads/mvt/14/13322/8539").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "UnknownLayer");
    }

    #[tokio::test]
    async fn test_rejected_requests_are_json() {
        let (status, headers, body) = get_response(
            "/tiles/nops/labels?districtCode=3575020001&districtCode=3575020002",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "InvalidRequest");
        assert!(body["message"].as_str().unwrap().contains("districtCode"));

        let (status, headers, body) = get_response("/tiles/nops/mvt/14/13322").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "NotFound");
        assert!(body["message"].as_str().unwrap().contains("/tiles/nops/mvt/14/13322"));
    }

    #[tokio::test]
    async fn test_labels_endpoint() {
        let (status, headers, body) =
            get_response("/tiles/nops/labels?districtCode=3575020001").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=3600");

        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["count"], 1);
        assert_eq!(body["labels"][0]["id"], 1);
        assert_eq!(body["labels"][0]["view_nop"], "0001");
        assert!(body["labels"][0]["centroid_lat"].is_f64());
        assert!(body["labels"][0]["centroid_lng"].is_f64());
    }

    #[tokio::test]
    async fn test_labels_without_matches() {
        let (status, body) = get_json("/tiles/nops/labels?districtCode=9999999999").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "labels": [], "count": 0 }));

        let (status, body) = get_json("/tiles/nops/labels").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "labels": [], "count": 0 }));
    }

    #[tokio::test]
    async fn test_deprecated_route_and_health() {
        let (status, body) = get_json("/tiles/nops/mvt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("/tiles/nops/mvt/{z}/{x}/{y}"));

        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
