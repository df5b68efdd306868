//! JSON API for the view layer: one read endpoint for the rendered panel
//! and one write endpoint per operator action, each a thin wrapper around
//! a controller call.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::logbook::EventKind;
use crate::panel::{Panel, PanelError, PanelSnapshot};
use crate::render::Tab;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(panel: Panel) -> Router {
    Router::new()
        .route("/api/panel", get(get_panel))
        .route("/api/tab", post(post_tab))
        .route("/api/refresh", post(post_refresh))
        .route("/api/field", post(post_field))
        .route("/api/save", post(post_save))
        .route("/api/phase", post(post_phase))
        .route("/api/toggle", post(post_toggle))
        .route("/api/upload", post(post_upload))
        .route("/api/log_filter", post(post_log_filter))
        .with_state(panel)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<PanelError> for ApiError {
    fn from(err: PanelError) -> Self {
        let status = match &err {
            PanelError::Host(_) => StatusCode::BAD_GATEWAY,
            PanelError::UnknownDevice(_) | PanelError::NoEntry(_) => StatusCode::NOT_FOUND,
            PanelError::UnknownPhase(_) | PanelError::NoForm => StatusCode::BAD_REQUEST,
        };
        Self { status, message: err.to_string() }
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError { status: StatusCode::BAD_REQUEST, message: message.into() }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_panel(State(panel): State<Panel>) -> Json<PanelSnapshot> {
    Json(panel.snapshot().await)
}

#[derive(Deserialize)]
struct TabBody {
    tab: Tab,
}

async fn post_tab(State(panel): State<Panel>, Json(body): Json<TabBody>) -> Json<PanelSnapshot> {
    panel.switch_tab(body.tab).await;
    Json(panel.snapshot().await)
}

async fn post_refresh(State(panel): State<Panel>) -> Result<Json<PanelSnapshot>, ApiError> {
    panel.force_refresh().await?;
    Ok(Json(panel.snapshot().await))
}

#[derive(Deserialize)]
struct FieldBody {
    entry_id: String,
    key: String,
    value: String,
}

async fn post_field(State(panel): State<Panel>, Json(body): Json<FieldBody>) -> StatusCode {
    panel.set_field(&body.entry_id, &body.key, &body.value).await;
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct SaveBody {
    entry_id: String,
}

async fn post_save(
    State(panel): State<Panel>,
    Json(body): Json<SaveBody>,
) -> Result<Json<PanelSnapshot>, ApiError> {
    panel.save(&body.entry_id).await?;
    Ok(Json(panel.snapshot().await))
}

#[derive(Deserialize)]
struct PhaseBody {
    device_id: String,
    phase: String,
}

async fn post_phase(
    State(panel): State<Panel>,
    Json(body): Json<PhaseBody>,
) -> Result<Json<PanelSnapshot>, ApiError> {
    panel.change_phase(&body.device_id, &body.phase).await?;
    Ok(Json(panel.snapshot().await))
}

#[derive(Deserialize)]
struct ToggleBody {
    entity_id: String,
}

async fn post_toggle(
    State(panel): State<Panel>,
    Json(body): Json<ToggleBody>,
) -> Result<StatusCode, ApiError> {
    panel.toggle(&body.entity_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct UploadBody {
    device_id: String,
    /// Base64 image bytes, with or without a `data:...;base64,` prefix.
    image: String,
}

async fn post_upload(
    State(panel): State<Panel>,
    Json(body): Json<UploadBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bytes = decode_image(&body.image)?;
    let version = panel.upload_image(&body.device_id, bytes).await?;
    Ok(Json(json!({ "version": version })))
}

#[derive(Deserialize)]
struct LogFilterBody {
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    kind: Option<EventKind>,
}

async fn post_log_filter(
    State(panel): State<Panel>,
    Json(body): Json<LogFilterBody>,
) -> Json<PanelSnapshot> {
    panel.set_log_filter(body.device, body.kind).await;
    Json(panel.snapshot().await)
}

/// Decode an uploaded image, tolerating the data-URL form a file reader
/// produces.
fn decode_image(image: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = match image.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => image,
    };
    BASE64
        .decode(encoded.trim())
        .map_err(|e| bad_request(format!("invalid image encoding: {e}")))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(panel: Panel, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.expect("failed to bind web port");

    info!(%addr, "panel api listening");

    axum::serve(listener, router(panel))
        .await
        .expect("web server error");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testhost::FakeHost;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    async fn bootstrapped_panel() -> Panel {
        let panel = Panel::new(Arc::new(FakeHost::with_one_device()));
        panel.refresh_signal().await;
        panel
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn panel_endpoint_serves_snapshot() {
        let panel = bootstrapped_panel().await;
        let response = router(panel)
            .oneshot(Request::builder().uri("/api/panel").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["tab"], "overview");
        assert_eq!(json["content"]["kind"], "device_grid");
    }

    #[tokio::test]
    async fn tab_switch_returns_new_tabs_content() {
        let panel = bootstrapped_panel().await;
        let response = router(panel)
            .oneshot(post_json("/api/tab", json!({ "tab": "settings" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["tab"], "settings");
        assert_eq!(json["content"]["kind"], "form");
    }

    #[tokio::test]
    async fn field_then_save_roundtrip() {
        let panel = bootstrapped_panel().await;
        panel.switch_tab(Tab::Settings).await;
        let app = router(panel.clone());

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/field",
                json!({ "entry_id": "entry1", "key": "target_temp", "value": "26" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(post_json("/api/save", json!({ "entry_id": "entry1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let st = panel.state.read().await;
        assert!(st.drafts.entry("entry1").is_none());
        assert_eq!(st.devices[0].options.get("target_temp"), Some(&json!("26")));
    }

    #[tokio::test]
    async fn unknown_phase_is_bad_request() {
        let panel = bootstrapped_panel().await;
        let response = router(panel)
            .oneshot(post_json("/api/phase", json!({ "device_id": "dev1", "phase": "turbo" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let panel = bootstrapped_panel().await;
        let response = router(panel)
            .oneshot(post_json("/api/phase", json!({ "device_id": "nope", "phase": "drying" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_accepts_data_url() {
        let panel = bootstrapped_panel().await;
        let encoded = format!("data:image/jpeg;base64,{}", BASE64.encode([0xff, 0xd8, 0xff]));
        let response = router(panel)
            .oneshot(post_json("/api/upload", json!({ "device_id": "dev1", "image": encoded })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["version"], 1);
    }

    #[tokio::test]
    async fn malformed_image_is_bad_request() {
        let panel = bootstrapped_panel().await;
        let response = router(panel)
            .oneshot(post_json("/api/upload", json!({ "device_id": "dev1", "image": "%%%" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // -- decode_image -------------------------------------------------------

    #[test]
    fn decode_image_strips_data_url_prefix() {
        let encoded = format!("data:image/png;base64,{}", BASE64.encode(b"abc"));
        assert_eq!(decode_image(&encoded).unwrap(), b"abc");
    }

    #[test]
    fn decode_image_accepts_bare_base64() {
        assert_eq!(decode_image(&BASE64.encode(b"abc")).unwrap(), b"abc");
    }
}
