//! HTTP surface for viewers: the committed overlay and the camera frame it
//! belongs to.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::Stream;
use live_overlay_common::annotation::{AnnotationKind, Geometry, OverlaySnapshot};
use live_overlay_common::frame::Frame;
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    overlay: watch::Receiver<OverlaySnapshot>,
    frames: watch::Receiver<Option<Frame>>,
}

impl AppState {
    pub fn new(
        overlay: watch::Receiver<OverlaySnapshot>,
        frames: watch::Receiver<Option<Frame>>,
    ) -> Self {
        Self { overlay, frames }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AnnotationView {
    kind: AnnotationKind,
    geometry: Geometry,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    /// Inline CSS the page applies to the element.
    style: String,
}

#[derive(Debug, Serialize)]
struct OverlayView {
    cycle: u64,
    frame_seq: Option<u64>,
    captured_at_ms: Option<i64>,
    annotations: Vec<AnnotationView>,
}

impl From<&OverlaySnapshot> for OverlayView {
    fn from(snapshot: &OverlaySnapshot) -> Self {
        Self {
            cycle: snapshot.cycle,
            frame_seq: snapshot.frame_seq,
            captured_at_ms: snapshot.captured_at_ms,
            annotations: snapshot
                .annotations
                .iter()
                .map(|a| AnnotationView {
                    kind: a.kind,
                    geometry: a.geometry,
                    text: a.text.clone(),
                    style: a.style(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health
async fn health() -> &'static str {
    "ok"
}

/// GET /api/overlay — latest committed overlay
async fn get_overlay(State(state): State<Arc<AppState>>) -> Json<OverlayView> {
    let view = OverlayView::from(&*state.overlay.borrow());
    Json(view)
}

/// GET /api/overlay/events — one `overlay` event per committed cycle
async fn overlay_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.overlay.clone();
    rx.mark_changed();
    Sse::new(snapshot_events(rx)).keep_alive(KeepAlive::default())
}

fn snapshot_events(
    rx: watch::Receiver<OverlaySnapshot>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok()?;
        let view = OverlayView::from(&*rx.borrow_and_update());
        let event = match Event::default().event("overlay").json_data(&view) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, cycle = view.cycle, "failed to encode overlay event");
                Event::default().event("error").data(e.to_string())
            }
        };
        Some((Ok(event), rx))
    })
}

/// GET /api/frame — latest camera JPEG
async fn get_frame(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let frame = state.frames.borrow().clone();
    match frame {
        Some(frame) => ([(header::CONTENT_TYPE, "image/jpeg")], frame.jpeg).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/overlay", get(get_overlay))
        .route("/api/overlay/events", get(overlay_events))
        .route("/api/frame", get(get_frame))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "live-overlay API server starting");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
