//! Public, unauthenticated tracking endpoints.
//!
//! These are latency-sensitive and probe-resistant: every route answers
//! with the same shape whether or not the token resolves, and nothing here
//! blocks beyond the single conditional row update (side effects are
//! queued).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use axum_server::Handle;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use phishsim_common::models::result::ClientInfo;
use crate::services::tracking_service::TrackingService;
use crate::Error;

/// 1x1 transparent GIF served for open-pixel hits.
const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

#[derive(Clone)]
struct TrackingServerState {
    service: Arc<TrackingService>,
}

pub fn tracking_router(service: Arc<TrackingService>) -> Router {
    Router::new()
        .route("/phishing/open/{tracking_id}", get(handle_open))
        .route("/phishing/track/{tracking_id}", get(handle_track))
        .route("/phishing/submit/{tracking_id}", post(handle_submit))
        .route("/phishing/report/{tracking_id}", post(handle_report))
        .with_state(TrackingServerState { service })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Bind the tracking server; returns a sender that triggers graceful
/// shutdown.
pub async fn start_tracking_server(
    service: Arc<TrackingService>,
    addr: SocketAddr,
) -> Result<oneshot::Sender<()>, Error> {
    let app = tracking_router(service);

    let (shutdown_send, shutdown_recv) = oneshot::channel::<()>();
    info!("Tracking server listening on http://{}", addr);

    let handle = Handle::new();
    let handle_clone = handle.clone();

    tokio::spawn(async move {
        let _ = shutdown_recv.await;
        handle_clone.graceful_shutdown(None);
    });

    let server = axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Tracking server error: {}", e);
        }
        info!("Tracking server shut down.");
    });

    Ok(shutdown_send)
}

fn client_info(addr: &SocketAddr, headers: &HeaderMap) -> ClientInfo {
    // honor the proxy header if present, otherwise use the socket peer
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    ClientInfo {
        ip: Some(ip),
        user_agent,
    }
}

/// Plain 302, matching what mail clients expect from tracked links.
fn found(location: String) -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, location)])
}

async fn handle_open(
    State(state): State<TrackingServerState>,
    Path(tracking_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let client = client_info(&addr, &headers);
    if let Err(e) = state.service.handle_open(&tracking_id, &client).await {
        error!(error = %e, "open handler failed");
    }
    // the pixel renders no matter what
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/gif")],
        PIXEL_GIF,
    )
}

async fn handle_track(
    State(state): State<TrackingServerState>,
    Path(tracking_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let client = client_info(&addr, &headers);
    match state.service.handle_click(&tracking_id, &client).await {
        Ok(target) => found(target),
        Err(e) => {
            error!(error = %e, "click handler failed");
            found(state.service.neutral_url().to_string())
        }
    }
}

async fn handle_submit(
    State(state): State<TrackingServerState>,
    Path(tracking_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    // the submitted form body is deliberately dropped unread
) -> impl IntoResponse {
    let client = client_info(&addr, &headers);
    match state.service.handle_submit(&tracking_id, &client).await {
        Ok(target) => found(target),
        Err(e) => {
            error!(error = %e, "submit handler failed");
            found(state.service.neutral_url().to_string())
        }
    }
}

async fn handle_report(
    State(state): State<TrackingServerState>,
    Path(tracking_id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.service.handle_report(&tracking_id).await {
        error!(error = %e, "report handler failed");
    }
    // uniform 200 whether or not the token exists
    StatusCode::OK
}
