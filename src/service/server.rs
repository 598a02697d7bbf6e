use crate::service::handlers::{self, AppState};
use anyhow::Result;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{Span, debug_span, info};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth", post(handlers::auth))
        .route("/request_otp", post(handlers::request_otp))
        .route("/register_face", post(handlers::register_face))
        .route("/face-login", post(handlers::face_login))
        .route("/request_qr", post(handlers::request_qr))
        .route("/qr/approve", get(handlers::qr_approve))
        .route("/qr/deny", get(handlers::qr_deny))
        .route("/qr_status", get(handlers::qr_status))
        .route("/control", post(handlers::control))
        .route("/status", get(handlers::status))
        .route("/mc/:token", get(handlers::mobile_control))
        .layer(TraceLayer::new_for_http().make_span_with(make_span))
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let method = request.method();
    let path = request.uri().path();
    debug_span!("http-request", %method, path)
}
