mod config;
mod flv;
mod rtc_bridge;
mod rtc_signaling;
mod rtmp_ingest;
mod state;
mod stats_http;
mod webrtc_agent;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

fn parse_args() -> (PathBuf, Option<u16>) {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("./config/streambridge.toml");
    let mut port_override = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    port_override = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    (config_path, port_override)
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rtc/v1/publish", post(rtc_signaling::publish))
        .route("/rtc/v1/unpublish", post(rtc_signaling::unpublish))
        .route("/rtc/v1/play", post(rtc_signaling::play))
        .route("/rtc/v1/unplay", post(rtc_signaling::unplay))
        .route("/{app}/{stream}", get(flv::play_flv))
        .route("/api/health", get(stats_http::health_check))
        .route("/api/health/detailed", get(stats_http::health_check_detailed))
        .route("/metrics", get(stats_http::metrics))
        .layer(RequestBodyLimitLayer::new(65_536))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config_path, port_override) = parse_args();

    let mut config = config::load_config(&config_path)?;
    if let Some(p) = port_override {
        config.server.port = p;
    }

    if let Err(issues) = config.validate() {
        let has_errors = issues.iter().any(|i| i.starts_with("ERROR:"));
        for issue in &issues {
            if issue.starts_with("ERROR:") {
                tracing::error!("{}", issue);
            } else {
                tracing::warn!("{}", issue);
            }
        }
        if has_errors {
            tracing::error!("Configuration has {} issue(s). Fix the ERROR(s) above and restart.", issues.len());
            std::process::exit(1);
        }
    }

    let port = config.server.port;
    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, port).parse().context("Invalid bind address")?;

    let state = Arc::new(AppState::new(config));

    let app = build_router(Arc::clone(&state))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request.headers().get("x-request-id").and_then(|v| v.to_str().ok()).unwrap_or("-");
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                })
                .on_request(|_request: &axum::http::Request<_>, _span: &tracing::Span| {
                    tracing::event!(Level::INFO, "started");
                })
                .on_response(|response: &axum::http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                    tracing::event!(Level::INFO, status = %response.status().as_u16(), duration_ms = %latency.as_millis(), "completed");
                }),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!("===========================================");
    tracing::info!("  StreamBridge RTMP/WebRTC server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Listening on http://{bind_addr}");
    tracing::info!("===========================================");

    let listener = TcpListener::bind(bind_addr).await.with_context(|| format!("Failed to bind to {bind_addr}"))?;
    tracing::info!("Server ready, accepting connections");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
