use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// GET /api/health — minimal liveness probe for load balancers, no auth, no stream
/// enumeration (spec §6.3).
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /api/health/detailed — full health info: uptime, version, per-stream publisher/
/// subscriber counts.
pub async fn health_check_detailed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let streams = state.stats.snapshot_all();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "stream_count": streams.len(),
    }))
    .into_response()
}

/// GET /metrics — Prometheus text-format exposition of per-stream counters plus
/// process-wide gauges, in the teacher's `web.rs::metrics` layout (HELP/TYPE comment
/// pair, blank line between series).
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime_secs = state.started_at.elapsed().as_secs();
    let streams = state.stats.snapshot_all();

    let mut body = format!(
        "# HELP streambridge_uptime_seconds Server uptime in seconds\n\
         # TYPE streambridge_uptime_seconds gauge\n\
         streambridge_uptime_seconds {uptime_secs}\n\
         \n\
         # HELP streambridge_active_streams Number of streams with at least one counter entry\n\
         # TYPE streambridge_active_streams gauge\n\
         streambridge_active_streams {}\n\
         \n\
         # HELP streambridge_audio_messages_total Audio messages ingested, by stream\n\
         # TYPE streambridge_audio_messages_total counter\n",
        streams.len(),
    );

    for (stream, snap) in &streams {
        body.push_str(&format!("streambridge_audio_messages_total{{stream=\"{stream}\"}} {}\n", snap.audio_messages));
    }
    body.push_str(
        "\n# HELP streambridge_video_messages_total Video messages ingested, by stream\n\
         # TYPE streambridge_video_messages_total counter\n",
    );
    for (stream, snap) in &streams {
        body.push_str(&format!("streambridge_video_messages_total{{stream=\"{stream}\"}} {}\n", snap.video_messages));
    }
    body.push_str(
        "\n# HELP streambridge_dropped_for_reduce_total Messages dropped by reduce-sequence-header logic, by stream\n\
         # TYPE streambridge_dropped_for_reduce_total counter\n",
    );
    for (stream, snap) in &streams {
        body.push_str(&format!("streambridge_dropped_for_reduce_total{{stream=\"{stream}\"}} {}\n", snap.dropped_for_reduce));
    }
    body.push_str(
        "\n# HELP streambridge_queue_shrinks_total Consumer queue shrink events, by stream\n\
         # TYPE streambridge_queue_shrinks_total counter\n",
    );
    for (stream, snap) in &streams {
        body.push_str(&format!("streambridge_queue_shrinks_total{{stream=\"{stream}\"}} {}\n", snap.queue_shrinks));
    }
    body.push_str(
        "\n# HELP streambridge_subscriber_count Current subscriber count, by stream\n\
         # TYPE streambridge_subscriber_count gauge\n",
    );
    for (stream, snap) in &streams {
        body.push_str(&format!("streambridge_subscriber_count{{stream=\"{stream}\"}} {}\n", snap.subscriber_count));
    }

    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use streambridge_protocol::StreamBridgeConfig;

    #[tokio::test]
    async fn health_check_reports_ok() {
        let response = health_check().await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_includes_uptime_and_stream_gauges() {
        let state = Arc::new(AppState::new(StreamBridgeConfig::default()));
        state.stats.get_or_create("__defaultVhost__/live/s1").record_audio();
        let response = metrics(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
