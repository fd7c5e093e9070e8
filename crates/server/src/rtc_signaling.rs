use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use streambridge_media::error::Error as MediaError;
use streambridge_media::registry::DynMediaSource;
use streambridge_media::rtc_agent::PeerRole;
use streambridge_media::rtc_agent::PublisherType;
use streambridge_media::rtc_attendee::{AttendeeEvent, RtcAttendee};
use streambridge_protocol::messages::{RtcByeRequest, RtcErrorResponse, RtcOfferRequest, RtcOfferResponse};
use streambridge_protocol::StreamId;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::rtc_bridge::PublisherSink;
use crate::state::AppState;

/// Keeps draining an attendee's event stream after the HTTP handler that created it has
/// already returned its answer SDP — ICE candidates trickle in for the life of the
/// connection, and (for a publisher) `Frame` events must keep reaching `MediaSink` long
/// after the request/response cycle is over. Cleans the attendee out of the stream on
/// `Failed`/channel-close.
fn spawn_event_drain(state: Arc<AppState>, stream_id: StreamId, source: Arc<DynMediaSource>, peer_id: String, role: PeerRole, attendee: Arc<RwLock<RtcAttendee>>) {
    tokio::spawn(async move {
        loop {
            let event = {
                let mut guard = attendee.write().await;
                guard.poll_event().await
            };
            match event {
                Some(AttendeeEvent::Failed(reason)) => {
                    warn!(stream = %stream_id, %peer_id, %reason, "rtc attendee failed, tearing down");
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        source.rtc.remove(&peer_id).await;
        if role == PeerRole::Publisher {
            source.on_publisher_left().await;
        }
        let has_rtmp_subscriber = source.live.lock().await.consumer_count() > 0;
        source.recompute_activation(has_rtmp_subscriber).await;
        state.registry.reap_if_idle(&stream_id).await;
    });
}

/// Pull the `ice-ufrag` value out of an SDP blob so it can double as the `sessionid`
/// handed back to the client (spec §6.1: "sessionid equals the peer's SDP ice-ufrag").
fn ice_ufrag(sdp: &str) -> Option<String> {
    sdp.lines().find_map(|line| line.strip_prefix("a=ice-ufrag:")).map(|s| s.trim().to_string())
}

fn error_response(status: StatusCode, code: i32, msg: impl Into<String>) -> axum::response::Response {
    (status, Json(RtcErrorResponse::new(code, msg))).into_response()
}

/// POST /rtc/v1/publish — a browser offering to publish H.264+Opus into a stream.
pub async fn publish(State(state): State<Arc<AppState>>, Json(req): Json<RtcOfferRequest>) -> impl IntoResponse {
    let stream_id = match StreamId::parse(&req.streamurl) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, 400, e.to_string()),
    };

    let source = state.registry.get_or_create(&stream_id).await;
    if let Err(e) = source.on_publisher_joined(PublisherType::RemoteRtc).await {
        return error_response(StatusCode::CONFLICT, 409, e.to_string());
    }
    let has_rtmp_subscriber = source.live.lock().await.consumer_count() > 0;
    source.recompute_activation(has_rtmp_subscriber).await;

    let peer_id = ice_ufrag(&req.sdp).unwrap_or_else(|| Uuid::new_v4().to_string());
    let (events_tx, events_rx) = mpsc::channel(64);
    let mut attendee = match RtcAttendee::create(peer_id.clone(), PeerRole::Publisher, &["audio", "video"], &req.sdp, state.rtc_agent.clone(), events_tx, events_rx).await {
        Ok(a) => a,
        Err(e) => {
            source.on_publisher_left().await;
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, 500, e.to_string());
        }
    };
    attendee.set_sink(Arc::new(PublisherSink::new(source.clone())));
    let attendee = Arc::new(RwLock::new(attendee));
    source.rtc.add(peer_id.clone(), attendee.clone(), PeerRole::Publisher).await;

    // The answer SDP is the first event the agent delivers; wait for it inline so the
    // HTTP response can carry it (spec §6.1 success shape).
    let answer = loop {
        let event = {
            let mut guard = attendee.write().await;
            guard.poll_event().await
        };
        match event {
            Some(AttendeeEvent::Answer(sdp)) => break Some(sdp),
            Some(AttendeeEvent::Failed(reason)) => {
                warn!(stream = %stream_id, %reason, "publisher negotiation failed");
                break None;
            }
            Some(_) => continue,
            None => break None,
        }
    };

    let Some(sdp) = answer else {
        source.rtc.remove(&peer_id).await;
        source.on_publisher_left().await;
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, 500, "no answer from agent");
    };

    spawn_event_drain(state.clone(), stream_id, source, peer_id.clone(), PeerRole::Publisher, attendee);

    Json(RtcOfferResponse {
        code: 0,
        server: "streambridge".to_string(),
        sdp,
        sessionid: peer_id,
    })
    .into_response()
}

/// POST /rtc/v1/unpublish.
pub async fn unpublish(State(state): State<Arc<AppState>>, Json(req): Json<RtcByeRequest>) -> impl IntoResponse {
    let stream_id = match StreamId::parse(&req.streamurl) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, 400, e.to_string()),
    };
    let Some(source) = state.registry.get(&stream_id).await else {
        return error_response(StatusCode::NOT_FOUND, 404, "no such stream");
    };

    if let Some(attendee) = source.rtc.attendee(&req.sessionid).await {
        attendee.write().await.close().await;
    }
    source.rtc.remove(&req.sessionid).await;
    source.on_publisher_left().await;
    state.registry.reap_if_idle(&stream_id).await;

    Json(serde_json::json!({ "code": 0 })).into_response()
}

/// POST /rtc/v1/play — a browser requesting to subscribe to a stream.
pub async fn play(State(state): State<Arc<AppState>>, Json(req): Json<RtcOfferRequest>) -> impl IntoResponse {
    let stream_id = match StreamId::parse(&req.streamurl) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, 400, e.to_string()),
    };

    let Some(source) = state.registry.get(&stream_id).await else {
        return error_response(StatusCode::NOT_FOUND, 404, "no such stream");
    };

    let peer_id = ice_ufrag(&req.sdp).unwrap_or_else(|| Uuid::new_v4().to_string());
    let (events_tx, events_rx) = mpsc::channel(64);
    let attendee = match RtcAttendee::create(peer_id.clone(), PeerRole::Subscriber, &["audio", "video"], &req.sdp, state.rtc_agent.clone(), events_tx, events_rx).await {
        Ok(mut a) => {
            if let Some(publisher_id) = source.rtc.publisher_id().await {
                a.bind_publisher(publisher_id);
            }
            a
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, 500, e.to_string()),
    };
    let attendee = Arc::new(RwLock::new(attendee));
    source.rtc.add(peer_id.clone(), attendee.clone(), PeerRole::Subscriber).await;
    let has_rtmp_subscriber = source.live.lock().await.consumer_count() > 0;
    source.recompute_activation(has_rtmp_subscriber).await;

    let answer = loop {
        let event = {
            let mut guard = attendee.write().await;
            guard.poll_event().await
        };
        match event {
            Some(AttendeeEvent::Answer(sdp)) => break Some(sdp),
            Some(AttendeeEvent::Failed(_)) => break None,
            Some(_) => continue,
            None => break None,
        }
    };

    let Some(sdp) = answer else {
        source.rtc.remove(&peer_id).await;
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, 500, "no answer from agent");
    };

    spawn_event_drain(state.clone(), stream_id, source, peer_id.clone(), PeerRole::Subscriber, attendee);

    Json(RtcOfferResponse {
        code: 0,
        server: "streambridge".to_string(),
        sdp,
        sessionid: peer_id,
    })
    .into_response()
}

/// POST /rtc/v1/unplay.
pub async fn unplay(State(state): State<Arc<AppState>>, Json(req): Json<RtcByeRequest>) -> impl IntoResponse {
    let stream_id = match StreamId::parse(&req.streamurl) {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, 400, e.to_string()),
    };
    let Some(source) = state.registry.get(&stream_id).await else {
        return error_response(StatusCode::NOT_FOUND, 404, "no such stream");
    };

    if let Some(attendee) = source.rtc.attendee(&req.sessionid).await {
        attendee.write().await.close().await;
    }
    source.rtc.remove(&req.sessionid).await;
    let has_rtmp_subscriber = source.live.lock().await.consumer_count() > 0;
    source.recompute_activation(has_rtmp_subscriber).await;
    state.registry.reap_if_idle(&stream_id).await;

    Json(serde_json::json!({ "code": 0 })).into_response()
}

impl From<MediaError> for RtcErrorResponse {
    fn from(err: MediaError) -> Self {
        RtcErrorResponse::new(500, err.to_string())
    }
}
