use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes as AxumBytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream;
use streambridge_media::message::{Message, MessageType};
use streambridge_media::registry::DynMediaSource;
use streambridge_protocol::StreamId;
use tracing::info;

use crate::state::AppState;

/// Minimal FLV container writer (spec §6.2, §9): file header, then one tag per
/// `Message`, big-endian tag header, previous-tag-size trailer. No seeking, no
/// keyframe index, no metadata enrichment beyond what `MetaCache` already produced.
pub struct FlvWriter;

impl FlvWriter {
    pub fn file_header() -> Bytes {
        let mut buf = BytesMut::with_capacity(13);
        buf.extend_from_slice(b"FLV");
        buf.put_u8(1); // version
        buf.put_u8(0x05); // audio + video present
        buf.put_u32(9); // header size
        buf.put_u32(0); // PreviousTagSize0
        buf.freeze()
    }

    /// One tag (header + body + trailing previous-tag-size for itself, so tags can be
    /// concatenated directly).
    pub fn write_tag(msg: &Message) -> Bytes {
        let tag_type: u8 = match msg.kind {
            MessageType::Audio => 8,
            MessageType::Video => 9,
            MessageType::Metadata => 18,
        };
        let body = Self::tag_body(msg);
        let data_size = body.len() as u32;
        let ts = msg.timestamp_ms.max(0) as u32;

        let mut buf = BytesMut::with_capacity(11 + body.len() + 4);
        buf.put_u8(tag_type);
        buf.put_uint(data_size as u64, 3);
        buf.put_uint((ts & 0x00FF_FFFF) as u64, 3);
        buf.put_u8(((ts >> 24) & 0xFF) as u8);
        buf.put_uint(0, 3); // stream id, always 0
        buf.extend_from_slice(&body);
        buf.put_u32(11 + data_size);
        buf.freeze()
    }

    fn tag_body(msg: &Message) -> Bytes {
        match msg.kind {
            MessageType::Video => {
                let frame_type: u8 = if msg.is_keyframe { 1 } else { 2 };
                let avc_packet_type: u8 = if msg.is_sequence_header { 0 } else { 1 };
                let payload = msg.payload.to_contiguous();
                let mut buf = BytesMut::with_capacity(5 + payload.len());
                buf.put_u8((frame_type << 4) | 0x07); // AVC codec id
                buf.put_u8(avc_packet_type);
                buf.put_uint(0, 3); // composition time, no B-frame reorder here
                buf.extend_from_slice(&payload);
                buf.freeze()
            }
            MessageType::Audio => {
                let aac_packet_type: u8 = if msg.is_sequence_header { 0 } else { 1 };
                let payload = msg.payload.to_contiguous();
                let mut buf = BytesMut::with_capacity(2 + payload.len());
                buf.put_u8(0xAF); // AAC, 44kHz, 16-bit, stereo
                buf.put_u8(aac_packet_type);
                buf.extend_from_slice(&payload);
                buf.freeze()
            }
            MessageType::Metadata => msg.payload.to_contiguous(),
        }
    }
}

/// Drops the consumer on stream end or client disconnect by spawning the async
/// removal once this guard is dropped (the `LiveSource` lock is async, Drop is not).
struct ConsumerGuard {
    source: Arc<DynMediaSource>,
    consumer_id: u64,
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        let source = self.source.clone();
        let consumer_id = self.consumer_id;
        tokio::spawn(async move {
            let has_rtmp_subscriber = {
                let mut live = source.live.lock().await;
                live.remove_consumer(consumer_id);
                live.consumer_count() > 0
            };
            source.recompute_activation(has_rtmp_subscriber).await;
        });
    }
}

struct FlvStreamState {
    guard: ConsumerGuard,
    sent_header: bool,
}

/// `GET /{app}/{stream}.flv` (spec §6.2).
pub async fn play_flv(State(state): State<Arc<AppState>>, Path((app, stream_file)): Path<(String, String)>) -> Response {
    let Some(stream) = stream_file.strip_suffix(".flv") else {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected a .flv path").into_response();
    };

    let id = StreamId::new(&state.config.server.default_vhost, &app, stream);
    let Some(source) = state.registry.get(&id).await else {
        return (StatusCode::NOT_FOUND, "no such stream").into_response();
    };

    let consumer_id = source.live.lock().await.add_consumer();
    source.recompute_activation(true).await;
    info!(%id, consumer_id, "flv playback attached");

    let init_state = FlvStreamState {
        guard: ConsumerGuard { source, consumer_id },
        sent_header: false,
    };

    let byte_stream = stream::unfold(init_state, |mut st| async move {
        if !st.sent_header {
            st.sent_header = true;
            return Some((Ok::<_, std::io::Error>(AxumBytes::from(FlvWriter::file_header())), st));
        }

        loop {
            let messages = st.guard.source.live.lock().await.fetch(st.guard.consumer_id, 32);
            if messages.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            }

            let mut chunk = BytesMut::new();
            for msg in &messages {
                chunk.extend_from_slice(&FlvWriter::write_tag(msg));
            }
            return Some((Ok(AxumBytes::from(chunk.freeze())), st));
        }
    });

    let mut response = Response::new(Body::from_stream(byte_stream));
    response.headers_mut().insert(header::CONTENT_TYPE, "video/x-flv".parse().unwrap());
    response.headers_mut().insert(header::CONNECTION, "close".parse().unwrap());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_matches_flv_signature() {
        let header = FlvWriter::file_header();
        assert_eq!(&header[0..3], b"FLV");
        assert_eq!(header[3], 1);
        assert_eq!(header.len(), 13);
    }

    #[test]
    fn video_tag_carries_keyframe_and_avc_type() {
        let msg = Message::video(40, &b"nal"[..], true);
        let tag = FlvWriter::write_tag(&msg);
        assert_eq!(tag[0], 9); // video tag type
        let flags = tag[11];
        assert_eq!(flags >> 4, 1); // keyframe
        assert_eq!(flags & 0x0F, 7); // AVC codec id
        assert_eq!(tag[12], 1); // not a sequence header
    }

    #[test]
    fn audio_sequence_header_uses_aac_packet_type_zero() {
        let msg = Message::sequence_header(MessageType::Audio, 0, &[0x12, 0x10][..]);
        let tag = FlvWriter::write_tag(&msg);
        assert_eq!(tag[0], 8); // audio tag type
        assert_eq!(tag[12], 0); // AAC sequence header
    }

    #[test]
    fn trailing_previous_tag_size_matches_tag_length() {
        let msg = Message::audio(0, &b"ab"[..]);
        let tag = FlvWriter::write_tag(&msg);
        let trailer_offset = tag.len() - 4;
        let trailer = u32::from_be_bytes(tag[trailer_offset..].try_into().unwrap());
        assert_eq!(trailer, (tag.len() - 4) as u32);
    }
}
