use crate::codec::aac::AudioSpecificConfig;
use crate::codec::h264::{parse_sps, SpsInfo};
use crate::consumer::Consumer;
use crate::message::Message;
use serde_json::Value;
use tracing::debug;

const SERVER_NAME: &str = "streambridge";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Latest-known metadata and sequence headers for a stream (spec §4.6).
#[derive(Default, Clone)]
pub struct MetaCache {
    metadata: Option<Value>,
    audio_sh: Option<Message>,
    video_sh: Option<Message>,
    audio_config: Option<AudioSpecificConfig>,
    video_sps: Option<SpsInfo>,
}

impl MetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cached `onMetaData`, injecting `server`/`server_version` and stripping
    /// any `duration` field (this is a live stream, duration is meaningless).
    pub fn set_metadata(&mut self, mut value: Value) {
        if let Value::Object(ref mut map) = value {
            map.remove("duration");
            map.insert("server".into(), Value::String(SERVER_NAME.into()));
            map.insert("server_version".into(), Value::String(SERVER_VERSION.into()));
        }
        self.metadata = Some(value);
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    /// Update the audio sequence header. Returns `true` if the payload is identical to
    /// the previously cached one (caller should set `drop_for_reduce`, spec §4.7 step 5).
    pub fn update_audio_sh(&mut self, msg: Message) -> bool {
        let identical = self
            .audio_sh
            .as_ref()
            .map(|prev| prev.payload.to_contiguous() == msg.payload.to_contiguous())
            .unwrap_or(false);

        match AudioSpecificConfig::parse(&msg.payload.to_contiguous()) {
            Ok(config) => {
                if self.audio_config != Some(config) {
                    debug!(?config, "audio sequence header changed");
                }
                self.audio_config = Some(config);
            }
            Err(e) => debug!(error = %e, "failed to parse audio sequence header"),
        }

        self.audio_sh = Some(msg);
        identical
    }

    /// Update the video sequence header (expects an AVCDecoderConfigurationRecord).
    /// Returns `true` if identical to the previously cached value.
    pub fn update_video_sh(&mut self, msg: Message) -> bool {
        let identical = self
            .video_sh
            .as_ref()
            .map(|prev| prev.payload.to_contiguous() == msg.payload.to_contiguous())
            .unwrap_or(false);

        if let Ok((sps, _pps)) = crate::codec::h264::parse_avc_decoder_config(&msg.payload.to_contiguous()) {
            if let Some(info) = parse_sps(&sps) {
                if self.video_sps.as_ref() != Some(&info) {
                    debug!(profile_idc = info.profile_idc, level_idc = info.level_idc, "video sequence header changed");
                }
                self.video_sps = Some(info);
            }
        }

        self.video_sh = Some(msg);
        identical
    }

    pub fn audio_config(&self) -> Option<AudioSpecificConfig> {
        self.audio_config
    }

    pub fn video_sps(&self) -> Option<&SpsInfo> {
        self.video_sps.as_ref()
    }

    pub fn audio_sh(&self) -> Option<&Message> {
        self.audio_sh.as_ref()
    }

    pub fn video_sh(&self) -> Option<&Message> {
        self.video_sh.as_ref()
    }

    /// Dump the cached metadata and both sequence headers into a newly attached
    /// consumer, in order, rewritten to `base_timestamp_ms` (spec §4.7 "Consumer dump").
    pub fn dump_to(&self, consumer: &mut Consumer, base_timestamp_ms: i64) {
        if let Some(meta) = &self.metadata {
            let payload = serde_json::to_vec(meta).unwrap_or_default();
            consumer.enqueue_raw(Message::metadata(base_timestamp_ms, &payload));
        }
        if let Some(audio_sh) = &self.audio_sh {
            consumer.enqueue_raw(audio_sh.with_timestamp(base_timestamp_ms));
        }
        if let Some(video_sh) = &self.video_sh {
            consumer.enqueue_raw(video_sh.with_timestamp(base_timestamp_ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter::JitterAlgorithm;

    #[test]
    fn metadata_gets_server_fields_and_loses_duration() {
        let mut cache = MetaCache::new();
        cache.set_metadata(serde_json::json!({"duration": 12.5, "width": 1920}));
        let meta = cache.metadata().unwrap();
        assert_eq!(meta["server"], "streambridge");
        assert!(meta.get("duration").is_none());
        assert_eq!(meta["width"], 1920);
    }

    #[test]
    fn identical_audio_header_is_flagged() {
        let mut cache = MetaCache::new();
        let sh = Message::sequence_header(crate::message::MessageType::Audio, 0, &[0x12, 0x10]);
        assert!(!cache.update_audio_sh(sh.clone()));
        assert!(cache.update_audio_sh(sh));
    }

    #[test]
    fn different_audio_header_is_not_flagged() {
        let mut cache = MetaCache::new();
        let sh1 = Message::sequence_header(crate::message::MessageType::Audio, 0, &[0x12, 0x10]);
        let sh2 = Message::sequence_header(crate::message::MessageType::Audio, 0, &[0x12, 0x08]);
        cache.update_audio_sh(sh1);
        assert!(!cache.update_audio_sh(sh2));
    }

    #[test]
    fn dump_to_emits_meta_then_both_headers_at_base_timestamp() {
        let mut cache = MetaCache::new();
        cache.set_metadata(serde_json::json!({"width": 640}));
        cache.update_audio_sh(Message::sequence_header(crate::message::MessageType::Audio, 1, &[0x12, 0x10]));
        cache.update_video_sh(Message::sequence_header(crate::message::MessageType::Video, 1, &[1, 2, 3]));

        let mut consumer = Consumer::new(10_000, JitterAlgorithm::Off);
        cache.dump_to(&mut consumer, 500);
        let fetched = consumer.fetch(10);
        assert_eq!(fetched.len(), 3);
        assert!(fetched.iter().all(|m| m.timestamp_ms == 500));
    }
}
