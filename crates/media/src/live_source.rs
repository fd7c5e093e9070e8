use crate::consumer::Consumer;
use crate::error::{Error, Result};
use crate::gop_cache::GopCache;
use crate::message::{Message, MessageType};
use crate::meta_cache::MetaCache;
use crate::mix_queue::MixQueue;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Active,
}

/// Publisher-facing ingest for one stream (spec §4.7). Single-threaded per instance —
/// pinned to the owning `MediaSource` task (see §5), so no internal locking.
pub struct LiveSource {
    state: State,
    mix: MixQueue,
    meta: MetaCache,
    gop: GopCache,
    consumers: HashMap<u64, Consumer>,
    next_consumer_id: u64,
    max_queue_ms: u64,
    jitter_algorithm: crate::jitter::JitterAlgorithm,
    jitter_clamp_ms: i64,
    jitter_fallback_ms: i64,
    last_audio_ts: Option<i64>,
    last_video_ts: Option<i64>,
    fired_first_packet: bool,
}

impl LiveSource {
    pub fn new(
        max_queue_ms: u64,
        gop_audio_guard: u32,
        mix_correct: bool,
        jitter_algorithm: crate::jitter::JitterAlgorithm,
        jitter_clamp_ms: i64,
        jitter_fallback_ms: i64,
    ) -> Self {
        Self {
            state: State::Idle,
            mix: MixQueue::new(mix_correct),
            meta: MetaCache::new(),
            gop: GopCache::new(gop_audio_guard),
            consumers: HashMap::new(),
            next_consumer_id: 0,
            max_queue_ms,
            jitter_algorithm,
            jitter_clamp_ms,
            jitter_fallback_ms,
            last_audio_ts: None,
            last_video_ts: None,
            fired_first_packet: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    pub fn on_publish(&mut self) -> Result<()> {
        if self.state == State::Active {
            return Err(Error::AlreadyExists("publisher already active on this source".into()));
        }
        self.state = State::Active;
        self.fired_first_packet = false;
        Ok(())
    }

    pub fn on_unpublish(&mut self) {
        self.state = State::Idle;
        self.last_audio_ts = None;
        self.last_video_ts = None;
    }

    /// Attach a new subscriber, returning its id. Dumps cached metadata + sequence
    /// headers + gop, all rewritten to the gop's start time (spec §4.7 "Consumer dump").
    pub fn add_consumer(&mut self) -> u64 {
        let id = self.next_consumer_id;
        self.next_consumer_id += 1;

        let mut consumer = Consumer::with_jitter_params(self.max_queue_ms, self.jitter_algorithm, self.jitter_clamp_ms, self.jitter_fallback_ms);
        let base_ts = self.gop.start_time().unwrap_or(0);
        self.meta.dump_to(&mut consumer, base_ts);
        self.gop.dump_to(&mut consumer);

        self.consumers.insert(id, consumer);
        id
    }

    pub fn remove_consumer(&mut self, id: u64) {
        self.consumers.remove(&id);
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn fetch(&mut self, id: u64, max: usize) -> Vec<Message> {
        self.consumers.get_mut(&id).map(|c| c.fetch(max)).unwrap_or_default()
    }

    pub fn set_metadata(&mut self, value: serde_json::Value) {
        self.meta.set_metadata(value);
    }

    pub fn meta_cache(&self) -> &MetaCache {
        &self.meta
    }

    /// Feed one audio or video message through the ingest pipeline (spec §4.7, steps
    /// 1-7). Returns `Ok(true)` if this was the stream's first accepted packet.
    pub fn on_media(&mut self, msg: Message, is_h264: bool) -> Result<bool> {
        if self.state != State::Active {
            return Ok(false);
        }

        let first_packet = !self.fired_first_packet;
        if first_packet {
            self.fired_first_packet = true;
            info!("first packet accepted on active source");
        }

        self.check_monotonicity(&msg);

        let Some(released) = self.mix.push(msg) else {
            return Ok(first_packet);
        };

        let mut drop_for_reduce = false;
        if released.is_sequence_header {
            drop_for_reduce = match released.kind {
                MessageType::Audio => self.meta.update_audio_sh(released.clone()),
                MessageType::Video => self.meta.update_video_sh(released.clone()),
                MessageType::Metadata => false,
            };
        }

        if !drop_for_reduce {
            for consumer in self.consumers.values_mut() {
                consumer.enqueue(&released);
            }
        }

        if !released.is_sequence_header {
            self.gop.offer(&released, is_h264);
        }

        Ok(first_packet)
    }

    fn check_monotonicity(&mut self, msg: &Message) {
        let last = match msg.kind {
            MessageType::Audio => &mut self.last_audio_ts,
            MessageType::Video => &mut self.last_video_ts,
            MessageType::Metadata => return,
        };
        if let Some(prev) = *last {
            if msg.timestamp_ms < prev {
                warn!(kind = ?msg.kind, prev, current = msg.timestamp_ms, "timestamp regression on ingest");
            }
        }
        *last = Some(msg.timestamp_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter::JitterAlgorithm;

    fn source() -> LiveSource {
        LiveSource::new(10_000, 115, false, JitterAlgorithm::Off, 250, 10)
    }

    #[test]
    fn media_dropped_while_idle() {
        let mut src = source();
        let first = src.on_media(Message::video(0, &b"v"[..], true), true).unwrap();
        assert!(!first);
    }

    #[test]
    fn double_publish_is_rejected() {
        let mut src = source();
        src.on_publish().unwrap();
        assert!(src.on_publish().is_err());
    }

    #[test]
    fn first_packet_fires_once() {
        let mut src = source();
        src.on_publish().unwrap();
        assert!(src.on_media(Message::video(0, &b"v"[..], true), true).unwrap());
        assert!(!src.on_media(Message::video(10, &b"v"[..], false), true).unwrap());
    }

    #[test]
    fn late_joiner_receives_cached_gop() {
        let mut src = source();
        src.on_publish().unwrap();
        src.on_media(Message::video(0, &b"kf"[..], true), true).unwrap();
        src.on_media(Message::video(40, &b"p"[..], false), true).unwrap();

        let consumer_id = src.add_consumer();
        let fetched = src.fetch(consumer_id, 10);
        assert_eq!(fetched.len(), 2);
    }

    #[test]
    fn duplicate_sequence_header_is_not_fanned_out() {
        let mut src = source();
        src.on_publish().unwrap();
        let consumer_id = src.add_consumer();

        let sh = Message::sequence_header(MessageType::Audio, 0, &[0x12, 0x10][..]);
        src.on_media(sh.clone(), true).unwrap();
        src.on_media(sh, true).unwrap();

        let fetched = src.fetch(consumer_id, 10);
        assert_eq!(fetched.len(), 1);
    }

    #[test]
    fn unpublish_returns_source_to_idle() {
        let mut src = source();
        src.on_publish().unwrap();
        src.on_unpublish();
        assert!(!src.is_active());
        src.on_publish().unwrap();
    }
}
