use crate::message::{Message, MessageType};
use std::collections::BTreeMap;

/// Reorders interleaved audio/video from a publisher whose two streams drift against
/// each other (spec §4.1). Disabled by default; when disabled, `push` always returns
/// its input immediately (identity pass-through).
pub struct MixQueue {
    enabled: bool,
    buffer: BTreeMap<(i64, u64), Message>,
    seq: u64,
    video_count: usize,
    audio_count: usize,
}

impl MixQueue {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            buffer: BTreeMap::new(),
            seq: 0,
            video_count: 0,
            audio_count: 0,
        }
    }

    /// Insert a message and return at most one message now eligible for release. Audio
    /// and video are evaluated the same way; metadata passes straight through.
    pub fn push(&mut self, msg: Message) -> Option<Message> {
        if !self.enabled || matches!(msg.kind, MessageType::Metadata) {
            return Some(msg);
        }

        match msg.kind {
            MessageType::Video => self.video_count += 1,
            MessageType::Audio => self.audio_count += 1,
            MessageType::Metadata => unreachable!(),
        }
        self.seq += 1;
        self.buffer.insert((msg.timestamp_ms, self.seq), msg);

        let ready = (self.video_count >= 1 && self.audio_count >= 1)
            || self.video_count >= 10
            || self.audio_count >= 10;

        if !ready {
            return None;
        }

        let key = *self.buffer.keys().next()?;
        let released = self.buffer.remove(&key)?;
        match released.kind {
            MessageType::Video => self.video_count -= 1,
            MessageType::Audio => self.audio_count -= 1,
            MessageType::Metadata => unreachable!(),
        }
        Some(released)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
