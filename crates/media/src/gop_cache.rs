use crate::consumer::Consumer;
use crate::message::{Message, MessageType};

/// Caches the most recent GOP (keyframe onward) for fast-start of late joiners
/// (spec §4.5).
pub struct GopCache {
    items: Vec<Message>,
    cached_video_count: usize,
    audio_after_last_video: u32,
    audio_guard: u32,
}

impl GopCache {
    pub fn new(audio_guard: u32) -> Self {
        Self {
            items: Vec::new(),
            cached_video_count: 0,
            audio_after_last_video: 0,
            audio_guard,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn start_time(&self) -> Option<i64> {
        self.items.first().map(|m| m.timestamp_ms)
    }

    /// Offer a message to the cache. `is_h264` gates non-H.264 video out entirely, per
    /// spec (the gop cache is a H.264-specific fast-start mechanism).
    pub fn offer(&mut self, msg: &Message, is_h264: bool) {
        match msg.kind {
            MessageType::Video => {
                if !is_h264 {
                    return;
                }
                if msg.is_keyframe {
                    self.items.clear();
                    self.items.push(msg.clone());
                    self.cached_video_count = 1;
                    self.audio_after_last_video = 0;
                } else if self.cached_video_count > 0 {
                    self.items.push(msg.clone());
                }
            }
            MessageType::Audio => {
                if self.cached_video_count == 0 {
                    return;
                }
                self.items.push(msg.clone());
                self.audio_after_last_video += 1;
                if self.audio_after_last_video > self.audio_guard {
                    self.items.clear();
                    self.cached_video_count = 0;
                    self.audio_after_last_video = 0;
                }
            }
            MessageType::Metadata => {}
        }
    }

    /// Dump the cached GOP into a consumer's queue, in order, through its jitter.
    pub fn dump_to(&self, consumer: &mut Consumer) {
        for msg in &self.items {
            consumer.enqueue(msg);
        }
    }
}
