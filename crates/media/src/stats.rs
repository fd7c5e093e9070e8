use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-stream counters updated from the hot ingest/fan-out path. Plain atomics, bumped
/// only by the owning `MediaSource` (spec §4.6/§5 "Statistics").
#[derive(Default)]
pub struct StreamStats {
    pub audio_messages: AtomicU64,
    pub video_messages: AtomicU64,
    pub dropped_for_reduce: AtomicU64,
    pub queue_shrinks: AtomicU64,
    pub subscriber_count: AtomicU64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_audio(&self) {
        self.audio_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_video(&self) {
        self.video_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_for_reduce(&self) {
        self.dropped_for_reduce.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shrink(&self) {
        self.queue_shrinks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_subscriber_count(&self, count: usize) {
        self.subscriber_count.store(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            audio_messages: self.audio_messages.load(Ordering::Relaxed),
            video_messages: self.video_messages.load(Ordering::Relaxed),
            dropped_for_reduce: self.dropped_for_reduce.load(Ordering::Relaxed),
            queue_shrinks: self.queue_shrinks.load(Ordering::Relaxed),
            subscriber_count: self.subscriber_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub audio_messages: u64,
    pub video_messages: u64,
    pub dropped_for_reduce: u64,
    pub queue_shrinks: u64,
    pub subscriber_count: u64,
}

/// Process-wide registry of per-stream stats, keyed by the stream's display name
/// (`"{vhost}/{app}/{stream}"`). Read by the server crate's Prometheus `/metrics`
/// endpoint.
#[derive(Default)]
pub struct StatsRegistry {
    streams: Mutex<HashMap<String, std::sync::Arc<StreamStats>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, stream_key: &str) -> std::sync::Arc<StreamStats> {
        let mut streams = self.streams.lock();
        streams.entry(stream_key.to_string()).or_insert_with(|| std::sync::Arc::new(StreamStats::new())).clone()
    }

    pub fn remove(&self, stream_key: &str) {
        self.streams.lock().remove(stream_key);
    }

    pub fn snapshot_all(&self) -> HashMap<String, StatsSnapshot> {
        self.streams.lock().iter().map(|(k, v)| (k.clone(), v.snapshot())).collect()
    }
}
