use crate::codec::transcode::AudioTranscoder;
use crate::live_source::LiveSource;
use crate::media_source::MediaSource;
use crate::stats::StatsRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use streambridge_protocol::StreamId;
use tokio::sync::RwLock;

/// A `MediaSource` whose audio transcoder legs are type-erased, since the registry
/// holds sources for many streams behind one map and can't name a single concrete
/// `T: AudioTranscoder` for all of them.
pub type DynMediaSource = MediaSource<Box<dyn AudioTranscoder>>;

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub max_queue_ms: u64,
    pub gop_audio_guard: u32,
    pub mix_correct: bool,
    pub jitter_algorithm: crate::jitter::JitterAlgorithm,
    pub jitter_clamp_ms: i64,
    pub jitter_fallback_ms: i64,
}

/// Process-wide map from stream identity to its `MediaSource`, analogous to the
/// teacher's `SessionManager`: one `RwLock<HashMap<..>>` guarding creation/removal,
/// with per-entry concurrency handled inside each `MediaSource` itself. Tokio's own
/// multi-threaded scheduler stands in for the abstract model's explicit worker-pool
/// assignment (see spec §5 and DESIGN.md).
pub struct StreamRegistry {
    sources: RwLock<HashMap<StreamId, Arc<DynMediaSource>>>,
    settings: QueueSettings,
    stats: Arc<StatsRegistry>,
}

impl StreamRegistry {
    pub fn new(settings: QueueSettings, stats: Arc<StatsRegistry>) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            settings,
            stats,
        }
    }

    pub async fn get(&self, id: &StreamId) -> Option<Arc<DynMediaSource>> {
        self.sources.read().await.get(id).cloned()
    }

    /// Fetch the source for `id`, creating it if absent.
    pub async fn get_or_create(&self, id: &StreamId) -> Arc<DynMediaSource> {
        if let Some(existing) = self.get(id).await {
            return existing;
        }
        let mut map = self.sources.write().await;
        let stats = &self.stats;
        let settings = &self.settings;
        map.entry(id.clone())
            .or_insert_with(|| {
                let live = LiveSource::new(
                    settings.max_queue_ms,
                    settings.gop_audio_guard,
                    settings.mix_correct,
                    settings.jitter_algorithm,
                    settings.jitter_clamp_ms,
                    settings.jitter_fallback_ms,
                );
                let stream_stats = stats.get_or_create(&id.to_string());
                Arc::new(MediaSource::new(live, stream_stats))
            })
            .clone()
    }

    /// Remove `id` if its `MediaSource` reports no reason to keep running (spec §4.12
    /// shutdown condition). Returns `true` if it was removed.
    pub async fn reap_if_idle(&self, id: &StreamId) -> bool {
        let Some(source) = self.get(id).await else {
            return false;
        };
        if !source.should_shut_down().await {
            return false;
        }
        let mut map = self.sources.write().await;
        // Re-check under the write lock: a publisher may have joined between the read
        // above and acquiring this lock.
        if let Some(source) = map.get(id) {
            if source.should_shut_down().await {
                map.remove(id);
                self.stats.remove(&id.to_string());
                return true;
            }
        }
        false
    }

    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }

    pub async fn stream_ids(&self) -> Vec<StreamId> {
        self.sources.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter::JitterAlgorithm;

    fn registry() -> StreamRegistry {
        StreamRegistry::new(settings(), Arc::new(crate::stats::StatsRegistry::new()))
    }

    fn settings() -> QueueSettings {
        QueueSettings {
            max_queue_ms: 30_000,
            gop_audio_guard: 115,
            mix_correct: false,
            jitter_algorithm: JitterAlgorithm::Off,
            jitter_clamp_ms: 250,
            jitter_fallback_ms: 10,
        }
    }

    #[tokio::test]
    async fn get_or_create_reuses_existing_source() {
        let registry = registry();
        let id = StreamId::new("__defaultVhost__", "live", "stream1");
        let a = registry.get_or_create(&id).await;
        let b = registry.get_or_create(&id).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn reap_if_idle_removes_sources_with_no_activity() {
        let registry = registry();
        let id = StreamId::new("__defaultVhost__", "live", "stream1");
        registry.get_or_create(&id).await;
        assert!(registry.reap_if_idle(&id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn reap_if_idle_keeps_sources_with_a_publisher() {
        let registry = registry();
        let id = StreamId::new("__defaultVhost__", "live", "stream1");
        let source = registry.get_or_create(&id).await;
        source.on_publisher_joined(crate::rtc_agent::PublisherType::LocalRtmp).await.unwrap();
        assert!(!registry.reap_if_idle(&id).await);
        assert_eq!(registry.len().await, 1);
    }
}
