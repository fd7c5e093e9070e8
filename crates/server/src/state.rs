use std::sync::Arc;
use std::time::Instant;

use streambridge_media::jitter::JitterAlgorithm;
use streambridge_media::registry::{QueueSettings, StreamRegistry};
use streambridge_media::stats::StatsRegistry;
use streambridge_protocol::StreamBridgeConfig;

use crate::webrtc_agent::WebrtcRsAgent;

fn map_jitter_algorithm(algorithm: streambridge_protocol::config::JitterAlgorithm) -> JitterAlgorithm {
    match algorithm {
        streambridge_protocol::config::JitterAlgorithm::Off => JitterAlgorithm::Off,
        streambridge_protocol::config::JitterAlgorithm::Zero => JitterAlgorithm::Zero,
        streambridge_protocol::config::JitterAlgorithm::Full => JitterAlgorithm::Full,
    }
}

/// Shared application state handed to every HTTP handler, mirroring the teacher's
/// `AppState` (`crates/server/src/web.rs`): one struct, cheaply `Clone`-able via `Arc`
/// fields, constructed once in `main` and passed into `build_router`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StreamBridgeConfig>,
    pub registry: Arc<StreamRegistry>,
    pub stats: Arc<StatsRegistry>,
    pub rtc_agent: Arc<WebrtcRsAgent>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: StreamBridgeConfig) -> Self {
        let settings = QueueSettings {
            max_queue_ms: config.queue.max_queue_ms,
            gop_audio_guard: config.queue.gop_audio_guard,
            mix_correct: config.queue.mix_correct,
            jitter_algorithm: map_jitter_algorithm(config.jitter.algorithm),
            jitter_clamp_ms: config.jitter.clamp_ms,
            jitter_fallback_ms: config.jitter.fallback_ms,
        };
        let rtc_agent = WebrtcRsAgent::new(config.ice.clone());
        let stats = Arc::new(StatsRegistry::new());
        Self {
            config: Arc::new(config),
            registry: Arc::new(StreamRegistry::new(settings, stats.clone())),
            stats,
            rtc_agent: Arc::new(rtc_agent),
            started_at: Instant::now(),
        }
    }
}
