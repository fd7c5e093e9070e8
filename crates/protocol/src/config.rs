use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamBridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub jitter: JitterConfig,
    #[serde(default)]
    pub ice: IceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP signaling + FLV listener.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Default vhost assigned when a stream URL carries no host component.
    #[serde(default = "default_vhost")]
    pub default_vhost: String,
    /// Number of pinned per-source worker loops in the scheduling pool.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum wall-clock duration (ms) a consumer queue may hold before shrink (§4.3).
    #[serde(default = "default_max_queue_ms")]
    pub max_queue_ms: u64,
    /// Interval (ms) at which each consumer's queue is drained to its sink (§5).
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    /// Pure-audio packets tolerated in the gop cache before it is cleared (§4.5).
    #[serde(default = "default_gop_audio_guard")]
    pub gop_audio_guard: u32,
    /// Correct interleaved audio/video timestamps via the mix queue instead of passing
    /// them straight through (matches the original server's `mix_correct_` flag).
    #[serde(default)]
    pub mix_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterConfig {
    /// Per-consumer timestamp normalization algorithm (§4.2).
    #[serde(default)]
    pub algorithm: JitterAlgorithm,
    /// Clamp window (ms) for FULL jitter correction deltas (§4.2, I4).
    #[serde(default = "default_jitter_clamp_ms")]
    pub clamp_ms: i64,
    /// Fallback delta (ms) substituted when an input delta is clamped.
    #[serde(default = "default_jitter_fallback_ms")]
    pub fallback_ms: i64,
}

/// Mirrors `streambridge_media::jitter::JitterAlgorithm`, duplicated here so this crate
/// doesn't need a dependency on `streambridge-media` just to describe its own config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterAlgorithm {
    Off,
    Zero,
    Full,
}

impl Default for JitterAlgorithm {
    fn default() -> Self {
        JitterAlgorithm::Zero
    }
}

/// ICE/TURN configuration handed to subscriber and publisher peer connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    #[serde(default = "default_stun_urls")]
    pub stun_urls: Vec<String>,
    #[serde(default)]
    pub turn_urls: Vec<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            default_vhost: default_vhost(),
            worker_pool_size: default_worker_pool_size(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_ms: default_max_queue_ms(),
            drain_interval_ms: default_drain_interval_ms(),
            gop_audio_guard: default_gop_audio_guard(),
            mix_correct: false,
        }
    }
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            algorithm: JitterAlgorithm::default(),
            clamp_ms: default_jitter_clamp_ms(),
            fallback_ms: default_jitter_fallback_ms(),
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_urls: default_stun_urls(),
            turn_urls: Vec::new(),
            turn_username: None,
            turn_credential: None,
        }
    }
}

impl StreamBridgeConfig {
    /// Validate the configuration, returning a list of issues found.
    ///
    /// Issues are prefixed with "ERROR:" (fatal, server should not start) or
    /// "WARNING:" (advisory, server can start but the config is likely wrong).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push("ERROR: server.port must be between 1 and 65535, got 0.".to_string());
        }

        if self.server.worker_pool_size == 0 {
            issues.push("ERROR: server.worker_pool_size must be >= 1.".to_string());
        }

        if self.queue.max_queue_ms < 1000 {
            issues.push(format!(
                "WARNING: queue.max_queue_ms is {}ms — very small queues cause aggressive \
                 shrink-driven replays for slow consumers. Typical values: 10000-60000.",
                self.queue.max_queue_ms
            ));
        }

        if self.queue.drain_interval_ms == 0 {
            issues.push("ERROR: queue.drain_interval_ms must be >= 1.".to_string());
        }

        if self.queue.gop_audio_guard == 0 {
            issues.push(
                "ERROR: queue.gop_audio_guard must be >= 1 (0 would clear the gop cache on \
                 every audio packet when no video is present)."
                    .to_string(),
            );
        }

        if self.jitter.clamp_ms <= 0 {
            issues.push("ERROR: jitter.clamp_ms must be positive.".to_string());
        }

        for url in &self.ice.stun_urls {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                issues.push(format!(
                    "ERROR: STUN URL '{url}' must start with 'stun:' or 'stuns:'."
                ));
            }
        }

        for url in &self.ice.turn_urls {
            if !url.starts_with("turn:") && !url.starts_with("turns:") {
                issues.push(format!(
                    "ERROR: TURN URL '{url}' must start with 'turn:' or 'turns:'."
                ));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    1985
}
fn default_vhost() -> String {
    "__defaultVhost__".to_string()
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_max_queue_ms() -> u64 {
    30_000
}
fn default_drain_interval_ms() -> u64 {
    350
}
fn default_gop_audio_guard() -> u32 {
    115
}
fn default_jitter_clamp_ms() -> i64 {
    250
}
fn default_jitter_fallback_ms() -> i64 {
    10
}
fn default_stun_urls() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_from_empty_string() {
        let config: StreamBridgeConfig =
            toml::from_str("").expect("empty string should deserialize to default config");

        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 1985);
        assert_eq!(config.server.default_vhost, "__defaultVhost__");
        assert_eq!(config.server.worker_pool_size, 4);

        assert_eq!(config.queue.max_queue_ms, 30_000);
        assert_eq!(config.queue.drain_interval_ms, 350);
        assert_eq!(config.queue.gop_audio_guard, 115);
        assert!(!config.queue.mix_correct);

        assert_eq!(config.jitter.algorithm, JitterAlgorithm::Zero);
        assert_eq!(config.jitter.clamp_ms, 250);
        assert_eq!(config.jitter.fallback_ms, 10);

        assert_eq!(config.ice.stun_urls.len(), 2);
        assert!(config.ice.turn_urls.is_empty());
    }

    #[test]
    fn partial_config_only_queue_section() {
        let toml_str = r#"
[queue]
max_queue_ms = 5000
"#;
        let config: StreamBridgeConfig =
            toml::from_str(toml_str).expect("partial config should deserialize");
        assert_eq!(config.queue.max_queue_ms, 5000);
        assert_eq!(config.queue.drain_interval_ms, 350);
        assert_eq!(config.server.port, 1985);
    }

    #[test]
    fn validate_default_config_passes() {
        let config: StreamBridgeConfig = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_port_zero_is_error() {
        let mut config: StreamBridgeConfig = toml::from_str("").unwrap();
        config.server.port = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("ERROR:") && i.contains("port")));
    }

    #[test]
    fn validate_small_queue_is_warning_not_error() {
        let mut config: StreamBridgeConfig = toml::from_str("").unwrap();
        config.queue.max_queue_ms = 500;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("WARNING:")));
        assert!(!issues.iter().any(|i| i.starts_with("ERROR:")));
    }

    #[test]
    fn validate_stun_url_bad_prefix_is_error() {
        let mut config: StreamBridgeConfig = toml::from_str("").unwrap();
        config.ice.stun_urls = vec!["http://stun.example.com:3478".to_string()];
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("STUN URL")));
    }

    #[test]
    fn jitter_algorithm_parses_from_toml() {
        let toml_str = r#"
[jitter]
algorithm = "full"
clamp_ms = 500
"#;
        let config: StreamBridgeConfig = toml::from_str(toml_str).expect("jitter section should deserialize");
        assert_eq!(config.jitter.algorithm, JitterAlgorithm::Full);
        assert_eq!(config.jitter.clamp_ms, 500);
    }

    #[test]
    fn validate_gop_audio_guard_zero_is_error() {
        let mut config: StreamBridgeConfig = toml::from_str("").unwrap();
        config.queue.gop_audio_guard = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("gop_audio_guard")));
    }
}
