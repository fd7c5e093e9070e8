use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a media stream: `vhost/app/stream`.
///
/// This is the external key used by both the RTMP and WebRTC ingress paths to
/// look up (or create) the same `MediaSource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub vhost: String,
    pub app: String,
    pub stream: String,
}

impl StreamId {
    pub fn new(vhost: impl Into<String>, app: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            vhost: vhost.into(),
            app: app.into(),
            stream: stream.into(),
        }
    }

    /// Parse a `webrtc://host/app/stream` or `rtmp://host/app/stream` URL, or a bare
    /// `app/stream` path, into a `StreamId`. The default vhost is `__defaultVhost__`.
    pub fn parse(url: &str) -> Result<Self, StreamIdError> {
        let without_scheme = url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url);

        let mut parts = without_scheme.splitn(2, '/');
        let host = parts.next().filter(|s| !s.is_empty());
        let rest = parts.next().ok_or_else(|| StreamIdError::Malformed(url.to_string()))?;

        let mut segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let stream = segments.pop().ok_or_else(|| StreamIdError::Malformed(url.to_string()))?;
        if segments.is_empty() {
            return Err(StreamIdError::Malformed(url.to_string()));
        }
        let app = segments.join("/");

        let stream = stream.split(['?', '.']).next().unwrap_or(stream);

        Ok(Self {
            vhost: host.unwrap_or("__defaultVhost__").to_string(),
            app,
            stream: stream.to_string(),
        })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.vhost, self.app, self.stream)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamIdError {
    #[error("malformed stream url: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_webrtc_url() {
        let id = StreamId::parse("webrtc://localhost/live/stream0").unwrap();
        assert_eq!(id.vhost, "localhost");
        assert_eq!(id.app, "live");
        assert_eq!(id.stream, "stream0");
    }

    #[test]
    fn parses_rtmp_url_with_default_vhost() {
        let id = StreamId::parse("rtmp:///live/stream0").unwrap();
        assert_eq!(id.vhost, "__defaultVhost__");
        assert_eq!(id.app, "live");
        assert_eq!(id.stream, "stream0");
    }

    #[test]
    fn strips_flv_extension_and_query() {
        let id = StreamId::parse("http://h/live/stream0.flv?token=abc").unwrap();
        assert_eq!(id.stream, "stream0");
    }

    #[test]
    fn nested_app_path() {
        let id = StreamId::parse("webrtc://h/a/b/stream0").unwrap();
        assert_eq!(id.app, "a/b");
        assert_eq!(id.stream, "stream0");
    }

    #[test]
    fn rejects_missing_stream() {
        assert!(StreamId::parse("webrtc://h/live").is_err());
    }

    #[test]
    fn display_roundtrip_shape() {
        let id = StreamId::new("v", "app", "s");
        assert_eq!(id.to_string(), "v/app/s");
    }
}
