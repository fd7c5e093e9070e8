use serde::{Deserialize, Serialize};

/// `POST /rtc/v1/publish` and `POST /rtc/v1/play` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcOfferRequest {
    /// `webrtc://host/app/stream`.
    pub streamurl: String,
    /// SDP offer, `\r\n`-separated (accepted literally as `\\r\\n` over JSON).
    pub sdp: String,
    #[serde(default)]
    pub clientip: Option<String>,
}

/// `POST /rtc/v1/unpublish` and `POST /rtc/v1/unplay` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcByeRequest {
    pub streamurl: String,
    pub sessionid: String,
}

/// Response to a successful publish/play request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcOfferResponse {
    pub code: i32,
    pub server: String,
    pub sdp: String,
    pub sessionid: String,
}

/// Response to a failed signaling request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcErrorResponse {
    pub code: i32,
    pub msg: String,
}

impl RtcErrorResponse {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        Self { code, msg: msg.into() }
    }
}

/// ICE server descriptor returned to clients for WebRTC setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerInfo {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_request_roundtrip() {
        let req = RtcOfferRequest {
            streamurl: "webrtc://localhost/live/s0".to_string(),
            sdp: "v=0\r\n...".to_string(),
            clientip: Some("127.0.0.1".to_string()),
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: RtcOfferRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.streamurl, req.streamurl);
        assert_eq!(parsed.sdp, req.sdp);
    }

    #[test]
    fn offer_response_field_shape() {
        let resp = RtcOfferResponse {
            code: 0,
            server: "streambridge".to_string(),
            sdp: "v=0\r\nanswer".to_string(),
            sessionid: "abcd1234".to_string(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""code":0"#));
        assert!(json.contains(r#""sessionid":"abcd1234""#));
    }

    #[test]
    fn clientip_defaults_when_absent() {
        let json = r#"{"streamurl":"webrtc://h/a/s","sdp":"v=0"}"#;
        let req: RtcOfferRequest = serde_json::from_str(json).unwrap();
        assert!(req.clientip.is_none());
    }

    #[test]
    fn ice_server_info_omits_credentials_when_absent() {
        let info = IceServerInfo {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("username"));
        assert!(!json.contains("credential"));
    }
}
