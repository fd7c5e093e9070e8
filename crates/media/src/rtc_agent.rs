use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Disambiguates adapter activation in `MediaSource` (spec §4.12, §6.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublisherType {
    LocalRtc,
    LocalRtmp,
    RemoteRtc,
    RemoteRtmp,
}

impl PublisherType {
    pub fn is_rtc(self) -> bool {
        matches!(self, PublisherType::LocalRtc | PublisherType::RemoteRtc)
    }

    pub fn is_rtmp(self) -> bool {
        matches!(self, PublisherType::LocalRtmp | PublisherType::RemoteRtmp)
    }
}

/// Media codec carried by a `Frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    H264,
    Opus,
}

/// One encoded audio or video access unit crossing the RTC boundary (spec §6.3).
#[derive(Debug, Clone)]
pub struct Frame {
    pub format: FrameFormat,
    pub payload: Bytes,
    /// 90kHz clock for video, 48kHz for audio.
    pub timestamp: u64,
    pub is_keyframe: bool,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

impl Frame {
    pub fn video(payload: impl Into<Bytes>, timestamp: u64, is_keyframe: bool) -> Self {
        Self {
            format: FrameFormat::H264,
            payload: payload.into(),
            timestamp,
            is_keyframe,
            sample_rate: None,
            channels: None,
        }
    }

    pub fn audio(payload: impl Into<Bytes>, timestamp: u64, sample_rate: u32, channels: u16) -> Self {
        Self {
            format: FrameFormat::Opus,
            payload: payload.into(),
            timestamp,
            is_keyframe: false,
            sample_rate: Some(sample_rate),
            channels: Some(channels),
        }
    }
}

/// Role a peer connection plays, fixed at `CreatePeer` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    Publisher,
    Subscriber,
}

/// Events an `RtcAgent` implementation delivers asynchronously to the owning attendee.
/// Delivered by re-entering the owning `MediaSource` task's inbox (spec §5), never by a
/// direct callback from agent internals.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Answer(String),
    Ready,
    Failed(String),
    Candidate(String),
    Frame(Frame),
}

/// Abstract contract the core depends on to talk to a concrete WebRTC transport (spec
/// §6.3). This repo's implementation (`webrtc_agent::WebrtcRsAgent`, in the server
/// crate) backs this trait with the `webrtc` crate.
#[async_trait]
pub trait RtcAgent: Send + Sync {
    /// Create a peer connection for `offer_sdp`, registering the given track kinds
    /// (`"audio"`, `"video"`). `events_tx` is this peer's half of the channel the
    /// owning `RtcAttendee` polls via `poll_event`; the implementation clones it into
    /// whatever async callbacks the underlying transport needs (connection-state
    /// changes, incoming RTP) to deliver `PeerEvent`s back.
    async fn create_peer(&self, peer_id: &str, role: PeerRole, tracks: &[&str], offer_sdp: &str, events_tx: mpsc::Sender<PeerEvent>) -> Result<()>;

    async fn destroy_peer(&self, peer_id: &str) -> Result<()>;

    /// Start relaying frames from `publisher_id` to `subscriber_id`.
    async fn subscribe(&self, publisher_id: &str, subscriber_id: &str) -> Result<()>;

    async fn unsubscribe(&self, publisher_id: &str, subscriber_id: &str) -> Result<()>;

    /// Push a frame produced by `live_to_rtc` out to a publisher's dummy track, or
    /// accept one captured from a real publisher peer. Implementations route this to
    /// the right `TrackLocalStaticSample`/RTP writer internally.
    async fn send_frame(&self, peer_id: &str, frame: Frame) -> Result<()>;
}
