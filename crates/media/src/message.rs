use bytes::{Bytes, BytesMut};
use std::sync::Arc;

/// The three categories of payload a `Message` can carry (see spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Audio,
    Video,
    Metadata,
}

/// A reference-counted, segmented byte chain.
///
/// Mirrors the teacher's `VideoFrameHeader::serialize_with_payload` style of keeping a
/// small header distinct from payload bytes, generalized here into a chain of `Bytes`
/// segments so that prepending a chunk header (RTMP) or an AVCC/Annex-B NAL header is an
/// O(1) push onto the segment list rather than a payload copy. Cloning a `MessageChain`
/// is cheap: every segment is an `Arc`-backed `Bytes`, so clones share the underlying
/// allocation.
#[derive(Debug, Clone, Default)]
pub struct MessageChain {
    segments: Vec<Bytes>,
}

impl MessageChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            segments: vec![bytes.into()],
        }
    }

    /// Append a segment to the tail (new payload data).
    pub fn push_back(&mut self, bytes: impl Into<Bytes>) {
        self.segments.push(bytes.into());
    }

    /// Prepend a segment to the head in O(1) — used for chunk headers, AVCC length
    /// prefixes, and Annex-B start codes.
    pub fn push_front(&mut self, bytes: impl Into<Bytes>) {
        self.segments.insert(0, bytes.into());
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into one contiguous buffer. Cheap (no copy) when there is exactly one
    /// segment; otherwise copies once.
    pub fn to_contiguous(&self) -> Bytes {
        if self.segments.len() == 1 {
            return self.segments[0].clone();
        }
        let mut out = BytesMut::with_capacity(self.len());
        for seg in &self.segments {
            out.extend_from_slice(seg);
        }
        out.freeze()
    }

    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }
}

/// An opaque audio/video/metadata unit flowing through the pipeline.
///
/// `timestamp_ms` is the publisher's (not necessarily monotonic) media clock in
/// milliseconds; jitter correction (§4.2) rewrites it per consumer. `payload` is cheap
/// to clone via `Arc`-backed `Bytes` segments so fan-out to many consumers does not copy
/// media bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageType,
    pub timestamp_ms: i64,
    pub stream_id: u32,
    pub payload: Arc<MessageChain>,
    /// True for a video keyframe or an AAC/H.264 sequence header — never true for audio
    /// non-header packets.
    pub is_keyframe: bool,
    /// True for AAC AudioSpecificConfig / H.264 AVCDecoderConfigurationRecord packets.
    pub is_sequence_header: bool,
}

impl Message {
    pub fn audio(timestamp_ms: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Audio,
            timestamp_ms,
            stream_id: 0,
            payload: Arc::new(MessageChain::from_bytes(payload)),
            is_keyframe: false,
            is_sequence_header: false,
        }
    }

    pub fn video(timestamp_ms: i64, payload: impl Into<Bytes>, is_keyframe: bool) -> Self {
        Self {
            kind: MessageType::Video,
            timestamp_ms,
            stream_id: 0,
            payload: Arc::new(MessageChain::from_bytes(payload)),
            is_keyframe,
            is_sequence_header: false,
        }
    }

    pub fn sequence_header(kind: MessageType, timestamp_ms: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            timestamp_ms,
            stream_id: 0,
            payload: Arc::new(MessageChain::from_bytes(payload)),
            is_keyframe: matches!(kind, MessageType::Video),
            is_sequence_header: true,
        }
    }

    pub fn metadata(timestamp_ms: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageType::Metadata,
            timestamp_ms,
            stream_id: 0,
            payload: Arc::new(MessageChain::from_bytes(payload)),
            is_keyframe: false,
            is_sequence_header: false,
        }
    }

    /// Cheap copy with a rewritten timestamp (used when rewriting sequence-header
    /// timestamps during shrink or consumer attach, spec I5).
    pub fn with_timestamp(&self, timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            ..self.clone()
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, MessageType::Audio)
    }

    pub fn is_video(&self) -> bool {
        matches!(self.kind, MessageType::Video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_prepend_is_order_preserving() {
        let mut chain = MessageChain::from_bytes(&b"payload"[..]);
        chain.push_front(&b"header:"[..]);
        assert_eq!(chain.to_contiguous(), Bytes::from_static(b"header:payload"));
    }

    #[test]
    fn chain_len_sums_segments() {
        let mut chain = MessageChain::new();
        chain.push_back(&b"abc"[..]);
        chain.push_back(&b"de"[..]);
        assert_eq!(chain.len(), 5);
    }

    #[test]
    fn cloning_message_does_not_copy_payload_allocation() {
        let msg = Message::video(0, vec![0u8; 4096], true);
        let cloned = msg.clone();
        assert_eq!(Arc::strong_count(&msg.payload), 2);
        assert_eq!(cloned.payload.len(), 4096);
    }

    #[test]
    fn with_timestamp_preserves_payload_sharing() {
        let msg = Message::audio(10, &b"x"[..]);
        let rewritten = msg.with_timestamp(500);
        assert_eq!(rewritten.timestamp_ms, 500);
        assert!(Arc::ptr_eq(&msg.payload, &rewritten.payload));
    }

    #[test]
    fn sequence_header_flags_video_as_keyframe() {
        let sh = Message::sequence_header(MessageType::Video, 0, &b"avcc"[..]);
        assert!(sh.is_sequence_header);
        assert!(sh.is_keyframe);

        let ash = Message::sequence_header(MessageType::Audio, 0, &b"asc"[..]);
        assert!(ash.is_sequence_header);
        assert!(!ash.is_keyframe);
    }
}
