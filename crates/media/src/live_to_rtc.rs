use crate::codec::aac::{wrap_adts, AudioSpecificConfig};
use crate::codec::h264::{extract_nals, is_b_slice, NAL_TYPE_PPS, NAL_TYPE_SLICE_NON_IDR, NAL_TYPE_SPS};
use crate::codec::transcode::AudioTranscoder;
use crate::error::Result;
use crate::meta_cache::MetaCache;
use crate::message::{Message, MessageType};
use crate::rtc_agent::Frame;
use tracing::debug;

/// Drains a `LiveSource` consumer and re-encodes each message into the representation
/// the RTC side expects (spec §4.8): AAC → ADTS → transcoder → Opus, and H.264
/// AVCC → Annex-B with SPS/PPS prepended on keyframes.
pub struct LiveToRtc<T: AudioTranscoder> {
    audio_transcoder: T,
    cached_sps: Option<Vec<u8>>,
    cached_pps: Option<Vec<u8>>,
}

impl<T: AudioTranscoder> LiveToRtc<T> {
    pub fn new(audio_transcoder: T) -> Self {
        Self {
            audio_transcoder,
            cached_sps: None,
            cached_pps: None,
        }
    }

    /// Process one audio message, producing zero or more Opus `Frame`s.
    pub fn process_audio(&mut self, msg: &Message, audio_config: AudioSpecificConfig) -> Result<Vec<Frame>> {
        debug_assert_eq!(msg.kind, MessageType::Audio);
        let raw_aac = msg.payload.to_contiguous();
        let adts = wrap_adts(&raw_aac, &audio_config);
        let opus = self.audio_transcoder.transcode(&adts)?;
        let sample_rate = audio_config.sample_rate().unwrap_or(48000);
        Ok(vec![Frame::audio(opus, (msg.timestamp_ms as u64) * 48, sample_rate.max(48000), 2)])
    }

    /// Process one video message. On a keyframe, prepends the cached SPS/PPS (from the
    /// most recent video sequence header) ahead of the sample NALs.
    pub fn process_video(&mut self, msg: &Message, meta: &MetaCache) -> Result<Option<Frame>> {
        debug_assert_eq!(msg.kind, MessageType::Video);

        if let Some(video_sh) = meta.video_sh() {
            if let Ok((sps, pps)) = crate::codec::h264::parse_avc_decoder_config(&video_sh.payload.to_contiguous()) {
                self.cached_sps = Some(sps);
                self.cached_pps = Some(pps);
            }
        }

        let avcc = msg.payload.to_contiguous();
        let samples = split_avcc_filtering_b_frames(&avcc);
        if samples.is_empty() {
            return Ok(None);
        }

        let has_idr = samples.iter().any(|n| !n.is_empty() && n[0] & 0x1f == crate::codec::h264::NAL_TYPE_IDR);

        let mut payload = Vec::new();
        if has_idr {
            if let (Some(sps), Some(pps)) = (&self.cached_sps, &self.cached_pps) {
                payload.extend_from_slice(&[0, 0, 0, 1]);
                payload.extend_from_slice(sps);
                payload.extend_from_slice(&[0, 0, 0, 1]);
                payload.extend_from_slice(pps);
            } else {
                debug!("keyframe with no cached SPS/PPS, emitting without them");
            }
        }
        for nal in &samples {
            payload.extend_from_slice(&[0, 0, 0, 1]);
            payload.extend_from_slice(nal);
        }

        Ok(Some(Frame::video(payload, (msg.timestamp_ms as u64) * 90, has_idr)))
    }
}

/// Split AVCC into NAL samples, dropping SPS/PPS and B-frame slices. RTC playback here
/// has no picture reorder buffer, so a forwarded B-slice (which references a future
/// picture) would decode as corruption; B-slices are identified by parsing
/// `first_mb_in_slice`/`slice_type` out of the slice header, same as the live adaptor
/// this bridges from.
fn split_avcc_filtering_b_frames(avcc: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + 4 <= avcc.len() {
        let len = u32::from_be_bytes([avcc[pos], avcc[pos + 1], avcc[pos + 2], avcc[pos + 3]]) as usize;
        pos += 4;
        let Some(nal) = avcc.get(pos..pos + len) else { break };
        pos += len;
        if nal.is_empty() {
            continue;
        }
        let nal_type = nal[0] & 0x1f;
        if nal_type == NAL_TYPE_SPS || nal_type == NAL_TYPE_PPS {
            continue;
        }
        if nal_type == NAL_TYPE_SLICE_NON_IDR && is_b_slice(nal) {
            continue;
        }
        out.push(nal.to_vec());
    }
    out
}

/// Helper used by the AVCC builder in `rtc_to_live`: re-expose Annex-B extraction here
/// too so both adapters share one NAL-splitting implementation.
pub fn annexb_nal_types(data: &[u8]) -> Vec<u8> {
    extract_nals(data).into_iter().map(|(t, _)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::nals_to_avcc;
    use crate::error::Error;

    struct PassthroughTranscoder;
    impl AudioTranscoder for PassthroughTranscoder {
        fn transcode(&mut self, input: &[u8]) -> Result<Vec<u8>> {
            if input.is_empty() {
                return Err(Error::TranscodeFailure("empty input".into()));
            }
            Ok(input.to_vec())
        }
    }

    #[test]
    fn process_audio_wraps_adts_and_rebases_timestamp() {
        let mut adapter = LiveToRtc::new(PassthroughTranscoder);
        let config = AudioSpecificConfig {
            profile: crate::codec::aac::AacProfile::LowComplexity,
            sampling_frequency_index: 3, // 48000
            channel_configuration: 2,
        };
        let msg = Message::audio(100, &b"rawaac"[..]);
        let frames = adapter.process_audio(&msg, config).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp, 4800);
    }

    #[test]
    fn process_video_prepends_sps_pps_on_keyframe() {
        let mut adapter = LiveToRtc::new(PassthroughTranscoder);
        let mut meta = MetaCache::new();
        let sps: &[u8] = &[0x67, 0x42, 0xC0, 0x1F];
        let pps: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
        let config = crate::codec::h264::build_avc_decoder_config(sps, pps);
        meta.update_video_sh(Message::sequence_header(MessageType::Video, 0, config));

        let idr: &[u8] = &[0x65, 0xAA];
        let avcc = nals_to_avcc([idr]);
        let frame = adapter.process_video(&Message::video(0, avcc, true), &meta).unwrap().unwrap();
        assert!(frame.is_keyframe);

        let nal_types = annexb_nal_types(&frame.payload);
        assert_eq!(nal_types, vec![7, 8, 5]);
    }

    #[test]
    fn process_video_skips_parameter_sets_for_inter_frames() {
        let mut adapter = LiveToRtc::new(PassthroughTranscoder);
        let meta = MetaCache::new();
        let p_frame: &[u8] = &[0x41, 0xBB];
        let avcc = nals_to_avcc([p_frame]);
        let frame = adapter.process_video(&Message::video(40, avcc, false), &meta).unwrap().unwrap();
        assert!(!frame.is_keyframe);
        assert_eq!(annexb_nal_types(&frame.payload), vec![1]);
    }

    #[test]
    fn process_video_drops_b_slices() {
        let mut adapter = LiveToRtc::new(PassthroughTranscoder);
        let meta = MetaCache::new();
        // nal_type=1, slice header decodes first_mb_in_slice=0, slice_type=1 (B).
        let b_frame: &[u8] = &[0x21, 0xA0];
        let avcc = nals_to_avcc([b_frame]);
        let frame = adapter.process_video(&Message::video(80, avcc, false), &meta).unwrap();
        assert!(frame.is_none(), "a frame made entirely of B-slices should be dropped, not forwarded empty-ish");
    }

    #[test]
    fn process_video_keeps_non_b_slices_alongside_dropped_b_slices() {
        let mut adapter = LiveToRtc::new(PassthroughTranscoder);
        let meta = MetaCache::new();
        let b_frame: &[u8] = &[0x21, 0xA0];
        let p_frame: &[u8] = &[0x41, 0xBB];
        let avcc = nals_to_avcc([b_frame, p_frame]);
        let frame = adapter.process_video(&Message::video(80, avcc, false), &meta).unwrap().unwrap();
        assert_eq!(annexb_nal_types(&frame.payload), vec![1]);
    }
}
