use crate::codec::aac::{unwrap_adts, AudioSpecificConfig};
use crate::codec::h264::{build_avc_decoder_config, extract_nals, nals_to_avcc, NAL_TYPE_IDR, NAL_TYPE_PPS, NAL_TYPE_SPS};
use crate::codec::transcode::AudioTranscoder;
use crate::error::Result;
use crate::message::{Message, MessageType};
use crate::rtc_agent::Frame;

/// Inverse of `LiveToRtc` (spec §4.9): turns `Frame`s captured from a publisher
/// attendee back into RTMP-shaped `Message`s (AVCC video, raw-AAC audio plus
/// sequence headers), rebasing both streams' timestamps to their first observed frame.
pub struct RtcToLive<T: AudioTranscoder> {
    audio_transcoder: T,
    audio_sh_sent: bool,
    target_sample_rate: u32,
    first_video_ts: Option<u64>,
    first_audio_ts: Option<u64>,
}

impl<T: AudioTranscoder> RtcToLive<T> {
    pub fn new(audio_transcoder: T, target_sample_rate: u32) -> Self {
        Self {
            audio_transcoder,
            audio_sh_sent: false,
            target_sample_rate,
            first_video_ts: None,
            first_audio_ts: None,
        }
    }

    /// Process one Opus frame. Returns an optional sequence-header message (emitted
    /// once, lazily, ahead of the first payload) followed by the raw-AAC payload
    /// message.
    pub fn process_audio(&mut self, frame: &Frame) -> Result<Vec<Message>> {
        let base = *self.first_audio_ts.get_or_insert(frame.timestamp);
        let ts_ms = ((frame.timestamp - base) / 48) as i64;

        let adts = self.audio_transcoder.transcode(&frame.payload)?;
        let (config, raw_aac) = unwrap_adts(&adts)?;

        let mut out = Vec::with_capacity(2);
        if !self.audio_sh_sent {
            self.audio_sh_sent = true;
            let sh_config = AudioSpecificConfig {
                profile: config.profile,
                sampling_frequency_index: sample_rate_index(self.target_sample_rate),
                channel_configuration: config.channel_configuration,
            };
            out.push(Message::sequence_header(MessageType::Audio, ts_ms, sh_config.build().to_vec()));
        }
        out.push(Message::audio(ts_ms, raw_aac.to_vec()));
        Ok(out)
    }

    /// Process one H.264 Annex-B frame from a publisher attendee. On a keyframe,
    /// synthesizes and emits a fresh AVCDecoderConfigurationRecord ahead of the AVCC
    /// payload (spec §4.9); the optimized path assumes SPS/PPS are the first two NALs.
    pub fn process_video(&mut self, frame: &Frame) -> Result<Vec<Message>> {
        let base = *self.first_video_ts.get_or_insert(frame.timestamp);
        let ts_ms = ((frame.timestamp - base) / 90) as i64;

        let nals = extract_nals(&frame.payload);
        let mut out = Vec::with_capacity(2);

        if frame.is_keyframe {
            let sps = nals.iter().find(|(t, _)| *t == NAL_TYPE_SPS).map(|(_, n)| *n);
            let pps = nals.iter().find(|(t, _)| *t == NAL_TYPE_PPS).map(|(_, n)| *n);
            if let (Some(sps), Some(pps)) = (sps, pps) {
                let config = build_avc_decoder_config(sps, pps);
                out.push(Message::sequence_header(MessageType::Video, ts_ms, config));
            }
        }

        let media_nals: Vec<&[u8]> = nals
            .iter()
            .filter(|(t, _)| *t != NAL_TYPE_SPS && *t != NAL_TYPE_PPS)
            .map(|(_, n)| *n)
            .collect();
        if !media_nals.is_empty() {
            let avcc = nals_to_avcc(media_nals.into_iter());
            let is_keyframe = nals.iter().any(|(t, _)| *t == NAL_TYPE_IDR);
            out.push(Message::video(ts_ms, avcc, is_keyframe));
        }

        Ok(out)
    }
}

fn sample_rate_index(rate: u32) -> u8 {
    crate::codec::aac::SAMPLE_RATES
        .iter()
        .position(|r| *r == rate)
        .unwrap_or(4) as u8 // default 44100
}
