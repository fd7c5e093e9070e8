//! Audio transcoding between the two representations this bridge moves between:
//! RTMP-side raw AAC (no ADTS, with an AudioSpecificConfig sequence header) and
//! WebRTC-side Opus. Grounded on the agent's existing gstreamer encoder pipeline
//! pattern and its direct `audiopus` usage for Opus.
//!
//! This lives at the external boundary (spec §9): it is the one place this crate
//! talks to gstreamer/audiopus directly, behind the `AudioTranscoder` trait so the
//! adapters in `live_to_rtc`/`rtc_to_live` stay codec-agnostic.

use crate::error::{Error, Result};
use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::{Application, Channels, SampleRate};
use gstreamer::prelude::*;
use gstreamer::{self as gst, ElementFactory, FlowError};
use gstreamer_app::{AppSink, AppSinkCallbacks, AppSrc};
use std::sync::mpsc;

/// One leg of audio transcoding: bytes in one codec, bytes out another, 20ms at a time.
pub trait AudioTranscoder: Send {
    fn transcode(&mut self, input: &[u8]) -> Result<Vec<u8>>;
}

impl AudioTranscoder for Box<dyn AudioTranscoder> {
    fn transcode(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        (**self).transcode(input)
    }
}

fn opus_sample_rate(rate: u32) -> Result<SampleRate> {
    match rate {
        48000 => Ok(SampleRate::Hz48000),
        24000 => Ok(SampleRate::Hz24000),
        16000 => Ok(SampleRate::Hz16000),
        12000 => Ok(SampleRate::Hz12000),
        8000 => Ok(SampleRate::Hz8000),
        other => Err(Error::InvalidArgument(format!("unsupported Opus sample rate: {other}"))),
    }
}

fn opus_channels(channels: u16) -> Result<Channels> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        other => Err(Error::InvalidArgument(format!("unsupported channel count: {other}"))),
    }
}

/// AAC (raw, via a gstreamer decode pipeline) → PCM → Opus (via `audiopus`).
///
/// The gstreamer leg exists only to get PCM out of AAC; encoding to Opus is done
/// directly with `audiopus` rather than through gstreamer's opusenc, matching the
/// low-latency pattern the agent uses for its own microphone capture path.
pub struct AacToOpus {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    pcm_rx: mpsc::Receiver<Vec<u8>>,
    opus_encoder: OpusEncoder,
    opus_buffer: Vec<u8>,
}

impl AacToOpus {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        let pipeline = gst::Pipeline::new();

        let appsrc_elem = ElementFactory::make("appsrc")
            .name("src")
            .build()
            .map_err(|e| Error::TranscodeFailure(format!("appsrc: {e}")))?;
        let appsrc = appsrc_elem
            .dynamic_cast::<AppSrc>()
            .map_err(|_| Error::TranscodeFailure("failed to cast to AppSrc".into()))?;
        appsrc.set_caps(Some(
            &gst::Caps::builder("audio/mpeg")
                .field("mpegversion", 4i32)
                .field("stream-format", "raw")
                .field("channels", channels as i32)
                .field("rate", sample_rate as i32)
                .build(),
        ));
        appsrc.set_is_live(true);
        appsrc.set_format(gst::Format::Time);

        let decoder = ElementFactory::make("avdec_aac")
            .build()
            .map_err(|e| Error::TranscodeFailure(format!("avdec_aac: {e}")))?;
        let convert = ElementFactory::make("audioconvert")
            .build()
            .map_err(|e| Error::TranscodeFailure(format!("audioconvert: {e}")))?;
        let capsfilter = ElementFactory::make("capsfilter")
            .property(
                "caps",
                gst::Caps::builder("audio/x-raw")
                    .field("format", "S16LE")
                    .field("channels", channels as i32)
                    .field("rate", sample_rate as i32)
                    .field("layout", "interleaved")
                    .build(),
            )
            .build()
            .map_err(|e| Error::TranscodeFailure(format!("capsfilter: {e}")))?;

        let appsink_elem = ElementFactory::make("appsink")
            .name("sink")
            .property("sync", false)
            .property("emit-signals", true)
            .property("max-buffers", 4u32)
            .property("drop", false)
            .build()
            .map_err(|e| Error::TranscodeFailure(format!("appsink: {e}")))?;
        let appsink = appsink_elem
            .dynamic_cast::<AppSink>()
            .map_err(|_| Error::TranscodeFailure("failed to cast to AppSink".into()))?;

        let (pcm_tx, pcm_rx) = mpsc::channel::<Vec<u8>>();
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| FlowError::Error)?;
                    let _ = pcm_tx.send(map.to_vec());
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .add_many([appsrc.upcast_ref(), &decoder, &convert, &capsfilter, appsink.upcast_ref()])
            .map_err(|e| Error::TranscodeFailure(format!("add_many: {e}")))?;
        gst::Element::link_many([appsrc.upcast_ref(), &decoder, &convert, &capsfilter, appsink.upcast_ref()])
            .map_err(|e| Error::TranscodeFailure(format!("link_many: {e}")))?;
        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::TranscodeFailure(format!("set_state Playing: {e}")))?;

        let mut opus_encoder = OpusEncoder::new(opus_sample_rate(sample_rate)?, opus_channels(channels)?, Application::Voip)
            .map_err(|e| Error::TranscodeFailure(format!("opus encoder init: {e:?}")))?;
        opus_encoder
            .set_bitrate(audiopus::Bitrate::BitsPerSecond(64_000))
            .map_err(|e| Error::TranscodeFailure(format!("opus set_bitrate: {e:?}")))?;

        Ok(Self {
            pipeline,
            appsrc,
            pcm_rx,
            opus_encoder,
            opus_buffer: vec![0u8; 4000],
        })
    }
}

impl AudioTranscoder for AacToOpus {
    fn transcode(&mut self, raw_aac: &[u8]) -> Result<Vec<u8>> {
        let buffer = gst::Buffer::from_mut_slice(raw_aac.to_vec());
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| Error::TranscodeFailure(format!("push_buffer: {e:?}")))?;

        let pcm = self
            .pcm_rx
            .recv_timeout(std::time::Duration::from_millis(200))
            .map_err(|_| Error::TranscodeFailure("AAC decode timed out".into()))?;

        let samples: Vec<i16> = pcm.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();

        let len = self
            .opus_encoder
            .encode(&samples, &mut self.opus_buffer)
            .map_err(|e| Error::TranscodeFailure(format!("opus encode: {e:?}")))?;
        Ok(self.opus_buffer[..len].to_vec())
    }
}

impl Drop for AacToOpus {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Opus → PCM (via `audiopus`) → AAC (via a gstreamer encode pipeline).
pub struct OpusToAac {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    aac_rx: mpsc::Receiver<Vec<u8>>,
    opus_decoder: OpusDecoder,
    pcm_buffer: Vec<i16>,
    channels: u16,
}

impl OpusToAac {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        let pipeline = gst::Pipeline::new();

        let appsrc_elem = ElementFactory::make("appsrc")
            .name("src")
            .build()
            .map_err(|e| Error::TranscodeFailure(format!("appsrc: {e}")))?;
        let appsrc = appsrc_elem
            .dynamic_cast::<AppSrc>()
            .map_err(|_| Error::TranscodeFailure("failed to cast to AppSrc".into()))?;
        appsrc.set_caps(Some(
            &gst::Caps::builder("audio/x-raw")
                .field("format", "S16LE")
                .field("channels", channels as i32)
                .field("rate", sample_rate as i32)
                .field("layout", "interleaved")
                .build(),
        ));
        appsrc.set_is_live(true);
        appsrc.set_format(gst::Format::Time);

        let encoder = ElementFactory::make("avenc_aac")
            .build()
            .map_err(|e| Error::TranscodeFailure(format!("avenc_aac: {e}")))?;

        let appsink_elem = ElementFactory::make("appsink")
            .name("sink")
            .property("sync", false)
            .property("emit-signals", true)
            .property("max-buffers", 4u32)
            .property("drop", false)
            .build()
            .map_err(|e| Error::TranscodeFailure(format!("appsink: {e}")))?;
        let appsink = appsink_elem
            .dynamic_cast::<AppSink>()
            .map_err(|_| Error::TranscodeFailure("failed to cast to AppSink".into()))?;

        let (aac_tx, aac_rx) = mpsc::channel::<Vec<u8>>();
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| FlowError::Error)?;
                    let _ = aac_tx.send(map.to_vec());
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .add_many([appsrc.upcast_ref(), &encoder, appsink.upcast_ref()])
            .map_err(|e| Error::TranscodeFailure(format!("add_many: {e}")))?;
        gst::Element::link_many([appsrc.upcast_ref(), &encoder, appsink.upcast_ref()])
            .map_err(|e| Error::TranscodeFailure(format!("link_many: {e}")))?;
        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::TranscodeFailure(format!("set_state Playing: {e}")))?;

        let opus_decoder = OpusDecoder::new(opus_sample_rate(sample_rate)?, opus_channels(channels)?)
            .map_err(|e| Error::TranscodeFailure(format!("opus decoder init: {e:?}")))?;

        let max_frame_samples = (sample_rate as usize / 1000) * 60; // 60ms, generous upper bound
        Ok(Self {
            pipeline,
            appsrc,
            aac_rx,
            opus_decoder,
            pcm_buffer: vec![0i16; max_frame_samples * channels as usize],
            channels,
        })
    }
}

impl AudioTranscoder for OpusToAac {
    fn transcode(&mut self, opus_frame: &[u8]) -> Result<Vec<u8>> {
        let decoded_samples = self
            .opus_decoder
            .decode(Some(opus_frame.try_into().map_err(|_| Error::ParseFailure("empty opus packet".into()))?), &mut self.pcm_buffer[..], false)
            .map_err(|e| Error::TranscodeFailure(format!("opus decode: {e:?}")))?;

        let pcm_bytes: Vec<u8> = self.pcm_buffer[..decoded_samples * self.channels as usize]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let buffer = gst::Buffer::from_mut_slice(pcm_bytes);
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| Error::TranscodeFailure(format!("push_buffer: {e:?}")))?;

        self.aac_rx
            .recv_timeout(std::time::Duration::from_millis(200))
            .map_err(|_| Error::TranscodeFailure("AAC encode timed out".into()))
    }
}

impl Drop for OpusToAac {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Emits silence instead of failing the bridge outright when a GStreamer pipeline
/// can't be built (codec element missing from the host's install).
struct SilentTranscoder;
impl AudioTranscoder for SilentTranscoder {
    fn transcode(&mut self, _input: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

pub fn aac_to_opus_or_silent() -> Box<dyn AudioTranscoder> {
    match AacToOpus::new(48_000, 2) {
        Ok(t) => Box::new(t),
        Err(e) => {
            tracing::warn!(error = %e, "falling back to silent audio bridge: AacToOpus init failed");
            Box::new(SilentTranscoder)
        }
    }
}

pub fn opus_to_aac_or_silent() -> Box<dyn AudioTranscoder> {
    match OpusToAac::new(44_100, 2) {
        Ok(t) => Box::new(t),
        Err(e) => {
            tracing::warn!(error = %e, "falling back to silent audio bridge: OpusToAac init failed");
            Box::new(SilentTranscoder)
        }
    }
}
