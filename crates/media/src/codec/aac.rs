//! AAC ADTS framing and AudioSpecificConfig handling, used by the live↔rtc adapters
//! to move between RTMP's raw-AAC + AudioSpecificConfig representation and the ADTS
//! framing codecs on the WebRTC/gstreamer side expect.

use crate::error::{Error, Result};

const ADTS_HEADER_LEN: usize = 7;

/// The subset of MPEG-4 audio object types we care about identifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacProfile {
    Main,
    LowComplexity,
    Ssr,
    LongTermPrediction,
    Other(u8),
}

impl AacProfile {
    fn from_object_type(object_type: u8) -> Self {
        match object_type {
            1 => AacProfile::Main,
            2 => AacProfile::LowComplexity,
            3 => AacProfile::Ssr,
            4 => AacProfile::LongTermPrediction,
            other => AacProfile::Other(other),
        }
    }

    /// The 2-bit ADTS `profile` field is `object_type - 1`.
    fn adts_profile_bits(self) -> u8 {
        match self {
            AacProfile::Main => 0,
            AacProfile::LowComplexity => 1,
            AacProfile::Ssr => 2,
            AacProfile::LongTermPrediction => 3,
            AacProfile::Other(o) => o.saturating_sub(1).min(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub profile: AacProfile,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
}

pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

impl AudioSpecificConfig {
    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(self.sampling_frequency_index as usize).copied()
    }

    /// Parse the 2-byte (or 16-bit) AudioSpecificConfig carried in an RTMP AAC sequence
    /// header (FLV AACPacketType==0 payload, stripped of its 1-byte FLV audio tag header).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::ParseFailure("AudioSpecificConfig too short".into()));
        }
        let object_type = data[0] >> 3;
        let sampling_frequency_index = ((data[0] & 0x07) << 1) | (data[1] >> 7);
        let channel_configuration = (data[1] >> 3) & 0x0f;
        Ok(Self {
            profile: AacProfile::from_object_type(object_type),
            sampling_frequency_index,
            channel_configuration,
        })
    }

    /// Build the 2-byte AudioSpecificConfig payload.
    pub fn build(&self) -> [u8; 2] {
        let object_type = match self.profile {
            AacProfile::Main => 1,
            AacProfile::LowComplexity => 2,
            AacProfile::Ssr => 3,
            AacProfile::LongTermPrediction => 4,
            AacProfile::Other(o) => o,
        };
        let b0 = (object_type << 3) | (self.sampling_frequency_index >> 1);
        let b1 = ((self.sampling_frequency_index & 0x01) << 7) | (self.channel_configuration << 3);
        [b0, b1]
    }
}

/// Prepend a 7-byte ADTS header (no CRC) to a raw AAC frame.
pub fn wrap_adts(raw_frame: &[u8], config: &AudioSpecificConfig) -> Vec<u8> {
    let frame_len = raw_frame.len() + ADTS_HEADER_LEN;
    let mut out = Vec::with_capacity(frame_len);

    out.push(0xff);
    out.push(0xf1); // MPEG-4, no CRC

    let profile_bits = config.profile.adts_profile_bits();
    let b2 = (profile_bits << 6) | (config.sampling_frequency_index << 2) | ((config.channel_configuration >> 2) & 0x01);
    out.push(b2);

    let b3 = ((config.channel_configuration & 0x03) << 6) | ((frame_len as u32 >> 11) & 0x03) as u8;
    out.push(b3);

    let b4 = ((frame_len as u32 >> 3) & 0xff) as u8;
    out.push(b4);

    let b5 = (((frame_len as u32 & 0x07) << 5) as u8) | 0x1f;
    out.push(b5);

    out.push(0xfc);

    out.extend_from_slice(raw_frame);
    out
}

/// Strip an ADTS header, returning `(config, raw_frame)`. Assumes no CRC (the common
/// case for frames produced by this codebase's own encoders and by gstreamer's aac
/// parsers in ADTS mode).
pub fn unwrap_adts(frame: &[u8]) -> Result<(AudioSpecificConfig, &[u8])> {
    if frame.len() < ADTS_HEADER_LEN || frame[0] != 0xff || frame[1] & 0xf0 != 0xf0 {
        return Err(Error::ParseFailure("not a valid ADTS frame".into()));
    }
    let has_crc = frame[1] & 0x01 == 0;
    let header_len = if has_crc { ADTS_HEADER_LEN + 2 } else { ADTS_HEADER_LEN };

    let profile_bits = (frame[2] >> 6) & 0x03;
    let sampling_frequency_index = (frame[2] >> 2) & 0x0f;
    let channel_configuration = ((frame[2] & 0x01) << 2) | ((frame[3] >> 6) & 0x03);

    let config = AudioSpecificConfig {
        profile: AacProfile::from_object_type(profile_bits + 1),
        sampling_frequency_index,
        channel_configuration,
    };

    let raw = frame
        .get(header_len..)
        .ok_or_else(|| Error::ParseFailure("ADTS frame truncated".into()))?;
    Ok((config, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_specific_config_roundtrip() {
        let config = AudioSpecificConfig {
            profile: AacProfile::LowComplexity,
            sampling_frequency_index: 4, // 44100
            channel_configuration: 2,
        };
        let built = config.build();
        let parsed = AudioSpecificConfig::parse(&built).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.sample_rate(), Some(44100));
    }

    #[test]
    fn adts_wrap_unwrap_roundtrip() {
        let config = AudioSpecificConfig {
            profile: AacProfile::LowComplexity,
            sampling_frequency_index: 4,
            channel_configuration: 2,
        };
        let raw = b"some-raw-aac-bytes";
        let wrapped = wrap_adts(raw, &config);
        assert_eq!(wrapped.len(), raw.len() + ADTS_HEADER_LEN);

        let (parsed_config, parsed_raw) = unwrap_adts(&wrapped).unwrap();
        assert_eq!(parsed_raw, raw);
        assert_eq!(parsed_config.sampling_frequency_index, 4);
        assert_eq!(parsed_config.channel_configuration, 2);
    }

    #[test]
    fn unwrap_rejects_bad_sync_word() {
        let data = [0x00, 0x00, 0, 0, 0, 0, 0, 1, 2, 3];
        assert!(unwrap_adts(&data).is_err());
    }

    #[test]
    fn parse_rejects_short_config() {
        assert!(AudioSpecificConfig::parse(&[0x12]).is_err());
    }
}
