use crate::message::{Message, MessageType};

/// Per-consumer timestamp normalization algorithm (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterAlgorithm {
    /// Identity — timestamps pass through unchanged.
    Off,
    /// Subtract the first observed timestamp; later timestamps pass through unchanged.
    Zero,
    /// Maintain a monotonic output clock, clamping large or negative deltas.
    Full,
}

/// Stateful per-consumer jitter corrector.
pub struct Jitter {
    algorithm: JitterAlgorithm,
    clamp_ms: i64,
    fallback_ms: i64,
    first_input: Option<i64>,
    last_input: i64,
    last_output: i64,
    initialized: bool,
}

impl Jitter {
    pub fn new(algorithm: JitterAlgorithm) -> Self {
        Self::with_params(algorithm, 250, 10)
    }

    pub fn with_params(algorithm: JitterAlgorithm, clamp_ms: i64, fallback_ms: i64) -> Self {
        Self {
            algorithm,
            clamp_ms,
            fallback_ms,
            first_input: None,
            last_input: 0,
            last_output: 0,
            initialized: false,
        }
    }

    /// Correct a message's timestamp in place, per `self.algorithm`. Metadata is always
    /// stamped to 0 under FULL (spec §4.2).
    pub fn correct(&mut self, msg: &Message) -> i64 {
        match self.algorithm {
            JitterAlgorithm::Off => msg.timestamp_ms,
            JitterAlgorithm::Zero => {
                let first = *self.first_input.get_or_insert(msg.timestamp_ms);
                msg.timestamp_ms - first
            }
            JitterAlgorithm::Full => {
                if matches!(msg.kind, MessageType::Metadata) {
                    return 0;
                }
                if !self.initialized {
                    self.initialized = true;
                    self.last_input = msg.timestamp_ms;
                    self.last_output = 0;
                    return 0;
                }
                let delta = msg.timestamp_ms - self.last_input;
                let delta = if delta < -self.clamp_ms || delta > self.clamp_ms {
                    self.fallback_ms
                } else {
                    delta
                };
                self.last_input = msg.timestamp_ms;
                self.last_output = (self.last_output + delta).max(0);
                self.last_output
            }
        }
    }

    /// Output timestamp of the last corrected message, for diagnostics.
    pub fn get_time(&self) -> i64 {
        match self.algorithm {
            JitterAlgorithm::Full => self.last_output,
            _ => self.last_input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_at(ts: i64) -> Message {
        Message::video(ts, &b"x"[..], false)
    }

    #[test]
    fn off_passes_through() {
        let mut j = Jitter::new(JitterAlgorithm::Off);
        assert_eq!(j.correct(&video_at(1000)), 1000);
        assert_eq!(j.correct(&video_at(1040)), 1040);
    }

    #[test]
    fn zero_rebases_to_first_timestamp() {
        let mut j = Jitter::new(JitterAlgorithm::Zero);
        assert_eq!(j.correct(&video_at(5000)), 0);
        assert_eq!(j.correct(&video_at(5040)), 40);
        assert_eq!(j.correct(&video_at(5080)), 80);
    }

    #[test]
    fn full_starts_at_zero_and_tracks_deltas() {
        let mut j = Jitter::new(JitterAlgorithm::Full);
        assert_eq!(j.correct(&video_at(1000)), 0);
        assert_eq!(j.correct(&video_at(1040)), 40);
        assert_eq!(j.correct(&video_at(1080)), 80);
    }

    #[test]
    fn full_clamps_large_positive_spike() {
        let mut j = Jitter::new(JitterAlgorithm::Full);
        assert_eq!(j.correct(&video_at(0)), 0);
        // huge forward jump should be replaced with the 10ms fallback
        assert_eq!(j.correct(&video_at(100_000)), 10);
    }

    #[test]
    fn full_clamps_negative_spike_but_never_goes_below_zero() {
        let mut j = Jitter::new(JitterAlgorithm::Full);
        assert_eq!(j.correct(&video_at(1000)), 0);
        // large negative jump (clock reset) clamps to the fallback, not a negative delta
        assert_eq!(j.correct(&video_at(0)), 10);
    }

    #[test]
    fn full_stamps_metadata_to_zero() {
        let mut j = Jitter::new(JitterAlgorithm::Full);
        j.correct(&video_at(1000));
        j.correct(&video_at(1040));
        let meta = Message::metadata(9999, &b"{}"[..]);
        assert_eq!(j.correct(&meta), 0);
    }

    #[test]
    fn full_never_decreases_output() {
        let mut j = Jitter::new(JitterAlgorithm::Full);
        let mut last = j.correct(&video_at(0));
        for ts in [10, 5, 40, 20, 90] {
            let out = j.correct(&video_at(ts));
            assert!(out >= last || out == 10, "output went backwards: {out} < {last}");
            last = out;
        }
    }
}
