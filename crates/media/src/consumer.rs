use crate::jitter::{Jitter, JitterAlgorithm};
use crate::message::Message;
use crate::message_queue::MessageQueue;

/// Subscriber-facing enqueue/fetch with pause and per-consumer jitter (spec §4.4).
pub struct Consumer {
    queue: MessageQueue,
    jitter: Jitter,
    paused: bool,
}

impl Consumer {
    pub fn new(max_queue_ms: u64, algorithm: JitterAlgorithm) -> Self {
        Self {
            queue: MessageQueue::new(max_queue_ms),
            jitter: Jitter::new(algorithm),
            paused: false,
        }
    }

    pub fn with_jitter_params(max_queue_ms: u64, algorithm: JitterAlgorithm, clamp_ms: i64, fallback_ms: i64) -> Self {
        Self {
            queue: MessageQueue::new(max_queue_ms),
            jitter: Jitter::with_params(algorithm, clamp_ms, fallback_ms),
            paused: false,
        }
    }

    /// Producer-side: run the message through jitter correction and enqueue it.
    pub fn enqueue(&mut self, msg: &Message) {
        let corrected_ts = self.jitter.correct(msg);
        self.queue.enqueue(msg.with_timestamp(corrected_ts));
    }

    /// Enqueue a message that already carries its final timestamp (used when dumping
    /// metadata/sequence headers/gop cache at attach time — those are rewritten to the
    /// gop start time directly by the caller, not re-corrected).
    pub fn enqueue_raw(&mut self, msg: Message) {
        self.queue.enqueue(msg);
    }

    /// Consumer-side: pop up to `max` queued messages, or none while paused.
    pub fn fetch(&mut self, max: usize) -> Vec<Message> {
        if self.paused {
            return Vec::new();
        }
        self.queue.fetch(max)
    }

    pub fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn get_time(&self) -> i64 {
        self.jitter.get_time()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn shrink_count(&self) -> u64 {
        self.queue.shrink_count()
    }
}
