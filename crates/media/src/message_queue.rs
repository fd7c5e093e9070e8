use crate::message::{Message, MessageType};
use std::collections::VecDeque;

/// Bounded per-consumer ring, limited by wall-clock media duration rather than item
/// count (spec §4.3).
pub struct MessageQueue {
    items: VecDeque<Message>,
    max_queue_ms: i64,
    av_start: i64,
    av_end: i64,
    last_audio_sh: Option<Message>,
    last_video_sh: Option<Message>,
    shrink_count: u64,
}

impl MessageQueue {
    pub fn new(max_queue_ms: u64) -> Self {
        Self {
            items: VecDeque::new(),
            max_queue_ms: max_queue_ms as i64,
            av_start: 0,
            av_end: 0,
            last_audio_sh: None,
            last_video_sh: None,
            shrink_count: 0,
        }
    }

    pub fn av_start(&self) -> i64 {
        self.av_start
    }

    pub fn av_end(&self) -> i64 {
        self.av_end
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn shrink_count(&self) -> u64 {
        self.shrink_count
    }

    /// Enqueue one message, shrinking as many times as necessary to respect
    /// `max_queue_ms`.
    pub fn enqueue(&mut self, msg: Message) {
        if msg.is_sequence_header {
            match msg.kind {
                MessageType::Audio => self.last_audio_sh = Some(msg.clone()),
                MessageType::Video => self.last_video_sh = Some(msg.clone()),
                MessageType::Metadata => {}
            }
        }

        if !matches!(msg.kind, MessageType::Metadata) {
            self.av_end = self.av_end.max(msg.timestamp_ms);
        }
        self.items.push_back(msg);

        while self.av_end - self.av_start > self.max_queue_ms {
            self.shrink();
        }
    }

    /// Discard all buffered media, keeping only the most recent audio/video sequence
    /// headers, rewritten to the current `av_end` (spec §4.3, I5, P4).
    fn shrink(&mut self) {
        self.items.clear();
        self.av_start = self.av_end;
        self.shrink_count += 1;

        if let Some(sh) = &self.last_audio_sh {
            self.items.push_back(sh.with_timestamp(self.av_end));
        }
        if let Some(sh) = &self.last_video_sh {
            self.items.push_back(sh.with_timestamp(self.av_end));
        }
    }

    /// Pop up to `max` messages from the head, advancing `av_start` to the last popped
    /// AV timestamp.
    pub fn fetch(&mut self, max: usize) -> Vec<Message> {
        let mut out = Vec::with_capacity(max.min(self.items.len()));
        while out.len() < max {
            let Some(msg) = self.items.pop_front() else {
                break;
            };
            if !matches!(msg.kind, MessageType::Metadata) {
                self.av_start = msg.timestamp_ms;
            }
            out.push(msg);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn shrink_retains_only_latest_sequence_headers() {
        let mut q = MessageQueue::new(100);
        q.enqueue(Message::sequence_header(MessageType::Audio, 0, &b"asc"[..]));
        q.enqueue(Message::sequence_header(MessageType::Video, 0, &b"avcc"[..]));
        for i in 0..1000 {
            q.enqueue(Message::video(i, &b"p"[..], false));
        }
        assert_eq!(q.len(), 2);
        assert_eq!(q.av_start(), q.av_end());
        assert!(q.fetch(10).iter().all(|m| m.is_sequence_header));
    }

    #[test]
    fn shrunk_headers_carry_rewritten_timestamp() {
        let mut q = MessageQueue::new(50);
        q.enqueue(Message::sequence_header(MessageType::Video, 0, &b"avcc"[..]));
        for i in 0..200 {
            q.enqueue(Message::video(i, &b"p"[..], false));
        }
        let fetched = q.fetch(10);
        let sh = fetched.iter().find(|m| m.is_sequence_header).unwrap();
        assert_eq!(sh.timestamp_ms, q.av_end());
    }

    #[test]
    fn fetch_advances_av_start() {
        let mut q = MessageQueue::new(10_000);
        q.enqueue(Message::video(0, &b"a"[..], true));
        q.enqueue(Message::video(40, &b"b"[..], false));
        let fetched = q.fetch(2);
        assert_eq!(fetched.len(), 2);
        assert_eq!(q.av_start(), 40);
    }

    #[test]
    fn metadata_does_not_move_av_window() {
        let mut q = MessageQueue::new(10_000);
        q.enqueue(Message::video(100, &b"v"[..], true));
        q.enqueue(Message::metadata(999, &b"{}"[..]));
        assert_eq!(q.av_end(), 100);
    }

    #[test]
    fn no_shrink_when_under_budget() {
        let mut q = MessageQueue::new(10_000);
        for i in 0..50 {
            q.enqueue(Message::video(i * 40, &b"p"[..], false));
        }
        assert_eq!(q.shrink_count(), 0);
        assert_eq!(q.len(), 50);
    }
}
