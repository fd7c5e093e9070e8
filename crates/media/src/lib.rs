pub mod codec;
pub mod consumer;
pub mod error;
pub mod gop_cache;
pub mod jitter;
pub mod live_source;
pub mod live_to_rtc;
pub mod media_source;
pub mod message;
pub mod message_queue;
pub mod meta_cache;
pub mod mix_queue;
pub mod registry;
pub mod rtc_agent;
pub mod rtc_attendee;
pub mod rtc_source;
pub mod rtc_to_live;
pub mod stats;

pub use error::{Error, Result};
pub use message::{Message, MessageChain, MessageType};
