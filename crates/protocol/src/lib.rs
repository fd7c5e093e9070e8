pub mod config;
pub mod messages;
pub mod stream_id;

pub use config::*;
pub use messages::*;
pub use stream_id::*;
