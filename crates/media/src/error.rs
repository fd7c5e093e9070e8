/// Error taxonomy for the media core (see spec §7). Queue backpressure
/// (`MessageQueue::shrink`) is handled by dropping the oldest queued messages and
/// bumping a counter rather than by surfacing an error — there's no caller who could
/// usefully react to it, and the spec's §4.3 shrink policy is defined as a silent,
/// always-successful operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transcode failure: {0}")]
    TranscodeFailure(String),

    #[error("peer failure: {0}")]
    PeerFailure(String),

    #[error("resource closed: {0}")]
    ResourceClosed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
