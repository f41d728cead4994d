//! Error types for the call streamer

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Metadata serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors, fatal to initialization
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("at least one stream is required")]
    NoStreams,

    #[error("stream {index}: TGID is required")]
    MissingTalkgroup { index: usize },

    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    #[error("malformed configuration: {0}")]
    Malformed(String),

    #[error("unsupported configuration file extension: {0}")]
    UnsupportedFormat(String),

    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),
}

/// Session store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to insert session for call {0}")]
    InsertionFailure(String),
}

/// Wire frame decoding errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("bad frame magic: {0:#010x}")]
    BadMagic(i32),

    #[error("negative sample count: {0}")]
    NegativeSampleCount(i32),

    #[error("metadata too large: {0} bytes")]
    MetadataTooLarge(usize),

    #[error("too many samples for one frame: {0}")]
    TooManySamples(usize),

    #[error("metadata is not valid: {0}")]
    InvalidMetadata(#[from] serde_json::Error),

    #[error("frame truncated: {0}")]
    Truncated(#[from] std::io::Error),
}

/// Dispatch loop errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatch loop is not running")]
    NotRunning,

    #[error("failed to spawn dispatch worker: {0}")]
    Spawn(std::io::Error),
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
