//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Transport open failure: subprocess spawn or HTTP connect.
    ///
    /// Fatal to the scope that attempted to open the transport; surfaced
    /// immediately at open time rather than asynchronously.
    Transport(String),
    /// Malformed inbound frame.
    ///
    /// Carried as a value on the incoming-message feed; never terminates
    /// the dispatch loop.
    Decode(String),
    /// Protocol-level failure of a request: the response carried an error
    /// object, or the result did not have the expected shape.
    Handshake(String),
    /// A per-request deadline elapsed before the matching response arrived.
    Timeout(String),
    /// The session closed while the request was still outstanding.
    SessionClosed(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Handshake(msg) => write!(f, "handshake: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::SessionClosed(msg) => write!(f, "session closed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
