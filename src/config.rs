//! Client configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Tunable parameters for a client session and its transport.
///
/// All fields carry defaults, so an empty TOML document (or no config file
/// at all) yields a usable configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Deadline for the `initialize` handshake, in seconds.
    #[serde(default = "default_handshake_timeout_seconds")]
    pub handshake_timeout_seconds: u64,
    /// Maximum accepted length of one inbound NDJSON line, in bytes.
    ///
    /// Longer lines are rejected by the codec and surfaced on the
    /// incoming-message feed as decode errors.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Bounded queue depth of each incoming-message feed consumer.
    ///
    /// When a consumer's queue is full the dispatch loop waits for it to
    /// drain (backpressure) rather than dropping items.
    #[serde(default = "default_feed_buffer")]
    pub feed_buffer: usize,
    /// Depth of the transport's internal inbound/outbound channels.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_handshake_timeout_seconds() -> u64 {
    30
}

fn default_max_line_bytes() -> usize {
    1_048_576
}

fn default_feed_buffer() -> usize {
    64
}

fn default_channel_buffer() -> usize {
    32
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_seconds: default_handshake_timeout_seconds(),
            max_line_bytes: default_max_line_bytes(),
            feed_buffer: default_feed_buffer(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl ClientConfig {
    /// Parse a configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the TOML is malformed or a field
    /// fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a configuration file from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the file cannot be read or fails
    /// to parse.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
        Self::from_toml_str(&text)
    }

    /// Deadline for the `initialize` handshake as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    /// Reject zero-sized buffers and limits that would wedge the session.
    fn validate(&self) -> Result<()> {
        if self.handshake_timeout_seconds == 0 {
            return Err(AppError::Config(
                "handshake_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }
        if self.feed_buffer == 0 || self.channel_buffer == 0 {
            return Err(AppError::Config(
                "feed_buffer and channel_buffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
