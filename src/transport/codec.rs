//! NDJSON line codec for stdio transports.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so an unterminated or maliciously large frame from a misbehaving
//! server cannot exhaust memory. Used as the codec parameter for
//! [`tokio_util::codec::FramedRead`] on the child's stdout.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Newline-delimited UTF-8 codec with a per-line byte limit.
///
/// Decoding a line longer than the limit yields [`AppError::Decode`]
/// (`"line too long"`); the caller surfaces that on the incoming-message
/// feed and keeps reading. Underlying I/O failures map to [`AppError::Io`]
/// and are terminal for the stream.
#[derive(Debug)]
pub struct JsonLineCodec {
    inner: LinesCodec,
    max_line_bytes: usize,
}

impl JsonLineCodec {
    /// Create a codec that rejects lines longer than `max_line_bytes`.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }

    fn map_error(&self, err: LinesCodecError) -> AppError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => AppError::Decode(format!(
                "line too long: exceeded {} bytes",
                self.max_line_bytes
            )),
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Decoder for JsonLineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode(src).map_err(|err| self.map_error(err))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner
            .decode_eof(src)
            .map_err(|err| self.map_error(err))
    }
}
