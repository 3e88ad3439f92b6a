//! Unit tests for the NDJSON line codec.
//!
//! Covers:
//! - a single newline-terminated frame decodes to the line content
//! - batched frames decode one per call
//! - a partial frame is buffered until its newline arrives
//! - an oversized line returns `AppError::Decode("line too long …")`

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use mcp_probe::transport::codec::JsonLineCodec;
use mcp_probe::AppError;

const LIMIT: usize = 4096;

// ── Single frame ──────────────────────────────────────────────────────────────

/// A complete JSON object on one newline-terminated line is decoded without
/// error and returned without the trailing `\n`.
#[test]
fn single_frame_decodes_to_line_content() {
    let mut codec = JsonLineCodec::new(LIMIT);
    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n");

    let result = codec
        .decode(&mut buf)
        .expect("decode must succeed for a valid NDJSON line");

    assert_eq!(
        result,
        Some("{\"jsonrpc\":\"2.0\",\"method\":\"ping\"}".to_owned()),
        "codec must return the line content without the trailing newline"
    );
}

// ── Batched frames ────────────────────────────────────────────────────────────

/// Two frames delivered in one buffer decode as two items on successive calls.
#[test]
fn batched_frames_decode_one_per_call() {
    let mut codec = JsonLineCodec::new(LIMIT);
    let raw = concat!(
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n",
    );
    let mut buf = BytesMut::from(raw);

    assert!(
        codec.decode(&mut buf).expect("first decode").is_some(),
        "first frame must decode"
    );
    assert!(
        codec.decode(&mut buf).expect("second decode").is_some(),
        "second frame must decode"
    );
    assert!(
        codec.decode(&mut buf).expect("third decode").is_none(),
        "no further frames must be present"
    );
}

// ── Partial delivery ──────────────────────────────────────────────────────────

/// A frame arriving without its terminating newline is buffered, not emitted.
#[test]
fn partial_frame_is_buffered_until_newline() {
    let mut codec = JsonLineCodec::new(LIMIT);

    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"me");
    assert!(
        codec
            .decode(&mut buf)
            .expect("partial decode must not error")
            .is_none(),
        "partial frame must not be emitted before the newline arrives"
    );

    buf.extend_from_slice(b"thod\":\"ping\"}\n");
    assert!(
        codec
            .decode(&mut buf)
            .expect("decode after newline")
            .is_some(),
        "complete frame must be emitted once the newline arrives"
    );
}

// ── Length limit ──────────────────────────────────────────────────────────────

/// A line exceeding the configured limit yields `AppError::Decode`.
#[test]
fn oversized_line_returns_decode_error() {
    let mut codec = JsonLineCodec::new(LIMIT);
    let big_line = "a".repeat(LIMIT + 1) + "\n";
    let mut buf = BytesMut::from(big_line.as_str());

    match codec.decode(&mut buf) {
        Err(AppError::Decode(msg)) => assert!(
            msg.contains("line too long"),
            "error must mention 'line too long', got: {msg}"
        ),
        other => panic!("expected Err(AppError::Decode), got: {other:?}"),
    }
}
