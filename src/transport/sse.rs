//! HTTP SSE transport.
//!
//! Opens a long-lived `text/event-stream` GET to the server. The server's
//! first `endpoint` event advertises the URL that outgoing messages are
//! POSTed to; subsequent `message` events carry inbound protocol frames.
//!
//! Connect failures and non-success statuses are fatal at open time.
//! Mid-stream failures are surfaced on the inbound stream as error values
//! and then close it, which the session treats as session closure.

use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::protocol::{Inbound, Message};
use crate::transport::{Closer, Handle, SseParams};
use crate::{AppError, Result};

/// Open the SSE connection and return the connected transport handle.
///
/// Waits (bounded by the handshake timeout) for the server's `endpoint`
/// event before returning, so the outbound sink is usable immediately.
///
/// # Errors
///
/// Returns [`AppError::Transport`] when the URL is invalid, the connection
/// fails, the server answers with a non-success status, or no `endpoint`
/// event arrives in time — all fatal at open time.
pub async fn connect(params: &SseParams, config: &ClientConfig) -> Result<Handle> {
    let base = Url::parse(&params.url)
        .map_err(|err| AppError::Transport(format!("invalid url {}: {err}", params.url)))?;

    let client = reqwest::Client::builder()
        .build()
        .map_err(|err| AppError::Transport(format!("failed to build http client: {err}")))?;

    let response = client
        .get(base.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|err| AppError::Transport(format!("connect to {base} failed: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Transport(format!(
            "server returned status {status} for {base}"
        )));
    }

    let mut stream = response.bytes_stream();
    let mut parser = EventParser::new();
    let mut early: Vec<Inbound> = Vec::new();

    // The endpoint advertisement is part of opening the transport; without
    // it there is nowhere to deliver outbound messages.
    let deadline = tokio::time::Instant::now() + config.handshake_timeout();
    let endpoint = loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());

        let chunk = tokio::time::timeout(remaining, stream.next())
            .await
            .map_err(|_| {
                AppError::Transport(format!("no endpoint event within {remaining:?} from {base}"))
            })?
            .ok_or_else(|| {
                AppError::Transport("event stream closed before endpoint event".into())
            })?
            .map_err(|err| {
                AppError::Transport(format!("event stream failed before endpoint event: {err}"))
            })?;

        let mut advertised = None;
        for event in parser.push(&chunk) {
            if advertised.is_none() && event.name == "endpoint" {
                advertised = Some(event.data);
            } else {
                decode_event(event, &mut early);
            }
        }

        if let Some(path) = advertised {
            break base.join(&path).map_err(|err| {
                AppError::Transport(format!("invalid endpoint {path} advertised: {err}"))
            })?;
        }
    };

    debug!(%endpoint, "sse transport: endpoint advertised");

    let (in_tx, in_rx) = mpsc::channel(config.channel_buffer);
    let (out_tx, out_rx) = mpsc::channel(config.channel_buffer);
    let cancel = CancellationToken::new();

    let reader = tokio::spawn(run_reader(stream, parser, early, in_tx, cancel.clone()));
    let poster = tokio::spawn(run_poster(client, endpoint, out_rx, cancel.clone()));

    Ok(Handle {
        inbound: in_rx,
        outbound: out_tx,
        closer: Closer::new(cancel, vec![reader, poster]),
    })
}

// ── Reader task ───────────────────────────────────────────────────────────────

/// Drain the event stream, forwarding decoded `message` events.
///
/// Mid-stream failures are forwarded as error values, then the inbound
/// stream is closed by dropping its sender.
async fn run_reader<S>(
    mut stream: S,
    mut parser: EventParser,
    early: Vec<Inbound>,
    in_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin + Send,
{
    // Message events that raced ahead of the endpoint advertisement.
    for item in early {
        if in_tx.send(item).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("sse reader: cancellation received, stopping");
                break;
            }

            chunk = stream.next() => {
                match chunk {
                    None => {
                        debug!("sse reader: event stream ended");
                        break;
                    }

                    Some(Err(err)) => {
                        warn!(%err, "sse reader: mid-stream failure, closing");
                        let failure = Inbound::Error(AppError::Io(format!(
                            "event stream disconnected: {err}"
                        )));
                        let _ = in_tx.send(failure).await;
                        break;
                    }

                    Some(Ok(chunk)) => {
                        let mut items = Vec::new();
                        for event in parser.push(&chunk) {
                            decode_event(event, &mut items);
                        }
                        for item in items {
                            if in_tx.send(item).await.is_err() {
                                debug!("sse reader: inbound channel closed, stopping");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Decode one SSE event into inbound items.
///
/// Only `message` events carry protocol frames; anything else (keepalives,
/// repeated endpoint advertisements) is skipped at DEBUG.
fn decode_event(event: SseEvent, items: &mut Vec<Inbound>) {
    if event.name != "message" {
        debug!(event = %event.name, "sse reader: skipping non-message event");
        return;
    }
    match Message::from_json_str(&event.data) {
        Ok(message) => items.push(Inbound::Message(message)),
        Err(err) => {
            warn!(%err, raw = %event.data, "sse reader: undecodable message event");
            items.push(Inbound::Error(err));
        }
    }
}

// ── Poster task ───────────────────────────────────────────────────────────────

/// Deliver each outbound message as an HTTP POST to the advertised endpoint.
///
/// Per-message delivery failures are logged and skipped; they do not tear
/// the session down.
async fn run_poster(
    client: reqwest::Client,
    endpoint: Url,
    mut out_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("sse poster: cancellation received, stopping");
                break;
            }

            msg = out_rx.recv() => {
                let Some(message) = msg else {
                    debug!("sse poster: outbound channel closed, stopping");
                    break;
                };

                let result = client
                    .post(endpoint.clone())
                    .json(&message.to_json_value())
                    .send()
                    .await;

                match result {
                    Ok(response) if !response.status().is_success() => {
                        warn!(status = %response.status(), "sse poster: server rejected message");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "sse poster: delivery failed");
                    }
                }
            }
        }
    }
}

// ── SSE frame parser ──────────────────────────────────────────────────────────

/// One parsed server-sent event.
#[derive(Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the stream omitted the `event:` field.
    pub name: String,
    /// Data payload; multi-line `data:` fields joined with `\n`.
    pub data: String,
}

/// Incremental parser for the `text/event-stream` wire format.
///
/// Feed it raw byte chunks as they arrive; complete events come back out.
/// Handles `event:`/`data:` fields, CRLF line endings, comment lines, and
/// events split across chunk boundaries. Unknown fields are ignored, as
/// the format requires.
#[derive(Debug, Default)]
pub struct EventParser {
    buffer: BytesMut,
    event_name: String,
    data: Vec<String>,
}

impl EventParser {
    /// Create an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.take_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Process one complete line; a blank line dispatches the buffered event.
    fn take_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.data.is_empty() {
                self.event_name.clear();
                return None;
            }
            let name = if self.event_name.is_empty() {
                "message".to_owned()
            } else {
                std::mem::take(&mut self.event_name)
            };
            let data = self.data.join("\n");
            self.data.clear();
            self.event_name.clear();
            return Some(SseEvent { name, data });
        }

        if line.starts_with(':') {
            // Comment / keepalive line.
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_name = value.to_owned(),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }
}
