//! Transport abstraction: the stream pair a session runs over.
//!
//! A transport produces a connected pair of directional channels — an
//! inbound stream of decoded [`Inbound`] items and an outbound sink of
//! [`Message`]s — plus a lifecycle that tears both halves down together.
//! Two concrete forms exist: a subprocess stdio transport ([`stdio`]) and a
//! long-lived HTTP SSE transport ([`sse`]).
//!
//! The concrete transport is selected once, at start, by [`Target::classify`];
//! there is no runtime re-selection.

pub mod codec;
pub mod sse;
pub mod stdio;

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ClientConfig;
use crate::protocol::{Inbound, Message};
use crate::Result;

// ── Target classification ────────────────────────────────────────────────────

/// Parameters for the subprocess stdio transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioParams {
    /// Executable to spawn.
    pub command: String,
    /// Positional arguments passed to the executable.
    pub args: Vec<String>,
    /// Environment variables set for the child, overlaid on the default
    /// inherited allowlist.
    pub env: HashMap<String, String>,
}

/// Parameters for the HTTP SSE transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseParams {
    /// URL of the server's SSE endpoint.
    pub url: String,
}

/// A classified connection target: either a server command or a server URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Spawn `command` and speak NDJSON over its stdio.
    Stdio(StdioParams),
    /// Connect to an HTTP(S) URL and speak SSE + POST.
    Sse(SseParams),
}

impl Target {
    /// Classify a target string: an `http`/`https` URL selects the SSE
    /// transport, anything else is treated as an executable command.
    ///
    /// Pure and side-effect-free. An invalid command string is not rejected
    /// here; it is handed unmodified to the stdio transport, whose spawn
    /// failure surfaces at open time.
    #[must_use]
    pub fn classify(
        command_or_url: &str,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        let is_http = reqwest::Url::parse(command_or_url)
            .is_ok_and(|url| matches!(url.scheme(), "http" | "https"));

        if is_http {
            Self::Sse(SseParams {
                url: command_or_url.to_owned(),
            })
        } else {
            Self::Stdio(StdioParams {
                command: command_or_url.to_owned(),
                args,
                env,
            })
        }
    }

    /// Open the transport this target selects and return its stream pair.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AppError::Transport`] when the subprocess cannot be
    /// spawned or the HTTP connection cannot be established — fatal to the
    /// scope attempting to open the transport.
    pub async fn open(self, config: &ClientConfig) -> Result<Handle> {
        match self {
            Self::Stdio(params) => stdio::connect(&params, config).await,
            Self::Sse(params) => sse::connect(&params, config).await,
        }
    }
}

// ── Transport handle ──────────────────────────────────────────────────────────

/// Open transport: the stream pair plus the teardown handle.
///
/// Exactly one dispatch loop consumes `inbound`; `outbound` may be cloned
/// by any number of senders — the transport's single writer task serializes
/// frames, so concurrent callers never interleave bytes on the wire.
#[derive(Debug)]
pub struct Handle {
    /// Inbound stream of decoded messages and decode errors.
    pub inbound: mpsc::Receiver<Inbound>,
    /// Outbound sink of protocol messages.
    pub outbound: mpsc::Sender<Message>,
    /// Teardown handle; closing cascades to both stream halves.
    pub closer: Closer,
}

/// Idempotent teardown handle for an open transport.
///
/// Cancelling fires the transport's [`CancellationToken`], which stops its
/// reader/writer tasks (and kills the child process for stdio transports);
/// [`Closer::close`] additionally awaits those tasks. Dropping the closer
/// cancels without waiting.
#[derive(Debug)]
pub struct Closer {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Closer {
    /// Build a closer owning the transport's cancellation token and tasks.
    #[must_use]
    pub fn new(cancel: CancellationToken, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { cancel, tasks }
    }

    /// Close the transport: cancel its tasks and wait for them to finish.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                debug!(%err, "transport task ended with join error");
            }
        }
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        // Cancellation is the release path for every scope exit, including
        // early cancellation of the owning task.
        self.cancel.cancel();
    }
}
