//! Subprocess stdio transport.
//!
//! Spawns the server as a child process, writes each outgoing message as
//! one NDJSON line to its stdin, and decodes each stdout line into an
//! [`Inbound`] item. The child inherits only a small environment allowlist
//! (overlaid with caller-supplied variables) and is killed on every exit
//! path from the transport's scope, including early cancellation.

use std::collections::HashMap;
use std::process::Stdio;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::protocol::{Inbound, Message};
use crate::transport::codec::JsonLineCodec;
use crate::transport::{Closer, Handle, StdioParams};
use crate::{AppError, Result};

/// Environment variables inherited by the spawned server process.
///
/// Everything else from the client's environment is stripped with
/// `env_clear()` before the child is launched, so tokens and other secrets
/// never leak into the server. Caller-supplied variables are applied on
/// top of this allowlist.
#[cfg(unix)]
pub const DEFAULT_INHERITED_ENV_VARS: &[&str] =
    &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

/// Environment variables inherited by the spawned server process.
#[cfg(windows)]
pub const DEFAULT_INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

/// Collect the allowlisted variables from the current environment.
///
/// Variables holding placeholder values that some shells leave behind
/// (`()`-prefixed function bodies) are skipped.
#[must_use]
pub fn default_environment() -> HashMap<String, String> {
    DEFAULT_INHERITED_ENV_VARS
        .iter()
        .filter_map(|&key| {
            let value = std::env::var(key).ok()?;
            if value.starts_with("()") {
                return None;
            }
            Some((key.to_owned(), value))
        })
        .collect()
}

/// Spawn the server process and return the connected transport handle.
///
/// The child gets piped stdin/stdout, inherited stderr, and
/// `kill_on_drop(true)` so the OS process cannot outlive the transport.
///
/// # Errors
///
/// Returns [`AppError::Transport`] when the executable cannot be spawned
/// or its stdio pipes cannot be captured — fatal at open time.
pub async fn connect(params: &StdioParams, config: &ClientConfig) -> Result<Handle> {
    let mut cmd = Command::new(&params.command);
    cmd.args(&params.args);

    cmd.env_clear();
    cmd.envs(default_environment());
    cmd.envs(&params.env);

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Transport(format!("failed to spawn {}: {err}", params.command)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Transport("failed to capture server stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Transport("failed to capture server stdout".into()))?;

    debug!(command = %params.command, "stdio transport: server spawned");

    let (in_tx, in_rx) = mpsc::channel(config.channel_buffer);
    let (out_tx, out_rx) = mpsc::channel(config.channel_buffer);
    let cancel = CancellationToken::new();

    let reader = tokio::spawn(run_reader(
        stdout,
        in_tx,
        cancel.clone(),
        config.max_line_bytes,
    ));
    let writer = tokio::spawn(run_writer(stdin, out_rx, cancel.clone()));
    let watchdog = tokio::spawn(watch_child(child, cancel.clone()));

    Ok(Handle {
        inbound: in_rx,
        outbound: out_tx,
        closer: Closer::new(cancel, vec![reader, writer, watchdog]),
    })
}

// ── Reader task ───────────────────────────────────────────────────────────────

/// Read NDJSON lines from the child's stdout and forward decoded items.
///
/// Oversized lines and malformed JSON become [`Inbound::Error`] values on
/// the inbound stream; the loop keeps reading. EOF and I/O errors end the
/// stream, which the session's dispatch loop treats as session closure.
async fn run_reader(
    stdout: ChildStdout,
    in_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
    max_line_bytes: usize,
) {
    let mut framed = FramedRead::new(stdout, JsonLineCodec::new(max_line_bytes));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("stdio reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!("stdio reader: EOF on server stdout");
                        break;
                    }

                    Some(Err(err @ AppError::Decode(_))) => {
                        // Frame-level failure: surface it and keep reading.
                        warn!(%err, "stdio reader: oversized line, forwarding as decode error");
                        if in_tx.send(Inbound::Error(err)).await.is_err() {
                            break;
                        }
                    }

                    Some(Err(err)) => {
                        warn!(%err, "stdio reader: IO error, stopping");
                        break;
                    }

                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let item = match Message::from_json_str(&line) {
                            Ok(message) => Inbound::Message(message),
                            Err(err) => {
                                warn!(%err, raw_line = %line, "stdio reader: undecodable frame");
                                Inbound::Error(err)
                            }
                        };
                        if in_tx.send(item).await.is_err() {
                            debug!("stdio reader: inbound channel closed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

// ── Writer task ───────────────────────────────────────────────────────────────

/// Serialize outbound messages as NDJSON lines onto the child's stdin.
///
/// The single writer task is what serializes concurrent senders: callers
/// enqueue whole messages, so frames are never interleaved on the wire.
async fn run_writer(
    mut stdin: ChildStdin,
    mut out_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("stdio writer: cancellation received, stopping");
                break;
            }

            msg = out_rx.recv() => {
                let Some(message) = msg else {
                    debug!("stdio writer: outbound channel closed, stopping");
                    break;
                };

                let mut bytes = message.to_json_line().into_bytes();
                bytes.push(b'\n');

                if let Err(err) = stdin.write_all(&bytes).await {
                    warn!(%err, "stdio writer: write to server stdin failed, stopping");
                    break;
                }
                if let Err(err) = stdin.flush().await {
                    warn!(%err, "stdio writer: flush failed, stopping");
                    break;
                }
            }
        }
    }
}

// ── Child watchdog ────────────────────────────────────────────────────────────

/// Hold the child handle until it exits or the transport is torn down.
///
/// On cancellation the child is killed explicitly rather than relying on
/// `kill_on_drop` alone, so teardown is prompt on every exit path.
async fn watch_child(mut child: Child, cancel: CancellationToken) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => debug!(%status, "stdio transport: server exited"),
                Err(err) => warn!(%err, "stdio transport: error waiting for server"),
            }
        }
        () = cancel.cancelled() => {
            if let Err(err) = child.kill().await {
                debug!(%err, "stdio transport: kill after cancellation failed");
            }
        }
    }
}
