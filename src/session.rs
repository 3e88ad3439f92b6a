//! Client session: request correlation and the dispatch loop.
//!
//! A [`Session`] owns a transport's stream pair for the lifetime of a
//! scope. A single background dispatch loop is the sole reader of the
//! inbound stream: responses matching an outstanding request resolve that
//! caller's waiter and are consumed; everything else flows to the general
//! incoming-message feed in arrival order.
//!
//! Concurrency contract: `initialize` / [`Session::send_request`] never
//! read the inbound stream themselves — they register interest in one
//! correlation id and suspend on a oneshot channel that the dispatch loop
//! resolves. Any number of requests, notifications, and feed consumers may
//! run concurrently with the loop without deadlocking it.
//!
//! Feed overflow policy: backpressure. The dispatch loop forwards each
//! feed item into every consumer's bounded queue with an awaiting send, so
//! a slow consumer stalls the loop rather than losing items. Cancellation
//! still interrupts a stalled forward, keeping [`Session::close`] bounded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::protocol::{
    initialize_params, Inbound, InitializeResult, Message, Notification, Request, RequestId,
    ResponsePayload,
};
use crate::transport::{Closer, Handle};
use crate::{AppError, Result};

/// Single-resolution slot awaiting exactly one response for its id.
type Waiter = oneshot::Sender<Result<Value>>;

/// Removes its correlation entry on drop unless disarmed.
///
/// Armed across every await in [`Session::send_request`], so a caller whose
/// future is dropped mid-flight (deadline wrapper, task abort) never leaks
/// its entry in the table.
struct PendingGuard {
    shared: Arc<Shared>,
    id: Option<RequestId>,
}

impl PendingGuard {
    fn new(shared: Arc<Shared>, id: RequestId) -> Self {
        Self {
            shared,
            id: Some(id),
        }
    }

    /// The entry has been taken out of the table by the dispatch loop.
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else { return };
        // Drop is synchronous: remove inline when the lock is free, and
        // hand the removal to a cleanup task when the dispatch loop or
        // another caller holds it.
        if let Ok(mut pending) = self.shared.pending.try_lock() {
            pending.remove(&id);
        } else {
            let shared = Arc::clone(&self.shared);
            let handle = tokio::spawn(async move {
                shared.pending.lock().await.remove(&id);
            });
            drop(handle);
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A live client session bound to an open transport.
///
/// Created with [`Session::connect`] (which starts the dispatch loop) and
/// ended with [`Session::close`]; dropping the session cancels the loop
/// and the transport as a backstop.
#[derive(Debug)]
pub struct Session {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    dispatch: Option<JoinHandle<()>>,
    closer: Closer,
    /// Feed receiver created with the session, handed to the first
    /// consumer. Items arriving before that consumer attaches are buffered
    /// here (bounded by `feed_buffer`) instead of being dropped.
    primary: Mutex<Option<IncomingMessages>>,
}

/// State shared between callers and the dispatch loop.
#[derive(Debug)]
struct Shared {
    outbound: mpsc::Sender<Message>,
    /// Correlation table: inserted by callers, resolved by the dispatch loop.
    pending: Mutex<HashMap<RequestId, Waiter>>,
    subscribers: Mutex<Vec<mpsc::Sender<Inbound>>>,
    next_id: AtomicI64,
    closed: AtomicBool,
    feed_buffer: usize,
    handshake_timeout: Duration,
}

impl Session {
    /// Enter the session scope: bind the stream pair and start the
    /// dispatch loop. Pair with [`Session::close`].
    #[must_use]
    pub fn connect(handle: Handle, config: &ClientConfig) -> Self {
        let Handle {
            inbound,
            outbound,
            closer,
        } = handle;

        let (feed_tx, feed_rx) = mpsc::channel(config.feed_buffer);

        let shared = Arc::new(Shared {
            outbound,
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(vec![feed_tx]),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            feed_buffer: config.feed_buffer,
            handshake_timeout: config.handshake_timeout(),
        });

        let cancel = CancellationToken::new();
        let dispatch = tokio::spawn(run_dispatch(inbound, Arc::clone(&shared), cancel.clone()));

        Self {
            shared,
            cancel,
            dispatch: Some(dispatch),
            closer,
            primary: Mutex::new(Some(IncomingMessages { rx: feed_rx })),
        }
    }

    /// Perform the `initialize` handshake.
    ///
    /// Sends the request with a freshly allocated correlation id and
    /// suspends until the matching response arrives or the session closes;
    /// on success the `notifications/initialized` notification is sent
    /// before returning. Runs concurrently with the dispatch loop and any
    /// feed consumer — it never reads the inbound stream itself.
    ///
    /// # Errors
    ///
    /// [`AppError::Handshake`] when the response carries a protocol-level
    /// error or has an unexpected shape, [`AppError::Timeout`] when the
    /// configured handshake deadline elapses, and
    /// [`AppError::SessionClosed`] when the session ends first.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let value = self
            .send_request(
                "initialize",
                Some(initialize_params()),
                Some(self.shared.handshake_timeout),
            )
            .await?;

        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|err| AppError::Handshake(format!("malformed initialize result: {err}")))?;

        self.send_notification("notifications/initialized", None)
            .await?;

        info!(
            protocol_version = %result.protocol_version,
            "session initialized"
        );
        Ok(result)
    }

    /// Send a request and await its response.
    ///
    /// Registers a correlation entry, writes the request to the outbound
    /// sink, and suspends until the dispatch loop resolves the entry. With
    /// a `deadline`, the entry is removed and the call fails once the
    /// deadline elapses; other in-flight requests are unaffected. Dropping
    /// the returned future mid-flight also removes the entry, so cancelled
    /// callers never leak table space.
    ///
    /// # Errors
    ///
    /// [`AppError::Handshake`] when the response carries an error object,
    /// [`AppError::Timeout`] when `deadline` elapses first, and
    /// [`AppError::SessionClosed`] when the session closes while the
    /// request is outstanding.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Option<Duration>,
    ) -> Result<Value> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(AppError::SessionClosed(format!(
                "cannot send {method}: session is closed"
            )));
        }

        let id = RequestId::Number(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id.clone(), tx);

        // Armed from here on: any exit that leaves the entry unresolved
        // (deadline, send failure, the caller's future being dropped)
        // removes it on the way out.
        let mut guard = PendingGuard::new(Arc::clone(&self.shared), id.clone());

        // The loop may have shut down between the closed check and the
        // insert; re-checking after the insert closes that window.
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(AppError::SessionClosed(format!(
                "cannot send {method}: session is closed"
            )));
        }

        let message = Message::Request(Request {
            id: id.clone(),
            method: method.to_owned(),
            params,
        });
        if self.shared.outbound.send(message).await.is_err() {
            return Err(AppError::SessionClosed(format!(
                "transport closed before {method} could be sent"
            )));
        }

        let outcome = if let Some(limit) = deadline {
            match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(AppError::Timeout(format!(
                        "request {id} ({method}) exceeded its {limit:?} deadline"
                    )));
                }
            }
        } else {
            rx.await
        };
        guard.disarm();

        match outcome {
            Ok(result) => result,
            Err(_) => Err(AppError::SessionClosed(format!(
                "session closed while awaiting the response to {method}"
            ))),
        }
    }

    /// Send a fire-and-forget notification.
    ///
    /// Writes to the outbound sink without touching the correlation table
    /// and never suspends waiting for a reply.
    ///
    /// # Errors
    ///
    /// [`AppError::SessionClosed`] when the transport's outbound sink has
    /// already shut down.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let message = Message::Notification(Notification {
            method: method.to_owned(),
            params,
        });
        self.shared.outbound.send(message).await.map_err(|_| {
            AppError::SessionClosed(format!("transport closed before {method} could be sent"))
        })
    }

    /// Attach a consumer to the general incoming-message feed.
    ///
    /// The feed is a live broadcast, not a replay: every consumer receives
    /// each item delivered after it attaches, in inbound arrival order.
    /// The first consumer additionally receives items buffered since the
    /// session opened. After the session closes, returned feeds end
    /// immediately.
    pub async fn incoming_messages(&self) -> IncomingMessages {
        if let Some(primary) = self.primary.lock().await.take() {
            return primary;
        }

        let (tx, rx) = mpsc::channel(self.shared.feed_buffer);
        if !self.shared.closed.load(Ordering::SeqCst) {
            self.shared.subscribers.lock().await.push(tx);
        }
        IncomingMessages { rx }
    }

    /// Number of requests currently awaiting a response.
    ///
    /// Diagnostic accessor; the count is momentary and may change as soon
    /// as it is read.
    pub async fn pending_requests(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Exit the session scope: stop the dispatch loop, resolve every
    /// outstanding request with a session-closed error, and tear the
    /// transport down. Every exit path from the owning scope should end
    /// here; dropping the session cancels without waiting.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(dispatch) = self.dispatch.take() {
            if let Err(err) = dispatch.await {
                debug!(%err, "dispatch task ended with join error");
            }
        }
        self.closer.close().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Backstop for scopes that exit without calling close(); the
        // transport's own closer cancels its tasks when dropped.
        self.cancel.cancel();
    }
}

// ── Incoming-message feed ─────────────────────────────────────────────────────

/// One consumer's view of the general incoming-message feed.
///
/// Single-pass and not restartable: once the session closes or the
/// consumer falls off the subscriber list, [`IncomingMessages::recv`]
/// returns `None` forever.
#[derive(Debug)]
pub struct IncomingMessages {
    rx: mpsc::Receiver<Inbound>,
}

impl IncomingMessages {
    /// Receive the next feed item, or `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }
}

// ── Dispatch loop ─────────────────────────────────────────────────────────────

/// Sole reader of the session's inbound stream.
///
/// Routes responses to their waiters and everything else to the feed;
/// exits when the stream closes or the session is torn down, then resolves
/// every still-outstanding request with a session-closed error.
async fn run_dispatch(
    mut inbound: mpsc::Receiver<Inbound>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("dispatch: cancellation received, stopping");
                break "session cancelled";
            }

            item = inbound.recv() => {
                let Some(item) = item else {
                    debug!("dispatch: inbound stream closed");
                    break "inbound stream closed";
                };

                match item {
                    Inbound::Message(Message::Response(response)) => {
                        let waiter = shared.pending.lock().await.remove(&response.id);
                        if let Some(waiter) = waiter {
                            let outcome = match response.payload {
                                ResponsePayload::Result(value) => Ok(value),
                                ResponsePayload::Error(err) => Err(AppError::Handshake(
                                    format!("server rejected request {}: {err}", response.id),
                                )),
                            };
                            if waiter.send(outcome).is_err() {
                                // Caller gave up (deadline or cancellation)
                                // between resolution and delivery.
                                debug!(id = %response.id, "dispatch: waiter dropped before resolution");
                            }
                        } else {
                            warn!(id = %response.id, "dispatch: response matches no pending request");
                            shared
                                .forward(Inbound::Message(Message::Response(response)), &cancel)
                                .await;
                        }
                    }

                    other => shared.forward(other, &cancel).await,
                }
            }
        }
    };

    shared.shutdown(reason).await;
}

impl Shared {
    /// Deliver one item to every live feed consumer, in arrival order.
    ///
    /// Awaiting each bounded queue is the backpressure policy: the loop
    /// stalls on a full consumer instead of dropping. Cancellation wins
    /// over a stalled send, so teardown stays bounded even when a consumer
    /// has stopped draining. Consumers that have gone away are pruned.
    async fn forward(&self, item: Inbound, cancel: &CancellationToken) {
        let targets = self.subscribers.lock().await.clone();
        let mut stale = false;
        for target in &targets {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return,

                sent = target.send(item.clone()) => {
                    if sent.is_err() {
                        stale = true;
                    }
                }
            }
        }
        if stale {
            self.subscribers.lock().await.retain(|tx| !tx.is_closed());
        }
    }

    /// Mark the session closed, fail all pending requests, end all feeds.
    async fn shutdown(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);

        let drained: Vec<(RequestId, Waiter)> =
            self.pending.lock().await.drain().collect();
        for (id, waiter) in drained {
            let _ = waiter.send(Err(AppError::SessionClosed(format!(
                "request {id} was outstanding when the session closed: {reason}"
            ))));
        }

        self.subscribers.lock().await.clear();
        debug!(reason, "session shut down");
    }
}
