#![forbid(unsafe_code)]

//! `mcp-probe` — client-side MCP session layer.
//!
//! Connects to an MCP server over a pluggable transport (subprocess stdio
//! or HTTP SSE), runs the `initialize` handshake, and exposes the generic
//! request/response and notification primitives any MCP method rides on.
//!
//! The core is the session/transport concurrency contract: one background
//! dispatch loop drains the inbound stream, resolving responses into their
//! callers' waiters by correlation id and broadcasting everything else to
//! the incoming-message feed, while `initialize`/`send_request` callers
//! suspend without ever touching the stream themselves.

pub mod config;
pub mod errors;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::ClientConfig;
pub use errors::{AppError, Result};
pub use protocol::{Inbound, InitializeResult, Message, RequestId};
pub use session::{IncomingMessages, Session};
