//! Server-side routing core for the ws-wrapper protocol.
//!
//! Multiplexes any duplex message transport into named channels carrying
//! fire-and-forget events and correlated request/response calls. The
//! transport itself is pluggable through the [`Conn`] trait; see the
//! `wswrap-tungstenite` crate for a WebSocket implementation.
//!
//! # Overview
//!
//! A [`Server`] owns the set of live connections, the shared handler
//! tables consulted when a connection has no matching handler of its own,
//! and the pending-request bookkeeping for outbound requests. Each
//! accepted [`Client`] runs one read loop task that classifies inbound
//! messages and dispatches them.
//!
//! Handlers are ordinary async functions. Their parameter types are
//! decoded from the wire per argument, and they may take the originating
//! connection as an optional leading `Arc<Client>` parameter:
//!
//! ```no_run
//! use std::convert::Infallible;
//!
//! let server = wswrap_server::Server::new();
//! server.on("echo", |s: String| async move { Ok::<_, Infallible>(s) }).unwrap();
//! ```

use std::future::Future;
use std::pin::Pin;

use wswrap_protocol::{Message, ResponseError, StatusCode};

mod channel;
mod client;
mod invoker;
mod lifecycle;
mod server;
mod table;

#[cfg(test)]
pub(crate) mod mock;

pub use channel::{ClientChannel, ClientError, ServerChannel};
pub use client::Client;
pub use invoker::{EventHandler, IntoEventHandler, InvokeError, WithCaller, WithoutCaller};
pub use server::Server;

/// A boxed future, used for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A duplex message transport the router can drive.
///
/// `read_message` is only ever called from the connection's read loop and
/// never concurrently with itself. `write_message` may be reached from
/// many tasks; the router serializes those calls, so implementations only
/// need interior mutability, not their own write queueing.
pub trait Conn: Send + Sync + 'static {
    /// Reads the next message. Any error is fatal to the connection.
    fn read_message(&self) -> BoxFuture<'_, Result<Message, ConnError>>;

    /// Writes one message.
    fn write_message<'a>(&'a self, msg: &'a Message) -> BoxFuture<'a, Result<(), ConnError>>;

    /// Performs the close handshake with the given status and reason.
    fn close<'a>(&'a self, status: StatusCode, reason: &'a str)
    -> BoxFuture<'a, Result<(), ConnError>>;

    /// Closes immediately, without a handshake.
    fn close_now(&self) -> BoxFuture<'_, Result<(), ConnError>>;
}

/// Errors produced by a [`Conn`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// The connection is gone (peer closed, or local close completed).
    #[error("connection closed")]
    Closed,

    /// The peer sent bytes that do not parse as a wire message.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    /// Any other transport-level failure.
    #[error(transparent)]
    Transport(Box<dyn std::error::Error + Send + Sync>),
}

impl ConnError {
    /// Wraps an arbitrary transport error.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ConnError::Transport(Box::new(err))
    }
}

/// Errors surfaced by the router.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The server has begun shutdown; no new connections or requests.
    #[error("server closed")]
    ServerClosed,

    /// The connection closed while the operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// An outstanding request was aborted by server shutdown.
    #[error("request aborted: server shut down")]
    Aborted,

    /// An outstanding request hit its caller-supplied deadline.
    #[error("request timed out")]
    RequestTimeout,

    /// An outstanding request was cancelled by its caller.
    #[error("request cancelled")]
    RequestCancelled,

    /// The event name is reserved on the main channel.
    #[error("'{0}' is a reserved event name on the main channel")]
    ReservedEvent(String),

    /// The remote end rejected a request with this message.
    #[error("{0}")]
    Rejected(String),

    /// A response arrived whose error payload matches no known shape.
    #[error("malformed response: {0}")]
    MalformedResponse(#[source] ResponseError),

    /// Invoking a handler failed before or after it ran.
    #[error("{0}")]
    Invoke(#[from] InvokeError),

    /// The underlying transport failed.
    #[error("transport: {0}")]
    Transport(#[from] ConnError),

    /// Encoding outbound arguments failed.
    #[error("encoding arguments: {0}")]
    Encode(#[from] serde_json::Error),
}
