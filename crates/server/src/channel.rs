//! Channel views.
//!
//! A channel is a named sub-bus on top of one transport connection. Views
//! are stateless accessors — two views with the same name and owner are
//! interchangeable — so they are built on demand by [`Client::of`] and
//! [`Server::of`] and route everything to the owner's tables.

use std::time::Duration;

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use wswrap_protocol::{EventArgs, Message, is_reserved_event};

use crate::client::Client;
use crate::invoker::IntoEventHandler;
use crate::server::Server;
use crate::{ConnError, ServerError};

/// Rejects sends and registrations of reserved names on the main channel.
pub(crate) fn check_event_name(channel: &str, event: &str) -> Result<(), ServerError> {
    if channel.is_empty() && is_reserved_event(event) {
        return Err(ServerError::ReservedEvent(event.to_string()));
    }
    Ok(())
}

/// A named channel bound to one connection.
///
/// Events emitted and requests sent through this view reach the channel
/// of the same name on that connection's remote end.
#[derive(Clone)]
pub struct ClientChannel {
    name: String,
    client: Arc<Client>,
}

impl PartialEq for ClientChannel {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.client, &other.client)
    }
}

impl std::fmt::Debug for ClientChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientChannel")
            .field("name", &self.name)
            .field("client", &Arc::as_ptr(&self.client))
            .finish()
    }
}

impl ClientChannel {
    pub(crate) fn new(name: String, client: Arc<Client>) -> Self {
        ClientChannel { name, client }
    }

    /// The channel name; empty for the main channel.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The connection this view is bound to.
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Registers a handler for `event` on this channel, for this
    /// connection only. Overwrites any previous registration. A
    /// connection-scoped handler shadows a server-wide one for every
    /// message on this connection.
    pub fn on<M>(
        &self,
        event: &str,
        handler: impl IntoEventHandler<M>,
    ) -> Result<(), ServerError> {
        self.client
            .register(&self.name, event, handler.into_event_handler(), false)
    }

    /// Like [`on`](Self::on), but the handler fires at most once.
    pub fn once<M>(
        &self,
        event: &str,
        handler: impl IntoEventHandler<M>,
    ) -> Result<(), ServerError> {
        self.client
            .register(&self.name, event, handler.into_event_handler(), true)
    }

    /// Removes any handler registered for `event` on this channel.
    pub fn off(&self, event: &str) {
        self.client.unregister(&self.name, event);
    }

    /// Sends a fire-and-forget event to the connection.
    pub async fn emit(&self, event: &str, args: impl EventArgs) -> Result<(), ServerError> {
        check_event_name(&self.name, event)?;
        let msg = Message::event(self.name.clone(), event, args)?;
        self.client.write(&msg).await.map_err(ServerError::from)
    }

    /// Sends a request and waits for its response.
    ///
    /// Resolves early with [`ServerError::ConnectionClosed`] if the
    /// connection closes, or [`ServerError::Aborted`] if the server shuts
    /// down while the request is outstanding.
    pub async fn request(&self, event: &str, args: impl EventArgs) -> Result<Value, ServerError> {
        self.client.send_request(&self.name, event, args).await
    }

    /// Like [`request`](Self::request) with a deadline; the pending entry
    /// is discarded on expiry and a late response is dropped.
    pub async fn request_timeout(
        &self,
        event: &str,
        args: impl EventArgs,
        timeout: Duration,
    ) -> Result<Value, ServerError> {
        self.client
            .send_request_timeout(&self.name, event, args, timeout)
            .await
    }

    /// Like [`request`](Self::request), resolving with
    /// [`ServerError::RequestCancelled`] when `cancel` fires first.
    pub async fn request_cancellable(
        &self,
        event: &str,
        args: impl EventArgs,
        cancel: &CancellationToken,
    ) -> Result<Value, ServerError> {
        self.client
            .send_request_cancellable(&self.name, event, args, cancel)
            .await
    }
}

/// A write failure for one connection during a broadcast.
#[derive(Debug, thiserror::Error)]
#[error("client {}: {source}", .client.id())]
pub struct ClientError {
    /// The connection the write failed for.
    pub client: Arc<Client>,
    #[source]
    pub source: ConnError,
}

/// A named channel bound to the whole server.
///
/// Handlers registered here are the fallback for every connection;
/// emitting broadcasts to all live connections.
#[derive(Clone)]
pub struct ServerChannel {
    name: String,
    server: Arc<Server>,
}

impl PartialEq for ServerChannel {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.server, &other.server)
    }
}

impl std::fmt::Debug for ServerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerChannel")
            .field("name", &self.name)
            .field("server", &Arc::as_ptr(&self.server))
            .finish()
    }
}

impl ServerChannel {
    pub(crate) fn new(name: String, server: Arc<Server>) -> Self {
        ServerChannel { name, server }
    }

    /// The channel name; empty for the main channel.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a server-wide handler for `event` on this channel,
    /// consulted when a connection has no handler of its own.
    pub fn on<M>(
        &self,
        event: &str,
        handler: impl IntoEventHandler<M>,
    ) -> Result<(), ServerError> {
        self.server
            .register(&self.name, event, handler.into_event_handler(), false)
    }

    /// Like [`on`](Self::on), but the handler fires at most once across
    /// all connections.
    pub fn once<M>(
        &self,
        event: &str,
        handler: impl IntoEventHandler<M>,
    ) -> Result<(), ServerError> {
        self.server
            .register(&self.name, event, handler.into_event_handler(), true)
    }

    /// Removes any server-wide handler registered for `event` on this
    /// channel.
    pub fn off(&self, event: &str) {
        self.server.unregister(&self.name, event);
    }

    /// Broadcasts an event to every live connection.
    ///
    /// Per-connection write failures are collected and returned; one
    /// unreachable connection never blocks delivery to the others.
    pub async fn emit(
        &self,
        event: &str,
        args: impl EventArgs,
    ) -> Result<Vec<ClientError>, ServerError> {
        check_event_name(&self.name, event)?;
        let msg = Message::event(self.name.clone(), event, args)?;
        let clients = self.server.clients();
        let mut failures = Vec::new();
        for client in clients {
            if let Err(source) = client.write(&msg).await {
                tracing::debug!(client = %client.id(), error = %source, "broadcast write failed");
                failures.push(ClientError { client, source });
            }
        }
        Ok(failures)
    }

    /// Sends a request to one specific connection on this channel.
    pub async fn request_client(
        &self,
        client: &Arc<Client>,
        event: &str,
        args: impl EventArgs,
    ) -> Result<Value, ServerError> {
        ClientChannel::new(self.name.clone(), Arc::clone(client))
            .request(event, args)
            .await
    }
}
