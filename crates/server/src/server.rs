//! The server: live connection set, shared handlers, request correlation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use wswrap_protocol::{EventArgs, Message, StatusCode};

use crate::channel::{ClientError, ServerChannel};
use crate::client::Client;
use crate::invoker::EventHandler;
use crate::lifecycle::{self, CloseFn, ErrorFn, LifecycleTable, MessageFn, OpenFn};
use crate::table::{HandlerKey, HandlerTable};
use crate::{Conn, ServerError};

/// A pending outbound request, keyed by its wire id.
struct PendingRequest {
    /// The connection the request was written to; its close fails the
    /// request.
    client: Uuid,
    tx: oneshot::Sender<Result<Value, ServerError>>,
}

/// The multiplexing server.
///
/// Owns the live connections, the server-wide handler tables consulted
/// when a connection has no matching handler of its own, and the
/// pending-request bookkeeping for outbound requests. Created once per
/// listening endpoint; transports are attached with
/// [`accept`](Self::accept).
///
/// ```no_run
/// use std::convert::Infallible;
///
/// let server = wswrap_server::Server::new();
/// server.on("echo", |s: String| async move { Ok::<_, Infallible>(s) }).unwrap();
/// ```
pub struct Server {
    clients: Mutex<HashMap<Uuid, Arc<Client>>>,
    handlers: Mutex<HandlerTable>,
    lifecycle: Mutex<LifecycleTable>,
    pending: Mutex<HashMap<i64, PendingRequest>>,
    next_request_id: AtomicI64,
    cancel: CancellationToken,
    closed: AtomicBool,
    /// Servers only ever live inside an `Arc`; set by the constructor.
    weak_self: std::sync::Weak<Server>,
}

impl Server {
    /// Creates a new server with no connections.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Arc<Server> {
        Arc::new_cyclic(|weak_self| Server {
            clients: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HandlerTable::default()),
            lifecycle: Mutex::new(LifecycleTable::default()),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicI64::new(0),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    fn strong(&self) -> Arc<Server> {
        self.weak_self
            .upgrade()
            .expect("server dropped while a method is running")
    }

    /// Whether shutdown has begun.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns a view of the named server-wide channel.
    pub fn of(&self, name: impl Into<String>) -> ServerChannel {
        ServerChannel::new(name.into(), self.strong())
    }

    /// A snapshot of the live connections.
    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.clients.lock().unwrap().values().cloned().collect()
    }

    /// Looks up a live connection by id.
    pub fn client(&self, id: Uuid) -> Option<Arc<Client>> {
        self.clients.lock().unwrap().get(&id).cloned()
    }

    /// Attaches a transport: creates a connection, starts its read loop,
    /// and fires the open observers. Fails with
    /// [`ServerError::ServerClosed`] once shutdown has begun.
    pub async fn accept(&self, conn: impl Conn) -> Result<Arc<Client>, ServerError> {
        if self.is_closed() {
            return Err(ServerError::ServerClosed);
        }
        let client = Client::new(Box::new(conn), &self.strong());
        self.clients
            .lock()
            .unwrap()
            .insert(client.id(), Arc::clone(&client));
        info!(client = %client.id(), "connection accepted");
        tokio::spawn(Arc::clone(&client).read_loop());
        client.fire_open().await;
        Ok(client)
    }

    /// Shuts the server down: stops accepting, aborts every outstanding
    /// request, and closes every live connection. Idempotent; returns the
    /// first close error encountered, if any.
    pub async fn close(&self) -> Result<(), ServerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("server shutting down");
        // Fail waiters before touching connections, so they observe the
        // shutdown cause rather than an individual connection close.
        let pending: Vec<PendingRequest> = {
            self.pending
                .lock()
                .unwrap()
                .drain()
                .map(|(_, pending)| pending)
                .collect()
        };
        for request in pending {
            let _ = request.tx.send(Err(ServerError::Aborted));
        }
        self.cancel.cancel();

        let clients = self.clients();
        let mut first_error = None;
        for client in clients {
            if let Err(err) = client
                .close(StatusCode::GOING_AWAY, "server shutting down")
                .await
            {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    // --- main-channel conveniences -------------------------------------

    /// Registers a server-wide main-channel handler.
    /// See [`ServerChannel::on`].
    pub fn on<M>(
        &self,
        event: &str,
        handler: impl crate::IntoEventHandler<M>,
    ) -> Result<(), ServerError> {
        self.register("", event, handler.into_event_handler(), false)
    }

    /// Registers a single-fire server-wide main-channel handler.
    pub fn once<M>(
        &self,
        event: &str,
        handler: impl crate::IntoEventHandler<M>,
    ) -> Result<(), ServerError> {
        self.register("", event, handler.into_event_handler(), true)
    }

    /// Removes a server-wide main-channel handler.
    pub fn off(&self, event: &str) {
        self.unregister("", event);
    }

    /// Broadcasts a main-channel event to every live connection.
    pub async fn emit(
        &self,
        event: &str,
        args: impl EventArgs,
    ) -> Result<Vec<ClientError>, ServerError> {
        self.of("").emit(event, args).await
    }

    // --- lifecycle observers -------------------------------------------

    /// Observes every accepted connection.
    pub fn on_open<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle.lock().unwrap().open.set(lifecycle::open_fn(handler), false);
    }

    /// Single-fire variant of [`on_open`](Self::on_open).
    pub fn once_open<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle.lock().unwrap().open.set(lifecycle::open_fn(handler), true);
    }

    /// Observes dispatch and transport errors on any connection.
    pub fn on_error<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, Arc<ServerError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle.lock().unwrap().error.set(lifecycle::error_fn(handler), false);
    }

    /// Single-fire variant of [`on_error`](Self::on_error).
    pub fn once_error<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, Arc<ServerError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle.lock().unwrap().error.set(lifecycle::error_fn(handler), true);
    }

    /// Observes every successfully parsed inbound message, before
    /// dispatch, on any connection.
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle.lock().unwrap().message.set(lifecycle::message_fn(handler), false);
    }

    /// Single-fire variant of [`on_message`](Self::on_message).
    pub fn once_message<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle.lock().unwrap().message.set(lifecycle::message_fn(handler), true);
    }

    /// Observes the close of any connection.
    pub fn on_close<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, StatusCode, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle.lock().unwrap().close.set(lifecycle::close_fn(handler), false);
    }

    /// Single-fire variant of [`on_close`](Self::on_close).
    pub fn once_close<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, StatusCode, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle.lock().unwrap().close.set(lifecycle::close_fn(handler), true);
    }

    // --- internals -----------------------------------------------------

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn register(
        &self,
        channel: &str,
        event: &str,
        handler: Arc<dyn EventHandler>,
        once: bool,
    ) -> Result<(), ServerError> {
        crate::channel::check_event_name(channel, event)?;
        self.handlers
            .lock()
            .unwrap()
            .insert(HandlerKey::new(channel, event), handler, once);
        Ok(())
    }

    pub(crate) fn unregister(&self, channel: &str, event: &str) {
        self.handlers
            .lock()
            .unwrap()
            .remove(&HandlerKey::new(channel, event));
    }

    pub(crate) fn take_handler(&self, key: &HandlerKey) -> Option<Arc<dyn EventHandler>> {
        self.handlers.lock().unwrap().take(key)
    }

    pub(crate) fn forget_client(&self, id: Uuid) {
        self.clients.lock().unwrap().remove(&id);
    }

    /// Allocates a request id and its response rendezvous.
    pub(crate) fn register_pending(
        &self,
        client: Uuid,
    ) -> (i64, oneshot::Receiver<Result<Value, ServerError>>) {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(id, PendingRequest { client, tx });
        (id, rx)
    }

    pub(crate) fn remove_pending(
        &self,
        id: i64,
    ) -> Option<oneshot::Sender<Result<Value, ServerError>>> {
        self.pending.lock().unwrap().remove(&id).map(|p| p.tx)
    }

    /// Fails every pending request issued through the given connection.
    pub(crate) fn fail_pending_for(&self, client: Uuid) {
        let failed: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().unwrap();
            let ids: Vec<i64> = pending
                .iter()
                .filter(|(_, p)| p.client == client)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        for request in failed {
            let _ = request.tx.send(Err(ServerError::ConnectionClosed));
        }
    }

    pub(crate) fn open_observers(&self) -> Vec<Arc<OpenFn>> {
        self.lifecycle.lock().unwrap().open.collect()
    }

    pub(crate) fn error_observers(&self) -> Vec<Arc<ErrorFn>> {
        self.lifecycle.lock().unwrap().error.collect()
    }

    pub(crate) fn message_observers(&self) -> Vec<Arc<MessageFn>> {
        self.lifecycle.lock().unwrap().message.collect()
    }

    pub(crate) fn close_observers(&self) -> Vec<Arc<CloseFn>> {
        self.lifecycle.lock().unwrap().close.collect()
    }
}
