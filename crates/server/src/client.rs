//! One accepted connection.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use serde_json::value::RawValue;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use wswrap_protocol::{EventArgs, Message, ResponseError, StatusCode};

use crate::channel::{ClientChannel, check_event_name};
use crate::invoker::EventHandler;
use crate::lifecycle::{self, LifecycleTable};
use crate::server::Server;
use crate::table::{HandlerKey, HandlerTable};
use crate::{Conn, ConnError, ServerError};

/// One connection accepted by a [`Server`].
///
/// Owns the transport, the connection-scoped handler tables, a small
/// key/value store for application state, and the read loop driving
/// dispatch. Connection-scoped handlers shadow server-wide ones for
/// traffic on this connection.
///
/// Closing is idempotent: the first [`close`](Self::close) wins, later
/// calls are no-ops. After close, every send fails fast and outstanding
/// requests issued through this connection resolve with
/// [`ServerError::ConnectionClosed`].
pub struct Client {
    id: Uuid,
    conn: Box<dyn Conn>,
    server: Weak<Server>,
    /// Clients only ever live inside an `Arc`; set by the constructor.
    weak_self: Weak<Client>,
    handlers: Mutex<HandlerTable>,
    lifecycle: Mutex<LifecycleTable>,
    data: Mutex<HashMap<String, Value>>,
    /// Serializes writers; the transport forbids concurrent writes.
    write_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(conn: Box<dyn Conn>, server: &Arc<Server>) -> Arc<Client> {
        Arc::new_cyclic(|weak_self| Client {
            id: Uuid::new_v4(),
            conn,
            server: Arc::downgrade(server),
            weak_self: weak_self.clone(),
            handlers: Mutex::new(HandlerTable::default()),
            lifecycle: Mutex::new(LifecycleTable::default()),
            data: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
            cancel: server.cancel_token().child_token(),
            closed: AtomicBool::new(false),
        })
    }

    fn strong(&self) -> Arc<Client> {
        self.weak_self
            .upgrade()
            .expect("client dropped while a method is running")
    }

    /// The connection's unique id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the connection has begun closing.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns a view of the named channel on this connection.
    pub fn of(&self, name: impl Into<String>) -> ClientChannel {
        ClientChannel::new(name.into(), self.strong())
    }

    // --- main-channel conveniences -------------------------------------

    /// Registers a main-channel handler for this connection.
    /// See [`ClientChannel::on`].
    pub fn on<M>(
        &self,
        event: &str,
        handler: impl crate::IntoEventHandler<M>,
    ) -> Result<(), ServerError> {
        self.register("", event, handler.into_event_handler(), false)
    }

    /// Registers a single-fire main-channel handler for this connection.
    pub fn once<M>(
        &self,
        event: &str,
        handler: impl crate::IntoEventHandler<M>,
    ) -> Result<(), ServerError> {
        self.register("", event, handler.into_event_handler(), true)
    }

    /// Removes a main-channel handler.
    pub fn off(&self, event: &str) {
        self.unregister("", event);
    }

    /// Emits a main-channel event to this connection.
    pub async fn emit(&self, event: &str, args: impl EventArgs) -> Result<(), ServerError> {
        check_event_name("", event)?;
        let msg = Message::event("", event, args)?;
        self.write(&msg).await.map_err(ServerError::from)
    }

    /// Sends a main-channel request to this connection.
    /// See [`ClientChannel::request`].
    pub async fn request(
        &self,
        event: &str,
        args: impl EventArgs,
    ) -> Result<Value, ServerError> {
        self.send_request("", event, args).await
    }

    /// Main-channel variant of [`ClientChannel::request_timeout`].
    pub async fn request_timeout(
        &self,
        event: &str,
        args: impl EventArgs,
        timeout: Duration,
    ) -> Result<Value, ServerError> {
        self.send_request_timeout("", event, args, timeout).await
    }

    /// Main-channel variant of [`ClientChannel::request_cancellable`].
    pub async fn request_cancellable(
        &self,
        event: &str,
        args: impl EventArgs,
        cancel: &CancellationToken,
    ) -> Result<Value, ServerError> {
        self.send_request_cancellable("", event, args, cancel).await
    }

    // --- application data store ----------------------------------------

    /// Returns the application data stored at `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().unwrap().get(key).cloned()
    }

    /// Stores application data at `key`.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.data.lock().unwrap().insert(key.into(), value);
    }

    /// Removes the application data stored at `key`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.lock().unwrap().remove(key)
    }

    // --- lifecycle observers -------------------------------------------

    /// Observes errors on this connection.
    pub fn on_error<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, Arc<ServerError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle
            .lock()
            .unwrap()
            .error
            .set(lifecycle::error_fn(handler), false);
    }

    /// Single-fire variant of [`on_error`](Self::on_error).
    pub fn once_error<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, Arc<ServerError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle
            .lock()
            .unwrap()
            .error
            .set(lifecycle::error_fn(handler), true);
    }

    /// Observes every successfully parsed inbound message on this
    /// connection, before dispatch. Observational only.
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle
            .lock()
            .unwrap()
            .message
            .set(lifecycle::message_fn(handler), false);
    }

    /// Single-fire variant of [`on_message`](Self::on_message).
    pub fn once_message<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle
            .lock()
            .unwrap()
            .message
            .set(lifecycle::message_fn(handler), true);
    }

    /// Observes the close of this connection, with its status and reason.
    pub fn on_close<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, StatusCode, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle
            .lock()
            .unwrap()
            .close
            .set(lifecycle::close_fn(handler), false);
    }

    /// Single-fire variant of [`on_close`](Self::on_close).
    pub fn once_close<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Client>, StatusCode, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.lifecycle
            .lock()
            .unwrap()
            .close
            .set(lifecycle::close_fn(handler), true);
    }

    // --- registration internals ----------------------------------------

    pub(crate) fn register(
        &self,
        channel: &str,
        event: &str,
        handler: Arc<dyn EventHandler>,
        once: bool,
    ) -> Result<(), ServerError> {
        check_event_name(channel, event)?;
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

    // --- outbound ------------------------------------------------------

    /// Writes one message, serialized against concurrent writers. Fails
    /// fast once the connection is closed.
    pub(crate) async fn write(&self, msg: &Message) -> Result<(), ConnError> {
        if self.is_closed() {
            return Err(ConnError::Closed);
        }
        let _guard = self.write_lock.lock().await;
        tokio::select! {
            biased;
            res = self.conn.write_message(msg) => res,
            _ = self.cancel.cancelled() => Err(ConnError::Closed),
        }
    }

    /// Allocates a pending request, writes the request message, and
    /// returns the rendezvous to await.
    async fn start_request(
        &self,
        channel: &str,
        event: &str,
        args: impl EventArgs,
    ) -> Result<
        (
            i64,
            oneshot::Receiver<Result<Value, ServerError>>,
            Arc<Server>,
        ),
        ServerError,
    > {
        check_event_name(channel, event)?;
        if self.is_closed() {
            return Err(ServerError::ConnectionClosed);
        }
        let server = self.server.upgrade().ok_or(ServerError::ServerClosed)?;
        if server.is_closed() {
            return Err(ServerError::ServerClosed);
        }
        let (id, rx) = server.register_pending(self.id);
        let msg = Message::request(channel, event, args, id)?;
        if let Err(err) = self.write(&msg).await {
            let _ = server.remove_pending(id);
            return Err(err.into());
        }
        Ok((id, rx, server))
    }

    pub(crate) async fn send_request(
        &self,
        channel: &str,
        event: &str,
        args: impl EventArgs,
    ) -> Result<Value, ServerError> {
        let (_id, rx, _server) = self.start_request(channel, event, args).await?;
        tokio::select! {
            biased;
            res = rx => res.unwrap_or(Err(ServerError::ConnectionClosed)),
            _ = self.cancel.cancelled() => Err(ServerError::ConnectionClosed),
        }
    }

    pub(crate) async fn send_request_timeout(
        &self,
        channel: &str,
        event: &str,
        args: impl EventArgs,
        timeout: Duration,
    ) -> Result<Value, ServerError> {
        let (id, rx, server) = self.start_request(channel, event, args).await?;
        tokio::select! {
            biased;
            res = rx => res.unwrap_or(Err(ServerError::ConnectionClosed)),
            _ = self.cancel.cancelled() => Err(ServerError::ConnectionClosed),
            _ = tokio::time::sleep(timeout) => {
                let _ = server.remove_pending(id);
                Err(ServerError::RequestTimeout)
            }
        }
    }

    pub(crate) async fn send_request_cancellable(
        &self,
        channel: &str,
        event: &str,
        args: impl EventArgs,
        cancel: &CancellationToken,
    ) -> Result<Value, ServerError> {
        let (id, rx, server) = self.start_request(channel, event, args).await?;
        tokio::select! {
            biased;
            res = rx => res.unwrap_or(Err(ServerError::ConnectionClosed)),
            _ = self.cancel.cancelled() => Err(ServerError::ConnectionClosed),
            _ = cancel.cancelled() => {
                let _ = server.remove_pending(id);
                Err(ServerError::RequestCancelled)
            }
        }
    }

    // --- close ---------------------------------------------------------

    /// Closes the connection: removes it from the server's live set,
    /// fails its outstanding requests, notifies close observers, and
    /// performs the transport close handshake. Idempotent; a second call
    /// is a no-op returning `Ok`.
    pub async fn close(&self, status: StatusCode, reason: &str) -> Result<(), ServerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(client = %self.id, %status, reason, "closing connection");
        self.cancel.cancel();
        if let Some(server) = self.server.upgrade() {
            server.forget_client(self.id);
            server.fail_pending_for(self.id);
        }
        self.fire_close(status, reason).await;
        let result = self.conn.close(status, reason).await;
        if result.is_err() {
            let _ = self.conn.close_now().await;
        }
        result.map_err(ServerError::from)
    }

    // --- inbound -------------------------------------------------------

    /// The connection's read loop: one task per connection, reading and
    /// dispatching messages in arrival order until close or transport
    /// failure.
    pub(crate) async fn read_loop(self: Arc<Self>) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                res = self.conn.read_message() => match res {
                    Ok(msg) => msg,
                    Err(err) => {
                        if self.is_closed() {
                            break;
                        }
                        let err = Arc::new(ServerError::Transport(err));
                        warn!(client = %self.id, error = %err, "read failed, closing connection");
                        self.fire_error(Arc::clone(&err)).await;
                        let reason = err.to_string();
                        if let Err(close_err) =
                            self.close(StatusCode::PROTOCOL_ERROR, &reason).await
                        {
                            debug!(client = %self.id, error = %close_err, "close after read failure");
                        }
                        break;
                    }
                },
            };
            trace!(client = %self.id, msg = %msg.summary(), "inbound message");
            self.fire_message(msg.clone()).await;
            if msg.is_ignored() {
                continue;
            }
            self.dispatch(msg).await;
        }
    }

    async fn dispatch(&self, msg: Message) {
        if let Some(event) = msg.event_name() {
            self.dispatch_event(event, msg).await;
        } else if let Some(id) = msg.request_id {
            self.deliver_response(id, &msg);
        }
        // Neither an event name nor a request id: invalid, dropped.
    }

    async fn dispatch_event(&self, event: String, msg: Message) {
        let key = HandlerKey::new(msg.channel.as_str(), event.as_str());
        let handler = {
            let local = self.handlers.lock().unwrap().take(&key);
            local.or_else(|| self.server.upgrade().and_then(|s| s.take_handler(&key)))
        };
        let Some(handler) = handler else {
            let error = if msg.channel.is_empty() {
                format!("no event listener for '{event}'")
            } else {
                format!("no event listener for '{event}' on channel '{}'", msg.channel)
            };
            match msg.request_id {
                Some(id) => {
                    debug!(client = %self.id, %event, "rejecting request with no listener");
                    if let Err(err) = self.write(&Message::reject(id, error)).await {
                        debug!(client = %self.id, error = %err, "dropping rejection");
                    }
                }
                None => trace!(client = %self.id, %event, "dropping event with no listener"),
            }
            return;
        };

        let client = self.strong();
        let args: Vec<Box<RawValue>> = msg.handler_arguments().to_vec();
        let request_id = msg.request_id;
        // The invocation runs in its own task so a handler may emit or
        // request on this same connection without stalling the read loop.
        tokio::spawn(async move {
            match handler.call(Arc::clone(&client), &args).await {
                Ok(result) => {
                    if let Some(id) = request_id {
                        if let Err(err) = client.write(&Message::resolve(id, result)).await {
                            debug!(client = %client.id, error = %err, "dropping resolution");
                        }
                    }
                    // Without a request id the result is discarded.
                }
                Err(err) => {
                    let err = Arc::new(ServerError::Invoke(err));
                    client.fire_error(Arc::clone(&err)).await;
                    if let Some(id) = request_id {
                        if let Err(write_err) =
                            client.write(&Message::reject(id, err.to_string())).await
                        {
                            debug!(client = %client.id, error = %write_err, "dropping rejection");
                        }
                    }
                }
            }
        });
    }

    /// Routes a response message to its pending request. Unknown ids are
    /// dropped: the request was already resolved or never existed.
    fn deliver_response(&self, id: i64, msg: &Message) {
        let Some(server) = self.server.upgrade() else {
            return;
        };
        let Some(pending) = server.remove_pending(id) else {
            trace!(client = %self.id, request = id, "dropping response for unknown request");
            return;
        };
        let outcome = match msg.response() {
            Ok(value) => Ok(value),
            Err(ResponseError::Rejected(message)) => Err(ServerError::Rejected(message)),
            Err(err) => Err(ServerError::MalformedResponse(err)),
        };
        // The waiter may have timed out; delivery failure is fine.
        let _ = pending.send(outcome);
    }

    // --- observer firing -----------------------------------------------

    pub(crate) async fn fire_open(&self) {
        let observers = {
            let mut observers = self.lifecycle.lock().unwrap().open.collect();
            if let Some(server) = self.server.upgrade() {
                observers.extend(server.open_observers());
            }
            observers
        };
        if observers.is_empty() {
            return;
        }
        let me = self.strong();
        for observer in observers {
            observer(Arc::clone(&me)).await;
        }
    }

    pub(crate) async fn fire_error(&self, error: Arc<ServerError>) {
        let observers = {
            let mut observers = self.lifecycle.lock().unwrap().error.collect();
            if let Some(server) = self.server.upgrade() {
                observers.extend(server.error_observers());
            }
            observers
        };
        if observers.is_empty() {
            return;
        }
        let me = self.strong();
        for observer in observers {
            observer(Arc::clone(&me), Arc::clone(&error)).await;
        }
    }

    async fn fire_message(&self, msg: Message) {
        let observers = {
            let mut observers = self.lifecycle.lock().unwrap().message.collect();
            if let Some(server) = self.server.upgrade() {
                observers.extend(server.message_observers());
            }
            observers
        };
        if observers.is_empty() {
            return;
        }
        let me = self.strong();
        for observer in observers {
            observer(Arc::clone(&me), msg.clone()).await;
        }
    }

    async fn fire_close(&self, status: StatusCode, reason: &str) {
        let observers = {
            let mut observers = self.lifecycle.lock().unwrap().close.collect();
            if let Some(server) = self.server.upgrade() {
                observers.extend(server.close_observers());
            }
            observers
        };
        if observers.is_empty() {
            return;
        }
        let me = self.strong();
        for observer in observers {
            observer(Arc::clone(&me), status, reason.to_string()).await;
        }
    }
}
