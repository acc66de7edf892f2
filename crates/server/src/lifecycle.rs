//! Lifecycle observer storage.
//!
//! The reserved main-channel events (`open`/`connect`, `error`, `message`,
//! `close`/`disconnect`) have fixed handler shapes, so they are registered
//! through typed methods rather than the dynamic tables. Each owner keeps
//! one persistent and one single-fire slot per event; when an event fires,
//! the connection's observers run before the server's.

use std::future::Future;
use std::sync::Arc;

use wswrap_protocol::{Message, StatusCode};

use crate::client::Client;
use crate::{BoxFuture, ServerError};

pub(crate) type OpenFn = dyn Fn(Arc<Client>) -> BoxFuture<'static, ()> + Send + Sync;
pub(crate) type ErrorFn =
    dyn Fn(Arc<Client>, Arc<ServerError>) -> BoxFuture<'static, ()> + Send + Sync;
pub(crate) type MessageFn = dyn Fn(Arc<Client>, Message) -> BoxFuture<'static, ()> + Send + Sync;
pub(crate) type CloseFn =
    dyn Fn(Arc<Client>, StatusCode, String) -> BoxFuture<'static, ()> + Send + Sync;

pub(crate) struct Slot<T: ?Sized> {
    on: Option<Arc<T>>,
    once: Option<Arc<T>>,
}

impl<T: ?Sized> Default for Slot<T> {
    fn default() -> Self {
        Slot {
            on: None,
            once: None,
        }
    }
}

impl<T: ?Sized> Slot<T> {
    pub fn set(&mut self, handler: Arc<T>, once: bool) {
        if once {
            self.once = Some(handler);
        } else {
            self.on = Some(handler);
        }
    }

    /// Returns the observers to fire: the persistent one, then the
    /// single-fire one (which is taken).
    pub fn collect(&mut self) -> Vec<Arc<T>> {
        let mut out = Vec::new();
        if let Some(handler) = &self.on {
            out.push(Arc::clone(handler));
        }
        if let Some(handler) = self.once.take() {
            out.push(handler);
        }
        out
    }
}

#[derive(Default)]
pub(crate) struct LifecycleTable {
    pub open: Slot<OpenFn>,
    pub error: Slot<ErrorFn>,
    pub message: Slot<MessageFn>,
    pub close: Slot<CloseFn>,
}

pub(crate) fn open_fn<F, Fut>(handler: F) -> Arc<OpenFn>
where
    F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |client| Box::pin(handler(client)))
}

pub(crate) fn error_fn<F, Fut>(handler: F) -> Arc<ErrorFn>
where
    F: Fn(Arc<Client>, Arc<ServerError>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |client, error| Box::pin(handler(client, error)))
}

pub(crate) fn message_fn<F, Fut>(handler: F) -> Arc<MessageFn>
where
    F: Fn(Arc<Client>, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |client, msg| Box::pin(handler(client, msg)))
}

pub(crate) fn close_fn<F, Fut>(handler: F) -> Arc<CloseFn>
where
    F: Fn(Arc<Client>, StatusCode, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |client, status, reason| Box::pin(handler(client, status, reason)))
}
