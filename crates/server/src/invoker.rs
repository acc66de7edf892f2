//! Typed handler invocation.
//!
//! Handlers are ordinary async functions. [`IntoEventHandler`] validates
//! their shape at registration time — the parameter list must decode from
//! wire arguments, the result must be `Result<impl Serialize, impl Display>`
//! — by making anything else unrepresentable. At dispatch time the erased
//! [`EventHandler`] aligns the wire arguments against the declared
//! parameters: the count is checked before any decoding, then each
//! argument is decoded independently so a mismatch names the offending
//! position.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::value::RawValue;

use crate::BoxFuture;
use crate::client::Client;

/// Failure modes of one handler invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The message carried a different number of arguments than the
    /// handler declares. Checked before any decoding.
    #[error("incorrect number of arguments: expected {expected}, got {got}")]
    CountMismatch { expected: usize, got: usize },

    /// One argument did not decode into the declared parameter type.
    #[error("argument {index} type mismatch: {source}")]
    TypeMismatch {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The handler ran and returned this error.
    #[error("{0}")]
    Handler(String),

    /// The handler's result did not serialize.
    #[error("serializing handler result: {0}")]
    Result(#[source] serde_json::Error),
}

/// An erased, registered handler.
pub trait EventHandler: Send + Sync + 'static {
    /// Decodes `args`, invokes the handler, and returns its serialized
    /// result. The returned future owns everything it needs, so it can be
    /// driven from a spawned task.
    fn call(
        &self,
        caller: Arc<Client>,
        args: &[Box<RawValue>],
    ) -> BoxFuture<'static, Result<Value, InvokeError>>;
}

/// A typed handler taking wire arguments only.
struct PlainFn<F, Args> {
    f: F,
    _marker: std::marker::PhantomData<fn() -> Args>,
}

/// A typed handler whose first parameter is the originating connection.
struct CallerFn<F, Args> {
    f: F,
    _marker: std::marker::PhantomData<fn() -> Args>,
}

/// Marker for handlers whose first parameter is the originating
/// connection. Only used for trait resolution.
pub enum WithCaller {}

/// Marker for handlers taking wire arguments only.
pub enum WithoutCaller {}

/// Conversion of a typed async function into an erased [`EventHandler`].
///
/// Implemented for functions of up to eight decoded parameters, with or
/// without a leading `Arc<Client>` parameter. The marker type `M` only
/// disambiguates the two families during inference.
pub trait IntoEventHandler<M> {
    fn into_event_handler(self) -> Arc<dyn EventHandler>;
}

fn decode<T: DeserializeOwned>(args: &[Box<RawValue>], index: usize) -> Result<T, InvokeError> {
    serde_json::from_str(args[index].get())
        .map_err(|source| InvokeError::TypeMismatch { index, source })
}

fn finish<R: Serialize, E: Display>(result: Result<R, E>) -> Result<Value, InvokeError> {
    match result {
        Ok(value) => serde_json::to_value(value).map_err(InvokeError::Result),
        Err(err) => Err(InvokeError::Handler(err.to_string())),
    }
}

macro_rules! impl_into_event_handler {
    ($count:literal $(, $ty:ident => $idx:tt)*) => {
        impl<F, Fut, R, E $(, $ty)*> EventHandler for PlainFn<F, ($($ty,)*)>
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R, E>> + Send + 'static,
            R: Serialize + 'static,
            E: Display + 'static,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn call(
                &self,
                caller: Arc<Client>,
                args: &[Box<RawValue>],
            ) -> BoxFuture<'static, Result<Value, InvokeError>> {
                if args.len() != $count {
                    let got = args.len();
                    return Box::pin(async move {
                        Err(InvokeError::CountMismatch { expected: $count, got })
                    });
                }
                $(
                    let $ty = match decode::<$ty>(args, $idx) {
                        Ok(value) => value,
                        Err(err) => return Box::pin(async move { Err(err) }),
                    };
                )*
                let fut = (self.f)($($ty),*);
                Box::pin(async move { finish(fut.await) })
            }
        }

        impl<F, Fut, R, E $(, $ty)*> IntoEventHandler<(WithoutCaller, ($($ty,)*))> for F
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R, E>> + Send + 'static,
            R: Serialize + 'static,
            E: Display + 'static,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            fn into_event_handler(self) -> Arc<dyn EventHandler> {
                Arc::new(PlainFn {
                    f: self,
                    _marker: std::marker::PhantomData,
                })
            }
        }

        impl<F, Fut, R, E $(, $ty)*> EventHandler for CallerFn<F, ($($ty,)*)>
        where
            F: Fn(Arc<Client>, $($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R, E>> + Send + 'static,
            R: Serialize + 'static,
            E: Display + 'static,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            #[allow(non_snake_case)]
            fn call(
                &self,
                caller: Arc<Client>,
                args: &[Box<RawValue>],
            ) -> BoxFuture<'static, Result<Value, InvokeError>> {
                if args.len() != $count {
                    let got = args.len();
                    return Box::pin(async move {
                        Err(InvokeError::CountMismatch { expected: $count, got })
                    });
                }
                $(
                    let $ty = match decode::<$ty>(args, $idx) {
                        Ok(value) => value,
                        Err(err) => return Box::pin(async move { Err(err) }),
                    };
                )*
                let fut = (self.f)(caller, $($ty),*);
                Box::pin(async move { finish(fut.await) })
            }
        }

        impl<F, Fut, R, E $(, $ty)*> IntoEventHandler<(WithCaller, ($($ty,)*))> for F
        where
            F: Fn(Arc<Client>, $($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R, E>> + Send + 'static,
            R: Serialize + 'static,
            E: Display + 'static,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            fn into_event_handler(self) -> Arc<dyn EventHandler> {
                Arc::new(CallerFn {
                    f: self,
                    _marker: std::marker::PhantomData,
                })
            }
        }
    };
}

impl_into_event_handler!(0);
impl_into_event_handler!(1, A0 => 0);
impl_into_event_handler!(2, A0 => 0, A1 => 1);
impl_into_event_handler!(3, A0 => 0, A1 => 1, A2 => 2);
impl_into_event_handler!(4, A0 => 0, A1 => 1, A2 => 2, A3 => 3);
impl_into_event_handler!(5, A0 => 0, A1 => 1, A2 => 2, A3 => 3, A4 => 4);
impl_into_event_handler!(6, A0 => 0, A1 => 1, A2 => 2, A3 => 3, A4 => 4, A5 => 5);
impl_into_event_handler!(7, A0 => 0, A1 => 1, A2 => 2, A3 => 3, A4 => 4, A5 => 5, A6 => 6);
impl_into_event_handler!(8, A0 => 0, A1 => 1, A2 => 2, A3 => 3, A4 => 4, A5 => 5, A6 => 6, A7 => 7);
