//! Wire protocol types for the ws-wrapper multiplexing layer.
//!
//! A single WebSocket (or any duplex message stream) is multiplexed into
//! named channels carrying fire-and-forget events and correlated
//! request/response calls. This crate owns the on-wire JSON shape and
//! nothing else: the [`Message`] envelope with its short field names,
//! argument encoding, close status codes, and the reserved event names of
//! the main channel.
//!
//! The format is bit-compatible with the ws-wrapper JavaScript peers; see
//! <https://github.com/bminer/ws-wrapper#protocol>.

mod args;
mod events;
mod message;
mod status;

pub mod constants;

pub use args::EventArgs;
pub use events::{
    EVENT_CLOSE, EVENT_CONNECT, EVENT_DISCONNECT, EVENT_ERROR, EVENT_MESSAGE, EVENT_OPEN,
    is_reserved_event,
};
pub use message::{Message, ResponseError};
pub use status::StatusCode;
