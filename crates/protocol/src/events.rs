//! Reserved event names of the main channel.

/// Fires when a connection is accepted. Alias of [`EVENT_CONNECT`].
pub const EVENT_OPEN: &str = "open";
/// Fires when a connection is accepted. Alias of [`EVENT_OPEN`].
pub const EVENT_CONNECT: &str = "connect";
/// Fires on any dispatch or transport error.
pub const EVENT_ERROR: &str = "error";
/// Fires for every successfully parsed inbound message, before dispatch.
pub const EVENT_MESSAGE: &str = "message";
/// Fires once per connection close. Alias of [`EVENT_DISCONNECT`].
pub const EVENT_CLOSE: &str = "close";
/// Fires once per connection close. Alias of [`EVENT_CLOSE`].
pub const EVENT_DISCONNECT: &str = "disconnect";

/// Returns `true` if `event` is one of the reserved main-channel event
/// names. Reserved names may not be registered, emitted, or requested on
/// the main channel; on named channels they are ordinary events.
pub fn is_reserved_event(event: &str) -> bool {
    matches!(
        event,
        EVENT_OPEN | EVENT_CONNECT | EVENT_ERROR | EVENT_MESSAGE | EVENT_CLOSE | EVENT_DISCONNECT
    )
}
