//! Protocol-wide constants.

/// Name of the main (default) channel.
///
/// The main channel is the only channel on which the reserved lifecycle
/// event names apply.
pub const MAIN_CHANNEL: &str = "";

/// Maximum size of a single wire message in bytes.
///
/// Transports should refuse frames larger than this before handing them
/// to the router.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Longest argument rendering emitted by [`Message::summary`], in bytes.
///
/// [`Message::summary`]: crate::Message::summary
pub const MAX_LOGGED_ARG_LEN: usize = 1024;
