//! WebSocket close status codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A close status code, as defined by RFC 6455 section 7.4.
///
/// Only the codes the router itself uses are named; any other code can be
/// carried through the newtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// Normal closure; the session completed.
    pub const NORMAL_CLOSURE: StatusCode = StatusCode(1000);
    /// The endpoint is going away (server shutdown).
    pub const GOING_AWAY: StatusCode = StatusCode(1001);
    /// A protocol error terminated the connection.
    pub const PROTOCOL_ERROR: StatusCode = StatusCode(1002);
    /// The endpoint hit an unexpected internal condition.
    pub const INTERNAL_ERROR: StatusCode = StatusCode(1011);
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_u16() {
        let code: StatusCode = 1002.into();
        assert_eq!(code, StatusCode::PROTOCOL_ERROR);
        assert_eq!(u16::from(code), 1002);
        assert_eq!(code.to_string(), "1002");
    }
}
