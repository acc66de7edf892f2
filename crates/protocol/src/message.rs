//! The wire message envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::args::{EventArgs, to_raw};
use crate::constants::MAX_LOGGED_ARG_LEN;

/// One unit of transport I/O, JSON-encoded with the ws-wrapper short field
/// names.
///
/// A message is exactly one of:
/// - an event or request: `arguments` non-empty, `arguments[0]` the event
///   name, `request_id` present iff a response is expected;
/// - a response to a prior request: `request_id` present, no arguments,
///   `response_data` or `response_error` carrying the outcome.
///
/// A message that is neither is invalid and is dropped by the router.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// Channel name; empty means the main channel.
    #[serde(rename = "c", default, skip_serializing_if = "String::is_empty")]
    pub channel: String,

    /// Opaque encoded arguments. Element 0 is the event name for
    /// event/request messages.
    #[serde(rename = "a", default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Box<RawValue>>,

    /// Correlation id, present on requests and on their responses.
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,

    /// Payload of a successful response.
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,

    /// Payload of a failed response: a plain string, or a structured
    /// JavaScript `Error` object when [`js_error`](Self::js_error) is set.
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub response_error: Option<Value>,

    /// Marks [`response_error`](Self::response_error) as a JavaScript
    /// `Error`-shaped object with a `message` key.
    #[serde(rename = "_", default, skip_serializing_if = "is_false")]
    pub js_error: bool,

    /// Transport keepalive marker. `Some(false)` means the message must be
    /// ignored by the router (it only exists to keep the connection alive).
    #[serde(rename = "ws-wrapper", default, skip_serializing_if = "Option::is_none")]
    pub ignore_if_false: Option<bool>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Failure modes of [`Message::response`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// The message carries no request id.
    #[error("message is not a response")]
    NotAResponse,

    /// The remote end rejected the request with this message.
    #[error("{0}")]
    Rejected(String),

    /// The error payload is not a plain string.
    #[error("response error is not a string")]
    MalformedError,

    /// The payload was flagged as a JavaScript error but does not have the
    /// expected `{message: string}` shape.
    #[error("response is a malformed JavaScript error: {0}")]
    MalformedJsError(&'static str),
}

impl Message {
    /// Builds an event message. `args` follow the event name on the wire.
    pub fn event(
        channel: impl Into<String>,
        event: &str,
        args: impl EventArgs,
    ) -> Result<Message, serde_json::Error> {
        let mut arguments = vec![to_raw(event)?];
        arguments.extend(args.into_raw()?);
        Ok(Message {
            channel: channel.into(),
            arguments,
            ..Message::default()
        })
    }

    /// Builds a request message with the given correlation id.
    pub fn request(
        channel: impl Into<String>,
        event: &str,
        args: impl EventArgs,
        request_id: i64,
    ) -> Result<Message, serde_json::Error> {
        let mut msg = Message::event(channel, event, args)?;
        msg.request_id = Some(request_id);
        Ok(msg)
    }

    /// Builds a resolved (successful) response. A `Null` payload is
    /// omitted from the wire, matching peers that elide absent data.
    pub fn resolve(request_id: i64, data: Value) -> Message {
        Message {
            request_id: Some(request_id),
            response_data: if data.is_null() { None } else { Some(data) },
            ..Message::default()
        }
    }

    /// Builds a rejected response carrying a plain string error.
    pub fn reject(request_id: i64, error: impl Into<String>) -> Message {
        Message {
            request_id: Some(request_id),
            response_error: Some(Value::String(error.into())),
            ..Message::default()
        }
    }

    /// Returns the event name, or `None` when the message has no
    /// arguments, the first argument is not a JSON string, or the name is
    /// empty. A nameless message is either a response or invalid.
    pub fn event_name(&self) -> Option<String> {
        let first = self.arguments.first()?;
        match serde_json::from_str::<String>(first.get()) {
            Ok(name) if !name.is_empty() => Some(name),
            _ => None,
        }
    }

    /// Returns the arguments destined for the event handler (everything
    /// after the event name).
    pub fn handler_arguments(&self) -> &[Box<RawValue>] {
        if self.arguments.len() < 2 {
            &[]
        } else {
            &self.arguments[1..]
        }
    }

    /// Interprets this message as the response to a prior request.
    ///
    /// Returns the response data on success. A remote rejection surfaces
    /// as [`ResponseError::Rejected`]; payloads that match neither the
    /// plain-string nor the flagged JavaScript error shape surface as the
    /// malformed variants.
    pub fn response(&self) -> Result<Value, ResponseError> {
        if self.request_id.is_none() {
            return Err(ResponseError::NotAResponse);
        }
        let Some(error) = &self.response_error else {
            return Ok(self.response_data.clone().unwrap_or(Value::Null));
        };
        if self.js_error {
            let Value::Object(obj) = error else {
                return Err(ResponseError::MalformedJsError("not an object"));
            };
            return match obj.get("message") {
                Some(Value::String(message)) => Err(ResponseError::Rejected(message.clone())),
                _ => Err(ResponseError::MalformedJsError("message key is not a string")),
            };
        }
        match error {
            Value::String(message) => Err(ResponseError::Rejected(message.clone())),
            _ => Err(ResponseError::MalformedError),
        }
    }

    /// Returns `true` when the keepalive marker says this message must
    /// not be dispatched.
    pub fn is_ignored(&self) -> bool {
        self.ignore_if_false == Some(false)
    }

    /// Compact single-line rendering for logs. Long argument payloads are
    /// truncated.
    pub fn summary(&self) -> String {
        use std::fmt::Write;

        if self.is_ignored() {
            return "(keepalive, ignored)".into();
        }
        if let Some(name) = self.event_name() {
            let mut out = format!("event '{name}'");
            if !self.channel.is_empty() {
                let _ = write!(out, " on channel '{}'", self.channel);
            }
            if let Some(id) = self.request_id {
                let _ = write!(out, " request {id}");
            }
            for (i, arg) in self.handler_arguments().iter().enumerate() {
                let _ = write!(out, " args[{i}]={}", truncate_arg(arg.get()));
            }
            return out;
        }
        match (self.request_id, &self.response_error) {
            (Some(id), Some(error)) => {
                let js = if self.js_error { " (js)" } else { "" };
                format!("response {id} error={error}{js}")
            }
            (Some(id), None) => {
                let data = self
                    .response_data
                    .as_ref()
                    .map(|data| data.to_string())
                    .unwrap_or_else(|| "null".into());
                format!("response {id} data={}", truncate_arg(&data))
            }
            (None, _) => "(invalid)".into(),
        }
    }
}

/// Truncates a rendered argument to [`MAX_LOGGED_ARG_LEN`], respecting
/// UTF-8 boundaries.
fn truncate_arg(raw: &str) -> String {
    if raw.len() <= MAX_LOGGED_ARG_LEN {
        return raw.to_string();
    }
    let mut end = MAX_LOGGED_ARG_LEN - 14;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &raw[..end])
}
