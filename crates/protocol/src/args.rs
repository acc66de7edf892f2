//! Encoding of event arguments into wire form.

use serde::Serialize;
use serde_json::value::RawValue;

/// Serializes one value into a raw wire argument.
pub(crate) fn to_raw<T: Serialize + ?Sized>(
    value: &T,
) -> Result<Box<RawValue>, serde_json::Error> {
    RawValue::from_string(serde_json::to_string(value)?)
}

/// A set of event arguments, encoded positionally after the event name.
///
/// Implemented for tuples up to eight elements and for
/// `Vec<serde_json::Value>`; each element is serialized independently so
/// the router never has to understand the payloads it forwards.
///
/// ```
/// use wswrap_protocol::Message;
///
/// let msg = Message::event("", "say", ("hello", 3)).unwrap();
/// assert_eq!(msg.arguments.len(), 3); // event name + 2 arguments
/// ```
pub trait EventArgs {
    /// Encodes the arguments into raw wire values.
    fn into_raw(self) -> Result<Vec<Box<RawValue>>, serde_json::Error>;
}

impl EventArgs for () {
    fn into_raw(self) -> Result<Vec<Box<RawValue>>, serde_json::Error> {
        Ok(Vec::new())
    }
}

impl EventArgs for Vec<serde_json::Value> {
    fn into_raw(self) -> Result<Vec<Box<RawValue>>, serde_json::Error> {
        self.iter().map(to_raw).collect()
    }
}

macro_rules! impl_event_args {
    ($($ty:ident => $idx:tt),+) => {
        impl<$($ty: Serialize),+> EventArgs for ($($ty,)+) {
            fn into_raw(self) -> Result<Vec<Box<RawValue>>, serde_json::Error> {
                Ok(vec![$(to_raw(&self.$idx)?),+])
            }
        }
    };
}

impl_event_args!(A => 0);
impl_event_args!(A => 0, B => 1);
impl_event_args!(A => 0, B => 1, C => 2);
impl_event_args!(A => 0, B => 1, C => 2, D => 3);
impl_event_args!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_event_args!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
impl_event_args!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6);
impl_event_args!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5, G => 6, H => 7);
