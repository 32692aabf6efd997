//! Message model for the rbus message-bus client.
//!
//! Defines tagged wire values, the type-signature grammar, bus name
//! syntax and the message header. Frames are serialized with
//! [`postcard`] behind a one-byte protocol version and a 4-byte
//! big-endian length prefix, suitable for any reliable byte stream.

mod codec;
mod message;
pub mod names;
pub mod signature;
mod value;

pub use codec::{MAX_FRAME, PROTOCOL_VERSION, read_frame, write_frame};
pub use message::{Flags, Frame, Header, MessageType};
pub use value::{Trivial, Value, signature_of};
