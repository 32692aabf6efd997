//! Message header and frame types.

use serde::{Deserialize, Serialize};

use crate::Value;

/// Kind of a bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MessageType {
    /// Request expecting a reply unless [`Flags::NO_REPLY_EXPECTED`] is set.
    MethodCall,
    /// Successful reply to a method call.
    MethodReturn,
    /// Error reply to a method call.
    MethodError,
    /// Broadcast notification; never replied to.
    Signal,
}

bitflags::bitflags! {
    /// Header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Flags: u8 {
        /// The sender will not read any reply, success or error.
        const NO_REPLY_EXPECTED = 0x1;
        /// Do not activate the destination to deliver this message.
        const NO_AUTO_START = 0x2;
    }
}

/// Message header fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Header {
    /// Message kind.
    pub kind: MessageType,
    /// Header flags.
    pub flags: Flags,
    /// Sender-assigned serial, non-zero once sealed.
    pub serial: u32,
    /// Serial of the call this message replies to.
    pub reply_serial: Option<u32>,
    /// Object path (calls and signals).
    pub path: Option<String>,
    /// Interface name.
    pub interface: Option<String>,
    /// Member name (calls and signals).
    pub member: Option<String>,
    /// Error name (error replies).
    pub error_name: Option<String>,
    /// Destination bus name.
    pub destination: Option<String>,
    /// Sender bus name, filled in by the bus.
    pub sender: Option<String>,
    /// Signature of the body.
    pub signature: String,
}

impl Header {
    /// Returns an empty header of the given kind.
    pub const fn new(kind: MessageType) -> Self {
        Self {
            kind,
            flags: Flags::empty(),
            serial: 0,
            reply_serial: None,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            destination: None,
            sender: None,
            signature: String::new(),
        }
    }
}

/// A complete message as carried by a stream transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Frame {
    /// Header fields.
    pub header: Header,
    /// Body values, matching `header.signature`.
    pub body: Vec<Value>,
}

impl Frame {
    /// Creates a frame from its parts.
    pub const fn new(header: Header, body: Vec<Value>) -> Self {
        Self { header, body }
    }
}
