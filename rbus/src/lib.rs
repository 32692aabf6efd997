//! Convenience layer for a D-Bus style message bus.
//!
//! `rbus` turns the common bus interactions into single calls: emitting
//! signals, calling methods, replying to calls with a return value or
//! an error, reading and writing remote properties and learning who
//! sent a message. Every operation validates its arguments before a
//! message is built, and a bus inherited across `fork(2)` refuses to be
//! used.
//!
//! # Quick start
//!
//! ```no_run
//! use rbus::{Bus, StreamTransport};
//!
//! let bus = Bus::builder()
//!     .transport(StreamTransport::connect("/run/rbus/socket")?)
//!     .build()?;
//!
//! let version: String = bus.get_property_string(
//!     Some("org.example.Service"),
//!     "/org/example/Service",
//!     "org.example.Service",
//!     "Version",
//! )?;
//! bus.emit_signal("/org/example/App", "org.example.App", "Started", "s", &[version.into()])?;
//! # Ok::<(), rbus::Error>(())
//! ```
//!
//! Replying from a handler only needs the received message:
//!
//! ```no_run
//! # fn handle(call: &rbus::Message) -> rbus::Result<()> {
//! match call.member() {
//!     Some("Ping") => call.reply_return("s", &["pong".into()]),
//!     _ => call.reply_errno(libc::ENOSYS, None),
//! }
//! # }
//! ```

mod bus;
mod bus_error;
mod convenience;
mod creds;
mod error;
pub mod generation;
mod message;
#[cfg(test)]
mod mock;
mod procfs;
mod properties;
mod resolver;
mod transport;
mod validate;

pub use bus::{Bus, BusBuilder, BusState, DEFAULT_METHOD_TIMEOUT, Transport};
pub use bus_error::{BusError, errno_to_name, name_to_errno, names as error_names};
pub use creds::{Creds, CredsMask, CredsSource, SystemCreds};
pub use error::{Error, Result};
pub use message::{ContainerKind, Message};
pub use procfs::ProcFs;
pub use rbus_proto::{Flags, Frame, Header, MessageType, Trivial, Value, names, signature};
pub use transport::StreamTransport;
