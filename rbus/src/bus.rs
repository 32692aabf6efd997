//! Bus connection handle, transport seam and configuration.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use rbus_proto::{Frame, MessageType, names};

use crate::creds::{Creds, CredsSource, SystemCreds};
use crate::error::{Error, Result};
use crate::generation;
use crate::message::Message;
use crate::validate;

/// Default method call timeout.
pub const DEFAULT_METHOD_TIMEOUT: Duration = Duration::from_secs(25);

/// The send/call primitive a [`Bus`] dispatches through.
///
/// Implementations own whatever locking their underlying channel needs;
/// the bus itself holds no locks.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Queues `frame` for delivery without waiting for a reply.
    fn send(&self, frame: &Frame) -> Result<()>;

    /// Sends a method call and blocks until the correlated reply arrives
    /// or `timeout` elapses ([`Error::Timeout`]).
    ///
    /// Error replies are returned as frames, not as `Err`.
    fn call(&self, frame: &Frame, timeout: Duration) -> Result<Frame>;

    /// Blocks until the next incoming frame.
    fn receive(&self) -> Result<Frame> {
        Err(Error::NotSupported("receive"))
    }

    /// Credentials of the process on the other end of the transport.
    fn peer_credentials(&self) -> Result<Creds> {
        Err(Error::NotSupported("peer credentials"))
    }
}

/// Lifecycle state of a bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BusState {
    /// Connected and usable.
    Running,
    /// Closed by [`Bus::close`]; every operation fails.
    Closed,
}

/// Shared state behind a [`Bus`] handle.
#[derive(Debug)]
struct Inner {
    /// Send/call primitive.
    transport: Box<dyn Transport>,
    /// Credential store used by sender credential queries.
    creds: Box<dyn CredsSource>,
    /// Process generation captured at creation.
    generation: u64,
    /// Set once by [`Bus::close`].
    closed: AtomicBool,
    /// Last serial handed out.
    serial: AtomicU32,
    /// Our unique name on the bus, if assigned.
    unique_name: Option<String>,
    /// Timeout for blocking calls.
    method_timeout: Duration,
}

/// A handle to a bus connection.
///
/// Cloning is cheap and yields another handle to the same connection.
/// Messages built on or received from a bus keep a handle to it so
/// replies can be sent from the message alone.
#[derive(Debug, Clone)]
pub struct Bus {
    /// Shared connection state.
    inner: Arc<Inner>,
}

impl Bus {
    /// Returns a builder for configuring a bus connection.
    pub fn builder() -> BusBuilder {
        BusBuilder::default()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BusState {
        if self.inner.closed.load(Ordering::Acquire) {
            BusState::Closed
        } else {
            BusState::Running
        }
    }

    /// Returns `true` while the connection is usable.
    pub fn is_open(&self) -> bool {
        self.state() == BusState::Running
    }

    /// Closes the connection. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("bus closed");
        }
    }

    /// Process generation captured when the bus was built.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Returns `true` if the bus was created by another process generation.
    pub fn is_stale(&self) -> bool {
        self.inner.generation != generation::current()
    }

    /// Our unique name on the bus, if one was assigned.
    pub fn unique_name(&self) -> Option<&str> {
        self.inner.unique_name.as_deref()
    }

    /// Timeout applied to blocking calls without an explicit one.
    pub fn method_timeout(&self) -> Duration {
        self.inner.method_timeout
    }

    /// The transport carrying this connection.
    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    /// Where sender credentials are looked up.
    pub(crate) fn creds_source(&self) -> &dyn CredsSource {
        self.inner.creds.as_ref()
    }

    /// Allocates the next non-zero serial.
    fn next_serial(&self) -> u32 {
        loop {
            let serial = self
                .inner
                .serial
                .fetch_add(1, Ordering::Relaxed)
                .wrapping_add(1);
            if serial != 0 {
                return serial;
            }
        }
    }

    /// Stamps our unique name as sender, unless one is set, and seals.
    fn seal(&self, message: &mut Message) -> Result<()> {
        if message.is_sealed() {
            return Ok(());
        }
        if let Some(name) = self.unique_name().filter(|_| message.sender().is_none()) {
            message.set_sender(name)?;
        }
        message.seal(self.next_serial())
    }

    /// Seals `message` if needed and hands it to the transport without
    /// waiting for a reply. Returns the message serial.
    ///
    /// Unsealed messages without a sender carry [`Bus::unique_name`].
    pub fn send(&self, mut message: Message) -> Result<u32> {
        validate::bus_usable(self)?;
        self.seal(&mut message)?;
        tracing::debug!(
            serial = message.serial(),
            kind = ?message.kind(),
            member = ?message.member(),
            "send"
        );
        self.transport().send(message.frame())?;
        Ok(message.serial())
    }

    /// Sends a method call and blocks for its reply.
    ///
    /// `timeout` defaults to [`Bus::method_timeout`]. An error reply is
    /// returned as [`Error::Remote`].
    pub fn call(&self, mut message: Message, timeout: Option<Duration>) -> Result<Message> {
        validate::bus_usable(self)?;
        if message.kind() != MessageType::MethodCall {
            return Err(Error::InvalidArgument("only method calls can be awaited"));
        }
        if message.no_reply_expected() {
            return Err(Error::InvalidArgument("call expects no reply"));
        }
        self.seal(&mut message)?;
        let serial = message.serial();
        tracing::debug!(
            serial,
            destination = ?message.destination(),
            member = ?message.member(),
            "call"
        );

        let frame = self
            .transport()
            .call(message.frame(), timeout.unwrap_or(self.inner.method_timeout))?;
        drop(message);

        if frame.header.reply_serial != Some(serial) {
            return Err(Error::Protocol(format!(
                "reply serial {:?} does not match call serial {serial}",
                frame.header.reply_serial
            )));
        }
        let reply = Message::received(Some(self.clone()), frame, None)?;
        match reply.kind() {
            MessageType::MethodReturn => Ok(reply),
            MessageType::MethodError => {
                let error = reply.error().unwrap_or_default();
                tracing::debug!(serial, %error, "call failed");
                Err(Error::Remote(error))
            }
            other => Err(Error::Protocol(format!("unexpected {other:?} in reply"))),
        }
    }

    /// Blocks until the next incoming message.
    pub fn receive(&self) -> Result<Message> {
        validate::bus_usable(self)?;
        let frame = self.transport().receive()?;
        Message::received(Some(self.clone()), frame, None)
    }
}

/// Builder for a [`Bus`] connection.
///
/// Defaults: [`SystemCreds`] credential lookups, no unique name,
/// [`DEFAULT_METHOD_TIMEOUT`]. A transport is required.
#[derive(Debug, Default)]
#[must_use = "a BusBuilder does nothing until .build() is called"]
pub struct BusBuilder {
    /// Send/call primitive.
    transport: Option<Box<dyn Transport>>,
    /// Credential store override.
    creds: Option<Box<dyn CredsSource>>,
    /// Unique name assigned by the bus.
    unique_name: Option<String>,
    /// Timeout for blocking calls.
    method_timeout: Option<Duration>,
    /// Generation override for tests.
    #[cfg(test)]
    generation: Option<u64>,
}

impl BusBuilder {
    /// Sets the transport (required).
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Replaces the credential store used by sender credential queries.
    pub fn creds_source(mut self, source: impl CredsSource + 'static) -> Self {
        self.creds = Some(Box::new(source));
        self
    }

    /// Sets the unique name the bus assigned to this connection.
    pub fn unique_name(mut self, name: impl Into<String>) -> Self {
        self.unique_name = Some(name.into());
        self
    }

    /// Sets the default timeout for blocking calls (default: 25 s).
    pub const fn method_timeout(mut self, timeout: Duration) -> Self {
        self.method_timeout = Some(timeout);
        self
    }

    /// Pretends the bus was built by another process generation.
    #[cfg(test)]
    pub(crate) const fn generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Validates the configuration and returns the connection handle.
    pub fn build(self) -> Result<Bus> {
        let transport = self
            .transport
            .ok_or(Error::InvalidArgument("a transport is required"))?;
        if let Some(name) = &self.unique_name {
            if !name.starts_with(':') || !names::service_name_is_valid(name) {
                return Err(Error::InvalidArgument("unique name must look like :1.42"));
            }
        }
        let method_timeout = self.method_timeout.unwrap_or(DEFAULT_METHOD_TIMEOUT);
        if method_timeout.is_zero() {
            return Err(Error::InvalidArgument("method timeout must be non-zero"));
        }

        generation::install_fork_hook();
        #[cfg(test)]
        let generation = self.generation.unwrap_or_else(generation::current);
        #[cfg(not(test))]
        let generation = generation::current();

        Ok(Bus {
            inner: Arc::new(Inner {
                transport,
                creds: self.creds.unwrap_or_else(|| Box::new(SystemCreds::default())),
                generation,
                closed: AtomicBool::new(false),
                serial: AtomicU32::new(0),
                unique_name: self.unique_name,
                method_timeout,
            }),
        })
    }
}
