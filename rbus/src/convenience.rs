//! Signals, method calls and replies.
//!
//! Each operation validates its preconditions, builds one message,
//! marshals the payload and hands the message to the transport. A
//! failure at any step drops the message unsent.

use std::fmt;

use rbus_proto::Value;

use crate::bus::Bus;
use crate::bus_error::BusError;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::validate;

impl Bus {
    /// Emits a signal. Does not wait for anything.
    pub fn emit_signal(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        signature: &str,
        values: &[Value],
    ) -> Result<()> {
        validate::bus_usable(self)?;
        let mut m = Message::new_signal(self, path, interface, member)?;
        m.append(signature, values)?;
        self.send(m).map(drop)
    }

    /// Calls a method and blocks for the reply.
    ///
    /// An error reply is returned as [`Error::Remote`]; no reply within
    /// [`Bus::method_timeout`] as [`Error::Timeout`].
    pub fn call_method(
        &self,
        destination: Option<&str>,
        path: &str,
        interface: Option<&str>,
        member: &str,
        signature: &str,
        values: &[Value],
    ) -> Result<Message> {
        validate::bus_usable(self)?;
        let mut m = Message::new_method_call(self, destination, path, interface, member)?;
        m.append(signature, values)?;
        self.call(m, None)
    }
}

impl Message {
    /// Common checks for every reply; `Ok(None)` means the caller asked
    /// for no reply and nothing must be sent.
    fn reply_target(&self) -> Result<Option<&Bus>> {
        validate::method_call(self)?;
        let bus = validate::received(self)?;
        if self.no_reply_expected() {
            tracing::trace!(serial = self.serial(), "no reply expected; reply suppressed");
            return Ok(None);
        }
        Ok(Some(bus))
    }

    /// Replies to this call with a successful return.
    pub fn reply_return(&self, signature: &str, values: &[Value]) -> Result<()> {
        let Some(bus) = self.reply_target()? else {
            return Ok(());
        };
        let mut m = Self::new_method_return(self)?;
        m.append(signature, values)?;
        bus.send(m).map(drop)
    }

    /// Replies to this call with `error`, which must be set.
    pub fn reply_error(&self, error: &BusError) -> Result<()> {
        validate::method_call(self)?;
        if !error.is_set() {
            return Err(Error::InvalidArgument("error is not set"));
        }
        let Some(bus) = self.reply_target()? else {
            return Ok(());
        };
        tracing::debug!(serial = self.serial(), %error, "replying with error");
        bus.send(Self::new_method_error(self, error)?).map(drop)
    }

    /// Replies with an error named `name` and a formatted message.
    ///
    /// ```no_run
    /// # fn f(call: &rbus::Message) -> rbus::Result<()> {
    /// call.reply_errorf("org.example.Error.NoSuchUnit", format_args!("unit {} not loaded", "foo"))
    /// # }
    /// ```
    pub fn reply_errorf(&self, name: &str, args: fmt::Arguments<'_>) -> Result<()> {
        if self.reply_target()?.is_none() {
            return Ok(());
        }
        self.reply_error(&BusError::from_fmt(name, args))
    }

    /// Replies with an error derived from `errno`, unless `error` is set,
    /// in which case that error is sent verbatim.
    pub fn reply_errno(&self, errno: i32, error: Option<&BusError>) -> Result<()> {
        if self.reply_target()?.is_none() {
            return Ok(());
        }
        match error {
            Some(e) if e.is_set() => self.reply_error(e),
            _ => self.reply_error(&BusError::from_errno(errno)),
        }
    }

    /// Replies with an error named after `errno` and a formatted message.
    pub fn reply_errnof(&self, errno: i32, args: fmt::Arguments<'_>) -> Result<()> {
        if self.reply_target()?.is_none() {
            return Ok(());
        }
        self.reply_error(&BusError::from_errno_fmt(errno, args))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rbus_proto::{Flags, Frame, Header, MessageType};

    use super::*;
    use crate::bus_error::names;
    use crate::mock::{Canned, MockTransport};

    fn setup() -> (MockTransport, Bus) {
        let mock = MockTransport::default();
        let bus = Bus::builder().transport(mock.clone()).build().unwrap();
        (mock, bus)
    }

    fn incoming(bus: &Bus, flags: Flags) -> Message {
        let mut header = Header::new(MessageType::MethodCall);
        header.serial = 11;
        header.flags = flags;
        header.sender = Some(":1.5".into());
        header.path = Some("/obj".into());
        header.member = Some("Do".into());
        Message::received(Some(bus.clone()), Frame::new(header, Vec::new()), None).unwrap()
    }

    #[test]
    fn emit_signal_sends_without_waiting() {
        let (mock, bus) = setup();
        bus.emit_signal("/obj", "org.example.I", "Changed", "su", &["x".into(), 3u32.into()])
            .unwrap();
        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header.kind, MessageType::Signal);
        assert_eq!(sent[0].header.signature, "su");
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn closed_bus_sends_nothing() {
        let (mock, bus) = setup();
        bus.close();
        let err = bus
            .emit_signal("/obj", "org.example.I", "Changed", "", &[])
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        let err = bus
            .call_method(None, "/obj", None, "Ping", "", &[])
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn marshal_failure_sends_nothing() {
        let (mock, bus) = setup();
        let err = bus
            .emit_signal("/obj", "org.example.I", "Changed", "u", &["x".into()])
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn call_method_returns_reply() {
        let (mock, bus) = setup();
        mock.push(Canned::Return(vec!["pong".into()]));
        let mut reply = bus
            .call_method(
                Some("org.example.Svc"),
                "/obj",
                Some("org.example.I"),
                "Ping",
                "s",
                &["ping".into()],
            )
            .unwrap();
        assert_eq!(reply.read_str().unwrap(), "pong");
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].header.destination.as_deref(), Some("org.example.Svc"));
        assert_eq!(calls[0].body, vec![Value::from("ping")]);
    }

    #[test]
    fn call_method_surfaces_remote_error_and_timeout() {
        let (mock, bus) = setup();
        mock.push(Canned::Error(names::UNKNOWN_METHOD.into(), "no Ping".into()));
        mock.push(Canned::Timeout);

        match bus.call_method(None, "/obj", None, "Ping", "", &[]) {
            Err(Error::Remote(e)) => {
                assert_eq!(e.name(), names::UNKNOWN_METHOD);
                assert_eq!(e.message(), Some("no Ping"));
            }
            other => panic!("expected remote error, got {other:?}"),
        }
        assert!(matches!(
            bus.call_method(None, "/obj", None, "Ping", "", &[]),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn reply_return_correlates() {
        let (mock, bus) = setup();
        let call = incoming(&bus, Flags::empty());
        call.reply_return("u", &[7u32.into()]).unwrap();
        let sent = mock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header.kind, MessageType::MethodReturn);
        assert_eq!(sent[0].header.reply_serial, Some(11));
        assert_eq!(sent[0].header.destination.as_deref(), Some(":1.5"));
    }

    #[test]
    fn no_reply_expected_suppresses_every_reply() {
        let (mock, bus) = setup();
        let call = incoming(&bus, Flags::NO_REPLY_EXPECTED);
        let set = BusError::new(names::FAILED, "x");

        call.reply_return("u", &[1u32.into()]).unwrap();
        call.reply_error(&set).unwrap();
        call.reply_errorf(names::FAILED, format_args!("x {}", 1)).unwrap();
        call.reply_errno(libc::ENOENT, None).unwrap();
        call.reply_errno(0, Some(&set)).unwrap();
        call.reply_errnof(libc::EIO, format_args!("disk")).unwrap();
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn reply_error_requires_set_error() {
        let (mock, bus) = setup();
        let call = incoming(&bus, Flags::empty());
        let err = call.reply_error(&BusError::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(matches!(
            call.reply_errno(0, None),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn reply_requires_method_call() {
        let (mock, bus) = setup();
        let mut header = Header::new(MessageType::Signal);
        header.serial = 3;
        let signal =
            Message::received(Some(bus.clone()), Frame::new(header, Vec::new()), None).unwrap();
        assert!(matches!(
            signal.reply_return("", &[]),
            Err(Error::InvalidArgument(_))
        ));

        let unsealed = Message::new_method_call(&bus, None, "/obj", None, "M").unwrap();
        assert!(matches!(
            unsealed.reply_return("", &[]),
            Err(Error::PermissionDenied(_))
        ));
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn reply_on_closed_bus_is_not_connected() {
        let (mock, bus) = setup();
        let call = incoming(&bus, Flags::empty());
        bus.close();
        assert!(matches!(call.reply_return("", &[]), Err(Error::NotConnected)));
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn error_replies_on_closed_bus_send_nothing() {
        let (mock, bus) = setup();
        let call = incoming(&bus, Flags::empty());
        bus.close();
        let set = BusError::new(names::FAILED, "x");
        assert!(matches!(call.reply_error(&set), Err(Error::NotConnected)));
        assert!(matches!(
            call.reply_errorf(names::FAILED, format_args!("x")),
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            call.reply_errno(libc::ENOENT, None),
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            call.reply_errnof(libc::EIO, format_args!("disk")),
            Err(Error::NotConnected)
        ));
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn forked_bus_refuses_every_operation() {
        let mock = MockTransport::default();
        let bus = Bus::builder()
            .transport(mock.clone())
            .generation(crate::generation::current().wrapping_add(1))
            .build()
            .unwrap();
        let call = incoming(&bus, Flags::empty());
        assert!(matches!(
            bus.emit_signal("/obj", "org.example.I", "Changed", "", &[]),
            Err(Error::Forked)
        ));
        assert!(matches!(
            bus.call_method(None, "/obj", None, "Ping", "", &[]),
            Err(Error::Forked)
        ));
        assert!(matches!(call.reply_return("", &[]), Err(Error::Forked)));
        assert!(matches!(
            call.reply_errno(libc::ENOENT, None),
            Err(Error::Forked)
        ));
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn explicit_error_beats_errno() {
        let (mock, bus) = setup();
        let call = incoming(&bus, Flags::empty());
        let explicit = BusError::new("org.example.Error.Busy", "busy");
        call.reply_errno(libc::ENOENT, Some(&explicit)).unwrap();
        call.reply_errno(libc::ENOENT, Some(&BusError::default())).unwrap();
        let sent = mock.sent();
        assert_eq!(sent[0].header.error_name.as_deref(), Some("org.example.Error.Busy"));
        assert_eq!(sent[1].header.error_name.as_deref(), Some(names::FILE_NOT_FOUND));
    }

    #[test]
    fn formatted_errors() {
        let (mock, bus) = setup();
        let call = incoming(&bus, Flags::empty());
        call.reply_errorf("org.example.Error.Bad", format_args!("bad {}", 42))
            .unwrap();
        call.reply_errnof(libc::EACCES, format_args!("denied for {}", "bob"))
            .unwrap();
        let sent = mock.sent();
        assert_eq!(sent[0].body, vec![Value::from("bad 42")]);
        assert_eq!(sent[1].header.error_name.as_deref(), Some(names::ACCESS_DENIED));
        assert_eq!(sent[1].body, vec![Value::from("denied for bob")]);
    }
}
