//! Message construction, sealing and reading.
//!
//! A [`Message`] is *building* until [`Message::seal`] assigns its
//! serial; from then on it is immutable and can be shared read-only.
//! Received messages are sealed on arrival. Reading goes through a
//! cursor that can descend into containers with
//! [`Message::enter_container`].

use std::slice;
use std::sync::Arc;

use rbus_proto::names::{
    error_name_is_valid, interface_name_is_valid, member_name_is_valid, object_path_is_valid,
    service_name_is_valid,
};
use rbus_proto::{Flags, Frame, Header, MessageType, Trivial, Value, signature, signature_of};

use crate::bus::Bus;
use crate::bus_error::BusError;
use crate::creds::Creds;
use crate::error::{Error, Result};

/// Kind of compound container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContainerKind {
    /// `v`: exactly one value with its own signature.
    Variant,
    /// `a…`: zero or more values of one type.
    Array,
    /// `(…)`: fixed sequence of values.
    Struct,
    /// `{kv}`: key/value pair, only inside an array.
    DictEntry,
}

impl ContainerKind {
    /// Signature of a container of this kind holding `contents`.
    fn wrap(self, contents: &str) -> String {
        match self {
            Self::Variant => "v".to_owned(),
            Self::Array => format!("a{contents}"),
            Self::Struct => format!("({contents})"),
            Self::DictEntry => format!("{{{contents}}}"),
        }
    }
}

/// A container opened for writing and not yet closed.
#[derive(Debug)]
struct OpenContainer {
    /// Container kind.
    kind: ContainerKind,
    /// Declared contents signature.
    contents: String,
    /// Values appended so far.
    items: Vec<Value>,
}

impl OpenContainer {
    /// Checks that values with signatures `sigs` may be appended next.
    fn accepts(&self, sigs: &[String]) -> Result<()> {
        let found = sigs.concat();
        let ok = match self.kind {
            ContainerKind::Variant => {
                self.items.is_empty() && sigs.len() == 1 && sigs[0] == self.contents
            }
            ContainerKind::Array => sigs.iter().all(|s| *s == self.contents),
            ContainerKind::Struct | ContainerKind::DictEntry => {
                let expected = signature::split(&self.contents).unwrap_or_default();
                let start = self.items.len();
                expected
                    .get(start..start + sigs.len())
                    .is_some_and(|want| want.iter().zip(sigs).all(|(w, s)| *w == s.as_str()))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(Error::mismatch(self.contents.clone(), found))
        }
    }

    /// Turns the finished container into a value.
    fn finish(self) -> Result<Value> {
        match self.kind {
            ContainerKind::Variant => {
                let mut items = self.items.into_iter();
                match (items.next(), items.next()) {
                    (Some(inner), None) => Ok(Value::Variant(Box::new(inner))),
                    _ => Err(Error::InvalidArgument("variant must hold exactly one value")),
                }
            }
            ContainerKind::Array => Ok(Value::Array {
                element: self.contents,
                items: self.items,
            }),
            ContainerKind::Struct => {
                if signature_of(&self.items) == self.contents {
                    Ok(Value::Struct(self.items))
                } else {
                    Err(Error::mismatch(self.contents, signature_of(&self.items)))
                }
            }
            ContainerKind::DictEntry => {
                let found = signature_of(&self.items);
                let mut items = self.items.into_iter();
                match (items.next(), items.next(), found == self.contents) {
                    (Some(k), Some(v), true) => Ok(Value::DictEntry(Box::new(k), Box::new(v))),
                    _ => Err(Error::mismatch(self.contents, found)),
                }
            }
        }
    }
}

/// One level of the read cursor below the body.
#[derive(Debug)]
struct ReadLevel {
    /// Values of the entered container.
    items: Vec<Value>,
    /// Index of the next value to read.
    pos: usize,
}

/// A bus message.
#[derive(Debug)]
pub struct Message {
    /// Header and body.
    frame: Frame,
    /// Set once the serial is assigned; no mutation afterwards.
    sealed: bool,
    /// Connection the message was built on or received from.
    bus: Option<Bus>,
    /// Sender credentials attached by the transport.
    creds: Option<Arc<Creds>>,
    /// Containers opened for writing, innermost last.
    open: Vec<OpenContainer>,
    /// Entered containers, innermost last.
    levels: Vec<ReadLevel>,
    /// Read position within the body.
    pos: usize,
}

impl Message {
    /// An empty, unsealed message on `bus`.
    fn building(bus: &Bus, header: Header) -> Self {
        Self {
            frame: Frame::new(header, Vec::new()),
            sealed: false,
            bus: Some(bus.clone()),
            creds: None,
            open: Vec::new(),
            levels: Vec::new(),
            pos: 0,
        }
    }

    /// Creates a signal.
    pub fn new_signal(bus: &Bus, path: &str, interface: &str, member: &str) -> Result<Self> {
        if !object_path_is_valid(path) {
            return Err(Error::InvalidArgument("invalid object path"));
        }
        if !interface_name_is_valid(interface) {
            return Err(Error::InvalidArgument("invalid interface name"));
        }
        if !member_name_is_valid(member) {
            return Err(Error::InvalidArgument("invalid member name"));
        }
        let mut header = Header::new(MessageType::Signal);
        header.flags = Flags::NO_REPLY_EXPECTED;
        header.path = Some(path.to_owned());
        header.interface = Some(interface.to_owned());
        header.member = Some(member.to_owned());
        Ok(Self::building(bus, header))
    }

    /// Creates a method call. `destination` is `None` on direct peer
    /// connections, `interface` may be omitted.
    pub fn new_method_call(
        bus: &Bus,
        destination: Option<&str>,
        path: &str,
        interface: Option<&str>,
        member: &str,
    ) -> Result<Self> {
        if destination.is_some_and(|d| !service_name_is_valid(d)) {
            return Err(Error::InvalidArgument("invalid destination name"));
        }
        if !object_path_is_valid(path) {
            return Err(Error::InvalidArgument("invalid object path"));
        }
        if interface.is_some_and(|i| !interface_name_is_valid(i)) {
            return Err(Error::InvalidArgument("invalid interface name"));
        }
        if !member_name_is_valid(member) {
            return Err(Error::InvalidArgument("invalid member name"));
        }
        let mut header = Header::new(MessageType::MethodCall);
        header.destination = destination.map(str::to_owned);
        header.path = Some(path.to_owned());
        header.interface = interface.map(str::to_owned);
        header.member = Some(member.to_owned());
        Ok(Self::building(bus, header))
    }

    /// Header for a reply to `call`.
    fn reply_header(call: &Self, kind: MessageType) -> Result<(Bus, Header)> {
        if !call.sealed {
            return Err(Error::PermissionDenied("call is not sealed"));
        }
        if call.kind() != MessageType::MethodCall {
            return Err(Error::InvalidArgument("can only reply to method calls"));
        }
        let bus = call.bus.clone().ok_or(Error::NotConnected)?;
        let mut header = Header::new(kind);
        header.flags = Flags::NO_REPLY_EXPECTED;
        header.reply_serial = Some(call.serial());
        header.destination.clone_from(&call.frame.header.sender);
        Ok((bus, header))
    }

    /// Creates a successful reply to `call`.
    pub fn new_method_return(call: &Self) -> Result<Self> {
        let (bus, header) = Self::reply_header(call, MessageType::MethodReturn)?;
        Ok(Self::building(&bus, header))
    }

    /// Creates an error reply to `call`. `error` must be set.
    pub fn new_method_error(call: &Self, error: &BusError) -> Result<Self> {
        if !error.is_set() {
            return Err(Error::InvalidArgument("error is not set"));
        }
        if !error_name_is_valid(error.name()) {
            return Err(Error::InvalidArgument("invalid error name"));
        }
        let (bus, mut header) = Self::reply_header(call, MessageType::MethodError)?;
        header.error_name = Some(error.name().to_owned());
        let mut m = Self::building(&bus, header);
        if let Some(text) = error.message() {
            m.append("s", &[text.into()])?;
        }
        Ok(m)
    }

    /// Wraps a frame that arrived from a transport. The result is sealed.
    pub fn received(bus: Option<Bus>, frame: Frame, creds: Option<Arc<Creds>>) -> Result<Self> {
        if !frame.body.iter().all(Value::is_well_formed) {
            return Err(Error::Protocol("malformed body value".into()));
        }
        if signature_of(&frame.body) != frame.header.signature {
            return Err(Error::Protocol("body does not match header signature".into()));
        }
        if frame.header.kind == MessageType::MethodError && frame.header.error_name.is_none() {
            return Err(Error::Protocol("error reply without error name".into()));
        }
        Ok(Self {
            frame,
            sealed: true,
            bus,
            creds: creds.filter(|c| !c.mask().is_empty()),
            open: Vec::new(),
            levels: Vec::new(),
            pos: 0,
        })
    }

    /// Fails if the message may no longer be modified.
    fn ensure_building(&self) -> Result<()> {
        if self.sealed {
            Err(Error::PermissionDenied("message is sealed"))
        } else {
            Ok(())
        }
    }

    /// Checks that values with signatures `sigs` fit the innermost open
    /// container.
    fn accepts(&self, sigs: &[String]) -> Result<()> {
        self.open.last().map_or(Ok(()), |c| c.accepts(sigs))
    }

    /// Destination of appended values: innermost open container or body.
    fn target(&mut self) -> &mut Vec<Value> {
        match self.open.last_mut() {
            Some(c) => &mut c.items,
            None => &mut self.frame.body,
        }
    }

    /// Appends `values`, which must match `signature` exactly.
    ///
    /// Nothing is appended if any check fails.
    pub fn append(&mut self, signature: &str, values: &[Value]) -> Result<()> {
        self.ensure_building()?;
        if !signature::is_valid(signature) {
            return Err(Error::InvalidArgument("invalid signature"));
        }
        if !values.iter().all(Value::is_well_formed) {
            return Err(Error::InvalidArgument("malformed value"));
        }
        let sigs: Vec<String> = values.iter().map(Value::signature).collect();
        let found = sigs.concat();
        if found != signature {
            return Err(Error::mismatch(signature, found));
        }
        self.accepts(&sigs)?;
        self.target().extend_from_slice(values);
        Ok(())
    }

    /// Opens a container; subsequent appends go into it until
    /// [`Message::close_container`].
    pub fn open_container(&mut self, kind: ContainerKind, contents: &str) -> Result<()> {
        self.ensure_building()?;
        let valid = match kind {
            ContainerKind::Variant => signature::is_single(contents, false),
            ContainerKind::Array => signature::is_single(contents, true),
            ContainerKind::Struct => !contents.is_empty() && signature::is_valid(contents),
            ContainerKind::DictEntry => {
                self.open.last().is_some_and(|c| c.kind == ContainerKind::Array)
                    && signature::is_single(&kind.wrap(contents), true)
            }
        };
        if !valid {
            return Err(Error::InvalidArgument("invalid container contents signature"));
        }
        self.accepts(slice::from_ref(&kind.wrap(contents)))?;
        self.open.push(OpenContainer {
            kind,
            contents: contents.to_owned(),
            items: Vec::new(),
        });
        Ok(())
    }

    /// Closes the innermost open container.
    pub fn close_container(&mut self) -> Result<()> {
        self.ensure_building()?;
        let container = self
            .open
            .pop()
            .ok_or(Error::InvalidArgument("no open container"))?;
        let value = container.finish()?;
        self.target().push(value);
        Ok(())
    }

    /// Seals the message with `serial`. Sealed messages are immutable.
    pub fn seal(&mut self, serial: u32) -> Result<()> {
        self.ensure_building()?;
        if serial == 0 {
            return Err(Error::InvalidArgument("serial must be non-zero"));
        }
        if !self.open.is_empty() {
            return Err(Error::InvalidArgument("container left open"));
        }
        self.frame.header.serial = serial;
        self.frame.header.signature = signature_of(&self.frame.body);
        self.sealed = true;
        Ok(())
    }

    /// Sets or clears the no-reply-expected flag of a method call.
    pub fn set_no_reply_expected(&mut self, on: bool) -> Result<()> {
        self.ensure_building()?;
        if self.kind() != MessageType::MethodCall {
            return Err(Error::PermissionDenied("only method calls carry this flag"));
        }
        self.frame.header.flags.set(Flags::NO_REPLY_EXPECTED, on);
        Ok(())
    }

    /// Sets or clears the no-auto-start flag.
    pub fn set_auto_start(&mut self, on: bool) -> Result<()> {
        self.ensure_building()?;
        self.frame.header.flags.set(Flags::NO_AUTO_START, !on);
        Ok(())
    }

    /// Sets the sender name. Sealing on a bus with a unique name fills
    /// it in when unset.
    pub fn set_sender(&mut self, sender: &str) -> Result<()> {
        self.ensure_building()?;
        if !service_name_is_valid(sender) {
            return Err(Error::InvalidArgument("invalid sender name"));
        }
        self.frame.header.sender = Some(sender.to_owned());
        Ok(())
    }

    /// Header and body as carried by a transport.
    pub const fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Returns `true` once the message is immutable.
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Message kind.
    pub const fn kind(&self) -> MessageType {
        self.frame.header.kind
    }

    /// Header flags.
    pub const fn flags(&self) -> Flags {
        self.frame.header.flags
    }

    /// Returns `true` if the sender does not want any reply.
    pub const fn no_reply_expected(&self) -> bool {
        self.frame.header.flags.contains(Flags::NO_REPLY_EXPECTED)
    }

    /// Serial, zero until sealed.
    pub const fn serial(&self) -> u32 {
        self.frame.header.serial
    }

    /// Serial of the call this message answers.
    pub const fn reply_serial(&self) -> Option<u32> {
        self.frame.header.reply_serial
    }

    /// Object path.
    pub fn path(&self) -> Option<&str> {
        self.frame.header.path.as_deref()
    }

    /// Interface name.
    pub fn interface(&self) -> Option<&str> {
        self.frame.header.interface.as_deref()
    }

    /// Member name.
    pub fn member(&self) -> Option<&str> {
        self.frame.header.member.as_deref()
    }

    /// Destination bus name.
    pub fn destination(&self) -> Option<&str> {
        self.frame.header.destination.as_deref()
    }

    /// Sender bus name.
    pub fn sender(&self) -> Option<&str> {
        self.frame.header.sender.as_deref()
    }

    /// Body signature (computed at seal time for outgoing messages).
    pub fn signature(&self) -> &str {
        &self.frame.header.signature
    }

    /// Body values.
    pub fn body(&self) -> &[Value] {
        &self.frame.body
    }

    /// The error carried by an error reply.
    pub fn error(&self) -> Option<BusError> {
        let name = self.frame.header.error_name.as_deref()?;
        match self.frame.body.first() {
            Some(Value::String(text)) => Some(BusError::new(name, text.as_str())),
            _ => Some(BusError::with_name(name)),
        }
    }

    /// Connection the message belongs to.
    pub const fn bus(&self) -> Option<&Bus> {
        self.bus.as_ref()
    }

    /// Sender credentials attached on receipt.
    pub const fn creds(&self) -> Option<&Arc<Creds>> {
        self.creds.as_ref()
    }

    /// Values and position at the current read level.
    fn level(&self) -> (&[Value], usize) {
        match self.levels.last() {
            Some(l) => (&l.items, l.pos),
            None => (&self.frame.body, self.pos),
        }
    }

    /// Steps past the value at the read position.
    fn advance(&mut self) {
        match self.levels.last_mut() {
            Some(l) => l.pos += 1,
            None => self.pos += 1,
        }
    }

    /// The next value without consuming it.
    pub fn peek(&self) -> Option<&Value> {
        let (items, pos) = self.level();
        items.get(pos)
    }

    /// Signature of the next value, `None` at the end of the container.
    pub fn peek_type(&self) -> Option<String> {
        self.peek().map(Value::signature)
    }

    /// Returns `true` if the current container has been read fully.
    pub fn at_end(&self) -> bool {
        self.peek().is_none()
    }

    /// Moves the cursor back to the start of the body.
    pub fn rewind(&mut self) {
        self.levels.clear();
        self.pos = 0;
    }

    /// Fails unless the message is sealed.
    fn ensure_readable(&self) -> Result<()> {
        if self.sealed {
            Ok(())
        } else {
            Err(Error::PermissionDenied("message is not sealed"))
        }
    }

    /// Descends into the next value, which must be a container of `kind`
    /// whose contents match `contents` (any contents if `None`).
    ///
    /// On mismatch the cursor does not move.
    pub fn enter_container(&mut self, kind: ContainerKind, contents: Option<&str>) -> Result<()> {
        self.ensure_readable()?;
        let expected = contents.map_or_else(String::new, |c| kind.wrap(c));
        let value = self
            .peek()
            .ok_or_else(|| Error::mismatch(expected.clone(), ""))?;
        let (inner_sig, items) = match (kind, value) {
            (ContainerKind::Variant, Value::Variant(inner)) => {
                (inner.signature(), vec![(**inner).clone()])
            }
            (ContainerKind::Array, Value::Array { element, items }) => {
                (element.clone(), items.clone())
            }
            (ContainerKind::Struct, Value::Struct(fields)) => {
                (signature_of(fields), fields.clone())
            }
            (ContainerKind::DictEntry, Value::DictEntry(k, v)) => (
                format!("{}{}", k.signature(), v.signature()),
                vec![(**k).clone(), (**v).clone()],
            ),
            (_, other) => return Err(Error::mismatch(expected, other.signature())),
        };
        if let Some(want) = contents {
            if want != inner_sig {
                return Err(Error::mismatch(want, inner_sig));
            }
        }
        self.advance();
        self.levels.push(ReadLevel { items, pos: 0 });
        Ok(())
    }

    /// Leaves the innermost entered container.
    pub fn exit_container(&mut self) -> Result<()> {
        self.levels
            .pop()
            .map(drop)
            .ok_or(Error::InvalidArgument("no entered container"))
    }

    /// Consumes the next value if `matches` accepts it; returns its index.
    fn take(&mut self, expected: &str, matches: impl Fn(&Value) -> bool) -> Result<usize> {
        self.ensure_readable()?;
        let (items, pos) = self.level();
        match items.get(pos) {
            Some(v) if matches(v) => {
                self.advance();
                Ok(pos)
            }
            Some(v) => Err(Error::mismatch(expected, v.signature())),
            None => Err(Error::mismatch(expected, "")),
        }
    }

    /// Reads the next value of any type.
    pub fn read_value(&mut self) -> Result<Value> {
        let idx = self.take("", |_| true)?;
        Ok(self.level().0[idx].clone())
    }

    /// Reads a fixed-size scalar.
    pub fn read_basic<T: Trivial>(&mut self) -> Result<T> {
        let idx = self.take(&T::CODE.to_string(), |v| v.code() == T::CODE)?;
        T::from_value(&self.level().0[idx]).ok_or_else(|| Error::mismatch(T::CODE.to_string(), ""))
    }

    /// Reads a string, borrowed from the message.
    pub fn read_str(&mut self) -> Result<&str> {
        let idx = self.take("s", |v| matches!(v, Value::String(_)))?;
        self.level().0[idx]
            .as_str()
            .ok_or_else(|| Error::mismatch("s", ""))
    }

    /// Reads an object path, borrowed from the message.
    pub fn read_object_path(&mut self) -> Result<&str> {
        let idx = self.take("o", |v| matches!(v, Value::ObjectPath(_)))?;
        self.level().0[idx]
            .as_str()
            .ok_or_else(|| Error::mismatch("o", ""))
    }

    /// Reads an array of strings into an owned list.
    pub fn read_strv(&mut self) -> Result<Vec<String>> {
        self.enter_container(ContainerKind::Array, Some("s"))?;
        let mut out = Vec::new();
        while !self.at_end() {
            out.push(self.read_str()?.to_owned());
        }
        self.exit_container()?;
        Ok(out)
    }
}
