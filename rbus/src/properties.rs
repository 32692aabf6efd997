//! Property access through the standard Properties interface.
//!
//! `Get` takes `(interface, member)` and returns one variant; `Set`
//! takes `(interface, member, variant)` and returns nothing. An empty
//! interface asks the peer to search all interfaces of the object.

use std::slice;

use rbus_proto::names::PROPERTIES_INTERFACE;
use rbus_proto::{Trivial, Value};

use crate::bus::Bus;
use crate::error::Result;
use crate::message::{ContainerKind, Message};
use crate::validate;

impl Bus {
    /// Issues `Properties.Get` and returns the reply positioned inside
    /// its variant.
    ///
    /// With `expected` set, the variant must hold exactly that type;
    /// otherwise any type is accepted. On mismatch the reply is dropped
    /// and the error returned.
    pub fn get_property(
        &self,
        destination: Option<&str>,
        path: &str,
        interface: &str,
        member: &str,
        expected: Option<&str>,
    ) -> Result<Message> {
        validate::property_name(interface, member)?;
        if let Some(sig) = expected {
            validate::single_type(sig)?;
        }
        validate::bus_usable(self)?;
        self.get_variant(destination, path, interface, member, expected)
    }

    /// Shared tail of the getters: one `Get` call, one variant entered.
    fn get_variant(
        &self,
        destination: Option<&str>,
        path: &str,
        interface: &str,
        member: &str,
        contents: Option<&str>,
    ) -> Result<Message> {
        let mut reply = self.call_method(
            destination,
            path,
            Some(PROPERTIES_INTERFACE),
            "Get",
            "ss",
            &[interface.into(), member.into()],
        )?;
        reply.enter_container(ContainerKind::Variant, contents)?;
        Ok(reply)
    }

    /// Reads a fixed-size scalar property.
    ///
    /// ```no_run
    /// # fn f(bus: &rbus::Bus) -> rbus::Result<()> {
    /// let svc = Some("org.example.Svc");
    /// let n: u32 = bus.get_property_trivial(svc, "/obj", "org.example.IFace", "Count")?;
    /// # Ok(()) }
    /// ```
    pub fn get_property_trivial<T: Trivial>(
        &self,
        destination: Option<&str>,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Result<T> {
        validate::property_name(interface, member)?;
        validate::bus_usable(self)?;
        let code = T::CODE.to_string();
        self.get_variant(destination, path, interface, member, Some(&code))?
            .read_basic::<T>()
    }

    /// Reads a string property into an owned copy that outlives the reply.
    pub fn get_property_string(
        &self,
        destination: Option<&str>,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Result<String> {
        validate::property_name(interface, member)?;
        validate::bus_usable(self)?;
        let mut reply = self.get_variant(destination, path, interface, member, Some("s"))?;
        let s = reply.read_str()?;
        let mut owned = String::new();
        owned.try_reserve_exact(s.len())?;
        owned.push_str(s);
        Ok(owned)
    }

    /// Reads an array-of-strings property into an owned list.
    pub fn get_property_strv(
        &self,
        destination: Option<&str>,
        path: &str,
        interface: &str,
        member: &str,
    ) -> Result<Vec<String>> {
        validate::property_name(interface, member)?;
        validate::bus_usable(self)?;
        self.get_variant(destination, path, interface, member, None)?
            .read_strv()
    }

    /// Issues `Properties.Set` with `value` wrapped in a variant of
    /// type `signature`. The reply payload is discarded.
    pub fn set_property(
        &self,
        destination: Option<&str>,
        path: &str,
        interface: &str,
        member: &str,
        signature: &str,
        value: &Value,
    ) -> Result<()> {
        validate::property_name(interface, member)?;
        validate::single_type(signature)?;
        validate::bus_usable(self)?;

        let mut m = Message::new_method_call(
            self,
            destination,
            path,
            Some(PROPERTIES_INTERFACE),
            "Set",
        )?;
        m.append("ss", &[interface.into(), member.into()])?;
        m.open_container(ContainerKind::Variant, signature)?;
        m.append(signature, slice::from_ref(value))?;
        m.close_container()?;
        self.call(m, None).map(drop)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rbus_proto::MessageType;

    use super::*;
    use crate::bus_error::names;
    use crate::error::Error;
    use crate::mock::{Canned, MockTransport};

    fn setup() -> (MockTransport, Bus) {
        let mock = MockTransport::default();
        let bus = Bus::builder().transport(mock.clone()).build().unwrap();
        (mock, bus)
    }

    fn assert_get_call(mock: &MockTransport, interface: &str, member: &str) {
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        let h = &calls[0].header;
        assert_eq!(h.interface.as_deref(), Some(PROPERTIES_INTERFACE));
        assert_eq!(h.member.as_deref(), Some("Get"));
        assert_eq!(calls[0].body, vec![Value::from(interface), Value::from(member)]);
    }

    #[test]
    fn get_property_positions_reply_inside_variant() {
        let (mock, bus) = setup();
        mock.push(Canned::Return(vec![Value::variant(42u32)]));
        let mut reply = bus
            .get_property(Some("org.example.Svc"), "/obj", "org.example.IFace", "Count", Some("u"))
            .unwrap();
        assert_eq!(reply.read_basic::<u32>().unwrap(), 42);
        assert_get_call(&mock, "org.example.IFace", "Count");
        assert_eq!(mock.calls()[0].header.destination.as_deref(), Some("org.example.Svc"));
    }

    #[test]
    fn get_property_type_mismatch() {
        let (mock, bus) = setup();
        mock.push(Canned::Return(vec![Value::variant("text")]));
        let err = bus
            .get_property(None, "/obj", "", "Count", Some("u"))
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert_get_call(&mock, "", "Count");
    }

    #[test]
    fn get_property_unconstrained() {
        let (mock, bus) = setup();
        mock.push(Canned::Return(vec![Value::variant(Value::strv(["a"]))]));
        let reply = bus.get_property(None, "/obj", "", "Names", None).unwrap();
        assert_eq!(reply.peek_type().as_deref(), Some("as"));
        assert_get_call(&mock, "", "Names");
    }

    #[test]
    fn get_property_validates_before_sending() {
        let (mock, bus) = setup();
        assert!(bus.get_property(None, "/obj", "bad", "Count", None).is_err());
        assert!(bus.get_property(None, "/obj", "", "Bad.Member", None).is_err());
        assert!(bus.get_property(None, "/obj", "", "Count", Some("uu")).is_err());
        bus.close();
        assert!(matches!(
            bus.get_property(None, "/obj", "", "Count", None),
            Err(Error::NotConnected)
        ));
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn trivial_property() {
        let (mock, bus) = setup();
        mock.push(Canned::Return(vec![Value::variant(true)]));
        mock.push(Canned::Return(vec![Value::variant(7u64)]));
        assert!(bus.get_property_trivial::<bool>(None, "/obj", "", "Active").unwrap());
        assert!(matches!(
            bus.get_property_trivial::<u32>(None, "/obj", "", "Size"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn string_property_outlives_reply() {
        let (mock, bus) = setup();
        mock.push(Canned::Return(vec![Value::variant("hello")]));
        let s = bus
            .get_property_string(None, "/obj", "org.example.IFace", "Greeting")
            .unwrap();
        // The reply was dropped inside the call; the copy is independent.
        assert_eq!(s, "hello");
        assert_get_call(&mock, "org.example.IFace", "Greeting");
    }

    #[test]
    fn strv_property() {
        let (mock, bus) = setup();
        mock.push(Canned::Return(vec![Value::variant(Value::strv(["x", "y"]))]));
        let v = bus.get_property_strv(None, "/obj", "", "Names").unwrap();
        assert_eq!(v, vec!["x", "y"]);
    }

    #[test]
    fn get_property_remote_error() {
        let (mock, bus) = setup();
        mock.push(Canned::Error(names::UNKNOWN_PROPERTY.into(), "nope".into()));
        match bus.get_property_string(None, "/obj", "", "Missing") {
            Err(Error::Remote(e)) => assert!(e.has_name(names::UNKNOWN_PROPERTY)),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn set_property_payload_order() {
        let (mock, bus) = setup();
        bus.set_property(
            Some("org.example.Svc"),
            "/obj",
            "org.example.IFace",
            "Count",
            "u",
            &Value::from(5u32),
        )
        .unwrap();
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        let frame = &calls[0];
        assert_eq!(frame.header.kind, MessageType::MethodCall);
        assert_eq!(frame.header.member.as_deref(), Some("Set"));
        assert_eq!(frame.header.signature, "ssv");
        assert_eq!(
            frame.body,
            vec![
                Value::from("org.example.IFace"),
                Value::from("Count"),
                Value::variant(5u32),
            ]
        );
    }

    #[test]
    fn closed_bus_reads_and_writes_nothing() {
        let (mock, bus) = setup();
        bus.close();
        assert!(matches!(
            bus.get_property_trivial::<u32>(None, "/obj", "", "Count"),
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            bus.get_property_string(None, "/obj", "", "Name"),
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            bus.get_property_strv(None, "/obj", "", "Names"),
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            bus.set_property(None, "/obj", "", "Count", "u", &Value::from(1u32)),
            Err(Error::NotConnected)
        ));
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn forked_bus_reads_and_writes_nothing() {
        let mock = MockTransport::default();
        let bus = Bus::builder()
            .transport(mock.clone())
            .generation(crate::generation::current().wrapping_add(1))
            .build()
            .unwrap();
        assert!(matches!(
            bus.get_property(None, "/obj", "", "Count", None),
            Err(Error::Forked)
        ));
        assert!(matches!(
            bus.set_property(None, "/obj", "", "Count", "u", &Value::from(1u32)),
            Err(Error::Forked)
        ));
        assert_eq!(mock.traffic(), 0);
    }

    #[test]
    fn set_property_type_mismatch_sends_nothing() {
        let (mock, bus) = setup();
        let err = bus
            .set_property(None, "/obj", "", "Count", "u", &Value::from("five"))
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(bus
            .set_property(None, "/obj", "", "Count", "uu", &Value::from(1u32))
            .is_err());
        assert_eq!(mock.traffic(), 0);
    }
}
