//! Preconditions shared by the convenience operations.
//!
//! Every check runs before a message is built, so a failed precondition
//! leaves nothing behind.

use rbus_proto::MessageType;
use rbus_proto::names::{interface_name_is_valid, member_name_is_valid};
use rbus_proto::signature;

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::message::Message;

/// The bus must be open and belong to the live process generation.
pub(crate) fn bus_usable(bus: &Bus) -> Result<()> {
    if !bus.is_open() {
        return Err(Error::NotConnected);
    }
    if bus.is_stale() {
        return Err(Error::Forked);
    }
    Ok(())
}

/// The message must be sealed and attached to a usable bus.
pub(crate) fn received(message: &Message) -> Result<&Bus> {
    if !message.is_sealed() {
        return Err(Error::PermissionDenied("message is not sealed"));
    }
    let bus = message.bus().ok_or(Error::NotConnected)?;
    bus_usable(bus)?;
    Ok(bus)
}

/// The message must be a sealed method call.
pub(crate) fn method_call(call: &Message) -> Result<()> {
    if !call.is_sealed() {
        return Err(Error::PermissionDenied("call is not sealed"));
    }
    if call.kind() != MessageType::MethodCall {
        return Err(Error::InvalidArgument("message is not a method call"));
    }
    Ok(())
}

/// Interface may be empty (any interface); member must be valid.
pub(crate) fn property_name(interface: &str, member: &str) -> Result<()> {
    if !interface.is_empty() && !interface_name_is_valid(interface) {
        return Err(Error::InvalidArgument("invalid interface name"));
    }
    if !member_name_is_valid(member) {
        return Err(Error::InvalidArgument("invalid member name"));
    }
    Ok(())
}

/// `sig` must be exactly one complete type.
pub(crate) fn single_type(sig: &str) -> Result<()> {
    if signature::is_single(sig, false) {
        Ok(())
    } else {
        Err(Error::InvalidArgument("signature is not a single complete type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_names() {
        assert!(property_name("", "Count").is_ok());
        assert!(property_name("org.example.IFace", "Count").is_ok());
        assert!(property_name("bad", "Count").is_err());
        assert!(property_name("org.example.IFace", "").is_err());
    }

    #[test]
    fn single_types() {
        assert!(single_type("a{sv}").is_ok());
        assert!(single_type("uu").is_err());
        assert!(single_type("").is_err());
    }
}
