//! In-memory transport and credential store for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rbus_proto::{Frame, Header, MessageType, Value, signature_of};

use crate::bus::{Bus, Transport};
use crate::creds::{Creds, CredsMask, CredsSource};
use crate::error::{Error, Result};

/// A scripted answer to the next method call.
#[derive(Debug, Clone)]
pub(crate) enum Canned {
    /// Method return carrying these body values.
    Return(Vec<Value>),
    /// Error reply with name and message.
    Error(String, String),
    /// No reply before the deadline.
    Timeout,
}

/// Everything a [`MockTransport`] has seen and will answer.
#[derive(Debug, Default)]
struct State {
    /// Frames passed to `send`.
    sent: Vec<Frame>,
    /// Frames passed to `call`.
    calls: Vec<Frame>,
    /// Scripted answers, oldest first.
    replies: VecDeque<Canned>,
    /// Reply serial overriding the call's own.
    forced_reply_serial: Option<u32>,
    /// Credentials reported for the peer.
    peer: Option<Creds>,
}

/// Records traffic and answers calls from a queue.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    /// Shared between clones.
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    /// Locks the shared state.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues the answer to the next call. Unscripted calls get an
    /// empty method return.
    pub(crate) fn push(&self, reply: Canned) {
        self.lock().replies.push_back(reply);
    }

    /// Frames handed to [`Transport::send`].
    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.lock().sent.clone()
    }

    /// Frames handed to [`Transport::call`].
    pub(crate) fn calls(&self) -> Vec<Frame> {
        self.lock().calls.clone()
    }

    /// Total frames that reached the transport.
    pub(crate) fn traffic(&self) -> usize {
        let state = self.lock();
        state.sent.len() + state.calls.len()
    }

    /// Answers every call with this reply serial instead of the call's.
    pub(crate) fn reply_with_serial(&self, serial: u32) {
        self.lock().forced_reply_serial = Some(serial);
    }

    /// Reports `creds` as the peer.
    pub(crate) fn set_peer(&self, creds: Creds) {
        self.lock().peer = Some(creds);
    }
}

impl Transport for MockTransport {
    fn send(&self, frame: &Frame) -> Result<()> {
        self.lock().sent.push(frame.clone());
        Ok(())
    }

    fn call(&self, frame: &Frame, _timeout: Duration) -> Result<Frame> {
        let mut state = self.lock();
        state.calls.push(frame.clone());
        let reply = state
            .replies
            .pop_front()
            .unwrap_or(Canned::Return(Vec::new()));

        let (kind, error_name, body) = match reply {
            Canned::Return(body) => (MessageType::MethodReturn, None, body),
            Canned::Error(name, message) => {
                (MessageType::MethodError, Some(name), vec![Value::String(message)])
            }
            Canned::Timeout => return Err(Error::Timeout),
        };
        let mut header = Header::new(kind);
        header.serial = frame.header.serial.wrapping_add(1000);
        header.reply_serial = Some(state.forced_reply_serial.unwrap_or(frame.header.serial));
        header.error_name = error_name;
        header.destination.clone_from(&frame.header.sender);
        header.sender.clone_from(&frame.header.destination);
        header.signature = signature_of(&body);
        Ok(Frame::new(header, body))
    }

    fn peer_credentials(&self) -> Result<Creds> {
        self.lock()
            .peer
            .clone()
            .ok_or(Error::NotSupported("peer credentials"))
    }
}

/// Credential store that answers from constants and records each path
/// taken.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockCreds {
    /// One entry per lookup.
    log: Arc<Mutex<Vec<String>>>,
}

impl MockCreds {
    /// Process id reported by name owner and peer lookups.
    pub(crate) const PID: u32 = 4242;

    /// Appends one log entry.
    fn record(&self, entry: String) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Lookups performed so far, oldest first.
    pub(crate) fn log(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CredsSource for MockCreds {
    fn name_owner(&self, _bus: &Bus, name: &str, _mask: CredsMask) -> Result<Creds> {
        self.record(format!("name_owner:{name}"));
        Ok(Creds::new().with_pid(Self::PID).with_uid(0).with_gid(100))
    }

    fn peer(&self, _bus: &Bus, _mask: CredsMask) -> Result<Creds> {
        self.record("peer".to_owned());
        Ok(Creds::new().with_pid(Self::PID).with_uid(0))
    }

    fn extend_by_pid(&self, base: &Creds, mask: CredsMask) -> Result<Creds> {
        self.record(format!("extend:{}", base.pid().unwrap_or(0)));
        let mut found = Creds::new();
        if mask.contains(CredsMask::COMM) {
            found = found.with_comm("mock");
        }
        if mask.contains(CredsMask::UID) {
            found = found.with_uid(0);
        }
        Ok(base.clone().merged(&found))
    }
}
