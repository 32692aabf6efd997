//! Sender credential resolution.
//!
//! Strategies are tried cheapest first, each only while the accumulated
//! credentials still miss part of the request. Known fields are never
//! dropped on the way.

use std::sync::Arc;

use crate::bus::Bus;
use crate::creds::{Creds, CredsMask};
use crate::error::Result;
use crate::message::Message;
use crate::validate;

/// One way of obtaining sender credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// The credentials at hand already suffice.
    Cached,
    /// Nothing to anchor on: ask about the sender name, or the peer.
    Sender,
    /// The pid is known: derive only the missing fields from it.
    ExtendByPid,
}

/// Resolution order.
const CHAIN: [Strategy; 3] = [Strategy::Cached, Strategy::Sender, Strategy::ExtendByPid];

impl Strategy {
    /// Whether this strategy has anything to add to `known`.
    fn applies(self, known: Option<&Creds>, mask: CredsMask) -> bool {
        match self {
            Self::Cached => known.is_some_and(|c| c.covers(mask)),
            Self::Sender => known.is_none_or(|c| c.pid().is_none()),
            Self::ExtendByPid => known.is_some_and(|c| c.pid().is_some() && !c.covers(mask)),
        }
    }

    /// Runs the strategy; the result keeps every field of `known`.
    fn resolve(
        self,
        call: &Message,
        bus: &Bus,
        known: Option<Arc<Creds>>,
        mask: CredsMask,
    ) -> Result<Arc<Creds>> {
        let source = bus.creds_source();
        match (self, known) {
            (Self::Cached, Some(c)) => Ok(c),
            (Self::Sender, prior) => {
                let fetched = match call.sender() {
                    Some(name) => source.name_owner(bus, name, mask)?,
                    None => source.peer(bus, mask)?,
                };
                Ok(Arc::new(match prior {
                    Some(c) => Creds::clone(&c).merged(&fetched),
                    None => fetched,
                }))
            }
            (Self::ExtendByPid, Some(c)) => {
                Ok(Arc::new(source.extend_by_pid(&c, mask)?.merged(&c)))
            }
            (_, prior) => Ok(prior.unwrap_or_default()),
        }
    }
}

impl Message {
    /// Returns credentials of the sender of this message covering
    /// `mask` as far as the system can provide them.
    ///
    /// Credentials attached to the message are reused without any I/O
    /// when they suffice. Otherwise, if they lack the process id, the
    /// owner of the sender name (or the direct peer, for unnamed
    /// senders) is queried; once the process id is known, only the
    /// missing fields are derived from it. Callers needing specific
    /// fields must check the returned mask.
    pub fn query_sender_creds(&self, mask: CredsMask) -> Result<Arc<Creds>> {
        let bus = validate::received(self)?;
        let mut known = self.creds().cloned();
        for strategy in CHAIN {
            if !strategy.applies(known.as_deref(), mask) {
                continue;
            }
            tracing::debug!(
                ?strategy,
                ?mask,
                sender = ?self.sender(),
                "resolving sender credentials"
            );
            let creds = strategy.resolve(self, bus, known.take(), mask)?;
            let done = creds.covers(mask);
            known = Some(creds);
            if done {
                break;
            }
        }
        Ok(known.unwrap_or_default())
    }
}
