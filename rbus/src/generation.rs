//! Process generation counter for fork detection.
//!
//! Every [`Bus`](crate::Bus) records the generation current at creation.
//! The counter advances in the child of every `fork(2)` (an atfork
//! handler is registered when the first bus is built), so a child that
//! inherited a connection sees a mismatch instead of silently sharing
//! the parent's socket.

#![allow(unsafe_code)]

use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live process generation.
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Guards registration of the atfork handler.
static ATFORK: Once = Once::new();

/// Returns the live process generation.
pub fn current() -> u64 {
    GENERATION.load(Ordering::Acquire)
}

/// Advances the live generation.
///
/// Called automatically in forked children; exposed for runtimes that
/// clone processes without going through `fork(2)`.
pub fn after_fork() {
    GENERATION.fetch_add(1, Ordering::AcqRel);
}

extern "C" fn child_handler() {
    // Only an atomic increment: async-signal-safe.
    after_fork();
}

/// Registers the atfork child handler once per process.
pub(crate) fn install_fork_hook() {
    ATFORK.call_once(|| {
        // SAFETY: `child_handler` is a plain `extern "C"` function that only
        // touches an atomic; passing `None` for the other hooks is allowed.
        let ret = unsafe { libc::pthread_atfork(None, None, Some(child_handler)) };
        if ret != 0 {
            tracing::warn!(ret, "pthread_atfork failed; fork detection is manual");
        }
    });
}

