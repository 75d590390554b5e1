//! Process signals as atomic flags.
//!
//! Handlers registered through `signal-hook` only store `true` into a flag.
//! The control loop takes the flags once per iteration, so repeated signals
//! between two iterations collapse into one request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::SigId;

/// Requests pending at one loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requests {
    pub terminate: bool,
    pub reload: bool,
    pub status: bool,
    pub panic: bool,
}

impl Requests {
    pub fn any(&self) -> bool {
        self.terminate || self.reload || self.status || self.panic
    }
}

/// Shared request flags. Clones share the same flags.
#[derive(Debug, Clone, Default)]
pub struct SignalFlags {
    terminate: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    status: Arc<AtomicBool>,
    panic: Arc<AtomicBool>,
}

impl SignalFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the process signal handlers.
    ///
    /// SIGTERM and SIGINT terminate, SIGHUP reloads, SIGUSR1 reports status
    /// and SIGUSR2 silences every channel.
    pub fn install(&self) -> std::io::Result<SignalGuard> {
        let pairs = [
            (SIGTERM, &self.terminate),
            (SIGINT, &self.terminate),
            (SIGHUP, &self.reload),
            (SIGUSR1, &self.status),
            (SIGUSR2, &self.panic),
        ];
        let mut ids = Vec::with_capacity(pairs.len());
        for (signal, flag) in pairs {
            match signal_hook::flag::register(signal, Arc::clone(flag)) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        signal_hook::low_level::unregister(id);
                    }
                    return Err(e);
                }
            }
        }
        Ok(SignalGuard { ids })
    }

    /// Returns pending requests and clears the one-shot ones.
    ///
    /// Termination stays set once requested.
    pub fn take(&self) -> Requests {
        Requests {
            terminate: self.terminate.load(Ordering::Acquire),
            reload: self.reload.swap(false, Ordering::AcqRel),
            status: self.status.swap(false, Ordering::AcqRel),
            panic: self.panic.swap(false, Ordering::AcqRel),
        }
    }

    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::Release);
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::Release);
    }

    pub fn request_status(&self) {
        self.status.store(true, Ordering::Release);
    }

    pub fn request_panic(&self) {
        self.panic.store(true, Ordering::Release);
    }
}

/// Unregisters the handlers when dropped.
#[derive(Debug)]
pub struct SignalGuard {
    ids: Vec<SigId>,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
