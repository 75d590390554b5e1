//! MIDI delivery thread.
//!
//! Pulls transport messages from an [`EventStream`], normalizes them and
//! dispatches the result through the [`EventRouter`], preserving arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, warn};

use super::normalize::normalize;
use super::router::EventRouter;
use super::transport::{EventStream, StreamEvent};
use crate::realtime::promote_current_thread;

/// How long the pump waits for a message before rechecking its stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Totals for one pump run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub messages: u64,
    /// Messages that produced no canonical event.
    pub ignored: u64,
    pub dispatched: u64,
    pub rejected: u64,
}

/// Handle to a running delivery thread.
pub struct MidiPump {
    handle: JoinHandle<PumpStats>,
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
}

impl MidiPump {
    /// Starts the delivery thread, at raised priority when `realtime` is set.
    pub fn spawn(
        stream: EventStream,
        router: Arc<EventRouter>,
        realtime: bool,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = crossbeam_channel::bounded::<()>(1);
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("midi-pump".into())
            .spawn(move || {
                // Dropped on exit, which wakes `join_timeout`.
                let _done = done_tx;
                if realtime {
                    promote_current_thread("midi-pump");
                }
                run(&stream, &router, &thread_stop)
            })?;

        Ok(Self { handle, stop, done })
    }

    /// True once the thread has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Asks the thread to exit once the queued messages are delivered.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stops the thread and waits up to `timeout` for it to drain.
    ///
    /// On timeout the thread is left detached and `None` is returned.
    pub fn join_timeout(self, timeout: Duration) -> Option<PumpStats> {
        self.stop();
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.handle.join() {
                Ok(stats) => Some(stats),
                Err(_) => {
                    warn!("MIDI pump thread panicked");
                    None
                }
            },
            Err(RecvTimeoutError::Timeout) => None,
        }
    }
}

fn run(stream: &EventStream, router: &EventRouter, stop: &AtomicBool) -> PumpStats {
    let mut stats = PumpStats::default();
    loop {
        // Once stopped, keep going until the queue is empty.
        let stopping = stop.load(Ordering::Acquire);
        let wait = if stopping { Duration::ZERO } else { POLL_INTERVAL };
        match stream.next_event(wait) {
            StreamEvent::Message(msg) => {
                stats.messages += 1;
                match normalize(&msg) {
                    Some(event) => match router.dispatch(event) {
                        Ok(()) => stats.dispatched += 1,
                        Err(_) => stats.rejected += 1,
                    },
                    None => stats.ignored += 1,
                }
            }
            StreamEvent::Idle if stopping => break,
            StreamEvent::Idle => {}
            StreamEvent::Closed => {
                debug!("MIDI stream closed");
                break;
            }
        }
    }
    debug!(?stats, "MIDI pump exiting");
    stats
}
