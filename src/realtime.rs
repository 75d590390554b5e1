//! Thread priority for the audio and MIDI delivery threads.

use thread_priority::{set_current_thread_priority, ThreadPriority};
use tracing::{debug, warn};

/// Raises the calling thread to the highest priority the host allows.
///
/// Returns false, after logging a warning, when the host refuses. The thread
/// keeps running at its old priority.
pub fn promote_current_thread(role: &'static str) -> bool {
    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(()) => {
            debug!(thread = role, "Raised thread priority");
            true
        }
        Err(e) => {
            warn!(thread = role, error = ?e, "Could not raise thread priority");
            false
        }
    }
}
