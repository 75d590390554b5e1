//! MIDI input path.
//!
//! - [`MidiTransport`]: sequencer and port-based transports behind one interface
//! - [`normalize`]: transport messages to [`MidiEvent`](crate::types::MidiEvent)
//! - [`EventRouter`]: range checks and the engine call
//! - [`MidiPump`]: the thread tying them together

mod normalize;
mod port;
mod pump;
mod router;
#[cfg(target_os = "linux")]
mod sequencer;
mod transport;

pub use normalize::{normalize, normalize_sequencer, normalize_wire};
pub use port::{PortHost, PortTransport};
pub use pump::{MidiPump, PumpStats};
pub use router::{
    DispatchError, EventRouter, RouterStats, RESET_EXPRESSION, RESET_PAN, RESET_PROGRAM,
    RESET_VOLUME,
};
#[cfg(target_os = "linux")]
pub use sequencer::SequencerTransport;
pub use transport::{
    EventStream, MidiTransport, SeqRecord, StreamEvent, TransportError, TransportMessage,
};

use crate::config::MidiBackend;

/// Builds the transport for a resolved backend.
pub fn transport_for(
    backend: MidiBackend,
    device: &str,
) -> Result<Box<dyn MidiTransport>, TransportError> {
    match backend {
        MidiBackend::Sequencer | MidiBackend::Auto => sequencer_transport(device),
        MidiBackend::Raw => Ok(Box::new(PortTransport::new(PortHost::Raw, device))),
        MidiBackend::Jack => Ok(Box::new(PortTransport::new(PortHost::Jack, device))),
    }
}

#[cfg(target_os = "linux")]
fn sequencer_transport(device: &str) -> Result<Box<dyn MidiTransport>, TransportError> {
    Ok(Box::new(SequencerTransport::new(device)))
}

#[cfg(not(target_os = "linux"))]
fn sequencer_transport(_device: &str) -> Result<Box<dyn MidiTransport>, TransportError> {
    Err(TransportError::Unsupported {
        transport: "ALSA sequencer",
    })
}
