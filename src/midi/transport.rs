//! MIDI transport interface.
//!
//! A transport opens a client on the host's MIDI system and delivers what it
//! receives as [`TransportMessage`]s through an [`EventStream`]. Delivery runs
//! on the transport's own thread; the stream is drained by the MIDI pump.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// A pre-parsed sequencer event record.
///
/// Field widths follow the sequencer API, so values may exceed MIDI ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqRecord {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    KeyPressure { channel: u8, note: u8, pressure: u8 },
    Controller { channel: u8, param: u32, value: i32 },
    ProgramChange { channel: u8, value: i32 },
    ChannelPressure { channel: u8, value: i32 },
    /// Signed offset from centre, as delivered by the sequencer.
    PitchBend { channel: u8, value: i32 },
    /// Any event kind the synthesizer has no use for.
    Unsupported,
}

/// One inbound message in its transport-specific shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// Status byte followed by data bytes.
    Wire(Vec<u8>),
    Sequencer(SeqRecord),
}

/// Outcome of waiting on an [`EventStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Message(TransportMessage),
    /// Nothing arrived within the timeout.
    Idle,
    /// The transport dropped its sending side.
    Closed,
}

/// Receiving end of a transport.
#[derive(Debug)]
pub struct EventStream {
    rx: Receiver<TransportMessage>,
}

impl EventStream {
    /// Creates a connected sender and stream.
    pub fn channel() -> (Sender<TransportMessage>, EventStream) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, EventStream { rx })
    }

    /// Waits up to `timeout` for the next message.
    pub fn next_event(&self, timeout: Duration) -> StreamEvent {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => StreamEvent::Message(msg),
            Err(RecvTimeoutError::Timeout) => StreamEvent::Idle,
            Err(RecvTimeoutError::Disconnected) => StreamEvent::Closed,
        }
    }
}

/// Error from a MIDI transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{transport} is not supported by this build")]
    Unsupported { transport: &'static str },

    #[error("cannot open {transport}: {reason}")]
    Open {
        transport: &'static str,
        reason: String,
    },

    #[error("{0} is not open")]
    NotOpen(&'static str),

    #[error("{transport} connection refresh failed: {reason}")]
    Refresh {
        transport: &'static str,
        reason: String,
    },

    #[error("{transport} did not close cleanly: {reason}")]
    Close {
        transport: &'static str,
        reason: String,
    },
}

/// A host MIDI input system.
pub trait MidiTransport {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Registers `client_name` with the MIDI system and starts delivery.
    ///
    /// With `autoconnect`, every existing MIDI source is connected.
    fn open(&mut self, client_name: &str, autoconnect: bool) -> Result<EventStream, TransportError>;

    /// Connects sources that appeared since the last refresh. Returns how many
    /// new connections were made.
    fn refresh_connections(&mut self) -> Result<usize, TransportError>;

    /// Stops delivery. The stream reports [`StreamEvent::Closed`] afterwards.
    fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_reports_idle_then_closed() {
        let (tx, stream) = EventStream::channel();
        assert_eq!(stream.next_event(Duration::from_millis(5)), StreamEvent::Idle);

        tx.send(TransportMessage::Wire(vec![0x90, 60, 100])).unwrap();
        assert_eq!(
            stream.next_event(Duration::from_millis(5)),
            StreamEvent::Message(TransportMessage::Wire(vec![0x90, 60, 100]))
        );

        drop(tx);
        assert_eq!(stream.next_event(Duration::from_millis(5)), StreamEvent::Closed);
    }
}
