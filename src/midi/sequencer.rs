//! ALSA sequencer transport.
//!
//! A reader thread owns the sequencer client: it creates a writable port,
//! subscribes to sources, and converts inbound sequencer events into
//! [`SeqRecord`]s. The thread also handles refresh requests so the client is
//! only ever touched from one thread.

use std::collections::HashSet;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use alsa::seq::{
    Addr, ClientIter, EvCtrl, EvNote, Event, EventType, PortCap, PortIter, PortSubscribe, PortType,
    Seq,
};
use alsa::{Direction, PollDescriptors};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use super::transport::{EventStream, MidiTransport, SeqRecord, TransportError, TransportMessage};

const TRANSPORT: &str = "ALSA sequencer";

/// Poll timeout of the reader thread, in milliseconds.
const POLL_MS: i32 = 100;

/// How long `open` and `refresh_connections` wait for the reader thread.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

const SYSTEM_CLIENT: i32 = 0;
const SYSTEM_ANNOUNCE_PORT: i32 = 1;

enum Command {
    Refresh(Sender<Result<usize, String>>),
}

struct Worker {
    handle: JoinHandle<()>,
    commands: Sender<Command>,
    stop: Arc<AtomicBool>,
}

/// [`MidiTransport`] on the ALSA sequencer.
pub struct SequencerTransport {
    device_filter: String,
    worker: Option<Worker>,
}

impl SequencerTransport {
    pub fn new(device_filter: impl Into<String>) -> Self {
        Self {
            device_filter: device_filter.into(),
            worker: None,
        }
    }
}

impl MidiTransport for SequencerTransport {
    fn name(&self) -> &'static str {
        TRANSPORT
    }

    fn open(
        &mut self,
        client_name: &str,
        autoconnect: bool,
    ) -> Result<EventStream, TransportError> {
        let open_err = |reason: String| TransportError::Open {
            transport: TRANSPORT,
            reason,
        };
        let name = CString::new(client_name).map_err(|e| open_err(e.to_string()))?;

        let (tx, stream) = EventStream::channel();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let filter = self.device_filter.clone();

        let handle = std::thread::Builder::new()
            .name("alsa-seq".into())
            .spawn(move || match SeqClient::open(&name, filter, autoconnect) {
                Ok(mut client) => {
                    let _ = ready_tx.send(Ok(client.addr()));
                    client.run(&tx, &cmd_rx, &thread_stop);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| open_err(e.to_string()))?;

        match ready_rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(Ok(addr)) => {
                info!(
                    client = addr.client,
                    port = addr.port,
                    name = client_name,
                    "Sequencer client open"
                );
                self.worker = Some(Worker {
                    handle,
                    commands: cmd_tx,
                    stop,
                });
                Ok(stream)
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(open_err(reason))
            }
            Err(_) => {
                stop.store(true, Ordering::Release);
                Err(open_err("sequencer did not respond".into()))
            }
        }
    }

    fn refresh_connections(&mut self) -> Result<usize, TransportError> {
        let worker = self.worker.as_ref().ok_or(TransportError::NotOpen(TRANSPORT))?;
        let refresh_err = |reason: String| TransportError::Refresh {
            transport: TRANSPORT,
            reason,
        };
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        worker
            .commands
            .send(Command::Refresh(reply_tx))
            .map_err(|_| refresh_err("reader thread has exited".into()))?;
        match reply_rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(result) => result.map_err(refresh_err),
            Err(_) => Err(refresh_err("no reply from reader thread".into())),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.stop.store(true, Ordering::Release);
        drop(worker.commands);
        worker.handle.join().map_err(|_| TransportError::Close {
            transport: TRANSPORT,
            reason: "reader thread panicked".into(),
        })?;
        debug!("Sequencer client closed");
        Ok(())
    }
}

impl Drop for SequencerTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Sequencer client state, owned by the reader thread.
struct SeqClient {
    seq: Seq,
    client: i32,
    port: i32,
    filter: String,
    autoconnect: bool,
    subscribed: HashSet<(i32, i32)>,
}

impl SeqClient {
    fn open(name: &CString, filter: String, autoconnect: bool) -> alsa::Result<Self> {
        let seq = Seq::open(None, Some(Direction::Capture), true)?;
        seq.set_client_name(name)?;
        let port = seq.create_simple_port(
            name,
            PortCap::WRITE | PortCap::SUBS_WRITE,
            PortType::MIDI_GENERIC | PortType::SYNTHESIZER | PortType::APPLICATION,
        )?;
        let client = seq.client_id()?;

        let mut this = Self {
            seq,
            client,
            port,
            filter,
            autoconnect,
            subscribed: HashSet::new(),
        };
        if autoconnect {
            // New sources are announced on the system port.
            if let Err(e) = this.subscribe(Addr {
                client: SYSTEM_CLIENT,
                port: SYSTEM_ANNOUNCE_PORT,
            }) {
                warn!(error = %e, "Cannot watch for new MIDI sources");
            }
            match this.connect_sources() {
                Ok(n) => debug!(connections = n, "Autoconnected MIDI sources"),
                Err(e) => warn!(error = %e, "MIDI autoconnect failed"),
            }
        }
        Ok(this)
    }

    fn addr(&self) -> Addr {
        Addr {
            client: self.client,
            port: self.port,
        }
    }

    fn subscribe(&mut self, sender: Addr) -> alsa::Result<()> {
        let sub = PortSubscribe::empty()?;
        sub.set_sender(sender);
        sub.set_dest(self.addr());
        self.seq.subscribe_port(&sub)?;
        self.subscribed.insert((sender.client, sender.port));
        Ok(())
    }

    /// Subscribes to every readable source port not yet connected.
    fn connect_sources(&mut self) -> alsa::Result<usize> {
        let mut candidates = Vec::new();
        for client in ClientIter::new(&self.seq) {
            let id = client.get_client();
            if id == SYSTEM_CLIENT || id == self.client {
                continue;
            }
            let client_name = client.get_name().unwrap_or("").to_string();
            for port in PortIter::new(&self.seq, id) {
                let caps = port.get_capability();
                let readable = caps.contains(PortCap::READ | PortCap::SUBS_READ);
                if !readable || caps.contains(PortCap::NO_EXPORT) {
                    continue;
                }
                let port_name = port.get_name().unwrap_or("");
                if !self.filter.is_empty()
                    && !client_name.contains(&self.filter)
                    && !port_name.contains(&self.filter)
                {
                    continue;
                }
                let addr = port.addr();
                if !self.subscribed.contains(&(addr.client, addr.port)) {
                    candidates.push((addr, format!("{}:{}", client_name, port_name)));
                }
            }
        }

        let mut made = 0;
        for (addr, label) in candidates {
            match self.subscribe(addr) {
                Ok(()) => {
                    info!(
                        source = %label,
                        client = addr.client,
                        port = addr.port,
                        "Connected MIDI source"
                    );
                    made += 1;
                }
                Err(e) => warn!(source = %label, error = %e, "Could not connect MIDI source"),
            }
        }
        Ok(made)
    }

    fn run(
        &mut self,
        tx: &Sender<TransportMessage>,
        commands: &Receiver<Command>,
        stop: &AtomicBool,
    ) {
        while !stop.load(Ordering::Acquire) {
            loop {
                match commands.try_recv() {
                    Ok(Command::Refresh(reply)) => {
                        let _ = reply.send(self.connect_sources().map_err(|e| e.to_string()));
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }

            let ready = (&self.seq, Some(Direction::Capture))
                .get()
                .and_then(|mut fds| alsa::poll::poll(&mut fds, POLL_MS));
            match ready {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Sequencer poll failed");
                    return;
                }
            }

            match self.drain(tx) {
                Drained::Ok { sources_changed } => {
                    if sources_changed && self.autoconnect {
                        if let Err(e) = self.connect_sources() {
                            debug!(error = %e, "Reconnect after announce failed");
                        }
                    }
                }
                Drained::ReceiverGone => return,
            }
        }
    }

    /// Reads every pending event.
    fn drain(&mut self, tx: &Sender<TransportMessage>) -> Drained {
        let mut sources_changed = false;
        let mut input = self.seq.input();
        loop {
            match input.event_input_pending(true) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "Sequencer input error");
                    break;
                }
            }
            let event = match input.event_input() {
                Ok(event) => event,
                Err(e) => {
                    debug!(error = %e, "Sequencer read failed");
                    break;
                }
            };
            match event.get_type() {
                EventType::PortStart | EventType::ClientStart => sources_changed = true,
                _ => {
                    let record = to_record(&event);
                    if tx.send(TransportMessage::Sequencer(record)).is_err() {
                        return Drained::ReceiverGone;
                    }
                }
            }
        }
        Drained::Ok { sources_changed }
    }
}

enum Drained {
    Ok { sources_changed: bool },
    ReceiverGone,
}

fn to_record(event: &Event<'_>) -> SeqRecord {
    let note = || event.get_data::<EvNote>();
    let ctrl = || event.get_data::<EvCtrl>();
    let record = match event.get_type() {
        EventType::Noteon => note().map(|n| SeqRecord::NoteOn {
            channel: n.channel,
            note: n.note,
            velocity: n.velocity,
        }),
        EventType::Noteoff => note().map(|n| SeqRecord::NoteOff {
            channel: n.channel,
            note: n.note,
            velocity: n.velocity,
        }),
        EventType::Keypress => note().map(|n| SeqRecord::KeyPressure {
            channel: n.channel,
            note: n.note,
            pressure: n.velocity,
        }),
        EventType::Controller => ctrl().map(|c| SeqRecord::Controller {
            channel: c.channel,
            param: c.param,
            value: c.value,
        }),
        EventType::Pgmchange => ctrl().map(|c| SeqRecord::ProgramChange {
            channel: c.channel,
            value: c.value,
        }),
        EventType::Chanpress => ctrl().map(|c| SeqRecord::ChannelPressure {
            channel: c.channel,
            value: c.value,
        }),
        EventType::Pitchbend => ctrl().map(|c| SeqRecord::PitchBend {
            channel: c.channel,
            value: c.value,
        }),
        _ => None,
    };
    record.unwrap_or(SeqRecord::Unsupported)
}
