//! Port-based MIDI transport on `midir`.
//!
//! Opens a virtual input port other clients can connect to, and with
//! autoconnect also connects to every existing input source. Messages arrive
//! as raw wire bytes on midir's callback thread.

use std::collections::HashSet;

use crossbeam_channel::Sender;
use midir::{Ignore, MidiInput, MidiInputConnection};
use tracing::{debug, info, warn};

use super::transport::{EventStream, MidiTransport, TransportError, TransportMessage};

/// Which MIDI system the port transport is hosted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortHost {
    /// Kernel raw MIDI ports.
    Raw,
    /// A JACK server.
    Jack,
}

impl PortHost {
    fn transport_name(self) -> &'static str {
        match self {
            PortHost::Raw => "raw MIDI",
            PortHost::Jack => "JACK MIDI",
        }
    }

    /// midir is built against exactly one host, so the `jack` feature
    /// replaces raw MIDI rather than adding to it.
    fn supported(self) -> bool {
        match self {
            PortHost::Raw => !cfg!(feature = "jack"),
            PortHost::Jack => cfg!(feature = "jack"),
        }
    }
}

/// [`MidiTransport`] delivering raw wire bytes through `midir`.
pub struct PortTransport {
    host: PortHost,
    /// Only sources whose name contains this are connected. Empty matches all.
    device_filter: String,
    client_name: String,
    sender: Option<Sender<TransportMessage>>,
    virtual_port: Option<MidiInputConnection<()>>,
    connections: Vec<MidiInputConnection<()>>,
    connected: HashSet<String>,
}

impl PortTransport {
    pub fn new(host: PortHost, device_filter: impl Into<String>) -> Self {
        Self {
            host,
            device_filter: device_filter.into(),
            client_name: String::new(),
            sender: None,
            virtual_port: None,
            connections: Vec::new(),
            connected: HashSet::new(),
        }
    }

    fn input(&self) -> Result<MidiInput, String> {
        let mut input = MidiInput::new(&self.client_name).map_err(|e| e.to_string())?;
        input.ignore(Ignore::All);
        Ok(input)
    }

    fn wants(&self, port_name: &str) -> bool {
        if port_name.contains(&self.client_name) || self.connected.contains(port_name) {
            return false;
        }
        self.device_filter.is_empty() || port_name.contains(&self.device_filter)
    }

    /// Connects every wanted source not yet connected.
    fn connect_sources(&mut self) -> Result<usize, String> {
        let sender = self.sender.clone().ok_or("not open")?;
        let lister = self.input()?;
        let names: Vec<String> = lister
            .ports()
            .iter()
            .filter_map(|p| lister.port_name(p).ok())
            .filter(|name| self.wants(name))
            .collect();

        let mut made = 0;
        for name in names {
            // Each connection consumes its own MidiInput.
            let input = self.input()?;
            let Some(port) = input
                .ports()
                .into_iter()
                .find(|p| input.port_name(p).map(|n| n == name).unwrap_or(false))
            else {
                continue;
            };
            let tx = sender.clone();
            match input.connect(
                &port,
                &format!("{} input", self.client_name),
                move |_ts, bytes, _| {
                    let _ = tx.send(TransportMessage::Wire(bytes.to_vec()));
                },
                (),
            ) {
                Ok(conn) => {
                    info!(port = %name, "Connected MIDI source");
                    self.connections.push(conn);
                    self.connected.insert(name);
                    made += 1;
                }
                Err(e) => warn!(port = %name, error = %e, "Could not connect MIDI source"),
            }
        }
        Ok(made)
    }

    #[cfg(unix)]
    fn open_virtual(&mut self, sender: Sender<TransportMessage>) -> Result<(), String> {
        use midir::os::unix::VirtualInput;

        let input = self.input()?;
        let conn = input
            .create_virtual(
                &self.client_name,
                move |_ts, bytes, _| {
                    let _ = sender.send(TransportMessage::Wire(bytes.to_vec()));
                },
                (),
            )
            .map_err(|e| e.to_string())?;
        self.virtual_port = Some(conn);
        Ok(())
    }

    #[cfg(not(unix))]
    fn open_virtual(&mut self, _sender: Sender<TransportMessage>) -> Result<(), String> {
        Err("virtual ports are not available on this platform".into())
    }
}

impl MidiTransport for PortTransport {
    fn name(&self) -> &'static str {
        self.host.transport_name()
    }

    fn open(
        &mut self,
        client_name: &str,
        autoconnect: bool,
    ) -> Result<EventStream, TransportError> {
        let transport = self.name();
        if !self.host.supported() {
            return Err(TransportError::Unsupported { transport });
        }

        self.client_name = client_name.to_string();
        let (tx, stream) = EventStream::channel();
        self.open_virtual(tx.clone())
            .map_err(|reason| TransportError::Open { transport, reason })?;
        self.sender = Some(tx);
        info!(transport, client = client_name, "MIDI input port open");

        if autoconnect {
            match self.connect_sources() {
                Ok(n) => debug!(connections = n, "Autoconnected MIDI sources"),
                Err(reason) => warn!(%reason, "MIDI autoconnect failed"),
            }
        }
        Ok(stream)
    }

    fn refresh_connections(&mut self) -> Result<usize, TransportError> {
        let transport = self.name();
        if self.sender.is_none() {
            return Err(TransportError::NotOpen(transport));
        }
        self.connect_sources()
            .map_err(|reason| TransportError::Refresh { transport, reason })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        for conn in self.connections.drain(..) {
            conn.close();
        }
        if let Some(conn) = self.virtual_port.take() {
            conn.close();
        }
        self.connected.clear();
        self.sender = None;
        debug!(transport = self.name(), "MIDI input closed");
        Ok(())
    }
}

impl Drop for PortTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_filter_skips_own_and_connected_ports() {
        let mut t = PortTransport::new(PortHost::Raw, "");
        t.client_name = "MidiSynth Daemon".into();
        assert!(t.wants("USB Keyboard:USB Keyboard MIDI 1 20:0"));
        assert!(!t.wants("MidiSynth Daemon:MidiSynth Daemon 128:0"));
        t.connected.insert("USB Keyboard".into());
        assert!(!t.wants("USB Keyboard"));
    }

    #[test]
    fn device_filter_limits_sources() {
        let mut t = PortTransport::new(PortHost::Raw, "Keystation");
        t.client_name = "synth".into();
        assert!(t.wants("Keystation 49 MIDI 1"));
        assert!(!t.wants("Launchpad"));
    }

    #[test]
    fn refresh_before_open_fails() {
        let mut t = PortTransport::new(PortHost::Raw, "");
        assert!(matches!(
            t.refresh_connections(),
            Err(TransportError::NotOpen(_))
        ));
    }

    #[test]
    fn exactly_one_port_host_per_build() {
        assert_ne!(PortHost::Raw.supported(), PortHost::Jack.supported());
        let unavailable = if cfg!(feature = "jack") {
            PortHost::Raw
        } else {
            PortHost::Jack
        };
        let mut t = PortTransport::new(unavailable, "");
        assert!(matches!(
            t.open("synth", false),
            Err(TransportError::Unsupported { .. })
        ));
    }

    #[cfg(not(feature = "jack"))]
    #[test]
    fn jack_host_needs_feature() {
        let mut t = PortTransport::new(PortHost::Jack, "");
        assert!(matches!(
            t.open("synth", false),
            Err(TransportError::Unsupported { .. })
        ));
    }
}
