// src/connector.rs  -  packet framing and connection state on a serial port
//
// OPEN SEQUENCE (one candidate port)
//   1. Open with the bridge settings, purge.
//   2. Read up to three delimiter-framed packets.  Discard the first.
//      The second must be nonzero; the third must be either the full
//      54-byte packet or a 2-byte short packet.
//   3. Full packet → run the class-specific handshake (writes "FF\r",
//      parses the comma-separated reply, captures the 12-digit address).
//      Short packet → the bridge is alive but no robot is paired.
//   4. Every candidate exhausted → no available bridge.
//
// FRAMING LOOP (per-robot I/O thread)
//   read() is called every iteration.  A length-matching packet resets
//   the liveness timer; anything else, while connected, starts one.
//   Silence beyond 100 ms purges the port and transitions to
//   Connection Lost.  The thread stays alive, so a later full-length
//   frame flips the state straight back to Connected.

use crate::serial::{self, SerialTransport};
use std::time::{Duration, Instant};

/// Inbound/outbound packet length, terminating 0x0D included
pub const VALID_PACKET_LENGTH: usize = 54;

/// Packet delimiter (carriage return)
pub const PACKET_DELIMITER: u8 = 0x0D;

/// Silence threshold while connected
const LOSS_TIMEOUT: Duration = Duration::from_millis(100);

/// Retry budget for one framed read during probing (10 ms per attempt)
const PACKET_RETRY: usize = 10;

const DEFAULT_ADDRESS: &str = "000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    None,
    Connecting,
    Connected,
    ConnectionLost,
    Disconnected,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionResult {
    /// Handshake matched; address captured
    Found,
    /// Bridge present, robot not paired (2-byte short packets)
    NotConnected,
    /// Nothing usable on this port
    NotAvailable,
}

/// Class-specific handshake: probe the peer through `serial` and, on a
/// match, store the address and flip the connector to Connected.
pub type CheckConnection = fn(&mut Connector, &mut SerialTransport) -> ConnectionResult;

pub struct Connector {
    tag: &'static str,
    index: usize,
    packet_length: usize,
    delimiter: u8,
    address: String,
    port_name: String,
    found: bool,
    connected: bool,
    silence_since: Option<Instant>,
    serial: Option<SerialTransport>,
    check_connection: CheckConnection,
}

impl Connector {
    pub fn new(
        tag: &'static str,
        index: usize,
        packet_length: usize,
        delimiter: u8,
        check_connection: CheckConnection,
    ) -> Self {
        Self {
            tag,
            index,
            packet_length,
            delimiter,
            address: DEFAULT_ADDRESS.to_string(),
            port_name: String::new(),
            found: false,
            connected: false,
            silence_since: None,
            serial: None,
            check_connection,
        }
    }

    /// Probe `port_name`, or every enumerated port when None.  On
    /// `Found` the connector keeps the open transport for framing.
    pub fn open(&mut self, port_name: Option<&str>, baud_rate: u32) -> ConnectionResult {
        let result = match port_name {
            Some(name) => self.open_port(name, baud_rate),
            None => {
                let mut result = ConnectionResult::NotAvailable;
                for name in serial::list_port_names() {
                    result = self.open_port(&name, baud_rate);
                    if result != ConnectionResult::NotAvailable {
                        break;
                    }
                }
                result
            }
        };
        if result == ConnectionResult::NotAvailable {
            log::warn!("[{}:{}] no available USB to BLE bridge", self.tag, self.index);
        }
        result
    }

    fn open_port(&mut self, port_name: &str, baud_rate: u32) -> ConnectionResult {
        let mut serial = match SerialTransport::open(port_name, baud_rate) {
            Ok(serial) => serial,
            Err(e) => {
                log::debug!("[{}:{}] {e}", self.tag, self.index);
                return ConnectionResult::NotAvailable;
            }
        };
        serial.clear();
        self.port_name = port_name.to_string();

        let result = self.check_port(&mut serial);
        if result != ConnectionResult::NotAvailable {
            self.serial = Some(serial);
        }
        result
    }

    /// Three-packet probe deciding whether the peer speaks our framing.
    fn check_port(&mut self, serial: &mut SerialTransport) -> ConnectionResult {
        let _ = self.read_packet(serial, None);
        let second = self.read_packet(serial, None);
        let third = self.read_packet(serial, None);

        match third {
            Some(packet) if packet.len() == self.packet_length => {
                let check = self.check_connection;
                check(self, serial)
            }
            Some(packet) if packet.len() == 2 && second.is_some() => {
                log::warn!("[{}:{}] not connected", self.tag, self.index);
                ConnectionResult::NotConnected
            }
            _ => ConnectionResult::NotAvailable,
        }
    }

    /// Bounded retry read of one framed packet.  With `start_bytes`,
    /// only a packet carrying that 2-byte prefix is returned; others are
    /// discarded within the retry budget.
    pub fn read_packet(
        &mut self,
        serial: &mut SerialTransport,
        start_bytes: Option<&[u8]>,
    ) -> Option<Vec<u8>> {
        for _ in 0..PACKET_RETRY {
            std::thread::sleep(Duration::from_millis(10));
            if let Some(line) = serial.read_until(self.delimiter) {
                match start_bytes {
                    None => return Some(line),
                    Some(prefix) if line.starts_with(prefix) => return Some(line),
                    Some(_) => {}
                }
            }
        }
        None
    }

    /// One framing step.  Returns a full-length packet when available
    /// and maintains the liveness timer otherwise.
    pub fn read(&mut self) -> Option<Vec<u8>> {
        let line = self.serial.as_mut()?.read_until(self.delimiter);

        if let Some(line) = line {
            if line.len() == self.packet_length {
                if !self.connected {
                    self.set_connection_state(ConnectionState::Connected);
                }
                self.silence_since = None;
                return Some(line);
            }
        }

        if self.connected {
            match self.silence_since {
                None => self.silence_since = Some(Instant::now()),
                Some(since) if since.elapsed() > LOSS_TIMEOUT => {
                    if let Some(serial) = self.serial.as_mut() {
                        serial.clear();
                    }
                    self.silence_since = None;
                    self.set_connection_state(ConnectionState::ConnectionLost);
                }
                Some(_) => {}
            }
        }
        None
    }

    pub fn write(&mut self, bytes: &[u8]) {
        if let Some(serial) = self.serial.as_mut() {
            serial.write(bytes);
        }
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        self.connected = state == ConnectionState::Connected;
        if self.connected && !self.found {
            self.found = true;
        }
        if self.found {
            self.print_state(state);
        }
    }

    fn print_state(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                log::info!("[{}:{}] Connected: {}", self.tag, self.index, self.port_name);
            }
            ConnectionState::ConnectionLost => {
                log::info!("[{}:{}] Connection lost", self.tag, self.index);
            }
            ConnectionState::Disconnected => {
                log::info!("[{}:{}] Disconnected", self.tag, self.index);
            }
            ConnectionState::Disposed => {
                log::info!("[{}:{}] Disposed", self.tag, self.index);
            }
            ConnectionState::None | ConnectionState::Connecting => {}
        }
    }

    /// Drop the transport and report the terminal state.
    pub fn close(&mut self) {
        self.serial = None;
        self.connected = false;
        self.print_state(ConnectionState::Disposed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_address(&mut self, address: &str) {
        self.address = address.to_string();
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}
