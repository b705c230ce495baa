// src/serial.rs  -  byte-stream transport over the USB-to-BLE bridge
//
// The bridge enumerates as an ordinary USB CDC serial port.  Settings
// required by its firmware:
//
//   115200 baud · 8 data bits · No parity · 1 stop bit
//   RTS/CTS hardware flow control, DTR + RTS asserted
//
// Inbound data is line-framed: every packet ends in a single 0x0D byte.
// read_until() drains whatever the OS has buffered into a growable
// accumulation buffer and hands out one complete line at a time, so a
// short read never consumes a partial packet.
//
// Linux:  port is typically /dev/ttyUSB0 or /dev/ttyACM0
//         Permissions: add yourself to the `dialout` group, or:
//           sudo chmod a+rw /dev/ttyUSB0
// Windows: port is COM3, COM4, …  (check Device Manager)
// macOS:  /dev/cu.usbserial-*  or /dev/cu.usbmodem*

use crate::error::{Result, RoboidError};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::time::Duration;

/// Baud rate of the USB-to-BLE bridge
pub const BAUD_BRIDGE: u32 = 115_200;

/// Bounded read timeout so a slow link never wedges the I/O thread
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Names of all serial ports on this machine, in enumeration order.
pub fn list_port_names() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            log::error!("[serial] port enumeration failed: {e}");
            Vec::new()
        }
    }
}

/// Human-readable port listing with USB VID/PID detail (used by --list-ports).
pub fn list_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .iter()
            .map(|p| {
                let detail = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => format!(
                        "USB VID:{:04x} PID:{:04x}{}",
                        info.vid,
                        info.pid,
                        info.product
                            .as_deref()
                            .map(|s| format!(" \"{}\"", s))
                            .unwrap_or_default()
                    ),
                    serialport::SerialPortType::BluetoothPort => "Bluetooth".into(),
                    _ => "Serial".into(),
                };
                format!("{}  ({})", p.port_name, detail)
            })
            .collect(),
        Err(e) => vec![format!("Serial port enumeration failed: {e}")],
    }
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    /// Accumulation buffer for read_until; grows geometrically via Vec
    buf: Vec<u8>,
}

impl SerialTransport {
    /// Open `port_name` with the bridge settings.  DTR and RTS are
    /// asserted after open; some drivers refuse while hardware flow
    /// control is active, which is only worth a warning.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let mut port: Box<dyn SerialPort> = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::Hardware)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| RoboidError::PortOpen {
                port: port_name.to_string(),
                source: e,
            })?;

        if let Err(e) = port.write_data_terminal_ready(true) {
            log::warn!("[serial] {port_name}: could not assert DTR: {e}");
        }
        if let Err(e) = port.write_request_to_send(true) {
            log::debug!("[serial] {port_name}: could not assert RTS: {e}");
        }

        log::debug!("[serial] opened {port_name} at {baud_rate} baud (8N1, RTS/CTS)");

        Ok(Self {
            port,
            buf: Vec::with_capacity(256),
        })
    }

    /// Purge both directions and drop everything accumulated so far.
    pub fn clear(&mut self) {
        self.buf.clear();
        if let Err(e) = self.port.clear(ClearBuffer::All) {
            log::debug!("[serial] purge failed: {e}");
        }
    }

    /// Non-blocking framed read: returns the first complete line
    /// (delimiter included) if one is accumulated, else None.  Bytes
    /// after the delimiter stay buffered for the next call.
    pub fn read_until(&mut self, delimiter: u8) -> Option<Vec<u8>> {
        if let Some(line) = take_line(&mut self.buf, delimiter) {
            return Some(line);
        }

        let mut chunk = [0u8; 256];
        loop {
            let pending = match self.port.bytes_to_read() {
                Ok(n) => n as usize,
                Err(e) => {
                    log::debug!("[serial] bytes_to_read failed: {e}");
                    return None;
                }
            };
            if pending == 0 {
                return None;
            }
            let want = pending.min(chunk.len());
            match self.port.read(&mut chunk[..want]) {
                Ok(0) => return None,
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    if let Some(line) = take_line(&mut self.buf, delimiter) {
                        return Some(line);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => return None,
                Err(e) => {
                    log::error!("[serial] read error: {e}");
                    return None;
                }
            }
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> bool {
        match self.port.write_all(bytes) {
            Ok(()) => true,
            Err(e) => {
                log::error!("[serial] write error: {e}");
                false
            }
        }
    }
}

/// Split the first delimiter-terminated line out of `buf`, shifting the
/// remainder down.  The delimiter byte is included in the returned line.
fn take_line(buf: &mut Vec<u8>, delimiter: u8) -> Option<Vec<u8>> {
    let pos = buf.iter().position(|&b| b == delimiter)?;
    let rest = buf.split_off(pos + 1);
    Some(std::mem::replace(buf, rest))
}

#[cfg(test)]
mod tests {
    use super::take_line;

    #[test]
    fn take_line_returns_first_complete_line() {
        let mut buf = b"FF,Hamster\rrest".to_vec();
        let line = take_line(&mut buf, b'\r').unwrap();
        assert_eq!(line, b"FF,Hamster\r");
        assert_eq!(buf, b"rest");
    }

    #[test]
    fn take_line_keeps_partial_input_buffered() {
        let mut buf = b"partial packet without delimiter".to_vec();
        assert!(take_line(&mut buf, b'\r').is_none());
        assert_eq!(buf, b"partial packet without delimiter");
    }

    #[test]
    fn take_line_handles_back_to_back_lines() {
        let mut buf = b"one\rtwo\r".to_vec();
        assert_eq!(take_line(&mut buf, b'\r').unwrap(), b"one\r");
        assert_eq!(take_line(&mut buf, b'\r').unwrap(), b"two\r");
        assert!(take_line(&mut buf, b'\r').is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn take_line_on_lone_delimiter() {
        let mut buf = b"\r".to_vec();
        assert_eq!(take_line(&mut buf, b'\r').unwrap(), b"\r");
        assert!(buf.is_empty());
    }
}
