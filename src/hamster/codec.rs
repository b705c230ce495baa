// src/hamster/codec.rs  -  54-byte wire codec + handshake
//
// MOTORING PACKET  (host → robot, ASCII, CR-terminated, 54 bytes)
//   [0]      topology, low nibble
//   [1..5)   literal "0010"
//   [5..7)   left wheel   (signed 8-bit, 2 hex)
//   [7..9)   right wheel  (signed 8-bit, 2 hex)
//   [9..11)  left LED color
//   [11..13) right LED color
//   [13..19) buzzer Hz × 100  (3 bytes, 6 hex)
//   [19..21) note
//   [21..23) (mode << 3) | ((speed - 1) & 7) | toggle flag
//   [23..25) proximity config
//   [25..27) (gravity << 4) | bandwidth
//   [27..29) (io mode A << 4) | io mode B
//   [29..31) output A
//   [31..33) output B
//   [33..39) literal "000000"
//   [39]     '-'
//   [40..52) 12-digit bridge address
//   [52]     pad
//   [53]     CR
//
// SENSORY PACKET  (robot → host, 54 bytes)
//   [6..8)   signal strength   (raw - 0x100)
//   [8..12)  left / right proximity
//   [12..16) left / right floor
//   [16..28) acceleration x/y/z  (16-bit, raw - 0x10000 when > 0x7FFF)
//   [28..30) slow-channel discriminator: "00" → light, else temperature
//   [30..34) light        (when discriminator is "00")
//   [30..32) temperature  (signed code t; exposed as t/2 + 24)
//   [34..38) input A / input B
//   [38..40) line tracer state byte
//
// HANDSHAKE
//   Host → peer:  "FF\r"
//   Peer → host:  "FF,<model>,04,<x>,<12-hex-address>\r"
//   Accepted iff the model is "Hamster" (case-insensitive) and field 2
//   equals "04".

use super::{idx, Motoring};
use crate::connector::{ConnectionResult, ConnectionState, Connector};
use crate::device::DeviceTable;
use crate::serial::SerialTransport;

pub(super) const MOTORING_PACKET_LENGTH: usize = 54;
pub(super) const SENSORY_PACKET_LENGTH: usize = 54;

const HANDSHAKE_RETRY: usize = 10;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

fn hex_digit_value(byte: u8) -> i32 {
    match byte {
        b'0'..=b'9' => (byte - b'0') as i32,
        b'a'..=b'f' => (byte - b'a') as i32 + 10,
        b'A'..=b'F' => (byte - b'A') as i32 + 10,
        _ => 0,
    }
}

pub(super) fn hex_to_value(buf: &[u8], start: usize, end: usize) -> i32 {
    buf[start..end]
        .iter()
        .fold(0, |acc, &b| (acc << 4) + hex_digit_value(b))
}

/// Append the low `bytes` bytes of `value` as big-endian hex pairs.
fn push_hex(out: &mut Vec<u8>, value: i32, bytes: usize) {
    for i in 0..bytes {
        let byte = (value >> ((bytes - 1 - i) * 8)) & 0xff;
        out.push(HEX_DIGITS[((byte >> 4) & 0xf) as usize]);
        out.push(HEX_DIGITS[(byte & 0xf) as usize]);
    }
}

/// Pack the motoring snapshot into one outbound frame.  A line-tracer
/// mode that was newly written and nonzero toggles the flag bit here,
/// arming the completion state machine.
pub(super) fn encode_motoring(m: &mut Motoring, address: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(MOTORING_PACKET_LENGTH);

    out.push(HEX_DIGITS[(m.topology & 0x0f) as usize]);
    out.extend_from_slice(b"0010");
    push_hex(&mut out, m.left_wheel, 1);
    push_hex(&mut out, m.right_wheel, 1);
    push_hex(&mut out, m.left_led, 1);
    push_hex(&mut out, m.right_led, 1);
    push_hex(&mut out, (m.buzzer * 100.0) as i32, 3);
    push_hex(&mut out, m.note, 1);

    if m.line_tracer_mode_written {
        if m.line_tracer_mode > 0 {
            m.line_tracer_flag ^= 0x80;
            m.line_tracer_event = 1;
        }
        m.line_tracer_mode_written = false;
    }
    let mut tracer = (m.line_tracer_mode & 0x0f) << 3;
    tracer |= (m.line_tracer_speed - 1) & 0x07;
    tracer |= m.line_tracer_flag;
    push_hex(&mut out, tracer, 1);

    push_hex(&mut out, m.config_proximity, 1);
    push_hex(&mut out, ((m.config_gravity & 0x0f) << 4) | (m.config_band_width & 0x0f), 1);
    push_hex(&mut out, ((m.io_mode_a & 0x0f) << 4) | (m.io_mode_b & 0x0f), 1);
    push_hex(&mut out, m.output_a, 1);
    push_hex(&mut out, m.output_b, 1);
    out.extend_from_slice(b"000000");
    out.push(b'-');
    let addr = address.as_bytes();
    for i in 0..12 {
        out.push(*addr.get(i).unwrap_or(&b'0'));
    }
    out.push(b'0');
    out.push(b'\r');
    out
}

/// Decode one inbound frame into the staged sensor cells.  The slow
/// channel multiplexes light and temperature; the last seen value of
/// each is latched in the motoring scratch so polling always reads the
/// most recent of both.
pub(super) fn decode_sensory(devices: &DeviceTable, m: &mut Motoring, packet: &[u8]) -> bool {
    if packet.len() < SENSORY_PACKET_LENGTH {
        return false;
    }

    devices
        .at(idx::SIGNAL_STRENGTH)
        .put(hex_to_value(packet, 6, 8) - 0x100);
    devices.at(idx::LEFT_PROXIMITY).put(hex_to_value(packet, 8, 10));
    devices.at(idx::RIGHT_PROXIMITY).put(hex_to_value(packet, 10, 12));
    devices.at(idx::LEFT_FLOOR).put(hex_to_value(packet, 12, 14));
    devices.at(idx::RIGHT_FLOOR).put(hex_to_value(packet, 14, 16));

    for (axis, start) in [(0usize, 16usize), (1, 20), (2, 24)] {
        let mut value = hex_to_value(packet, start, start + 4);
        if value > 0x7FFF {
            value -= 0x10000;
        }
        devices.at(idx::ACCELERATION).put_at(axis, value);
    }

    if hex_to_value(packet, 28, 30) == 0 {
        m.light = hex_to_value(packet, 30, 34);
    } else {
        let mut code = hex_to_value(packet, 30, 32);
        if code > 0x7F {
            code -= 0x100;
        }
        m.temperature = (code as f32 / 2.0 + 24.0) as i32;
    }
    devices.at(idx::LIGHT).put(m.light);
    devices.at(idx::TEMPERATURE).put(m.temperature);

    devices.at(idx::INPUT_A).put(hex_to_value(packet, 34, 36));
    devices.at(idx::INPUT_B).put(hex_to_value(packet, 36, 38));

    let state = hex_to_value(packet, 38, 40);
    if state & 0x40 != 0 {
        if m.line_tracer_event == 1 && state != 0x40 {
            m.line_tracer_event = 2;
        }
        if m.line_tracer_event == 2 && state != m.line_tracer_state {
            m.line_tracer_state = state;
            devices.at(idx::LINE_TRACER_STATE).put(state);
            if state == 0x40 {
                m.line_tracer_event = 0;
            }
        }
    }
    true
}

/// Class handshake run by the connector once a full-length frame has
/// been seen on a candidate port.
pub fn check_connection(connector: &mut Connector, serial: &mut SerialTransport) -> ConnectionResult {
    for _ in 0..HANDSHAKE_RETRY {
        serial.write(b"FF\r");
        if let Some(reply) = connector.read_packet(serial, Some(b"FF")) {
            return match parse_handshake(&reply) {
                Some(address) => {
                    connector.set_address(&address);
                    connector.set_connection_state(ConnectionState::Connected);
                    ConnectionResult::Found
                }
                None => ConnectionResult::NotAvailable,
            };
        }
    }
    ConnectionResult::NotAvailable
}

pub(super) fn parse_handshake(reply: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(reply).ok()?;
    let fields: Vec<&str> = text.trim_end_matches('\r').split(',').collect();
    if fields.len() < 5 {
        return None;
    }
    if !fields[1].eq_ignore_ascii_case("Hamster") || fields[2] != "04" {
        return None;
    }
    let tail = fields[4];
    if tail.len() < 12 {
        return None;
    }
    Some(tail[..12].to_string())
}

#[cfg(test)]
mod tests {
    use super::super::device_table;
    use super::*;

    fn put_field(packet: &mut [u8], start: usize, hex: &str) {
        packet[start..start + hex.len()].copy_from_slice(hex.as_bytes());
    }

    /// All-zero sensory frame with the terminating CR.
    fn blank_sensory() -> Vec<u8> {
        let mut packet = vec![b'0'; SENSORY_PACKET_LENGTH];
        packet[SENSORY_PACKET_LENGTH - 1] = b'\r';
        packet
    }

    #[test]
    fn motoring_packet_is_54_bytes_and_cr_terminated() {
        let mut m = Motoring::default();
        let frame = encode_motoring(&mut m, "AABBCCDDEEFF");
        assert_eq!(frame.len(), MOTORING_PACKET_LENGTH);
        assert_eq!(*frame.last().unwrap(), b'\r');
        assert_eq!(&frame[1..5], b"0010");
        assert_eq!(&frame[40..52], b"AABBCCDDEEFF");
        assert_eq!(frame[39], b'-');
    }

    #[test]
    fn wheel_speeds_encode_as_signed_bytes() {
        let mut m = Motoring::default();
        m.left_wheel = 50;
        m.right_wheel = -50;
        let frame = encode_motoring(&mut m, "AABBCCDDEEFF");
        assert_eq!(&frame[5..9], b"32CE");
    }

    #[test]
    fn tracer_flag_toggles_once_per_newly_written_mode() {
        let mut m = Motoring::default();
        m.line_tracer_mode = 6;
        m.line_tracer_mode_written = true;

        let first = encode_motoring(&mut m, "AABBCCDDEEFF");
        // (6 << 3) | ((5 - 1) & 7) | 0x80 = 0xB4
        assert_eq!(&first[21..23], b"B4");
        assert_eq!(m.line_tracer_event, 1);

        // Not newly written: flag must hold
        let second = encode_motoring(&mut m, "AABBCCDDEEFF");
        assert_eq!(&second[21..23], b"B4");

        m.line_tracer_mode_written = true;
        let third = encode_motoring(&mut m, "AABBCCDDEEFF");
        assert_eq!(&third[21..23], b"34");
    }

    #[test]
    fn buzzer_frequency_scales_by_100() {
        let mut m = Motoring::default();
        m.buzzer = 440.0;
        let frame = encode_motoring(&mut m, "AABBCCDDEEFF");
        // 440 * 100 = 44000 = 0x00ABE0
        assert_eq!(&frame[13..19], b"00ABE0");
    }

    #[test]
    fn acceleration_axes_sign_extend() {
        let devices = device_table();
        let mut m = Motoring::default();
        let mut packet = blank_sensory();
        put_field(&mut packet, 16, "7FFF");
        put_field(&mut packet, 20, "8000");
        put_field(&mut packet, 24, "0000");
        assert!(decode_sensory(&devices, &mut m, &packet));
        assert_eq!(devices.at(idx::ACCELERATION).read_at(0), 32767);
        assert_eq!(devices.at(idx::ACCELERATION).read_at(1), -32768);
        assert_eq!(devices.at(idx::ACCELERATION).read_at(2), 0);
    }

    #[test]
    fn signal_strength_wraps_below_zero() {
        let devices = device_table();
        let mut m = Motoring::default();
        let mut packet = blank_sensory();
        put_field(&mut packet, 6, "9C");
        decode_sensory(&devices, &mut m, &packet);
        assert_eq!(devices.at(idx::SIGNAL_STRENGTH).read(), 0x9C - 0x100);
    }

    #[test]
    fn light_and_temperature_latch_independently() {
        let devices = device_table();
        let mut m = Motoring::default();

        let mut packet = blank_sensory();
        put_field(&mut packet, 28, "00");
        put_field(&mut packet, 30, "0123");
        decode_sensory(&devices, &mut m, &packet);
        assert_eq!(devices.at(idx::LIGHT).read(), 0x123);
        assert_eq!(devices.at(idx::TEMPERATURE).read(), 0);

        // Temperature frame: code 0x14 = 20 → 20/2 + 24 = 34.
        // The latched light reading must survive.
        let mut packet = blank_sensory();
        put_field(&mut packet, 28, "01");
        put_field(&mut packet, 30, "14");
        decode_sensory(&devices, &mut m, &packet);
        assert_eq!(devices.at(idx::LIGHT).read(), 0x123);
        assert_eq!(devices.at(idx::TEMPERATURE).read(), 34);

        // Negative temperature code: 0xEC = -20 → -20/2 + 24 = 14
        let mut packet = blank_sensory();
        put_field(&mut packet, 28, "01");
        put_field(&mut packet, 30, "EC");
        decode_sensory(&devices, &mut m, &packet);
        assert_eq!(devices.at(idx::TEMPERATURE).read(), 14);
    }

    #[test]
    fn completing_maneuver_raises_exactly_one_state_event() {
        let devices = device_table();
        let mut m = Motoring::default();

        // User writes a completing mode; the next encode arms the machine.
        m.line_tracer_mode = 6;
        m.line_tracer_mode_written = true;
        let _ = encode_motoring(&mut m, "AABBCCDDEEFF");
        assert_eq!(m.line_tracer_event, 1);

        let mut edges = 0;
        for state in ["40", "44", "44", "40"] {
            let mut packet = blank_sensory();
            put_field(&mut packet, 38, state);
            decode_sensory(&devices, &mut m, &packet);
            devices.at(idx::LINE_TRACER_STATE).commit_event();
            if devices.at(idx::LINE_TRACER_STATE).event()
                && devices.at(idx::LINE_TRACER_STATE).read() == 0x40
            {
                edges += 1;
            }
        }
        assert_eq!(edges, 1);
        assert_eq!(m.line_tracer_event, 0);
    }

    #[test]
    fn handshake_reply_parses_model_and_address() {
        assert_eq!(
            parse_handshake(b"FF,Hamster,04,00,AABBCCDDEEFF\r").as_deref(),
            Some("AABBCCDDEEFF")
        );
        // Model name is case-insensitive
        assert_eq!(
            parse_handshake(b"FF,HAMSTER,04,00,AABBCCDDEEFF\r").as_deref(),
            Some("AABBCCDDEEFF")
        );
        assert!(parse_handshake(b"FF,Turtle,04,00,AABBCCDDEEFF\r").is_none());
        assert!(parse_handshake(b"FF,Hamster,05,00,AABBCCDDEEFF\r").is_none());
        assert!(parse_handshake(b"FF,Hamster,04,00,AABB\r").is_none());
        assert!(parse_handshake(b"FF,Hamster,04\r").is_none());
    }

    #[test]
    fn hex_helpers_round_trip_declared_ranges() {
        let mut out = Vec::new();
        push_hex(&mut out, -100, 1);
        assert_eq!(out, b"9C");
        assert_eq!(hex_to_value(b"9C", 0, 2), 0x9C);

        let mut out = Vec::new();
        push_hex(&mut out, 0xABE0, 3);
        assert_eq!(out, b"00ABE0");
        assert_eq!(hex_to_value(&out, 0, 6), 0xABE0);
    }
}
