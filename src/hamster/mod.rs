// src/hamster/mod.rs  -  the Hamster robot: device table, I/O thread, user facade
//
// A Hamster is a 27-entry device table (16 writable, 11 readable), a
// motoring scratch the scheduler snapshots once per tick, and one I/O
// thread that frames the serial link.  The peer always initiates: the
// I/O thread writes the outbound frame only as a reply to an inbound
// one, so the reply cadence equals the peer cadence.

mod board;
mod codec;

pub use codec::check_connection;

use crate::connector::{ConnectionResult, Connector, PACKET_DELIMITER, VALID_PACKET_LENGTH};
use crate::device::{Device, DeviceRole, DeviceTable};
use crate::error::{Result, RoboidError};
use crate::robot::{join_with_deadline, Robot, Wheeled};
use crate::runner::Runner;
use crate::serial::BAUD_BRIDGE;
use board::BoardMotion;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Device class identifier
pub const HAMSTER_ID: &str = "kr.robomation.physical.hamster";

const MAX_HAMSTERS: usize = 10;

/// Device ids of the Hamster table.  Only the low 12 bits index the
/// table; the full 32-bit constants are the public addressing surface.
pub mod device_id {
    pub const LEFT_WHEEL: u32 = 0x0040_0000;
    pub const RIGHT_WHEEL: u32 = 0x0040_0001;
    pub const BUZZER: u32 = 0x0040_0002;
    pub const OUTPUT_A: u32 = 0x0040_0003;
    pub const OUTPUT_B: u32 = 0x0040_0004;
    pub const TOPOLOGY: u32 = 0x0040_0005;
    pub const LEFT_LED: u32 = 0x0040_0006;
    pub const RIGHT_LED: u32 = 0x0040_0007;
    pub const NOTE: u32 = 0x0040_0008;
    pub const LINE_TRACER_MODE: u32 = 0x0040_0009;
    pub const LINE_TRACER_SPEED: u32 = 0x0040_000a;
    pub const IO_MODE_A: u32 = 0x0040_000b;
    pub const IO_MODE_B: u32 = 0x0040_000c;
    pub const CONFIG_PROXIMITY: u32 = 0x0040_000d;
    pub const CONFIG_GRAVITY: u32 = 0x0040_000e;
    pub const CONFIG_BAND_WIDTH: u32 = 0x0040_000f;
    pub const SIGNAL_STRENGTH: u32 = 0x0040_0010;
    pub const LEFT_PROXIMITY: u32 = 0x0040_0011;
    pub const RIGHT_PROXIMITY: u32 = 0x0040_0012;
    pub const LEFT_FLOOR: u32 = 0x0040_0013;
    pub const RIGHT_FLOOR: u32 = 0x0040_0014;
    pub const ACCELERATION: u32 = 0x0040_0015;
    pub const LIGHT: u32 = 0x0040_0016;
    pub const TEMPERATURE: u32 = 0x0040_0017;
    pub const INPUT_A: u32 = 0x0040_0018;
    pub const INPUT_B: u32 = 0x0040_0019;
    pub const LINE_TRACER_STATE: u32 = 0x0040_001a;
}

/// Fixed table positions (device id low 12 bits).
pub(crate) mod idx {
    pub const LEFT_WHEEL: usize = 0;
    pub const RIGHT_WHEEL: usize = 1;
    pub const BUZZER: usize = 2;
    pub const OUTPUT_A: usize = 3;
    pub const OUTPUT_B: usize = 4;
    pub const TOPOLOGY: usize = 5;
    pub const LEFT_LED: usize = 6;
    pub const RIGHT_LED: usize = 7;
    pub const NOTE: usize = 8;
    pub const LINE_TRACER_MODE: usize = 9;
    pub const LINE_TRACER_SPEED: usize = 10;
    pub const IO_MODE_A: usize = 11;
    pub const IO_MODE_B: usize = 12;
    pub const CONFIG_PROXIMITY: usize = 13;
    pub const CONFIG_GRAVITY: usize = 14;
    pub const CONFIG_BAND_WIDTH: usize = 15;
    pub const SIGNAL_STRENGTH: usize = 16;
    pub const LEFT_PROXIMITY: usize = 17;
    pub const RIGHT_PROXIMITY: usize = 18;
    pub const LEFT_FLOOR: usize = 19;
    pub const RIGHT_FLOOR: usize = 20;
    pub const ACCELERATION: usize = 21;
    pub const LIGHT: usize = 22;
    pub const TEMPERATURE: usize = 23;
    pub const INPUT_A: usize = 24;
    pub const INPUT_B: usize = 25;
    pub const LINE_TRACER_STATE: usize = 26;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    Off = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Yellow = 6,
    White = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTracerMode {
    Off = 0,
    BlackLeftSensor = 1,
    BlackRightSensor = 2,
    BlackBothSensors = 3,
    BlackTurnLeft = 4,
    BlackTurnRight = 5,
    BlackMoveForward = 6,
    BlackUturn = 7,
    WhiteLeftSensor = 8,
    WhiteRightSensor = 9,
    WhiteBothSensors = 10,
    WhiteTurnLeft = 11,
    WhiteTurnRight = 12,
    WhiteMoveForward = 13,
    WhiteUturn = 14,
}

impl LineTracerMode {
    /// Maneuver modes finish on their own and raise one state event;
    /// the passive follow modes run until switched off.
    pub fn completes(self) -> bool {
        matches!(
            self,
            LineTracerMode::BlackTurnLeft
                | LineTracerMode::BlackTurnRight
                | LineTracerMode::BlackMoveForward
                | LineTracerMode::BlackUturn
                | LineTracerMode::WhiteTurnLeft
                | LineTracerMode::WhiteTurnRight
                | LineTracerMode::WhiteMoveForward
                | LineTracerMode::WhiteUturn
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    AnalogInput = 0,
    DigitalInput = 1,
    ServoOutput = 8,
    PwmOutput = 9,
    DigitalOutput = 10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    None = 0,
    DaisyChain = 1,
    Star = 2,
    ExtendedStar = 3,
}

/// Per-robot motoring scratch: the snapshot the scheduler builds from
/// the device table and the I/O thread encodes onto the wire, plus the
/// latched slow-channel readings and the line-tracer event machine.
pub(crate) struct Motoring {
    left_wheel: i32,
    right_wheel: i32,
    buzzer: f32,
    output_a: i32,
    output_b: i32,
    topology: i32,
    left_led: i32,
    right_led: i32,
    note: i32,
    line_tracer_mode: i32,
    line_tracer_speed: i32,
    io_mode_a: i32,
    io_mode_b: i32,
    config_proximity: i32,
    config_gravity: i32,
    config_band_width: i32,
    light: i32,
    temperature: i32,
    line_tracer_mode_written: bool,
    line_tracer_flag: i32,
    line_tracer_state: i32,
    line_tracer_event: i32,
}

impl Default for Motoring {
    fn default() -> Self {
        Self {
            left_wheel: 0,
            right_wheel: 0,
            buzzer: 0.0,
            output_a: 0,
            output_b: 0,
            topology: 0,
            left_led: 0,
            right_led: 0,
            note: 0,
            line_tracer_mode: 0,
            line_tracer_speed: 5,
            io_mode_a: 0,
            io_mode_b: 0,
            config_proximity: 2,
            config_gravity: 0,
            config_band_width: 3,
            light: 0,
            temperature: 0,
            line_tracer_mode_written: false,
            line_tracer_flag: 0,
            line_tracer_state: 0,
            line_tracer_event: 0,
        }
    }
}

/// The 27-entry Hamster device table, fixed in order.
pub(crate) fn device_table() -> DeviceTable {
    use device_id::*;
    DeviceTable::new(vec![
        Device::int(LEFT_WHEEL, "LeftWheel", DeviceRole::Effector, 1, -100, 100, 0),
        Device::int(RIGHT_WHEEL, "RightWheel", DeviceRole::Effector, 1, -100, 100, 0),
        Device::float(BUZZER, "Buzzer", DeviceRole::Effector, 1, 0.0, 167_772.15, 0.0),
        Device::int(OUTPUT_A, "OutputA", DeviceRole::Effector, 1, 0, 255, 0),
        Device::int(OUTPUT_B, "OutputB", DeviceRole::Effector, 1, 0, 255, 0),
        Device::int(TOPOLOGY, "Topology", DeviceRole::Command, 1, 0, 15, 0),
        Device::int(LEFT_LED, "LeftLed", DeviceRole::Command, 1, 0, 7, 0),
        Device::int(RIGHT_LED, "RightLed", DeviceRole::Command, 1, 0, 7, 0),
        Device::int(NOTE, "Note", DeviceRole::Command, 1, 0, 88, 0),
        Device::int(LINE_TRACER_MODE, "LineTracerMode", DeviceRole::Command, 1, 0, 15, 0),
        Device::int(LINE_TRACER_SPEED, "LineTracerSpeed", DeviceRole::Command, 1, 1, 8, 5),
        Device::int(IO_MODE_A, "IoModeA", DeviceRole::Command, 1, 0, 15, 0),
        Device::int(IO_MODE_B, "IoModeB", DeviceRole::Command, 1, 0, 15, 0),
        Device::int(CONFIG_PROXIMITY, "ConfigProximity", DeviceRole::Command, 1, 1, 7, 2),
        Device::int(CONFIG_GRAVITY, "ConfigGravity", DeviceRole::Command, 1, 0, 3, 0),
        Device::int(CONFIG_BAND_WIDTH, "ConfigBandWidth", DeviceRole::Command, 1, 1, 8, 3),
        Device::int(SIGNAL_STRENGTH, "SignalStrength", DeviceRole::Sensor, 1, -128, 0, 0),
        Device::int(LEFT_PROXIMITY, "LeftProximity", DeviceRole::Sensor, 1, 0, 255, 0),
        Device::int(RIGHT_PROXIMITY, "RightProximity", DeviceRole::Sensor, 1, 0, 255, 0),
        Device::int(LEFT_FLOOR, "LeftFloor", DeviceRole::Sensor, 1, 0, 255, 0),
        Device::int(RIGHT_FLOOR, "RightFloor", DeviceRole::Sensor, 1, 0, 255, 0),
        Device::int(ACCELERATION, "Acceleration", DeviceRole::Sensor, 3, -32768, 32767, 0),
        Device::int(LIGHT, "Light", DeviceRole::Sensor, 1, 0, 65535, 0),
        Device::int(TEMPERATURE, "Temperature", DeviceRole::Sensor, 1, -40, 88, 0),
        Device::int(INPUT_A, "InputA", DeviceRole::Sensor, 1, 0, 255, 0),
        Device::int(INPUT_B, "InputB", DeviceRole::Sensor, 1, 0, 255, 0),
        Device::int(LINE_TRACER_STATE, "LineTracerState", DeviceRole::Event, 1, 0, 255, 0),
    ])
}

pub(crate) struct HamsterCore {
    index: usize,
    name: Mutex<String>,
    devices: DeviceTable,
    motoring: Mutex<Motoring>,
    board: Mutex<BoardMotion>,
    bpm: Mutex<f64>,
    alive: AtomicBool,
    running: AtomicBool,
    ready: AtomicBool,
    io_thread: Mutex<Option<JoinHandle<()>>>,
}

impl HamsterCore {
    fn new(index: usize) -> Self {
        Self {
            index,
            name: Mutex::new("Hamster".to_string()),
            devices: device_table(),
            motoring: Mutex::new(Motoring::default()),
            board: Mutex::new(BoardMotion::new()),
            bpm: Mutex::new(60.0),
            alive: AtomicBool::new(true),
            running: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            io_thread: Mutex::new(None),
        }
    }

    fn encode_motoring(&self, address: &str) -> Vec<u8> {
        let mut motoring = self.motoring.lock().unwrap();
        codec::encode_motoring(&mut motoring, address)
    }

    fn decode_sensory(&self, packet: &[u8]) -> bool {
        let mut motoring = self.motoring.lock().unwrap();
        codec::decode_sensory(&self.devices, &mut motoring, packet)
    }
}

impl Robot for HamsterCore {
    fn index(&self) -> usize {
        self.index
    }

    fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    fn set_name(&self, name: &str) {
        *self.name.lock().unwrap() = name.to_string();
    }

    fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    fn update_sensory_state(&self) {
        self.devices
            .commit_events(idx::SIGNAL_STRENGTH..=idx::LINE_TRACER_STATE);
    }

    fn request_motoring_data(&self) {
        let d = &self.devices;
        let mut m = self.motoring.lock().unwrap();

        m.left_wheel = d.at(idx::LEFT_WHEEL).read();
        m.right_wheel = d.at(idx::RIGHT_WHEEL).read();
        m.buzzer = d.at(idx::BUZZER).read_float();
        m.output_a = d.at(idx::OUTPUT_A).read();
        m.output_b = d.at(idx::OUTPUT_B).read();

        if d.at(idx::TOPOLOGY).written() {
            m.topology = d.at(idx::TOPOLOGY).read();
        }
        if d.at(idx::LEFT_LED).written() {
            m.left_led = d.at(idx::LEFT_LED).read();
        }
        if d.at(idx::RIGHT_LED).written() {
            m.right_led = d.at(idx::RIGHT_LED).read();
        }
        if d.at(idx::NOTE).written() {
            m.note = d.at(idx::NOTE).read();
        }
        if d.at(idx::LINE_TRACER_MODE).written() {
            m.line_tracer_mode = d.at(idx::LINE_TRACER_MODE).read();
            m.line_tracer_mode_written = true;
        }
        if d.at(idx::LINE_TRACER_SPEED).written() {
            m.line_tracer_speed = d.at(idx::LINE_TRACER_SPEED).read();
        }
        if d.at(idx::IO_MODE_A).written() {
            m.io_mode_a = d.at(idx::IO_MODE_A).read();
        }
        if d.at(idx::IO_MODE_B).written() {
            m.io_mode_b = d.at(idx::IO_MODE_B).read();
        }
        if d.at(idx::CONFIG_PROXIMITY).written() {
            m.config_proximity = d.at(idx::CONFIG_PROXIMITY).read();
        }
        if d.at(idx::CONFIG_GRAVITY).written() {
            m.config_gravity = d.at(idx::CONFIG_GRAVITY).read();
        }
        if d.at(idx::CONFIG_BAND_WIDTH).written() {
            m.config_band_width = d.at(idx::CONFIG_BAND_WIDTH).read();
        }
        drop(m);

        d.clear_written_all();
    }

    fn update_motoring_state(&self) {
        self.devices
            .commit_events(idx::LEFT_WHEEL..=idx::CONFIG_BAND_WIDTH);
    }

    fn reset(&self) {
        self.devices.reset_all();
        *self.motoring.lock().unwrap() = Motoring::default();
    }

    fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn join_io(&self, grace: Duration) {
        if let Some(handle) = self.io_thread.lock().unwrap().take() {
            join_with_deadline(handle, grace, "hamster");
        }
    }
}

/// Per-robot I/O loop at ~200 Hz.  Reply cadence = peer cadence: one
/// outbound frame per consumed inbound frame.  On shutdown up to five
/// further iterations drain the link before the thread exits.
fn io_loop(core: Arc<HamsterCore>, mut connector: Connector, runner: Runner) {
    let mut shutdown = false;
    let mut drained = 0;

    loop {
        if let Some(packet) = connector.read() {
            if core.decode_sensory(&packet) && !core.ready.swap(true, Ordering::SeqCst) {
                runner.register_checked();
            }
            let address = connector.address().to_string();
            let frame = core.encode_motoring(&address);
            connector.write(&frame);
            if shutdown {
                break;
            }
        }
        if shutdown {
            drained += 1;
            if drained > 5 {
                break;
            }
        }
        if !core.running.load(Ordering::SeqCst) {
            shutdown = true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    connector.close();
}

/// User-facing handle to one Hamster robot.  All operations clamp
/// through the device layer and never panic on bad arguments.
pub struct Hamster {
    core: Arc<HamsterCore>,
    runner: Runner,
}

impl Hamster {
    /// Scan every serial port for a bridge and attach to the first one
    /// whose handshake matches.
    pub fn create(runner: &Runner) -> Result<Self> {
        Self::create_port(runner, None)
    }

    /// Attach through a specific serial port.  Blocks until the robot
    /// has produced its first decoded sensory packet.
    pub fn create_port(runner: &Runner, port_name: Option<&str>) -> Result<Self> {
        if runner.robot_count() >= MAX_HAMSTERS {
            return Err(RoboidError::RobotLimit(MAX_HAMSTERS));
        }

        let index = runner.robot_count();
        let core = Arc::new(HamsterCore::new(index));
        let as_robot: Arc<dyn Robot> = core.clone();
        runner.register(as_robot.clone());
        runner.register_required();
        core.running.store(true, Ordering::SeqCst);

        let mut connector = Connector::new(
            "hamster",
            index,
            VALID_PACKET_LENGTH,
            PACKET_DELIMITER,
            codec::check_connection,
        );

        match connector.open(port_name, BAUD_BRIDGE) {
            ConnectionResult::Found => {
                let thread_core = Arc::clone(&core);
                let thread_runner = runner.clone();
                let handle = thread::spawn(move || io_loop(thread_core, connector, thread_runner));
                *core.io_thread.lock().unwrap() = Some(handle);

                while !core.ready.load(Ordering::SeqCst) && core.running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(10));
                }

                Ok(Self {
                    core,
                    runner: runner.clone(),
                })
            }
            result => {
                runner.unregister(&as_robot);
                runner.unregister_required();
                core.shutdown();
                match result {
                    ConnectionResult::NotConnected => Err(RoboidError::BridgeNotConnected),
                    _ => Err(RoboidError::NoBridge),
                }
            }
        }
    }

    pub fn index(&self) -> usize {
        self.core.index
    }

    pub fn id(&self) -> &'static str {
        HAMSTER_ID
    }

    pub fn name(&self) -> String {
        Robot::name(&*self.core)
    }

    pub fn set_name(&self, name: &str) {
        self.core.set_name(name);
    }

    // ── Generic device access by id ─────────────────────────────────────

    /// One-tick event flag of a device.
    pub fn e(&self, device_id: u32) -> bool {
        self.core.devices.event(device_id)
    }

    pub fn read(&self, device_id: u32) -> i32 {
        self.core.devices.read(device_id)
    }

    pub fn read_at(&self, device_id: u32, index: usize) -> i32 {
        self.core.devices.read_at(device_id, index)
    }

    pub fn read_array(&self, device_id: u32, data: &mut [i32]) -> usize {
        self.core.devices.read_array(device_id, data)
    }

    pub fn read_float(&self, device_id: u32) -> f32 {
        self.core.devices.read_float(device_id)
    }

    pub fn read_float_at(&self, device_id: u32, index: usize) -> f32 {
        self.core.devices.read_float_at(device_id, index)
    }

    pub fn read_float_array(&self, device_id: u32, data: &mut [f32]) -> usize {
        self.core.devices.read_float_array(device_id, data)
    }

    pub fn write(&self, device_id: u32, data: i32) -> bool {
        self.core.devices.write(device_id, data)
    }

    pub fn write_at(&self, device_id: u32, index: usize, data: i32) -> bool {
        self.core.devices.write_at(device_id, index, data)
    }

    pub fn write_array(&self, device_id: u32, data: &[i32]) -> usize {
        self.core.devices.write_array(device_id, data)
    }

    pub fn write_float(&self, device_id: u32, data: f32) -> bool {
        self.core.devices.write_float(device_id, data)
    }

    pub fn write_float_at(&self, device_id: u32, index: usize, data: f32) -> bool {
        self.core.devices.write_float_at(device_id, index, data)
    }

    pub fn write_float_array(&self, device_id: u32, data: &[f32]) -> usize {
        self.core.devices.write_float_array(device_id, data)
    }

    // ── Line tracer ─────────────────────────────────────────────────────

    /// Switch the line tracer.  The completing maneuvers (turn / forward
    /// / u-turn) block until the robot reports the maneuver finished.
    pub fn line_tracer_mode(&self, mode: LineTracerMode) {
        let d = &self.core.devices;
        d.write(device_id::LEFT_WHEEL, 0);
        d.write(device_id::RIGHT_WHEEL, 0);
        d.write(device_id::LINE_TRACER_MODE, mode as i32);

        if mode.completes() {
            let core = Arc::clone(&self.core);
            self.runner.wait_until(move || {
                core.devices.event(device_id::LINE_TRACER_STATE)
                    && core.devices.read(device_id::LINE_TRACER_STATE) == 0x40
            });
        }
    }

    pub fn line_tracer_speed(&self, speed: f64) {
        self.core
            .devices
            .write(device_id::LINE_TRACER_SPEED, speed as i32);
    }

    // ── Board-step navigation ───────────────────────────────────────────

    /// Advance one cell on the board grid; returns when the robot has
    /// crossed the next intersection line.
    pub fn board_forward(&self) {
        self.core.board.lock().unwrap().begin();
        let d = &self.core.devices;
        d.write(device_id::LINE_TRACER_MODE, 0);
        d.write(device_id::LEFT_WHEEL, 45);
        d.write(device_id::RIGHT_WHEEL, 45);

        let core = Arc::clone(&self.core);
        self.runner
            .wait_until(move || core.board.lock().unwrap().step_forward(&core.devices));
    }

    pub fn board_left(&self) {
        self.core.board.lock().unwrap().begin();
        let d = &self.core.devices;
        d.write(device_id::LINE_TRACER_MODE, 0);
        d.write(device_id::LEFT_WHEEL, -45);
        d.write(device_id::RIGHT_WHEEL, 45);

        let core = Arc::clone(&self.core);
        self.runner
            .wait_until(move || core.board.lock().unwrap().step_left(&core.devices));
    }

    pub fn board_right(&self) {
        self.core.board.lock().unwrap().begin();
        let d = &self.core.devices;
        d.write(device_id::LINE_TRACER_MODE, 0);
        d.write(device_id::LEFT_WHEEL, 45);
        d.write(device_id::RIGHT_WHEEL, -45);

        let core = Arc::clone(&self.core);
        self.runner
            .wait_until(move || core.board.lock().unwrap().step_right(&core.devices));
    }

    // ── LEDs ────────────────────────────────────────────────────────────

    pub fn leds(&self, left_color: LedColor, right_color: LedColor) {
        let d = &self.core.devices;
        d.write(device_id::LEFT_LED, left_color as i32);
        d.write(device_id::RIGHT_LED, right_color as i32);
    }

    pub fn left_led(&self, color: LedColor) {
        self.core.devices.write(device_id::LEFT_LED, color as i32);
    }

    pub fn right_led(&self, color: LedColor) {
        self.core.devices.write(device_id::RIGHT_LED, color as i32);
    }

    // ── Sound ───────────────────────────────────────────────────────────

    /// 440 Hz for 200 ms.
    pub fn beep(&self) {
        let d = &self.core.devices;
        d.write(device_id::NOTE, 0);
        d.write_float(device_id::BUZZER, 440.0);
        self.runner.wait(200);
        d.write_float(device_id::BUZZER, 0.0);
    }

    /// Raw buzzer frequency in Hz; 0 switches the buzzer off.
    pub fn buzzer(&self, hz: f64) {
        let d = &self.core.devices;
        d.write(device_id::NOTE, 0);
        d.write_float(device_id::BUZZER, hz as f32);
    }

    /// Tempo for note() beat lengths, beats per minute (default 60).
    pub fn tempo(&self, bpm: f64) {
        if bpm > 0.0 {
            *self.core.bpm.lock().unwrap() = bpm;
        }
    }

    /// Sustain a note (1..=88, A0..C8) until replaced; 0 is off.
    pub fn pitch(&self, pitch: f64) {
        if pitch < 0.0 {
            return;
        }
        let d = &self.core.devices;
        d.write_float(device_id::BUZZER, 0.0);
        d.write(device_id::NOTE, pitch as i32);
    }

    /// Play a note for `beats` at the current tempo, with a 100 ms
    /// articulation gap when the tone is long enough to carry one.
    pub fn note(&self, pitch: f64, beats: f64) {
        if beats <= 0.0 {
            return;
        }
        let bpm = *self.core.bpm.lock().unwrap();
        if bpm <= 0.0 {
            return;
        }
        let pitch = pitch as i32;
        let duration = (beats * 60.0 * 1000.0 / bpm) as u64;
        let d = &self.core.devices;

        if pitch == 0 {
            d.write_float(device_id::BUZZER, 0.0);
            d.write(device_id::NOTE, 0);
            self.runner.wait(duration);
        } else if pitch > 0 {
            let tail = if duration > 100 { 100 } else { 0 };
            d.write_float(device_id::BUZZER, 0.0);
            d.write(device_id::NOTE, pitch);
            self.runner.wait(duration - tail);
            d.write(device_id::NOTE, 0);
            if tail > 0 {
                self.runner.wait(tail);
            }
        }
    }

    // ── GPIO ────────────────────────────────────────────────────────────

    pub fn io_mode_a(&self, mode: IoMode) {
        self.core.devices.write(device_id::IO_MODE_A, mode as i32);
    }

    pub fn io_mode_b(&self, mode: IoMode) {
        self.core.devices.write(device_id::IO_MODE_B, mode as i32);
    }

    pub fn output_a(&self, value: f64) {
        self.core.devices.write(device_id::OUTPUT_A, value as i32);
    }

    pub fn output_b(&self, value: f64) {
        self.core.devices.write(device_id::OUTPUT_B, value as i32);
    }

    pub fn topology(&self, topology: Topology) {
        self.core.devices.write(device_id::TOPOLOGY, topology as i32);
    }

    // ── Sensor readers ──────────────────────────────────────────────────

    pub fn signal_strength(&self) -> i32 {
        self.read(device_id::SIGNAL_STRENGTH)
    }

    pub fn left_proximity(&self) -> i32 {
        self.read(device_id::LEFT_PROXIMITY)
    }

    pub fn right_proximity(&self) -> i32 {
        self.read(device_id::RIGHT_PROXIMITY)
    }

    pub fn left_floor(&self) -> i32 {
        self.read(device_id::LEFT_FLOOR)
    }

    pub fn right_floor(&self) -> i32 {
        self.read(device_id::RIGHT_FLOOR)
    }

    pub fn acceleration_x(&self) -> i32 {
        self.read_at(device_id::ACCELERATION, 0)
    }

    pub fn acceleration_y(&self) -> i32 {
        self.read_at(device_id::ACCELERATION, 1)
    }

    pub fn acceleration_z(&self) -> i32 {
        self.read_at(device_id::ACCELERATION, 2)
    }

    pub fn light(&self) -> i32 {
        self.read(device_id::LIGHT)
    }

    pub fn temperature(&self) -> i32 {
        self.read(device_id::TEMPERATURE)
    }

    pub fn input_a(&self) -> i32 {
        self.read(device_id::INPUT_A)
    }

    pub fn input_b(&self) -> i32 {
        self.read(device_id::INPUT_B)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Devices and motoring scratch back to their initial values.
    pub fn reset(&self) {
        Robot::reset(&*self.core);
    }

    /// Detach from the runner, stop the I/O thread and join it.
    pub fn dispose(self) {
        let as_robot: Arc<dyn Robot> = self.core.clone();
        self.runner.unregister(&as_robot);
        self.core.reset();
        self.core.shutdown();
        self.core.join_io(Duration::from_secs(1));
        thread::sleep(Duration::from_millis(100));
    }
}

impl Wheeled for Hamster {
    /// Direct wheel speeds in percent (-100..100).  Switches the line
    /// tracer off; direct drive and the tracer are mutually exclusive on
    /// the wire.
    fn wheels(&self, left_speed: f64, right_speed: f64) {
        let d = &self.core.devices;
        d.write(device_id::LINE_TRACER_MODE, 0);
        d.write(device_id::LEFT_WHEEL, left_speed as i32);
        d.write(device_id::RIGHT_WHEEL, right_speed as i32);
    }

    fn left_wheel(&self, speed: f64) {
        let d = &self.core.devices;
        d.write(device_id::LINE_TRACER_MODE, 0);
        d.write(device_id::LEFT_WHEEL, speed as i32);
    }

    fn right_wheel(&self, speed: f64) {
        let d = &self.core.devices;
        d.write(device_id::LINE_TRACER_MODE, 0);
        d.write(device_id::RIGHT_WHEEL, speed as i32);
    }

    fn stop(&self) {
        let d = &self.core.devices;
        d.write(device_id::LINE_TRACER_MODE, 0);
        d.write(device_id::LEFT_WHEEL, 0);
        d.write(device_id::RIGHT_WHEEL, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_27_devices_in_wire_order() {
        let devices = device_table();
        assert_eq!(devices.len(), 27);
        assert_eq!(devices.at(idx::LEFT_WHEEL).name(), "LeftWheel");
        assert_eq!(devices.at(idx::LINE_TRACER_STATE).name(), "LineTracerState");
        assert_eq!(devices.get(device_id::ACCELERATION).unwrap().name(), "Acceleration");
        assert_eq!(devices.at(idx::LINE_TRACER_SPEED).read(), 5);
        assert_eq!(devices.at(idx::CONFIG_PROXIMITY).read(), 2);
        assert_eq!(devices.at(idx::CONFIG_BAND_WIDTH).read(), 3);
    }

    #[test]
    fn snapshot_reads_wheels_always_but_commands_only_when_written() {
        let core = HamsterCore::new(0);
        core.devices.write(device_id::LEFT_WHEEL, 50);
        core.devices.write(device_id::LEFT_LED, 4);
        core.request_motoring_data();
        {
            let m = core.motoring.lock().unwrap();
            assert_eq!(m.left_wheel, 50);
            assert_eq!(m.left_led, 4);
        }

        // Nothing rewritten: wheels refresh from the cell, the LED keeps
        // its last snapshot even though the cell still holds 4.
        core.request_motoring_data();
        {
            let m = core.motoring.lock().unwrap();
            assert_eq!(m.left_wheel, 50);
            assert_eq!(m.left_led, 4);
        }
        assert!(!core.devices.at(idx::LEFT_LED).written());
    }

    #[test]
    fn snapshot_clears_written_flags() {
        let core = HamsterCore::new(0);
        core.devices.write(device_id::NOTE, 40);
        assert!(core.devices.at(idx::NOTE).written());
        core.request_motoring_data();
        assert!(!core.devices.at(idx::NOTE).written());
        assert_eq!(core.motoring.lock().unwrap().note, 40);
    }

    #[test]
    fn line_tracer_mode_write_arms_the_encoder() {
        let core = HamsterCore::new(0);
        core.devices.write(device_id::LINE_TRACER_MODE, 6);
        core.request_motoring_data();
        let m = core.motoring.lock().unwrap();
        assert_eq!(m.line_tracer_mode, 6);
        assert!(m.line_tracer_mode_written);
    }

    #[test]
    fn sweeps_commit_disjoint_device_ranges() {
        let core = HamsterCore::new(0);
        core.devices.at(idx::LEFT_FLOOR).put(10);
        core.devices.write(device_id::LEFT_WHEEL, 10);

        core.update_sensory_state();
        assert!(core.devices.at(idx::LEFT_FLOOR).event());
        assert!(!core.devices.at(idx::LEFT_WHEEL).event());

        core.update_motoring_state();
        assert!(core.devices.at(idx::LEFT_WHEEL).event());
    }

    #[test]
    fn reset_restores_snapshot_defaults() {
        let core = HamsterCore::new(0);
        core.devices.write(device_id::LEFT_WHEEL, 80);
        core.request_motoring_data();
        core.reset();
        let m = core.motoring.lock().unwrap();
        assert_eq!(m.left_wheel, 0);
        assert_eq!(m.line_tracer_speed, 5);
        assert_eq!(core.devices.at(idx::LEFT_WHEEL).read(), 0);
    }

    #[test]
    fn full_tick_produces_the_expected_wheel_frame() {
        let core = HamsterCore::new(0);
        core.devices.write(device_id::LEFT_WHEEL, 50);
        core.devices.write(device_id::RIGHT_WHEEL, -50);
        core.request_motoring_data();
        let frame = core.encode_motoring("AABBCCDDEEFF");
        assert_eq!(frame.len(), 54);
        assert_eq!(&frame[5..9], b"32CE");
    }
}
