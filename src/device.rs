// src/device.rs  -  typed, clamped, event-tagged device cells
//
// A device is one addressable cell (or small fixed array) in a robot's
// table.  User writes go through write* (role-checked, clamped, set
// `fired` + `written`); the packet decoder uses put* (unchecked, sets
// only `fired`).  Once per tick the runner commits `event := fired;
// fired := false`, so `event` is true for exactly one tick after an
// update.  Cells are shared between the caller, scheduler and I/O
// threads; each keeps its mutable state behind its own mutex.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Sensor,
    Effector,
    Event,
    Command,
}

impl DeviceRole {
    /// Sensor and Event cells reject user writes.
    fn writable(self) -> bool {
        matches!(self, DeviceRole::Effector | DeviceRole::Command)
    }
}

/// Backing storage; conversions are lossy toward the stored kind.
#[derive(Debug, Clone)]
enum Values {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

impl Values {
    fn len(&self) -> usize {
        match self {
            Values::Int(v) => v.len(),
            Values::Float(v) => v.len(),
        }
    }

    fn get(&self, index: usize) -> i32 {
        match self {
            Values::Int(v) => v[index],
            Values::Float(v) => v[index] as i32,
        }
    }

    fn get_float(&self, index: usize) -> f32 {
        match self {
            Values::Int(v) => v[index] as f32,
            Values::Float(v) => v[index],
        }
    }
}

#[derive(Debug)]
struct CellState {
    values: Values,
    event: bool,
    fired: bool,
    written: bool,
}

pub struct Device {
    id: u32,
    name: &'static str,
    role: DeviceRole,
    min: f32,
    max: f32,
    initial: f32,
    state: Mutex<CellState>,
}

impl Device {
    pub fn int(
        id: u32,
        name: &'static str,
        role: DeviceRole,
        len: usize,
        min: i32,
        max: i32,
        initial: i32,
    ) -> Self {
        Self {
            id: id & 0xfff0_0fff,
            name,
            role,
            min: min as f32,
            max: max as f32,
            initial: initial as f32,
            state: Mutex::new(CellState {
                values: Values::Int(vec![initial; len]),
                event: false,
                fired: false,
                written: false,
            }),
        }
    }

    pub fn float(
        id: u32,
        name: &'static str,
        role: DeviceRole,
        len: usize,
        min: f32,
        max: f32,
        initial: f32,
    ) -> Self {
        Self {
            id: id & 0xfff0_0fff,
            name,
            role,
            min,
            max,
            initial,
            state: Mutex::new(CellState {
                values: Values::Float(vec![initial; len]),
                event: false,
                fired: false,
                written: false,
            }),
        }
    }

    /// Canonical device id.  Bits 12..19 carry the robot instance on the
    /// wire and are masked out, here and in table lookups.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// One-tick event flag: true iff the cell fired during the previous
    /// tick window.
    pub fn event(&self) -> bool {
        self.state.lock().unwrap().event
    }

    pub(crate) fn written(&self) -> bool {
        self.state.lock().unwrap().written
    }

    // ── Readers ──────────────────────────────────────────────────────────

    pub fn read(&self) -> i32 {
        self.read_at(0)
    }

    pub fn read_at(&self, index: usize) -> i32 {
        let state = self.state.lock().unwrap();
        if index >= state.values.len() {
            return 0;
        }
        state.values.get(index)
    }

    pub fn read_array(&self, data: &mut [i32]) -> usize {
        let state = self.state.lock().unwrap();
        let len = state.values.len().min(data.len());
        for (i, slot) in data.iter_mut().enumerate().take(len) {
            *slot = state.values.get(i);
        }
        len
    }

    pub fn read_float(&self) -> f32 {
        self.read_float_at(0)
    }

    pub fn read_float_at(&self, index: usize) -> f32 {
        let state = self.state.lock().unwrap();
        if index >= state.values.len() {
            return 0.0;
        }
        state.values.get_float(index)
    }

    pub fn read_float_array(&self, data: &mut [f32]) -> usize {
        let state = self.state.lock().unwrap();
        let len = state.values.len().min(data.len());
        for (i, slot) in data.iter_mut().enumerate().take(len) {
            *slot = state.values.get_float(i);
        }
        len
    }

    // ── User writes: role-checked, clamped, fire + mark written ─────────

    pub fn write(&self, data: i32) -> bool {
        self.write_at(0, data)
    }

    pub fn write_at(&self, index: usize, data: i32) -> bool {
        if !self.role.writable() {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        if index >= state.values.len() {
            return false;
        }
        self.store_clamped_int(&mut state.values, index, data);
        state.fired = true;
        state.written = true;
        true
    }

    pub fn write_array(&self, data: &[i32]) -> usize {
        if !self.role.writable() || data.is_empty() {
            return 0;
        }
        let mut state = self.state.lock().unwrap();
        let len = state.values.len().min(data.len());
        for (i, &value) in data.iter().enumerate().take(len) {
            self.store_clamped_int(&mut state.values, i, value);
        }
        state.fired = true;
        state.written = true;
        len
    }

    pub fn write_float(&self, data: f32) -> bool {
        self.write_float_at(0, data)
    }

    pub fn write_float_at(&self, index: usize, data: f32) -> bool {
        if !self.role.writable() {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        if index >= state.values.len() {
            return false;
        }
        self.store_clamped_float(&mut state.values, index, data);
        state.fired = true;
        state.written = true;
        true
    }

    pub fn write_float_array(&self, data: &[f32]) -> usize {
        if !self.role.writable() || data.is_empty() {
            return 0;
        }
        let mut state = self.state.lock().unwrap();
        let len = state.values.len().min(data.len());
        for (i, &value) in data.iter().enumerate().take(len) {
            self.store_clamped_float(&mut state.values, i, value);
        }
        state.fired = true;
        state.written = true;
        len
    }

    // ── Protocol puts: unchecked, fire only ─────────────────────────────

    pub(crate) fn put(&self, data: i32) -> bool {
        self.put_at(0, data)
    }

    pub(crate) fn put_at(&self, index: usize, data: i32) -> bool {
        let mut state = self.state.lock().unwrap();
        if index >= state.values.len() {
            return false;
        }
        match &mut state.values {
            Values::Int(v) => v[index] = data,
            Values::Float(v) => v[index] = data as f32,
        }
        state.fired = true;
        true
    }

    pub(crate) fn put_array(&self, data: &[i32]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let mut state = self.state.lock().unwrap();
        let len = state.values.len().min(data.len());
        for (i, &value) in data.iter().enumerate().take(len) {
            match &mut state.values {
                Values::Int(v) => v[i] = value,
                Values::Float(v) => v[i] = value as f32,
            }
        }
        state.fired = true;
        len
    }

    pub(crate) fn put_float(&self, data: f32) -> bool {
        self.put_float_at(0, data)
    }

    pub(crate) fn put_float_at(&self, index: usize, data: f32) -> bool {
        let mut state = self.state.lock().unwrap();
        if index >= state.values.len() {
            return false;
        }
        match &mut state.values {
            Values::Int(v) => v[index] = data as i32,
            Values::Float(v) => v[index] = data,
        }
        state.fired = true;
        true
    }

    pub(crate) fn put_float_array(&self, data: &[f32]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let mut state = self.state.lock().unwrap();
        let len = state.values.len().min(data.len());
        for (i, &value) in data.iter().enumerate().take(len) {
            match &mut state.values {
                Values::Int(v) => v[i] = value as i32,
                Values::Float(v) => v[i] = value,
            }
        }
        state.fired = true;
        len
    }

    // ── Tick plumbing ───────────────────────────────────────────────────

    /// End-of-tick commit: the event flag reflects whether the cell
    /// fired during the window that just closed.
    pub(crate) fn commit_event(&self) {
        let mut state = self.state.lock().unwrap();
        state.event = state.fired;
        state.fired = false;
    }

    pub(crate) fn clear_written(&self) {
        self.state.lock().unwrap().written = false;
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        match &mut state.values {
            Values::Int(v) => v.fill(self.initial as i32),
            Values::Float(v) => v.fill(self.initial),
        }
        state.event = false;
        state.fired = false;
        state.written = false;
    }

    fn store_clamped_int(&self, values: &mut Values, index: usize, data: i32) {
        match values {
            Values::Int(v) => {
                v[index] = data.clamp(self.min as i32, self.max as i32);
            }
            Values::Float(v) => {
                v[index] = (data as f32).clamp(self.min, self.max);
            }
        }
    }

    fn store_clamped_float(&self, values: &mut Values, index: usize, data: f32) {
        match values {
            Values::Int(v) => {
                v[index] = (data as i32).clamp(self.min as i32, self.max as i32);
            }
            Values::Float(v) => {
                v[index] = data.clamp(self.min, self.max);
            }
        }
    }
}

/// Ordered device table of one robot, indexed by a device id's low
/// 12 bits and verified against the cell's canonical id.  Unknown ids
/// read as 0 and ignore writes.
pub struct DeviceTable {
    devices: Vec<Device>,
}

impl DeviceTable {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn get(&self, device_id: u32) -> Option<&Device> {
        let device = self.devices.get((device_id & 0xfff) as usize)?;
        if device.id() != device_id & 0xfff0_0fff {
            return None;
        }
        Some(device)
    }

    /// Positional access for the fixed per-robot layout.
    pub(crate) fn at(&self, index: usize) -> &Device {
        &self.devices[index]
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub(crate) fn commit_events(&self, range: std::ops::RangeInclusive<usize>) {
        for index in range {
            if let Some(device) = self.devices.get(index) {
                device.commit_event();
            }
        }
    }

    pub(crate) fn clear_written_all(&self) {
        for device in &self.devices {
            device.clear_written();
        }
    }

    pub fn reset_all(&self) {
        for device in &self.devices {
            device.reset();
        }
    }

    // Robot-level accessors: id-addressed, total (0 / no-op on unknown id).

    pub fn event(&self, device_id: u32) -> bool {
        self.get(device_id).map_or(false, Device::event)
    }

    pub fn read(&self, device_id: u32) -> i32 {
        self.get(device_id).map_or(0, Device::read)
    }

    pub fn read_at(&self, device_id: u32, index: usize) -> i32 {
        self.get(device_id).map_or(0, |d| d.read_at(index))
    }

    pub fn read_array(&self, device_id: u32, data: &mut [i32]) -> usize {
        self.get(device_id).map_or(0, |d| d.read_array(data))
    }

    pub fn read_float(&self, device_id: u32) -> f32 {
        self.get(device_id).map_or(0.0, Device::read_float)
    }

    pub fn read_float_at(&self, device_id: u32, index: usize) -> f32 {
        self.get(device_id).map_or(0.0, |d| d.read_float_at(index))
    }

    pub fn read_float_array(&self, device_id: u32, data: &mut [f32]) -> usize {
        self.get(device_id).map_or(0, |d| d.read_float_array(data))
    }

    pub fn write(&self, device_id: u32, data: i32) -> bool {
        self.get(device_id).map_or(false, |d| d.write(data))
    }

    pub fn write_at(&self, device_id: u32, index: usize, data: i32) -> bool {
        self.get(device_id).map_or(false, |d| d.write_at(index, data))
    }

    pub fn write_array(&self, device_id: u32, data: &[i32]) -> usize {
        self.get(device_id).map_or(0, |d| d.write_array(data))
    }

    pub fn write_float(&self, device_id: u32, data: f32) -> bool {
        self.get(device_id).map_or(false, |d| d.write_float(data))
    }

    pub fn write_float_at(&self, device_id: u32, index: usize, data: f32) -> bool {
        self.get(device_id).map_or(false, |d| d.write_float_at(index, data))
    }

    pub fn write_float_array(&self, device_id: u32, data: &[f32]) -> usize {
        self.get(device_id).map_or(0, |d| d.write_float_array(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wheel() -> Device {
        Device::int(0x0040_0000, "LeftWheel", DeviceRole::Effector, 1, -100, 100, 0)
    }

    fn floor() -> Device {
        Device::int(0x0040_0013, "LeftFloor", DeviceRole::Sensor, 1, 0, 255, 0)
    }

    #[test]
    fn write_clamps_into_range() {
        let d = wheel();
        assert!(d.write(250));
        assert_eq!(d.read(), 100);
        assert!(d.write(-250));
        assert_eq!(d.read(), -100);
        assert!(d.write(50));
        assert_eq!(d.read(), 50);
    }

    #[test]
    fn sensor_rejects_user_writes_but_accepts_puts() {
        let d = floor();
        assert!(!d.write(10));
        assert_eq!(d.read(), 0);
        assert!(d.put(80));
        assert_eq!(d.read(), 80);
    }

    #[test]
    fn write_sets_fired_and_written_put_sets_only_fired() {
        let d = wheel();
        d.write(10);
        assert!(d.written());
        d.clear_written();
        d.put(20);
        assert!(!d.written());
        d.commit_event();
        assert!(d.event());
    }

    #[test]
    fn event_lasts_exactly_one_tick() {
        let d = wheel();
        d.write(1);
        d.commit_event();
        assert!(d.event());
        d.commit_event();
        assert!(!d.event());
    }

    #[test]
    fn float_conversions_truncate_toward_stored_kind() {
        let d = wheel();
        d.write_float(49.9);
        assert_eq!(d.read(), 49);

        let buzzer = Device::float(0x0040_0002, "Buzzer", DeviceRole::Effector, 1, 0.0, 167_772.15, 0.0);
        buzzer.write(440);
        assert_eq!(buzzer.read_float(), 440.0);
        buzzer.write_float(261.63);
        assert_eq!(buzzer.read(), 261);
    }

    #[test]
    fn array_access_is_bounds_checked() {
        let accel = Device::int(0x0040_0015, "Acceleration", DeviceRole::Sensor, 3, -32768, 32767, 0);
        assert!(accel.put_at(2, 42));
        assert!(!accel.put_at(3, 42));
        assert_eq!(accel.read_at(2), 42);
        assert_eq!(accel.read_at(9), 0);

        let mut out = [0i32; 8];
        assert_eq!(accel.read_array(&mut out), 3);
        assert_eq!(out[2], 42);
    }

    #[test]
    fn reset_restores_initial_and_clears_flags() {
        let speed = Device::int(0x0040_000a, "LineTracerSpeed", DeviceRole::Command, 1, 1, 8, 5);
        speed.write(8);
        speed.reset();
        assert_eq!(speed.read(), 5);
        assert!(!speed.event());
        assert!(!speed.written());
    }

    #[test]
    fn table_lookup_uses_low_12_bits_and_tolerates_unknown_ids() {
        let table = DeviceTable::new(vec![wheel()]);
        assert_eq!(table.read(0x0040_0000), 0);
        assert!(table.write(0x0040_0000, 30));
        assert_eq!(table.read(0x0040_0000), 30);
        // Unknown id: index out of table bounds
        assert_eq!(table.read(0x0040_0bad), 0);
        assert!(!table.write(0x0040_0bad, 1));
    }

    #[test]
    fn table_lookup_verifies_the_canonical_id() {
        let table = DeviceTable::new(vec![wheel()]);
        assert_eq!(table.get(0x0040_0000).unwrap().id(), 0x0040_0000);
        // Instance bits 12..19 are masked out of the canonical id
        assert_eq!(table.get(0x0041_0000).unwrap().id(), 0x0040_0000);
        assert!(table.write(0x0041_0000, 25));
        assert_eq!(table.read(0x0040_0000), 25);
        // A foreign device class lands on a valid index but must not match
        assert!(table.get(0x0050_0000).is_none());
        assert_eq!(table.read(0x0050_0000), 0);
        assert!(!table.write(0x0050_0000, 1));
    }
}
