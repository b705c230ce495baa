// src/robot.rs  -  the interface the scheduler drives
use crate::device::DeviceTable;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One attached robot, as the runner sees it.  The scheduler calls the
/// three tick hooks in a fixed order: sensory commit, then (after user
/// code) the motoring snapshot, then the motoring commit.  Only Hamster
/// implements this today; the variant set stays open.
pub trait Robot: Send + Sync {
    /// Position in creation order; used as the log tag suffix.
    fn index(&self) -> usize;

    fn name(&self) -> String;

    fn set_name(&self, name: &str);

    fn alive(&self) -> bool;

    fn devices(&self) -> &DeviceTable;

    /// Commit `event` for the sensor/event devices (first sweep).
    fn update_sensory_state(&self);

    /// Read the user's writes into the motoring scratch, honoring
    /// `written` for optional fields, then clear all `written` flags.
    fn request_motoring_data(&self);

    /// Commit `event` for the effector/command devices (second sweep).
    fn update_motoring_state(&self);

    fn reset(&self);

    /// Order the I/O thread to drain and exit.
    fn shutdown(&self);

    /// Join the I/O thread, giving up after `grace`.
    fn join_io(&self, grace: Duration);
}

/// Motion surface shared by wheeled robot variants.
pub trait Wheeled {
    fn wheels(&self, left_speed: f64, right_speed: f64);
    fn left_wheel(&self, speed: f64);
    fn right_wheel(&self, speed: f64);
    fn stop(&self);
}

/// Join `handle` but give up after `deadline`; a wedged I/O thread is
/// detached rather than hanging dispose.
pub(crate) fn join_with_deadline(handle: JoinHandle<()>, deadline: Duration, tag: &str) {
    let give_up = Instant::now() + deadline;
    while !handle.is_finished() {
        if Instant::now() >= give_up {
            log::warn!("[{tag}] I/O thread did not stop within {deadline:?}; detaching");
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let _ = handle.join();
}
