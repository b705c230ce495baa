// src/runner.rs  -  the 50 Hz scheduler and the caller-side wait primitives
//
// One scheduler thread serves every robot.  Per 20 ms tick, in order:
//
//   1. commit sensor/event device events          (per alive robot)
//   2. run the evaluate predicate, detach on true
//   3. run the execute callback
//   4. build the motoring snapshot, clear written  (per alive robot)
//   5. commit effector/command device events       (per alive robot)
//
// Separating the two commit sweeps lets user code that reads a sensor
// and writes an effector observe sensor edges even when the same tick
// produced the effector's own edge.
//
// The caller thread suspends through wait / wait_until /
// wait_until_ready; the outbound packet itself is written by each
// robot's I/O thread as a reply to the next inbound packet, never from
// here.

use crate::robot::Robot;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Scheduler period
pub const TICK: Duration = Duration::from_millis(20);

/// Grace period for joining a robot's I/O thread during dispose
const JOIN_GRACE: Duration = Duration::from_secs(1);

type ExecuteFn = Box<dyn FnMut() + Send>;
type EvaluateFn = Box<dyn FnMut() -> bool + Send>;

/// Cloneable handle to the scheduler.  Created explicitly by the caller
/// and threaded through robot constructors; the scheduler thread starts
/// at the first robot registration and is torn down by dispose_all.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    robots: Mutex<Vec<Arc<dyn Robot>>>,
    execute: Mutex<Option<ExecuteFn>>,
    evaluate: Mutex<Option<EvaluateFn>>,
    evaluate_done: AtomicBool,
    connection_required: AtomicUsize,
    connection_checked: AtomicUsize,
    running: AtomicBool,
    started: AtomicBool,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl Runner {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                robots: Mutex::new(Vec::new()),
                execute: Mutex::new(None),
                evaluate: Mutex::new(None),
                evaluate_done: AtomicBool::new(false),
                connection_required: AtomicUsize::new(0),
                connection_checked: AtomicUsize::new(0),
                running: AtomicBool::new(false),
                started: AtomicBool::new(false),
                scheduler: Mutex::new(None),
            }),
        }
    }

    /// Number of robots registered so far (also the next robot index).
    pub fn robot_count(&self) -> usize {
        self.inner.robots.lock().unwrap().len()
    }

    /// Add a robot and lazily start the scheduler thread.
    pub fn register(&self, robot: Arc<dyn Robot>) {
        self.inner.robots.lock().unwrap().push(robot);
        self.start();
    }

    pub(crate) fn unregister(&self, robot: &Arc<dyn Robot>) {
        let mut robots = self.inner.robots.lock().unwrap();
        robots.retain(|r| !Arc::ptr_eq(r, robot));
    }

    fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let handle = thread::spawn(move || scheduler_loop(inner));
        *self.inner.scheduler.lock().unwrap() = Some(handle);
    }

    /// One more robot must check in before wait_until_ready returns.
    pub(crate) fn register_required(&self) {
        self.inner.connection_required.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn unregister_required(&self) {
        self.inner.connection_required.fetch_sub(1, Ordering::SeqCst);
    }

    /// Called by a robot's I/O thread on its first decoded packet.
    pub(crate) fn register_checked(&self) {
        self.inner.connection_checked.fetch_add(1, Ordering::SeqCst);
    }

    pub fn all_checked(&self) -> bool {
        self.inner.connection_checked.load(Ordering::SeqCst)
            >= self.inner.connection_required.load(Ordering::SeqCst)
    }

    /// Install the user callback run once per tick, between the sensory
    /// and motoring sweeps.  The runner owns the closure; it is dropped
    /// on dispose_all.
    pub fn set_executable<F>(&self, execute: F)
    where
        F: FnMut() + Send + 'static,
    {
        *self.inner.execute.lock().unwrap() = Some(Box::new(execute));
    }

    /// Busy-sleep on the monotonic clock.  Robots on other threads keep
    /// running; granularity is 1 ms.
    pub fn wait(&self, milliseconds: u64) {
        wait(milliseconds);
    }

    /// Install `evaluate` and block until the scheduler has seen it
    /// return true.  The predicate runs on the scheduler thread once per
    /// tick and is detached after its first true result.
    pub fn wait_until<F>(&self, evaluate: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.inner.evaluate_done.store(false, Ordering::SeqCst);
        *self.inner.evaluate.lock().unwrap() = Some(Box::new(evaluate));
        while !self.inner.evaluate_done.load(Ordering::SeqCst)
            && self.inner.running.load(Ordering::SeqCst)
        {
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Block until every registered robot has decoded its first sensory
    /// packet.
    pub fn wait_until_ready(&self) {
        while !self.all_checked() {
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Stop the scheduler, shut every robot down, join all threads and
    /// clear the registry.  Safe to call more than once.
    pub fn dispose_all(&self) {
        let robots: Vec<Arc<dyn Robot>> = {
            let mut list = self.inner.robots.lock().unwrap();
            std::mem::take(&mut *list)
        };

        for robot in &robots {
            robot.shutdown();
            robot.reset();
        }

        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.scheduler.lock().unwrap().take() {
            let _ = handle.join();
        }

        for robot in &robots {
            robot.join_io(JOIN_GRACE);
        }

        *self.inner.execute.lock().unwrap() = None;
        *self.inner.evaluate.lock().unwrap() = None;
        // Release any caller stuck in wait_until on a predicate that can
        // no longer come true.
        self.inner.evaluate_done.store(true, Ordering::SeqCst);
        self.inner.connection_required.store(0, Ordering::SeqCst);
        self.inner.connection_checked.store(0, Ordering::SeqCst);
        self.inner.started.store(false, Ordering::SeqCst);
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic busy-sleep, independent of any runner.
pub fn wait(milliseconds: u64) {
    if milliseconds == 0 {
        return;
    }
    let deadline = Instant::now() + Duration::from_millis(milliseconds);
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
}

fn scheduler_loop(inner: Arc<RunnerInner>) {
    let mut next_tick = Instant::now();

    while inner.running.load(Ordering::SeqCst) {
        if Instant::now() >= next_tick {
            let robots: Vec<Arc<dyn Robot>> = inner.robots.lock().unwrap().clone();

            for robot in &robots {
                if robot.alive() {
                    robot.update_sensory_state();
                }
            }

            {
                let mut slot = inner.evaluate.lock().unwrap();
                if let Some(evaluate) = slot.as_mut() {
                    if evaluate() {
                        *slot = None;
                        inner.evaluate_done.store(true, Ordering::SeqCst);
                    }
                }
            }

            if let Some(execute) = inner.execute.lock().unwrap().as_mut() {
                execute();
            }

            for robot in &robots {
                if robot.alive() {
                    robot.request_motoring_data();
                }
            }
            for robot in &robots {
                if robot.alive() {
                    robot.update_motoring_state();
                }
            }

            next_tick += TICK;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_honors_the_monotonic_deadline() {
        let start = Instant::now();
        wait(60);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[test]
    fn ready_follows_the_counters() {
        let runner = Runner::new();
        assert!(runner.all_checked());
        runner.register_required();
        assert!(!runner.all_checked());
        runner.register_checked();
        assert!(runner.all_checked());
    }

    #[test]
    fn dispose_all_on_an_empty_runner_is_idempotent() {
        let runner = Runner::new();
        runner.dispose_all();
        runner.dispose_all();
        assert_eq!(runner.robot_count(), 0);
    }

    #[test]
    fn wait_until_latches_a_scheduler_evaluated_predicate() {
        // Force the scheduler up without hardware by registering nothing
        // and starting through the private hook.
        let runner = Runner::new();
        runner.start();
        let mut remaining = 3;
        runner.wait_until(move || {
            remaining -= 1;
            remaining == 0
        });
        runner.dispose_all();
    }
}
