// src/lib.rs  -  Roboid: host-side runtime for Hamster educational robots
//
//! Drives one or more Hamster robots through a USB-to-BLE serial bridge.
//!
//! Three subsystems cooperate: the connector discovers the bridge on a
//! serial port, handshakes and keeps the line-framed 54-byte packet
//! stream alive; each robot's device table stores range-checked,
//! event-tagged sensor and effector cells shared between the protocol
//! thread and user code; and the runner sequences sense → user code →
//! actuate across all attached robots at 50 Hz while providing blocking
//! wait primitives to the calling thread.
//!
//! ```no_run
//! use roboid::{Hamster, Runner, Wheeled};
//!
//! let runner = Runner::new();
//! let hamster = Hamster::create(&runner).expect("no bridge found");
//! runner.wait_until_ready();
//!
//! hamster.wheels(50.0, 50.0);
//! runner.wait(500);
//! hamster.stop();
//!
//! runner.dispose_all();
//! ```

pub mod config;
pub mod connector;
pub mod device;
pub mod error;
pub mod hamster;
pub mod robot;
pub mod runner;
pub mod serial;

pub use connector::{ConnectionResult, ConnectionState, Connector};
pub use device::{Device, DeviceRole, DeviceTable};
pub use error::{Result, RoboidError};
pub use hamster::Hamster;
pub use robot::{Robot, Wheeled};
pub use runner::Runner;
