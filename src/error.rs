// src/error.rs  -  library error type
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RoboidError>;

#[derive(Error, Debug)]
pub enum RoboidError {
    /// Port-level open failure (busy, not found, permission denied, or
    /// the post-open sanity check). Collapsed to not-available by the
    /// discovery loop; surfaced only when a port was named explicitly.
    #[error("cannot open serial port '{port}': {source}")]
    PortOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// Discovery exhausted every candidate port without a handshake.
    #[error("no available USB to BLE bridge")]
    NoBridge,

    /// A bridge answered the probe but no robot is paired to it.
    #[error("bridge found but the robot is not connected")]
    BridgeNotConnected,

    #[error("at most {0} robots of one class are supported")]
    RobotLimit(usize),
}
