//! Platform seams the framework consumes. Implementations live with the
//! host (see `sim`) or with the board support code.

use thiserror::Error;

/// Millisecond uptime clock. Wraps around; consumers use wrapping arithmetic.
pub trait Clock {
    fn millis(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SerialError {
    #[error("receive buffer overrun")]
    Overrun,
    #[error("peripheral disconnected")]
    Disconnected,
}

/// Byte-stream peripheral polled without blocking.
pub trait SerialPort {
    /// Next available byte, or `WouldBlock` when nothing is pending.
    fn read(&mut self) -> nb::Result<u8, SerialError>;
    fn write(&mut self, bytes: &[u8]) -> Result<(), SerialError>;
}

/// Telemetry backend transport. Publishes are fire-and-forget: the return
/// value only reports whether the transport accepted the message.
pub trait Backend {
    fn is_connected(&self) -> bool;

    /// Connectivity housekeeping, called once per tick.
    fn process(&mut self) {}

    fn publish(&mut self, event: &str, payload: &str) -> bool;
}

/// Line-oriented status display. Temporary lines revert to the last
/// permanent content after the display's timeout.
pub trait StatusDisplay {
    fn print_line(&mut self, line: u8, text: &str, temporary: bool);

    fn refresh(&mut self, _now: u32) {}
}

/// Display sink for controllers without a screen.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDisplay;

impl StatusDisplay for NullDisplay {
    fn print_line(&mut self, _line: u8, _text: &str, _temporary: bool) {}
}
