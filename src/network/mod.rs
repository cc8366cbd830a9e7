//! A network and platform abstraction layer for embedded systems
//!
//! This module defines the small set of traits the HTTP/WebSocket client needs
//! from the target platform: a timeout-bounded byte stream, a way to open and
//! close it, and a millisecond clock. Implementations exist for POSIX sockets,
//! lwIP raw sockets, modem AT stacks and so on; the client itself never touches
//! an OS API directly.

#![allow(missing_docs)]
#![deny(unsafe_code)]

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Clock, Close, Connect, Connection, Read, Write};
}

/// A timeout-bounded byte source.
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes from the connection.
    ///
    /// Returns as soon as at least one byte has arrived, or when `timeout_ms`
    /// milliseconds have elapsed with nothing read (in which case the result
    /// is `Ok(0)`). An `Err` means the connection is no longer usable.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;
}

/// A timeout-bounded byte sink.
pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;

    /// Write up to `buf.len()` bytes to the connection.
    ///
    /// A partial write is not an error; the caller retries with the remaining
    /// bytes. `Ok(0)` means no progress was possible within `timeout_ms`.
    /// An `Err` means the connection is no longer usable.
    fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, Self::Error>;
}

pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}

/// A synchronous connector (client)
pub trait Connect {
    /// Associated connection type
    type Connection: Connection;
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Open a connection to `remote` (numeric address and port, e.g.
    /// `"192.0.2.7:80"`), waiting at most `timeout_ms` milliseconds.
    fn connect(&mut self, remote: &str, timeout_ms: u32) -> Result<Self::Connection, Self::Error>;
}

/// A monotonic millisecond clock with a blocking sleep.
///
/// `now_ms` may wrap; elapsed time is always computed with wrapping
/// subtraction, so a 32-bit tick counter is sufficient.
pub trait Clock {
    /// Current monotonic time in milliseconds.
    fn now_ms(&mut self) -> u32;
    /// Block the caller for roughly `ms` milliseconds.
    fn sleep_ms(&mut self, ms: u32);
}

/// Milliseconds elapsed since `start`, tolerating tick-counter wraparound.
pub fn elapsed_ms(now: u32, start: u32) -> u32 {
    now.wrapping_sub(start)
}
