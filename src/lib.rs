//! # libhttpc - embeddable HTTP/1.1 + WebSocket client
//!
//! A small, portable HTTP/1.1 client with in-band WebSocket upgrade support,
//! designed for constrained devices. This library is built for embedded
//! systems and supports `no_std` environments.
//!
//! ## Highlights
//!
//! - **One fixed working buffer** (default 768 bytes, compile-time
//!   configurable) shared by request assembly, response parsing and payload
//!   streaming. No dynamic allocation per request.
//! - **Streaming delivery**: response bodies (raw and chunked) and WebSocket
//!   frames are handed to the application slice by slice as they arrive, so
//!   payloads far larger than the buffer flow through unharmed.
//! - **Portable port layer**: the client talks to the platform through a
//!   handful of traits (read/write with timeout, close, clock); any socket
//!   stack that can express those works, POSIX or not.
//! - **Synchronous by design**: every operation is a single blocking call
//!   with wall-clock timeouts per protocol phase. No executor, no threads,
//!   no internal locking.
//!
//! ## Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! libhttpc = "0.1.0"
//! ```
//!
//! Implement the [`network`] traits for your platform's socket and timer,
//! then drive requests through [`client::Client`]:
//!
//! ```rust,no_run
//! use libhttpc::client::{Client, Event, Method};
//! # use libhttpc::network::{Clock, Connection};
//! # struct Socket;
//! # impl Connection for Socket {}
//! # impl libhttpc::network::Read for Socket {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8], _t: u32) -> Result<usize, Self::Error> { Ok(0) }
//! # }
//! # impl libhttpc::network::Write for Socket {
//! #     type Error = ();
//! #     fn write(&mut self, _buf: &[u8], _t: u32) -> Result<usize, Self::Error> { Ok(0) }
//! # }
//! # impl libhttpc::network::Close for Socket {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # struct Ticker;
//! # impl Clock for Ticker {
//! #     fn now_ms(&mut self) -> u32 { 0 }
//! #     fn sleep_ms(&mut self, _ms: u32) {}
//! # }
//! # fn connect_somehow() -> Socket { Socket }
//!
//! let socket = connect_somehow();
//! let mut client: Client<_, _> = Client::new(socket, Ticker);
//!
//! client.begin_request("/data/latest", Method::Get)?;
//! client.set_header("Host", "sensor-hub.local")?;
//! let status = client.process_request(&mut |event: Event<'_>| {
//!     if let Event::DataReceived { data } = event {
//!         let _ = data; // stream the body slice somewhere
//!     }
//!     Ok(())
//! })?;
//! # let _ = status;
//! # Ok::<(), libhttpc::client::Error>(())
//! ```
//!
//! ## Platform support
//!
//! - Embedded microcontrollers (ARM Cortex-M, RISC-V, ...)
//! - Linux-based devices and host-side test harnesses
//! - Any platform supporting Rust's `core` library
//!
//! ## Optional features
//!
//! - `std`: host-side conveniences (stdout logger)
//! - `defmt`: defmt formatting for error and status types

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

#[cfg(test)]
extern crate std;

/// The HTTP/1.1 + WebSocket protocol client.
///
/// Contains the connection state machine, the streaming codecs and the
/// application event contract.
pub mod client;

/// Leveled diagnostics hook injected into the client at construction.
pub mod log;

/// Platform abstraction: connection, connector and clock traits the client
/// consumes.
pub mod network;
