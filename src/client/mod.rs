//! Embeddable HTTP/1.1 client with in-band WebSocket upgrade.
//!
//! The client drives one connection at a time through a cooperative state
//! machine. A single fixed-capacity working buffer (const generic, default
//! [`DEFAULT_WORK_BUF`] bytes) is shared by request assembly, response
//! parsing and payload streaming, so memory usage is fully determined at
//! compile time and no per-request allocation ever happens. Body and frame
//! payloads are handed to the application in slices as they arrive, through
//! an [`EventHandler`].
//!
//! Every public operation is one blocking call: internally the state machine
//! loops over timeout-bounded socket reads and writes until the operation has
//! nothing left to wait for, then returns. There is no retry policy inside
//! the client; after a fatal error the caller disconnects and reconnects.
//!
//! # Usage
//!
//! ```rust,no_run
//! use libhttpc::client::{Client, Event, Method};
//! # use libhttpc::network::{Clock, Connection};
//! # struct MockConnection;
//! # impl Connection for MockConnection {}
//! # impl libhttpc::network::Read for MockConnection {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8], _t: u32) -> Result<usize, Self::Error> { Ok(0) }
//! # }
//! # impl libhttpc::network::Write for MockConnection {
//! #     type Error = ();
//! #     fn write(&mut self, _buf: &[u8], _t: u32) -> Result<usize, Self::Error> { Ok(0) }
//! # }
//! # impl libhttpc::network::Close for MockConnection {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # struct MockClock;
//! # impl Clock for MockClock {
//! #     fn now_ms(&mut self) -> u32 { 0 }
//! #     fn sleep_ms(&mut self, _ms: u32) {}
//! # }
//!
//! let connection = MockConnection;
//! let mut client: Client<_, _> = Client::new(connection, MockClock);
//!
//! client.begin_request("/api/status", Method::Get)?;
//! client.set_header("Host", "device.example")?;
//!
//! let status = client.process_request(&mut |event: Event<'_>| {
//!     if let Event::DataReceived { data } = event {
//!         // consume the body slice
//!         let _ = data;
//!     }
//!     Ok(())
//! })?;
//! assert_eq!(status, 200);
//! # Ok::<(), libhttpc::client::Error>(())
//! ```
//!
//! A `101 Switching Protocols` response moves the same connection into
//! WebSocket mode; from then on [`Client::ws_poll`], [`Client::ws_send_frame`]
//! and [`Client::ws_close`] drive it.

mod buffer;
mod chunked;
mod client;
pub mod codec;
mod error;
mod event;
mod stream;
mod websocket;

pub use client::{Client, Config};
pub use codec::{HeaderLookup, StatusLine, header_value, verify_status_line};
pub use error::Error;
pub use event::{Abort, Event, EventHandler};
pub use stream::Stats;
pub use websocket::WsFrameKind;

/// Default working buffer size in bytes. Large enough for almost any request
/// or response head; raise the const generic on [`Client`] for workloads with
/// bigger headers or higher streaming throughput.
pub const DEFAULT_WORK_BUF: usize = 768;

/// HTTP request methods supported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// HEAD: like GET but the response carries no body.
    Head,
    /// GET: retrieve a resource.
    Get,
    /// POST: submit a body; requires `Content-Length` or chunked
    /// `Transfer-Encoding`.
    Post,
    /// PUT: upload a body; same header requirements as POST.
    Put,
}

impl Method {
    /// The method token as it appears on the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Head => "HEAD",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }

    /// Whether this method sends a request body.
    pub(crate) fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Method {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Method::Head => defmt::write!(f, "HEAD"),
            Method::Get => defmt::write!(f, "GET"),
            Method::Post => defmt::write!(f, "POST"),
            Method::Put => defmt::write!(f, "PUT"),
        }
    }
}

/// Well-known header names.
pub mod header {
    /// `Content-Length`
    pub const CONTENT_LENGTH: &str = "Content-Length";
    /// `Transfer-Encoding`
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    /// `Host`
    pub const HOST: &str = "Host";
    /// `Expect`
    pub const EXPECT: &str = "Expect";
    /// `Upgrade`
    pub const UPGRADE: &str = "Upgrade";
    /// `Connection`
    pub const CONNECTION: &str = "Connection";
    /// `Authorization`
    pub const AUTHORIZATION: &str = "Authorization";
    /// `WWW-Authenticate`
    pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
    /// `Origin`
    pub const ORIGIN: &str = "Origin";
    /// `Sec-WebSocket-Key`
    pub const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
    /// `Sec-WebSocket-Version`
    pub const SEC_WEBSOCKET_VERSION: &str = "Sec-WebSocket-Version";
    /// `Sec-WebSocket-Protocol`
    pub const SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";
}
