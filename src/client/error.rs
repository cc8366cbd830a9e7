//! Error types for the HTTP/WebSocket client.

/// A fatal client error.
///
/// HTTP status codes are deliberately *not* represented here: a completed
/// exchange always yields its status code as the `Ok` value of the operation
/// that drove it, whatever the numeric value. An `Error` from an operation
/// that drives the connection means the exchange did not complete and the
/// connection must be torn down and re-established; request-building helpers
/// ([`set_header`](super::Client::set_header) and friends) fail without
/// touching the connection.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The transport failed or the peer closed the connection.
    Connection,
    /// A previous fatal error left the client unusable.
    Aborted,
    /// The operation is not valid in the connection's current state.
    ApiCallNotSupported,
    /// The outgoing request headers are inconsistent (e.g. both or neither of
    /// `Content-Length` and `Transfer-Encoding` on a POST/PUT).
    InvalidRequestHeaders,
    /// No complete response arrived within the response timeout.
    ResponseTimeout,
    /// The response status line or header block is malformed.
    ResponseFormat,
    /// A body or frame stream violated its framing (bad chunk size, masked
    /// server frame, oversized frame, unknown control opcode, ...).
    DataProcessing,
    /// The working buffer cannot hold the request or response. Indicates the
    /// buffer capacity is too small for the workload, not a transient fault.
    WorkBufSmall,
    /// A bounded temporary buffer was too small for the operation.
    TempBufSmall,
    /// The application supplied more or fewer body bytes than the declared
    /// `Content-Length`.
    ContentLength,
    /// A write could not be completed within the write timeout; the
    /// connection is considered dead.
    WriteTimeout,
    /// The application callback asked for the transfer to stop.
    AppAborted,
    /// The peer closed the WebSocket session; the connection is finished.
    WebSocketClosed,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Connection => defmt::write!(f, "Connection"),
            Error::Aborted => defmt::write!(f, "Aborted"),
            Error::ApiCallNotSupported => defmt::write!(f, "ApiCallNotSupported"),
            Error::InvalidRequestHeaders => defmt::write!(f, "InvalidRequestHeaders"),
            Error::ResponseTimeout => defmt::write!(f, "ResponseTimeout"),
            Error::ResponseFormat => defmt::write!(f, "ResponseFormat"),
            Error::DataProcessing => defmt::write!(f, "DataProcessing"),
            Error::WorkBufSmall => defmt::write!(f, "WorkBufSmall"),
            Error::TempBufSmall => defmt::write!(f, "TempBufSmall"),
            Error::ContentLength => defmt::write!(f, "ContentLength"),
            Error::WriteTimeout => defmt::write!(f, "WriteTimeout"),
            Error::AppAborted => defmt::write!(f, "AppAborted"),
            Error::WebSocketClosed => defmt::write!(f, "WebSocketClosed"),
        }
    }
}
