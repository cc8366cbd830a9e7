//! The application callback contract.
//!
//! The client delivers protocol milestones to the application synchronously,
//! while a blocking operation is in progress, through an [`EventHandler`].
//! Payload slices borrow the client's working buffer and are only valid for
//! the duration of the call.

use super::websocket::WsFrameKind;

/// An event delivered to the application callback.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// The request has been assembled and is about to be transmitted.
    /// Informational; `request` holds the exact on-the-wire bytes.
    RequestReady {
        /// Complete request head (request line, headers, blank line).
        request: &'a [u8],
    },
    /// A complete response header block arrived.
    ResponseReceived {
        /// HTTP status code of the response.
        status: u16,
        /// Raw header block, including the terminating blank line. Individual
        /// values can be extracted with [`header_value`](crate::client::codec::header_value).
        headers: &'a [u8],
    },
    /// A slice of the response body arrived.
    DataReceived {
        /// Body bytes, in order. Slicing depends on network arrival.
        data: &'a [u8],
    },
    /// A slice of a WebSocket message arrived.
    WsDataReceived {
        /// Payload bytes.
        data: &'a [u8],
        /// Correlates slices of one fragmented message: the id stays the same
        /// until a FIN-marked data frame completes.
        frame_id: u8,
        /// Text or binary, as declared by the first frame of the message.
        kind: WsFrameKind,
    },
    /// The peer sent a CLOSE frame. The client replies and shuts down.
    WsClose,
    /// The peer sent a PING frame. The client replies with a PONG.
    WsPing,
}

/// Returned by an [`EventHandler`] to stop the current transfer.
///
/// Only honored for [`Event::DataReceived`] and [`Event::WsDataReceived`];
/// the result of purely informational events is ignored.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Abort;

/// Receives client events during a blocking operation.
pub trait EventHandler {
    /// Handle one event. Returning `Err(Abort)` during a data event aborts
    /// the transfer with [`Error::AppAborted`](super::Error::AppAborted).
    fn on_event(&mut self, event: Event<'_>) -> Result<(), Abort>;
}

impl<F> EventHandler for F
where
    F: FnMut(Event<'_>) -> Result<(), Abort>,
{
    fn on_event(&mut self, event: Event<'_>) -> Result<(), Abort> {
        self(event)
    }
}

/// Handler that ignores every event. Used by operations that cannot produce
/// application-visible events.
#[derive(Debug)]
pub(crate) struct NoEvents;

impl EventHandler for NoEvents {
    fn on_event(&mut self, _event: Event<'_>) -> Result<(), Abort> {
        Ok(())
    }
}
