//! Pluggable body/frame stream processors.
//!
//! The state machine attaches exactly one input processor while a body or
//! frame stream is being received and one output processor while a request
//! body is being sent. Which variant is attached is decided from the request
//! or response headers; the processors themselves only see byte slices.

use super::chunked::ChunkedRx;
use super::error::Error;
use super::event::{Event, EventHandler};
use super::websocket::WsRx;
use crate::network::{self, Clock, Write};

/// Outcome of feeding bytes through an input processor.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Feed {
    /// Nothing could be consumed; the processor needs more input to make any
    /// progress. Never surfaced to the application.
    NeedMore,
    /// `consumed` bytes were processed; `done` marks stream completion.
    Progress {
        consumed: usize,
        done: bool,
    },
}

/// The active input (receive) processor.
#[derive(Debug)]
pub(crate) enum Input {
    /// Identity stream bounded by `Content-Length` (or unbounded).
    Raw(RawRx),
    /// RFC 7230 chunked transfer coding.
    Chunked(ChunkedRx),
    /// RFC 6455 server-to-client frames.
    WebSocket(WsRx),
}

/// The active output (transmit) processor.
#[derive(Debug)]
pub(crate) enum Output {
    /// Identity stream that must match the declared `Content-Length`.
    Raw(RawTx),
    /// Chunked transfer coding through the working buffer.
    Chunked,
}

/// Raw (identity) input stream state.
#[derive(Debug)]
pub(crate) struct RawRx {
    /// Declared body size; `None` for unbounded legacy streams.
    total: Option<u32>,
    done: u32,
}

impl RawRx {
    pub(crate) fn new(total: Option<u32>) -> Self {
        Self { total, done: 0 }
    }

    /// Deliver available body bytes to the application.
    pub(crate) fn feed<H: EventHandler>(
        &mut self,
        data: &[u8],
        handler: &mut H,
    ) -> Result<Feed, Error> {
        if self.total == Some(0) {
            return Ok(Feed::Progress {
                consumed: 0,
                done: true,
            });
        }
        if data.is_empty() {
            return Ok(Feed::NeedMore);
        }
        let take = match self.total {
            Some(total) => data.len().min((total - self.done) as usize),
            None => data.len(),
        };
        if handler
            .on_event(Event::DataReceived { data: &data[..take] })
            .is_err()
        {
            return Err(Error::AppAborted);
        }
        self.done += take as u32;
        Ok(Feed::Progress {
            consumed: take,
            done: self.total == Some(self.done),
        })
    }
}

/// Raw (identity) output stream state.
#[derive(Debug)]
pub(crate) struct RawTx {
    total: u32,
    done: u32,
}

impl RawTx {
    pub(crate) fn new(total: u32) -> Self {
        Self { total, done: 0 }
    }

    /// Whether `len` more bytes would exceed the declared length.
    pub(crate) fn would_overflow(&self, len: usize) -> bool {
        len as u64 + self.done as u64 > self.total as u64
    }

    pub(crate) fn record(&mut self, len: usize) {
        self.done += len as u32;
    }

    /// Whether the declared length has been sent in full.
    pub(crate) fn is_complete(&self) -> bool {
        self.done == self.total
    }
}

/// Transfer statistics for the request in progress (or the last one).
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    /// Bytes written to the transport.
    pub tx_bytes: u32,
    /// Bytes read from the transport.
    pub rx_bytes: u32,
    /// Milliseconds from request start to completion.
    pub elapsed_ms: u32,
    pub(crate) started_ms: u32,
}

/// Delay between zero-progress write attempts.
const WRITE_RETRY_SLEEP_MS: u32 = 10;

/// Write `buf` in full, retrying partial writes until `timeout_ms` elapses.
///
/// The port is allowed to return short writes at any time; this loop owns the
/// overall deadline. A short write that never completes is a
/// [`Error::WriteTimeout`] and a transport error is [`Error::Connection`];
/// either way the connection is dead.
pub(crate) fn write_all<C: Write, K: Clock>(
    conn: &mut C,
    clock: &mut K,
    stats: &mut Stats,
    buf: &[u8],
    timeout_ms: u32,
) -> Result<(), Error> {
    let start = clock.now_ms();
    let mut sent = 0;
    while sent < buf.len() {
        let elapsed = network::elapsed_ms(clock.now_ms(), start);
        if elapsed >= timeout_ms {
            return Err(Error::WriteTimeout);
        }
        let n = conn
            .write(&buf[sent..], timeout_ms - elapsed)
            .map_err(|_| Error::Connection)?;
        stats.tx_bytes += n as u32;
        sent += n;
        if n == 0 {
            clock.sleep_ms(WRITE_RETRY_SLEEP_MS);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::event::Abort;

    struct Sink {
        data: std::vec::Vec<u8>,
        abort_after: Option<usize>,
    }

    impl EventHandler for Sink {
        fn on_event(&mut self, event: Event<'_>) -> Result<(), Abort> {
            if let Event::DataReceived { data } = event {
                self.data.extend_from_slice(data);
                if let Some(limit) = self.abort_after {
                    if self.data.len() >= limit {
                        return Err(Abort);
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn raw_rx_completes_at_declared_length() {
        let mut rx = RawRx::new(Some(5));
        let mut sink = Sink {
            data: std::vec::Vec::new(),
            abort_after: None,
        };
        assert_eq!(
            rx.feed(b"hel", &mut sink).unwrap(),
            Feed::Progress {
                consumed: 3,
                done: false
            }
        );
        assert_eq!(
            rx.feed(b"lo", &mut sink).unwrap(),
            Feed::Progress {
                consumed: 2,
                done: true
            }
        );
        assert_eq!(sink.data, b"hello");
    }

    #[test]
    fn raw_rx_clamps_to_declared_length() {
        let mut rx = RawRx::new(Some(4));
        let mut sink = Sink {
            data: std::vec::Vec::new(),
            abort_after: None,
        };
        assert_eq!(
            rx.feed(b"abcdEXTRA", &mut sink).unwrap(),
            Feed::Progress {
                consumed: 4,
                done: true
            }
        );
        assert_eq!(sink.data, b"abcd");
    }

    #[test]
    fn raw_rx_zero_length_completes_immediately() {
        let mut rx = RawRx::new(Some(0));
        let mut sink = Sink {
            data: std::vec::Vec::new(),
            abort_after: None,
        };
        assert_eq!(
            rx.feed(b"", &mut sink).unwrap(),
            Feed::Progress {
                consumed: 0,
                done: true
            }
        );
    }

    #[test]
    fn raw_rx_unbounded_never_completes() {
        let mut rx = RawRx::new(None);
        let mut sink = Sink {
            data: std::vec::Vec::new(),
            abort_after: None,
        };
        for _ in 0..3 {
            assert_eq!(
                rx.feed(b"xy", &mut sink).unwrap(),
                Feed::Progress {
                    consumed: 2,
                    done: false
                }
            );
        }
        assert_eq!(rx.feed(b"", &mut sink).unwrap(), Feed::NeedMore);
    }

    #[test]
    fn raw_rx_app_abort() {
        let mut rx = RawRx::new(Some(10));
        let mut sink = Sink {
            data: std::vec::Vec::new(),
            abort_after: Some(1),
        };
        assert_eq!(rx.feed(b"abc", &mut sink), Err(Error::AppAborted));
    }

    struct ChokedWriter {
        chunk: usize,
    }

    impl Write for ChokedWriter {
        type Error = ();
        fn write(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
            Ok(buf.len().min(self.chunk))
        }
    }

    struct TestClock {
        now: u32,
        tick: u32,
    }

    impl Clock for TestClock {
        fn now_ms(&mut self) -> u32 {
            self.now = self.now.wrapping_add(self.tick);
            self.now
        }
        fn sleep_ms(&mut self, ms: u32) {
            self.now = self.now.wrapping_add(ms);
        }
    }

    #[test]
    fn write_all_times_out_on_stalled_writer() {
        let mut conn = ChokedWriter { chunk: 0 };
        let mut clock = TestClock { now: 0, tick: 1 };
        let mut stats = Stats::default();
        let err = write_all(&mut conn, &mut clock, &mut stats, b"payload", 100);
        assert_eq!(err, Err(Error::WriteTimeout));
    }

    #[test]
    fn write_all_retries_partial_writes() {
        let mut conn = ChokedWriter { chunk: 3 };
        let mut clock = TestClock { now: 0, tick: 1 };
        let mut stats = Stats::default();
        write_all(&mut conn, &mut clock, &mut stats, b"0123456789", 1000).unwrap();
        assert_eq!(stats.tx_bytes, 10);
    }
}
