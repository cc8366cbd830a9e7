//! RFC 7230 chunked transfer coding.
//!
//! The decoder is incremental: it is fed whatever span of the working buffer
//! is currently unconsumed and reports how much of it was processed, so chunk
//! boundaries may fall anywhere relative to socket reads. The encoder frames
//! application payload into chunks sized to the working buffer and writes
//! them through the blocking write helper.

use super::codec::{self, IntParseError};
use super::error::Error;
use super::event::{Event, EventHandler};
use super::stream::{Feed, Stats, write_all};
use crate::network::{Clock, Write};

/// Bytes of a chunk consumed by framing: up to 8 hex size digits, the CRLF
/// after the size, the CRLF after the data, and one reserved byte.
pub(crate) const CHUNK_OVERHEAD: usize = 8 + 2 + 2 + 1;

/// Decoder sub-state.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum RxState {
    /// Scanning for the LF that terminates a chunk-size line.
    Size,
    /// Consuming chunk data.
    Data,
    /// Consuming the CRLF that follows chunk data.
    DataCrlf,
    /// Consuming the trailer section after the last chunk.
    Trailer,
}

/// Incremental chunked-body decoder state.
#[derive(Debug)]
pub(crate) struct ChunkedRx {
    state: RxState,
    chunk_size: u32,
    chunk_done: u32,
}

impl ChunkedRx {
    pub(crate) fn new() -> Self {
        Self {
            state: RxState::Size,
            chunk_size: 0,
            chunk_done: 0,
        }
    }

    /// Feed unconsumed bytes through the decoder.
    ///
    /// `status` is the status code of the response this body belongs to; it
    /// tags the response-headers event used to deliver a trailer section.
    pub(crate) fn feed<H: EventHandler>(
        &mut self,
        data: &[u8],
        status: u16,
        handler: &mut H,
    ) -> Result<Feed, Error> {
        let mut off = 0;
        loop {
            let avail = &data[off..];
            if avail.is_empty() {
                return Ok(flush(off, false));
            }
            match self.state {
                RxState::Size => {
                    let Some(lf) = avail.iter().position(|&b| b == b'\n') else {
                        return Ok(flush(off, false));
                    };
                    let size = match codec::parse_hex(&avail[..lf]) {
                        Ok(size) => size,
                        Err(IntParseError) => return Err(Error::DataProcessing),
                    };
                    self.chunk_size = size;
                    self.chunk_done = 0;
                    self.state = if size > 0 { RxState::Data } else { RxState::Trailer };
                    off += lf + 1;
                }
                RxState::Data => {
                    let take = avail
                        .len()
                        .min((self.chunk_size - self.chunk_done) as usize);
                    if handler
                        .on_event(Event::DataReceived { data: &avail[..take] })
                        .is_err()
                    {
                        return Err(Error::AppAborted);
                    }
                    self.chunk_done += take as u32;
                    if self.chunk_done == self.chunk_size {
                        self.state = RxState::DataCrlf;
                    }
                    off += take;
                }
                RxState::DataCrlf => {
                    if avail.len() < 2 {
                        return Ok(flush(off, false));
                    }
                    if &avail[..2] != b"\r\n" {
                        return Err(Error::DataProcessing);
                    }
                    self.state = RxState::Size;
                    off += 2;
                }
                RxState::Trailer => {
                    if avail.len() < 2 {
                        return Ok(flush(off, false));
                    }
                    if avail.starts_with(b"\r\n") {
                        // No trailer headers.
                        return Ok(flush(off + 2, true));
                    }
                    let Some(end) = codec::find(avail, b"\r\n\r\n") else {
                        return Ok(flush(off, false));
                    };
                    let _ = handler.on_event(Event::ResponseReceived {
                        status,
                        headers: &avail[..end + 4],
                    });
                    return Ok(flush(off + end + 4, true));
                }
            }
        }
    }
}

fn flush(consumed: usize, done: bool) -> Feed {
    if !done && consumed == 0 {
        Feed::NeedMore
    } else {
        Feed::Progress { consumed, done }
    }
}

/// Frame `payload` into chunks sized to `scratch` and write them out.
///
/// Every chunk write blocks until fully sent or the write timeout expires;
/// a short write kills the connection, so there is no partial-chunk resume.
pub(crate) fn send_chunks<C: Write, K: Clock>(
    conn: &mut C,
    clock: &mut K,
    stats: &mut Stats,
    scratch: &mut [u8],
    payload: &[u8],
    timeout_ms: u32,
) -> Result<(), Error> {
    if scratch.len() <= CHUNK_OVERHEAD {
        return Err(Error::WorkBufSmall);
    }
    let max_data = scratch.len() - CHUNK_OVERHEAD;
    let mut sent = 0;
    while sent < payload.len() {
        let take = (payload.len() - sent).min(max_data);
        let mut hex = [0u8; 8];
        let size = codec::format_hex(take as u32, &mut hex).len();
        let mut len = 0;
        scratch[..size].copy_from_slice(&hex[..size]);
        len += size;
        scratch[len..len + 2].copy_from_slice(b"\r\n");
        len += 2;
        scratch[len..len + take].copy_from_slice(&payload[sent..sent + take]);
        len += take;
        scratch[len..len + 2].copy_from_slice(b"\r\n");
        len += 2;
        write_all(conn, clock, stats, &scratch[..len], timeout_ms)?;
        sent += take;
    }
    Ok(())
}

/// Write the terminal `0\r\n\r\n` chunk.
pub(crate) fn send_last_chunk<C: Write, K: Clock>(
    conn: &mut C,
    clock: &mut K,
    stats: &mut Stats,
    timeout_ms: u32,
) -> Result<(), Error> {
    write_all(conn, clock, stats, b"0\r\n\r\n", timeout_ms)
}
