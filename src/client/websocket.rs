//! RFC 6455 WebSocket framing.
//!
//! Server-to-client frames arrive unmasked and are decoded incrementally out
//! of the working buffer; client-to-server frames are masked and written as
//! one do-or-die blocking operation. Control frames are handled inside the
//! decoder: a CLOSE is answered and terminates the session, a PING is
//! answered with a PONG, and neither reaches the application as data.

use super::error::Error;
use super::event::{Event, EventHandler};
use super::stream::{Feed, Stats, write_all};
use crate::network::{Clock, Write};

/// Payload type of a WebSocket data frame.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WsFrameKind {
    /// UTF-8 text payload.
    Text,
    /// Arbitrary binary payload.
    Binary,
}

#[cfg(feature = "defmt")]
impl defmt::Format for WsFrameKind {
    fn format(&self, f: defmt::Formatter) {
        match self {
            WsFrameKind::Text => defmt::write!(f, "Text"),
            WsFrameKind::Binary => defmt::write!(f, "Binary"),
        }
    }
}

const OPCODE_CONT: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

/// Close status 1000, "normal closure".
const CLOSE_NORMAL: [u8; 2] = [0x03, 0xE8];

/// Masked payload bytes staged per write while streaming a frame out.
const MASK_SCRATCH: usize = 128;

/// Decoder sub-state.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum RxState {
    /// Waiting for a complete frame header.
    Header,
    /// Consuming frame payload.
    Payload,
}

/// Incremental frame decoder state.
#[derive(Debug)]
pub(crate) struct WsRx {
    state: RxState,
    header: [u8; 2],
    frame_size: u32,
    frame_done: u32,
    frame_id: u8,
    kind: WsFrameKind,
}

impl WsRx {
    pub(crate) fn new() -> Self {
        Self {
            state: RxState::Header,
            header: [0; 2],
            frame_size: 0,
            frame_done: 0,
            frame_id: 0,
            kind: WsFrameKind::Binary,
        }
    }

    /// Feed unconsumed bytes through the decoder.
    ///
    /// `capacity` is the working buffer capacity: frames that fit it are
    /// buffered whole before delivery, larger frames stream through in
    /// slices. `conn`/`clock` are needed for the automatic PONG and CLOSE
    /// replies.
    pub(crate) fn feed<C: Write, K: Clock, H: EventHandler>(
        &mut self,
        data: &[u8],
        capacity: usize,
        conn: &mut C,
        clock: &mut K,
        stats: &mut Stats,
        write_timeout_ms: u32,
        handler: &mut H,
    ) -> Result<Feed, Error> {
        let mut off = 0;
        loop {
            let avail = &data[off..];
            match self.state {
                RxState::Header => {
                    if avail.len() < 2 {
                        return Ok(flush(off));
                    }
                    if avail[1] & MASK_BIT != 0 {
                        // Servers must never mask; treat as protocol failure.
                        return Err(Error::DataProcessing);
                    }
                    let opcode = avail[0] & 0x0F;
                    match opcode {
                        OPCODE_CONT | OPCODE_CLOSE | OPCODE_PING | OPCODE_PONG => {}
                        OPCODE_TEXT => self.kind = WsFrameKind::Text,
                        OPCODE_BINARY => self.kind = WsFrameKind::Binary,
                        _ => return Err(Error::DataProcessing),
                    }
                    let len7 = avail[1] & 0x7F;
                    let header_len;
                    if len7 < 126 {
                        self.frame_size = len7 as u32;
                        header_len = 2;
                    } else if len7 == 126 {
                        if avail.len() < 4 {
                            return Ok(flush(off));
                        }
                        self.frame_size = u16::from_be_bytes([avail[2], avail[3]]) as u32;
                        header_len = 4;
                    } else {
                        if avail.len() < 10 {
                            return Ok(flush(off));
                        }
                        if avail[2] | avail[3] | avail[4] | avail[5] != 0 {
                            // Frame length beyond 32 bits is unsupported.
                            return Err(Error::DataProcessing);
                        }
                        self.frame_size =
                            u32::from_be_bytes([avail[6], avail[7], avail[8], avail[9]]);
                        header_len = 10;
                    }
                    self.header = [avail[0], avail[1]];
                    self.frame_done = 0;
                    self.state = RxState::Payload;
                    off += header_len;
                }
                RxState::Payload => {
                    let remaining = (self.frame_size - self.frame_done) as usize;
                    let opcode = self.header[0] & 0x0F;
                    if opcode & 0x08 != 0 {
                        // Control frames carry at most 125 bytes and are acted
                        // on once, with the full payload in hand.
                        if self.frame_size as usize > capacity {
                            return Err(Error::DataProcessing);
                        }
                        if remaining > avail.len() {
                            return Ok(flush(off));
                        }
                        match opcode {
                            OPCODE_CLOSE => {
                                let _ = handler.on_event(Event::WsClose);
                                send_close(conn, clock, stats, write_timeout_ms)?;
                                return Err(Error::WebSocketClosed);
                            }
                            OPCODE_PING => {
                                let _ = handler.on_event(Event::WsPing);
                                send_control(
                                    conn,
                                    clock,
                                    stats,
                                    OPCODE_PONG,
                                    &[],
                                    write_timeout_ms,
                                )?;
                            }
                            _ => return Err(Error::DataProcessing),
                        }
                        self.frame_done = self.frame_size;
                        self.state = RxState::Header;
                        off += remaining;
                        continue;
                    }
                    let fits = self.frame_size as usize <= capacity;
                    if fits && remaining > avail.len() {
                        // The whole frame can be buffered; wait for it.
                        return Ok(flush(off));
                    }
                    let take = remaining.min(avail.len());
                    if take == 0 && remaining > 0 {
                        return Ok(flush(off));
                    }
                    if handler
                        .on_event(Event::WsDataReceived {
                            data: &avail[..take],
                            frame_id: self.frame_id,
                            kind: self.kind,
                        })
                        .is_err()
                    {
                        return Err(Error::AppAborted);
                    }
                    self.frame_done += take as u32;
                    off += take;
                    if self.frame_done == self.frame_size {
                        if self.header[0] & FIN_BIT != 0 {
                            // Control frames may interleave with fragments, so
                            // the id only advances on a FIN data frame.
                            self.frame_id = self.frame_id.wrapping_add(1);
                        }
                        self.state = RxState::Header;
                    }
                }
            }
        }
    }
}

fn flush(consumed: usize) -> Feed {
    if consumed == 0 {
        Feed::NeedMore
    } else {
        Feed::Progress {
            consumed,
            done: false,
        }
    }
}

/// Send a masked data frame.
pub(crate) fn send_data_frame<C: Write, K: Clock>(
    conn: &mut C,
    clock: &mut K,
    stats: &mut Stats,
    payload: &[u8],
    kind: WsFrameKind,
    timeout_ms: u32,
) -> Result<(), Error> {
    let opcode = match kind {
        WsFrameKind::Text => OPCODE_TEXT,
        WsFrameKind::Binary => OPCODE_BINARY,
    };
    send_masked(conn, clock, stats, opcode, payload, timeout_ms)
}

/// Send a masked CLOSE frame carrying status 1000.
pub(crate) fn send_close<C: Write, K: Clock>(
    conn: &mut C,
    clock: &mut K,
    stats: &mut Stats,
    timeout_ms: u32,
) -> Result<(), Error> {
    send_control(conn, clock, stats, OPCODE_CLOSE, &CLOSE_NORMAL, timeout_ms)
}

fn send_control<C: Write, K: Clock>(
    conn: &mut C,
    clock: &mut K,
    stats: &mut Stats,
    opcode: u8,
    payload: &[u8],
    timeout_ms: u32,
) -> Result<(), Error> {
    send_masked(conn, clock, stats, opcode, payload, timeout_ms)
}

/// Build and transmit one masked frame.
///
/// The payload is XOR-masked in fixed-size slices on the way out, so frames
/// of any supported length are sent without allocation. The whole frame is
/// do-or-die: a short write within the timeout kills the connection, there
/// is no partial-frame resume.
fn send_masked<C: Write, K: Clock>(
    conn: &mut C,
    clock: &mut K,
    stats: &mut Stats,
    opcode: u8,
    payload: &[u8],
    timeout_ms: u32,
) -> Result<(), Error> {
    let key = mask_key(clock.now_ms());
    let mut header = [0u8; 14];
    let mut i = 0;
    header[i] = FIN_BIT | opcode;
    i += 1;
    if payload.len() <= 125 {
        header[i] = MASK_BIT | payload.len() as u8;
        i += 1;
    } else if payload.len() <= 0xFFFF {
        header[i] = MASK_BIT | 126;
        i += 1;
        header[i..i + 2].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        i += 2;
    } else {
        header[i] = MASK_BIT | 127;
        i += 1;
        header[i..i + 4].copy_from_slice(&[0, 0, 0, 0]);
        i += 4;
        header[i..i + 4].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        i += 4;
    }
    header[i..i + 4].copy_from_slice(&key);
    i += 4;
    write_all(conn, clock, stats, &header[..i], timeout_ms)?;

    let mut scratch = [0u8; MASK_SCRATCH];
    let mut masked = 0;
    for chunk in payload.chunks(MASK_SCRATCH) {
        for (j, &byte) in chunk.iter().enumerate() {
            scratch[j] = byte ^ key[(masked + j) % 4];
        }
        write_all(conn, clock, stats, &scratch[..chunk.len()], timeout_ms)?;
        masked += chunk.len();
    }
    Ok(())
}

/// Masking key derived from the millisecond clock.
fn mask_key(now_ms: u32) -> [u8; 4] {
    let k0 = now_ms as u8;
    let k1 = (now_ms >> 8) as u8;
    let k2 = k0 & k1;
    let k3 = k1 ^ k2;
    [k0, k1, k2, k3]
}
