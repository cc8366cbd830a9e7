//! The connection state machine and the public client API.
//!
//! Every public operation throws an API-call event into the state machine and
//! then drives it until it has nothing left to wait for: the machine commits
//! a transition by naming a next state, chained transitions resolve their
//! `Entry` events synchronously, and between transitions the machine is
//! subscribed to exactly one of {nothing, readable, writable, processable}.
//! Reads and writes happen synchronously through the port layer, each bounded
//! by the remaining budget of the state's deadline, so from the caller's view
//! each operation is a single blocking call.

use base64ct::{Base64, Encoding};

use super::buffer::WorkBuf;
use super::chunked::{self, ChunkedRx};
use super::codec::{self, HeaderLookup, StatusLine};
use super::error::Error;
use super::event::{Event, EventHandler, NoEvents};
use super::stream::{Feed, Input, Output, RawRx, RawTx, Stats, write_all};
use super::websocket::{self, WsFrameKind, WsRx};
use super::{DEFAULT_WORK_BUF, Method, header};
use crate::log::{Level, Log, NullLog, log_at};
use crate::network::{self, Clock, Connect, Connection};

/// Timeout knobs for a client connection.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Budget for establishing the transport connection.
    pub connect_timeout_ms: u32,
    /// How long to wait for a complete response head, and for progress on a
    /// body in flight, before giving up with
    /// [`Error::ResponseTimeout`](super::Error::ResponseTimeout).
    pub response_timeout_ms: u32,
    /// Budget for any single logical write (request head, body chunk,
    /// WebSocket frame). Expiry kills the connection.
    pub write_timeout_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            response_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
        }
    }
}

/// Connection state. `Disconnected` and `Aborted` are terminal.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum State {
    HttpConnected,
    HttpSendingHeaders,
    HttpRecvingHeaders,
    HttpSendingData,
    HttpSendingPacket,
    HttpRecvingData,
    WsConnected,
    WsPolling,
    WsSendingFrame,
    WsClosing,
    Disconnected,
    Aborted,
}

/// The single low-level condition a state waits on.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Sub {
    None,
    Read,
    Write,
    Process,
}

/// Abstract events a state handler receives.
#[derive(Debug, Clone, Copy)]
enum Ev {
    Entry,
    Read,
    Write,
    Process,
    Timeout,
    Call,
}

/// The API call that is currently driving the machine.
#[derive(Debug, Clone, Copy)]
enum ApiCall<'a> {
    RequestProcess,
    DataSend { buf: &'a [u8], last: bool },
    WsPoll { timeout_ms: u32 },
    WsFrameSend { buf: &'a [u8], kind: WsFrameKind },
    WsClose,
}

/// An embeddable HTTP/1.1 + WebSocket client over one connection.
///
/// Generic over the transport (`C`), the platform clock (`K`), the
/// diagnostics sink (`L`, defaults to silence) and the working buffer size
/// (`N`, defaults to [`DEFAULT_WORK_BUF`]). One `Client` drives exactly one
/// connection and must only ever be used from one logical caller at a time.
pub struct Client<C, K, L = NullLog, const N: usize = DEFAULT_WORK_BUF> {
    conn: C,
    clock: K,
    log: L,
    config: Config,
    wbuf: WorkBuf<N>,
    method: Method,
    status_code: u16,
    state: State,
    next_state: State,
    subscribed: Sub,
    deadline_ms: Option<u32>,
    entry_ts: u32,
    event_budget_ms: u32,
    exit: Result<Option<u16>, Error>,
    input: Option<Input>,
    output: Option<Output>,
    stats: Stats,
}

impl<C, K, L, const N: usize> core::fmt::Debug for Client<C, K, L, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("status_code", &self.status_code)
            .field("wbuf", &self.wbuf)
            .finish()
    }
}

impl<C: Connection, K: Clock, const N: usize> Client<C, K, NullLog, N> {
    /// Wrap an established connection with default configuration.
    pub fn new(conn: C, clock: K) -> Self {
        Self::with_config(conn, clock, Config::default())
    }

    /// Wrap an established connection with explicit configuration.
    pub fn with_config(conn: C, clock: K, config: Config) -> Self {
        Self::with_logger(conn, clock, config, NullLog)
    }

    /// Connect through a [`Connect`] implementation and wrap the result.
    pub fn connect<T>(net: &mut T, remote: &str, clock: K, config: Config) -> Result<Self, Error>
    where
        T: Connect<Connection = C>,
    {
        let conn = net
            .connect(remote, config.connect_timeout_ms)
            .map_err(|_| Error::Connection)?;
        Ok(Self::with_config(conn, clock, config))
    }
}

impl<C: Connection, K: Clock, L: Log, const N: usize> Client<C, K, L, N> {
    /// Wrap an established connection, routing diagnostics into `log`.
    pub fn with_logger(conn: C, clock: K, config: Config, log: L) -> Self {
        Self {
            conn,
            clock,
            log,
            config,
            wbuf: WorkBuf::new(),
            method: Method::Get,
            status_code: 0,
            state: State::HttpConnected,
            next_state: State::HttpConnected,
            subscribed: Sub::None,
            deadline_ms: None,
            entry_ts: 0,
            event_budget_ms: 0,
            exit: Ok(None),
            input: None,
            output: None,
            stats: Stats::default(),
        }
    }

    /// Start a new request: writes `METHOD uri HTTP/1.1` and the terminating
    /// blank line into the working buffer. Only valid between exchanges.
    pub fn begin_request(&mut self, uri: &str, method: Method) -> Result<(), Error> {
        if self.state != State::HttpConnected {
            return Err(self.sink_error());
        }
        self.method = method;
        self.wbuf.reset();
        let ok = self.wbuf.append(method.as_str().as_bytes()).is_ok()
            && self.wbuf.append(b" ").is_ok()
            && self.wbuf.append(uri.as_bytes()).is_ok()
            && self.wbuf.append(b" HTTP/1.1\r\n\r\n").is_ok();
        if !ok {
            self.wbuf.reset();
            return Err(Error::WorkBufSmall);
        }
        Ok(())
    }

    /// Append one header line to the request started by
    /// [`Self::begin_request`]. Headers go on the wire in the order added.
    /// On failure the request is left exactly as it was.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), Error> {
        if self.state != State::HttpConnected {
            return Err(self.sink_error());
        }
        if self.wbuf.used_len() < 4 {
            return Err(Error::ApiCallNotSupported);
        }
        let mark = self.wbuf.mark();
        self.wbuf.rollback(mark - 2);
        let ok = self.wbuf.append(name.as_bytes()).is_ok()
            && self.wbuf.append(b": ").is_ok()
            && self.wbuf.append(value.as_bytes()).is_ok()
            && self.wbuf.append(b"\r\n\r\n").is_ok();
        if !ok {
            self.restore_terminator(mark);
            return Err(Error::WorkBufSmall);
        }
        Ok(())
    }

    /// Append a Basic authorization header built from `username:password`.
    pub fn set_auth_basic(&mut self, username: &str, password: &str) -> Result<(), Error> {
        if self.state != State::HttpConnected {
            return Err(self.sink_error());
        }
        if self.wbuf.used_len() < 4 {
            return Err(Error::ApiCallNotSupported);
        }
        let mut creds: heapless::Vec<u8, 64> = heapless::Vec::new();
        if creds.extend_from_slice(username.as_bytes()).is_err()
            || creds.push(b':').is_err()
            || creds.extend_from_slice(password.as_bytes()).is_err()
        {
            return Err(Error::TempBufSmall);
        }
        let mark = self.wbuf.mark();
        self.wbuf.rollback(mark - 2);
        let ok = self.wbuf.append(header::AUTHORIZATION.as_bytes()).is_ok()
            && self.wbuf.append(b": Basic ").is_ok()
            && self.append_base64(&creds)
            && self.wbuf.append(b"\r\n\r\n").is_ok();
        if !ok {
            self.restore_terminator(mark);
            return Err(Error::WorkBufSmall);
        }
        Ok(())
    }

    /// Transmit the request and drive the exchange to its next quiescent
    /// point.
    ///
    /// For GET/HEAD (and POST/PUT with `Content-Length: 0`) that is the end
    /// of the exchange: the result is the response status after the whole
    /// body streamed through [`Event::DataReceived`]. For POST/PUT the
    /// result `Ok(100)` means the server (or the virtual 100-continue when no
    /// `Expect` header was sent) is ready for the body: feed it with
    /// [`Self::send_body_chunk`] and [`Self::finish_body`]. `Ok(101)` means
    /// the connection switched to WebSocket mode.
    pub fn process_request<H: EventHandler>(&mut self, handler: &mut H) -> Result<u16, Error> {
        if self.state == State::HttpConnected {
            if self.wbuf.used_len() == 0 {
                return Err(Error::InvalidRequestHeaders);
            }
            let _ = handler.on_event(Event::RequestReady {
                request: self.wbuf.used(),
            });
        }
        self.stats = Stats {
            started_ms: self.clock.now_ms(),
            ..Stats::default()
        };
        match self.run(handler, ApiCall::RequestProcess)? {
            Some(status) => Ok(status),
            None => Err(Error::DataProcessing),
        }
    }

    /// Send one slice of the request body declared by `Content-Length` or
    /// streamed with chunked `Transfer-Encoding`.
    pub fn send_body_chunk(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.run(&mut NoEvents, ApiCall::DataSend { buf, last: false })
            .map(|_| ())
    }

    /// Mark the request body complete and wait for the response.
    ///
    /// For chunked bodies this writes the terminal chunk; for raw bodies it
    /// verifies the declared length was sent exactly. The result is the
    /// response status code, with the body delivered through `handler`.
    pub fn finish_body<H: EventHandler>(&mut self, handler: &mut H) -> Result<u16, Error> {
        match self.run(handler, ApiCall::DataSend { buf: &[], last: true })? {
            Some(status) => Ok(status),
            None => Err(Error::DataProcessing),
        }
    }

    /// Receive WebSocket traffic for up to `timeout_ms` milliseconds.
    ///
    /// Frames are delivered through `handler` as they arrive; the poll
    /// window expiring is not an error, it simply means no (more) frames
    /// this round.
    pub fn ws_poll<H: EventHandler>(&mut self, handler: &mut H, timeout_ms: u32) -> Result<(), Error> {
        self.run(handler, ApiCall::WsPoll { timeout_ms }).map(|_| ())
    }

    /// Send one masked TEXT or BINARY frame.
    pub fn ws_send_frame(&mut self, buf: &[u8], kind: WsFrameKind) -> Result<(), Error> {
        self.run(&mut NoEvents, ApiCall::WsFrameSend { buf, kind })
            .map(|_| ())
    }

    /// Send a CLOSE frame (status 1000) and finish the session. The
    /// connection is unusable afterwards.
    pub fn ws_close(&mut self) -> Result<(), Error> {
        self.run(&mut NoEvents, ApiCall::WsClose).map(|_| ())
    }

    /// Close the transport and consume the client.
    pub fn disconnect(self) -> Result<(), Error> {
        self.conn.close().map_err(|_| Error::Connection)
    }

    /// Immutable access to the underlying transport.
    pub fn transport(&self) -> &C {
        &self.conn
    }

    /// Release the underlying transport without closing it.
    pub fn into_transport(self) -> C {
        self.conn
    }

    /// Transfer statistics of the request in progress (or the last one).
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Status code of the most recently parsed response head.
    pub fn last_status(&self) -> u16 {
        self.status_code
    }

    /* ------------------------------------------------------------------
     * State machine driver
     * ---------------------------------------------------------------- */

    fn run<H: EventHandler>(
        &mut self,
        handler: &mut H,
        call: ApiCall<'_>,
    ) -> Result<Option<u16>, Error> {
        self.exit = Ok(None);
        self.throw(handler, &call, Ev::Call);
        loop {
            if let Some(deadline) = self.deadline_ms {
                let elapsed = network::elapsed_ms(self.clock.now_ms(), self.entry_ts);
                if elapsed >= deadline {
                    self.throw(handler, &call, Ev::Timeout);
                    continue;
                }
                self.event_budget_ms = deadline - elapsed;
            } else {
                self.event_budget_ms = self.config.response_timeout_ms;
            }
            match self.subscribed {
                Sub::Read => self.throw(handler, &call, Ev::Read),
                Sub::Write => self.throw(handler, &call, Ev::Write),
                Sub::Process => self.throw(handler, &call, Ev::Process),
                Sub::None => break,
            }
        }
        self.exit
    }

    /// Dispatch `ev`, then resolve chained transitions: each committed next
    /// state clears the subscription and deadline and receives `Entry`.
    fn throw<H: EventHandler>(&mut self, handler: &mut H, call: &ApiCall<'_>, ev: Ev) {
        self.dispatch(handler, call, ev);
        while self.next_state != self.state {
            self.state = self.next_state;
            self.subscribed = Sub::None;
            self.deadline_ms = None;
            self.entry_ts = self.clock.now_ms();
            log_at!(self.log, Level::Debug, "state -> {:?}", self.state);
            self.dispatch(handler, call, Ev::Entry);
        }
    }

    fn dispatch<H: EventHandler>(&mut self, handler: &mut H, call: &ApiCall<'_>, ev: Ev) {
        match self.state {
            State::HttpConnected => self.st_http_connected(call, ev),
            State::HttpSendingHeaders => self.st_http_sending_headers(ev),
            State::HttpRecvingHeaders => self.st_http_recving_headers(handler, ev),
            State::HttpSendingData => self.st_http_sending_data(call, ev),
            State::HttpSendingPacket => self.st_http_sending_packet(call, ev),
            State::HttpRecvingData => self.st_http_recving_data(handler, ev),
            State::WsConnected => self.st_ws_connected(call, ev),
            State::WsPolling => self.st_ws_polling(handler, call, ev),
            State::WsSendingFrame => self.st_ws_sending_frame(call, ev),
            State::WsClosing => self.st_ws_closing(ev),
            State::Disconnected => self.st_disconnected(ev),
            State::Aborted => self.st_aborted(ev),
        }
    }

    fn enter(&mut self, state: State) {
        self.next_state = state;
    }

    fn exit_status(&mut self, status: u16) {
        self.exit = Ok(Some(status));
    }

    /// Fatal protocol/resource failure: record the error and sink the
    /// machine in `Aborted`.
    fn fail(&mut self, e: Error) {
        self.exit = Err(e);
        self.enter(State::Aborted);
    }

    /// Fatal failure where transport errors sink in `Disconnected` instead.
    fn fail_io(&mut self, e: Error) {
        self.exit = Err(e);
        match e {
            Error::Connection | Error::WriteTimeout => self.enter(State::Disconnected),
            _ => self.enter(State::Aborted),
        }
    }

    fn set_deadline(&mut self, ms: u32) {
        self.entry_ts = self.clock.now_ms();
        self.deadline_ms = Some(ms);
    }

    fn sink_error(&self) -> Error {
        match self.state {
            State::Disconnected => Error::Connection,
            State::Aborted => Error::Aborted,
            _ => Error::ApiCallNotSupported,
        }
    }

    /* ------------------------------------------------------------------
     * State handlers
     * ---------------------------------------------------------------- */

    fn st_http_connected(&mut self, call: &ApiCall<'_>, ev: Ev) {
        match ev {
            Ev::Entry => {
                // Ready for the next request on the same connection.
                self.wbuf.reset();
                self.stats.elapsed_ms =
                    network::elapsed_ms(self.clock.now_ms(), self.stats.started_ms);
                log_at!(
                    self.log,
                    Level::Info,
                    "exchange done: tx={} rx={} elapsed={}ms",
                    self.stats.tx_bytes,
                    self.stats.rx_bytes,
                    self.stats.elapsed_ms
                );
            }
            Ev::Call => match call {
                ApiCall::RequestProcess => self.enter(State::HttpSendingHeaders),
                _ => self.exit = Err(Error::ApiCallNotSupported),
            },
            _ => {}
        }
    }

    fn st_http_sending_headers(&mut self, ev: Ev) {
        match ev {
            Ev::Entry => self.subscribed = Sub::Write,
            Ev::Write => {
                let timeout = self.config.write_timeout_ms;
                let Self {
                    conn,
                    clock,
                    stats,
                    wbuf,
                    ..
                } = self;
                match write_all(conn, clock, stats, wbuf.used(), timeout) {
                    Ok(()) => {
                        let sent = wbuf.used_len();
                        wbuf.advance_left(sent);
                        self.subscribed = Sub::Process;
                    }
                    Err(e) => self.fail_io(e),
                }
            }
            Ev::Process => match self.method {
                Method::Head | Method::Get => self.enter(State::HttpRecvingHeaders),
                Method::Post | Method::Put => self.select_output_processor(),
            },
            _ => {}
        }
    }

    /// Inspect the request headers of a POST/PUT to pick the output
    /// processor and decide whether to wait for a real 100-continue.
    fn select_output_processor(&mut self) {
        let mut valbuf = [0u8; 11];
        let (content_length, chunked_te, expect) = {
            let head = self.wbuf.produced();
            let cl = match codec::header_value(head, header::CONTENT_LENGTH, &mut valbuf) {
                HeaderLookup::NotFound => None,
                HeaderLookup::TooSmall => Some(Err(Error::InvalidRequestHeaders)),
                HeaderLookup::Found(len) => Some(
                    codec::parse_dec(&valbuf[..len]).map_err(|_| Error::InvalidRequestHeaders),
                ),
            };
            (
                cl,
                codec::header_present(head, header::TRANSFER_ENCODING),
                codec::header_present(head, header::EXPECT),
            )
        };

        let mut output = None;
        match content_length {
            Some(Err(e)) => {
                self.fail(e);
                return;
            }
            Some(Ok(size)) => {
                output = Some(Output::Raw(RawTx::new(size)));
                if size == 0 {
                    // Nothing to send; go straight to the response.
                    self.output = output;
                    self.enter(State::HttpRecvingHeaders);
                    return;
                }
            }
            None => {}
        }
        if chunked_te {
            if output.is_some() {
                // Content-Length and Transfer-Encoding are mutually exclusive.
                self.fail(Error::InvalidRequestHeaders);
                return;
            }
            output = Some(Output::Chunked);
        }
        let Some(output) = output else {
            self.fail(Error::InvalidRequestHeaders);
            return;
        };
        self.output = Some(output);
        if expect {
            // Wait for the server's verdict on the expectation.
            self.enter(State::HttpRecvingHeaders);
        } else {
            // Virtual 100-continue: the caller handles both cases the same.
            self.exit_status(100);
            self.enter(State::HttpSendingData);
        }
    }

    fn st_http_recving_headers<H: EventHandler>(&mut self, handler: &mut H, ev: Ev) {
        match ev {
            Ev::Entry => {
                self.set_deadline(self.config.response_timeout_ms);
                self.subscribed = Sub::Read;
                self.wbuf.reset();
            }
            Ev::Read => match self.read_some() {
                Err(e) => self.fail_io(e),
                Ok(0) => {}
                Ok(_) => match codec::verify_status_line(self.wbuf.produced()) {
                    StatusLine::Malformed => self.fail(Error::ResponseFormat),
                    StatusLine::Incomplete => {
                        if self.wbuf.free_len() == 0 {
                            self.fail(Error::WorkBufSmall);
                        }
                    }
                    StatusLine::Complete { status, header_len } => {
                        self.status_code = status;
                        // Leave the header block behind `left`; bytes beyond
                        // it are body/frame data that arrived early.
                        self.wbuf.set_left(header_len);
                        self.subscribed = Sub::Process;
                    }
                },
            },
            Ev::Process => {
                let header_len = self.wbuf.left();
                let _ = handler.on_event(Event::ResponseReceived {
                    status: self.status_code,
                    headers: &self.wbuf.produced()[..header_len],
                });
                self.select_input_processor();
            }
            Ev::Timeout => self.fail(Error::ResponseTimeout),
            _ => {}
        }
    }

    /// Inspect the response head to pick the input processor, in priority
    /// order: Content-Length, Transfer-Encoding, ICY stream, WebSocket
    /// upgrade, 100-continue, then an empty raw body.
    fn select_input_processor(&mut self) {
        let mut valbuf = [0u8; 32];
        let (content_length, transfer_encoding, icy) = {
            let head = &self.wbuf.produced()[..self.wbuf.left()];
            let cl = match codec::header_value(head, header::CONTENT_LENGTH, &mut valbuf) {
                HeaderLookup::NotFound => None,
                HeaderLookup::TooSmall => Some(Err(Error::TempBufSmall)),
                HeaderLookup::Found(len) => {
                    Some(codec::parse_dec(&valbuf[..len]).map_err(|_| Error::ResponseFormat))
                }
            };
            let te = match codec::header_value(head, header::TRANSFER_ENCODING, &mut valbuf) {
                HeaderLookup::NotFound => Ok(false),
                HeaderLookup::TooSmall => Err(Error::TempBufSmall),
                HeaderLookup::Found(_) => Ok(true),
            };
            (cl, te, head.starts_with(b"ICY "))
        };

        match content_length {
            Some(Err(e)) => {
                self.fail(e);
                return;
            }
            Some(Ok(size)) => {
                if self.method == Method::Head {
                    // HEAD responses carry no body regardless of headers.
                    self.exit_status(self.status_code);
                    self.enter(State::HttpConnected);
                } else {
                    log_at!(self.log, Level::Debug, "raw body, {} bytes", size);
                    self.input = Some(Input::Raw(RawRx::new(Some(size))));
                    self.enter(State::HttpRecvingData);
                }
                return;
            }
            None => {}
        }
        match transfer_encoding {
            Err(e) => {
                self.fail(e);
                return;
            }
            Ok(true) => {
                if self.method == Method::Head {
                    self.exit_status(self.status_code);
                    self.enter(State::HttpConnected);
                } else {
                    log_at!(self.log, Level::Debug, "chunked body");
                    self.input = Some(Input::Chunked(ChunkedRx::new()));
                    self.enter(State::HttpRecvingData);
                }
                return;
            }
            Ok(false) => {}
        }
        if self.status_code == 200 && icy {
            // Legacy streaming servers send an endless body with no length.
            self.input = Some(Input::Raw(RawRx::new(None)));
            self.enter(State::HttpRecvingData);
            return;
        }
        if self.status_code == 101 {
            log_at!(self.log, Level::Info, "switching to websocket");
            self.input = Some(Input::WebSocket(WsRx::new()));
            self.exit_status(101);
            self.enter(State::WsConnected);
            return;
        }
        if self.status_code == 100 && self.method.has_body() {
            self.exit_status(100);
            self.enter(State::HttpSendingData);
            return;
        }
        // No length information at all: treat as an empty body.
        self.input = Some(Input::Raw(RawRx::new(Some(0))));
        self.enter(State::HttpRecvingData);
    }

    fn st_http_recving_data<H: EventHandler>(&mut self, handler: &mut H, ev: Ev) {
        match ev {
            Ev::Entry => {
                self.set_deadline(self.config.response_timeout_ms);
                self.subscribed = Sub::Process;
                // Body bytes may already sit behind the header block.
                self.wbuf.compact();
            }
            Ev::Read => match self.read_some() {
                Err(e) => self.fail_io(e),
                Ok(0) => {}
                Ok(_) => {
                    // Progress resets the stall deadline.
                    self.set_deadline(self.config.response_timeout_ms);
                    self.subscribed = Sub::Process;
                }
            },
            Ev::Process => match self.feed_input(handler) {
                Err(e) => self.fail(e),
                Ok(Feed::NeedMore) => {
                    if self.wbuf.free_len() == 0 {
                        self.fail(Error::WorkBufSmall);
                    } else {
                        self.subscribed = Sub::Read;
                    }
                }
                Ok(Feed::Progress { consumed, done }) => {
                    if done {
                        self.exit_status(self.status_code);
                        self.enter(State::HttpConnected);
                    } else {
                        self.wbuf.advance_left(consumed);
                        self.wbuf.compact();
                        if self.wbuf.used_len() == 0 {
                            self.subscribed = Sub::Read;
                        }
                        // Otherwise stay on Process and keep consuming.
                    }
                }
            },
            Ev::Timeout => self.fail(Error::ResponseTimeout),
            _ => {}
        }
    }

    fn st_http_sending_data(&mut self, call: &ApiCall<'_>, ev: Ev) {
        match ev {
            Ev::Entry => {
                // The request bytes are no longer needed; the buffer becomes
                // scratch for the outgoing body.
                self.wbuf.reset();
            }
            Ev::Call => match call {
                ApiCall::DataSend { .. } => self.enter(State::HttpSendingPacket),
                _ => self.exit = Err(Error::ApiCallNotSupported),
            },
            _ => {}
        }
    }

    fn st_http_sending_packet(&mut self, call: &ApiCall<'_>, ev: Ev) {
        match ev {
            Ev::Entry => self.subscribed = Sub::Write,
            Ev::Write => {
                let ApiCall::DataSend { buf, last } = *call else {
                    self.fail(Error::DataProcessing);
                    return;
                };
                match self.run_output(buf, last) {
                    Err(e) => self.fail_io(e),
                    Ok(true) => self.enter(State::HttpRecvingHeaders),
                    Ok(false) => self.enter(State::HttpSendingData),
                }
            }
            _ => {}
        }
    }

    fn st_ws_connected(&mut self, call: &ApiCall<'_>, ev: Ev) {
        match ev {
            Ev::Entry => {
                // Frames may have arrived piggybacked on the upgrade response.
                self.wbuf.compact();
            }
            Ev::Call => match call {
                ApiCall::WsPoll { .. } => self.enter(State::WsPolling),
                ApiCall::WsFrameSend { .. } => self.enter(State::WsSendingFrame),
                ApiCall::WsClose => self.enter(State::WsClosing),
                _ => self.exit = Err(Error::ApiCallNotSupported),
            },
            _ => {}
        }
    }

    fn st_ws_polling<H: EventHandler>(&mut self, handler: &mut H, call: &ApiCall<'_>, ev: Ev) {
        match ev {
            Ev::Entry => {
                let timeout = match call {
                    ApiCall::WsPoll { timeout_ms } => *timeout_ms,
                    _ => 0,
                };
                self.set_deadline(timeout);
                self.subscribed = Sub::Process;
                // Frames already buffered are delivered even with a zero
                // timeout.
                self.ws_poll_step(handler);
            }
            Ev::Process => self.ws_poll_step(handler),
            Ev::Read => match self.read_some() {
                Err(e) => self.fail_io(e),
                Ok(0) => {}
                Ok(_) => self.subscribed = Sub::Process,
            },
            Ev::Timeout => {
                // Poll window over; not a failure.
                self.enter(State::WsConnected);
            }
            _ => {}
        }
    }

    fn ws_poll_step<H: EventHandler>(&mut self, handler: &mut H) {
        match self.feed_input(handler) {
            Err(Error::WebSocketClosed) => {
                self.exit = Err(Error::WebSocketClosed);
                self.enter(State::Disconnected);
            }
            Err(e) => self.fail(e),
            Ok(Feed::NeedMore) => {
                if self.wbuf.free_len() == 0 {
                    self.fail(Error::WorkBufSmall);
                } else {
                    self.subscribed = Sub::Read;
                }
            }
            Ok(Feed::Progress { consumed, .. }) => {
                self.wbuf.advance_left(consumed);
                self.wbuf.compact();
                if self.wbuf.used_len() == 0 {
                    self.subscribed = Sub::Read;
                }
            }
        }
    }

    fn st_ws_sending_frame(&mut self, call: &ApiCall<'_>, ev: Ev) {
        match ev {
            Ev::Entry => self.subscribed = Sub::Write,
            Ev::Write => {
                let ApiCall::WsFrameSend { buf, kind } = *call else {
                    self.fail(Error::DataProcessing);
                    return;
                };
                let timeout = self.config.write_timeout_ms;
                let Self {
                    conn, clock, stats, ..
                } = self;
                match websocket::send_data_frame(conn, clock, stats, buf, kind, timeout) {
                    Ok(()) => self.enter(State::WsConnected),
                    Err(e) => self.fail_io(e),
                }
            }
            _ => {}
        }
    }

    fn st_ws_closing(&mut self, ev: Ev) {
        match ev {
            Ev::Entry => self.subscribed = Sub::Write,
            Ev::Write => {
                let timeout = self.config.write_timeout_ms;
                let Self {
                    conn, clock, stats, ..
                } = self;
                match websocket::send_close(conn, clock, stats, timeout) {
                    Ok(()) => self.enter(State::Disconnected),
                    Err(e) => self.fail_io(e),
                }
            }
            _ => {}
        }
    }

    fn st_disconnected(&mut self, ev: Ev) {
        if let Ev::Call = ev {
            self.exit = Err(Error::Connection);
        }
    }

    fn st_aborted(&mut self, ev: Ev) {
        if let Ev::Call = ev {
            self.exit = Err(Error::Aborted);
        }
    }

    /* ------------------------------------------------------------------
     * Shared helpers
     * ---------------------------------------------------------------- */

    /// One blocking read into the free tail of the working buffer, bounded by
    /// the remaining event budget.
    fn read_some(&mut self) -> Result<usize, Error> {
        let budget = self.event_budget_ms.max(1);
        let Self {
            conn, wbuf, stats, ..
        } = self;
        match conn.read(wbuf.free_mut(), budget) {
            Ok(n) => {
                stats.rx_bytes += n as u32;
                wbuf.advance_right(n);
                Ok(n)
            }
            Err(_) => Err(Error::Connection),
        }
    }

    /// Run the active input processor over the unconsumed span.
    fn feed_input<H: EventHandler>(&mut self, handler: &mut H) -> Result<Feed, Error> {
        let capacity = self.wbuf.capacity();
        let status = self.status_code;
        let write_timeout = self.config.write_timeout_ms;
        let Self {
            conn,
            clock,
            wbuf,
            input,
            stats,
            ..
        } = self;
        let data = wbuf.used();
        match input {
            None => Err(Error::DataProcessing),
            Some(Input::Raw(rx)) => rx.feed(data, handler),
            Some(Input::Chunked(rx)) => rx.feed(data, status, handler),
            Some(Input::WebSocket(rx)) => rx.feed(
                data,
                capacity,
                conn,
                clock,
                stats,
                write_timeout,
                handler,
            ),
        }
    }

    /// Run the active output processor for one application body slice.
    /// Returns `true` once the body is complete.
    fn run_output(&mut self, buf: &[u8], last: bool) -> Result<bool, Error> {
        let timeout = self.config.write_timeout_ms;
        let Self {
            conn,
            clock,
            wbuf,
            output,
            stats,
            ..
        } = self;
        match output {
            None => Err(Error::DataProcessing),
            Some(Output::Raw(tx)) => {
                if last {
                    if !tx.is_complete() {
                        return Err(Error::ContentLength);
                    }
                    Ok(true)
                } else {
                    if buf.is_empty() {
                        return Ok(false);
                    }
                    if tx.would_overflow(buf.len()) {
                        return Err(Error::ContentLength);
                    }
                    write_all(conn, clock, stats, buf, timeout)?;
                    tx.record(buf.len());
                    Ok(false)
                }
            }
            Some(Output::Chunked) => {
                if last {
                    chunked::send_last_chunk(conn, clock, stats, timeout)?;
                    Ok(true)
                } else {
                    chunked::send_chunks(conn, clock, stats, wbuf.scratch_mut(), buf, timeout)?;
                    Ok(false)
                }
            }
        }
    }

    fn append_base64(&mut self, input: &[u8]) -> bool {
        let free = self.wbuf.free_mut();
        match Base64::encode(input, free) {
            Ok(encoded) => {
                let len = encoded.len();
                self.wbuf.advance_right(len);
                true
            }
            Err(_) => false,
        }
    }

    /// Undo a failed header append: restore the cursor and rewrite the
    /// request terminator the append had started to overwrite.
    fn restore_terminator(&mut self, mark: usize) {
        self.wbuf.rollback(mark);
        self.wbuf.overwrite_tail(b"\r\n");
    }
}
