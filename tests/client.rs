use std::collections::VecDeque;

use libhttpc::client::{Abort, Client, Config, Error, Event, EventHandler, Method, WsFrameKind};
use libhttpc::log::NullLog;
use libhttpc::network::{Clock, Close, Connection, Read, Write};

/// How the scripted connection behaves on writes.
enum WriteMode {
    /// Accept everything.
    Full,
    /// Accept at most this many more bytes, one per call, then stall.
    Limit(usize),
}

/// A connection driven entirely by a test script: reads pop pre-queued
/// chunks, writes are captured for inspection.
struct ScriptedConnection {
    reads: VecDeque<Vec<u8>>,
    fail_when_drained: bool,
    wire: Vec<u8>,
    write_mode: WriteMode,
}

impl ScriptedConnection {
    fn new() -> Self {
        Self {
            reads: VecDeque::new(),
            fail_when_drained: false,
            wire: Vec::new(),
            write_mode: WriteMode::Full,
        }
    }

    fn push_read(&mut self, data: &[u8]) {
        self.reads.push_back(data.to_vec());
    }

    /// Queue `data` one byte per read call.
    fn push_read_bytewise(&mut self, data: &[u8]) {
        for b in data {
            self.reads.push_back(vec![*b]);
        }
    }
}

impl Read for ScriptedConnection {
    type Error = ();
    fn read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
        match self.reads.pop_front() {
            Some(chunk) => {
                let n = buf.len().min(chunk.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.reads.push_front(chunk[n..].to_vec());
                }
                Ok(n)
            }
            None => {
                if self.fail_when_drained {
                    Err(())
                } else {
                    Ok(0)
                }
            }
        }
    }
}

impl Write for ScriptedConnection {
    type Error = ();
    fn write(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<usize, Self::Error> {
        match &mut self.write_mode {
            WriteMode::Full => {
                self.wire.extend_from_slice(buf);
                Ok(buf.len())
            }
            WriteMode::Limit(remaining) => {
                if *remaining == 0 || buf.is_empty() {
                    return Ok(0);
                }
                *remaining -= 1;
                self.wire.push(buf[0]);
                Ok(1)
            }
        }
    }
}

impl Close for ScriptedConnection {
    type Error = ();
    fn close(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Connection for ScriptedConnection {}

/// A clock that advances a little on every query so deadlines make progress
/// even when the scripted connection answers instantly.
struct TestClock {
    now: u32,
    tick: u32,
}

impl TestClock {
    fn new() -> Self {
        Self { now: 0, tick: 1 }
    }
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

#[derive(Default)]
struct Recorder {
    requests: Vec<Vec<u8>>,
    responses: Vec<(u16, Vec<u8>)>,
    data: Vec<Vec<u8>>,
    ws_data: Vec<(u8, WsFrameKind, Vec<u8>)>,
    ws_closes: usize,
    ws_pings: usize,
    abort_on_data: bool,
}

impl EventHandler for Recorder {
    fn on_event(&mut self, event: Event<'_>) -> Result<(), Abort> {
        match event {
            Event::RequestReady { request } => self.requests.push(request.to_vec()),
            Event::ResponseReceived { status, headers } => {
                self.responses.push((status, headers.to_vec()));
            }
            Event::DataReceived { data } => {
                self.data.push(data.to_vec());
                if self.abort_on_data {
                    return Err(Abort);
                }
            }
            Event::WsDataReceived {
                data,
                frame_id,
                kind,
            } => self.ws_data.push((frame_id, kind, data.to_vec())),
            Event::WsClose => self.ws_closes += 1,
            Event::WsPing => self.ws_pings += 1,
        }
        Ok(())
    }
}

fn body(rec: &Recorder) -> Vec<u8> {
    rec.data.iter().flatten().copied().collect()
}

fn new_client(conn: ScriptedConnection) -> Client<ScriptedConnection, TestClock> {
    Client::with_config(conn, TestClock::new(), short_config())
}

/// Short timeouts keep the failure-path tests quick.
fn short_config() -> Config {
    Config {
        connect_timeout_ms: 250,
        response_timeout_ms: 250,
        write_timeout_ms: 250,
    }
}

/// Convert a masked client frame into its unmasked server-side reading:
/// (opcode, payload).
fn unmask_frame(frame: &[u8]) -> (u8, Vec<u8>) {
    let len7 = frame[1] & 0x7F;
    let header_len = match len7 {
        126 => 4,
        127 => 10,
        _ => 2,
    };
    let key = [
        frame[header_len],
        frame[header_len + 1],
        frame[header_len + 2],
        frame[header_len + 3],
    ];
    let payload = frame[header_len + 4..]
        .iter()
        .enumerate()
        .map(|(i, &b)| b ^ key[i % 4])
        .collect();
    (frame[0] & 0x0F, payload)
}

#[test]
fn get_exchange_end_to_end() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/", Method::Get).unwrap();
    client.set_header("Host", "example.com").unwrap();
    let status = client.process_request(&mut rec).unwrap();

    assert_eq!(status, 200);
    assert_eq!(rec.requests.len(), 1);
    assert_eq!(rec.requests[0], b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
    assert_eq!(rec.responses.len(), 1);
    assert_eq!(rec.responses[0].0, 200);
    assert_eq!(rec.data.len(), 1, "exactly one data event expected");
    assert_eq!(rec.data[0], b"hello");

    let stats = client.stats();
    assert_eq!(stats.tx_bytes as usize, rec.requests[0].len());
    assert_eq!(stats.rx_bytes, 43);
}

#[test]
fn request_headers_in_order_exactly_once() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/things?q=1", Method::Get).unwrap();
    client.set_header("A", "1").unwrap();
    client.set_header("B", "2").unwrap();
    client.set_header("Host", "h").unwrap();
    let status = client.process_request(&mut rec).unwrap();

    assert_eq!(status, 204);
    assert_eq!(
        rec.requests[0],
        b"GET /things?q=1 HTTP/1.1\r\nA: 1\r\nB: 2\r\nHost: h\r\n\r\n"
    );
}

#[test]
fn chunked_response_delivered_byte_at_a_time() {
    let mut conn = ScriptedConnection::new();
    conn.push_read_bytewise(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
    );
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/wiki", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    let status = client.process_request(&mut rec).unwrap();

    assert_eq!(status, 200);
    assert_eq!(body(&rec), b"Wikipedia");
}

#[test]
fn post_with_content_length() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/submit", Method::Post).unwrap();
    client.set_header("Host", "h").unwrap();
    client.set_header("Content-Length", "5").unwrap();
    // No Expect header: the client reports a virtual 100-continue and the
    // body can flow immediately.
    let status = client.process_request(&mut rec).unwrap();
    assert_eq!(status, 100);

    client.send_body_chunk(b"hel").unwrap();
    client.send_body_chunk(b"lo").unwrap();
    let status = client.finish_body(&mut rec).unwrap();
    assert_eq!(status, 201);

    let head: &[u8] = b"POST /submit HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\n";
    let mut expected = head.to_vec();
    expected.extend_from_slice(b"hello");
    assert_eq!(client_wire(client), expected);
}

#[test]
fn post_with_chunked_encoding() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/stream", Method::Post).unwrap();
    client.set_header("Host", "h").unwrap();
    client.set_header("Transfer-Encoding", "chunked").unwrap();
    assert_eq!(client.process_request(&mut rec).unwrap(), 100);

    client.send_body_chunk(b"hello world").unwrap();
    let status = client.finish_body(&mut rec).unwrap();
    assert_eq!(status, 200);

    let wire = client_wire(client);
    let head_end = find(&wire, b"\r\n\r\n").unwrap() + 4;
    assert_eq!(&wire[head_end..], b"B\r\nhello world\r\n0\r\n\r\n");
}

#[test]
fn content_length_underrun_is_fatal() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/submit", Method::Post).unwrap();
    client.set_header("Host", "h").unwrap();
    client.set_header("Content-Length", "5").unwrap();
    assert_eq!(client.process_request(&mut rec).unwrap(), 100);

    client.send_body_chunk(b"hel").unwrap();
    assert_eq!(client.finish_body(&mut rec), Err(Error::ContentLength));
    // The failure is terminal.
    assert_eq!(client.process_request(&mut rec), Err(Error::Aborted));
}

#[test]
fn content_length_overrun_is_fatal() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/submit", Method::Put).unwrap();
    client.set_header("Host", "h").unwrap();
    client.set_header("Content-Length", "2").unwrap();
    assert_eq!(client.process_request(&mut rec).unwrap(), 100);

    assert_eq!(client.send_body_chunk(b"toolong"), Err(Error::ContentLength));
}

#[test]
fn both_length_headers_are_fatal() {
    let mut client = new_client(ScriptedConnection::new());
    let mut rec = Recorder::default();

    client.begin_request("/x", Method::Post).unwrap();
    client.set_header("Content-Length", "5").unwrap();
    client.set_header("Transfer-Encoding", "chunked").unwrap();
    assert_eq!(
        client.process_request(&mut rec),
        Err(Error::InvalidRequestHeaders)
    );
    assert_eq!(client.process_request(&mut rec), Err(Error::Aborted));
}

#[test]
fn missing_length_headers_are_fatal() {
    let mut client = new_client(ScriptedConnection::new());
    let mut rec = Recorder::default();

    client.begin_request("/x", Method::Post).unwrap();
    client.set_header("Host", "h").unwrap();
    assert_eq!(
        client.process_request(&mut rec),
        Err(Error::InvalidRequestHeaders)
    );
}

#[test]
fn short_writes_until_timeout_disconnect() {
    let mut conn = ScriptedConnection::new();
    conn.write_mode = WriteMode::Limit(5);
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    assert_eq!(client.process_request(&mut rec), Err(Error::WriteTimeout));
    // The connection is dead, not merely aborted.
    assert_eq!(client.process_request(&mut rec), Err(Error::Connection));
    assert!(client.begin_request("/", Method::Get).is_err());
}

#[test]
fn response_timeout() {
    let mut client = new_client(ScriptedConnection::new());
    let mut rec = Recorder::default();

    client.begin_request("/", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    assert_eq!(client.process_request(&mut rec), Err(Error::ResponseTimeout));
}

#[test]
fn transport_failure_mid_body() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc");
    conn.fail_when_drained = true;
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    assert_eq!(client.process_request(&mut rec), Err(Error::Connection));
    assert_eq!(body(&rec), b"abc");
    assert_eq!(client.ws_poll(&mut rec, 10), Err(Error::Connection));
}

#[test]
fn oversized_response_head_reports_work_buf_small() {
    let mut conn = ScriptedConnection::new();
    let mut response = b"HTTP/1.1 200 OK\r\nX-Padding: ".to_vec();
    response.extend_from_slice(&[b'a'; 100]);
    response.extend_from_slice(b"\r\n\r\n");
    conn.push_read(&response);
    let mut client: Client<ScriptedConnection, TestClock, NullLog, 64> =
        Client::with_config(conn, TestClock::new(), short_config());
    let mut rec = Recorder::default();

    client.begin_request("/", Method::Get).unwrap();
    assert_eq!(client.process_request(&mut rec), Err(Error::WorkBufSmall));
}

#[test]
fn oversized_request_reports_work_buf_small() {
    let mut client: Client<ScriptedConnection, TestClock, NullLog, 64> =
        Client::with_config(ScriptedConnection::new(), TestClock::new(), short_config());

    client.begin_request("/", Method::Get).unwrap();
    let long_value = "v".repeat(100);
    assert_eq!(
        client.set_header("X-Long", &long_value),
        Err(Error::WorkBufSmall)
    );
    // A failed header append leaves the request intact and usable.
    client.set_header("Host", "h").unwrap();
}

#[test]
fn application_abort_during_body() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\nabcdefgh");
    let mut client = new_client(conn);
    let mut rec = Recorder {
        abort_on_data: true,
        ..Recorder::default()
    };

    client.begin_request("/", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    assert_eq!(client.process_request(&mut rec), Err(Error::AppAborted));
}

#[test]
fn basic_auth_header_bytes() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/private", Method::Get).unwrap();
    client.set_auth_basic("user", "pass").unwrap();
    client.set_header("Host", "h").unwrap();
    client.process_request(&mut rec).unwrap();

    assert_eq!(
        rec.requests[0],
        b"GET /private HTTP/1.1\r\nAuthorization: Basic dXNlcjpwYXNz\r\nHost: h\r\n\r\n"
    );
}

#[test]
fn status_404_is_a_completed_exchange() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/missing", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    assert_eq!(client.process_request(&mut rec), Ok(404));
    assert_eq!(body(&rec), b"not found");
}

#[test]
fn head_skips_body_and_connection_stays_usable() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 200 OK\r\nContent-Length: 1234\r\n\r\n");
    conn.push_read(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/file", Method::Head).unwrap();
    client.set_header("Host", "h").unwrap();
    assert_eq!(client.process_request(&mut rec).unwrap(), 200);
    assert!(rec.data.is_empty(), "HEAD must not consume a body");

    // Same connection, next request.
    client.begin_request("/file", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    assert_eq!(client.process_request(&mut rec).unwrap(), 200);
    assert_eq!(body(&rec), b"ok");
}

#[test]
fn expect_100_continue_round_trip() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 100 Continue\r\n\r\n");
    conn.push_read(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/upload", Method::Put).unwrap();
    client.set_header("Host", "h").unwrap();
    client.set_header("Content-Length", "4").unwrap();
    client.set_header("Expect", "100-continue").unwrap();
    // The 100 here is the server's real interim response.
    assert_eq!(client.process_request(&mut rec).unwrap(), 100);

    client.send_body_chunk(b"data").unwrap();
    assert_eq!(client.finish_body(&mut rec).unwrap(), 200);
}

#[test]
fn icy_stream_is_unbounded_raw() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"ICY 200 OK\r\nicy-name: Radio\r\n\r\n");
    conn.push_read(b"streamed-audio-bytes");
    let mut client = new_client(conn);
    let mut rec = Recorder {
        abort_on_data: true,
        ..Recorder::default()
    };

    client.begin_request("/listen", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    // An endless stream only ends when the application says so.
    assert_eq!(client.process_request(&mut rec), Err(Error::AppAborted));
    assert_eq!(rec.data[0], b"streamed-audio-bytes");
}

#[test]
fn websocket_upgrade_poll_and_close() {
    let mut conn = ScriptedConnection::new();
    // Upgrade response with the first frame piggybacked on the same read.
    let mut upgrade = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n".to_vec();
    upgrade.extend_from_slice(&[0x81, 0x02, b'h', b'i']);
    conn.push_read(&upgrade);
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/chat", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    client.set_header("Upgrade", "websocket").unwrap();
    client.set_header("Connection", "Upgrade").unwrap();
    assert_eq!(client.process_request(&mut rec).unwrap(), 101);

    // HTTP calls are refused after the upgrade.
    assert_eq!(
        client.process_request(&mut rec),
        Err(Error::ApiCallNotSupported)
    );

    // The piggybacked frame is delivered even with a zero timeout.
    client.ws_poll(&mut rec, 0).unwrap();
    assert_eq!(rec.ws_data.len(), 1);
    assert_eq!(rec.ws_data[0], (0, WsFrameKind::Text, b"hi".to_vec()));

    // An idle poll window simply expires.
    client.ws_poll(&mut rec, 20).unwrap();
    assert_eq!(rec.ws_data.len(), 1);

    client.ws_close().unwrap();
    assert_eq!(client.ws_poll(&mut rec, 10), Err(Error::Connection));
}

#[test]
fn websocket_server_close_during_poll() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 101 Switching Protocols\r\n\r\n");
    conn.push_read(&[0x88, 0x02, 0x03, 0xE8]);
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/chat", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    assert_eq!(client.process_request(&mut rec).unwrap(), 101);

    assert_eq!(client.ws_poll(&mut rec, 100), Err(Error::WebSocketClosed));
    assert_eq!(rec.ws_closes, 1, "exactly one close event");

    // The client answered with a masked CLOSE carrying status 1000.
    let wire = client_wire(client);
    let reply_start = wire.len() - 8; // 2 header + 4 mask + 2 status
    let (opcode, payload) = unmask_frame(&wire[reply_start..]);
    assert_eq!(opcode, 0x8);
    assert_eq!(payload, vec![0x03, 0xE8]);
}

#[test]
fn websocket_send_frame_is_masked() {
    let mut conn = ScriptedConnection::new();
    conn.push_read(b"HTTP/1.1 101 Switching Protocols\r\n\r\n");
    let mut client = new_client(conn);
    let mut rec = Recorder::default();

    client.begin_request("/chat", Method::Get).unwrap();
    client.set_header("Host", "h").unwrap();
    let request_len = {
        assert_eq!(client.process_request(&mut rec).unwrap(), 101);
        rec.requests[0].len()
    };

    client.ws_send_frame(b"hello", WsFrameKind::Text).unwrap();
    let wire = client_wire(client);
    let frame = &wire[request_len..];
    assert_eq!(frame[1] & 0x80, 0x80, "client frames must be masked");
    let (opcode, payload) = unmask_frame(frame);
    assert_eq!(opcode, 0x1);
    assert_eq!(payload, b"hello");
}

#[test]
fn websocket_calls_rejected_before_upgrade() {
    let mut client = new_client(ScriptedConnection::new());
    let mut rec = Recorder::default();
    assert_eq!(client.ws_poll(&mut rec, 10), Err(Error::ApiCallNotSupported));
    assert_eq!(
        client.ws_send_frame(b"x", WsFrameKind::Binary),
        Err(Error::ApiCallNotSupported)
    );
    assert_eq!(client.send_body_chunk(b"x"), Err(Error::ApiCallNotSupported));
}

fn client_wire<const N: usize>(client: Client<ScriptedConnection, TestClock, NullLog, N>) -> Vec<u8> {
    client.into_transport().wire
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
