use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use engine::RemoteConsoleLinePump;
use tracing::{info, warn};

const THRUPORT_ENV_VAR: &str = "WARDEN_THRUPORT";
const THRUPORT_PORT_ENV_VAR: &str = "WARDEN_THRUPORT_PORT";
const THRUPORT_DEFAULT_PORT: u16 = 46001;
const MAX_PENDING_CONTROL_BYTES_PER_CLIENT: usize = 256 * 1024;
const MAX_INBOUND_LINE_BYTES: usize = 8 * 1024;
const REMOTE_CONTROL_PREFIX: &str = "C ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DevThruportConfig {
    pub(crate) enabled: bool,
    pub(crate) port: u16,
}

impl DevThruportConfig {
    pub(crate) fn from_env() -> Self {
        let enabled = parse_enabled_flag(std::env::var(THRUPORT_ENV_VAR).ok().as_deref());
        let port = parse_port(std::env::var(THRUPORT_PORT_ENV_VAR).ok().as_deref());
        Self { enabled, port }
    }
}

fn parse_enabled_flag(raw: Option<&str>) -> bool {
    raw.is_some_and(|value| value.trim() == "1")
}

fn parse_port(raw: Option<&str>) -> u16 {
    match raw {
        Some(value) => match value.trim().parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                warn!(
                    var = THRUPORT_PORT_ENV_VAR,
                    value = value,
                    fallback = THRUPORT_DEFAULT_PORT,
                    "thruport_port_invalid"
                );
                THRUPORT_DEFAULT_PORT
            }
        },
        None => THRUPORT_DEFAULT_PORT,
    }
}

fn ready_line_text(port: u16) -> String {
    format!("thruport.ready v1 port:{port}")
}

fn encode_line_payload(line: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(REMOTE_CONTROL_PREFIX.len() + line.len() + 1);
    bytes.extend_from_slice(REMOTE_CONTROL_PREFIX.as_bytes());
    bytes.extend_from_slice(line.as_bytes());
    bytes.push(b'\n');
    bytes
}

/// Localhost line console for driving the sim from scripts.
pub(crate) struct DevThruport {
    transport: Option<TcpRemoteConsoleTransport>,
    disconnect_reset_requested: bool,
}

impl DevThruport {
    pub(crate) fn disabled() -> Self {
        Self {
            transport: None,
            disconnect_reset_requested: false,
        }
    }

    pub(crate) fn from_env() -> Self {
        Self::from_config(DevThruportConfig::from_env())
    }

    pub(crate) fn from_config(config: DevThruportConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        match TcpRemoteConsoleTransport::bind_localhost(config.port) {
            Ok(transport) => {
                info!(port = transport.bound_port, "thruport_listening");
                Self {
                    transport: Some(transport),
                    disconnect_reset_requested: false,
                }
            }
            Err(error) => {
                warn!(port = config.port, error = %error, "thruport_bind_failed");
                Self::disabled()
            }
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }
}

impl RemoteConsoleLinePump for DevThruport {
    fn poll_lines(&mut self, out: &mut Vec<String>) {
        if let Some(transport) = self.transport.as_mut() {
            transport.poll_lines(out);
            if transport.take_disconnect_flag() {
                self.disconnect_reset_requested = true;
            }
        }
    }

    fn send_output_lines(&mut self, lines: &[String]) {
        if let Some(transport) = self.transport.as_mut() {
            transport.send_output_lines(lines);
            if transport.take_disconnect_flag() {
                self.disconnect_reset_requested = true;
            }
        }
    }

    fn status_line(&mut self) -> String {
        let clients = self
            .transport
            .as_ref()
            .map_or(0, |transport| transport.clients.len());
        format!(
            "thruport.status v1 enabled:{} clients:{}",
            u8::from(self.is_enabled()),
            clients
        )
    }

    fn take_disconnect_reset_requested(&mut self) -> bool {
        std::mem::take(&mut self.disconnect_reset_requested)
    }
}

struct ActiveChunk {
    bytes: Vec<u8>,
    written: usize,
}

struct ClientConn {
    stream: TcpStream,
    peer: SocketAddr,
    read_buffer: Vec<u8>,
    active_chunk: Option<ActiveChunk>,
    queued_chunks: VecDeque<Vec<u8>>,
    queued_bytes: usize,
}

impl ClientConn {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            read_buffer: Vec::new(),
            active_chunk: None,
            queued_chunks: VecDeque::new(),
            queued_bytes: 0,
        }
    }

    fn enqueue_line(&mut self, line: &str) {
        let bytes = encode_line_payload(line);
        self.queued_bytes = self.queued_bytes.saturating_add(bytes.len());
        self.queued_chunks.push_back(bytes);
        let evicted = evict_oldest_until_within(
            &mut self.queued_chunks,
            &mut self.queued_bytes,
            MAX_PENDING_CONTROL_BYTES_PER_CLIENT,
        );
        if evicted > 0 {
            warn!(peer = %self.peer, evicted, "thruport_output_evicted");
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let stream = &mut self.stream;
        flush_pending_chunks(
            &mut self.active_chunk,
            &mut self.queued_chunks,
            &mut self.queued_bytes,
            |payload| stream.write(payload),
        )
    }
}

/// Drops queued chunks oldest first until the total fits `cap`. The newest chunk is kept.
fn evict_oldest_until_within(
    queue: &mut VecDeque<Vec<u8>>,
    queued_bytes: &mut usize,
    cap: usize,
) -> usize {
    let mut evicted = 0;
    while *queued_bytes > cap && queue.len() > 1 {
        let Some(oldest) = queue.pop_front() else {
            break;
        };
        *queued_bytes = queued_bytes.saturating_sub(oldest.len());
        evicted += 1;
    }
    evicted
}

fn flush_pending_chunks(
    active_chunk: &mut Option<ActiveChunk>,
    queued_chunks: &mut VecDeque<Vec<u8>>,
    queued_bytes: &mut usize,
    mut write: impl FnMut(&[u8]) -> io::Result<usize>,
) -> io::Result<()> {
    loop {
        if active_chunk.is_none() {
            let Some(bytes) = queued_chunks.pop_front() else {
                return Ok(());
            };
            *queued_bytes = queued_bytes.saturating_sub(bytes.len());
            *active_chunk = Some(ActiveChunk { bytes, written: 0 });
        }
        let Some(active) = active_chunk.as_mut() else {
            return Ok(());
        };
        match write(&active.bytes[active.written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "client accepted zero bytes",
                ))
            }
            Ok(count) => {
                active.written += count;
                if active.written >= active.bytes.len() {
                    *active_chunk = None;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
}

/// Splits complete `\n` lines off the front of `buffer`, trimming `\r`.
fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut Vec<String>) {
    while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=newline).collect();
        let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
        let line = text.trim_end_matches('\r').trim();
        if !line.is_empty() {
            out.push(line.to_string());
        }
    }
}

struct TcpRemoteConsoleTransport {
    listener: TcpListener,
    bound_port: u16,
    clients: Vec<ClientConn>,
    disconnected: bool,
}

impl TcpRemoteConsoleTransport {
    fn bind_localhost(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        let bound_port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            bound_port,
            clients: Vec::new(),
            disconnected: false,
        })
    }

    fn take_disconnect_flag(&mut self) -> bool {
        std::mem::take(&mut self.disconnected)
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(error) = stream.set_nonblocking(true) {
                        warn!(peer = %peer, error = %error, "thruport_client_setup_failed");
                        continue;
                    }
                    info!(peer = %peer, "thruport_client_connected");
                    let mut client = ClientConn::new(stream, peer);
                    client.enqueue_line(&ready_line_text(self.bound_port));
                    self.clients.push(client);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) => {
                    warn!(error = %error, "thruport_accept_failed");
                    return;
                }
            }
        }
    }

    fn poll_lines(&mut self, out: &mut Vec<String>) {
        self.accept_pending();
        let mut dropped = Vec::new();
        for (index, client) in self.clients.iter_mut().enumerate() {
            if read_client(client, out).is_err() || client.flush().is_err() {
                dropped.push(index);
            }
        }
        self.drop_clients(dropped);
    }

    fn send_output_lines(&mut self, lines: &[String]) {
        self.accept_pending();
        let mut dropped = Vec::new();
        for (index, client) in self.clients.iter_mut().enumerate() {
            for line in lines {
                client.enqueue_line(line);
            }
            if client.flush().is_err() {
                dropped.push(index);
            }
        }
        self.drop_clients(dropped);
    }

    fn drop_clients(&mut self, mut indices: Vec<usize>) {
        indices.sort_unstable();
        for index in indices.into_iter().rev() {
            let client = self.clients.remove(index);
            info!(peer = %client.peer, "thruport_client_disconnected");
            self.disconnected = true;
        }
    }
}

/// Reads whatever is available. `Err` means the client is gone.
fn read_client(client: &mut ClientConn, out: &mut Vec<String>) -> io::Result<()> {
    let mut chunk = [0u8; 1024];
    loop {
        match client.stream.read(&mut chunk) {
            Ok(0) => {
                drain_complete_lines(&mut client.read_buffer, out);
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed"));
            }
            Ok(count) => {
                client.read_buffer.extend_from_slice(&chunk[..count]);
                drain_complete_lines(&mut client.read_buffer, out);
                if client.read_buffer.len() > MAX_INBOUND_LINE_BYTES {
                    warn!(peer = %client.peer, "thruport_line_too_long");
                    client.read_buffer.clear();
                }
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn connect_and_accept(transport: &mut TcpRemoteConsoleTransport) -> TcpStream {
        let addr = transport.listener.local_addr().expect("local_addr");
        let client = TcpStream::connect(addr).expect("connect");
        client
            .set_nonblocking(true)
            .expect("set_nonblocking_client");
        let mut ignored = Vec::new();
        for _ in 0..40 {
            transport.poll_lines(&mut ignored);
            if transport.clients.len() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(transport.clients.len(), 1);
        client
    }

    fn read_until(
        transport: &mut TcpRemoteConsoleTransport,
        client: &mut TcpStream,
        expected: &[&str],
    ) -> String {
        let mut received = Vec::new();
        let mut ignored = Vec::new();
        for _ in 0..80 {
            transport.poll_lines(&mut ignored);
            let mut chunk = [0u8; 256];
            match client.read(&mut chunk) {
                Ok(bytes_read) if bytes_read > 0 => {
                    received.extend_from_slice(&chunk[..bytes_read]);
                    let text = String::from_utf8_lossy(&received);
                    if expected.iter().all(|needle| text.contains(needle)) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => panic!("unexpected read error: {err}"),
            }
            thread::sleep(Duration::from_millis(5));
        }
        String::from_utf8_lossy(&received).into_owned()
    }

    #[test]
    fn enabled_flag_requires_exactly_one() {
        assert!(parse_enabled_flag(Some("1")));
        assert!(parse_enabled_flag(Some(" 1 ")));
        assert!(!parse_enabled_flag(Some("0")));
        assert!(!parse_enabled_flag(Some("true")));
        assert!(!parse_enabled_flag(None));
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        assert_eq!(parse_port(Some("47000")), 47000);
        assert_eq!(parse_port(Some("not-a-port")), THRUPORT_DEFAULT_PORT);
        assert_eq!(parse_port(Some("70000")), THRUPORT_DEFAULT_PORT);
        assert_eq!(parse_port(None), THRUPORT_DEFAULT_PORT);
    }

    #[test]
    fn drain_complete_lines_keeps_partial_tail() {
        let mut buffer = b"snapshot\r\nqty logs\n\nsta".to_vec();
        let mut out = Vec::new();
        drain_complete_lines(&mut buffer, &mut out);
        assert_eq!(out, vec!["snapshot".to_string(), "qty logs".to_string()]);
        assert_eq!(buffer, b"sta".to_vec());
    }

    #[test]
    fn disabled_thruport_reports_status_and_yields_nothing() {
        let mut thruport = DevThruport::disabled();
        let mut out = Vec::new();
        thruport.poll_lines(&mut out);
        thruport.send_output_lines(&["ok: ignored".to_string()]);
        assert!(out.is_empty());
        assert_eq!(
            thruport.status_line(),
            "thruport.status v1 enabled:0 clients:0"
        );
        assert!(!thruport.take_disconnect_reset_requested());
    }

    #[test]
    fn transport_binds_localhost_only() {
        let transport = TcpRemoteConsoleTransport::bind_localhost(0).expect("bind");
        let addr = transport.listener.local_addr().expect("local_addr");
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), transport.bound_port);
    }

    #[test]
    fn transport_receives_lines_from_client() {
        let mut transport = TcpRemoteConsoleTransport::bind_localhost(0).expect("bind");
        let mut client = connect_and_accept(&mut transport);
        client.write_all(b"tick 5\nsnapshot\n").expect("write");

        let mut out = Vec::new();
        for _ in 0..40 {
            transport.poll_lines(&mut out);
            if out.len() >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(out, vec!["tick 5".to_string(), "snapshot".to_string()]);
    }

    #[test]
    fn ready_line_then_output_lines_reach_client_prefixed() {
        let mut transport = TcpRemoteConsoleTransport::bind_localhost(0).expect("bind");
        let mut client = connect_and_accept(&mut transport);
        transport.send_output_lines(&["ok: ready".to_string(), "error: nope".to_string()]);

        let ready = format!("C {}\n", ready_line_text(transport.bound_port));
        let text = read_until(
            &mut transport,
            &mut client,
            &[&ready, "C ok: ready\n", "C error: nope\n"],
        );
        assert!(text.starts_with(&ready));
        assert!(text.contains("C ok: ready\n"));
        assert!(text.contains("C error: nope\n"));
    }

    #[test]
    fn disconnect_reset_flag_drains_once_after_client_disconnect() {
        let transport = TcpRemoteConsoleTransport::bind_localhost(0).expect("bind");
        let addr = transport.listener.local_addr().expect("local_addr");
        let mut thruport = DevThruport {
            transport: Some(transport),
            disconnect_reset_requested: false,
        };

        let client = TcpStream::connect(addr).expect("connect");
        let mut out = Vec::new();
        for _ in 0..40 {
            thruport.poll_lines(&mut out);
            if thruport.status_line().ends_with("clients:1") {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            thruport.status_line(),
            "thruport.status v1 enabled:1 clients:1"
        );

        drop(client);
        for _ in 0..40 {
            thruport.poll_lines(&mut out);
            if thruport.take_disconnect_reset_requested() {
                assert!(!thruport.take_disconnect_reset_requested());
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("disconnect reset flag was not set");
    }

    #[test]
    fn wouldblock_retains_active_chunk_and_queue_order() {
        let mut active_chunk = None;
        let mut queued = VecDeque::new();
        let first_line = encode_line_payload("ok: saved");
        let second_line = encode_line_payload("ok: now 50ms");
        let mut queued_bytes = first_line.len() + second_line.len();
        queued.push_back(first_line);
        queued.push_back(second_line.clone());

        let mut first = true;
        flush_pending_chunks(&mut active_chunk, &mut queued, &mut queued_bytes, |payload| {
            if first {
                first = false;
                Ok(payload.len().min(3))
            } else {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "blocked"))
            }
        })
        .expect("wouldblock is not an error");

        let active = active_chunk.expect("active chunk retained");
        assert_eq!(active.written, 3);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0], second_line);
        assert_eq!(queued_bytes, second_line.len());
    }

    #[test]
    fn zero_byte_write_reports_error() {
        let mut active_chunk = None;
        let mut queued = VecDeque::from(vec![encode_line_payload("ok: x")]);
        let mut queued_bytes = queued[0].len();
        let result =
            flush_pending_chunks(&mut active_chunk, &mut queued, &mut queued_bytes, |_| Ok(0));
        assert_eq!(
            result.expect_err("write zero").kind(),
            io::ErrorKind::WriteZero
        );
    }

    #[test]
    fn eviction_drops_oldest_and_keeps_newest() {
        let mut queue = VecDeque::new();
        let mut queued_bytes = 0;
        for index in 0..4 {
            let bytes = vec![b'a' + index; 10];
            queued_bytes += bytes.len();
            queue.push_back(bytes);
        }
        let evicted = evict_oldest_until_within(&mut queue, &mut queued_bytes, 25);
        assert_eq!(evicted, 2);
        assert_eq!(queued_bytes, 20);
        assert_eq!(queue.front().expect("front")[0], b'c');

        let mut oversized = VecDeque::from(vec![vec![0u8; 100]]);
        let mut oversized_bytes = 100;
        assert_eq!(
            evict_oldest_until_within(&mut oversized, &mut oversized_bytes, 10),
            0
        );
        assert_eq!(oversized.len(), 1);
    }
}
