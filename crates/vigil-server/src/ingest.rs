//! # Ingest
//!
//! Network listeners that decode JSON events and push them into the root
//! stream on the loop thread that read them.
//!
//! - TCP: newline-delimited events. The acceptor hands each connection to a
//!   worker loop, round-robin, through [`LoopHandle::execute`].
//! - UDP: one event per datagram, served by the loop that owns the socket.

use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, trace, warn};
use vigil_core::reactor::{EventLoop, LoopHandle, Mode, ReactorError, WatchId};
use vigil_core::time::{Clock, SystemClock};
use vigil_core::{Event, Stream};

/// Longest accepted TCP line; longer lines are discarded.
const MAX_LINE: usize = 1 << 20;
const READ_CHUNK: usize = 16 * 1024;
const MAX_DATAGRAM: usize = 64 * 1024;

/// Ingest counters shared by every loop.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    dropped: AtomicU64,
    connections: AtomicU64,
}

impl IngestStats {
    /// Returns `(received, dropped, connections)`.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.received.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
            self.connections.load(Ordering::Relaxed),
        )
    }

    /// Logs the counters.
    pub fn log(&self) {
        let (received, dropped, connections) = self.snapshot();
        info!(received, dropped, connections, "ingest stats");
    }
}

/// Decodes one JSON event, stamping the current time if it carries none.
///
/// Blank input decodes to `None`.
pub fn decode(bytes: &[u8], clock: &impl Clock) -> Result<Option<Event>, serde_json::Error> {
    let bytes = bytes.trim_ascii();
    if bytes.is_empty() {
        return Ok(None);
    }
    let mut event: Event = serde_json::from_slice(bytes)?;
    event.time.get_or_insert_with(|| clock.now());
    Ok(Some(event))
}

/// Splits a byte stream into lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Skipping the rest of an overlong line
    discarding: bool,
}

impl LineBuffer {
    /// Appends `data`, calling `on_line` for every completed line.
    pub fn feed(&mut self, mut data: &[u8], mut on_line: impl FnMut(&[u8])) {
        while let Some(end) = data.iter().position(|b| *b == b'\n') {
            let (line, rest) = (&data[..end], &data[end + 1..]);
            if self.discarding {
                self.discarding = false;
            } else if self.pending.is_empty() {
                on_line(line);
            } else {
                self.pending.extend_from_slice(line);
                on_line(&self.pending);
                self.pending.clear();
            }
            data = rest;
        }

        if self.discarding {
            return;
        }
        if self.pending.len() + data.len() > MAX_LINE {
            debug!(limit = MAX_LINE, "discarding overlong line");
            self.pending.clear();
            self.discarding = true;
            return;
        }
        self.pending.extend_from_slice(data);
    }
}

/// Entry point shared by all listeners: decodes and pushes events.
#[derive(Clone)]
pub struct Ingest {
    root: Arc<Stream>,
    stats: Arc<IngestStats>,
}

impl Ingest {
    /// Creates an ingest feeding `root`.
    pub fn new(root: Arc<Stream>, stats: Arc<IngestStats>) -> Self {
        Self { root, stats }
    }

    /// Decodes `bytes` and pushes the event through the root stream.
    pub fn push_bytes(&self, bytes: &[u8]) {
        match decode(bytes, &SystemClock) {
            Ok(Some(event)) => {
                self.stats.received.fetch_add(1, Ordering::Relaxed);
                self.root.push(event);
            }
            Ok(None) => {}
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "dropping undecodable event");
            }
        }
    }
}

/// Accepts TCP connections and hands each to the next worker loop.
pub fn listen_tcp(
    event_loop: &mut EventLoop,
    listener: TcpListener,
    workers: Vec<LoopHandle>,
    ingest: Ingest,
) -> Result<WatchId, ReactorError> {
    let mut next = 0usize;
    event_loop.watch(listener, Mode::Read, move |event_loop, ready| {
        if ready.error() {
            warn!("listener reported an error");
        }
        loop {
            match ready.source.accept() {
                Ok((stream, peer)) => {
                    ingest.stats.connections.fetch_add(1, Ordering::Relaxed);
                    let ingest = ingest.clone();
                    match workers.get(next % workers.len().max(1)) {
                        Some(worker) => {
                            next = next.wrapping_add(1);
                            debug!(%peer, loop_id = worker.id(), "accepted connection");
                            worker.execute(move |event_loop| {
                                if let Err(e) = serve_tcp(event_loop, stream, ingest) {
                                    warn!(%peer, error = %e, "failed to watch connection");
                                }
                            });
                        }
                        None => {
                            if let Err(e) = serve_tcp(event_loop, stream, ingest) {
                                warn!(%peer, error = %e, "failed to watch connection");
                            }
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    })
}

/// Reads newline-delimited events from one connection until it closes.
pub fn serve_tcp(
    event_loop: &mut EventLoop,
    stream: TcpStream,
    ingest: Ingest,
) -> Result<WatchId, ReactorError> {
    let mut lines = LineBuffer::default();
    let mut buf = vec![0u8; READ_CHUNK];

    event_loop.watch(stream, Mode::Read, move |event_loop, ready| {
        if ready.error() {
            let _ = event_loop.remove_watch(ready.id);
            return;
        }
        loop {
            match ready.source.read(&mut buf) {
                Ok(0) => {
                    trace!(watch = ?ready.id, "connection closed");
                    let _ = event_loop.remove_watch(ready.id);
                    return;
                }
                Ok(n) => lines.feed(&buf[..n], |line| ingest.push_bytes(line)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(error = %e, "connection read failed");
                    let _ = event_loop.remove_watch(ready.id);
                    return;
                }
            }
        }
    })
}

/// Reads one event per datagram.
pub fn listen_udp(
    event_loop: &mut EventLoop,
    socket: UdpSocket,
    ingest: Ingest,
) -> Result<WatchId, ReactorError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    event_loop.watch(socket, Mode::Read, move |_, ready| loop {
        match ready.source.recv_from(&mut buf) {
            Ok((n, _)) => ingest.push_bytes(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(error = %e, "udp receive failed");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use parking_lot::Mutex;
    use vigil_core::reactor::ReactorConfig;
    use vigil_core::stream::tap;
    use vigil_core::time::ManualClock;

    fn collect(data: &[&[u8]]) -> Vec<String> {
        let mut buffer = LineBuffer::default();
        let mut lines = Vec::new();
        for chunk in data {
            buffer.feed(chunk, |line| lines.push(String::from_utf8_lossy(line).into_owned()));
        }
        lines
    }

    #[test]
    fn test_lines_across_chunks() {
        let lines = collect(&[b"{\"host\":", b"\"a\"}\n{\"host\"", b":\"b\"}\n\n{"]);
        assert_eq!(lines, vec!["{\"host\":\"a\"}", "{\"host\":\"b\"}", ""]);
    }

    #[test]
    fn test_overlong_line_discarded() {
        let long = vec![b'x'; MAX_LINE + 1];
        let lines = collect(&[&long, b"tail\nnext\n"]);
        assert_eq!(lines, vec!["next"]);
    }

    #[test]
    fn test_decode() {
        let clock = ManualClock::new(1_000);

        let event = decode(br#" {"host":"web-1","service":"cpu","metric":0.5} "#, &clock)
            .unwrap()
            .unwrap();
        assert_eq!(event.host, "web-1");
        assert_eq!(event.metric, Some(0.5));
        assert_eq!(event.time, Some(1_000));

        let timed = decode(br#"{"host":"a","time":5}"#, &clock).unwrap().unwrap();
        assert_eq!(timed.time, Some(5));

        assert!(decode(b"  \r", &clock).unwrap().is_none());
        assert!(decode(b"{not json", &clock).is_err());
    }

    #[test]
    fn test_push_counts() {
        let stats = Arc::new(IngestStats::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let root = Arc::new(tap(move |e: &Event| sink.lock().push(e.host.clone())));
        let ingest = Ingest::new(root, Arc::clone(&stats));

        ingest.push_bytes(br#"{"host":"a"}"#);
        ingest.push_bytes(b"garbage");
        ingest.push_bytes(b"");

        assert_eq!(*seen.lock(), vec!["a"]);
        assert_eq!(stats.snapshot(), (1, 1, 0));
    }

    #[test]
    fn test_reset_connection_is_torn_down() {
        let stats = Arc::new(IngestStats::default());
        let root = Arc::new(tap(|_: &Event| {}));
        let ingest = Ingest::new(root, Arc::clone(&stats));

        // Closing with unread data resets the client's connection.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.write_all(b"unread").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        drop(server);
        client.set_nonblocking(true).unwrap();

        let mut event_loop = EventLoop::new(0, &ReactorConfig::default()).unwrap();
        serve_tcp(&mut event_loop, TcpStream::from_std(client), ingest).unwrap();
        assert_eq!(event_loop.watch_count(), 1);

        for _ in 0..50 {
            event_loop.turn(Some(Duration::from_millis(20))).unwrap();
            if event_loop.watch_count() == 0 {
                break;
            }
        }

        assert_eq!(event_loop.watch_count(), 0);
        assert_eq!(stats.snapshot(), (0, 0, 0));
    }

    #[test]
    fn test_tcp_and_udp_on_one_loop() {
        let stats = Arc::new(IngestStats::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let root = Arc::new(tap(move |e: &Event| sink.lock().push(e.host.clone())));
        let ingest = Ingest::new(root, Arc::clone(&stats));

        let mut event_loop = EventLoop::new(0, &ReactorConfig::default()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let tcp_addr = listener.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let udp_addr = socket.local_addr().unwrap();

        // No workers: connections are served by the accepting loop.
        listen_tcp(&mut event_loop, listener, Vec::new(), ingest.clone()).unwrap();
        listen_udp(&mut event_loop, socket, ingest).unwrap();

        let mut client = std::net::TcpStream::connect(tcp_addr).unwrap();
        client.write_all(b"{\"host\":\"tcp-1\"}\n{\"host\":\"tcp-2\"}\n").unwrap();
        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(br#"{"host":"udp-1"}"#, udp_addr).unwrap();

        for _ in 0..50 {
            event_loop.turn(Some(Duration::from_millis(20))).unwrap();
            if seen.lock().len() == 3 {
                break;
            }
        }

        let mut hosts = seen.lock().clone();
        hosts.sort();
        assert_eq!(hosts, vec!["tcp-1", "tcp-2", "udp-1"]);
        assert_eq!(stats.snapshot(), (3, 0, 1));
    }
}
