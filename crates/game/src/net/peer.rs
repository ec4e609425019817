//! A reliable-ordered stream peer.
//!
//! Wraps a TCP stream with the split ownership the engine needs: the I/O
//! task reads, the simulation task writes, and neither can interleave the
//! other's frames. A peer that hits a hard socket error latches into the
//! disconnected state; every later call reports it without touching the
//! socket again.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::stats;

/// How long a non-waiting receive probes the socket before reporting that
/// no data is waiting.
const POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Outcome of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    Disconnected,
}

/// Outcome of a receive.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveResult {
    Data(Vec<u8>),
    /// Non-waiting receive found nothing buffered.
    NoWaitingData,
    Disconnected,
}

#[derive(Debug)]
pub struct Peer {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    connected: AtomicBool,
    last_receive: Mutex<Instant>,
    receive_timeout: Duration,
}

impl Peer {
    /// Initiates a connection that the other side can accept.
    pub fn connect(
        address: SocketAddr,
        connect_timeout: Duration,
        receive_timeout: Duration,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect_timeout(&address, connect_timeout)?;
        Self::from_stream(stream, receive_timeout)
    }

    /// Wraps an already-accepted stream (the server side).
    pub fn from_stream(stream: TcpStream, receive_timeout: Duration) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(stream),
            connected: AtomicBool::new(true),
            last_receive: Mutex::new(Instant::now()),
            receive_timeout,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Force the peer into the disconnected state. Used when a protocol
    /// violation makes the connection unusable even though the socket is
    /// still up.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Writes one complete frame to the stream.
    ///
    /// The writer lock guarantees frames from different callers never
    /// interleave mid-frame.
    pub fn send(&self, bytes: &[u8]) -> SendResult {
        if !self.is_connected() {
            return SendResult::Disconnected;
        }

        let mut writer = self.writer.lock().unwrap();
        match writer.write_all(bytes) {
            Ok(()) => {
                stats::record_bytes_sent(bytes.len());
                SendResult::Sent
            }
            Err(error) => {
                log::debug!("peer send failed: {error}");
                self.mark_disconnected();
                SendResult::Disconnected
            }
        }
    }

    /// Reads exactly `len` bytes from the stream.
    ///
    /// With `wait` unset, probes briefly and returns `NoWaitingData` when
    /// nothing is buffered. Once any data is waiting (or with `wait` set),
    /// blocks until the full `len` bytes arrive, bounded by the receive
    /// timeout; a stream that stalls mid-frame is treated as disconnected.
    pub fn receive_bytes(&self, len: usize, wait: bool) -> ReceiveResult {
        if !self.is_connected() {
            return ReceiveResult::Disconnected;
        }

        let mut reader = self.reader.lock().unwrap();

        if !wait {
            let _ = reader.set_read_timeout(Some(POLL_TIMEOUT));
            let mut probe = [0u8; 1];
            match reader.peek(&mut probe) {
                // An orderly shutdown reads as zero bytes available forever.
                Ok(0) => {
                    self.mark_disconnected();
                    return ReceiveResult::Disconnected;
                }
                Ok(_) => {}
                Err(error) if is_timeout(&error) => return ReceiveResult::NoWaitingData,
                Err(error) => {
                    log::debug!("peer probe failed: {error}");
                    self.mark_disconnected();
                    return ReceiveResult::Disconnected;
                }
            }
        }

        let _ = reader.set_read_timeout(Some(self.receive_timeout));
        let mut buffer = vec![0u8; len];
        match reader.read_exact(&mut buffer) {
            Ok(()) => {
                stats::record_bytes_received(len);
                *self.last_receive.lock().unwrap() = Instant::now();
                ReceiveResult::Data(buffer)
            }
            Err(error) => {
                log::debug!("peer receive failed: {error}");
                self.mark_disconnected();
                ReceiveResult::Disconnected
            }
        }
    }

    /// True when nothing has arrived for longer than the receive timeout.
    /// The owner decides whether that means the peer is gone.
    pub fn timed_out(&self) -> bool {
        self.last_receive.lock().unwrap().elapsed() > self.receive_timeout
    }
}

fn is_timeout(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn peer_pair() -> (Peer, Peer) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let client_stream = TcpStream::connect(address).unwrap();
        let (server_stream, _) = listener.accept().unwrap();

        let timeout = Duration::from_millis(500);
        (
            Peer::from_stream(client_stream, timeout).unwrap(),
            Peer::from_stream(server_stream, timeout).unwrap(),
        )
    }

    #[test]
    fn round_trip_exact_bytes() {
        let (client, server) = peer_pair();

        assert_eq!(client.send(&[1, 2, 3, 4]), SendResult::Sent);
        assert_eq!(client.send(&[5, 6]), SendResult::Sent);

        match server.receive_bytes(4, true) {
            ReceiveResult::Data(bytes) => assert_eq!(bytes, vec![1, 2, 3, 4]),
            other => panic!("expected data, got {other:?}"),
        }
        match server.receive_bytes(2, true) {
            ReceiveResult::Data(bytes) => assert_eq!(bytes, vec![5, 6]),
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[test]
    fn nonblocking_receive_reports_no_data() {
        let (_client, server) = peer_pair();
        assert_eq!(server.receive_bytes(1, false), ReceiveResult::NoWaitingData);
    }

    #[test]
    fn closed_stream_reports_disconnected() {
        let (client, server) = peer_pair();
        drop(client);

        // The close may surface on the probe or on the read.
        loop {
            match server.receive_bytes(1, false) {
                ReceiveResult::Disconnected => break,
                ReceiveResult::NoWaitingData => continue,
                other => panic!("expected disconnect, got {other:?}"),
            }
        }
        assert!(!server.is_connected());
    }

    #[test]
    fn sends_after_disconnect_are_noops() {
        let (client, _server) = peer_pair();
        client.mark_disconnected();
        assert_eq!(client.send(&[1]), SendResult::Disconnected);
        assert_eq!(client.receive_bytes(1, false), ReceiveResult::Disconnected);
    }

    #[test]
    fn receive_timer_trips_after_silence() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let client_stream = TcpStream::connect(address).unwrap();
        let peer = Peer::from_stream(client_stream, Duration::from_millis(20)).unwrap();

        assert!(!peer.timed_out());
        std::thread::sleep(Duration::from_millis(40));
        assert!(peer.timed_out());
    }
}
