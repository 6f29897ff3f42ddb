//! Relay session for one client connection
//!
//! A session owns the client socket and the upstream socket it opens on
//! `start`. Two pump tasks move bytes, one per direction: read up to
//! [`MAX_DATA_LENGTH`] bytes, let the decoder observe them, forward them
//! unchanged, repeat. Both pumps share one [`Decoder`] behind a mutex that is
//! held for a single decode call and never across an await. When either
//! direction fails or reaches EOF, the session's teardown token is cancelled,
//! the other pump stops, and both sockets close as their halves are dropped.

use crate::audit::AuditSink;
use crate::error::{ProxyError, Result};
use crate::hexdump::{hexdump, DEFAULT_BYTES_PER_LINE};
use crate::protocol::{DecodeEvent, Decoder, Direction};
use log::{debug, error, info, log_enabled, trace, Level};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Read buffer size per direction
pub const MAX_DATA_LENGTH: usize = 8192;

/// Byte counts for a finished session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes forwarded from the client to the upstream server
    pub client_to_server: u64,

    /// Bytes forwarded from the upstream server to the client
    pub server_to_client: u64,
}

/// A relayed client connection
pub struct Session {
    /// Accepted client socket
    client: TcpStream,

    /// Client address
    peer: SocketAddr,

    /// Audit trail for decoded events
    sink: Arc<dyn AuditSink>,

    /// Dump relayed chunks at trace level
    hexdump: bool,
}

impl Session {
    /// Create a session for an accepted client connection
    pub fn new(client: TcpStream, peer: SocketAddr, sink: Arc<dyn AuditSink>, hexdump: bool) -> Self {
        Self {
            client,
            peer,
            sink,
            hexdump,
        }
    }

    /// Client address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Connect to the upstream server and relay until either side closes.
    ///
    /// A failed connect closes the client connection and is returned as
    /// [`ProxyError::Connection`].
    pub async fn start(self, host: &str, port: u16) -> Result<SessionStats> {
        let upstream = match TcpStream::connect((host, port)).await {
            Ok(stream) => stream,
            Err(e) => {
                return Err(ProxyError::Connection(format!(
                    "Failed to connect to {}:{} for client {}: {}",
                    host, port, self.peer, e
                )));
            }
        };

        info!("Client connected from {}, relaying to {}:{}", self.peer, host, port);
        self.relay(upstream).await
    }

    /// Relay between the client and an already connected upstream socket
    pub async fn relay(self, upstream: TcpStream) -> Result<SessionStats> {
        self.client.set_nodelay(true)?;
        upstream.set_nodelay(true)?;

        let peer = self.peer;
        let (client_read, client_write) = self.client.into_split();
        let (server_read, server_write) = upstream.into_split();

        let decoder = Arc::new(Mutex::new(Decoder::new()));
        let teardown = CancellationToken::new();

        let to_server = Pump {
            direction: Direction::ClientToServer,
            peer,
            decoder: decoder.clone(),
            sink: self.sink.clone(),
            hexdump: self.hexdump,
            teardown: teardown.clone(),
        };
        let to_client = Pump {
            direction: Direction::ServerToClient,
            peer,
            decoder,
            sink: self.sink,
            hexdump: self.hexdump,
            teardown,
        };

        let to_server = tokio::spawn(to_server.run(client_read, server_write));
        let to_client = tokio::spawn(to_client.run(server_read, client_write));
        let (to_server, to_client) = tokio::join!(to_server, to_client);

        let stats = SessionStats {
            client_to_server: to_server.unwrap_or_else(|e| {
                error!("Client pump for {} panicked: {}", peer, e);
                0
            }),
            server_to_client: to_client.unwrap_or_else(|e| {
                error!("Server pump for {} panicked: {}", peer, e);
                0
            }),
        };

        debug!("Session for {} torn down", peer);
        Ok(stats)
    }
}

/// One direction of a session
struct Pump {
    direction: Direction,
    peer: SocketAddr,
    decoder: Arc<Mutex<Decoder>>,
    sink: Arc<dyn AuditSink>,
    hexdump: bool,
    teardown: CancellationToken,
}

impl Pump {
    /// Pump until this direction ends or the other one tears the session down.
    /// Returns the number of bytes forwarded.
    async fn run(self, mut reader: OwnedReadHalf, mut writer: OwnedWriteHalf) -> u64 {
        let mut buf = vec![0u8; MAX_DATA_LENGTH];
        let mut forwarded = 0u64;

        let result = tokio::select! {
            _ = self.teardown.cancelled() => Ok(()),
            result = self.forward(&mut reader, &mut writer, &mut buf, &mut forwarded) => result,
        };

        match result {
            Ok(()) => debug!("{} {} closed", self.peer, self.direction),
            Err(e) => debug!("{} {} failed: {}", self.peer, self.direction, e),
        }

        self.teardown.cancel();
        forwarded
    }

    async fn forward(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        buf: &mut [u8],
        forwarded: &mut u64,
    ) -> io::Result<()> {
        loop {
            let n = reader.read(buf).await?;
            if n == 0 {
                return Ok(());
            }

            let chunk = &buf[..n];
            self.observe(chunk);

            writer.write_all(chunk).await?;
            *forwarded += n as u64;
        }
    }

    /// Decode a copy of the chunk and record the resulting events
    fn observe(&self, chunk: &[u8]) {
        if self.hexdump && log_enabled!(Level::Trace) {
            trace!("{} {} ({} bytes)\n{}", self.peer, self.direction, chunk.len(), hexdump(chunk, DEFAULT_BYTES_PER_LINE));
        }

        let events = {
            let mut decoder = match self.decoder.lock() {
                Ok(decoder) => decoder,
                Err(poisoned) => poisoned.into_inner(),
            };
            decoder.decode(self.direction, chunk)
        };

        for event in events {
            if let DecodeEvent::Diagnostic(err) = &event {
                debug!("{} {}: {}", self.peer, self.direction, err);
            }
            self.sink.append(&event.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemorySink;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Client socket, upstream socket, and the running session between them
    async fn relay_pair(
        sink: Arc<MemorySink>,
    ) -> (TcpStream, TcpStream, JoinHandle<Result<SessionStats>>) {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream_listener.local_addr().unwrap();
        let front = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let client = TcpStream::connect(front.local_addr().unwrap()).await.unwrap();
        let (accepted, peer) = front.accept().await.unwrap();

        let session = Session::new(accepted, peer, sink, true);
        let handle = tokio::spawn(async move {
            session.start("127.0.0.1", upstream_addr.port()).await
        });
        let (server, _) = upstream_listener.accept().await.unwrap();

        (client, server, handle)
    }

    async fn send(from: &mut TcpStream, to: &mut TcpStream, bytes: &[u8]) {
        from.write_all(bytes).await.unwrap();
        let mut received = vec![0u8; bytes.len()];
        to.read_exact(&mut received).await.unwrap();
        assert_eq!(received, bytes);
    }

    fn frame(sequence_id: u8, payload: &[u8]) -> Vec<u8> {
        let len = payload.len();
        let mut bytes = vec![len as u8, (len >> 8) as u8, (len >> 16) as u8, sequence_id];
        bytes.extend_from_slice(payload);
        bytes
    }

    async fn handshake(client: &mut TcpStream, server: &mut TcpStream) {
        send(server, client, &frame(0, b"\x0a8.0.36\x00greeting")).await;
        send(client, server, &frame(1, b"login-request")).await;
        send(server, client, &frame(2, &[0x00, 0x00, 0x00, 0x02, 0x00])).await;
    }

    #[tokio::test]
    async fn test_query_is_forwarded_and_audited() {
        let sink = Arc::new(MemorySink::new());
        let (mut client, mut server, _session) = relay_pair(sink.clone()).await;

        handshake(&mut client, &mut server).await;
        assert!(sink.lines().is_empty());

        let query = [0x09, 0x00, 0x00, 0x00, 0x03, b'S', b'E', b'L', b'E', b'C', b'T', b' ', b'1'];
        send(&mut client, &mut server, &query).await;

        assert_eq!(sink.lines(), vec!["Execute query: SELECT 1".to_string()]);
    }

    #[tokio::test]
    async fn test_prepared_statement_lifecycle_over_relay() {
        let sink = Arc::new(MemorySink::new());
        let (mut client, mut server, _session) = relay_pair(sink.clone()).await;
        handshake(&mut client, &mut server).await;

        send(&mut client, &mut server, &frame(0, b"\x16SELECT ?")).await;
        send(
            &mut server,
            &mut client,
            &frame(1, &[0x00, 0x05, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]),
        )
        .await;
        send(
            &mut client,
            &mut server,
            &frame(0, &[0x17, 0x05, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01]),
        )
        .await;
        send(&mut client, &mut server, &frame(0, &[0x19, 0x05, 0x00, 0x00, 0x00])).await;

        assert_eq!(
            sink.lines(),
            vec![
                "Prepare statement: SELECT ?".to_string(),
                "Statement prepared: id=5 params=1".to_string(),
                "Execute prepared statement: SELECT ?".to_string(),
                "Deallocate prepared statement: SELECT ?".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_is_still_forwarded() {
        let sink = Arc::new(MemorySink::new());
        let (mut client, mut server, _session) = relay_pair(sink.clone()).await;
        handshake(&mut client, &mut server).await;

        let bogus = [0xff, 0xff, 0xff, 0x00, 0x03, b'x'];
        send(&mut client, &mut server, &bogus).await;
        send(&mut client, &mut server, &frame(0, b"\x03SELECT 2")).await;

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Decode error: truncated frame"));
        assert_eq!(lines[1], "Execute query: SELECT 2");
    }

    #[tokio::test]
    async fn test_client_close_tears_down_both_directions() {
        let sink = Arc::new(MemorySink::new());
        let (mut client, mut server, session) = relay_pair(sink).await;

        send(&mut client, &mut server, b"hello").await;
        send(&mut server, &mut client, b"world!").await;
        drop(client);

        let mut rest = Vec::new();
        let n = server.read_to_end(&mut rest).await.unwrap();
        assert_eq!(n, 0);

        let stats = session.await.unwrap().unwrap();
        assert_eq!(
            stats,
            SessionStats {
                client_to_server: 5,
                server_to_client: 6
            }
        );
    }

    #[tokio::test]
    async fn test_upstream_close_tears_down_client() {
        let sink = Arc::new(MemorySink::new());
        let (mut client, server, session) = relay_pair(sink).await;
        drop(server);

        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
        assert!(session.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_upstream_connect_failure() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(front.local_addr().unwrap()).await.unwrap();
        let (accepted, peer) = front.accept().await.unwrap();

        let session = Session::new(accepted, peer, Arc::new(MemorySink::new()), false);
        assert_eq!(session.peer(), peer);

        let result = session.start("127.0.0.1", closed_port).await;
        assert!(matches!(result, Err(ProxyError::Connection(_))));

        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
    }
}
