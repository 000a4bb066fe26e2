//! Connection handling for RCON sessions
//!
//! Owns the byte stream and the receive buffer:
//! - Frame encoding on the way out
//! - Incremental frame decoding on the way in
//! - Connection statistics

use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::{encode, CodecError, Frame, FrameBuffer};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed with {0} bytes of a partial frame buffered")]
    Closed(usize),

    #[error("Connection timeout")]
    Timeout,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a session's transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket is open
    Disconnected,
    /// TCP connect in progress
    Connecting,
    /// Socket open, frames flowing
    Connected,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Frames sent
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// A framed byte stream to an RCON server
pub struct Connection<S = TcpStream> {
    /// Human-readable peer name for logs
    peer: String,
    /// The underlying stream
    stream: S,
    /// Bytes received but not yet decoded into frames
    read_buf: FrameBuffer,
    /// Write buffer
    write_buf: BytesMut,
    /// Statistics
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub fn new(stream: S, peer: impl Into<String>, max_frame_size: usize) -> Self {
        Self {
            peer: peer.into(),
            stream,
            read_buf: FrameBuffer::with_max_frame_size(max_frame_size),
            write_buf: BytesMut::with_capacity(4096),
            stats: ConnectionStats::default(),
        }
    }

    /// Peer name used in logs
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Write a batch of frames with a single write
    pub async fn send_frames(&mut self, frames: &[Frame]) -> ConnectionResult<()> {
        self.write_buf.clear();
        for frame in frames {
            encode(frame.id, frame.kind, &frame.body, &mut self.write_buf);
        }

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.frames_sent += frames.len() as u64;
        self.stats.bytes_sent += self.write_buf.len() as u64;

        Ok(())
    }

    /// Write a single frame
    pub async fn send(&mut self, frame: &Frame) -> ConnectionResult<()> {
        self.send_frames(std::slice::from_ref(frame)).await
    }

    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` on a clean close between frames. Cancel safe: bytes
    /// already read stay in the receive buffer.
    pub async fn recv(&mut self) -> ConnectionResult<Option<Frame>> {
        loop {
            if let Some(frame) = self.read_buf.next_frame()? {
                self.stats.frames_received += 1;
                return Ok(Some(frame));
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None); // Clean close
                } else {
                    return Err(ConnectionError::Closed(self.read_buf.len()));
                }
            }

            self.read_buf.push(&buf[..n]);
            self.stats.bytes_received += n as u64;
        }
    }

    /// Shut down the write side and drop any partially received data
    pub async fn close(&mut self) -> ConnectionResult<()> {
        self.read_buf.clear();
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Open a TCP connection with a timeout
pub async fn connect_tcp(
    addr: SocketAddr,
    timeout: Duration,
    max_frame_size: usize,
) -> ConnectionResult<Connection<TcpStream>> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ConnectionError::Io(e)),
        Err(_) => return Err(ConnectionError::Timeout),
    };
    stream.set_nodelay(true)?;

    Ok(Connection::new(stream, addr.to_string(), max_frame_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, PacketType, DEFAULT_MAX_FRAME_SIZE};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_recv_across_fragmented_reads() {
        let reply = encode_frame(&Frame::new(5, PacketType::RESPONSE_VALUE, "hostname: foo\n"));
        let sentinel = encode_frame(&Frame::sentinel(6));

        let mock = tokio_test::io::Builder::new()
            .read(&reply[..3])
            .read(&reply[3..10])
            .read(&reply[10..])
            .read(&sentinel)
            .build();
        let mut conn = Connection::new(mock, "mock", DEFAULT_MAX_FRAME_SIZE);

        let first = conn.recv().await.unwrap().unwrap();
        assert_eq!(first.id, 5);
        assert_eq!(first.body_text(), "hostname: foo\n");

        let second = conn.recv().await.unwrap().unwrap();
        assert_eq!(second, Frame::sentinel(6));

        assert!(conn.recv().await.unwrap().is_none());
        assert_eq!(conn.stats().frames_received, 2);
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_an_error() {
        let reply = encode_frame(&Frame::new(5, PacketType::RESPONSE_VALUE, "partial"));
        let mock = tokio_test::io::Builder::new().read(&reply[..8]).build();
        let mut conn = Connection::new(mock, "mock", DEFAULT_MAX_FRAME_SIZE);

        assert!(matches!(conn.recv().await, Err(ConnectionError::Closed(8))));
    }

    #[tokio::test]
    async fn test_malformed_size_is_a_protocol_error() {
        let mock = tokio_test::io::Builder::new()
            .read(&3i32.to_le_bytes())
            .build();
        let mut conn = Connection::new(mock, "mock", DEFAULT_MAX_FRAME_SIZE);

        assert!(matches!(
            conn.recv().await,
            Err(ConnectionError::Protocol(CodecError::SizeTooSmall(3)))
        ));
    }

    #[tokio::test]
    async fn test_send_frames_writes_one_batch() {
        let (client, mut server) = duplex(1024);
        let mut conn = Connection::new(client, "duplex", DEFAULT_MAX_FRAME_SIZE);

        let frames = [
            Frame::new(1, PacketType::EXEC_COMMAND, "status"),
            Frame::sentinel(2),
        ];
        conn.send_frames(&frames).await.unwrap();
        assert_eq!(conn.stats().frames_sent, 2);
        assert_eq!(conn.stats().bytes_sent, 20 + 14);

        let mut received = vec![0u8; 34];
        server.read_exact(&mut received).await.unwrap();

        let mut decoder = FrameBuffer::new();
        assert_eq!(decoder.push_and_drain(&received).unwrap(), frames.to_vec());
    }
}
