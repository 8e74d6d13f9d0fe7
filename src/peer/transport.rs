use super::config::ConnectionConfig;
use super::error::PeerError;
use super::handshake::Handshake;
use crate::constants::{HANDSHAKE_LEN, LENGTH_PREFIX_LEN, MIN_FRAME_LEN, READ_BUFFER_CAPACITY};
use bytes::{Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Byte-level I/O over a freshly established socket.
///
/// Used for the handshake, then split into a [`FrameReader`] and a
/// [`FrameWriter`] so reads and writes can run on separate tasks.
pub struct PeerTransport {
    stream: TcpStream,
    read_buf: BytesMut,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    max_frame_len: usize,
}

impl PeerTransport {
    pub fn new(stream: TcpStream, config: &ConnectionConfig) -> Result<Self, PeerError> {
        stream.set_nodelay(true).map_err(PeerError::StreamInit)?;
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            max_frame_len: config.max_frame_len,
        })
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        write_all(&mut self.stream, &handshake.encode(), self.write_timeout).await
    }

    /// Reads exactly one handshake worth of bytes.
    ///
    /// The bytes are returned unvalidated. Anything the peer sent after the
    /// handshake stays buffered for the [`FrameReader`].
    pub async fn receive_handshake(&mut self) -> Result<Bytes, PeerError> {
        while self.read_buf.len() < HANDSHAKE_LEN {
            let n = match read_more(&mut self.stream, &mut self.read_buf, self.read_timeout).await {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(PeerError::HandshakeTimeout)
                }
                Err(e) => return Err(PeerError::TransportRead(e)),
            };

            if n == 0 {
                return Err(PeerError::HandshakeTruncated(self.read_buf.len()));
            }
        }

        Ok(self.read_buf.split_to(HANDSHAKE_LEN).freeze())
    }

    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (
            FrameReader {
                read,
                read_buf: self.read_buf,
                read_timeout: self.read_timeout,
                max_frame_len: self.max_frame_len,
            },
            FrameWriter {
                write,
                write_timeout: self.write_timeout,
            },
        )
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }
}

/// Reassembles length-prefixed frames from the read half of a socket.
pub struct FrameReader {
    read: OwnedReadHalf,
    read_buf: BytesMut,
    read_timeout: Option<Duration>,
    max_frame_len: usize,
}

impl FrameReader {
    /// Reads the next complete frame, length prefix included.
    ///
    /// Returns `Ok(None)` when the peer closes the stream on a frame
    /// boundary. A close in the middle of a frame is
    /// [`PeerError::ConnectionClosed`].
    pub async fn receive_frame(&mut self) -> Result<Option<Bytes>, PeerError> {
        while self.read_buf.len() < LENGTH_PREFIX_LEN {
            if self.fill().await? == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(PeerError::ConnectionClosed);
            }
        }

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length < MIN_FRAME_LEN {
            return Err(PeerError::FrameTooShort(length));
        }

        if length > self.max_frame_len {
            return Err(PeerError::FrameTooLarge(length));
        }

        while self.read_buf.len() < length {
            if self.fill().await? == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }

        Ok(Some(self.read_buf.split_to(length).freeze()))
    }

    async fn fill(&mut self) -> Result<usize, PeerError> {
        read_more(&mut self.read, &mut self.read_buf, self.read_timeout)
            .await
            .map_err(PeerError::TransportRead)
    }
}

/// Writes whole frames to the write half of a socket.
pub struct FrameWriter {
    write: OwnedWriteHalf,
    write_timeout: Option<Duration>,
}

impl FrameWriter {
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<(), PeerError> {
        write_all(&mut self.write, frame, self.write_timeout).await
    }

    /// Shuts down the write direction, which the peer sees as EOF.
    ///
    /// A socket the peer already tore down counts as shut down.
    pub async fn shutdown(&mut self) -> Result<(), PeerError> {
        match self.write.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(PeerError::Close(format!("output shutdown: {}", e))),
        }
    }
}

async fn read_more<R>(reader: &mut R, buf: &mut BytesMut, limit: Option<Duration>) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match limit {
        Some(limit) => timeout(limit, reader.read_buf(buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?,
        None => reader.read_buf(buf).await,
    }
}

async fn write_all<W>(writer: &mut W, data: &[u8], limit: Option<Duration>) -> Result<(), PeerError>
where
    W: AsyncWrite + Unpin,
{
    let result = match limit {
        Some(limit) => timeout(limit, writer.write_all(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))
            .and_then(|r| r),
        None => writer.write_all(data).await,
    };
    result.map_err(PeerError::TransportWrite)
}
