//! TCP data channel: u32 LE length prefix per message, plus a session handshake.

use std::io::ErrorKind;

use sendlink_core::wire::{LEN_SIZE, MAX_FRAME_LEN};
use sendlink_core::PROTOCOL_VERSION;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::channel::{ChannelError, DataChannel};

/// Session ids longer than this are refused in the handshake.
pub const MAX_SESSION_ID_LEN: usize = 256;

/// A [`DataChannel`] over one TCP connection.
#[derive(Debug)]
pub struct TcpChannel {
    reader: OwnedReadHalf,
    writer: Option<OwnedWriteHalf>,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer: Some(writer),
        }
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

impl DataChannel for TcpChannel {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), ChannelError> {
        if message.len() > MAX_FRAME_LEN as usize + LEN_SIZE {
            return Err(ChannelError::TooLarge(message.len()));
        }
        let writer = self.writer.as_mut().ok_or(ChannelError::Closed)?;
        let len = message.len() as u32;
        let result = async {
            writer.write_all(&len.to_le_bytes()).await?;
            writer.write_all(&message).await?;
            writer.flush().await
        }
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => {
                self.writer = None;
                Err(ChannelError::Closed)
            }
            Err(e) => Err(ChannelError::Io(e)),
        }
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut len_buf = [0u8; LEN_SIZE];
        match self.reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if is_disconnect(&e) => return Ok(None),
            Err(e) => return Err(ChannelError::Io(e)),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN as usize + LEN_SIZE {
            return Err(ChannelError::TooLarge(len));
        }
        let mut message = vec![0u8; len];
        match self.reader.read_exact(&mut message).await {
            Ok(_) => Ok(Some(message)),
            // Peer vanished mid-message: report as closed so the engine sees a truncated stream.
            Err(e) if is_disconnect(&e) => Ok(None),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }

    fn close(&mut self) {
        // Dropping the write half shuts down our sending direction.
        self.writer = None;
    }

    fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

/// Handshake bytes: version (1) + session id length (2, LE) + session id.
fn handshake_bytes(session_id: &str) -> Result<Vec<u8>, HandshakeError> {
    let id = session_id.as_bytes();
    if id.is_empty() || id.len() > MAX_SESSION_ID_LEN {
        return Err(HandshakeError::InvalidSessionId);
    }
    let mut out = Vec::with_capacity(3 + id.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&(id.len() as u16).to_le_bytes());
    out.extend_from_slice(id);
    Ok(out)
}

fn parse_handshake(bytes: &[u8]) -> Result<String, HandshakeError> {
    if bytes.len() < 3 {
        return Err(HandshakeError::Malformed);
    }
    if bytes[0] != PROTOCOL_VERSION {
        return Err(HandshakeError::UnsupportedVersion(bytes[0]));
    }
    let len = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
    if len == 0 || len > MAX_SESSION_ID_LEN || bytes.len() != 3 + len {
        return Err(HandshakeError::Malformed);
    }
    String::from_utf8(bytes[3..].to_vec()).map_err(|_| HandshakeError::Malformed)
}

/// Accepting side: read the peer's hello and check it names our session.
pub async fn handshake_accept(
    channel: &mut TcpChannel,
    session_id: &str,
) -> Result<(), HandshakeError> {
    let hello = channel.recv().await?.ok_or(HandshakeError::Channel(ChannelError::Closed))?;
    let theirs = parse_handshake(&hello)?;
    if theirs != session_id {
        return Err(HandshakeError::SessionMismatch);
    }
    channel.send(handshake_bytes(session_id)?).await?;
    Ok(())
}

/// Connecting side: send hello for `session_id` and wait for the echo.
pub async fn handshake_connect(
    channel: &mut TcpChannel,
    session_id: &str,
) -> Result<(), HandshakeError> {
    channel.send(handshake_bytes(session_id)?).await?;
    let reply = channel.recv().await?.ok_or(HandshakeError::Channel(ChannelError::Closed))?;
    if parse_handshake(&reply)? != session_id {
        return Err(HandshakeError::SessionMismatch);
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("malformed handshake")]
    Malformed,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid session id")]
    InvalidSessionId,
    #[error("peer handshake names a different session")]
    SessionMismatch,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
