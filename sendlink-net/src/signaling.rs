//! Signaling collaborator: turns a session id into a connected data channel.
//!
//! Only the session id (and transport addresses) pass through signaling; keys and
//! file content never do.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use sendlink_core::wire::{FrameDecodeError, FrameEncodeError};

use crate::channel::{ChannelError, DataChannel, MemoryChannel, DEFAULT_MEMORY_CAPACITY};
use crate::tcp::HandshakeError;

/// Rendezvous/negotiation backend used by [`SignalingSession`](crate::session::SignalingSession).
#[allow(async_fn_in_trait)]
pub trait Signaling {
    type Channel: DataChannel;

    /// Advertise `session_id` and wait for a peer to connect to it.
    async fn accept(&mut self, session_id: &str) -> Result<Self::Channel, SignalingError>;

    /// Connect to the peer waiting on `session_id`.
    async fn connect(&mut self, session_id: &str) -> Result<Self::Channel, SignalingError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("no peer is waiting on this session")]
    UnknownSession,
    #[error("session is already being offered")]
    DuplicateSession,
    #[error("rendezvous went away before a peer connected")]
    RendezvousClosed,
    #[error("unexpected rendezvous reply: {0}")]
    UnexpectedReply(&'static str),
    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("encode signal: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error("decode signal: {0}")]
    Decode(#[from] FrameDecodeError),
    #[error("no request within {0:?}")]
    Timeout(Duration),
    #[error("signaling i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// In-process rendezvous. Clones share one registry, so an initiator and a
/// responder holding clones can find each other.
#[derive(Clone, Default)]
pub struct MemoryRendezvous {
    waiting: Arc<Mutex<HashMap<String, oneshot::Sender<MemoryChannel>>>>,
    capacity: usize,
}

impl MemoryRendezvous {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Channels created by this rendezvous buffer up to `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            waiting: Arc::default(),
            capacity,
        }
    }

    /// Number of sessions currently offered.
    pub async fn pending(&self) -> usize {
        let mut waiting = self.waiting.lock().await;
        waiting.retain(|_, tx| !tx.is_closed());
        waiting.len()
    }
}

impl Signaling for MemoryRendezvous {
    type Channel = MemoryChannel;

    async fn accept(&mut self, session_id: &str) -> Result<MemoryChannel, SignalingError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut waiting = self.waiting.lock().await;
            if waiting.get(session_id).is_some_and(|t| !t.is_closed()) {
                return Err(SignalingError::DuplicateSession);
            }
            waiting.insert(session_id.to_string(), tx);
        }
        tracing::debug!(session = %session_id, "offered in-memory session");
        rx.await.map_err(|_| SignalingError::RendezvousClosed)
    }

    async fn connect(&mut self, session_id: &str) -> Result<MemoryChannel, SignalingError> {
        let tx = self
            .waiting
            .lock()
            .await
            .remove(session_id)
            .ok_or(SignalingError::UnknownSession)?;
        let (ours, theirs) = MemoryChannel::pair(self.capacity);
        // A dropped receiver means the offering side gave up (timeout or close).
        tx.send(theirs).map_err(|_| SignalingError::UnknownSession)?;
        tracing::debug!(session = %session_id, "connected in-memory session");
        Ok(ours)
    }
}
