//! Signaling session: owns one peer connection attempt and, on success, the data channel.
//!
//! The initiator calls [`SignalingSession::receive_connection`] on its own session id;
//! the link holder calls [`SignalingSession::connect_to`] with the id from the link.

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::channel::DataChannel;
use crate::signaling::{Signaling, SignalingError};

/// Default bound on negotiation. The initiator usually waits for a person to open a link.
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Initiator is waiting for a peer.
    Offering,
    /// Responder is negotiating with the remote session.
    Answering,
    Connected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Offering => "offering",
            SessionState::Answering => "answering",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Anything that went wrong while establishing the peer connection.
#[derive(Debug, thiserror::Error)]
pub enum PeerConnectionError {
    #[error("peer did not connect within {0:?}")]
    Timeout(Duration),
    #[error("session closed")]
    Closed,
    #[error("cannot negotiate from state {0}")]
    InvalidState(SessionState),
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] SignalingError),
}

/// Closes a session from another task, e.g. while it is negotiating.
#[derive(Debug, Clone)]
pub struct CloseHandle(CancellationToken);

impl CloseHandle {
    pub fn close(&self) {
        self.0.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }
}

pub struct SignalingSession<S: Signaling> {
    session_id: String,
    signaling: S,
    state: SessionState,
    role: Option<Role>,
    channel: Option<S::Channel>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl<S: Signaling> SignalingSession<S> {
    pub fn new(session_id: impl Into<String>, signaling: S) -> Self {
        Self {
            session_id: session_id.into(),
            signaling,
            state: SessionState::Idle,
            role: None,
            channel: None,
            cancel: CancellationToken::new(),
            timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle(self.cancel.clone())
    }

    /// The connected channel, if any.
    pub fn channel_mut(&mut self) -> Option<&mut S::Channel> {
        self.channel.as_mut()
    }

    /// Initiator: wait for a peer to connect to this session's own id.
    pub async fn receive_connection(&mut self) -> Result<&mut S::Channel, PeerConnectionError> {
        self.negotiate(Role::Initiator, None).await
    }

    /// Responder: connect to the initiator waiting on `remote_session_id`.
    pub async fn connect_to(
        &mut self,
        remote_session_id: &str,
    ) -> Result<&mut S::Channel, PeerConnectionError> {
        self.negotiate(Role::Responder, Some(remote_session_id)).await
    }

    async fn negotiate(
        &mut self,
        role: Role,
        remote: Option<&str>,
    ) -> Result<&mut S::Channel, PeerConnectionError> {
        if self.cancel.is_cancelled() {
            self.state = SessionState::Closed;
        }
        if self.state != SessionState::Idle {
            return Err(match self.state {
                SessionState::Closed => PeerConnectionError::Closed,
                other => PeerConnectionError::InvalidState(other),
            });
        }
        self.role = Some(role);
        self.state = match role {
            Role::Initiator => SessionState::Offering,
            Role::Responder => SessionState::Answering,
        };
        tracing::debug!(session = %self.session_id, ?role, "negotiating");

        let timeout = self.timeout;
        let cancel = self.cancel.clone();
        let signaling = &mut self.signaling;
        let own_id = self.session_id.as_str();
        let negotiation = async move {
            match remote {
                None => signaling.accept(own_id).await,
                Some(remote_id) => signaling.connect(remote_id).await,
            }
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PeerConnectionError::Closed),
            r = tokio::time::timeout(timeout, negotiation) => match r {
                Ok(Ok(channel)) => Ok(channel),
                Ok(Err(e)) => Err(PeerConnectionError::Negotiation(e)),
                Err(_) => Err(PeerConnectionError::Timeout(timeout)),
            },
        };

        match result {
            Ok(channel) => {
                self.state = SessionState::Connected;
                tracing::info!(session = %self.session_id, ?role, "peer connected");
                Ok(self.channel.insert(channel))
            }
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "peer connection failed");
                self.close();
                Err(e)
            }
        }
    }

    /// Cancel any negotiation and drop the channel. Safe from every state.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if self.state != SessionState::Closed {
            tracing::debug!(session = %self.session_id, from = %self.state, "session closed");
            self.state = SessionState::Closed;
        }
    }
}

impl<S: Signaling> Drop for SignalingSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelError, MemoryChannel};
    use crate::signaling::MemoryRendezvous;

    #[tokio::test]
    async fn initiator_and_responder_connect() {
        let rendezvous = MemoryRendezvous::new();
        let mut initiator = SignalingSession::new("s-1", rendezvous.clone());
        let mut responder = SignalingSession::new("s-2", rendezvous.clone());
        assert_eq!(initiator.state(), SessionState::Idle);

        let (a, b) = tokio::join!(initiator.receive_connection(), async {
            tokio::task::yield_now().await;
            responder.connect_to("s-1").await
        });
        let (a, b) = (a.unwrap(), b.unwrap());
        a.send(b"hi".to_vec()).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(b"hi".to_vec()));

        assert_eq!(initiator.state(), SessionState::Connected);
        assert_eq!(initiator.role(), Some(Role::Initiator));
        assert_eq!(responder.role(), Some(Role::Responder));
    }

    #[tokio::test]
    async fn unknown_session_is_peer_connection_error() {
        let mut s = SignalingSession::new("me", MemoryRendezvous::new());
        let err = s.connect_to("nobody").await.unwrap_err();
        assert!(matches!(
            err,
            PeerConnectionError::Negotiation(SignalingError::UnknownSession)
        ));
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn negotiation_times_out() {
        let mut s = SignalingSession::new("lonely", MemoryRendezvous::new())
            .with_timeout(Duration::from_secs(5));
        let err = s.receive_connection().await.unwrap_err();
        assert!(matches!(err, PeerConnectionError::Timeout(d) if d == Duration::from_secs(5)));
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn close_handle_cancels_negotiation() {
        let mut s = SignalingSession::new("waiting", MemoryRendezvous::new());
        let handle = s.close_handle();
        let (r, _) = tokio::join!(s.receive_connection(), async {
            tokio::task::yield_now().await;
            handle.close();
        });
        assert!(matches!(r, Err(PeerConnectionError::Closed)));
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let mut s = SignalingSession::new("x", MemoryRendezvous::new());
        s.close();
        s.close();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(matches!(
            s.receive_connection().await,
            Err(PeerConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_drops_connected_channel() {
        let rendezvous = MemoryRendezvous::new();
        let mut initiator = SignalingSession::new("s", rendezvous.clone());
        let mut responder = SignalingSession::new("r", rendezvous);
        let (a, b) = tokio::join!(initiator.receive_connection(), async {
            tokio::task::yield_now().await;
            responder.connect_to("s").await.map(|_| ())
        });
        a.unwrap();
        b.unwrap();

        initiator.close();
        assert!(initiator.channel_mut().is_none());
        let peer: &mut MemoryChannel = responder.channel_mut().unwrap();
        assert_eq!(peer.recv().await.unwrap(), None);
        assert!(matches!(peer.send(vec![1]).await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn second_negotiation_is_rejected() {
        let rendezvous = MemoryRendezvous::new();
        let mut initiator = SignalingSession::new("s", rendezvous.clone());
        let mut responder = SignalingSession::new("r", rendezvous);
        let (a, b) = tokio::join!(initiator.receive_connection(), async {
            tokio::task::yield_now().await;
            responder.connect_to("s").await.map(|_| ())
        });
        a.unwrap();
        b.unwrap();
        assert!(matches!(
            initiator.receive_connection().await,
            Err(PeerConnectionError::InvalidState(SessionState::Connected))
        ));
    }
}
