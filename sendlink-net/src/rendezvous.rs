//! Rendezvous: pairs an offering initiator with a looking-up responder by session id.
//!
//! The server only ever sees session ids and socket addresses. Once the responder has
//! the initiator's address it dials it directly; file bytes never pass through here.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sendlink_core::wire::{decode_exact, encode_frame};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::channel::{ChannelError, DataChannel};
use crate::signaling::{Signaling, SignalingError};
use crate::tcp::{handshake_accept, handshake_connect, TcpChannel};

/// Offers nobody looked up within this window are dropped.
pub const DEFAULT_OFFER_TTL: Duration = Duration::from_secs(600);

/// A rendezvous client must send its request within this window.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A connecting peer must complete the session handshake within this window.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// One request/reply exchange per rendezvous connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Initiator: "reach me for `session_id` on `port`" (or on `advertise` if set).
    Offer {
        session_id: String,
        port: u16,
        advertise: Option<SocketAddr>,
    },
    /// Responder: "where is `session_id`?"
    Lookup { session_id: String },
    Registered,
    Duplicate,
    Answer { addr: SocketAddr },
    Unknown,
}

impl Signal {
    fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Lookup { .. } => "lookup",
            Signal::Registered => "registered",
            Signal::Duplicate => "duplicate",
            Signal::Answer { .. } => "answer",
            Signal::Unknown => "unknown",
        }
    }
}

async fn send_signal(channel: &mut TcpChannel, signal: &Signal) -> Result<(), SignalingError> {
    channel.send(encode_frame(signal)?).await?;
    Ok(())
}

async fn recv_signal(channel: &mut TcpChannel) -> Result<Signal, SignalingError> {
    let bytes = channel.recv().await?.ok_or(ChannelError::Closed)?;
    Ok(decode_exact(&bytes)?)
}

struct OfferEntry {
    addr: SocketAddr,
    registered: Instant,
}

/// Session registry plus the TCP front end for it.
#[derive(Clone)]
pub struct RendezvousServer {
    offers: Arc<Mutex<HashMap<String, OfferEntry>>>,
    ttl: Duration,
    request_timeout: Duration,
}

impl Default for RendezvousServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RendezvousServer {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_OFFER_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            offers: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Drop clients that stay silent longer than `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Register `session_id` at `addr`. A live offer for the same id is not replaced.
    pub async fn offer(&self, session_id: &str, addr: SocketAddr) -> Signal {
        let now = Instant::now();
        let mut offers = self.offers.lock().await;
        offers.retain(|_, o| now.duration_since(o.registered) < self.ttl);
        if offers.contains_key(session_id) {
            return Signal::Duplicate;
        }
        offers.insert(
            session_id.to_string(),
            OfferEntry {
                addr,
                registered: now,
            },
        );
        Signal::Registered
    }

    /// Resolve and consume the offer for `session_id`.
    pub async fn lookup(&self, session_id: &str) -> Signal {
        let entry = self.offers.lock().await.remove(session_id);
        match entry {
            Some(o) if o.registered.elapsed() < self.ttl => Signal::Answer { addr: o.addr },
            _ => Signal::Unknown,
        }
    }

    pub async fn pending(&self) -> usize {
        self.offers.lock().await.len()
    }

    /// Serve until the listener fails.
    pub async fn run(self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "rendezvous listening");
        }
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle(stream, peer).await {
                    tracing::debug!(%peer, error = %e, "rendezvous client dropped");
                }
            });
        }
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), SignalingError> {
        let mut channel = TcpChannel::new(stream);
        let request = tokio::time::timeout(self.request_timeout, recv_signal(&mut channel))
            .await
            .map_err(|_| SignalingError::Timeout(self.request_timeout))??;
        let reply = match request {
            Signal::Offer {
                session_id,
                port,
                advertise,
            } => {
                let addr = advertise.unwrap_or_else(|| SocketAddr::new(peer.ip(), port));
                let reply = self.offer(&session_id, addr).await;
                tracing::debug!(%addr, reply = reply.kind(), "offer");
                reply
            }
            Signal::Lookup { session_id } => {
                let reply = self.lookup(&session_id).await;
                tracing::debug!(%peer, reply = reply.kind(), "lookup");
                reply
            }
            other => return Err(SignalingError::UnexpectedReply(other.kind())),
        };
        send_signal(&mut channel, &reply).await?;
        channel.close();
        Ok(())
    }
}

/// [`Signaling`] over a [`RendezvousServer`] and direct TCP between the peers.
#[derive(Debug, Clone)]
pub struct TcpSignaling {
    rendezvous: String,
    listen_addr: SocketAddr,
    advertise_addr: Option<SocketAddr>,
}

impl TcpSignaling {
    /// `rendezvous` is a `host:port` string; it is resolved on each use.
    pub fn new(rendezvous: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            rendezvous: rendezvous.into(),
            listen_addr,
            advertise_addr: None,
        }
    }

    /// Publish this address in offers instead of the one the server observes.
    pub fn with_advertise_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.advertise_addr = addr;
        self
    }

    async fn ask(&self, request: &Signal) -> Result<Signal, SignalingError> {
        let stream = TcpStream::connect(self.rendezvous.as_str()).await?;
        let mut channel = TcpChannel::new(stream);
        send_signal(&mut channel, request).await?;
        recv_signal(&mut channel).await
    }
}

impl Signaling for TcpSignaling {
    type Channel = TcpChannel;

    async fn accept(&mut self, session_id: &str) -> Result<TcpChannel, SignalingError> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        let local = listener.local_addr()?;
        let offer = Signal::Offer {
            session_id: session_id.to_string(),
            port: local.port(),
            advertise: self.advertise_addr,
        };
        match self.ask(&offer).await? {
            Signal::Registered => {}
            Signal::Duplicate => return Err(SignalingError::DuplicateSession),
            other => return Err(SignalingError::UnexpectedReply(other.kind())),
        }
        tracing::info!(%local, "waiting for peer");

        // Each handshake runs in its own task; the first one to succeed wins.
        let mut handshakes = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let id = session_id.to_string();
                    handshakes.spawn(async move {
                        let mut channel = TcpChannel::new(stream);
                        let result =
                            tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake_accept(&mut channel, &id))
                                .await;
                        (peer, result, channel)
                    });
                }
                Some(joined) = handshakes.join_next() => match joined {
                    Ok((peer, Ok(Ok(())), channel)) => {
                        tracing::debug!(%peer, "peer handshake ok");
                        return Ok(channel);
                    }
                    // Stray or stale connections do not end the wait.
                    Ok((peer, Ok(Err(e)), _)) => tracing::warn!(%peer, error = %e, "rejected peer"),
                    Ok((peer, Err(_), _)) => tracing::warn!(%peer, "peer handshake timed out"),
                    Err(e) => tracing::warn!(error = %e, "handshake task failed"),
                },
            }
        }
    }

    async fn connect(&mut self, session_id: &str) -> Result<TcpChannel, SignalingError> {
        let lookup = Signal::Lookup {
            session_id: session_id.to_string(),
        };
        let addr = match self.ask(&lookup).await? {
            Signal::Answer { addr } => addr,
            Signal::Unknown => return Err(SignalingError::UnknownSession),
            other => return Err(SignalingError::UnexpectedReply(other.kind())),
        };
        tracing::debug!(%addr, "dialing peer");
        let mut channel = TcpChannel::new(TcpStream::connect(addr).await?);
        handshake_connect(&mut channel, session_id).await?;
        Ok(channel)
    }
}
