//! Full path over loopback: rendezvous server, TCP signaling, handshake and transfer.

use std::net::SocketAddr;
use std::time::Duration;

use rand::RngCore;
use sendlink_core::{Direction, Invite, ShareLink};
use sendlink_net::testing::{init_test_tracing, RecordingEvents};
use sendlink_net::{
    FileSource, PeerConnectionError, RendezvousServer, SessionState, SignalingError,
    SignalingSession, TcpSignaling, TransferEngine,
};
use tokio::net::TcpListener;

async fn start_rendezvous() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(RendezvousServer::new().run(listener));
    addr
}

fn signaling(rendezvous: SocketAddr) -> TcpSignaling {
    TcpSignaling::new(rendezvous.to_string(), "127.0.0.1:0".parse().unwrap())
}

#[tokio::test]
async fn receive_link_transfers_over_tcp() {
    init_test_tracing();
    let rendezvous = start_rendezvous().await;
    let mut payload = vec![0u8; 100_000];
    rand::thread_rng().fill_bytes(&mut payload);

    // Initiator receives, so the link asks the other side to send.
    let (invite, link) = Invite::create(Direction::Receive);
    let accepted = Invite::accept(&ShareLink::parse(&link.to_fragment()).unwrap()).unwrap();
    assert_eq!(accepted.local_direction, Direction::Send);

    let mut initiator = SignalingSession::new(invite.session_id.clone(), signaling(rendezvous));
    let mut responder = SignalingSession::new("responder", signaling(rendezvous));
    let mut events = RecordingEvents::default();
    let mut sink = Vec::new();

    let (r, s) = tokio::join!(
        async {
            let channel = initiator.receive_connection().await?;
            Ok::<_, PeerConnectionError>(
                TransferEngine::new(channel, &invite.key)
                    .recv_file(&mut sink, &mut events)
                    .await,
            )
        },
        async {
            // Give the offer time to land before the lookup.
            tokio::time::sleep(Duration::from_millis(100)).await;
            let channel = responder.connect_to(&accepted.session_id).await?;
            Ok::<_, PeerConnectionError>(
                TransferEngine::new(channel, &accepted.key)
                    .send_file(FileSource::from_bytes("blob.bin", &payload), &mut ())
                    .await,
            )
        }
    );
    let received = r.unwrap().unwrap();
    let sent = s.unwrap().unwrap();
    assert_eq!(received, sent);
    assert_eq!(sink, payload);
    assert_eq!(events.completed, 1);
    assert_eq!(initiator.state(), SessionState::Connected);

    initiator.close();
    responder.close();
    assert_eq!(initiator.state(), SessionState::Closed);
}

#[tokio::test]
async fn lookup_of_unknown_session_is_connection_error() {
    let rendezvous = start_rendezvous().await;
    let mut session = SignalingSession::new("me", signaling(rendezvous));
    let err = session.connect_to("no-such-session").await.unwrap_err();
    assert!(matches!(
        err,
        PeerConnectionError::Negotiation(SignalingError::UnknownSession)
    ));
}

#[tokio::test]
async fn session_id_is_consumed_by_first_lookup() {
    let rendezvous = start_rendezvous().await;
    let mut initiator = SignalingSession::new("once", signaling(rendezvous))
        .with_timeout(Duration::from_secs(10));
    let mut first = SignalingSession::new("a", signaling(rendezvous));
    let mut second = SignalingSession::new("b", signaling(rendezvous));

    let (i, f) = tokio::join!(
        async { initiator.receive_connection().await.map(|_| ()) },
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            first.connect_to("once").await.map(|_| ())
        }
    );
    i.unwrap();
    f.unwrap();
    assert!(matches!(
        second.connect_to("once").await,
        Err(PeerConnectionError::Negotiation(SignalingError::UnknownSession))
    ));
}

#[tokio::test]
async fn unreachable_rendezvous_fails_negotiation() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let mut session = SignalingSession::new("x", signaling(addr));
    assert!(matches!(
        session.receive_connection().await,
        Err(PeerConnectionError::Negotiation(SignalingError::Io(_)))
    ));
    assert_eq!(session.state(), SessionState::Closed);
}
