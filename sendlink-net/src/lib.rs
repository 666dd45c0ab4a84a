//! sendlink async host: data channels, signaling sessions, the rendezvous service and
//! the transfer engine. Protocol logic lives in `sendlink-core`.

pub mod channel;
pub mod engine;
pub mod rendezvous;
pub mod session;
pub mod signaling;
pub mod tcp;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use channel::{ChannelError, DataChannel, MemoryChannel};
pub use engine::{
    FailureCause, FileSource, TransferEngine, TransferEvents, TransferFailed, TransferOptions,
    TransferReport,
};
pub use rendezvous::{RendezvousServer, TcpSignaling};
pub use session::{CloseHandle, PeerConnectionError, Role, SessionState, SignalingSession};
pub use signaling::{MemoryRendezvous, Signaling, SignalingError};
pub use tcp::TcpChannel;
