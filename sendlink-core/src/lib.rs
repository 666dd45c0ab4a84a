//! sendlink protocol core.
//! No I/O: key exchange, share links, sealed frame codec, chunk planning and
//! transfer state. The async host (sendlink-net) moves the bytes.

pub mod chunk;
pub mod codec;
pub mod integrity;
pub mod key;
pub mod link;
pub mod progress;
pub mod protocol;
pub mod state;
pub mod wire;

pub use codec::{decode_chunk, encode_chunk, CodecError, Decoded, FrameDecoder, FrameEncoder};
pub use key::{import_from_exported, KeyError, TransferKey};
pub use link::{Direction, Invite, LinkError, ShareLink};
pub use progress::{Progress, ProgressTracker};
pub use protocol::{Completion, FileMetadata, Message, PROTOCOL_VERSION};
pub use state::{BlockerState, NavigationBlocker, TransferOutcome, TransferState, TransferStateMachine};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
