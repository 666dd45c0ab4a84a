//! Frame codec: seals each message with ChaCha20-Poly1305 under the transfer key.
//!
//! Nonce layout (96 bits): byte 0 = frame domain, bytes 1..4 = 0, bytes 4..12 =
//! sequence number LE. Domains keep metadata, chunk, done and ack nonces apart,
//! so one key never sees the same nonce twice within a transfer.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::chunk::MAX_CHUNK_SIZE;
use crate::key::TransferKey;
use crate::protocol::{Completion, FileMetadata, Message, PROTOCOL_VERSION};
use crate::wire::{self, FrameDecodeError, FrameEncodeError};

const NONCE_LEN: usize = 12;

/// Nonce domain per frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Domain {
    Metadata = 1,
    Chunk = 2,
    Done = 3,
    Ack = 4,
}

/// Deterministic nonce for (domain, sequence number).
pub fn derive_nonce(domain: Domain, seq: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0] = domain as u8;
    nonce[4..12].copy_from_slice(&seq.to_le_bytes());
    nonce
}

/// Nonce used for chunk `seq`.
pub fn chunk_nonce(seq: u64) -> [u8; NONCE_LEN] {
    derive_nonce(Domain::Chunk, seq)
}

fn seal(key: &TransferKey, domain: Domain, seq: u64, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CodecError::Key)?;
    let nonce = derive_nonce(domain, seq);
    cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CodecError::EncryptionFailed)
}

fn open(key: &TransferKey, domain: Domain, seq: u64, ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CodecError::Key)?;
    let nonce = derive_nonce(domain, seq);
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| CodecError::DecryptionFailed)
}

fn seal_value<T: Serialize>(key: &TransferKey, domain: Domain, value: &T) -> Result<Vec<u8>, CodecError> {
    let plain = bincode::serialize(value).map_err(CodecError::Malformed)?;
    seal(key, domain, 0, &plain)
}

fn open_value<T: DeserializeOwned>(key: &TransferKey, domain: Domain, sealed: &[u8]) -> Result<T, CodecError> {
    let plain = open(key, domain, 0, sealed)?;
    bincode::deserialize(&plain).map_err(CodecError::Malformed)
}

/// Encrypt one chunk. Returns ciphertext with the 16-byte tag appended.
pub fn encode_chunk(seq: u64, plaintext: &[u8], key: &TransferKey) -> Result<Vec<u8>, CodecError> {
    seal(key, Domain::Chunk, seq, plaintext)
}

/// Decrypt one chunk. Tampering, corruption and a wrong key all yield `DecryptionFailed`.
pub fn decode_chunk(seq: u64, ciphertext: &[u8], key: &TransferKey) -> Result<Vec<u8>, CodecError> {
    open(key, Domain::Chunk, seq, ciphertext)
}

/// Sender half. Owns the chunk sequence counter; emits frames only in protocol order.
pub struct FrameEncoder<'k> {
    key: &'k TransferKey,
    phase: EncodePhase,
    next_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodePhase {
    Start,
    Streaming,
    Done,
}

impl<'k> FrameEncoder<'k> {
    pub fn new(key: &'k TransferKey) -> Self {
        Self {
            key,
            phase: EncodePhase::Start,
            next_seq: 0,
        }
    }

    /// Sequence number the next chunk will carry (= chunks emitted so far).
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn metadata(&mut self, metadata: &FileMetadata) -> Result<Vec<u8>, CodecError> {
        if self.phase != EncodePhase::Start {
            return Err(CodecError::UnexpectedMessageOrder {
                kind: "metadata",
                state: self.phase.name(),
            });
        }
        let sealed = seal_value(self.key, Domain::Metadata, metadata)?;
        let frame = wire::encode_frame(&Message::Metadata {
            protocol_version: PROTOCOL_VERSION,
            sealed,
        })?;
        self.phase = EncodePhase::Streaming;
        Ok(frame)
    }

    pub fn chunk(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        if self.phase != EncodePhase::Streaming {
            return Err(CodecError::UnexpectedMessageOrder {
                kind: "chunk",
                state: self.phase.name(),
            });
        }
        if plaintext.len() > MAX_CHUNK_SIZE {
            return Err(CodecError::ChunkTooLarge(plaintext.len()));
        }
        let seq = self.next_seq;
        let sealed = encode_chunk(seq, plaintext, self.key)?;
        let frame = wire::encode_frame(&Message::Chunk { seq, sealed })?;
        self.next_seq = seq.checked_add(1).ok_or(CodecError::SequenceExhausted)?;
        Ok(frame)
    }

    pub fn done(&mut self, completion: &Completion) -> Result<Vec<u8>, CodecError> {
        if self.phase != EncodePhase::Streaming {
            return Err(CodecError::UnexpectedMessageOrder {
                kind: "done",
                state: self.phase.name(),
            });
        }
        let sealed = seal_value(self.key, Domain::Done, completion)?;
        let frame = wire::encode_frame(&Message::Done { sealed })?;
        self.phase = EncodePhase::Done;
        Ok(frame)
    }
}

impl EncodePhase {
    fn name(self) -> &'static str {
        match self {
            EncodePhase::Start => "start",
            EncodePhase::Streaming => "streaming",
            EncodePhase::Done => "done",
        }
    }
}

/// What the receiver got out of one frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Metadata(FileMetadata),
    Chunk { seq: u64, data: Vec<u8> },
    Done(Completion),
}

/// Receiver half. Enforces metadata first, contiguous chunk sequence, nothing after done.
pub struct FrameDecoder<'k> {
    key: &'k TransferKey,
    phase: DecodePhase,
    expected_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodePhase {
    AwaitingMetadata,
    Streaming,
    Finished,
}

impl DecodePhase {
    fn name(self) -> &'static str {
        match self {
            DecodePhase::AwaitingMetadata => "awaiting metadata",
            DecodePhase::Streaming => "streaming",
            DecodePhase::Finished => "finished",
        }
    }
}

impl<'k> FrameDecoder<'k> {
    pub fn new(key: &'k TransferKey) -> Self {
        Self {
            key,
            phase: DecodePhase::AwaitingMetadata,
            expected_seq: 0,
        }
    }

    /// Chunks accepted so far.
    pub fn chunks_received(&self) -> u64 {
        self.expected_seq
    }

    pub fn is_finished(&self) -> bool {
        self.phase == DecodePhase::Finished
    }

    /// Decode one channel message.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Decoded, CodecError> {
        let msg: Message = wire::decode_exact(bytes)?;
        match (self.phase, msg) {
            (
                DecodePhase::AwaitingMetadata,
                Message::Metadata {
                    protocol_version,
                    sealed,
                },
            ) => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(CodecError::UnsupportedVersion(protocol_version));
                }
                let metadata: FileMetadata = open_value(self.key, Domain::Metadata, &sealed)?;
                self.phase = DecodePhase::Streaming;
                Ok(Decoded::Metadata(metadata))
            }
            (DecodePhase::Streaming, Message::Chunk { seq, sealed }) => {
                if seq != self.expected_seq {
                    return Err(CodecError::OutOfOrderChunk {
                        expected: self.expected_seq,
                        got: seq,
                    });
                }
                let data = decode_chunk(seq, &sealed, self.key)?;
                if data.len() > MAX_CHUNK_SIZE {
                    return Err(CodecError::ChunkTooLarge(data.len()));
                }
                self.expected_seq += 1;
                Ok(Decoded::Chunk { seq, data })
            }
            (DecodePhase::Streaming, Message::Done { sealed }) => {
                let completion: Completion = open_value(self.key, Domain::Done, &sealed)?;
                self.phase = DecodePhase::Finished;
                Ok(Decoded::Done(completion))
            }
            (phase, msg) => Err(CodecError::UnexpectedMessageOrder {
                kind: msg.kind(),
                state: phase.name(),
            }),
        }
    }
}

/// Receiver's acknowledgement frame: echoes the verified file digest.
pub fn encode_ack(key: &TransferKey, digest: &[u8; 32]) -> Result<Vec<u8>, CodecError> {
    let sealed = seal_value(key, Domain::Ack, digest)?;
    Ok(wire::encode_frame(&Message::Ack { sealed })?)
}

/// Sender side: open an ack frame and return the digest it carries.
pub fn decode_ack(key: &TransferKey, bytes: &[u8]) -> Result<[u8; 32], CodecError> {
    match wire::decode_exact::<Message>(bytes)? {
        Message::Ack { sealed } => open_value(key, Domain::Ack, &sealed),
        other => Err(CodecError::UnexpectedMessageOrder {
            kind: other.kind(),
            state: "awaiting ack",
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("unexpected {kind} frame while {state}")]
    UnexpectedMessageOrder {
        kind: &'static str,
        state: &'static str,
    },
    #[error("out-of-order chunk: expected seq {expected}, got {got}")]
    OutOfOrderChunk { expected: u64, got: u64 },
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("chunk of {0} bytes exceeds the maximum")]
    ChunkTooLarge(usize),
    #[error("chunk sequence exhausted")]
    SequenceExhausted,
    #[error("malformed payload: {0}")]
    Malformed(bincode::Error),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
}
