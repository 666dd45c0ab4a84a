//! Transfer engine: drives one file through an established data channel.
//!
//! Sender: metadata, chunks in sequence, done, then (optionally) wait for the ack.
//! Receiver: metadata, chunks appended to the sink, done verified against what
//! actually arrived, then ack. No retries; the first error ends the transfer.

use std::time::Duration;

use sendlink_core::chunk::{effective_chunk_size, split_into_chunks, DEFAULT_CHUNK_SIZE};
use sendlink_core::codec::{decode_ack, encode_ack};
use sendlink_core::integrity::{digests_match, FileDigest};
use sendlink_core::{
    CodecError, Completion, Decoded, FileMetadata, FrameDecoder, FrameEncoder, Progress,
    ProgressTracker, TransferKey,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::{ChannelError, DataChannel};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Observer for one transfer. Every hook defaults to a no-op.
pub trait TransferEvents {
    /// Receiver only; called once, before any chunk.
    fn on_metadata(&mut self, _metadata: &FileMetadata) {}

    fn on_progress(&mut self, _progress: Progress) {}

    fn on_complete(&mut self) {}
}

impl TransferEvents for () {}

#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Plaintext bytes per chunk. 0 selects the default; larger values are clamped.
    pub chunk_size: usize,
    /// Sender waits for the receiver's ack before reporting completion.
    pub await_ack: bool,
    pub ack_timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            await_ack: true,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

/// The file to send. `reader` must yield exactly `metadata.size` bytes.
pub struct FileSource<R> {
    pub metadata: FileMetadata,
    pub reader: R,
}

impl<R: AsyncRead + Unpin> FileSource<R> {
    pub fn new(metadata: FileMetadata, reader: R) -> Self {
        Self { metadata, reader }
    }
}

impl<'a> FileSource<&'a [u8]> {
    pub fn from_bytes(name: impl Into<String>, bytes: &'a [u8]) -> Self {
        Self {
            metadata: FileMetadata::new(name, bytes.len() as u64),
            reader: bytes,
        }
    }
}

/// What was moved, as verified by this side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub metadata: FileMetadata,
    pub bytes: u64,
    pub chunks: u64,
    pub digest: [u8; 32],
}

#[derive(Debug, thiserror::Error)]
#[error("transfer failed: {cause}")]
pub struct TransferFailed {
    pub cause: FailureCause,
}

#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
    #[error("channel closed before the transfer completed")]
    ChannelClosed,
    #[error("channel: {0}")]
    Channel(ChannelError),
    #[error(transparent)]
    Codec(CodecError),
    #[error("i/o: {0}")]
    Io(std::io::Error),
    /// `actual` is a lower bound when the source ran long.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("chunk count mismatch: sender reported {expected}, received {actual}")]
    ChunkCountMismatch { expected: u64, actual: u64 },
    #[error("file digest mismatch")]
    DigestMismatch,
    #[error("acknowledged digest does not match the file sent")]
    AckMismatch,
    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),
}

impl TransferFailed {
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self.cause, FailureCause::Codec(CodecError::DecryptionFailed))
    }
}

impl From<FailureCause> for TransferFailed {
    fn from(cause: FailureCause) -> Self {
        TransferFailed { cause }
    }
}

impl From<ChannelError> for TransferFailed {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Closed => FailureCause::ChannelClosed.into(),
            other => FailureCause::Channel(other).into(),
        }
    }
}

impl From<CodecError> for TransferFailed {
    fn from(e: CodecError) -> Self {
        FailureCause::Codec(e).into()
    }
}

impl From<std::io::Error> for TransferFailed {
    fn from(e: std::io::Error) -> Self {
        FailureCause::Io(e).into()
    }
}

/// Borrows a connected channel and the transfer key for one file.
pub struct TransferEngine<'a, C: DataChannel> {
    channel: &'a mut C,
    key: &'a TransferKey,
    options: TransferOptions,
}

impl<'a, C: DataChannel> TransferEngine<'a, C> {
    pub fn new(channel: &'a mut C, key: &'a TransferKey) -> Self {
        Self {
            channel,
            key,
            options: TransferOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransferFailed> {
        if self.channel.is_closed() {
            return Err(FailureCause::ChannelClosed.into());
        }
        self.channel.send(frame).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransferFailed> {
        self.channel
            .recv()
            .await?
            .ok_or_else(|| FailureCause::ChannelClosed.into())
    }

    pub async fn send_file<R, E>(
        &mut self,
        mut source: FileSource<R>,
        events: &mut E,
    ) -> Result<TransferReport, TransferFailed>
    where
        R: AsyncRead + Unpin,
        E: TransferEvents + ?Sized,
    {
        let key = self.key;
        let mut encoder = FrameEncoder::new(key);
        let size = source.metadata.size;
        let chunk_size = effective_chunk_size(self.options.chunk_size);
        tracing::info!(size, chunk_size, "sending file");

        self.send(encoder.metadata(&source.metadata)?).await?;

        let mut tracker = ProgressTracker::new(size);
        let mut digest = FileDigest::new();
        let mut buf = vec![0u8; chunk_size];
        for range in split_into_chunks(size, chunk_size) {
            let chunk = &mut buf[..range.len()];
            let n = fill(&mut source.reader, chunk).await?;
            if n < chunk.len() {
                return Err(FailureCause::SizeMismatch {
                    expected: size,
                    actual: range.start + n as u64,
                }
                .into());
            }
            digest.update(chunk);
            self.send(encoder.chunk(chunk)?).await?;
            tracing::trace!(seq = range.seq, len = n, "chunk sent");
            events.on_progress(tracker.advance(n as u64));
        }
        if size == 0 {
            events.on_progress(tracker.current());
        }

        let mut probe = [0u8; 1];
        let extra = source.reader.read(&mut probe).await?;
        if extra > 0 {
            return Err(FailureCause::SizeMismatch {
                expected: size,
                actual: size + extra as u64,
            }
            .into());
        }

        let completion = Completion {
            chunks: encoder.next_seq(),
            bytes: digest.bytes(),
            digest: digest.finalize(),
        };
        self.send(encoder.done(&completion)?).await?;

        if self.options.await_ack {
            let timeout = self.options.ack_timeout;
            let ack = match tokio::time::timeout(timeout, self.recv()).await {
                Ok(frame) => frame?,
                Err(_) => return Err(FailureCause::AckTimeout(timeout).into()),
            };
            let acked = decode_ack(key, &ack)?;
            if !digests_match(&acked, &completion.digest) {
                return Err(FailureCause::AckMismatch.into());
            }
            tracing::debug!("receiver acknowledged");
        }

        tracing::info!(bytes = completion.bytes, chunks = completion.chunks, "file sent");
        events.on_complete();
        Ok(TransferReport {
            metadata: source.metadata,
            bytes: completion.bytes,
            chunks: completion.chunks,
            digest: completion.digest,
        })
    }

    /// Receive one file into `sink`. The sink is flushed but not synced or renamed;
    /// on error its contents are partial and should be discarded.
    pub async fn recv_file<W, E>(
        &mut self,
        sink: &mut W,
        events: &mut E,
    ) -> Result<TransferReport, TransferFailed>
    where
        W: AsyncWrite + Unpin,
        E: TransferEvents + ?Sized,
    {
        let key = self.key;
        let mut decoder = FrameDecoder::new(key);
        let mut metadata: Option<FileMetadata> = None;
        let mut tracker = ProgressTracker::new(0);
        let mut digest = FileDigest::new();

        let completion = loop {
            let frame = self.recv().await?;
            match decoder.decode(&frame)? {
                Decoded::Metadata(m) => {
                    tracing::info!(size = m.size, "receiving file");
                    tracker = ProgressTracker::new(m.size);
                    events.on_metadata(&m);
                    metadata = Some(m);
                }
                Decoded::Chunk { seq, data } => {
                    let expected = metadata.as_ref().map_or(0, |m| m.size);
                    let actual = digest.bytes() + data.len() as u64;
                    if actual > expected {
                        return Err(FailureCause::SizeMismatch { expected, actual }.into());
                    }
                    sink.write_all(&data).await?;
                    digest.update(&data);
                    tracing::trace!(seq, len = data.len(), "chunk received");
                    events.on_progress(tracker.advance(data.len() as u64));
                }
                Decoded::Done(completion) => break completion,
            }
        };
        sink.flush().await?;

        let Some(metadata) = metadata else {
            return Err(CodecError::UnexpectedMessageOrder {
                kind: "done",
                state: "awaiting metadata",
            }
            .into());
        };
        let received = digest.bytes();
        if received != metadata.size || received != completion.bytes {
            return Err(FailureCause::SizeMismatch {
                expected: metadata.size,
                actual: received,
            }
            .into());
        }
        if decoder.chunks_received() != completion.chunks {
            return Err(FailureCause::ChunkCountMismatch {
                expected: completion.chunks,
                actual: decoder.chunks_received(),
            }
            .into());
        }
        let local = digest.finalize();
        if !digests_match(&local, &completion.digest) {
            return Err(FailureCause::DigestMismatch.into());
        }
        if received == 0 {
            events.on_progress(tracker.current());
        }

        // The file is verified at this point; a sender that stopped listening is not an error.
        match self.send(encode_ack(key, &local)?).await {
            Ok(()) => {}
            Err(TransferFailed {
                cause: FailureCause::ChannelClosed,
            }) => tracing::debug!("sender closed before ack"),
            Err(e) => return Err(e),
        }

        tracing::info!(bytes = received, chunks = completion.chunks, "file received");
        events.on_complete();
        Ok(TransferReport {
            metadata,
            bytes: received,
            chunks: completion.chunks,
            digest: local,
        })
    }
}

/// Read until `buf` is full or the reader hits EOF. Returns bytes read.
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
