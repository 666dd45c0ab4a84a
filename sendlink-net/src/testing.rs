//! Shared helpers for integration tests.
//!
//! Available behind the `test-util` feature or in `#[cfg(test)]` within sendlink-net.

use sendlink_core::{FileMetadata, Progress};
use tracing_subscriber::EnvFilter;

use crate::channel::{ChannelError, DataChannel};
use crate::engine::TransferEvents;

/// Route tracing output through the test harness. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Records every transfer event in order.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    pub metadata: Vec<FileMetadata>,
    pub progress: Vec<Progress>,
    pub completed: usize,
}

impl RecordingEvents {
    pub fn last_progress(&self) -> Option<Progress> {
        self.progress.last().copied()
    }
}

impl TransferEvents for RecordingEvents {
    fn on_metadata(&mut self, metadata: &FileMetadata) {
        self.metadata.push(metadata.clone());
    }

    fn on_progress(&mut self, progress: Progress) {
        self.progress.push(progress);
    }

    fn on_complete(&mut self) {
        self.completed += 1;
    }
}

/// Wraps a channel and closes it once `limit` messages have been sent.
pub struct CloseAfter<C> {
    inner: C,
    limit: usize,
    sent: usize,
}

impl<C: DataChannel> CloseAfter<C> {
    pub fn new(inner: C, limit: usize) -> Self {
        Self {
            inner,
            limit,
            sent: 0,
        }
    }

    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl<C: DataChannel> DataChannel for CloseAfter<C> {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), ChannelError> {
        self.inner.send(message).await?;
        self.sent += 1;
        if self.sent >= self.limit {
            self.inner.close();
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        self.inner.recv().await
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
