//! Data channel abstraction: reliable, ordered, message-oriented, bidirectional.
//!
//! Implemented by [`MemoryChannel`] (in-process pair) and
//! [`TcpChannel`](crate::tcp::TcpChannel) (length-prefixed TCP stream).

use tokio::sync::mpsc;

/// Default in-flight message capacity for [`MemoryChannel::pair`].
pub const DEFAULT_MEMORY_CAPACITY: usize = 64;

/// A reliable, ordered, bidirectional message channel between two peers.
///
/// Delivery guarantees come from the implementation; the transfer protocol does
/// no retransmission or reordering of its own.
#[allow(async_fn_in_trait)]
pub trait DataChannel: Send {
    /// Send one message. Fails fast with [`ChannelError::Closed`] once either side closed.
    async fn send(&mut self, message: Vec<u8>) -> Result<(), ChannelError>;

    /// Receive the next message. `Ok(None)` means the peer closed the channel.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError>;

    /// Close our side. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("message of {0} bytes exceeds the channel limit")]
    TooLarge(usize),
    #[error("channel i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// In-process channel half. Used for tests and for peers that already share a channel.
#[derive(Debug)]
pub struct MemoryChannel {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl MemoryChannel {
    /// Two connected halves; each buffers up to `capacity` unread messages.
    pub fn pair(capacity: usize) -> (MemoryChannel, MemoryChannel) {
        let capacity = capacity.max(1);
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            MemoryChannel {
                tx: Some(a_tx),
                rx: a_rx,
            },
            MemoryChannel {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

impl DataChannel for MemoryChannel {
    async fn send(&mut self, message: Vec<u8>) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Closed)?;
        tx.send(message).await.map_err(|_| ChannelError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        Ok(self.rx.recv().await)
    }

    fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }

    fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_in_order() {
        let (mut a, mut b) = MemoryChannel::pair(4);
        for i in 0..3u8 {
            a.send(vec![i]).await.unwrap();
        }
        for i in 0..3u8 {
            assert_eq!(b.recv().await.unwrap(), Some(vec![i]));
        }
        b.send(b"back".to_vec()).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Some(b"back".to_vec()));
    }

    #[tokio::test]
    async fn close_is_seen_by_peer() {
        let (mut a, mut b) = MemoryChannel::pair(4);
        a.send(vec![1]).await.unwrap();
        a.close();
        a.close();
        assert!(a.is_closed());
        // Buffered data is still delivered, then end of stream.
        assert_eq!(b.recv().await.unwrap(), Some(vec![1]));
        assert_eq!(b.recv().await.unwrap(), None);
        // Peer writes fail fast once we stopped receiving.
        assert!(b.is_closed());
        assert!(matches!(b.send(vec![2]).await, Err(ChannelError::Closed)));
        assert!(matches!(a.send(vec![3]).await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn dropping_half_closes() {
        let (a, mut b) = MemoryChannel::pair(1);
        drop(a);
        assert_eq!(b.recv().await.unwrap(), None);
        assert!(matches!(b.send(vec![0]).await, Err(ChannelError::Closed)));
    }
}
