//! Frame links: one bidirectional byte-frame channel per peer, such as a GATT characteristic
//! pair (write on RX, notify on TX).

use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("link closed")]
    Closed,
}

/// A link that moves whole frames. Exactly one owner reads it at a time.
#[async_trait]
pub trait FrameLink: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), LinkError>;

    /// Next incoming frame; `None` once the peer is gone.
    async fn recv(&mut self) -> Option<Vec<u8>>;

    /// Negotiated MTU, if the link knows it.
    fn mtu_hint(&self) -> Option<usize> {
        None
    }
}

/// In-process link end backed by unbounded channels.
pub struct MemoryLink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mtu: Option<usize>,
}

impl MemoryLink {
    /// Two connected ends; what one sends the other receives.
    pub fn pair(mtu: Option<usize>) -> (MemoryLink, MemoryLink) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MemoryLink {
                tx: a_tx,
                rx: a_rx,
                mtu,
            },
            MemoryLink {
                tx: b_tx,
                rx: b_rx,
                mtu,
            },
        )
    }
}

#[async_trait]
impl FrameLink for MemoryLink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), LinkError> {
        self.tx.send(frame).map_err(|_| LinkError::Closed)
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    fn mtu_hint(&self) -> Option<usize> {
        self.mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_is_connected_both_ways() {
        let (mut a, mut b) = MemoryLink::pair(Some(185));
        a.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), b"ping");
        b.send(b"pong".to_vec()).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), b"pong");
        assert_eq!(a.mtu_hint(), Some(185));
    }

    #[tokio::test]
    async fn dropped_peer_closes_link() {
        let (mut a, b) = MemoryLink::pair(None);
        drop(b);
        assert_eq!(a.send(vec![1]).await, Err(LinkError::Closed));
        assert!(a.recv().await.is_none());
    }
}
