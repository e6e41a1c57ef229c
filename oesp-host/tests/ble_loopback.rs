use std::sync::Arc;

use async_trait::async_trait;
use oesp_core::{
    now_secs, Keystore, MemoryFreshnessGuard, MemoryKeystore, MemoryResolver, OespClient,
    TransportConfig, TransportError, WireFormat,
};
use oesp_host::{BleTransport, FrameLink, LinkError, MemoryLink};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn clients() -> (OespClient, OespClient) {
    let a = Arc::new(MemoryKeystore::generate());
    let b = Arc::new(MemoryKeystore::generate());
    let resolver = Arc::new(MemoryResolver::new());
    resolver.insert(a.did(), a.kex_public_key());
    resolver.insert(b.did(), b.kex_public_key());
    (
        OespClient::new(a, resolver.clone(), Arc::new(MemoryFreshnessGuard::new())),
        OespClient::new(b, resolver, Arc::new(MemoryFreshnessGuard::new())),
    )
}

/// Run a receiver on `link` in the background; delivered payloads come out of the channel.
fn spawn_receiver<L: FrameLink + 'static>(
    config: TransportConfig,
    mut link: L,
    cancel: CancellationToken,
) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        BleTransport::new(config)
            .run_receiver(&mut link, &cancel, |d| {
                let _ = tx.send(d.payload);
            })
            .await
    });
    rx
}

/// Drops the outgoing frames whose send index is listed.
struct LossyLink {
    inner: MemoryLink,
    sent: usize,
    drop_at: Vec<usize>,
}

#[async_trait]
impl FrameLink for LossyLink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), LinkError> {
        let index = self.sent;
        self.sent += 1;
        if self.drop_at.contains(&index) {
            return Ok(());
        }
        self.inner.send(frame).await
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inner.recv().await
    }

    fn mtu_hint(&self) -> Option<usize> {
        self.inner.mtu_hint()
    }
}

#[tokio::test]
async fn token_crosses_link_and_unpacks() {
    let (alice, bob) = clients();
    let token = alice
        .pack(&bob.did(), json!({"hello": "world"}), 600)
        .unwrap();

    let cancel = CancellationToken::new();
    let (mut a, b) = MemoryLink::pair(None);
    let mut delivered = spawn_receiver(TransportConfig::default(), b, cancel.clone());

    BleTransport::new(TransportConfig::default())
        .with_hello(alice.did())
        .send_token(&token, &mut a, &cancel)
        .await
        .unwrap();

    let payload = delivered.recv().await.unwrap();
    let received = String::from_utf8(payload).unwrap();
    assert_eq!(received, token);
    let msg = bob.unpack(&received, now_secs(), false).unwrap();
    assert_eq!(msg.from_did, alice.did());
    assert_eq!(msg.plaintext, br#"{"hello":"world"}"#);
    cancel.cancel();
}

#[tokio::test]
async fn binary_frames_over_small_mtu() {
    let (alice, bob) = clients();
    let token = alice
        .pack(&bob.did(), b"a payload that needs several chunks".to_vec(), 600)
        .unwrap();
    let config = TransportConfig {
        wire_format: WireFormat::Binary,
        ..TransportConfig::default()
    };

    let cancel = CancellationToken::new();
    let (mut a, b) = MemoryLink::pair(Some(64));
    let mut delivered = spawn_receiver(config.clone(), b, cancel.clone());

    BleTransport::new(config)
        .send_token(&token, &mut a, &cancel)
        .await
        .unwrap();

    let payload = delivered.recv().await.unwrap();
    assert_eq!(payload, token.as_bytes());
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn lost_chunk_is_resent() {
    let (alice, bob) = clients();
    let token = alice.pack(&bob.did(), b"retry me".to_vec(), 600).unwrap();

    let cancel = CancellationToken::new();
    let (a, b) = MemoryLink::pair(None);
    let mut delivered = spawn_receiver(TransportConfig::default(), b, cancel.clone());
    // Frame 0 is START; frame 1 is the first chunk.
    let mut lossy = LossyLink {
        inner: a,
        sent: 0,
        drop_at: vec![1],
    };

    BleTransport::new(TransportConfig::default())
        .send_token(&token, &mut lossy, &cancel)
        .await
        .unwrap();

    assert_eq!(delivered.recv().await.unwrap(), token.as_bytes());
    assert!(lossy.sent > 3);
    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn every_copy_lost_times_out() {
    let cancel = CancellationToken::new();
    let (a, b) = MemoryLink::pair(None);
    let _delivered = spawn_receiver(TransportConfig::default(), b, cancel.clone());
    let mut lossy = LossyLink {
        inner: a,
        sent: 0,
        drop_at: vec![1, 2, 3],
    };

    let err = BleTransport::new(TransportConfig::default())
        .send_token("OESP1.abc", &mut lossy, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout { at: 0, attempts: 3 });
    cancel.cancel();
}
