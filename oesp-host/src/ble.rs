//! BLE-style token transport: drives the stop-and-wait sender and the receiver over a
//! [`FrameLink`].

use std::time::Duration;

use oesp_core::{
    decode_frame, encode_frame, Delivery, Frame, Receiver, SenderEvent, SenderOutput,
    StopAndWaitSender, TransportConfig, TransportError, WireFormat,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::link::FrameLink;

/// How often the receive loop ages out idle sessions.
const RECEIVER_TICK: Duration = Duration::from_secs(1);

/// Short random identifier for sessions and messages on the link.
fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

pub struct BleTransport {
    config: TransportConfig,
    did: Option<String>,
}

impl BleTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config, did: None }
    }

    /// Announce this DID in a HELLO before each transfer.
    pub fn with_hello(mut self, did: impl Into<String>) -> Self {
        self.did = Some(did.into());
        self
    }

    /// Send one token and wait until the peer acknowledges END. Fails on timeout after the
    /// configured attempts, on a NACK, on link loss or when `cancel` fires.
    pub async fn send_token<L>(
        &self,
        token: &str,
        link: &mut L,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>
    where
        L: FrameLink + ?Sized,
    {
        let sid = short_id();
        let mtu = link.mtu_hint();
        let mut config = self.config.clone();
        if let Some(mtu) = mtu {
            config = config.fit_to_mtu(mtu, sid.len());
        }
        let format = config.wire_format;
        let mut sender = StopAndWaitSender::new(sid.clone(), short_id(), token.as_bytes(), config)?;
        if let Some(did) = &self.did {
            sender = sender.with_hello(did.clone(), mtu.and_then(|m| u32::try_from(m).ok()));
        }
        debug!(%sid, parts = sender.parts(), "sending token");

        let mut out = sender.begin(Instant::now().into_std());
        loop {
            if let Some(event) = flush(link, &mut out, format).await? {
                return match event {
                    SenderEvent::Delivered => {
                        info!(%sid, "token delivered");
                        Ok(())
                    }
                    SenderEvent::Failed(err) => Err(err),
                };
            }
            let deadline = sender
                .next_deadline()
                .map(Instant::from_std)
                .unwrap_or_else(Instant::now);
            out = tokio::select! {
                _ = cancel.cancelled() => sender.cancel(),
                incoming = link.recv() => match incoming {
                    Some(bytes) => match decode_frame(&bytes, format) {
                        Ok(frame) => sender.on_frame(&frame, Instant::now().into_std()),
                        Err(e) => {
                            debug!(%sid, error = %e, "dropping undecodable frame");
                            SenderOutput::default()
                        }
                    },
                    None => {
                        sender.cancel();
                        return Err(TransportError::Link("link closed".into()));
                    }
                },
                _ = tokio::time::sleep_until(deadline) => sender.on_tick(Instant::now().into_std()),
            };
        }
    }

    /// Answer frames on `link` and hand each delivered payload to `on_delivery` until the link
    /// closes or `cancel` fires.
    pub async fn run_receiver<L, F>(
        &self,
        link: &mut L,
        cancel: &CancellationToken,
        mut on_delivery: F,
    ) -> Result<(), TransportError>
    where
        L: FrameLink + ?Sized,
        F: FnMut(Delivery),
    {
        let format = self.config.wire_format;
        let mut receiver = Receiver::new(self.config.clone());
        let mut tick = tokio::time::interval(RECEIVER_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            let out = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                incoming = link.recv() => match incoming {
                    Some(bytes) => match decode_frame(&bytes, format) {
                        Ok(frame) => receiver.on_frame(&frame, Instant::now().into_std()),
                        Err(e) => {
                            debug!(error = %e, "dropping undecodable frame");
                            continue;
                        }
                    },
                    None => return Ok(()),
                },
                _ = tick.tick() => receiver.on_tick(Instant::now().into_std()),
            };
            for frame in &out.frames {
                write_frame(link, frame, format).await?;
            }
            if let Some(err) = out.failure {
                warn!(error = %err, "inbound transfer failed");
            }
            if let Some(delivery) = out.delivered {
                on_delivery(delivery);
            }
        }
    }
}

async fn write_frame<L>(
    link: &mut L,
    frame: &Frame,
    format: WireFormat,
) -> Result<(), TransportError>
where
    L: FrameLink + ?Sized,
{
    let bytes = encode_frame(frame, format).map_err(|e| TransportError::Link(e.to_string()))?;
    link.send(bytes)
        .await
        .map_err(|e| TransportError::Link(e.to_string()))
}

/// Write the pending frames and return the sender's terminal event, if it produced one.
async fn flush<L>(
    link: &mut L,
    out: &mut SenderOutput,
    format: WireFormat,
) -> Result<Option<SenderEvent>, TransportError>
where
    L: FrameLink + ?Sized,
{
    for frame in out.frames.drain(..) {
        write_frame(link, &frame, format).await?;
    }
    Ok(out.event.take())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryLink;

    #[test]
    fn short_ids_are_eight_hex_chars() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(short_id(), short_id());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (mut a, _b) = MemoryLink::pair(None);
        let transport = BleTransport::new(TransportConfig::default());
        let err = transport
            .send_token("OESP1.abc", &mut a, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn cancelled_before_ack() {
        let (mut a, _b) = MemoryLink::pair(None);
        let transport = BleTransport::new(TransportConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = transport
            .send_token("OESP1.abc", &mut a, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Cancelled);
    }
}
