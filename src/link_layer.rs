use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::sync::{Mutex, Notify};
use tokio::time;
use tracing::{debug, error, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::config::{AckPolicy, LinkConfig};
use crate::error::SendError;
use crate::frame_header::{FrameHeader, FrameType};
use crate::layer::{Layer, LayerHandle};

/// The 'acknowledged' flag, shared between a sender waiting for an ACK and the receive path
///  that observes it.
struct AckSignal {
    acknowledged: Mutex<bool>,
    notify: Notify,
}

impl AckSignal {
    fn new() -> AckSignal {
        AckSignal {
            acknowledged: Mutex::new(true),
            notify: Notify::new(),
        }
    }

    async fn reset(&self) {
        *self.acknowledged.lock().await = false;
    }

    async fn signal(&self) {
        *self.acknowledged.lock().await = true;
        self.notify.notify_one();
    }

    async fn wait(&self) {
        loop {
            // NB: registering before checking the flag, so a signal in between is not lost
            let notified = self.notify.notified();
            if *self.acknowledged.lock().await {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Default)]
struct LinkCounters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    acks_sent: AtomicU64,
    acks_received: AtomicU64,
    retransmissions: AtomicU64,
}

/// a snapshot of a link layer's counters, for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// acknowledged CHAT / FILE frames
    pub frames_sent: u64,
    /// CHAT / FILE frames that were accepted and passed up
    pub frames_received: u64,
    /// frames that were filtered out, either by address, as an echo of our own frames, or
    ///  because they were incomplete or of an unknown type
    pub frames_dropped: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub retransmissions: u64,
}

/// The link layer wraps payloads from the layer above into frames, and it makes every send
///  a synchronous stop-and-wait exchange: `send` returns only after the peer acknowledged
///  the frame.
///
/// Received frames are filtered by address, passed up to the layer at index 0 and acknowledged.
pub struct LinkLayer {
    config: Arc<LinkConfig>,
    handle: OnceLock<LayerHandle>,
    /// held for the duration of a send: at most one frame is in flight at any time
    in_flight: Mutex<()>,
    ack: AckSignal,
    counters: LinkCounters,
}

impl LinkLayer {
    pub fn new(config: Arc<LinkConfig>) -> anyhow::Result<LinkLayer> {
        config.validate()?;

        Ok(LinkLayer {
            config,
            handle: OnceLock::new(),
            in_flight: Mutex::new(()),
            ack: AckSignal::new(),
            counters: Default::default(),
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            acks_sent: self.counters.acks_sent.load(Ordering::Relaxed),
            acks_received: self.counters.acks_received.load(Ordering::Relaxed),
            retransmissions: self.counters.retransmissions.load(Ordering::Relaxed),
        }
    }

    fn handle(&self) -> anyhow::Result<&LayerHandle> {
        self.handle.get()
            .ok_or_else(|| anyhow!("link layer is not attached"))
    }

    fn build_frame(&self, frame_type: FrameType, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(
            (FrameHeader::SERIALIZED_LEN + payload.len()).max(self.config.min_frame_len)
        );
        FrameHeader::new(self.config.peer_addr, self.config.self_addr, frame_type)
            .ser(&mut buf);
        buf.extend_from_slice(payload);
        if buf.len() < self.config.min_frame_len {
            buf.resize(self.config.min_frame_len, 0);
        }
        buf
    }

    /// Sends a payload in a frame with an explicit type tag, waiting for the peer's ACK.
    pub async fn send_typed(&self, frame_type: FrameType, payload: &[u8]) -> anyhow::Result<()> {
        if frame_type == FrameType::Ack {
            bail!("ACK frames are generated by the link layer");
        }
        let handle = self.handle()?;
        let frame = self.build_frame(frame_type, payload);

        let _in_flight = self.in_flight.lock().await;

        trace!("sending {:?} frame with {} payload bytes to {:?}", frame_type, payload.len(), self.config.peer_addr);

        // NB: the flag is cleared before transmitting so that an early ACK can not be missed
        self.ack.reset().await;
        handle.send_down(&frame).await?;

        match self.config.ack_policy {
            AckPolicy::WaitIndefinitely => {
                self.ack.wait().await;
            }
            AckPolicy::Retransmit { timeout, max_retransmits } => {
                let mut num_retransmits = 0;
                while time::timeout(timeout, self.ack.wait()).await.is_err() {
                    if num_retransmits == max_retransmits {
                        error!("no ACK from {:?} after {} attempts - giving up", self.config.peer_addr, num_retransmits + 1);
                        return Err(SendError::DeliveryFailed { attempts: num_retransmits + 1 }.into());
                    }
                    num_retransmits += 1;
                    warn!("no ACK from {:?} after {:?} - re-sending frame (retransmit #{})", self.config.peer_addr, timeout, num_retransmits);
                    self.counters.retransmissions.fetch_add(1, Ordering::Relaxed);
                    handle.send_down(&frame).await?;
                }
            }
        }

        trace!("frame to {:?} acknowledged", self.config.peer_addr);
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// NB: ACKs go straight to the layer below rather than through `send_typed`, they are not
    ///      acknowledged themselves
    async fn send_ack(&self, handle: &LayerHandle) -> anyhow::Result<()> {
        let frame = self.build_frame(FrameType::Ack, &[]);
        handle.send_down(&frame).await?;
        self.counters.acks_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_receivable(&self, header: &FrameHeader) -> bool {
        if header.src == self.config.self_addr {
            trace!("dropping frame sent by this node");
            return false;
        }
        if header.dst.is_broadcast() || header.dst == self.config.self_addr {
            return true;
        }
        trace!("dropping frame for {:?}", header.dst);
        false
    }

    async fn do_receive(&self, frame: &[u8]) -> anyhow::Result<()> {
        let handle = self.handle()?;

        let mut parse_buf = frame;
        let header = match FrameHeader::deser(&mut parse_buf) {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping frame: {}", e);
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        };

        if !self.is_receivable(&header) {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        match header.frame_type() {
            Some(frame_type @ (FrameType::Chat | FrameType::File)) => {
                trace!("received {:?} frame from {:?} with {} bytes", frame_type, header.src, parse_buf.len());
                self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

                // NB: CHAT and FILE share the upper layer at index 0
                if let Err(e) = handle.deliver_up(0, parse_buf).await {
                    warn!("error passing {:?} frame up: {}", frame_type, e);
                }
                self.send_ack(handle).await?;
            }
            Some(FrameType::Ack) => {
                trace!("received ACK from {:?}", header.src);
                self.counters.acks_received.fetch_add(1, Ordering::Relaxed);
                self.ack.signal().await;
            }
            None => {
                debug!("dropping frame of unknown type {:#06x}", header.raw_frame_type);
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Layer for LinkLayer {
    async fn attach(&self, handle: LayerHandle) {
        if self.handle.set(handle).is_err() {
            warn!("link layer is already attached");
        }
    }

    async fn send(&self, buf: &[u8]) -> anyhow::Result<()> {
        self.send_typed(self.config.outgoing_type, buf).await
    }

    async fn receive(&self, buf: &[u8]) -> anyhow::Result<()> {
        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "frame_received", ?correlation_id);
        self.do_receive(buf)
            .instrument(span)
            .await
    }
}
