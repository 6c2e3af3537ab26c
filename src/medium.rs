use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tracing::{trace, warn};

use crate::layer::{Layer, LayerHandle};

/// This is an abstraction for putting raw frames on the wire (a raw socket, a shared bus,
///  a simulator), introduced to keep the link layer independent of the actual medium and to
///  facilitate mocking the I/O part away for testing.
///
/// Frames arriving from the medium are passed to the [PhysicalLayer]'s `receive`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Medium: Send + Sync + 'static {
    async fn transmit(&self, frame: &[u8]) -> anyhow::Result<()>;
}

/// The bottom of a layer stack: it sends frames from the layer above to the medium, and it
///  delivers frames from the medium to the layer above (at index 0).
pub struct PhysicalLayer {
    medium: Arc<dyn Medium>,
    handle: OnceLock<LayerHandle>,
}

impl PhysicalLayer {
    pub fn new(medium: Arc<dyn Medium>) -> PhysicalLayer {
        PhysicalLayer {
            medium,
            handle: OnceLock::new(),
        }
    }
}

#[async_trait]
impl Layer for PhysicalLayer {
    async fn attach(&self, handle: LayerHandle) {
        if self.handle.set(handle).is_err() {
            warn!("physical layer is already attached");
        }
    }

    async fn send(&self, buf: &[u8]) -> anyhow::Result<()> {
        trace!("transmitting frame with {} bytes", buf.len());
        self.medium.transmit(buf).await
    }

    async fn receive(&self, buf: &[u8]) -> anyhow::Result<()> {
        let handle = self.handle.get()
            .ok_or_else(|| anyhow!("physical layer is not attached"))?;
        handle.deliver_up(0, buf).await
    }
}
