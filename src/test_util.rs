use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::layer::{Layer, LayerHandle};
use crate::medium::Medium;

/// A layer that records everything it gets from above and from below. Sends succeed (which is
///  as good as an immediate ACK) unless the layer was created with [RecordingLayer::failing].
#[derive(Default)]
pub struct RecordingLayer {
    fail_sends: bool,
    handle: RwLock<Option<LayerHandle>>,
    sent: RwLock<Vec<Vec<u8>>>,
    received: RwLock<Vec<Vec<u8>>>,
}

impl RecordingLayer {
    pub fn new() -> RecordingLayer {
        Default::default()
    }

    /// records sent bytes, but reports every send as failed
    pub fn failing() -> RecordingLayer {
        RecordingLayer {
            fail_sends: true,
            ..Default::default()
        }
    }

    pub async fn handle(&self) -> Option<LayerHandle> {
        self.handle.read().await.clone()
    }

    pub async fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.read().await.clone()
    }

    pub async fn received(&self) -> Vec<Vec<u8>> {
        self.received.read().await.clone()
    }
}

#[async_trait]
impl Layer for RecordingLayer {
    async fn attach(&self, handle: LayerHandle) {
        *self.handle.write().await = Some(handle);
    }

    async fn send(&self, buf: &[u8]) -> anyhow::Result<()> {
        self.sent.write().await.push(buf.to_vec());
        if self.fail_sends {
            bail!("simulated send failure");
        }
        Ok(())
    }

    async fn receive(&self, buf: &[u8]) -> anyhow::Result<()> {
        self.received.write().await.push(buf.to_vec());
        Ok(())
    }
}

/// A medium that records transmitted frames without delivering them anywhere
#[derive(Default)]
pub struct RecordingMedium {
    frames: RwLock<Vec<Vec<u8>>>,
}

impl RecordingMedium {
    pub fn new() -> RecordingMedium {
        Default::default()
    }

    /// all frames transmitted so far
    pub async fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.read().await.clone()
    }
}

#[async_trait]
impl Medium for RecordingMedium {
    async fn transmit(&self, frame: &[u8]) -> anyhow::Result<()> {
        self.frames.write().await.push(frame.to_vec());
        Ok(())
    }
}
