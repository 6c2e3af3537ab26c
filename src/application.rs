use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::layer::{Layer, LayerHandle};

/// Application code implements this to receive complete messages from the top of a stack
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    async fn on_message(&self, message: &[u8]);
}

/// The top of a layer stack. Messages sent through it are passed to the layer below unchanged,
///  and everything the layer below passes up goes to the [MessageSink].
pub struct ApplicationLayer {
    sink: Arc<dyn MessageSink>,
    handle: OnceLock<LayerHandle>,
}

impl ApplicationLayer {
    pub fn new(sink: Arc<dyn MessageSink>) -> ApplicationLayer {
        ApplicationLayer {
            sink,
            handle: OnceLock::new(),
        }
    }
}

#[async_trait]
impl Layer for ApplicationLayer {
    async fn attach(&self, handle: LayerHandle) {
        if self.handle.set(handle).is_err() {
            warn!("application layer is already attached");
        }
    }

    async fn send(&self, buf: &[u8]) -> anyhow::Result<()> {
        self.handle.get()
            .ok_or_else(|| anyhow!("application layer is not attached"))?
            .send_down(buf).await
    }

    async fn receive(&self, buf: &[u8]) -> anyhow::Result<()> {
        self.sink.on_message(buf).await;
        Ok(())
    }
}

/// A [MessageSink] that forwards messages to a channel, for application code that prefers
///  pulling messages over being called back
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSink {
    pub fn new() -> (ChannelSink, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelSink { sender }, receiver)
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn on_message(&self, message: &[u8]) {
        if self.sender.send(message.to_vec()).is_err() {
            debug!("message receiver was dropped - discarding message with {} bytes", message.len());
        }
    }
}
