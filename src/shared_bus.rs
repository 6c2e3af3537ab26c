use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::layer::{LayerId, LayerStack};
use crate::medium::Medium;

/// An in-process broadcast medium: every frame transmitted through any port is received by all
///  ports, including the sending port itself (like a hub, or a raw socket that sees its own
///  frames). Filtering is the link layer's job.
///
/// Frames are buffered per port up to the bus's capacity. A port that falls further behind
///  loses the oldest frames.
pub struct SharedBus {
    frames: broadcast::Sender<Bytes>,
}

impl SharedBus {
    pub fn new(capacity: usize) -> SharedBus {
        let (frames, _) = broadcast::channel(capacity);
        SharedBus { frames }
    }

    /// Connects a new port to the bus. The port receives all frames transmitted after this call.
    pub fn port(&self) -> Arc<BusPort> {
        Arc::new(BusPort {
            frames: self.frames.clone(),
            receiver: std::sync::Mutex::new(Some(self.frames.subscribe())),
        })
    }
}

pub struct BusPort {
    frames: broadcast::Sender<Bytes>,
    receiver: std::sync::Mutex<Option<broadcast::Receiver<Bytes>>>,
}

impl BusPort {
    /// Spawns a task that passes every frame arriving at this port to a layer of a started
    ///  stack, typically its [crate::medium::PhysicalLayer]. The task terminates with the
    ///  first frame arriving after the stack was dropped, or when it is aborted through the
    ///  returned handle.
    ///
    /// This can be called only once per port.
    pub fn spawn_delivery(&self, stack: &LayerStack, target: LayerId) -> anyhow::Result<JoinHandle<()>> {
        let receiver = match self.receiver.lock() {
            Ok(mut receiver) => receiver.take(),
            Err(_) => anyhow::bail!("bus port lock is poisoned"),
        };
        let Some(mut receiver) = receiver else {
            anyhow::bail!("delivery for this bus port was already spawned");
        };

        let handle = stack.handle(target);
        Ok(tokio::spawn(async move {
            debug!("starting delivery loop for {:?}", handle);
            loop {
                match receiver.recv().await {
                    Ok(frame) => {
                        if handle.is_detached() {
                            break;
                        }
                        if let Err(e) = handle.receive(&frame).await {
                            warn!("error delivering frame with {} bytes: {}", frame.len(), e);
                        }
                    }
                    Err(RecvError::Lagged(num_lost)) => {
                        warn!("bus port fell behind, {} frames were lost", num_lost);
                    }
                    Err(RecvError::Closed) => {
                        debug!("bus was closed");
                        break;
                    }
                }
            }
            debug!("delivery loop terminated");
        }))
    }
}

#[async_trait]
impl Medium for BusPort {
    async fn transmit(&self, frame: &[u8]) -> anyhow::Result<()> {
        trace!("transmitting {} bytes on shared bus", frame.len());
        // sending fails only if there are no receivers, which is not an error for a shared medium
        let _ = self.frames.send(Bytes::copy_from_slice(frame));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerGraph;
    use crate::test_util::RecordingLayer;
    use std::time::Duration;
    use tokio::time;

    async fn node(bus: &SharedBus) -> (LayerStack, Arc<BusPort>, Arc<RecordingLayer>, JoinHandle<()>) {
        let port = bus.port();
        let layer = Arc::new(RecordingLayer::new());
        let mut graph = LayerGraph::new();
        let id = graph.add_layer("NI", layer.clone());
        let stack = graph.start().await;
        let delivery = port.spawn_delivery(&stack, id).unwrap();
        (stack, port, layer, delivery)
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_to_all_ports() {
        let bus = SharedBus::new(16);
        let (_stack_a, port_a, layer_a, _) = node(&bus).await;
        let (_stack_b, _port_b, layer_b, _) = node(&bus).await;

        port_a.transmit(&[1, 2, 3]).await.unwrap();
        port_a.transmit(&[4]).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;

        // the sender sees its own frames
        assert_eq!(layer_a.received().await, vec![vec![1, 2, 3], vec![4]]);
        assert_eq!(layer_b.received().await, vec![vec![1, 2, 3], vec![4]]);
    }

    #[tokio::test]
    async fn test_transmit_without_receivers() {
        let bus = SharedBus::new(4);
        let port = bus.port();
        port.transmit(&[1]).await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_delivery_only_once() {
        let bus = SharedBus::new(4);
        let (stack, port, _, _) = node(&bus).await;
        assert!(port.spawn_delivery(&stack, stack.graph().find("NI").unwrap()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_ends_when_stack_is_dropped() {
        let bus = SharedBus::new(4);
        let (stack, port, _, delivery) = node(&bus).await;

        drop(stack);
        port.transmit(&[1]).await.unwrap();

        time::timeout(Duration::from_millis(10), delivery).await
            .expect("delivery loop should terminate")
            .unwrap();
    }
}
