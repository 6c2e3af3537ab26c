use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::select;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::ChatConfig;
use crate::error::SendError;
use crate::fragment_header::MAX_TOTAL_LEN;
use crate::fragmentation::fragments;
use crate::layer::{Layer, LayerHandle};
use crate::reassembly::Reassembler;

struct OutboundMessage {
    payload: Vec<u8>,
    /// for callers that want to know when (and if) the message was delivered
    outcome: Option<oneshot::Sender<anyhow::Result<()>>>,
}

/// The chat layer sends messages of up to [MAX_TOTAL_LEN] bytes, splitting them into
///  fragments that are small enough for a single frame each.
///
/// Sending is decoupled from the caller: messages are put into a bounded queue, and a
///  dedicated sender loop takes them from there one at a time, passing their fragments to the
///  layer below. Since the link layer below waits for an ACK for every frame, sending a
///  fragmented message takes one round trip per fragment; the queue absorbs this, and only
///  when it is full do callers have to wait.
///
/// Received fragments are reassembled, and complete messages are passed to the layer above
///  (at index 0) in the order they were completed.
pub struct ChatLayer {
    config: Arc<ChatConfig>,
    handle: OnceLock<LayerHandle>,
    reassembler: Mutex<Reassembler>,
    reassembly_errors: AtomicU64,
    /// `None` after shutdown
    queue: RwLock<Option<mpsc::Sender<OutboundMessage>>>,
    /// handed over to the sender loop when the layer is attached
    queue_receiver: Mutex<Option<mpsc::Receiver<OutboundMessage>>>,
    sender_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_signal: Arc<Notify>,
}

impl Drop for ChatLayer {
    fn drop(&mut self) {
        if let Some(handle) = self.sender_handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl ChatLayer {
    pub fn new(config: Arc<ChatConfig>) -> anyhow::Result<ChatLayer> {
        config.validate()?;

        let (queue, queue_receiver) = mpsc::channel(config.queue_capacity);
        Ok(ChatLayer {
            reassembler: Mutex::new(Reassembler::new(config.fragment_size)),
            config,
            handle: OnceLock::new(),
            reassembly_errors: AtomicU64::new(0),
            queue: RwLock::new(Some(queue)),
            queue_receiver: Mutex::new(Some(queue_receiver)),
            sender_handle: Mutex::new(None),
            shutdown_signal: Arc::new(Notify::new()),
        })
    }

    /// the number of fragments that were discarded because they did not fit into a valid
    ///  fragment sequence
    pub fn reassembly_errors(&self) -> u64 {
        self.reassembly_errors.load(Ordering::Relaxed)
    }

    /// Puts a message into the send queue, waiting for room in the queue if necessary. This
    ///  returns as soon as the message is queued, before it is sent.
    pub async fn enqueue(&self, message: &[u8]) -> anyhow::Result<()> {
        self.do_enqueue(message, None).await
    }

    /// Sends a message and waits until all its fragments were acknowledged, or sending them
    ///  failed.
    pub async fn send_confirmed(&self, message: &[u8]) -> anyhow::Result<()> {
        let (outcome_sender, outcome_receiver) = oneshot::channel();
        self.do_enqueue(message, Some(outcome_sender)).await?;

        match outcome_receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(SendError::ShutDown.into()),
        }
    }

    async fn do_enqueue(&self, message: &[u8], outcome: Option<oneshot::Sender<anyhow::Result<()>>>) -> anyhow::Result<()> {
        if message.len() > MAX_TOTAL_LEN {
            debug!("rejecting message with {} bytes", message.len());
            return Err(SendError::MessageTooLong { len: message.len(), max: MAX_TOTAL_LEN }.into());
        }

        let queue = self.queue.read().await
            .clone()
            .ok_or(SendError::ShutDown)?;

        let outbound = OutboundMessage {
            payload: message.to_vec(),
            outcome,
        };

        match self.config.enqueue_timeout {
            None => {
                queue.send(outbound).await
                    .map_err(|_| SendError::ShutDown)?;
            }
            Some(timeout) => {
                match queue.send_timeout(outbound, timeout).await {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(_)) => {
                        debug!("send queue full for {:?} - rejecting message", timeout);
                        return Err(SendError::QueueFull(timeout).into());
                    }
                    Err(SendTimeoutError::Closed(_)) => return Err(SendError::ShutDown.into()),
                }
            }
        }
        trace!("queued message with {} bytes", message.len());
        Ok(())
    }

    async fn sender_loop(config: Arc<ChatConfig>, handle: LayerHandle, mut queue: mpsc::Receiver<OutboundMessage>, shutdown_signal: Arc<Notify>) {
        debug!("starting chat sender loop");

        loop {
            let message = select! {
                biased;
                _ = shutdown_signal.notified() => break,
                message = queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            // NB: waiting for an ACK can take forever, so the message in progress is abandoned
            //      on shutdown
            let (result, shut_down) = select! {
                biased;
                _ = shutdown_signal.notified() => {
                    warn!("shutting down while sending a chat message with {} bytes - abandoning it", message.payload.len());
                    (Err(anyhow::Error::from(SendError::ShutDown)), true)
                }
                result = Self::send_fragmented(&config, &handle, &message.payload) => (result, false),
            };

            if let (Err(e), false) = (&result, shut_down) {
                error!("error sending chat message with {} bytes: {}", message.payload.len(), e);
            }
            if let Some(outcome) = message.outcome {
                // NB: the caller may have stopped waiting
                let _ = outcome.send(result);
            }
            if shut_down {
                break;
            }
        }

        // messages still in the queue are dropped here, their senders are notified through
        //  the closed outcome channel
        debug!("chat sender loop terminated");
    }

    /// NB: Each fragment is sent only after the previous one was acknowledged by the layer below
    async fn send_fragmented(config: &ChatConfig, handle: &LayerHandle, message: &[u8]) -> anyhow::Result<()> {
        for fragment in fragments(message, config.fragment_size)? {
            trace!("sending {:?} fragment with {} bytes", fragment.header.kind, fragment.payload.len());
            handle.send_down(&fragment.to_bytes()).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Layer for ChatLayer {
    async fn attach(&self, handle: LayerHandle) {
        if self.handle.set(handle.clone()).is_err() {
            warn!("chat layer is already attached");
            return;
        }

        let Some(queue_receiver) = self.queue_receiver.lock().await.take() else {
            warn!("chat sender loop already spawned");
            return;
        };
        let sender = tokio::spawn(Self::sender_loop(self.config.clone(), handle, queue_receiver, self.shutdown_signal.clone()));
        *self.sender_handle.lock().await = Some(sender);
    }

    async fn send(&self, buf: &[u8]) -> anyhow::Result<()> {
        self.enqueue(buf).await
    }

    async fn receive(&self, buf: &[u8]) -> anyhow::Result<()> {
        let handle = self.handle.get()
            .ok_or_else(|| anyhow!("chat layer is not attached"))?;

        // NB: the lock is held while passing a message up so that messages are passed up in
        //      the order in which they were completed
        let mut reassembler = self.reassembler.lock().await;
        match reassembler.on_fragment(buf) {
            Ok(Some(message)) => {
                debug!("received chat message with {} bytes", message.len());
                handle.deliver_up(0, &message).await
            }
            Ok(None) => Ok(()),
            Err(e) => {
                self.reassembly_errors.fetch_add(1, Ordering::Relaxed);
                warn!("discarding chat fragment: {}", e);
                Ok(())
            }
        }
    }

    /// Stops accepting messages and stops the sender loop. A message that is currently being
    ///  sent is abandoned (fragments may already be on the wire), and messages that are still
    ///  queued are discarded. Callers of `send_confirmed` get [SendError::ShutDown] for both.
    async fn shutdown(&self) {
        self.queue.write().await.take();
        self.shutdown_signal.notify_one();

        if let Some(sender) = self.sender_handle.lock().await.take() {
            if let Err(e) = sender.await {
                warn!("chat sender loop terminated abnormally: {}", e);
            }
        }
        info!("chat layer shut down");
    }
}
