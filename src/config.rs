use std::time::Duration;

use anyhow::bail;

use crate::fragment_header::MAX_TOTAL_LEN;
use crate::frame_header::FrameType;
use crate::mac_addr::MacAddr;

/// What the link layer does while it waits for the ACK of a sent frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Wait for the ACK without a time limit. A lost frame or ACK blocks the sender forever, so
    ///  this is only suitable for reliable media.
    WaitIndefinitely,
    /// Re-send the frame if no ACK arrived within `timeout`, giving up after `max_retransmits`
    ///  re-sends (i.e. after `max_retransmits + 1` transmission attempts in total).
    ///
    /// NB: There are no sequence numbers, which has two consequences:
    ///  * a receiver can not recognize a re-sent frame if it was only the ACK that got lost, and
    ///    it will process the frame twice
    ///  * if the original frame's ACK was only delayed, the ACK of the re-sent copy may arrive
    ///    after the next frame was transmitted, and it is then taken as that frame's ACK. The
    ///    sender can report success for a frame the peer never received.
    Retransmit {
        timeout: Duration,
        max_retransmits: u32,
    },
}

impl AckPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let AckPolicy::Retransmit { timeout, .. } = self {
            if timeout.is_zero() {
                bail!("ACK timeout must be positive");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// The node's own address. It is sent as the source of every frame, and it is used for
    ///  filtering received frames: frames sent from this address are dropped (a shared medium
    ///  echoes everything back), and only frames sent to this address or broadcast are accepted.
    pub self_addr: MacAddr,

    /// The address that all frames are sent to, including ACKs. Since ACKs go to this address
    ///  rather than to the sender of the acknowledged frame, a link layer can only talk to a
    ///  single peer.
    pub peer_addr: MacAddr,

    /// The type tag for frames passed down from the layers above
    pub outgoing_type: FrameType,

    pub ack_policy: AckPolicy,

    /// Outgoing frames are zero-padded to this length. Ethernet requires 60 bytes (without the
    ///  checksum), 0 means no padding.
    pub min_frame_len: usize,
}

impl LinkConfig {
    pub const ETHERNET_MIN_FRAME_LEN: usize = 60;

    pub fn new(self_addr: MacAddr, peer_addr: MacAddr) -> LinkConfig {
        LinkConfig {
            self_addr,
            peer_addr,
            outgoing_type: FrameType::Chat,
            ack_policy: AckPolicy::WaitIndefinitely,
            min_frame_len: Self::ETHERNET_MIN_FRAME_LEN,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.self_addr.is_broadcast() {
            bail!("the broadcast address can not be a node's own address");
        }
        if self.self_addr == self.peer_addr {
            bail!("peer address {} is the node's own address", self.peer_addr);
        }
        if self.outgoing_type == FrameType::Ack {
            bail!("ACK frames are generated by the link layer and can not be the outgoing frame type");
        }
        self.ack_policy.validate()
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// maximum number of payload bytes per fragment
    pub fragment_size: usize,

    /// This is the number of messages that can be queued for sending. Sending a message while
    ///  the queue is full blocks the caller until the sender loop takes a message from the queue.
    pub queue_capacity: usize,

    /// If this is set, sending fails if the queue stays full for this long. Otherwise the caller
    ///  waits as long as it takes.
    pub enqueue_timeout: Option<Duration>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            fragment_size: Self::DEFAULT_FRAGMENT_SIZE,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: None,
        }
    }
}

impl ChatConfig {
    pub const DEFAULT_FRAGMENT_SIZE: usize = 10;
    pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fragment_size == 0 {
            bail!("fragment size must be positive");
        }
        if self.fragment_size > MAX_TOTAL_LEN {
            bail!("fragment size {} exceeds the maximum message length {}", self.fragment_size, MAX_TOTAL_LEN);
        }
        if self.queue_capacity == 0 {
            bail!("queue capacity must be positive");
        }
        if let Some(timeout) = self.enqueue_timeout {
            if timeout.is_zero() {
                bail!("enqueue timeout must be positive");
            }
        }
        Ok(())
    }
}
