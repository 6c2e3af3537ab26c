use std::time::Duration;

use crate::fragment_header::FragmentKind;

/// Outcomes of sending a message that a caller may want to distinguish. They are returned
///  wrapped in an [anyhow::Error] and can be recovered with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("message of {len} bytes exceeds the maximum of {max} bytes")]
    MessageTooLong { len: usize, max: usize },
    #[error("outbound queue stayed full for {0:?}")]
    QueueFull(Duration),
    #[error("no acknowledgement after {attempts} transmission attempts")]
    DeliveryFailed { attempts: u32 },
    #[error("the chat layer is shut down")]
    ShutDown,
}

/// Problems with an inbound fragment sequence. These are handled inside the chat layer (logged,
///  counted and discarded) and never reach the application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    #[error("fragment of {len} bytes is too short for a fragment header")]
    TruncatedHeader { len: usize },
    #[error("unknown fragment type {0:#04x}")]
    UnknownFragmentKind(u8),
    #[error("{0:?} fragment without a preceding FIRST fragment")]
    NoReassemblyInProgress(FragmentKind),
    #[error("fragment with {len} bytes at offset {offset} exceeds the declared total length of {total_len}")]
    Overflow { offset: usize, len: usize, total_len: usize },
    #[error("non-final fragment with {len} bytes, expected {expected}")]
    ShortFragment { len: usize, expected: usize },
    #[error("reassembled {actual} bytes, but the declared total length is {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}
