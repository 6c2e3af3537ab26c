//! A small layered protocol stack that carries chat messages over a shared broadcast medium,
//!  using Ethernet-style framing.
//!
//! The stack is built from [layer::Layer]s that are composed bottom-up into a
//!  [layer::LayerGraph]. Each layer only knows its immediate neighbors: exactly one layer below
//!  it, and an ordered list of layers above it. A typical node looks like this:
//!
//! ```ascii
//!   ApplicationLayer   (hands complete messages to a MessageSink)
//!          |
//!      ChatLayer       (fragmentation, reassembly, bounded send queue)
//!          |
//!      LinkLayer       (addressing, filtering, stop-and-wait ACK)
//!          |
//!    PhysicalLayer     (adapter to a Medium, e.g. a SharedBus)
//! ```
//!
//! ## Link layer frames
//!
//! All numbers in network byte order (BE):
//!
//! ```ascii
//!  0: destination address (6 bytes), ff:ff:ff:ff:ff:ff for broadcast
//!  6: source address (6 bytes)
//! 12: frame type (u16):
//!     * 0x2080 CHAT
//!     * 0x2090 FILE
//!     * 0x1004 ACK (no payload)
//!     * anything else is dropped by the receiver
//! 14: payload
//! ```
//!
//! Frames shorter than the medium's minimum frame length (60 bytes for Ethernet) are padded
//!  with zeros. The link layer does not know the payload's length, so padding is passed up
//!  and removed by the chat layer based on its header.
//!
//! Every CHAT or FILE frame is acknowledged by the receiver with an ACK frame, and the sender
//!  does not send the next frame before it received the ACK for the previous one. By default
//!  the sender waits indefinitely; a timeout with a bounded number of retransmissions can be
//!  configured (see [config::AckPolicy]).
//!
//! NB: ACKs are sent to the *configured* peer address rather than to the frame's source
//!      address, which restricts a link to exactly two nodes.
//!
//! ## Chat fragments
//!
//! ```ascii
//! 0: total message length modulo 128 (u8)
//! 1: total message length divided by 128 (u8)
//! 2: fragment type (u8):
//!    * 0x00 unfragmented message
//!    * 0x01 first fragment
//!    * 0x02 middle fragment
//!    * 0x03 last fragment
//! 3: reserved, 0
//! 4: fragment payload, up to `fragment_size` bytes (10 by default)
//! ```
//!
//! The length encoding limits messages to 255 * 128 + 127 = 32767 bytes.

pub mod application;
pub mod chat_layer;
pub mod config;
pub mod error;
pub mod fragment_header;
pub mod fragmentation;
pub mod frame_header;
pub mod layer;
pub mod link_layer;
pub mod mac_addr;
pub mod medium;
pub mod reassembly;
pub mod shared_bus;

#[cfg(test)]
mod test_util;
