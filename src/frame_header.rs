use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::mac_addr::MacAddr;

/// The type tag in a link layer frame. Unrecognized values are not represented here: frames
///  carrying them are dropped by the receiver.
#[repr(u16)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum FrameType {
    Chat = 0x2080,
    File = 0x2090,
    /// Acknowledges a CHAT or FILE frame. ACK frames have no payload and are never acknowledged
    ///  themselves.
    Ack = 0x1004,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    /// kept raw so that frames with unknown types can be parsed (and then discarded)
    pub raw_frame_type: u16,
}

impl FrameHeader {
    pub const SERIALIZED_LEN: usize = 2 * MacAddr::SERIALIZED_LEN + size_of::<u16>();

    pub fn new(dst: MacAddr, src: MacAddr, frame_type: FrameType) -> FrameHeader {
        FrameHeader {
            dst,
            src,
            raw_frame_type: frame_type.into(),
        }
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::try_from(self.raw_frame_type).ok()
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        self.dst.ser(buf);
        self.src.ser(buf);
        buf.put_u16(self.raw_frame_type);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<FrameHeader> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("incomplete frame header: {} bytes", buf.remaining());
        }
        let dst = MacAddr::deser(buf)?;
        let src = MacAddr::deser(buf)?;
        let raw_frame_type = buf.get_u16();
        Ok(FrameHeader {
            dst,
            src,
            raw_frame_type,
        })
    }
}
