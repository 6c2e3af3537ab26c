use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::ReassemblyError;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum FragmentKind {
    /// The message fits into a single fragment
    Unfragmented = 0x00,
    First = 0x01,
    Middle = 0x02,
    Last = 0x03,
}

/// The largest total length that fits into the two-byte base-128 length field
pub const MAX_TOTAL_LEN: usize = 255 * 128 + 127;

/// NB: The total length is split in base 128, not 256, with the *low* part first. This is
///      a wire format detail that peers rely on.
pub fn encode_total_len(total_len: u16) -> [u8; 2] {
    [(total_len % 128) as u8, (total_len / 128) as u8]
}

pub fn decode_total_len(raw: [u8; 2]) -> u16 {
    raw[1] as u16 * 128 + raw[0] as u16
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentHeader {
    /// length of the complete message, repeated in every fragment
    pub total_len: u16,
    pub kind: FragmentKind,
}

impl FragmentHeader {
    pub const SERIALIZED_LEN: usize = 4;

    const RESERVED: u8 = 0;

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(&encode_total_len(self.total_len));
        buf.put_u8(self.kind.into());
        buf.put_u8(Self::RESERVED);
    }

    pub fn deser(buf: &mut impl Buf) -> Result<FragmentHeader, ReassemblyError> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            return Err(ReassemblyError::TruncatedHeader { len: buf.remaining() });
        }
        let total_len = decode_total_len([buf.get_u8(), buf.get_u8()]);
        let raw_kind = buf.get_u8();
        let _reserved = buf.get_u8();

        let kind = FragmentKind::try_from(raw_kind)
            .map_err(|_| ReassemblyError::UnknownFragmentKind(raw_kind))?;

        Ok(FragmentHeader { total_len, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_total_len_round_trip() {
        for len in 0..=MAX_TOTAL_LEN as u16 {
            let encoded = encode_total_len(len);
            assert!(encoded[0] < 128);
            assert_eq!(decode_total_len(encoded), len);
        }
    }

    #[rstest]
    #[case::zero(0, [0, 0])]
    #[case::small(23, [23, 0])]
    #[case::boundary(127, [127, 0])]
    #[case::one_high(128, [0, 1])]
    #[case::mixed(300, [44, 2])]
    #[case::max(32767, [127, 255])]
    fn test_encode_total_len(#[case] len: u16, #[case] expected: [u8; 2]) {
        assert_eq!(encode_total_len(len), expected);
    }

    #[rstest]
    #[case::unfragmented(5, FragmentKind::Unfragmented, vec![5,0,0,0])]
    #[case::first(23, FragmentKind::First, vec![23,0,1,0])]
    #[case::middle(23, FragmentKind::Middle, vec![23,0,2,0])]
    #[case::last(300, FragmentKind::Last, vec![44,2,3,0])]
    fn test_ser(#[case] total_len: u16, #[case] kind: FragmentKind, #[case] expected: Vec<u8>) {
        let header = FragmentHeader { total_len, kind };

        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &buf;
        assert_eq!(FragmentHeader::deser(&mut b), Ok(header));
        assert!(b.is_empty());
    }

    #[rstest]
    #[case::empty(vec![], ReassemblyError::TruncatedHeader { len: 0 })]
    #[case::three_bytes(vec![1,0,0], ReassemblyError::TruncatedHeader { len: 3 })]
    #[case::unknown_kind(vec![1,0,4,0], ReassemblyError::UnknownFragmentKind(4))]
    #[case::unknown_kind_high(vec![1,0,0xff,0,1,2], ReassemblyError::UnknownFragmentKind(0xff))]
    fn test_deser_invalid(#[case] raw: Vec<u8>, #[case] expected: ReassemblyError) {
        let mut b: &[u8] = &raw;
        assert_eq!(FragmentHeader::deser(&mut b), Err(expected));
    }

    #[test]
    fn test_deser_ignores_reserved_byte() {
        let mut b: &[u8] = &[10, 0, 0, 0x7f, 9];
        let header = FragmentHeader::deser(&mut b).unwrap();
        assert_eq!(header, FragmentHeader { total_len: 10, kind: FragmentKind::Unfragmented });
        assert_eq!(b, &[9]);
    }
}
