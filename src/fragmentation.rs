use bytes::{BufMut, BytesMut};

use crate::error::SendError;
use crate::fragment_header::{FragmentHeader, FragmentKind, MAX_TOTAL_LEN};

/// A slice of an outbound message together with the header that precedes it on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub header: FragmentHeader,
    pub payload: &'a [u8],
}

impl Fragment<'_> {
    pub fn ser(&self, buf: &mut BytesMut) {
        self.header.ser(buf);
        buf.put_slice(self.payload);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FragmentHeader::SERIALIZED_LEN + self.payload.len());
        self.ser(&mut buf);
        buf
    }
}

/// Splits a message into fragments of `fragment_size` bytes:
///
/// * a message of up to `fragment_size` bytes (including an empty message) is sent as a single
///   unfragmented fragment
/// * longer messages are sent as a FIRST fragment, zero or more MIDDLE fragments and a LAST
///   fragment. All but the LAST fragment carry exactly `fragment_size` bytes, the LAST fragment
///   carries the remaining 1 to `fragment_size` bytes.
///
/// Messages longer than [MAX_TOTAL_LEN] do not fit into the header's total length field and
///  are rejected.
///
/// NB: `fragment_size` must be positive, which [crate::config::ChatConfig::validate] ensures
pub(crate) fn fragments(message: &[u8], fragment_size: usize) -> Result<Vec<Fragment<'_>>, SendError> {
    debug_assert!(fragment_size > 0, "fragment size must be positive");
    let total_len = u16::try_from(message.len())
        .ok()
        .filter(|&len| len as usize <= MAX_TOTAL_LEN)
        .ok_or(SendError::MessageTooLong { len: message.len(), max: MAX_TOTAL_LEN })?;

    if message.len() <= fragment_size {
        return Ok(vec![Fragment {
            header: FragmentHeader { total_len, kind: FragmentKind::Unfragmented },
            payload: message,
        }]);
    }

    let num_fragments = message.len().div_ceil(fragment_size);
    let fragments = message.chunks(fragment_size)
        .enumerate()
        .map(|(idx, payload)| {
            let kind = if idx == 0 {
                FragmentKind::First
            }
            else if idx == num_fragments - 1 {
                FragmentKind::Last
            }
            else {
                FragmentKind::Middle
            };
            Fragment {
                header: FragmentHeader { total_len, kind },
                payload,
            }
        })
        .collect();
    Ok(fragments)
}
