use tracing::{debug, trace};

use crate::error::ReassemblyError;
use crate::fragment_header::{FragmentHeader, FragmentKind};

struct InProgress {
    total_len: usize,
    buffer: Vec<u8>,
    /// number of fragments inserted so far
    cursor: usize,
}

/// Reassembles inbound fragment sequences into messages. There is at most one message in
///  reassembly at any given time: a FIRST fragment discards whatever was in progress before.
///
/// Fragments on the wire may be followed by zero padding (minimum frame length of the medium).
///  Padding is removed based on the total length in the fragment header; excess bytes that are
///  *not* zero are treated as an error.
///
/// Any error discards the message in progress, so a broken sequence can never leak into the
///  next message.
pub struct Reassembler {
    fragment_size: usize,
    in_progress: Option<InProgress>,
}

impl Reassembler {
    pub fn new(fragment_size: usize) -> Reassembler {
        Reassembler {
            fragment_size,
            in_progress: None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Handles a fragment (including its header), returning the complete message if this
    ///  fragment completes one.
    pub fn on_fragment(&mut self, mut buf: &[u8]) -> Result<Option<Vec<u8>>, ReassemblyError> {
        let result = self.do_on_fragment(&mut buf);
        if result.is_err() {
            self.in_progress = None;
        }
        result
    }

    fn do_on_fragment(&mut self, buf: &mut &[u8]) -> Result<Option<Vec<u8>>, ReassemblyError> {
        let header = FragmentHeader::deser(buf)?;
        let payload: &[u8] = buf;
        let total_len = header.total_len as usize;
        trace!("received {:?} fragment with {} bytes, total length {}", header.kind, payload.len(), total_len);

        match header.kind {
            FragmentKind::Unfragmented => {
                // NB: this does not interfere with a fragmented message in progress
                let message = strip_padding(payload, total_len, 0, total_len)?;
                if message.len() != total_len {
                    return Err(ReassemblyError::SizeMismatch { expected: total_len, actual: message.len() });
                }
                Ok(Some(message.to_vec()))
            }
            FragmentKind::First => {
                if self.in_progress.is_some() {
                    debug!("FIRST fragment while a message was in progress - discarding the incomplete message");
                }
                self.in_progress = Some(InProgress {
                    total_len,
                    buffer: vec![0; total_len],
                    cursor: 0,
                });
                self.insert(FragmentKind::First, payload)?;
                Ok(None)
            }
            FragmentKind::Middle => {
                self.insert(FragmentKind::Middle, payload)?;
                Ok(None)
            }
            FragmentKind::Last => {
                let last_len = self.insert(FragmentKind::Last, payload)?;
                let in_progress = self.in_progress.take()
                    .ok_or(ReassemblyError::NoReassemblyInProgress(FragmentKind::Last))?;

                let actual = (in_progress.cursor - 1) * self.fragment_size + last_len;
                if actual != in_progress.total_len {
                    return Err(ReassemblyError::SizeMismatch { expected: in_progress.total_len, actual });
                }
                Ok(Some(in_progress.buffer))
            }
        }
    }

    /// copies a fragment's payload to its place in the buffer, returning the number of payload
    ///  bytes (without padding)
    fn insert(&mut self, kind: FragmentKind, payload: &[u8]) -> Result<usize, ReassemblyError> {
        let fragment_size = self.fragment_size;
        let in_progress = self.in_progress.as_mut()
            .ok_or(ReassemblyError::NoReassemblyInProgress(kind))?;

        let offset = in_progress.cursor * fragment_size;
        let remaining = in_progress.total_len.saturating_sub(offset);
        let expected = remaining.min(fragment_size);

        let data = strip_padding(payload, expected, offset, in_progress.total_len)?;
        if kind != FragmentKind::Last && data.len() < fragment_size {
            return Err(ReassemblyError::ShortFragment { len: data.len(), expected: fragment_size });
        }

        in_progress.buffer[offset..offset + data.len()].copy_from_slice(data);
        in_progress.cursor += 1;
        Ok(data.len())
    }
}

/// Returns the first `expected` bytes of a payload if everything after that is zero padding.
fn strip_padding(payload: &[u8], expected: usize, offset: usize, total_len: usize) -> Result<&[u8], ReassemblyError> {
    if payload.len() <= expected {
        return Ok(payload);
    }
    if payload[expected..].iter().any(|&b| b != 0) {
        return Err(ReassemblyError::Overflow { offset, len: payload.len(), total_len });
    }
    Ok(&payload[..expected])
}
