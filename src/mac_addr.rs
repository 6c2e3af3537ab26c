use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut};

/// A six-byte link layer address. Addresses are configured statically per node, there is no
///  discovery.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const SERIALIZED_LEN: usize = 6;

    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn is_broadcast(&self) -> bool {
        self == &Self::BROADCAST
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<MacAddr> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("buffer too short for a MAC address: {} bytes", buf.remaining());
        }
        let mut raw = [0u8; 6];
        buf.copy_to_slice(&mut raw);
        Ok(MacAddr(raw))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(value: [u8; 6]) -> Self {
        MacAddr(value)
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl Debug for MacAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self)
    }
}

/// Parses the usual text representations, i.e. six hex pairs separated by either ':' or '-'
impl FromStr for MacAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s.split([':', '-']).collect::<Vec<_>>();
        if parts.len() != 6 {
            bail!("a MAC address needs six parts, was {:?}", s);
        }

        let mut raw = [0u8; 6];
        for (target, part) in raw.iter_mut().zip(parts) {
            if part.len() != 2 {
                bail!("invalid MAC address part {:?} in {:?}", part, s);
            }
            *target = u8::from_str_radix(part, 16)
                .map_err(|e| anyhow!("invalid MAC address part {:?} in {:?}: {}", part, s, e))?;
        }
        Ok(MacAddr(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    #[rstest]
    #[case::colons("00:1a:2b:3c:4d:5e", Some([0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]))]
    #[case::dashes("00-1A-2B-3C-4D-5E", Some([0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]))]
    #[case::broadcast("ff:ff:ff:ff:ff:ff", Some([0xff; 6]))]
    #[case::too_few_parts("00:1a:2b:3c:4d", None)]
    #[case::too_many_parts("00:1a:2b:3c:4d:5e:6f", None)]
    #[case::not_hex("00:1a:2b:3c:4d:zz", None)]
    #[case::single_digit("0:1a:2b:3c:4d:5e", None)]
    #[case::empty("", None)]
    fn test_from_str(#[case] s: &str, #[case] expected: Option<[u8; 6]>) {
        let parsed = MacAddr::from_str(s).ok();
        assert_eq!(parsed, expected.map(MacAddr));
    }

    #[test]
    fn test_display() {
        let addr = MacAddr([0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e]);
        assert_eq!(addr.to_string(), "00:1a:2b:3c:4d:5e");
        assert_eq!(format!("{:?}", addr), "[00:1a:2b:3c:4d:5e]");
        assert_eq!(MacAddr::from_str(&addr.to_string()).unwrap(), addr);
    }

    #[test]
    fn test_is_broadcast() {
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(!MacAddr([0xff, 0xff, 0xff, 0xff, 0xff, 0xfe]).is_broadcast());
    }

    #[test]
    fn test_ser_deser() {
        let addr = MacAddr([1, 2, 3, 4, 5, 6]);
        let mut buf = BytesMut::new();
        addr.ser(&mut buf);
        assert_eq!(buf.as_ref(), &[1, 2, 3, 4, 5, 6]);

        let mut b: &[u8] = &[1, 2, 3, 4, 5, 6, 7];
        assert_eq!(MacAddr::deser(&mut b).unwrap(), addr);
        assert_eq!(b, &[7]);

        let mut short: &[u8] = &[1, 2, 3];
        assert!(MacAddr::deser(&mut short).is_err());
    }
}
