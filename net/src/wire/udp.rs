//! UDP Layer
//!
//! Minimal datagram codec — just enough to carry DHCP on ports 67/68.
//! The checksum is optional in IPv4 and this simulator transmits it as
//! zero (disabled), the same convention real DHCP clients use.

use crate::WireError;

/// UDP header size.
pub const HEADER_SIZE: usize = 8;

/// DHCP server port.
pub const PORT_DHCP_SERVER: u16 = 67;
/// DHCP client port.
pub const PORT_DHCP_CLIENT: u16 = 68;

/// A UDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

impl UdpDatagram {
    /// Construct a datagram.
    pub fn new(src_port: u16, dst_port: u16, payload: Vec<u8>) -> Self {
        UdpDatagram {
            src_port,
            dst_port,
            payload,
        }
    }

    /// Serialize; length covers header + payload, checksum is zero.
    pub fn encode(&self) -> Vec<u8> {
        let length = (HEADER_SIZE + self.payload.len()) as u16;
        let mut raw = Vec::with_capacity(length as usize);
        raw.extend_from_slice(&self.src_port.to_be_bytes());
        raw.extend_from_slice(&self.dst_port.to_be_bytes());
        raw.extend_from_slice(&length.to_be_bytes());
        raw.extend_from_slice(&[0, 0]); // checksum disabled
        raw.extend_from_slice(&self.payload);
        raw
    }

    /// Parse raw bytes (after the IPv4 header) into a datagram.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < HEADER_SIZE {
            return Err(WireError::Truncated);
        }
        let length = u16::from_be_bytes([raw[4], raw[5]]) as usize;
        if length < HEADER_SIZE || length > raw.len() {
            return Err(WireError::Truncated);
        }
        Ok(UdpDatagram {
            src_port: u16::from_be_bytes([raw[0], raw[1]]),
            dst_port: u16::from_be_bytes([raw[2], raw[3]]),
            payload: raw[HEADER_SIZE..length].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dgram = UdpDatagram::new(PORT_DHCP_CLIENT, PORT_DHCP_SERVER, vec![1, 2, 3]);
        assert_eq!(UdpDatagram::decode(&dgram.encode()).unwrap(), dgram);
    }

    #[test]
    fn test_length_field() {
        let raw = UdpDatagram::new(68, 67, vec![0xAB; 10]).encode();
        assert_eq!(u16::from_be_bytes([raw[4], raw[5]]), 18);
        assert_eq!(&raw[6..8], &[0, 0]);
    }

    #[test]
    fn test_decode_cuts_at_length() {
        // IPv4 padding past the UDP length must not leak into the payload.
        let mut raw = UdpDatagram::new(68, 67, vec![7; 4]).encode();
        raw.extend_from_slice(&[0xEE; 20]);
        let dgram = UdpDatagram::decode(&raw).unwrap();
        assert_eq!(dgram.payload, vec![7; 4]);
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let mut raw = UdpDatagram::new(68, 67, vec![7; 4]).encode();
        raw[5] = 0xFF; // length beyond the buffer
        assert_eq!(UdpDatagram::decode(&raw), Err(WireError::Truncated));
        assert_eq!(UdpDatagram::decode(&raw[..6]), Err(WireError::Truncated));
    }
}
