//! ARP — Address Resolution Protocol (RFC 826)
//!
//! The fixed 28-byte Ethernet/IPv4 layout. A request carries an all-zero
//! target MAC; a gratuitous ARP is a request whose sender and target IP
//! match.

use crate::addr::{Ipv4Addr, MacAddress};
use crate::WireError;

// ── ARP constants ───────────────────────────────────────────

const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;
const HLEN: u8 = 6; // MAC address length
const PLEN: u8 = 4; // IPv4 address length

/// ARP packet size (for Ethernet + IPv4).
pub const ARP_PACKET_SIZE: usize = 28;

/// ARP operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOperation {
    Request,
    Reply,
}

impl ArpOperation {
    /// The wire value.
    pub const fn value(self) -> u16 {
        match self {
            ArpOperation::Request => 1,
            ArpOperation::Reply => 2,
        }
    }

    fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(ArpOperation::Request),
            2 => Some(ArpOperation::Reply),
            _ => None,
        }
    }
}

// ── Packet ──────────────────────────────────────────────────

/// An ARP request or reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOperation,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Build a request; the target MAC is unknown and therefore zero.
    pub fn request(sender_mac: MacAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        ArpPacket {
            operation: ArpOperation::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddress::ZERO,
            target_ip,
        }
    }

    /// Build a reply, mirroring the requester in the target fields.
    pub fn reply(
        sender_mac: MacAddress,
        sender_ip: Ipv4Addr,
        target_mac: MacAddress,
        target_ip: Ipv4Addr,
    ) -> Self {
        ArpPacket {
            operation: ArpOperation::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Build a gratuitous announcement for `ip`.
    pub fn gratuitous(mac: MacAddress, ip: Ipv4Addr) -> Self {
        ArpPacket::request(mac, ip, ip)
    }

    /// Gratuitous ARP: sender IP equals target IP.
    pub fn is_gratuitous(&self) -> bool {
        self.sender_ip == self.target_ip
    }

    /// Serialize to the fixed 28-byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(ARP_PACKET_SIZE);
        raw.extend_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        raw.extend_from_slice(&PTYPE_IPV4.to_be_bytes());
        raw.push(HLEN);
        raw.push(PLEN);
        raw.extend_from_slice(&self.operation.value().to_be_bytes());
        raw.extend_from_slice(self.sender_mac.as_bytes());
        raw.extend_from_slice(&self.sender_ip.0);
        raw.extend_from_slice(self.target_mac.as_bytes());
        raw.extend_from_slice(&self.target_ip.0);
        raw
    }

    /// Parse the fixed layout; padding beyond 28 bytes is ignored.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < ARP_PACKET_SIZE {
            return Err(WireError::Truncated);
        }

        let htype = u16::from_be_bytes([raw[0], raw[1]]);
        let ptype = u16::from_be_bytes([raw[2], raw[3]]);
        if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || raw[4] != HLEN || raw[5] != PLEN {
            return Err(WireError::BadVersion);
        }

        let operation = ArpOperation::from_u16(u16::from_be_bytes([raw[6], raw[7]]))
            .ok_or(WireError::BadVersion)?;

        Ok(ArpPacket {
            operation,
            sender_mac: MacAddress::new([raw[8], raw[9], raw[10], raw[11], raw[12], raw[13]]),
            sender_ip: Ipv4Addr([raw[14], raw[15], raw[16], raw[17]]),
            target_mac: MacAddress::new([raw[18], raw[19], raw[20], raw[21], raw[22], raw[23]]),
            target_ip: Ipv4Addr([raw[24], raw[25], raw[26], raw[27]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_request_layout() {
        let req = ArpPacket::request(mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        let raw = req.encode();
        assert_eq!(raw.len(), ARP_PACKET_SIZE);
        assert_eq!(&raw[..8], &[0, 1, 0x08, 0, 6, 4, 0, 1]);
        assert_eq!(&raw[18..24], &[0u8; 6]); // unknown target MAC
    }

    #[test]
    fn test_roundtrip() {
        let rep = ArpPacket::reply(
            mac(2),
            Ipv4Addr::new(10, 0, 0, 2),
            mac(1),
            Ipv4Addr::new(10, 0, 0, 1),
        );
        assert_eq!(ArpPacket::decode(&rep.encode()).unwrap(), rep);
    }

    #[test]
    fn test_decode_rejects_short_and_foreign() {
        let req = ArpPacket::request(mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        let raw = req.encode();
        assert_eq!(ArpPacket::decode(&raw[..27]), Err(WireError::Truncated));

        let mut foreign = raw.clone();
        foreign[1] = 6; // IEEE 802 hardware type
        assert_eq!(ArpPacket::decode(&foreign), Err(WireError::BadVersion));
    }

    #[test]
    fn test_decode_tolerates_frame_padding() {
        let req = ArpPacket::request(mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        let mut raw = req.encode();
        raw.resize(46, 0); // minimum Ethernet payload
        assert_eq!(ArpPacket::decode(&raw).unwrap(), req);
    }

    #[test]
    fn test_gratuitous() {
        let g = ArpPacket::gratuitous(mac(3), Ipv4Addr::new(192, 168, 1, 100));
        assert!(g.is_gratuitous());
        assert_eq!(g.operation, ArpOperation::Request);

        let plain = ArpPacket::request(mac(1), Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        assert!(!plain.is_gratuitous());
    }
}
