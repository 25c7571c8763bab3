//! Ethernet Frame Layer
//!
//! Parses and constructs IEEE 802.3 Ethernet II frames.
//!
//! This simulator carries no FCS; the minimum frame size is enforced on the
//! serialized form (zero padding after the payload), and the VLAN id is
//! switch-side metadata that never reaches the wire (no 802.1Q tagging).

use core::fmt;

use crate::addr::MacAddress;
use crate::WireError;

// ── EtherType ───────────────────────────────────────────────

/// EtherType: IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// EtherType: ARP
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// EtherType: VLAN (802.1Q)
pub const ETHERTYPE_VLAN: u16 = 0x8100;
/// EtherType: IPv6
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Upper-layer protocols the simulator dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Arp,
    Vlan,
    Ipv6,
}

impl EtherType {
    /// The wire value.
    pub const fn value(self) -> u16 {
        match self {
            EtherType::Ipv4 => ETHERTYPE_IPV4,
            EtherType::Arp => ETHERTYPE_ARP,
            EtherType::Vlan => ETHERTYPE_VLAN,
            EtherType::Ipv6 => ETHERTYPE_IPV6,
        }
    }

    /// Classify a wire value; unknown EtherTypes are dropped by the caller.
    pub fn from_u16(v: u16) -> Option<EtherType> {
        match v {
            ETHERTYPE_IPV4 => Some(EtherType::Ipv4),
            ETHERTYPE_ARP => Some(EtherType::Arp),
            ETHERTYPE_VLAN => Some(EtherType::Vlan),
            ETHERTYPE_IPV6 => Some(EtherType::Ipv6),
            _ => None,
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::Ipv4 => write!(f, "IPv4"),
            EtherType::Arp => write!(f, "ARP"),
            EtherType::Vlan => write!(f, "VLAN"),
            EtherType::Ipv6 => write!(f, "IPv6"),
        }
    }
}

// ── Frame constants ─────────────────────────────────────────

/// Minimum serialized frame size (no FCS in this simulator).
pub const MIN_FRAME_SIZE: usize = 64;
/// Maximum Ethernet payload (MTU).
pub const MAX_PAYLOAD: usize = 1500;
/// Minimum payload carried by a well-formed frame.
pub const MIN_PAYLOAD: usize = 46;
/// Ethernet header size.
pub const HEADER_SIZE: usize = 14;

// ── Frame ───────────────────────────────────────────────────

/// An Ethernet II frame.
///
/// On-wire layout: dst(6) ‖ src(6) ‖ ethertype(2, BE) ‖ payload, zero-padded
/// to [`MIN_FRAME_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub dst: MacAddress,
    pub src: MacAddress,
    pub ether_type: u16,
    payload: Vec<u8>,
    /// Switch port membership metadata; never serialized.
    pub vlan_id: Option<u16>,
    /// Set by the receiving interface; zero until captured.
    pub captured_at_ms: u64,
}

impl EthernetFrame {
    /// Construct a frame.
    ///
    /// Payloads shorter than [`MIN_PAYLOAD`] are zero-padded up to it;
    /// payloads above [`MAX_PAYLOAD`] are rejected.
    pub fn new(
        dst: MacAddress,
        src: MacAddress,
        ether_type: u16,
        mut payload: Vec<u8>,
    ) -> Result<Self, WireError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadSize);
        }
        if payload.len() < MIN_PAYLOAD {
            payload.resize(MIN_PAYLOAD, 0);
        }
        Ok(EthernetFrame {
            dst,
            src,
            ether_type,
            payload,
            vlan_id: None,
            captured_at_ms: 0,
        })
    }

    /// The payload bytes (including any construction padding).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialized frame length.
    pub fn wire_len(&self) -> usize {
        (HEADER_SIZE + self.payload.len()).max(MIN_FRAME_SIZE)
    }

    /// Serialize, padding with zeros to the minimum frame size.
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.wire_len());
        raw.extend_from_slice(self.dst.as_bytes());
        raw.extend_from_slice(self.src.as_bytes());
        raw.extend_from_slice(&self.ether_type.to_be_bytes());
        raw.extend_from_slice(&self.payload);
        while raw.len() < MIN_FRAME_SIZE {
            raw.push(0);
        }
        raw
    }

    /// Parse raw bytes into a frame.
    ///
    /// Enforces the minimum serialized frame size; the payload keeps its
    /// padding (upper-layer decoders carry their own lengths).
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < MIN_FRAME_SIZE {
            return Err(WireError::Truncated);
        }
        if raw.len() > HEADER_SIZE + MAX_PAYLOAD {
            return Err(WireError::PayloadSize);
        }

        let dst = MacAddress::new([raw[0], raw[1], raw[2], raw[3], raw[4], raw[5]]);
        let src = MacAddress::new([raw[6], raw[7], raw[8], raw[9], raw[10], raw[11]]);
        let ether_type = u16::from_be_bytes([raw[12], raw[13]]);

        Ok(EthernetFrame {
            dst,
            src,
            ether_type,
            payload: raw[HEADER_SIZE..].to_vec(),
            vlan_id: None,
            captured_at_ms: 0,
        })
    }
}
