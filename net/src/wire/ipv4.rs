//! IPv4 Layer
//!
//! Parses and constructs IPv4 packets (IHL 5, no options) with the internet
//! header checksum. The encoder always emits a correct checksum; the decoder
//! does not reject a stored bad checksum — simulated links do not corrupt
//! frames, and counters stay comparable with captures that zero the field.

use bitflags::bitflags;

use crate::addr::Ipv4Addr;
use crate::wire::checksum;
use crate::WireError;

// ── Header constants ────────────────────────────────────────

/// IPv4 header size (no options).
pub const HEADER_SIZE: usize = 20;
/// Maximum total length (16-bit field).
pub const MAX_TOTAL_LEN: usize = 65535;
/// Maximum payload under a 20-byte header.
pub const MAX_PAYLOAD: usize = MAX_TOTAL_LEN - HEADER_SIZE;

/// Protocol numbers
pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// Default TTL
pub const DEFAULT_TTL: u8 = 64;

bitflags! {
    /// The 3-bit flags field (stored in the top bits of byte 6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Ipv4Flags: u8 {
        /// Don't Fragment
        const DF = 0b010;
        /// More Fragments
        const MF = 0b001;
    }
}

// ── Packet ──────────────────────────────────────────────────

/// An IPv4 packet. Version 4, IHL 5; fragmentation fields are carried but
/// never exercised by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Packet {
    pub dscp: u8,
    pub id: u16,
    pub flags: Ipv4Flags,
    pub frag_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    payload: Vec<u8>,
}

impl Ipv4Packet {
    /// Construct a packet with the defaults the simulator sends: DF set,
    /// no fragmentation, caller-chosen TTL.
    pub fn new(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: u8,
        ttl: u8,
        payload: Vec<u8>,
    ) -> Result<Self, WireError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadSize);
        }
        Ok(Ipv4Packet {
            dscp: 0,
            id: 0,
            flags: Ipv4Flags::DF,
            frag_offset: 0,
            ttl,
            protocol,
            src,
            dst,
            payload,
        })
    }

    /// The payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total length on the wire (header + payload).
    pub fn total_len(&self) -> u16 {
        (HEADER_SIZE + self.payload.len()) as u16
    }

    /// A copy with TTL decremented by one.
    ///
    /// Fails with [`WireError::TtlExpired`] when the TTL is already at or
    /// below 1; the caller is responsible for the ICMP Time Exceeded.
    pub fn decrement_ttl(&self) -> Result<Ipv4Packet, WireError> {
        if self.ttl <= 1 {
            return Err(WireError::TtlExpired);
        }
        let mut next = self.clone();
        next.ttl = self.ttl - 1;
        Ok(next)
    }

    /// Serialize header + payload with a freshly computed header checksum.
    pub fn encode(&self) -> Vec<u8> {
        let total_len = self.total_len();
        let mut raw = Vec::with_capacity(total_len as usize);

        // Version (4) + IHL (5 = 20 bytes)
        raw.push(0x45);
        raw.push(self.dscp << 2);
        raw.extend_from_slice(&total_len.to_be_bytes());
        raw.extend_from_slice(&self.id.to_be_bytes());
        // Flags (3 bits) + fragment offset (13 bits)
        let flags_frag = ((self.flags.bits() as u16) << 13) | (self.frag_offset & 0x1FFF);
        raw.extend_from_slice(&flags_frag.to_be_bytes());
        raw.push(self.ttl);
        raw.push(self.protocol);
        // Checksum placeholder, filled below
        raw.push(0);
        raw.push(0);
        raw.extend_from_slice(&self.src.0);
        raw.extend_from_slice(&self.dst.0);

        let ck = checksum(&raw[..HEADER_SIZE]);
        raw[10] = (ck >> 8) as u8;
        raw[11] = ck as u8;

        raw.extend_from_slice(&self.payload);
        raw
    }

    /// Parse raw bytes (after the Ethernet header) into a packet.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < HEADER_SIZE {
            return Err(WireError::Truncated);
        }

        let version = raw[0] >> 4;
        if version != 4 {
            return Err(WireError::BadVersion);
        }
        let ihl = (raw[0] & 0x0F) as usize;
        if ihl < 5 {
            return Err(WireError::BadVersion);
        }
        let header_len = ihl * 4;
        if raw.len() < header_len {
            return Err(WireError::Truncated);
        }

        let total_len = u16::from_be_bytes([raw[2], raw[3]]) as usize;
        if total_len < header_len || total_len > raw.len() {
            return Err(WireError::Truncated);
        }

        let flags_frag = u16::from_be_bytes([raw[6], raw[7]]);

        Ok(Ipv4Packet {
            dscp: raw[1] >> 2,
            id: u16::from_be_bytes([raw[4], raw[5]]),
            flags: Ipv4Flags::from_bits_truncate((flags_frag >> 13) as u8),
            frag_offset: flags_frag & 0x1FFF,
            ttl: raw[8],
            protocol: raw[9],
            src: Ipv4Addr([raw[12], raw[13], raw[14], raw[15]]),
            dst: Ipv4Addr([raw[16], raw[17], raw[18], raw[19]]),
            payload: raw[header_len..total_len].to_vec(),
        })
    }
}
