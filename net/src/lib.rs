//! Wirelab Protocol Engine
//!
//! Byte-exact codecs and per-device protocol state machines for a small
//! simulated IPv4 Ethernet network.
//!
//! Layer overview (bottom → top):
//!   Ethernet → ARP / IPv4 → ICMP / UDP → DHCP
//!
//! The engine is organized into:
//!
//! - `addr`: MAC-48, IPv4 and subnet-mask primitives with CIDR math
//! - `wire`: frame and packet codecs (Ethernet II, IPv4, ICMP, ARP, UDP, DHCP)
//! - `nic`: per-interface state, filters and counters
//! - `mac_table`: port ⇄ MAC learning with aging and capacity eviction
//! - `forwarder`: switch forwarding with VLAN scoping
//! - `arp`: ARP cache and resolution service
//! - `icmp`: echo correlation and RTT statistics
//! - `route` / `router`: routing table, longest-prefix match, forwarding engine
//! - `dhcp`: server pool and lease management, client state machine
//!
//! There is no clock in here: every aging or expiry operation takes an
//! explicit `now_ms`, so the embedding drives time deterministically.

pub mod addr;
pub mod arp;
pub mod dhcp;
pub mod forwarder;
pub mod icmp;
pub mod mac_table;
pub mod nic;
pub mod route;
pub mod router;
pub mod wire;

pub use addr::{Ipv4Addr, MacAddress, SubnetMask};
pub use wire::{EtherType, EthernetFrame};

use thiserror::Error;

// ── Codec errors ────────────────────────────────────────────

/// Decode/encode failure at the wire level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    /// Buffer too short for the advertised structure.
    #[error("truncated packet")]
    Truncated,
    /// DHCP magic cookie mismatch.
    #[error("bad magic cookie")]
    BadMagic,
    /// IPv4 version field is not 4 (or IHL below minimum).
    #[error("bad IP version")]
    BadVersion,
    /// ICMP checksum over the whole message does not verify.
    #[error("bad checksum")]
    BadChecksum,
    /// Payload exceeds what the encapsulation can carry.
    #[error("payload size out of range")]
    PayloadSize,
    /// TTL already at or below 1; the packet cannot be forwarded.
    #[error("TTL expired")]
    TtlExpired,
    /// A required option is absent (e.g. DHCP message type).
    #[error("missing required option {0}")]
    MissingOption(u8),
}

// ── Engine errors ───────────────────────────────────────────

/// Engine-level error, surfaced to the caller (terminal, tests).
///
/// Protocol-level failures on the wire never become a `NetError`; they are
/// recovered locally and reflected in counters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// Parsing of an address or option string given by the caller.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// Route or DHCP binding references an interface that does not exist.
    #[error("unknown interface: {0}")]
    UnknownInterface(String),
    /// No routing table entry matches the destination.
    #[error("no route to host")]
    NoRoute,
    /// The next hop's MAC address could not be resolved.
    #[error("next hop unreachable")]
    UnreachableNextHop,
    /// Requested MTU is outside the supported bounds.
    #[error("MTU {0} out of range")]
    MtuOutOfRange(u32),
    /// Transmit attempted while the interface is administratively down.
    #[error("interface is down")]
    InterfaceDown,
    /// The DHCP pool has no address left to offer.
    #[error("address pool exhausted")]
    PoolExhausted,
    /// Codec failure bubbled up from the wire layer.
    #[error(transparent)]
    Wire(#[from] WireError),
}
