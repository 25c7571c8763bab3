//! ARP Service
//!
//! Per-interface cache of IPv4 → MAC bindings with TTL expiry, fed by every
//! ARP packet seen on the wire (requests and replies both carry a usable
//! sender binding). Packet construction lives in [`crate::wire::arp`].

use hashbrown::HashMap;
use log::trace;

use crate::addr::{Ipv4Addr, MacAddress};
use crate::wire::ArpPacket;

/// Default cache entry TTL (300 s).
pub const DEFAULT_TTL_MS: u64 = 300_000;

/// One cached binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpCacheEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddress,
    pub added_at_ms: u64,
    pub ttl_ms: u64,
}

impl ArpCacheEntry {
    /// Whether the entry has outlived its TTL.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.added_at_ms) >= self.ttl_ms
    }
}

/// The resolution cache.
#[derive(Default)]
pub struct ArpService {
    cache: HashMap<Ipv4Addr, ArpCacheEntry>,
}

impl ArpService {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a binding with the default TTL.
    pub fn add_entry(&mut self, ip: Ipv4Addr, mac: MacAddress, now_ms: u64) {
        self.add_entry_with_ttl(ip, mac, now_ms, DEFAULT_TTL_MS);
    }

    /// Insert or refresh a binding with an explicit TTL.
    pub fn add_entry_with_ttl(&mut self, ip: Ipv4Addr, mac: MacAddress, now_ms: u64, ttl_ms: u64) {
        trace!("arp cache {} -> {}", ip, mac);
        self.cache.insert(
            ip,
            ArpCacheEntry {
                ip,
                mac,
                added_at_ms: now_ms,
                ttl_ms,
            },
        );
    }

    /// Resolve an IP, lazily expiring a stale entry.
    pub fn resolve(&mut self, ip: Ipv4Addr, now_ms: u64) -> Option<MacAddress> {
        if let Some(entry) = self.cache.get(&ip) {
            if entry.is_expired(now_ms) {
                self.cache.remove(&ip);
                return None;
            }
            return Some(entry.mac);
        }
        None
    }

    /// Learn the sender binding of any ARP packet (request or reply,
    /// gratuitous included).
    pub fn process_packet(&mut self, pkt: &ArpPacket, now_ms: u64) {
        self.add_entry(pkt.sender_ip, pkt.sender_mac, now_ms);
    }

    /// Drop a binding.
    pub fn remove(&mut self, ip: Ipv4Addr) {
        self.cache.remove(&ip);
    }

    /// Drop everything.
    pub fn flush(&mut self) {
        self.cache.clear();
    }

    /// Drop expired entries eagerly.
    pub fn sweep(&mut self, now_ms: u64) {
        self.cache.retain(|_, e| !e.is_expired(now_ms));
    }

    /// Number of live entries (expired entries may still be counted until
    /// touched or swept).
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Snapshot of unexpired entries, ordered by IP for stable rendering.
    pub fn entries(&self, now_ms: u64) -> Vec<ArpCacheEntry> {
        let mut all: Vec<ArpCacheEntry> = self
            .cache
            .values()
            .filter(|e| !e.is_expired(now_ms))
            .copied()
            .collect();
        all.sort_by_key(|e| e.ip.to_u32());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_add_and_resolve() {
        let mut arp = ArpService::new();
        let ip = Ipv4Addr::new(192, 168, 1, 20);
        arp.add_entry(ip, mac(2), 0);
        assert_eq!(arp.resolve(ip, 100), Some(mac(2)));
        assert_eq!(arp.resolve(Ipv4Addr::new(192, 168, 1, 21), 100), None);
    }

    #[test]
    fn test_ttl_expiry_is_lazy() {
        let mut arp = ArpService::new();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        arp.add_entry_with_ttl(ip, mac(1), 0, 1000);
        assert_eq!(arp.resolve(ip, 999), Some(mac(1)));
        assert_eq!(arp.resolve(ip, 1000), None);
        assert!(arp.is_empty());
    }

    #[test]
    fn test_process_packet_learns_sender() {
        let mut arp = ArpService::new();
        let req = ArpPacket::request(mac(7), Ipv4Addr::new(10, 0, 0, 7), Ipv4Addr::new(10, 0, 0, 1));
        arp.process_packet(&req, 50);
        assert_eq!(arp.resolve(Ipv4Addr::new(10, 0, 0, 7), 60), Some(mac(7)));

        let rep = ArpPacket::reply(
            mac(1),
            Ipv4Addr::new(10, 0, 0, 1),
            mac(7),
            Ipv4Addr::new(10, 0, 0, 7),
        );
        arp.process_packet(&rep, 70);
        assert_eq!(arp.resolve(Ipv4Addr::new(10, 0, 0, 1), 80), Some(mac(1)));
    }

    #[test]
    fn test_refresh_replaces_binding() {
        let mut arp = ArpService::new();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        arp.add_entry(ip, mac(1), 0);
        arp.add_entry(ip, mac(2), 100);
        assert_eq!(arp.resolve(ip, 200), Some(mac(2)));
        assert_eq!(arp.len(), 1);
    }

    #[test]
    fn test_sweep_and_entries() {
        let mut arp = ArpService::new();
        arp.add_entry_with_ttl(Ipv4Addr::new(10, 0, 0, 1), mac(1), 0, 1000);
        arp.add_entry_with_ttl(Ipv4Addr::new(10, 0, 0, 2), mac(2), 500, 1000);
        assert_eq!(arp.entries(1200).len(), 1);
        arp.sweep(1200);
        assert_eq!(arp.len(), 1);
    }
}
