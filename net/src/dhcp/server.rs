//! DHCP Server — RFC 2131
//!
//! Pool allocation with reservations, declines and pending-offer tracking,
//! plus lease bookkeeping with expiry. One server instance serves one
//! router interface; its configuration is immutable after construction.

use hashbrown::{HashMap, HashSet};
use log::{debug, info};

use crate::addr::{Ipv4Addr, MacAddress};
use crate::dhcp::{rebinding_time, renewal_time, DhcpLease, PendingOffer};
use crate::wire::{DhcpMessageType, DhcpPacket};

// ── Configuration ───────────────────────────────────────────

/// Immutable server parameters.
#[derive(Debug, Clone)]
pub struct DhcpServerConfig {
    pub server_ip: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub lease_time_secs: u32,
    pub domain_name: Option<String>,
}

/// Per-message counters plus lease gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DhcpServerStats {
    pub discovers_received: u64,
    pub offers_sent: u64,
    pub requests_received: u64,
    pub acks_sent: u64,
    pub naks_sent: u64,
    pub declines_received: u64,
    pub releases_received: u64,
    pub informs_received: u64,
    pub active_leases: usize,
    pub total_leases_issued: u64,
}

// ── Server ──────────────────────────────────────────────────

/// The server state machine.
pub struct DhcpServer {
    config: DhcpServerConfig,
    by_mac: HashMap<MacAddress, DhcpLease>,
    by_ip: HashMap<Ipv4Addr, DhcpLease>,
    reservations: HashMap<MacAddress, Ipv4Addr>,
    pending: HashMap<MacAddress, PendingOffer>,
    declined: HashSet<Ipv4Addr>,
    stats: DhcpServerStats,
}

impl DhcpServer {
    /// Create a server over its pool.
    pub fn new(config: DhcpServerConfig) -> Self {
        DhcpServer {
            config,
            by_mac: HashMap::new(),
            by_ip: HashMap::new(),
            reservations: HashMap::new(),
            pending: HashMap::new(),
            declined: HashSet::new(),
            stats: DhcpServerStats::default(),
        }
    }

    /// Server parameters.
    pub fn config(&self) -> &DhcpServerConfig {
        &self.config
    }

    /// Counters.
    pub fn stats(&self) -> DhcpServerStats {
        self.stats
    }

    /// Reserve a fixed address for a client (may sit outside the pool).
    pub fn add_reservation(&mut self, mac: MacAddress, ip: Ipv4Addr) {
        self.reservations.insert(mac, ip);
    }

    /// Drop a reservation.
    pub fn remove_reservation(&mut self, mac: MacAddress) {
        self.reservations.remove(&mac);
    }

    /// The lease currently held by `mac`, if any.
    pub fn lease_for(&self, mac: MacAddress) -> Option<&DhcpLease> {
        self.by_mac.get(&mac)
    }

    /// The lease currently bound to `ip`, if any.
    pub fn lease_at(&self, ip: Ipv4Addr) -> Option<&DhcpLease> {
        self.by_ip.get(&ip)
    }

    /// Snapshot of the active leases, ordered by IP.
    pub fn leases(&self) -> Vec<DhcpLease> {
        let mut all: Vec<DhcpLease> = self.by_mac.values().cloned().collect();
        all.sort_by_key(|l| l.ip.to_u32());
        all
    }

    /// Number of active leases.
    pub fn active_leases(&self) -> usize {
        self.by_mac.len()
    }

    /// Dispatch an incoming client message; `Some` is the reply to send.
    pub fn handle_packet(&mut self, pkt: &DhcpPacket, now_ms: u64) -> Option<DhcpPacket> {
        match pkt.message_type {
            DhcpMessageType::Discover => self.handle_discover(pkt, now_ms),
            DhcpMessageType::Request => self.handle_request(pkt, now_ms),
            DhcpMessageType::Decline => {
                self.handle_decline(pkt);
                None
            }
            DhcpMessageType::Release => {
                self.handle_release(pkt);
                None
            }
            DhcpMessageType::Inform => self.handle_inform(pkt),
            // Server-originated types arriving here are client bugs; drop.
            _ => None,
        }
    }

    // ── DISCOVER ────────────────────────────────────────────

    /// Pick (or re-offer) an address and answer with an OFFER. `None`
    /// means the pool is exhausted and the client hears nothing.
    pub fn handle_discover(&mut self, pkt: &DhcpPacket, now_ms: u64) -> Option<DhcpPacket> {
        self.stats.discovers_received += 1;
        self.sweep_pending(now_ms);

        let mac = pkt.client_mac();

        // A live offer is repeated verbatim
        if let Some(pending) = self.pending.get(&mac) {
            let ip = pending.ip;
            self.stats.offers_sent += 1;
            return Some(self.build_reply(DhcpMessageType::Offer, pkt, Some(ip)));
        }

        let ip = self.pick_address(mac, pkt.options.requested_ip)?;

        self.pending.insert(
            mac,
            PendingOffer {
                mac,
                ip,
                offered_at_ms: now_ms,
            },
        );
        debug!("offering {} to {}", ip, mac);
        self.stats.offers_sent += 1;
        Some(self.build_reply(DhcpMessageType::Offer, pkt, Some(ip)))
    }

    // ── REQUEST ─────────────────────────────────────────────

    /// ACK a valid selection or renewal, NAK anything else. `None` means
    /// the request was for another server.
    pub fn handle_request(&mut self, pkt: &DhcpPacket, now_ms: u64) -> Option<DhcpPacket> {
        // Selecting another server: stay silent.
        if let Some(server_id) = pkt.options.server_id {
            if server_id != self.config.server_ip {
                return None;
            }
        }
        self.stats.requests_received += 1;

        let mac = pkt.client_mac();
        let requested = pkt.options.requested_ip;

        let offered = self.pending.get(&mac).map(|p| p.ip);
        let granted = if offered.is_some() && offered == requested {
            offered
        } else {
            // Renewal: an existing lease is re-acknowledged as-is.
            self.by_mac.get(&mac).map(|l| l.ip)
        };

        let ip = match granted {
            Some(ip) => ip,
            None => {
                debug!("nak for {} (requested {:?})", mac, requested);
                self.stats.naks_sent += 1;
                let mut nak = self.build_reply(DhcpMessageType::Nak, pkt, None);
                nak.options.message = Some("requested address not available".into());
                return Some(nak);
            }
        };

        self.write_lease(mac, ip, pkt.options.hostname.clone(), now_ms);
        self.pending.remove(&mac);
        info!("leased {} to {}", ip, mac);
        self.stats.acks_sent += 1;
        Some(self.build_reply(DhcpMessageType::Ack, pkt, Some(ip)))
    }

    // ── DECLINE / RELEASE / INFORM ──────────────────────────

    /// The client found the offered address in use: poison it.
    pub fn handle_decline(&mut self, pkt: &DhcpPacket) {
        self.stats.declines_received += 1;
        let mac = pkt.client_mac();
        if let Some(ip) = pkt.options.requested_ip {
            debug!("{} declined {}", mac, ip);
            self.declined.insert(ip);
        }
        if let Some(lease) = self.by_mac.remove(&mac) {
            self.by_ip.remove(&lease.ip);
        }
        self.pending.remove(&mac);
        self.stats.active_leases = self.by_mac.len();
    }

    /// The client is done with its address.
    pub fn handle_release(&mut self, pkt: &DhcpPacket) {
        self.stats.releases_received += 1;
        let mac = pkt.client_mac();
        if let Some(lease) = self.by_mac.get(&mac) {
            if lease.ip == pkt.ciaddr {
                let ip = lease.ip;
                self.by_mac.remove(&mac);
                self.by_ip.remove(&ip);
                info!("released {} from {}", ip, mac);
            }
        }
        self.stats.active_leases = self.by_mac.len();
    }

    /// Configuration-only query: current parameters, no address grant.
    pub fn handle_inform(&mut self, pkt: &DhcpPacket) -> Option<DhcpPacket> {
        self.stats.informs_received += 1;
        self.stats.acks_sent += 1;
        Some(self.build_reply(DhcpMessageType::Ack, pkt, None))
    }

    /// Drop leases whose expiry has passed.
    pub fn sweep_expired_leases(&mut self, now_ms: u64) {
        let expired: Vec<MacAddress> = self
            .by_mac
            .values()
            .filter(|l| l.is_expired(now_ms))
            .map(|l| l.mac)
            .collect();
        for mac in expired {
            if let Some(lease) = self.by_mac.remove(&mac) {
                debug!("lease {} for {} expired", lease.ip, mac);
                self.by_ip.remove(&lease.ip);
            }
        }
        self.stats.active_leases = self.by_mac.len();
    }

    /// Drop pending offers that never saw a REQUEST.
    fn sweep_pending(&mut self, now_ms: u64) {
        self.pending.retain(|_, p| !p.is_expired(now_ms));
    }

    // ── Allocation ──────────────────────────────────────────

    /// Whether `ip` can be offered to `mac` right now.
    fn available(&self, ip: Ipv4Addr, mac: MacAddress) -> bool {
        let (start, end) = (self.config.pool_start.to_u32(), self.config.pool_end.to_u32());
        let v = ip.to_u32();
        if v < start || v > end {
            return false;
        }
        if self.declined.contains(&ip) {
            return false;
        }
        if self.by_ip.contains_key(&ip) {
            return false;
        }
        // Another client's reservation or live offer blocks it
        if self
            .reservations
            .iter()
            .any(|(m, r)| *m != mac && *r == ip)
        {
            return false;
        }
        if self.pending.values().any(|p| p.mac != mac && p.ip == ip) {
            return false;
        }
        true
    }

    /// Selection order: reservation, existing lease, requested address,
    /// lowest free address in the pool.
    fn pick_address(&self, mac: MacAddress, requested: Option<Ipv4Addr>) -> Option<Ipv4Addr> {
        if let Some(reserved) = self.reservations.get(&mac) {
            return Some(*reserved);
        }
        if let Some(lease) = self.by_mac.get(&mac) {
            return Some(lease.ip);
        }
        if let Some(ip) = requested {
            if self.available(ip, mac) {
                return Some(ip);
            }
        }
        let (start, end) = (self.config.pool_start.to_u32(), self.config.pool_end.to_u32());
        for v in start..=end {
            let ip = Ipv4Addr::from_u32(v);
            if self.available(ip, mac) {
                return Some(ip);
            }
        }
        debug!("pool exhausted ({} - {})", self.config.pool_start, self.config.pool_end);
        None
    }

    fn write_lease(&mut self, mac: MacAddress, ip: Ipv4Addr, hostname: Option<String>, now_ms: u64) {
        // Renewal to a different address never happens; replacing both
        // index entries keeps them in step either way.
        if let Some(old) = self.by_mac.remove(&mac) {
            self.by_ip.remove(&old.ip);
        }
        let lease = DhcpLease {
            mac,
            ip,
            hostname,
            lease_start_ms: now_ms,
            lease_time_secs: self.config.lease_time_secs,
            expires_at_ms: now_ms + self.config.lease_time_secs as u64 * 1000,
        };
        self.by_ip.insert(ip, lease.clone());
        self.by_mac.insert(mac, lease);
        self.stats.total_leases_issued += 1;
        self.stats.active_leases = self.by_mac.len();
    }

    /// A reply carrying the full parameter set; `yiaddr` only when an
    /// address is being granted.
    fn build_reply(
        &self,
        message_type: DhcpMessageType,
        request: &DhcpPacket,
        yiaddr: Option<Ipv4Addr>,
    ) -> DhcpPacket {
        let mut reply = DhcpPacket::new_reply(message_type, request);
        reply.siaddr = self.config.server_ip;
        reply.options.server_id = Some(self.config.server_ip);

        if message_type == DhcpMessageType::Nak {
            return reply;
        }

        if let Some(ip) = yiaddr {
            reply.yiaddr = ip;
        }
        reply.options.subnet_mask = Some(self.config.subnet_mask);
        reply.options.router = self.config.gateway;
        reply.options.dns_servers = self.config.dns_servers.clone();
        reply.options.domain_name = self.config.domain_name.clone();
        reply.options.lease_time = Some(self.config.lease_time_secs);
        reply.options.renewal_time = Some(renewal_time(self.config.lease_time_secs));
        reply.options.rebinding_time = Some(rebinding_time(self.config.lease_time_secs));
        reply
    }
}
