//! Router Engine
//!
//! Per-interface NIC + ARP cache, a routing table, and the forwarding path:
//! longest-prefix lookup, TTL decrement with ICMP Time Exceeded back toward
//! the source, and ARP-mediated egress encapsulation. Unresolvable next
//! hops drop the packet — this simulator does not queue behind ARP.

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::addr::{Ipv4Addr, MacAddress, SubnetMask};
use crate::arp::ArpService;
use crate::nic::{NetworkInterface, RxDisposition};
use crate::route::{Route, RoutingTable};
use crate::wire::ethernet::{ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::wire::ipv4::{DEFAULT_TTL, PROTO_ICMP};
use crate::wire::{ArpOperation, ArpPacket, EthernetFrame, IcmpPacket, Ipv4Packet};
use crate::NetError;

/// Metric assigned to the default route.
pub const DEFAULT_ROUTE_METRIC: u32 = 10;

// ── Statistics and hooks ────────────────────────────────────

/// Router counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub packets_forwarded: u64,
    pub packets_dropped: u64,
    pub ttl_expired: u64,
    pub no_route: u64,
    pub arp_unresolved: u64,
}

/// Why a packet was dropped instead of forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    DecodeError,
    NoRoute,
    TtlExpired,
    UnresolvedNextHop,
}

/// Hook fired for every forwarded packet: (packet, egress interface).
pub type ForwardHook = Box<dyn FnMut(&Ipv4Packet, &str) + Send>;
/// Hook fired for every dropped packet.
pub type DropHook = Box<dyn FnMut(DropReason) + Send>;

// ── Frame disposition ───────────────────────────────────────

/// What the engine did with a received frame.
#[derive(Debug)]
pub enum FrameDisposition {
    /// Handled entirely inside the engine (ARP, forwarding, drops).
    Consumed,
    /// An IPv4 packet addressed to this router; the device kernel decides
    /// (DHCP service lives there).
    Local { iface: String, packet: Ipv4Packet },
}

// ── Engine ──────────────────────────────────────────────────

struct RouterInterface {
    nic: NetworkInterface,
    arp: ArpService,
}

/// The routing engine.
pub struct RouterEngine {
    interfaces: BTreeMap<String, RouterInterface>,
    table: RoutingTable,
    stats: RouterStats,
    on_forward: Option<ForwardHook>,
    on_drop: Option<DropHook>,
}

impl RouterEngine {
    /// Create an engine with no interfaces.
    pub fn new() -> Self {
        RouterEngine {
            interfaces: BTreeMap::new(),
            table: RoutingTable::new(),
            stats: RouterStats::default(),
            on_forward: None,
            on_drop: None,
        }
    }

    /// Register an interface (router interfaces come up wired-down and
    /// unaddressed).
    pub fn add_interface(&mut self, nic: NetworkInterface) {
        self.interfaces.insert(
            nic.name().to_string(),
            RouterInterface {
                nic,
                arp: ArpService::new(),
            },
        );
    }

    /// Interface names, in order.
    pub fn interface_names(&self) -> Vec<String> {
        self.interfaces.keys().cloned().collect()
    }

    /// The NIC for an interface.
    pub fn nic(&self, iface: &str) -> Option<&NetworkInterface> {
        self.interfaces.get(iface).map(|i| &i.nic)
    }

    /// Mutable NIC access (the wiring layer installs tx hooks here).
    pub fn nic_mut(&mut self, iface: &str) -> Option<&mut NetworkInterface> {
        self.interfaces.get_mut(iface).map(|i| &mut i.nic)
    }

    /// The ARP cache of an interface.
    pub fn arp_mut(&mut self, iface: &str) -> Option<&mut ArpService> {
        self.interfaces.get_mut(iface).map(|i| &mut i.arp)
    }

    /// Counters.
    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// The routing table.
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Install the forward hook.
    pub fn set_forward_hook(&mut self, hook: ForwardHook) {
        self.on_forward = Some(hook);
    }

    /// Install the drop hook.
    pub fn set_drop_hook(&mut self, hook: DropHook) {
        self.on_drop = Some(hook);
    }

    /// Address an interface; brings it up and replaces its connected route.
    pub fn set_ip(&mut self, iface: &str, ip: Ipv4Addr, mask: SubnetMask) -> Result<(), NetError> {
        let intf = self
            .interfaces
            .get_mut(iface)
            .ok_or_else(|| NetError::UnknownInterface(iface.to_string()))?;
        intf.nic.set_ip(ip, mask);
        intf.nic.up();
        self.table.replace_connected(Route::connected(ip, mask, iface));
        Ok(())
    }

    /// Append a static route.
    pub fn add_route(
        &mut self,
        network: Ipv4Addr,
        mask: SubnetMask,
        next_hop: Ipv4Addr,
        iface: &str,
        metric: u32,
    ) -> Result<(), NetError> {
        if !self.interfaces.contains_key(iface) {
            return Err(NetError::UnknownInterface(iface.to_string()));
        }
        self.table
            .add(Route::via(network, mask, next_hop, iface, metric));
        Ok(())
    }

    /// Install 0.0.0.0/0 via `next_hop`.
    pub fn set_default_route(&mut self, next_hop: Ipv4Addr, iface: &str) -> Result<(), NetError> {
        self.add_route(
            Ipv4Addr::ANY,
            SubnetMask::ANY,
            next_hop,
            iface,
            DEFAULT_ROUTE_METRIC,
        )
    }

    /// Longest-prefix lookup.
    pub fn lookup(&self, dest: Ipv4Addr) -> Option<&Route> {
        self.table.lookup(dest)
    }

    /// Process a frame received on `iface`.
    pub fn handle_frame(
        &mut self,
        iface: &str,
        frame: &EthernetFrame,
        now_ms: u64,
    ) -> FrameDisposition {
        let intf = match self.interfaces.get_mut(iface) {
            Some(i) => i,
            None => return FrameDisposition::Consumed,
        };
        if intf.nic.receive(frame) != RxDisposition::Delivered {
            return FrameDisposition::Consumed;
        }

        match frame.ether_type {
            ETHERTYPE_ARP => {
                self.handle_arp(iface, frame, now_ms);
                FrameDisposition::Consumed
            }
            ETHERTYPE_IPV4 => self.handle_ipv4(iface, frame, now_ms),
            _ => FrameDisposition::Consumed,
        }
    }

    // ── ARP path ────────────────────────────────────────────

    fn handle_arp(&mut self, iface: &str, frame: &EthernetFrame, now_ms: u64) {
        let pkt = match ArpPacket::decode(frame.payload()) {
            Ok(p) => p,
            Err(_) => {
                self.drop_packet(DropReason::DecodeError);
                return;
            }
        };

        let intf = match self.interfaces.get_mut(iface) {
            Some(i) => i,
            None => return,
        };
        // Any ARP teaches us the sender
        intf.arp.process_packet(&pkt, now_ms);

        // Answer requests for our own interface address
        if pkt.operation == ArpOperation::Request && Some(pkt.target_ip) == intf.nic.ip() {
            let reply = ArpPacket::reply(intf.nic.mac(), pkt.target_ip, pkt.sender_mac, pkt.sender_ip);
            if let Ok(reply_frame) = EthernetFrame::new(
                pkt.sender_mac,
                intf.nic.mac(),
                ETHERTYPE_ARP,
                reply.encode(),
            ) {
                let _ = intf.nic.transmit(&reply_frame);
            }
        }
    }

    // ── IPv4 path ───────────────────────────────────────────

    fn handle_ipv4(&mut self, iface: &str, frame: &EthernetFrame, now_ms: u64) -> FrameDisposition {
        let pkt = match Ipv4Packet::decode(frame.payload()) {
            Ok(p) => p,
            Err(_) => {
                self.drop_packet(DropReason::DecodeError);
                return FrameDisposition::Consumed;
            }
        };

        let ingress_ip = self.interfaces.get(iface).and_then(|i| i.nic.ip());

        // Addressed to us (or broadcast): the device kernel takes over.
        if Some(pkt.dst) == ingress_ip
            || pkt.dst.is_limited_broadcast()
            || self.is_subnet_broadcast(iface, pkt.dst)
        {
            return FrameDisposition::Local {
                iface: iface.to_string(),
                packet: pkt,
            };
        }

        if pkt.ttl <= 1 {
            self.stats.ttl_expired += 1;
            self.emit_time_exceeded(iface, &pkt, now_ms);
            self.drop_packet(DropReason::TtlExpired);
            return FrameDisposition::Consumed;
        }

        let (egress, next_hop) = match self.table.lookup(pkt.dst) {
            Some(route) => (route.iface.clone(), route.next_hop.unwrap_or(pkt.dst)),
            None => {
                debug!("no route to {}", pkt.dst);
                self.stats.no_route += 1;
                self.drop_packet(DropReason::NoRoute);
                return FrameDisposition::Consumed;
            }
        };

        // TTL > 1 was checked above; decrement cannot fail here.
        let forwarded = match pkt.decrement_ttl() {
            Ok(p) => p,
            Err(_) => return FrameDisposition::Consumed,
        };

        let intf = match self.interfaces.get_mut(&egress) {
            Some(i) => i,
            None => return FrameDisposition::Consumed,
        };
        let next_hop_mac = match intf.arp.resolve(next_hop, now_ms) {
            Some(mac) => mac,
            None => {
                debug!("next hop {} unresolved on {}", next_hop, egress);
                self.stats.arp_unresolved += 1;
                self.drop_packet(DropReason::UnresolvedNextHop);
                return FrameDisposition::Consumed;
            }
        };

        let src_mac = intf.nic.mac();
        if let Ok(out) = EthernetFrame::new(next_hop_mac, src_mac, ETHERTYPE_IPV4, forwarded.encode())
        {
            if intf.nic.transmit(&out).is_ok() {
                trace!("forwarded {} -> {} via {}", forwarded.src, forwarded.dst, egress);
                self.stats.packets_forwarded += 1;
                if let Some(hook) = self.on_forward.as_mut() {
                    hook(&forwarded, &egress);
                }
            }
        }
        FrameDisposition::Consumed
    }

    /// ICMP Time Exceeded (type 11, code 0) back out the ingress interface,
    /// quoting the first 28 bytes of the offending datagram.
    fn emit_time_exceeded(&mut self, iface: &str, pkt: &Ipv4Packet, now_ms: u64) {
        let intf = match self.interfaces.get_mut(iface) {
            Some(i) => i,
            None => return,
        };
        let src_ip = match intf.nic.ip() {
            Some(ip) => ip,
            None => return,
        };

        let icmp = IcmpPacket::time_exceeded(&pkt.encode());
        let reply = match Ipv4Packet::new(src_ip, pkt.src, PROTO_ICMP, DEFAULT_TTL, icmp.encode()) {
            Ok(p) => p,
            Err(_) => return,
        };

        // The original sender must already be in the ingress cache; there
        // is no queue to park the error message on.
        let dst_mac = match intf.arp.resolve(pkt.src, now_ms) {
            Some(mac) => mac,
            None => return,
        };

        if let Ok(frame) =
            EthernetFrame::new(dst_mac, intf.nic.mac(), ETHERTYPE_IPV4, reply.encode())
        {
            let _ = intf.nic.transmit(&frame);
        }
    }

    fn is_subnet_broadcast(&self, iface: &str, dst: Ipv4Addr) -> bool {
        match self.interfaces.get(iface) {
            Some(i) => match (i.nic.ip(), i.nic.netmask()) {
                (Some(ip), Some(mask)) => dst == ip.broadcast_of(mask),
                _ => false,
            },
            None => false,
        }
    }

    fn drop_packet(&mut self, reason: DropReason) {
        self.stats.packets_dropped += 1;
        if let Some(hook) = self.on_drop.as_mut() {
            hook(reason);
        }
    }
}

impl Default for RouterEngine {
    fn default() -> Self {
        Self::new()
    }
}
