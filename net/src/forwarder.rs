//! Frame Forwarder
//!
//! Switch forwarding logic over a MAC table: learn on ingress, unicast
//! lookup, flood for broadcast/multicast/unknown, same-port filtering, and
//! VLAN scoping by port membership. Ports are kept in a `BTreeMap` so flood
//! order is ascending port number, stable across runs.

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::addr::MacAddress;
use crate::mac_table::{MacTable, PortId};
use crate::wire::EthernetFrame;

/// Default VLAN for every port.
pub const DEFAULT_VLAN: u16 = 1;

// ── Ports ───────────────────────────────────────────────────

/// Per-port forwarding configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchPort {
    pub vlan: u16,
    pub enabled: bool,
}

impl Default for SwitchPort {
    fn default() -> Self {
        SwitchPort {
            vlan: DEFAULT_VLAN,
            enabled: true,
        }
    }
}

// ── Decision ────────────────────────────────────────────────

/// What to do with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardAction {
    /// Send out exactly one port.
    Forward,
    /// Send out every candidate port.
    Flood,
    /// Drop without egress.
    Filter,
}

/// Why the action was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardReason {
    KnownUnicast,
    UnknownUnicast,
    Broadcast,
    Multicast,
    /// Destination lives on the ingress port.
    SamePort,
    /// Ingress port missing or disabled.
    IngressDown,
    /// The learned port is outside the ingress VLAN or disabled.
    OutOfVlan,
}

/// Forwarding decision: action, egress ports (in delivery order), reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardDecision {
    pub action: ForwardAction,
    pub ports: Vec<PortId>,
    pub reason: ForwardReason,
}

/// Forwarder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub forwarded: u64,
    pub flooded: u64,
    pub filtered: u64,
    pub broadcast: u64,
    pub multicast: u64,
}

// ── Forwarder ───────────────────────────────────────────────

/// Per-switch forwarding state.
pub struct FrameForwarder {
    table: MacTable,
    ports: BTreeMap<PortId, SwitchPort>,
    stats: ForwarderStats,
}

impl FrameForwarder {
    /// Create a forwarder with `port_count` enabled ports on the default
    /// VLAN.
    pub fn new(port_count: usize) -> Self {
        let ports = (0..port_count).map(|p| (p, SwitchPort::default())).collect();
        FrameForwarder {
            table: MacTable::default(),
            ports,
            stats: ForwarderStats::default(),
        }
    }

    /// The underlying MAC table.
    pub fn table(&self) -> &MacTable {
        &self.table
    }

    /// Mutable access for aging sweeps.
    pub fn table_mut(&mut self) -> &mut MacTable {
        &mut self.table
    }

    /// Counters.
    pub fn stats(&self) -> ForwarderStats {
        self.stats
    }

    /// Number of ports.
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Per-port configuration.
    pub fn port(&self, port: PortId) -> Option<SwitchPort> {
        self.ports.get(&port).copied()
    }

    /// Assign a port to a VLAN.
    pub fn set_port_vlan(&mut self, port: PortId, vlan: u16) {
        if let Some(p) = self.ports.get_mut(&port) {
            p.vlan = vlan;
        }
    }

    /// Enable or disable a port. Disabling forgets the MACs learned there.
    pub fn set_port_enabled(&mut self, port: PortId, enabled: bool) {
        if let Some(p) = self.ports.get_mut(&port) {
            p.enabled = enabled;
            if !enabled {
                self.table.remove_port(port);
            }
        }
    }

    /// Forget everything learned.
    pub fn reset(&mut self) {
        self.table.clear();
    }

    /// Decide what to do with `frame` arriving on `ingress`.
    ///
    /// The caller delivers the frame once per port in `decision.ports`.
    pub fn forward(
        &mut self,
        frame: &EthernetFrame,
        ingress: PortId,
        now_ms: u64,
    ) -> ForwardDecision {
        let ingress_port = match self.ports.get(&ingress) {
            Some(p) if p.enabled => *p,
            _ => {
                self.stats.filtered += 1;
                return ForwardDecision {
                    action: ForwardAction::Filter,
                    ports: Vec::new(),
                    reason: ForwardReason::IngressDown,
                };
            }
        };

        if frame.src.is_unicast() {
            self.table.learn(frame.src, ingress, now_ms);
        }

        // Enabled ports in the ingress VLAN, excluding the ingress itself.
        let candidates: Vec<PortId> = self
            .ports
            .iter()
            .filter(|(id, p)| **id != ingress && p.enabled && p.vlan == ingress_port.vlan)
            .map(|(id, _)| *id)
            .collect();

        if frame.dst.is_broadcast() {
            self.stats.broadcast += 1;
            self.stats.flooded += 1;
            return ForwardDecision {
                action: ForwardAction::Flood,
                ports: candidates,
                reason: ForwardReason::Broadcast,
            };
        }
        if frame.dst.is_multicast() {
            self.stats.multicast += 1;
            self.stats.flooded += 1;
            return ForwardDecision {
                action: ForwardAction::Flood,
                ports: candidates,
                reason: ForwardReason::Multicast,
            };
        }

        match self.table.lookup(frame.dst, now_ms) {
            Some(port) if port == ingress => {
                trace!("filter {}: destination on ingress port {}", frame.dst, port);
                self.stats.filtered += 1;
                ForwardDecision {
                    action: ForwardAction::Filter,
                    ports: Vec::new(),
                    reason: ForwardReason::SamePort,
                }
            }
            Some(port) if candidates.contains(&port) => {
                self.stats.forwarded += 1;
                ForwardDecision {
                    action: ForwardAction::Forward,
                    ports: vec![port],
                    reason: ForwardReason::KnownUnicast,
                }
            }
            Some(port) => {
                // Learned, but unreachable from this VLAN (or disabled):
                // fall back to flooding the candidate set.
                debug!("mac {} learned on port {} outside VLAN, flooding", frame.dst, port);
                self.stats.flooded += 1;
                ForwardDecision {
                    action: ForwardAction::Flood,
                    ports: candidates,
                    reason: ForwardReason::OutOfVlan,
                }
            }
            None => {
                self.stats.flooded += 1;
                ForwardDecision {
                    action: ForwardAction::Flood,
                    ports: candidates,
                    reason: ForwardReason::UnknownUnicast,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ethernet::ETHERTYPE_IPV4;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn frame(dst: MacAddress, src: MacAddress) -> EthernetFrame {
        EthernetFrame::new(dst, src, ETHERTYPE_IPV4, vec![0; 46]).unwrap()
    }

    #[test]
    fn test_unknown_unicast_floods() {
        let mut fwd = FrameForwarder::new(4);
        let d = fwd.forward(&frame(mac(9), mac(1)), 0, 0);
        assert_eq!(d.action, ForwardAction::Flood);
        assert_eq!(d.reason, ForwardReason::UnknownUnicast);
        assert_eq!(d.ports, vec![1, 2, 3]);
    }

    #[test]
    fn test_known_unicast_forwards_to_one_port() {
        let mut fwd = FrameForwarder::new(4);
        fwd.forward(&frame(MacAddress::BROADCAST, mac(2)), 2, 0); // learn mac(2)@2
        let d = fwd.forward(&frame(mac(2), mac(1)), 0, 10);
        assert_eq!(d.action, ForwardAction::Forward);
        assert_eq!(d.ports, vec![2]);
        assert_eq!(d.reason, ForwardReason::KnownUnicast);
    }

    #[test]
    fn test_same_port_filter() {
        let mut fwd = FrameForwarder::new(4);
        fwd.forward(&frame(MacAddress::BROADCAST, mac(2)), 1, 0);
        let d = fwd.forward(&frame(mac(2), mac(1)), 1, 10);
        assert_eq!(d.action, ForwardAction::Filter);
        assert_eq!(d.reason, ForwardReason::SamePort);
        assert!(d.ports.is_empty());
    }

    #[test]
    fn test_broadcast_floods_in_vlan_only() {
        let mut fwd = FrameForwarder::new(4);
        fwd.set_port_vlan(2, 20);
        fwd.set_port_vlan(3, 20);
        let d = fwd.forward(&frame(MacAddress::BROADCAST, mac(1)), 0, 0);
        assert_eq!(d.action, ForwardAction::Flood);
        assert_eq!(d.reason, ForwardReason::Broadcast);
        assert_eq!(d.ports, vec![1]); // only the other VLAN-1 port

        let d = fwd.forward(&frame(MacAddress::BROADCAST, mac(2)), 2, 0);
        assert_eq!(d.ports, vec![3]);
    }

    #[test]
    fn test_multicast_floods() {
        let mut fwd = FrameForwarder::new(3);
        let mcast = MacAddress::new([0x01, 0x00, 0x5E, 0, 0, 5]);
        let d = fwd.forward(&frame(mcast, mac(1)), 0, 0);
        assert_eq!(d.action, ForwardAction::Flood);
        assert_eq!(d.reason, ForwardReason::Multicast);
        assert_eq!(fwd.stats().multicast, 1);
    }

    #[test]
    fn test_cross_vlan_unicast_floods_candidates() {
        let mut fwd = FrameForwarder::new(4);
        fwd.set_port_vlan(3, 30);
        // Learn mac(5) on the VLAN-30 port
        fwd.forward(&frame(MacAddress::BROADCAST, mac(5)), 3, 0);
        // A VLAN-1 sender can't reach it: flood within VLAN 1
        let d = fwd.forward(&frame(mac(5), mac(1)), 0, 10);
        assert_eq!(d.action, ForwardAction::Flood);
        assert_eq!(d.reason, ForwardReason::OutOfVlan);
        assert_eq!(d.ports, vec![1, 2]);
    }

    #[test]
    fn test_disabled_ingress_drops() {
        let mut fwd = FrameForwarder::new(2);
        fwd.set_port_enabled(0, false);
        let d = fwd.forward(&frame(mac(2), mac(1)), 0, 0);
        assert_eq!(d.action, ForwardAction::Filter);
        assert_eq!(d.reason, ForwardReason::IngressDown);
    }

    #[test]
    fn test_disable_port_forgets_macs() {
        let mut fwd = FrameForwarder::new(3);
        fwd.forward(&frame(MacAddress::BROADCAST, mac(2)), 1, 0);
        fwd.set_port_enabled(1, false);
        let d = fwd.forward(&frame(mac(2), mac(1)), 0, 10);
        assert_eq!(d.action, ForwardAction::Flood);
        assert_eq!(d.reason, ForwardReason::UnknownUnicast);
        assert_eq!(d.ports, vec![2]);
    }

    #[test]
    fn test_source_learned_on_ingress() {
        let mut fwd = FrameForwarder::new(2);
        fwd.forward(&frame(mac(9), mac(1)), 0, 5);
        assert_eq!(fwd.table_mut().lookup(mac(1), 6), Some(0));
    }
}
