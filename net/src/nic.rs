//! Network Interface
//!
//! Per-interface state: link flags, addressing, MTU, filters and counters.
//! A transmitted frame is handed to the installed tx hook (the wire); the
//! receive side applies the destination filter before the upper layer sees
//! the frame.

use bitflags::bitflags;
use core::fmt;

use crate::addr::{Ipv4Addr, MacAddress, SubnetMask};
use crate::wire::EthernetFrame;
use crate::NetError;

// ── MTU bounds ──────────────────────────────────────────────

/// Default MTU.
pub const DEFAULT_MTU: u32 = 1500;
/// Smallest accepted MTU (RFC 791 minimum reassembly size).
pub const MIN_MTU: u32 = 576;
/// Largest accepted MTU (jumbo frames).
pub const MAX_MTU: u32 = 9216;

bitflags! {
    /// Interface flag word, the set `ifconfig` renders.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterfaceFlags: u16 {
        const UP        = 1 << 0;
        const BROADCAST = 1 << 1;
        const RUNNING   = 1 << 6;
        const PROMISC   = 1 << 8;
        const MULTICAST = 1 << 12;
    }
}

impl fmt::Display for InterfaceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, flag) in [
            ("UP", InterfaceFlags::UP),
            ("BROADCAST", InterfaceFlags::BROADCAST),
            ("RUNNING", InterfaceFlags::RUNNING),
            ("PROMISC", InterfaceFlags::PROMISC),
            ("MULTICAST", InterfaceFlags::MULTICAST),
        ] {
            if self.contains(flag) {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

// ── Statistics ──────────────────────────────────────────────

/// Interface counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceStats {
    pub tx_frames: u64,
    pub tx_bytes: u64,
    pub rx_frames: u64,
    pub rx_bytes: u64,
    pub dropped_frames: u64,
}

// ── Receive disposition ─────────────────────────────────────

/// What the receive filter decided for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxDisposition {
    /// The frame passed the filter; the upper layer should process it.
    Delivered,
    /// The destination did not match and promiscuous is off.
    Filtered,
    /// The interface is down; nothing was counted.
    Down,
}

// ── Interface ───────────────────────────────────────────────

/// Hook invoked with every frame the interface puts on the wire.
pub type TxHook = Box<dyn FnMut(&EthernetFrame) + Send>;

/// A simulated network interface.
pub struct NetworkInterface {
    name: String,
    mac: MacAddress,
    flags: InterfaceFlags,
    ip: Option<Ipv4Addr>,
    netmask: Option<SubnetMask>,
    gateway: Option<Ipv4Addr>,
    mtu: u32,
    stats: InterfaceStats,
    tx_hook: Option<TxHook>,
}

impl NetworkInterface {
    /// Create an interface, initially down.
    pub fn new(name: impl Into<String>, mac: MacAddress) -> Self {
        NetworkInterface {
            name: name.into(),
            mac,
            flags: InterfaceFlags::BROADCAST | InterfaceFlags::MULTICAST,
            ip: None,
            netmask: None,
            gateway: None,
            mtu: DEFAULT_MTU,
            stats: InterfaceStats::default(),
            tx_hook: None,
        }
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MAC address.
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// Flag word.
    pub fn flags(&self) -> InterfaceFlags {
        self.flags
    }

    /// Whether the interface is administratively up.
    pub fn is_up(&self) -> bool {
        self.flags.contains(InterfaceFlags::UP)
    }

    /// Configured IPv4 address.
    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.ip
    }

    /// Configured netmask.
    pub fn netmask(&self) -> Option<SubnetMask> {
        self.netmask
    }

    /// Configured gateway.
    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    /// MTU.
    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    /// Counters.
    pub fn stats(&self) -> InterfaceStats {
        self.stats
    }

    /// Bring the interface up.
    pub fn up(&mut self) {
        self.flags |= InterfaceFlags::UP | InterfaceFlags::RUNNING;
    }

    /// Bring the interface down.
    pub fn down(&mut self) {
        self.flags &= !(InterfaceFlags::UP | InterfaceFlags::RUNNING);
    }

    /// Assign an address and mask.
    pub fn set_ip(&mut self, ip: Ipv4Addr, mask: SubnetMask) {
        self.ip = Some(ip);
        self.netmask = Some(mask);
    }

    /// Clear the address, mask and gateway.
    pub fn clear_ip(&mut self) {
        self.ip = None;
        self.netmask = None;
        self.gateway = None;
    }

    /// Set the default gateway.
    pub fn set_gateway(&mut self, gw: Ipv4Addr) {
        self.gateway = Some(gw);
    }

    /// Toggle promiscuous mode.
    pub fn set_promiscuous(&mut self, on: bool) {
        if on {
            self.flags |= InterfaceFlags::PROMISC;
        } else {
            self.flags &= !InterfaceFlags::PROMISC;
        }
    }

    /// Whether promiscuous mode is on.
    pub fn is_promiscuous(&self) -> bool {
        self.flags.contains(InterfaceFlags::PROMISC)
    }

    /// Set the MTU, bounds-checked.
    pub fn set_mtu(&mut self, mtu: u32) -> Result<(), NetError> {
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            return Err(NetError::MtuOutOfRange(mtu));
        }
        self.mtu = mtu;
        Ok(())
    }

    /// Install the tx hook (the wiring layer owns this slot).
    pub fn set_tx_hook(&mut self, hook: TxHook) {
        self.tx_hook = Some(hook);
    }

    /// Remove the tx hook.
    pub fn clear_tx_hook(&mut self) {
        self.tx_hook = None;
    }

    /// Whether a wire is attached.
    pub fn is_wired(&self) -> bool {
        self.tx_hook.is_some()
    }

    /// Put a frame on the wire.
    ///
    /// Fails when the interface is down. Counters are updated and the tx
    /// hook (if wired) sees the frame; an unwired interface transmits into
    /// the void, which is not an error.
    pub fn transmit(&mut self, frame: &EthernetFrame) -> Result<(), NetError> {
        if !self.is_up() {
            return Err(NetError::InterfaceDown);
        }
        self.stats.tx_frames += 1;
        self.stats.tx_bytes += frame.wire_len() as u64;
        if let Some(hook) = self.tx_hook.as_mut() {
            hook(frame);
        }
        Ok(())
    }

    /// Run the receive filter for a frame arriving from the wire.
    ///
    /// Deliver iff the destination MAC is our own or broadcast, or
    /// promiscuous mode is on. Multicast frames are not delivered without
    /// promiscuous mode (there is no group membership table).
    pub fn receive(&mut self, frame: &EthernetFrame) -> RxDisposition {
        if !self.is_up() {
            return RxDisposition::Down;
        }
        if frame.dst == self.mac || frame.dst.is_broadcast() || self.is_promiscuous() {
            self.stats.rx_frames += 1;
            self.stats.rx_bytes += frame.wire_len() as u64;
            RxDisposition::Delivered
        } else {
            self.stats.dropped_frames += 1;
            RxDisposition::Filtered
        }
    }
}

impl fmt::Debug for NetworkInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkInterface")
            .field("name", &self.name)
            .field("mac", &self.mac)
            .field("flags", &self.flags)
            .field("ip", &self.ip)
            .field("mtu", &self.mtu)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ethernet::ETHERTYPE_IPV4;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn frame(dst: MacAddress) -> EthernetFrame {
        EthernetFrame::new(dst, mac(9), ETHERTYPE_IPV4, vec![0; 46]).unwrap()
    }

    #[test]
    fn test_transmit_requires_up() {
        let mut nic = NetworkInterface::new("eth0", mac(1));
        let f = frame(mac(2));
        assert_eq!(nic.transmit(&f), Err(NetError::InterfaceDown));
        nic.up();
        assert!(nic.transmit(&f).is_ok());
        assert_eq!(nic.stats().tx_frames, 1);
        assert_eq!(nic.stats().tx_bytes, f.wire_len() as u64);
    }

    #[test]
    fn test_tx_hook_sees_frames() {
        let mut nic = NetworkInterface::new("eth0", mac(1));
        nic.up();
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();
        nic.set_tx_hook(Box::new(move |_| {
            hook_count.fetch_add(1, Ordering::Relaxed);
        }));
        nic.transmit(&frame(mac(2))).unwrap();
        nic.transmit(&frame(mac(3))).unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 2);
        nic.clear_tx_hook();
        nic.transmit(&frame(mac(4))).unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_receive_filter() {
        let mut nic = NetworkInterface::new("eth0", mac(1));
        nic.up();

        assert_eq!(nic.receive(&frame(mac(1))), RxDisposition::Delivered);
        assert_eq!(
            nic.receive(&frame(MacAddress::BROADCAST)),
            RxDisposition::Delivered
        );
        assert_eq!(nic.receive(&frame(mac(7))), RxDisposition::Filtered);
        assert_eq!(nic.stats().rx_frames, 2);
        assert_eq!(nic.stats().dropped_frames, 1);
    }

    #[test]
    fn test_multicast_needs_promiscuous() {
        let mut nic = NetworkInterface::new("eth0", mac(1));
        nic.up();
        let mcast = frame(MacAddress::new([0x01, 0x00, 0x5E, 0, 0, 1]));
        assert_eq!(nic.receive(&mcast), RxDisposition::Filtered);
        nic.set_promiscuous(true);
        assert_eq!(nic.receive(&mcast), RxDisposition::Delivered);
    }

    #[test]
    fn test_receive_noop_when_down() {
        let mut nic = NetworkInterface::new("eth0", mac(1));
        assert_eq!(nic.receive(&frame(mac(1))), RxDisposition::Down);
        assert_eq!(nic.stats(), InterfaceStats::default());
    }

    #[test]
    fn test_mtu_bounds() {
        let mut nic = NetworkInterface::new("eth0", mac(1));
        assert!(nic.set_mtu(1500).is_ok());
        assert!(nic.set_mtu(9216).is_ok());
        assert_eq!(nic.set_mtu(575), Err(NetError::MtuOutOfRange(575)));
        assert_eq!(nic.set_mtu(9217), Err(NetError::MtuOutOfRange(9217)));
        assert_eq!(nic.mtu(), 9216);
    }

    #[test]
    fn test_flags_render() {
        let mut nic = NetworkInterface::new("eth0", mac(1));
        nic.up();
        assert_eq!(nic.flags().to_string(), "UP,BROADCAST,RUNNING,MULTICAST");
    }
}
