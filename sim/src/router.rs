//! Router Kernel
//!
//! Wraps the routing engine and an optional per-interface DHCP server.
//! Frames the engine classifies as local are inspected for DHCP traffic
//! (UDP port 67); server replies are encapsulated back out the interface
//! they came in on.

use std::collections::BTreeMap;

use log::debug;

use wirelab_net::dhcp::{DhcpServer, DhcpServerConfig};
use wirelab_net::nic::NetworkInterface;
use wirelab_net::route::Route;
use wirelab_net::router::{FrameDisposition, RouterEngine, RouterStats};
use wirelab_net::wire::ethernet::ETHERTYPE_IPV4;
use wirelab_net::wire::ipv4::{DEFAULT_TTL, PROTO_UDP};
use wirelab_net::wire::udp::{PORT_DHCP_CLIENT, PORT_DHCP_SERVER};
use wirelab_net::wire::{DhcpPacket, EthernetFrame, Ipv4Packet, UdpDatagram};
use wirelab_net::{Ipv4Addr, MacAddress, NetError, SubnetMask};

/// A layer-3 router with integrated DHCP service.
pub struct Router {
    online: bool,
    engine: RouterEngine,
    dhcp: BTreeMap<String, DhcpServer>,
}

impl Router {
    /// Create a router; interfaces are named `eth0..ethN-1`, unaddressed
    /// and down until configured.
    pub fn new(iface_macs: Vec<MacAddress>) -> Self {
        let mut engine = RouterEngine::new();
        for (i, mac) in iface_macs.into_iter().enumerate() {
            engine.add_interface(NetworkInterface::new(format!("eth{}", i), mac));
        }
        Router {
            online: true,
            engine,
            dhcp: BTreeMap::new(),
        }
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// The routing engine.
    pub fn engine(&self) -> &RouterEngine {
        &self.engine
    }

    /// Mutable engine access.
    pub fn engine_mut(&mut self) -> &mut RouterEngine {
        &mut self.engine
    }

    /// Engine counters.
    pub fn stats(&self) -> RouterStats {
        self.engine.stats()
    }

    pub fn nic(&self, iface: &str) -> Option<&NetworkInterface> {
        self.engine.nic(iface)
    }

    pub fn nic_mut(&mut self, iface: &str) -> Option<&mut NetworkInterface> {
        self.engine.nic_mut(iface)
    }

    /// Address an interface (installs its connected route).
    pub fn set_ip(&mut self, iface: &str, ip: Ipv4Addr, mask: SubnetMask) -> Result<(), NetError> {
        self.engine.set_ip(iface, ip, mask)
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
        self.engine.add_route(network, mask, next_hop, iface, metric)
    }

    /// Install the default route.
    pub fn set_default_route(&mut self, next_hop: Ipv4Addr, iface: &str) -> Result<(), NetError> {
        self.engine.set_default_route(next_hop, iface)
    }

    /// Longest-prefix lookup.
    pub fn lookup(&self, dest: Ipv4Addr) -> Option<&Route> {
        self.engine.lookup(dest)
    }

    /// Attach a DHCP server to an interface.
    pub fn enable_dhcp(&mut self, iface: &str, config: DhcpServerConfig) -> Result<(), NetError> {
        if self.engine.nic(iface).is_none() {
            return Err(NetError::UnknownInterface(iface.to_string()));
        }
        self.dhcp.insert(iface.to_string(), DhcpServer::new(config));
        Ok(())
    }

    /// Detach the DHCP server from an interface.
    pub fn disable_dhcp(&mut self, iface: &str) {
        self.dhcp.remove(iface);
    }

    /// The DHCP server on an interface, if any.
    pub fn dhcp_server(&self, iface: &str) -> Option<&DhcpServer> {
        self.dhcp.get(iface)
    }

    /// Mutable DHCP server access.
    pub fn dhcp_server_mut(&mut self, iface: &str) -> Option<&mut DhcpServer> {
        self.dhcp.get_mut(iface)
    }

    /// Process a frame received on `iface`.
    pub fn receive_frame(&mut self, iface: &str, frame: EthernetFrame, now_ms: u64) {
        if !self.online {
            return;
        }
        match self.engine.handle_frame(iface, &frame, now_ms) {
            FrameDisposition::Consumed => {}
            FrameDisposition::Local { iface, packet } => {
                self.deliver_local(&iface, &packet, now_ms);
            }
        }
    }

    /// Local delivery: only the DHCP service listens on this router.
    fn deliver_local(&mut self, iface: &str, pkt: &Ipv4Packet, now_ms: u64) {
        if pkt.protocol != PROTO_UDP {
            return;
        }
        let dgram = match UdpDatagram::decode(pkt.payload()) {
            Ok(d) => d,
            Err(_) => return,
        };
        if dgram.dst_port != PORT_DHCP_SERVER {
            return;
        }
        let request = match DhcpPacket::decode(&dgram.payload) {
            Ok(p) => p,
            Err(_) => return,
        };

        let server = match self.dhcp.get_mut(iface) {
            Some(s) => s,
            None => {
                debug!("dhcp request on {} but no server bound", iface);
                return;
            }
        };
        let response = match server.handle_packet(&request, now_ms) {
            Some(r) => r,
            None => return,
        };
        let server_ip = server.config().server_ip;

        // Broadcast unless the client already has an address to receive on.
        let broadcast = response.is_broadcast() || response.yiaddr.is_unspecified();
        let (dst_ip, dst_mac) = if broadcast {
            (Ipv4Addr::BROADCAST, MacAddress::BROADCAST)
        } else {
            (response.yiaddr, response.client_mac())
        };

        let dgram = UdpDatagram::new(PORT_DHCP_SERVER, PORT_DHCP_CLIENT, response.encode());
        let ip_pkt = match Ipv4Packet::new(server_ip, dst_ip, PROTO_UDP, DEFAULT_TTL, dgram.encode())
        {
            Ok(p) => p,
            Err(_) => return,
        };
        let nic = match self.engine.nic_mut(iface) {
            Some(n) => n,
            None => return,
        };
        if let Ok(out) = EthernetFrame::new(dst_mac, nic.mac(), ETHERTYPE_IPV4, ip_pkt.encode()) {
            let _ = nic.transmit(&out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use wirelab_net::wire::DhcpMessageType;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn mask24() -> SubnetMask {
        SubnetMask::from_prefix(24).unwrap()
    }

    fn router_with_dhcp() -> (Router, Arc<Mutex<Vec<EthernetFrame>>>) {
        let sent: Arc<Mutex<Vec<EthernetFrame>>> = Arc::new(Mutex::new(Vec::new()));
        let mut r = Router::new(vec![mac(0x10)]);
        r.set_ip("eth0", Ipv4Addr::new(192, 168, 1, 1), mask24()).unwrap();
        let tx = sent.clone();
        r.nic_mut("eth0")
            .unwrap()
            .set_tx_hook(Box::new(move |f| tx.lock().unwrap().push(f.clone())));
        r.enable_dhcp(
            "eth0",
            DhcpServerConfig {
                server_ip: Ipv4Addr::new(192, 168, 1, 1),
                pool_start: Ipv4Addr::new(192, 168, 1, 100),
                pool_end: Ipv4Addr::new(192, 168, 1, 200),
                subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
                gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
                dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8)],
                lease_time_secs: 86400,
                domain_name: None,
            },
        )
        .unwrap();
        (r, sent)
    }

    fn discover_frame(client_mac: MacAddress) -> EthernetFrame {
        let mut discover = DhcpPacket::new_request(DhcpMessageType::Discover, 0x42, client_mac);
        discover.set_broadcast(true);
        let dgram = UdpDatagram::new(PORT_DHCP_CLIENT, PORT_DHCP_SERVER, discover.encode());
        let pkt = Ipv4Packet::new(Ipv4Addr::ANY, Ipv4Addr::BROADCAST, PROTO_UDP, 64, dgram.encode())
            .unwrap();
        EthernetFrame::new(MacAddress::BROADCAST, client_mac, ETHERTYPE_IPV4, pkt.encode()).unwrap()
    }

    #[test]
    fn test_discover_produces_broadcast_offer() {
        let (mut r, sent) = router_with_dhcp();
        r.receive_frame("eth0", discover_frame(mac(0x99)), 0);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dst, MacAddress::BROADCAST);
        let ip = Ipv4Packet::decode(sent[0].payload()).unwrap();
        assert_eq!(ip.src, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(ip.dst, Ipv4Addr::BROADCAST);
        let udp = UdpDatagram::decode(ip.payload()).unwrap();
        assert_eq!((udp.src_port, udp.dst_port), (67, 68));
        let offer = DhcpPacket::decode(&udp.payload).unwrap();
        assert_eq!(offer.message_type, DhcpMessageType::Offer);
        assert_eq!(offer.yiaddr, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(offer.xid, 0x42);
    }

    #[test]
    fn test_no_dhcp_on_interface_stays_silent() {
        let (mut r, sent) = router_with_dhcp();
        r.disable_dhcp("eth0");
        r.receive_frame("eth0", discover_frame(mac(0x99)), 0);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_offline_router_drops() {
        let (mut r, sent) = router_with_dhcp();
        r.set_online(false);
        r.receive_frame("eth0", discover_frame(mac(0x99)), 0);
        assert!(sent.lock().unwrap().is_empty());
    }
}
