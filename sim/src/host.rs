//! Host Kernel
//!
//! A single-NIC end system: ARP responder and cache, ICMP echo initiator
//! and responder, DHCP client, and the send path `ping` drives. Frames are
//! demultiplexed by EtherType, then by IP protocol.

use log::{debug, trace};

use wirelab_net::arp::ArpService;
use wirelab_net::dhcp::client::DhcpClientEvent;
use wirelab_net::dhcp::DhcpClient;
use wirelab_net::icmp::{IcmpService, DEFAULT_TIMEOUT_MS};
use wirelab_net::nic::{NetworkInterface, RxDisposition};
use wirelab_net::wire::ethernet::{ETHERTYPE_ARP, ETHERTYPE_IPV4};
use wirelab_net::wire::icmp::{TYPE_ECHO_REPLY, TYPE_ECHO_REQUEST};
use wirelab_net::wire::ipv4::{PROTO_ICMP, PROTO_UDP};
use wirelab_net::wire::udp::{PORT_DHCP_CLIENT, PORT_DHCP_SERVER};
use wirelab_net::wire::{
    ArpOperation, ArpPacket, DhcpPacket, EthernetFrame, IcmpPacket, Ipv4Packet, UdpDatagram,
};
use wirelab_net::{Ipv4Addr, MacAddress, NetError, SubnetMask};

/// Payload carried by outgoing echo requests: 56 pattern bytes, which
/// together with the ICMP header makes the classic 64-byte ping.
pub const ECHO_DATA_LEN: usize = 56;

// ── OS flavor ───────────────────────────────────────────────

/// Which stack the host imitates; decides default TTL and which terminal
/// dialect it answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFlavor {
    Linux,
    Windows,
}

impl OsFlavor {
    /// Default TTL for originated IPv4 packets.
    pub fn default_ttl(self) -> u8 {
        match self {
            OsFlavor::Linux => 64,
            OsFlavor::Windows => 128,
        }
    }
}

// ── Host ────────────────────────────────────────────────────

/// An end system with one interface.
pub struct Host {
    hostname: String,
    os: OsFlavor,
    online: bool,
    nic: NetworkInterface,
    arp: ArpService,
    icmp: IcmpService,
    dhcp: DhcpClient,
    dns_servers: Vec<Ipv4Addr>,
}

impl Host {
    /// Create a host; the interface is named `eth0` and starts down.
    pub fn new(hostname: impl Into<String>, os: OsFlavor, mac: MacAddress) -> Self {
        let hostname = hostname.into();
        Host {
            dhcp: DhcpClient::new(mac, Some(hostname.clone())),
            hostname,
            os,
            online: true,
            nic: NetworkInterface::new("eth0", mac),
            arp: ArpService::new(),
            icmp: IcmpService::new(),
            dns_servers: Vec::new(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn os(&self) -> OsFlavor {
        self.os
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn nic(&self) -> &NetworkInterface {
        &self.nic
    }

    pub fn nic_mut(&mut self) -> &mut NetworkInterface {
        &mut self.nic
    }

    pub fn arp(&self) -> &ArpService {
        &self.arp
    }

    pub fn arp_mut(&mut self) -> &mut ArpService {
        &mut self.arp
    }

    pub fn icmp(&self) -> &IcmpService {
        &self.icmp
    }

    pub fn icmp_mut(&mut self) -> &mut IcmpService {
        &mut self.icmp
    }

    pub fn dhcp(&self) -> &DhcpClient {
        &self.dhcp
    }

    pub fn dhcp_mut(&mut self) -> &mut DhcpClient {
        &mut self.dhcp
    }

    /// DNS servers learned from DHCP.
    pub fn dns_servers(&self) -> &[Ipv4Addr] {
        &self.dns_servers
    }

    // ── Receive path ────────────────────────────────────────

    /// Process a frame arriving on `eth0`.
    pub fn receive_frame(&mut self, mut frame: EthernetFrame, now_ms: u64) {
        if !self.online {
            return;
        }
        frame.captured_at_ms = now_ms;
        if self.nic.receive(&frame) != RxDisposition::Delivered {
            return;
        }

        match frame.ether_type {
            ETHERTYPE_ARP => self.handle_arp(&frame, now_ms),
            ETHERTYPE_IPV4 => self.handle_ipv4(&frame, now_ms),
            _ => {} // drop unknown ethertype
        }
    }

    fn handle_arp(&mut self, frame: &EthernetFrame, now_ms: u64) {
        let pkt = match ArpPacket::decode(frame.payload()) {
            Ok(p) => p,
            Err(_) => return, // malformed, drop silently
        };
        self.arp.process_packet(&pkt, now_ms);

        if pkt.operation == ArpOperation::Request && Some(pkt.target_ip) == self.nic.ip() {
            let reply =
                ArpPacket::reply(self.nic.mac(), pkt.target_ip, pkt.sender_mac, pkt.sender_ip);
            if let Ok(out) = EthernetFrame::new(
                pkt.sender_mac,
                self.nic.mac(),
                ETHERTYPE_ARP,
                reply.encode(),
            ) {
                let _ = self.nic.transmit(&out);
            }
        }
    }

    fn handle_ipv4(&mut self, frame: &EthernetFrame, now_ms: u64) {
        let pkt = match Ipv4Packet::decode(frame.payload()) {
            Ok(p) => p,
            Err(_) => return,
        };

        // Not ours: hosts don't forward.
        let own = self.nic.ip();
        let subnet_broadcast = match (own, self.nic.netmask()) {
            (Some(ip), Some(mask)) => pkt.dst == ip.broadcast_of(mask),
            _ => false,
        };
        if Some(pkt.dst) != own && !pkt.dst.is_limited_broadcast() && !subnet_broadcast {
            return;
        }

        match pkt.protocol {
            PROTO_ICMP => self.handle_icmp(frame, &pkt, now_ms),
            PROTO_UDP => self.handle_udp(&pkt, now_ms),
            _ => {} // drop unknown protocol
        }
    }

    fn handle_icmp(&mut self, frame: &EthernetFrame, pkt: &Ipv4Packet, now_ms: u64) {
        let icmp = match IcmpPacket::decode(pkt.payload()) {
            Ok(p) => p,
            Err(_) => return,
        };

        match icmp.icmp_type {
            // Echo request: answer straight back to the asking MAC.
            TYPE_ECHO_REQUEST => {
                let own = match self.nic.ip() {
                    Some(ip) => ip,
                    None => return,
                };
                let reply = match IcmpPacket::echo_reply_for(&icmp) {
                    Some(r) => r,
                    None => return,
                };
                let ip_reply = match Ipv4Packet::new(
                    own,
                    pkt.src,
                    PROTO_ICMP,
                    self.os.default_ttl(),
                    reply.encode(),
                ) {
                    Ok(p) => p,
                    Err(_) => return,
                };
                if let Ok(out) = EthernetFrame::new(
                    frame.src,
                    self.nic.mac(),
                    ETHERTYPE_IPV4,
                    ip_reply.encode(),
                ) {
                    trace!("{}: echo reply to {}", self.hostname, pkt.src);
                    let _ = self.nic.transmit(&out);
                }
            }
            TYPE_ECHO_REPLY => {
                self.icmp.handle_echo_reply(pkt.src, pkt.ttl, &icmp, now_ms);
            }
            _ => {
                debug!(
                    "{}: icmp type {} code {} from {}",
                    self.hostname, icmp.icmp_type, icmp.code, pkt.src
                );
            }
        }
    }

    fn handle_udp(&mut self, pkt: &Ipv4Packet, now_ms: u64) {
        let dgram = match UdpDatagram::decode(pkt.payload()) {
            Ok(d) => d,
            Err(_) => return,
        };
        if dgram.dst_port != PORT_DHCP_CLIENT {
            return; // no other UDP consumers on a host
        }
        let dhcp = match DhcpPacket::decode(&dgram.payload) {
            Ok(p) => p,
            Err(_) => return,
        };
        if dhcp.client_mac() != self.nic.mac() {
            return; // some other client's exchange
        }

        match self.dhcp.handle_packet(&dhcp, now_ms) {
            DhcpClientEvent::SendRequest(request) => {
                self.transmit_dhcp(&request, now_ms);
            }
            DhcpClientEvent::Bound => self.apply_lease(now_ms),
            DhcpClientEvent::Rejected => {
                debug!("{}: lease rejected, clearing address", self.hostname);
                self.nic.clear_ip();
                self.dns_servers.clear();
            }
            DhcpClientEvent::Ignored => {}
        }
    }

    // ── Send path ───────────────────────────────────────────

    /// Next hop for `dest`: itself when on-link, the gateway otherwise.
    fn next_hop_for(&self, dest: Ipv4Addr) -> Result<Ipv4Addr, NetError> {
        let (ip, mask) = match (self.nic.ip(), self.nic.netmask()) {
            (Some(ip), Some(mask)) => (ip, mask),
            _ => return Err(NetError::NoRoute),
        };
        if dest.in_subnet(ip.network_of(mask), mask) {
            Ok(dest)
        } else {
            self.nic.gateway().ok_or(NetError::NoRoute)
        }
    }

    /// Resolve the next hop's MAC, broadcasting an ARP request on a miss.
    ///
    /// On a miss the current packet is dropped (`UnreachableNextHop`); the
    /// caller retries after the synchronous ARP exchange has settled.
    pub fn resolve_next_hop(&mut self, dest: Ipv4Addr, now_ms: u64) -> Result<MacAddress, NetError> {
        let next_hop = self.next_hop_for(dest)?;
        if let Some(mac) = self.arp.resolve(next_hop, now_ms) {
            return Ok(mac);
        }

        let own_ip = self.nic.ip().ok_or(NetError::NoRoute)?;
        let request = ArpPacket::request(self.nic.mac(), own_ip, next_hop);
        if let Ok(frame) = EthernetFrame::new(
            MacAddress::BROADCAST,
            self.nic.mac(),
            ETHERTYPE_ARP,
            request.encode(),
        ) {
            let _ = self.nic.transmit(&frame);
        }
        Err(NetError::UnreachableNextHop)
    }

    /// Build, record and transmit one echo request toward `dest`.
    ///
    /// Returns the sequence number to correlate the answer with.
    pub fn send_echo_request(&mut self, dest: Ipv4Addr, now_ms: u64) -> Result<u16, NetError> {
        let dst_mac = self.resolve_next_hop(dest, now_ms)?;
        let own = self.nic.ip().ok_or(NetError::NoRoute)?;

        let data: Vec<u8> = (0..ECHO_DATA_LEN as u8).collect();
        let (icmp, seq) = self
            .icmp
            .create_echo_request(dest, data, now_ms, DEFAULT_TIMEOUT_MS);
        let pkt = Ipv4Packet::new(own, dest, PROTO_ICMP, self.os.default_ttl(), icmp.encode())?;
        let frame = EthernetFrame::new(dst_mac, self.nic.mac(), ETHERTYPE_IPV4, pkt.encode())?;
        self.nic.transmit(&frame)?;
        Ok(seq)
    }

    /// Kick off DHCP discovery (broadcast DISCOVER).
    pub fn start_dhcp_discover(&mut self, now_ms: u64) {
        let discover = self.dhcp.start_discover(now_ms);
        self.transmit_dhcp(&discover, now_ms);
    }

    /// Release the current lease, notify the server, clear the interface.
    pub fn dhcp_release(&mut self, now_ms: u64) -> Option<Ipv4Addr> {
        let released = self.dhcp.lease().map(|l| l.ip);
        if let Some(release) = self.dhcp.release() {
            self.transmit_dhcp(&release, now_ms);
        }
        self.nic.clear_ip();
        self.dns_servers.clear();
        released
    }

    /// Encapsulate a client message in UDP/IPv4/Ethernet and transmit.
    ///
    /// Broadcast messages (and anything sent without an address) go to
    /// 255.255.255.255; unicast renewals/releases go straight to the
    /// server if its MAC resolves, and fall back to broadcast otherwise.
    fn transmit_dhcp(&mut self, pkt: &DhcpPacket, now_ms: u64) {
        let dgram = UdpDatagram::new(PORT_DHCP_CLIENT, PORT_DHCP_SERVER, pkt.encode());

        let unicast_dst = if pkt.is_broadcast() || pkt.ciaddr.is_unspecified() {
            None
        } else {
            pkt.options.server_id
        };

        let (src_ip, dst_ip, dst_mac) = match unicast_dst {
            Some(server) => match self.arp.resolve(server, now_ms) {
                Some(mac) => (pkt.ciaddr, server, mac),
                None => (pkt.ciaddr, Ipv4Addr::BROADCAST, MacAddress::BROADCAST),
            },
            None => (
                self.nic.ip().unwrap_or(Ipv4Addr::ANY),
                Ipv4Addr::BROADCAST,
                MacAddress::BROADCAST,
            ),
        };

        let ip_pkt = match Ipv4Packet::new(
            src_ip,
            dst_ip,
            PROTO_UDP,
            self.os.default_ttl(),
            dgram.encode(),
        ) {
            Ok(p) => p,
            Err(_) => return,
        };
        if let Ok(frame) =
            EthernetFrame::new(dst_mac, self.nic.mac(), ETHERTYPE_IPV4, ip_pkt.encode())
        {
            let _ = self.nic.transmit(&frame);
        }
    }

    /// Apply a freshly bound lease to the interface and announce it.
    fn apply_lease(&mut self, _now_ms: u64) {
        let lease = match self.dhcp.lease() {
            Some(l) => l.clone(),
            None => return,
        };
        let mask = match SubnetMask::new(lease.subnet_mask) {
            Ok(m) => m,
            Err(_) => {
                debug!("{}: server sent a non-contiguous mask, ignoring lease", self.hostname);
                return;
            }
        };

        self.nic.set_ip(lease.ip, mask);
        if let Some(gw) = lease.gateway {
            self.nic.set_gateway(gw);
        }
        self.dns_servers = lease.dns_servers.clone();
        self.nic.up();

        // Announce the new binding
        let gratuitous = ArpPacket::gratuitous(self.nic.mac(), lease.ip);
        if let Ok(frame) = EthernetFrame::new(
            MacAddress::BROADCAST,
            self.nic.mac(),
            ETHERTYPE_ARP,
            gratuitous.encode(),
        ) {
            let _ = self.nic.transmit(&frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn mask24() -> SubnetMask {
        SubnetMask::from_prefix(24).unwrap()
    }

    /// A host with eth0 up at the given address, capturing transmissions.
    fn host_at(ip: Ipv4Addr) -> (Host, Arc<Mutex<Vec<EthernetFrame>>>) {
        let sent: Arc<Mutex<Vec<EthernetFrame>>> = Arc::new(Mutex::new(Vec::new()));
        let mut host = Host::new("h1", OsFlavor::Linux, mac(1));
        host.nic_mut().set_ip(ip, mask24());
        host.nic_mut().up();
        let tx = sent.clone();
        host.nic_mut().set_tx_hook(Box::new(move |frame| {
            tx.lock().unwrap().push(frame.clone());
        }));
        (host, sent)
    }

    #[test]
    fn test_arp_request_for_our_ip_is_answered() {
        let (mut host, sent) = host_at(Ipv4Addr::new(192, 168, 1, 10));
        let req = ArpPacket::request(mac(2), Ipv4Addr::new(192, 168, 1, 20), Ipv4Addr::new(192, 168, 1, 10));
        let frame = EthernetFrame::new(MacAddress::BROADCAST, mac(2), ETHERTYPE_ARP, req.encode()).unwrap();

        host.receive_frame(frame, 0);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dst, mac(2));
        let reply = ArpPacket::decode(sent[0].payload()).unwrap();
        assert_eq!(reply.operation, ArpOperation::Reply);
        assert_eq!(reply.sender_ip, Ipv4Addr::new(192, 168, 1, 10));
        // And the requester was cached
        assert_eq!(
            host.arp_mut().resolve(Ipv4Addr::new(192, 168, 1, 20), 1),
            Some(mac(2))
        );
    }

    #[test]
    fn test_arp_request_for_other_ip_not_answered() {
        let (mut host, sent) = host_at(Ipv4Addr::new(192, 168, 1, 10));
        let req = ArpPacket::request(mac(2), Ipv4Addr::new(192, 168, 1, 20), Ipv4Addr::new(192, 168, 1, 99));
        let frame = EthernetFrame::new(MacAddress::BROADCAST, mac(2), ETHERTYPE_ARP, req.encode()).unwrap();
        host.receive_frame(frame, 0);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_echo_request_answered_to_frame_source() {
        let (mut host, sent) = host_at(Ipv4Addr::new(192, 168, 1, 10));
        let icmp = IcmpPacket::echo_request(7, 1, vec![0; 16]);
        let pkt = Ipv4Packet::new(
            Ipv4Addr::new(192, 168, 1, 20),
            Ipv4Addr::new(192, 168, 1, 10),
            PROTO_ICMP,
            64,
            icmp.encode(),
        )
        .unwrap();
        let frame = EthernetFrame::new(mac(1), mac(2), ETHERTYPE_IPV4, pkt.encode()).unwrap();

        host.receive_frame(frame, 0);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dst, mac(2));
        let ip = Ipv4Packet::decode(sent[0].payload()).unwrap();
        assert_eq!(ip.dst, Ipv4Addr::new(192, 168, 1, 20));
        let reply = IcmpPacket::decode(ip.payload()).unwrap();
        assert_eq!(reply.icmp_type, TYPE_ECHO_REPLY);
        assert_eq!(reply.echo_fields().unwrap().0, 7);
    }

    #[test]
    fn test_foreign_destination_dropped() {
        let (mut host, sent) = host_at(Ipv4Addr::new(192, 168, 1, 10));
        let icmp = IcmpPacket::echo_request(7, 1, vec![0; 16]);
        let pkt = Ipv4Packet::new(
            Ipv4Addr::new(192, 168, 1, 20),
            Ipv4Addr::new(192, 168, 1, 77), // not us
            PROTO_ICMP,
            64,
            icmp.encode(),
        )
        .unwrap();
        // Frame addressed to our MAC but IP for someone else
        let frame = EthernetFrame::new(mac(1), mac(2), ETHERTYPE_IPV4, pkt.encode()).unwrap();
        host.receive_frame(frame, 0);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_echo_arps_first_then_fails_unresolved() {
        let (mut host, sent) = host_at(Ipv4Addr::new(192, 168, 1, 10));
        let err = host.send_echo_request(Ipv4Addr::new(192, 168, 1, 20), 0);
        assert_eq!(err.unwrap_err(), NetError::UnreachableNextHop);

        // The miss broadcast an ARP request for the destination
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dst, MacAddress::BROADCAST);
        let arp = ArpPacket::decode(sent[0].payload()).unwrap();
        assert_eq!(arp.target_ip, Ipv4Addr::new(192, 168, 1, 20));
    }

    #[test]
    fn test_send_echo_with_cached_mac() {
        let (mut host, sent) = host_at(Ipv4Addr::new(192, 168, 1, 10));
        host.arp_mut().add_entry(Ipv4Addr::new(192, 168, 1, 20), mac(2), 0);
        let seq = host.send_echo_request(Ipv4Addr::new(192, 168, 1, 20), 0).unwrap();
        assert_eq!(seq, 1);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dst, mac(2));
        let ip = Ipv4Packet::decode(sent[0].payload()).unwrap();
        assert_eq!(ip.ttl, 64);
        assert_eq!(ip.protocol, PROTO_ICMP);
        assert_eq!(host.icmp().pending_count(), 1);
    }

    #[test]
    fn test_off_subnet_uses_gateway() {
        let (mut host, sent) = host_at(Ipv4Addr::new(192, 168, 1, 10));
        host.nic_mut().set_gateway(Ipv4Addr::new(192, 168, 1, 1));
        host.arp_mut().add_entry(Ipv4Addr::new(192, 168, 1, 1), mac(0x77), 0);

        host.send_echo_request(Ipv4Addr::new(8, 8, 8, 8), 0).unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].dst, mac(0x77)); // gateway MAC, not 8.8.8.8's
    }

    #[test]
    fn test_no_gateway_is_no_route() {
        let (mut host, _) = host_at(Ipv4Addr::new(192, 168, 1, 10));
        let err = host.send_echo_request(Ipv4Addr::new(8, 8, 8, 8), 0);
        assert_eq!(err.unwrap_err(), NetError::NoRoute);
    }

    #[test]
    fn test_windows_ttl() {
        let sent: Arc<Mutex<Vec<EthernetFrame>>> = Arc::new(Mutex::new(Vec::new()));
        let mut host = Host::new("w1", OsFlavor::Windows, mac(3));
        host.nic_mut().set_ip(Ipv4Addr::new(192, 168, 1, 30), mask24());
        host.nic_mut().up();
        let tx = sent.clone();
        host.nic_mut().set_tx_hook(Box::new(move |f| tx.lock().unwrap().push(f.clone())));
        host.arp_mut().add_entry(Ipv4Addr::new(192, 168, 1, 20), mac(2), 0);

        host.send_echo_request(Ipv4Addr::new(192, 168, 1, 20), 0).unwrap();
        let ip = Ipv4Packet::decode(sent.lock().unwrap()[0].payload()).unwrap();
        assert_eq!(ip.ttl, 128);
    }

    #[test]
    fn test_offline_host_is_silent() {
        let (mut host, sent) = host_at(Ipv4Addr::new(192, 168, 1, 10));
        host.set_online(false);
        let req = ArpPacket::request(mac(2), Ipv4Addr::new(192, 168, 1, 20), Ipv4Addr::new(192, 168, 1, 10));
        let frame = EthernetFrame::new(MacAddress::BROADCAST, mac(2), ETHERTYPE_ARP, req.encode()).unwrap();
        host.receive_frame(frame, 0);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dhcp_discover_is_broadcast_udp() {
        let sent: Arc<Mutex<Vec<EthernetFrame>>> = Arc::new(Mutex::new(Vec::new()));
        let mut host = Host::new("h1", OsFlavor::Linux, mac(1));
        host.nic_mut().up();
        let tx = sent.clone();
        host.nic_mut().set_tx_hook(Box::new(move |f| tx.lock().unwrap().push(f.clone())));

        host.start_dhcp_discover(0);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dst, MacAddress::BROADCAST);
        let ip = Ipv4Packet::decode(sent[0].payload()).unwrap();
        assert_eq!(ip.src, Ipv4Addr::ANY);
        assert_eq!(ip.dst, Ipv4Addr::BROADCAST);
        let udp = UdpDatagram::decode(ip.payload()).unwrap();
        assert_eq!((udp.src_port, udp.dst_port), (68, 67));
        let dhcp = DhcpPacket::decode(&udp.payload).unwrap();
        assert_eq!(dhcp.client_mac(), mac(1));
    }
}
