//! DHCP Client — RFC 2131
//!
//! The client half of the DORA exchange as a state machine:
//! INIT → SELECTING → REQUESTING → BOUND, with RENEWING/REBINDING for
//! lease maintenance. The embedding transmits whatever packet a transition
//! hands back and drives timeouts through `now_ms`.

use log::{debug, info};

use crate::addr::{Ipv4Addr, MacAddress};
use crate::dhcp::{rebinding_time, renewal_time};
use crate::wire::{DhcpMessageType, DhcpPacket};

/// How long SELECTING waits for an offer (10 s).
pub const DEFAULT_DISCOVER_TIMEOUT_MS: u64 = 10_000;

/// Options requested in every DISCOVER/REQUEST: subnet mask, router, DNS,
/// domain name, broadcast address, lease time.
const PARAM_REQUEST_LIST: [u8; 6] = [1, 3, 6, 15, 28, 51];

// ── State ───────────────────────────────────────────────────

/// Client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpClientState {
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
}

/// Everything a granted lease told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    pub ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub server_ip: Ipv4Addr,
    pub lease_time_secs: u32,
    pub renewal_secs: u32,
    pub rebinding_secs: u32,
    pub obtained_at_ms: u64,
    pub domain_name: Option<String>,
}

impl LeaseInfo {
    /// T1 reached: time to renew with our server.
    pub fn needs_renewal(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.obtained_at_ms) >= self.renewal_secs as u64 * 1000
    }

    /// T2 reached: time to rebind with any server.
    pub fn needs_rebind(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.obtained_at_ms) >= self.rebinding_secs as u64 * 1000
    }

    /// The lease has fully run out.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.obtained_at_ms) >= self.lease_time_secs as u64 * 1000
    }
}

/// The stored half of an OFFER while REQUESTING is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedOffer {
    pub ip: Ipv4Addr,
    pub server_ip: Ipv4Addr,
}

/// What processing an incoming server message produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpClientEvent {
    /// An OFFER was selected; transmit this REQUEST.
    SendRequest(DhcpPacket),
    /// An ACK bound (or re-bound) the lease.
    Bound,
    /// A NAK pushed the client back to INIT.
    Rejected,
    /// Not for us (wrong xid, wrong state, server-side type).
    Ignored,
}

// ── Client ──────────────────────────────────────────────────

/// The client state machine.
pub struct DhcpClient {
    mac: MacAddress,
    hostname: Option<String>,
    state: DhcpClientState,
    xid: u32,
    discover_started_ms: Option<u64>,
    discover_timeout_ms: u64,
    selected_offer: Option<SelectedOffer>,
    lease: Option<LeaseInfo>,
    prior_ip: Option<Ipv4Addr>,
}

impl DhcpClient {
    /// Create a client in INIT.
    pub fn new(mac: MacAddress, hostname: Option<String>) -> Self {
        DhcpClient {
            mac,
            hostname,
            state: DhcpClientState::Init,
            xid: 0,
            discover_started_ms: None,
            discover_timeout_ms: DEFAULT_DISCOVER_TIMEOUT_MS,
            selected_offer: None,
            lease: None,
            prior_ip: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> DhcpClientState {
        self.state
    }

    /// Current lease, if bound.
    pub fn lease(&self) -> Option<&LeaseInfo> {
        self.lease.as_ref()
    }

    /// The offer REQUESTING is working on.
    pub fn selected_offer(&self) -> Option<SelectedOffer> {
        self.selected_offer
    }

    /// Current transaction id.
    pub fn xid(&self) -> u32 {
        self.xid
    }

    /// Generate a new transaction ID (deterministic per client).
    fn new_xid(&mut self) -> u32 {
        // Simple LCG mixed with the MAC so clients don't collide
        self.xid = self.xid.wrapping_mul(1103515245).wrapping_add(12345);
        let m = self.mac.octets();
        self.xid ^= u32::from_be_bytes([m[2], m[3], m[4], m[5]]);
        self.xid
    }

    fn base_request(&self, message_type: DhcpMessageType) -> DhcpPacket {
        let mut pkt = DhcpPacket::new_request(message_type, self.xid, self.mac);
        pkt.options.hostname = self.hostname.clone();
        pkt
    }

    // ── Transitions ─────────────────────────────────────────

    /// INIT → SELECTING; returns the DISCOVER to broadcast.
    pub fn start_discover(&mut self, now_ms: u64) -> DhcpPacket {
        self.new_xid();
        self.state = DhcpClientState::Selecting;
        self.discover_started_ms = Some(now_ms);
        self.selected_offer = None;

        let mut pkt = self.base_request(DhcpMessageType::Discover);
        pkt.set_broadcast(true);
        pkt.options.param_request_list = PARAM_REQUEST_LIST.to_vec();
        // Ask for the address we had before, if any
        pkt.options.requested_ip = self.prior_ip;
        debug!("dhcp discover xid={:#010x}", self.xid);
        pkt
    }

    /// Whether SELECTING has waited past its timeout.
    pub fn is_discover_timeout(&self, now_ms: u64) -> bool {
        match (self.state, self.discover_started_ms) {
            (DhcpClientState::Selecting, Some(started)) => {
                now_ms.saturating_sub(started) >= self.discover_timeout_ms
            }
            _ => false,
        }
    }

    /// Back to INIT (discover timed out, or the embedding gave up).
    pub fn reset(&mut self) {
        self.state = DhcpClientState::Init;
        self.discover_started_ms = None;
        self.selected_offer = None;
    }

    /// Dispatch a server message against the current state.
    pub fn handle_packet(&mut self, pkt: &DhcpPacket, now_ms: u64) -> DhcpClientEvent {
        match pkt.message_type {
            DhcpMessageType::Offer => match self.handle_offer(pkt) {
                Some(request) => DhcpClientEvent::SendRequest(request),
                None => DhcpClientEvent::Ignored,
            },
            DhcpMessageType::Ack => {
                if self.handle_ack(pkt, now_ms) {
                    DhcpClientEvent::Bound
                } else {
                    DhcpClientEvent::Ignored
                }
            }
            DhcpMessageType::Nak => {
                if self.handle_nak(pkt) {
                    DhcpClientEvent::Rejected
                } else {
                    DhcpClientEvent::Ignored
                }
            }
            _ => DhcpClientEvent::Ignored,
        }
    }

    /// SELECTING → REQUESTING on the first matching OFFER; returns the
    /// REQUEST to broadcast.
    pub fn handle_offer(&mut self, offer: &DhcpPacket) -> Option<DhcpPacket> {
        if self.state != DhcpClientState::Selecting || offer.xid != self.xid {
            return None;
        }
        let server_ip = offer.options.server_id.unwrap_or(offer.siaddr);
        self.selected_offer = Some(SelectedOffer {
            ip: offer.yiaddr,
            server_ip,
        });
        self.state = DhcpClientState::Requesting;
        debug!("selected offer {} from {}", offer.yiaddr, server_ip);

        let mut request = self.base_request(DhcpMessageType::Request);
        request.set_broadcast(true);
        request.options.param_request_list = PARAM_REQUEST_LIST.to_vec();
        request.options.requested_ip = Some(offer.yiaddr);
        request.options.server_id = Some(server_ip);
        Some(request)
    }

    /// (REQUESTING | RENEWING | REBINDING) → BOUND on a complete ACK.
    pub fn handle_ack(&mut self, ack: &DhcpPacket, now_ms: u64) -> bool {
        if !matches!(
            self.state,
            DhcpClientState::Requesting | DhcpClientState::Renewing | DhcpClientState::Rebinding
        ) || ack.xid != self.xid
        {
            return false;
        }

        // Required fields: an address, a mask, and some server identity
        let subnet_mask = match ack.options.subnet_mask {
            Some(m) => m,
            None => return false,
        };
        if ack.yiaddr.is_unspecified() {
            return false;
        }
        let server_ip = match ack.options.server_id {
            Some(ip) => ip,
            None if !ack.siaddr.is_unspecified() => ack.siaddr,
            None => return false,
        };

        let lease_time_secs = ack.options.lease_time.unwrap_or(3600);
        self.lease = Some(LeaseInfo {
            ip: ack.yiaddr,
            subnet_mask,
            gateway: ack.options.router,
            dns_servers: ack.options.dns_servers.clone(),
            server_ip,
            lease_time_secs,
            renewal_secs: ack.options.renewal_time.unwrap_or(renewal_time(lease_time_secs)),
            rebinding_secs: ack
                .options
                .rebinding_time
                .unwrap_or(rebinding_time(lease_time_secs)),
            obtained_at_ms: now_ms,
            domain_name: ack.options.domain_name.clone(),
        });
        self.prior_ip = Some(ack.yiaddr);
        self.state = DhcpClientState::Bound;
        self.discover_started_ms = None;
        info!("bound to {} (lease {}s)", ack.yiaddr, lease_time_secs);
        true
    }

    /// (REQUESTING | RENEWING | REBINDING) → INIT on NAK.
    pub fn handle_nak(&mut self, nak: &DhcpPacket) -> bool {
        if !matches!(
            self.state,
            DhcpClientState::Requesting | DhcpClientState::Renewing | DhcpClientState::Rebinding
        ) || nak.xid != self.xid
        {
            return false;
        }
        debug!("dhcp nak: {:?}", nak.options.message);
        self.state = DhcpClientState::Init;
        self.selected_offer = None;
        self.lease = None;
        true
    }

    /// BOUND → RENEWING; returns the unicast REQUEST toward our server.
    pub fn start_renewal(&mut self, _now_ms: u64) -> Option<DhcpPacket> {
        if self.state != DhcpClientState::Bound {
            return None;
        }
        let lease = self.lease.as_ref()?;
        let (ip, server_ip) = (lease.ip, lease.server_ip);
        self.new_xid();
        self.state = DhcpClientState::Renewing;

        let mut request = self.base_request(DhcpMessageType::Request);
        request.set_broadcast(false);
        request.ciaddr = ip;
        request.options.server_id = Some(server_ip);
        request.options.param_request_list = PARAM_REQUEST_LIST.to_vec();
        Some(request)
    }

    /// RENEWING → REBINDING once T2 has passed; returns the broadcast
    /// REQUEST.
    pub fn start_rebinding(&mut self, now_ms: u64) -> Option<DhcpPacket> {
        if self.state != DhcpClientState::Renewing {
            return None;
        }
        let lease = self.lease.as_ref()?;
        if !lease.needs_rebind(now_ms) {
            return None;
        }
        let ip = lease.ip;
        self.state = DhcpClientState::Rebinding;

        let mut request = self.base_request(DhcpMessageType::Request);
        request.set_broadcast(true);
        request.ciaddr = ip;
        request.options.param_request_list = PARAM_REQUEST_LIST.to_vec();
        Some(request)
    }

    /// Any state → INIT; returns the RELEASE to send if a lease was held.
    pub fn release(&mut self) -> Option<DhcpPacket> {
        let lease = self.lease.take();
        self.state = DhcpClientState::Init;
        self.selected_offer = None;
        self.discover_started_ms = None;

        let lease = lease?;
        self.new_xid();
        let mut pkt = self.base_request(DhcpMessageType::Release);
        pkt.ciaddr = lease.ip;
        pkt.options.server_id = Some(lease.server_ip);
        info!("releasing {}", lease.ip);
        Some(pkt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        MacAddress::new([0x02, 0xAB, 0xCD, 0xEF, 0x01, 0x02])
    }

    fn client() -> DhcpClient {
        DhcpClient::new(mac(), Some("h1".into()))
    }

    fn offer_for(client: &DhcpClient, ip: Ipv4Addr) -> DhcpPacket {
        let mut offer = DhcpPacket::new_request(DhcpMessageType::Offer, client.xid(), mac());
        offer.op = crate::wire::dhcp::BOOTREPLY;
        offer.yiaddr = ip;
        offer.options.server_id = Some(Ipv4Addr::new(192, 168, 1, 1));
        offer
    }

    fn ack_for(client: &DhcpClient, ip: Ipv4Addr) -> DhcpPacket {
        let mut ack = DhcpPacket::new_request(DhcpMessageType::Ack, client.xid(), mac());
        ack.op = crate::wire::dhcp::BOOTREPLY;
        ack.yiaddr = ip;
        ack.options.server_id = Some(Ipv4Addr::new(192, 168, 1, 1));
        ack.options.subnet_mask = Some(Ipv4Addr::new(255, 255, 255, 0));
        ack.options.router = Some(Ipv4Addr::new(192, 168, 1, 1));
        ack.options.dns_servers = vec![Ipv4Addr::new(8, 8, 8, 8)];
        ack.options.lease_time = Some(86400);
        ack.options.renewal_time = Some(43200);
        ack.options.rebinding_time = Some(75600);
        ack
    }

    #[test]
    fn test_discover_enters_selecting() {
        let mut c = client();
        let discover = c.start_discover(0);
        assert_eq!(c.state(), DhcpClientState::Selecting);
        assert!(discover.is_broadcast());
        assert_eq!(discover.message_type, DhcpMessageType::Discover);
        assert_eq!(discover.options.param_request_list, vec![1, 3, 6, 15, 28, 51]);
        assert_eq!(discover.options.hostname.as_deref(), Some("h1"));
        assert_eq!(discover.options.requested_ip, None);
    }

    #[test]
    fn test_offer_moves_to_requesting() {
        let mut c = client();
        c.start_discover(0);
        let request = c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 100))).unwrap();
        assert_eq!(c.state(), DhcpClientState::Requesting);
        assert_eq!(request.message_type, DhcpMessageType::Request);
        assert_eq!(request.options.requested_ip, Some(Ipv4Addr::new(192, 168, 1, 100)));
        assert_eq!(request.options.server_id, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(
            c.selected_offer().unwrap().ip,
            Ipv4Addr::new(192, 168, 1, 100)
        );
    }

    #[test]
    fn test_offer_with_wrong_xid_ignored() {
        let mut c = client();
        c.start_discover(0);
        let mut offer = offer_for(&c, Ipv4Addr::new(192, 168, 1, 100));
        offer.xid ^= 1;
        assert!(c.handle_offer(&offer).is_none());
        assert_eq!(c.state(), DhcpClientState::Selecting);
    }

    #[test]
    fn test_second_offer_ignored() {
        let mut c = client();
        c.start_discover(0);
        c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 100))).unwrap();
        assert!(c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 101))).is_none());
    }

    #[test]
    fn test_ack_binds_with_lease_info() {
        let mut c = client();
        c.start_discover(0);
        c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 100))).unwrap();
        assert!(c.handle_ack(&ack_for(&c, Ipv4Addr::new(192, 168, 1, 100)), 5000));

        assert_eq!(c.state(), DhcpClientState::Bound);
        let lease = c.lease().unwrap();
        assert_eq!(lease.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(lease.subnet_mask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(lease.gateway, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(lease.renewal_secs, 43200);
        assert_eq!(lease.rebinding_secs, 75600);
        assert_eq!(lease.obtained_at_ms, 5000);
    }

    #[test]
    fn test_ack_missing_mask_rejected() {
        let mut c = client();
        c.start_discover(0);
        c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 100))).unwrap();
        let mut ack = ack_for(&c, Ipv4Addr::new(192, 168, 1, 100));
        ack.options.subnet_mask = None;
        assert!(!c.handle_ack(&ack, 0));
        assert_eq!(c.state(), DhcpClientState::Requesting);
    }

    #[test]
    fn test_ack_t1_t2_default_from_lease_time() {
        let mut c = client();
        c.start_discover(0);
        c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 100))).unwrap();
        let mut ack = ack_for(&c, Ipv4Addr::new(192, 168, 1, 100));
        ack.options.renewal_time = None;
        ack.options.rebinding_time = None;
        ack.options.lease_time = Some(1000);
        assert!(c.handle_ack(&ack, 0));
        let lease = c.lease().unwrap();
        assert_eq!(lease.renewal_secs, 500);
        assert_eq!(lease.rebinding_secs, 875);
    }

    #[test]
    fn test_nak_resets_to_init() {
        let mut c = client();
        c.start_discover(0);
        c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 100))).unwrap();
        let mut nak = DhcpPacket::new_request(DhcpMessageType::Nak, c.xid(), mac());
        nak.op = crate::wire::dhcp::BOOTREPLY;
        assert!(c.handle_nak(&nak));
        assert_eq!(c.state(), DhcpClientState::Init);
        assert!(c.lease().is_none());
    }

    #[test]
    fn test_discover_timeout() {
        let mut c = client();
        c.start_discover(1000);
        assert!(!c.is_discover_timeout(10_999));
        assert!(c.is_discover_timeout(11_000));
        c.reset();
        assert_eq!(c.state(), DhcpClientState::Init);
        assert!(!c.is_discover_timeout(99_999));
    }

    #[test]
    fn test_renewal_request_is_unicast_with_ciaddr() {
        let mut c = client();
        c.start_discover(0);
        c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 100))).unwrap();
        c.handle_ack(&ack_for(&c, Ipv4Addr::new(192, 168, 1, 100)), 0);

        assert!(c.lease().unwrap().needs_renewal(43200 * 1000));
        let renew = c.start_renewal(43200 * 1000).unwrap();
        assert_eq!(c.state(), DhcpClientState::Renewing);
        assert!(!renew.is_broadcast());
        assert_eq!(renew.ciaddr, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(renew.options.server_id, Some(Ipv4Addr::new(192, 168, 1, 1)));

        // ACK returns to BOUND with a fresh obtained_at
        assert!(c.handle_ack(&ack_for(&c, Ipv4Addr::new(192, 168, 1, 100)), 43200 * 1000));
        assert_eq!(c.state(), DhcpClientState::Bound);
        assert_eq!(c.lease().unwrap().obtained_at_ms, 43200 * 1000);
    }

    #[test]
    fn test_rebinding_after_t2() {
        let mut c = client();
        c.start_discover(0);
        c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 100))).unwrap();
        c.handle_ack(&ack_for(&c, Ipv4Addr::new(192, 168, 1, 100)), 0);
        c.start_renewal(43200 * 1000).unwrap();

        // T2 not reached yet
        assert!(c.start_rebinding(50_000 * 1000).is_none());
        let rebind = c.start_rebinding(75600 * 1000).unwrap();
        assert_eq!(c.state(), DhcpClientState::Rebinding);
        assert!(rebind.is_broadcast());
        assert_eq!(rebind.ciaddr, Ipv4Addr::new(192, 168, 1, 100));
    }

    #[test]
    fn test_release_emits_packet_and_resets() {
        let mut c = client();
        c.start_discover(0);
        c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 100))).unwrap();
        c.handle_ack(&ack_for(&c, Ipv4Addr::new(192, 168, 1, 100)), 0);

        let release = c.release().unwrap();
        assert_eq!(release.message_type, DhcpMessageType::Release);
        assert_eq!(release.ciaddr, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(release.options.server_id, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(c.state(), DhcpClientState::Init);
        assert!(c.lease().is_none());

        // Releasing without a lease is a no-op
        assert!(c.release().is_none());
    }

    #[test]
    fn test_next_discover_requests_prior_ip() {
        let mut c = client();
        c.start_discover(0);
        c.handle_offer(&offer_for(&c, Ipv4Addr::new(192, 168, 1, 100))).unwrap();
        c.handle_ack(&ack_for(&c, Ipv4Addr::new(192, 168, 1, 100)), 0);
        c.release();

        let rediscover = c.start_discover(1000);
        assert_eq!(
            rediscover.options.requested_ip,
            Some(Ipv4Addr::new(192, 168, 1, 100))
        );
    }
}
