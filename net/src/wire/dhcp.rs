//! DHCP Wire Format — RFC 2131 / RFC 2132
//!
//! BOOTP fixed frame (236 bytes), magic cookie, then TLV options terminated
//! by 0xFF. Option 53 (message type) is mandatory: the decoder extracts it,
//! the encoder inserts it exactly once.

use core::fmt;

use crate::addr::{Ipv4Addr, MacAddress};
use crate::WireError;

// ── DHCP constants ──────────────────────────────────────────

/// BOOTP op codes
pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;

/// Hardware type: Ethernet
const HTYPE_ETHERNET: u8 = 1;
/// Hardware address length
const HLEN_ETHERNET: u8 = 6;

/// DHCP magic cookie
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Offset of the magic cookie in the serialized packet.
pub const COOKIE_OFFSET: usize = 236;

/// Broadcast bit in the BOOTP flags word.
pub const FLAG_BROADCAST: u16 = 0x8000;

/// Minimum serialized size (BOOTP minimum).
const MIN_PACKET_SIZE: usize = 300;

/// DHCP option codes
pub const OPT_PAD: u8 = 0;
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS: u8 = 6;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_DOMAIN_NAME: u8 = 15;
pub const OPT_BROADCAST_ADDR: u8 = 28;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MSG_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAM_LIST: u8 = 55;
pub const OPT_MESSAGE: u8 = 56;
pub const OPT_RENEWAL_TIME: u8 = 58;
pub const OPT_REBINDING_TIME: u8 = 59;
pub const OPT_END: u8 = 255;

// ── Message type ────────────────────────────────────────────

/// DHCP message type (option 53).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
}

impl DhcpMessageType {
    /// The wire value (1–8).
    pub const fn value(self) -> u8 {
        match self {
            DhcpMessageType::Discover => 1,
            DhcpMessageType::Offer => 2,
            DhcpMessageType::Request => 3,
            DhcpMessageType::Decline => 4,
            DhcpMessageType::Ack => 5,
            DhcpMessageType::Nak => 6,
            DhcpMessageType::Release => 7,
            DhcpMessageType::Inform => 8,
        }
    }

    /// Classify a wire value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(DhcpMessageType::Discover),
            2 => Some(DhcpMessageType::Offer),
            3 => Some(DhcpMessageType::Request),
            4 => Some(DhcpMessageType::Decline),
            5 => Some(DhcpMessageType::Ack),
            6 => Some(DhcpMessageType::Nak),
            7 => Some(DhcpMessageType::Release),
            8 => Some(DhcpMessageType::Inform),
            _ => None,
        }
    }
}

impl fmt::Display for DhcpMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DhcpMessageType::Discover => "DHCPDISCOVER",
            DhcpMessageType::Offer => "DHCPOFFER",
            DhcpMessageType::Request => "DHCPREQUEST",
            DhcpMessageType::Decline => "DHCPDECLINE",
            DhcpMessageType::Ack => "DHCPACK",
            DhcpMessageType::Nak => "DHCPNAK",
            DhcpMessageType::Release => "DHCPRELEASE",
            DhcpMessageType::Inform => "DHCPINFORM",
        };
        write!(f, "{}", name)
    }
}

// ── Recognized options ──────────────────────────────────────

/// The option set this simulator recognizes; unknown options are skipped
/// on decode and never emitted on encode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DhcpOptions {
    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub hostname: Option<String>,
    pub domain_name: Option<String>,
    pub broadcast_address: Option<Ipv4Addr>,
    pub requested_ip: Option<Ipv4Addr>,
    pub lease_time: Option<u32>,
    pub renewal_time: Option<u32>,
    pub rebinding_time: Option<u32>,
    pub server_id: Option<Ipv4Addr>,
    pub param_request_list: Vec<u8>,
    pub message: Option<String>,
}

// ── Packet ──────────────────────────────────────────────────

/// A DHCP packet: the BOOTP fixed frame plus recognized options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub message_type: DhcpMessageType,
    pub options: DhcpOptions,
}

impl DhcpPacket {
    /// Build a client-originated packet (BOOTREQUEST) for `mac`.
    pub fn new_request(message_type: DhcpMessageType, xid: u32, mac: MacAddress) -> Self {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(mac.as_bytes());
        DhcpPacket {
            op: BOOTREQUEST,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::ANY,
            yiaddr: Ipv4Addr::ANY,
            siaddr: Ipv4Addr::ANY,
            giaddr: Ipv4Addr::ANY,
            chaddr,
            sname: [0; 64],
            file: [0; 128],
            message_type,
            options: DhcpOptions::default(),
        }
    }

    /// Build a server-originated reply (BOOTREPLY) answering `request`,
    /// preserving xid, flags and chaddr.
    pub fn new_reply(message_type: DhcpMessageType, request: &DhcpPacket) -> Self {
        DhcpPacket {
            op: BOOTREPLY,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::ANY,
            yiaddr: Ipv4Addr::ANY,
            siaddr: Ipv4Addr::ANY,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0; 64],
            file: [0; 128],
            message_type,
            options: DhcpOptions::default(),
        }
    }

    /// The client hardware address (first 6 bytes of chaddr).
    pub fn client_mac(&self) -> MacAddress {
        MacAddress::new([
            self.chaddr[0],
            self.chaddr[1],
            self.chaddr[2],
            self.chaddr[3],
            self.chaddr[4],
            self.chaddr[5],
        ])
    }

    /// Whether the client asked for broadcast delivery.
    pub fn is_broadcast(&self) -> bool {
        self.flags & FLAG_BROADCAST != 0
    }

    /// Set or clear the broadcast flag.
    pub fn set_broadcast(&mut self, on: bool) {
        if on {
            self.flags |= FLAG_BROADCAST;
        } else {
            self.flags &= !FLAG_BROADCAST;
        }
    }

    /// Serialize: fixed frame, cookie, options (53 first), end, padding to
    /// the BOOTP minimum.
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(MIN_PACKET_SIZE);

        raw.push(self.op);
        raw.push(self.htype);
        raw.push(self.hlen);
        raw.push(self.hops);
        raw.extend_from_slice(&self.xid.to_be_bytes());
        raw.extend_from_slice(&self.secs.to_be_bytes());
        raw.extend_from_slice(&self.flags.to_be_bytes());
        raw.extend_from_slice(&self.ciaddr.0);
        raw.extend_from_slice(&self.yiaddr.0);
        raw.extend_from_slice(&self.siaddr.0);
        raw.extend_from_slice(&self.giaddr.0);
        raw.extend_from_slice(&self.chaddr);
        raw.extend_from_slice(&self.sname);
        raw.extend_from_slice(&self.file);
        raw.extend_from_slice(&MAGIC_COOKIE);

        // Message type first, exactly once
        raw.push(OPT_MSG_TYPE);
        raw.push(1);
        raw.push(self.message_type.value());

        let opts = &self.options;
        if let Some(ip) = opts.server_id {
            push_ip_option(&mut raw, OPT_SERVER_ID, ip);
        }
        if let Some(ip) = opts.requested_ip {
            push_ip_option(&mut raw, OPT_REQUESTED_IP, ip);
        }
        if let Some(ip) = opts.subnet_mask {
            push_ip_option(&mut raw, OPT_SUBNET_MASK, ip);
        }
        if let Some(ip) = opts.router {
            push_ip_option(&mut raw, OPT_ROUTER, ip);
        }
        if !opts.dns_servers.is_empty() {
            raw.push(OPT_DNS);
            raw.push((opts.dns_servers.len() * 4) as u8);
            for dns in &opts.dns_servers {
                raw.extend_from_slice(&dns.0);
            }
        }
        if let Some(ip) = opts.broadcast_address {
            push_ip_option(&mut raw, OPT_BROADCAST_ADDR, ip);
        }
        if let Some(name) = &opts.hostname {
            push_str_option(&mut raw, OPT_HOSTNAME, name);
        }
        if let Some(name) = &opts.domain_name {
            push_str_option(&mut raw, OPT_DOMAIN_NAME, name);
        }
        if let Some(secs) = opts.lease_time {
            push_u32_option(&mut raw, OPT_LEASE_TIME, secs);
        }
        if let Some(secs) = opts.renewal_time {
            push_u32_option(&mut raw, OPT_RENEWAL_TIME, secs);
        }
        if let Some(secs) = opts.rebinding_time {
            push_u32_option(&mut raw, OPT_REBINDING_TIME, secs);
        }
        if !opts.param_request_list.is_empty() {
            raw.push(OPT_PARAM_LIST);
            raw.push(opts.param_request_list.len() as u8);
            raw.extend_from_slice(&opts.param_request_list);
        }
        if let Some(text) = &opts.message {
            push_str_option(&mut raw, OPT_MESSAGE, text);
        }

        raw.push(OPT_END);

        // Pad to minimum BOOTP size
        while raw.len() < MIN_PACKET_SIZE {
            raw.push(0);
        }
        raw
    }

    /// Parse raw bytes into a packet.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < COOKIE_OFFSET + 4 {
            return Err(WireError::Truncated);
        }
        if raw[COOKIE_OFFSET..COOKIE_OFFSET + 4] != MAGIC_COOKIE {
            return Err(WireError::BadMagic);
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&raw[28..44]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&raw[44..108]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&raw[108..236]);

        let mut message_type = None;
        let mut options = DhcpOptions::default();

        let mut pos = COOKIE_OFFSET + 4;
        while pos < raw.len() {
            let opt = raw[pos];
            if opt == OPT_END {
                break;
            }
            if opt == OPT_PAD {
                pos += 1;
                continue;
            }
            if pos + 1 >= raw.len() {
                return Err(WireError::Truncated);
            }
            let len = raw[pos + 1] as usize;
            let val_start = pos + 2;
            let val_end = val_start + len;
            if val_end > raw.len() {
                return Err(WireError::Truncated);
            }
            let val = &raw[val_start..val_end];

            match opt {
                OPT_MSG_TYPE if len >= 1 => {
                    message_type = DhcpMessageType::from_u8(val[0]);
                }
                OPT_SUBNET_MASK if len >= 4 => {
                    options.subnet_mask = Some(ip_from(val));
                }
                OPT_ROUTER if len >= 4 => {
                    options.router = Some(ip_from(val));
                }
                OPT_DNS => {
                    options.dns_servers = val.chunks_exact(4).map(ip_from).collect();
                }
                OPT_HOSTNAME => {
                    options.hostname = Some(String::from_utf8_lossy(val).into_owned());
                }
                OPT_DOMAIN_NAME => {
                    options.domain_name = Some(String::from_utf8_lossy(val).into_owned());
                }
                OPT_BROADCAST_ADDR if len >= 4 => {
                    options.broadcast_address = Some(ip_from(val));
                }
                OPT_REQUESTED_IP if len >= 4 => {
                    options.requested_ip = Some(ip_from(val));
                }
                OPT_LEASE_TIME if len >= 4 => {
                    options.lease_time = Some(u32::from_be_bytes([val[0], val[1], val[2], val[3]]));
                }
                OPT_RENEWAL_TIME if len >= 4 => {
                    options.renewal_time =
                        Some(u32::from_be_bytes([val[0], val[1], val[2], val[3]]));
                }
                OPT_REBINDING_TIME if len >= 4 => {
                    options.rebinding_time =
                        Some(u32::from_be_bytes([val[0], val[1], val[2], val[3]]));
                }
                OPT_SERVER_ID if len >= 4 => {
                    options.server_id = Some(ip_from(val));
                }
                OPT_PARAM_LIST => {
                    options.param_request_list = val.to_vec();
                }
                OPT_MESSAGE => {
                    options.message = Some(String::from_utf8_lossy(val).into_owned());
                }
                _ => {} // unrecognized option, skip
            }

            pos = val_end;
        }

        let message_type = message_type.ok_or(WireError::MissingOption(OPT_MSG_TYPE))?;

        Ok(DhcpPacket {
            op: raw[0],
            htype: raw[1],
            hlen: raw[2],
            hops: raw[3],
            xid: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
            secs: u16::from_be_bytes([raw[8], raw[9]]),
            flags: u16::from_be_bytes([raw[10], raw[11]]),
            ciaddr: Ipv4Addr([raw[12], raw[13], raw[14], raw[15]]),
            yiaddr: Ipv4Addr([raw[16], raw[17], raw[18], raw[19]]),
            siaddr: Ipv4Addr([raw[20], raw[21], raw[22], raw[23]]),
            giaddr: Ipv4Addr([raw[24], raw[25], raw[26], raw[27]]),
            chaddr,
            sname,
            file,
            message_type,
            options,
        })
    }
}

// ── Option helpers ──────────────────────────────────────────

fn ip_from(val: &[u8]) -> Ipv4Addr {
    Ipv4Addr([val[0], val[1], val[2], val[3]])
}

fn push_ip_option(raw: &mut Vec<u8>, opt: u8, ip: Ipv4Addr) {
    raw.push(opt);
    raw.push(4);
    raw.extend_from_slice(&ip.0);
}

fn push_u32_option(raw: &mut Vec<u8>, opt: u8, v: u32) {
    raw.push(opt);
    raw.push(4);
    raw.extend_from_slice(&v.to_be_bytes());
}

fn push_str_option(raw: &mut Vec<u8>, opt: u8, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(255);
    raw.push(opt);
    raw.push(len as u8);
    raw.extend_from_slice(&bytes[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> MacAddress {
        MacAddress::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55])
    }

    fn sample_discover() -> DhcpPacket {
        let mut pkt = DhcpPacket::new_request(DhcpMessageType::Discover, 0xDEADBEEF, mac());
        pkt.set_broadcast(true);
        pkt.options.param_request_list = vec![1, 3, 6, 15, 28, 51];
        pkt.options.hostname = Some("h1".into());
        pkt
    }

    #[test]
    fn test_cookie_position() {
        let raw = sample_discover().encode();
        assert_eq!(&raw[COOKIE_OFFSET..COOKIE_OFFSET + 4], &MAGIC_COOKIE);
        assert!(raw.len() >= 300);
    }

    #[test]
    fn test_message_type_first_option() {
        let raw = sample_discover().encode();
        assert_eq!(raw[240], OPT_MSG_TYPE);
        assert_eq!(raw[241], 1);
        assert_eq!(raw[242], DhcpMessageType::Discover.value());
    }

    #[test]
    fn test_roundtrip_discover() {
        let pkt = sample_discover();
        let decoded = DhcpPacket::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded, pkt);
        assert!(decoded.is_broadcast());
        assert_eq!(decoded.client_mac(), mac());
    }

    #[test]
    fn test_roundtrip_offer_with_full_parameters() {
        let discover = sample_discover();
        let mut offer = DhcpPacket::new_reply(DhcpMessageType::Offer, &discover);
        offer.yiaddr = Ipv4Addr::new(192, 168, 1, 100);
        offer.options.server_id = Some(Ipv4Addr::new(192, 168, 1, 1));
        offer.options.subnet_mask = Some(Ipv4Addr::new(255, 255, 255, 0));
        offer.options.router = Some(Ipv4Addr::new(192, 168, 1, 1));
        offer.options.dns_servers = vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(1, 1, 1, 1)];
        offer.options.lease_time = Some(86400);
        offer.options.renewal_time = Some(43200);
        offer.options.rebinding_time = Some(75600);
        offer.options.domain_name = Some("lab.local".into());

        let decoded = DhcpPacket::decode(&offer.encode()).unwrap();
        assert_eq!(decoded, offer);
        assert_eq!(decoded.xid, discover.xid);
        assert_eq!(decoded.op, BOOTREPLY);
        assert_eq!(decoded.options.dns_servers.len(), 2);
    }

    #[test]
    fn test_decode_rejects_bad_cookie() {
        let mut raw = sample_discover().encode();
        raw[COOKIE_OFFSET] = 0;
        assert_eq!(DhcpPacket::decode(&raw), Err(WireError::BadMagic));
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let raw = sample_discover().encode();
        assert_eq!(DhcpPacket::decode(&raw[..200]), Err(WireError::Truncated));
    }

    #[test]
    fn test_decode_requires_message_type() {
        let mut raw = sample_discover().encode();
        // Overwrite option 53 with pad bytes
        raw[240] = OPT_PAD;
        raw[241] = OPT_PAD;
        raw[242] = OPT_PAD;
        assert_eq!(
            DhcpPacket::decode(&raw),
            Err(WireError::MissingOption(OPT_MSG_TYPE))
        );
    }

    #[test]
    fn test_pad_skipped_without_length() {
        // Insert pad bytes between options by hand and re-decode.
        let pkt = sample_discover();
        let mut raw = pkt.encode();
        // The encoder pads the tail with zeros before 0xFF is reached only
        // at the END marker; craft a buffer with explicit interior padding.
        let end = raw.iter().position(|&b| b == OPT_END).unwrap();
        raw.splice(end..end, [OPT_PAD, OPT_PAD, OPT_PAD]);
        let decoded = DhcpPacket::decode(&raw).unwrap();
        assert_eq!(decoded.message_type, DhcpMessageType::Discover);
    }

    #[test]
    fn test_unknown_option_skipped() {
        let pkt = sample_discover();
        let mut raw = pkt.encode();
        let end = raw.iter().position(|&b| b == OPT_END).unwrap();
        // Option 43 (vendor specific), 3 bytes
        raw.splice(end..end, [43, 3, 0xAA, 0xBB, 0xCC]);
        let decoded = DhcpPacket::decode(&raw).unwrap();
        assert_eq!(decoded.options, pkt.options);
    }
}
