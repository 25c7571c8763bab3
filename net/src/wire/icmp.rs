//! ICMP Layer
//!
//! Echo request/reply and error messages (RFC 792). The checksum covers the
//! whole message and is verified on decode.

use crate::wire::checksum;
use crate::WireError;

// ── ICMP constants ──────────────────────────────────────────

/// Echo Reply
pub const TYPE_ECHO_REPLY: u8 = 0;
/// Destination Unreachable
pub const TYPE_DEST_UNREACHABLE: u8 = 3;
/// Echo Request
pub const TYPE_ECHO_REQUEST: u8 = 8;
/// Time Exceeded
pub const TYPE_TIME_EXCEEDED: u8 = 11;

/// Time Exceeded code: TTL expired in transit
pub const CODE_TTL_EXPIRED: u8 = 0;

/// ICMP header size.
pub const HEADER_SIZE: usize = 8;

/// How much of the offending datagram an error message quotes:
/// the IP header plus the first 8 payload bytes.
pub const ERROR_QUOTE_LEN: usize = 28;

// ── Message body ────────────────────────────────────────────

/// Body of an ICMP message, selected by type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpBody {
    /// Echo Request/Reply: identifier, sequence and opaque data.
    Echo {
        identifier: u16,
        sequence: u16,
        data: Vec<u8>,
    },
    /// Error messages: 4 unused bytes then the quoted original datagram.
    Error { original: Vec<u8> },
}

/// An ICMP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpPacket {
    pub icmp_type: u8,
    pub code: u8,
    pub body: IcmpBody,
}

impl IcmpPacket {
    /// Build an Echo Request.
    pub fn echo_request(identifier: u16, sequence: u16, data: Vec<u8>) -> Self {
        IcmpPacket {
            icmp_type: TYPE_ECHO_REQUEST,
            code: 0,
            body: IcmpBody::Echo {
                identifier,
                sequence,
                data,
            },
        }
    }

    /// Build the Echo Reply mirroring a request's identifier, sequence
    /// and data.
    pub fn echo_reply_for(request: &IcmpPacket) -> Option<Self> {
        match &request.body {
            IcmpBody::Echo {
                identifier,
                sequence,
                data,
            } if request.icmp_type == TYPE_ECHO_REQUEST => Some(IcmpPacket {
                icmp_type: TYPE_ECHO_REPLY,
                code: 0,
                body: IcmpBody::Echo {
                    identifier: *identifier,
                    sequence: *sequence,
                    data: data.clone(),
                },
            }),
            _ => None,
        }
    }

    /// Build a Time Exceeded (type 11, code 0) quoting the first
    /// [`ERROR_QUOTE_LEN`] bytes of the offending datagram.
    pub fn time_exceeded(original_datagram: &[u8]) -> Self {
        let quote = original_datagram[..original_datagram.len().min(ERROR_QUOTE_LEN)].to_vec();
        IcmpPacket {
            icmp_type: TYPE_TIME_EXCEEDED,
            code: CODE_TTL_EXPIRED,
            body: IcmpBody::Error { original: quote },
        }
    }

    /// Echo identifier/sequence accessors; `None` for error messages.
    pub fn echo_fields(&self) -> Option<(u16, u16, &[u8])> {
        match &self.body {
            IcmpBody::Echo {
                identifier,
                sequence,
                data,
            } => Some((*identifier, *sequence, data)),
            IcmpBody::Error { .. } => None,
        }
    }

    /// Serialize with a freshly computed checksum over the whole message.
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(HEADER_SIZE + 56);
        raw.push(self.icmp_type);
        raw.push(self.code);
        raw.push(0); // checksum placeholder
        raw.push(0);
        match &self.body {
            IcmpBody::Echo {
                identifier,
                sequence,
                data,
            } => {
                raw.extend_from_slice(&identifier.to_be_bytes());
                raw.extend_from_slice(&sequence.to_be_bytes());
                raw.extend_from_slice(data);
            }
            IcmpBody::Error { original } => {
                raw.extend_from_slice(&[0, 0, 0, 0]); // unused
                raw.extend_from_slice(original);
            }
        }
        let ck = checksum(&raw);
        raw[2] = (ck >> 8) as u8;
        raw[3] = ck as u8;
        raw
    }

    /// Parse and verify an ICMP message.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < HEADER_SIZE {
            return Err(WireError::Truncated);
        }
        if checksum(raw) != 0 {
            return Err(WireError::BadChecksum);
        }

        let icmp_type = raw[0];
        let code = raw[1];
        let body = match icmp_type {
            TYPE_ECHO_REQUEST | TYPE_ECHO_REPLY => IcmpBody::Echo {
                identifier: u16::from_be_bytes([raw[4], raw[5]]),
                sequence: u16::from_be_bytes([raw[6], raw[7]]),
                data: raw[HEADER_SIZE..].to_vec(),
            },
            _ => IcmpBody::Error {
                original: raw[HEADER_SIZE..].to_vec(),
            },
        };

        Ok(IcmpPacket {
            icmp_type,
            code,
            body,
        })
    }
}
