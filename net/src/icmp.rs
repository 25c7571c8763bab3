//! ICMP Echo Service
//!
//! Correlates echo requests with replies per destination: identifier
//! allocation, monotonically increasing sequence numbers, pending-request
//! bookkeeping with timeouts, and RTT statistics. Completed replies are
//! queued for the `ping` consumer to dequeue.

use hashbrown::HashMap;
use log::trace;

use crate::addr::Ipv4Addr;
use crate::wire::IcmpPacket;

/// Default echo timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

// ── Records ─────────────────────────────────────────────────

/// An in-flight echo request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEcho {
    identifier: u16,
    sent_at_ms: u64,
    data: Vec<u8>,
    timeout_ms: u64,
}

/// A completed echo exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoReply {
    pub from: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
    pub rtt_ms: u64,
    pub data_len: usize,
    /// TTL of the reply's IP header (what `ping` renders).
    pub ttl: u8,
}

/// Echo statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoStats {
    pub sent: u64,
    pub received: u64,
    pub timeouts: u64,
    pub rtt_min_ms: u64,
    pub rtt_max_ms: u64,
    rtt_sum_ms: u64,
}

impl EchoStats {
    /// Running average over the observed samples.
    pub fn rtt_avg_ms(&self) -> u64 {
        if self.received == 0 {
            0
        } else {
            self.rtt_sum_ms / self.received
        }
    }

    fn record_rtt(&mut self, rtt_ms: u64) {
        if self.received == 0 || rtt_ms < self.rtt_min_ms {
            self.rtt_min_ms = rtt_ms;
        }
        if rtt_ms > self.rtt_max_ms {
            self.rtt_max_ms = rtt_ms;
        }
        self.rtt_sum_ms += rtt_ms;
        self.received += 1;
    }
}

/// Hook fired on a matched reply.
pub type ReplyHook = Box<dyn FnMut(&EchoReply) + Send>;
/// Hook fired on a timed-out request: (destination, sequence).
pub type TimeoutHook = Box<dyn FnMut(Ipv4Addr, u16) + Send>;

// ── Service ─────────────────────────────────────────────────

/// The echo correlation service.
#[derive(Default)]
pub struct IcmpService {
    ident_by_dest: HashMap<Ipv4Addr, u16>,
    seq_by_dest: HashMap<Ipv4Addr, u16>,
    pending: HashMap<(Ipv4Addr, u16), PendingEcho>,
    completed: Vec<EchoReply>,
    stats: EchoStats,
    next_identifier: u16,
    on_reply: Option<ReplyHook>,
    on_timeout: Option<TimeoutHook>,
}

impl IcmpService {
    /// Create an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters.
    pub fn stats(&self) -> EchoStats {
        self.stats
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Install the reply hook.
    pub fn set_reply_hook(&mut self, hook: ReplyHook) {
        self.on_reply = Some(hook);
    }

    /// Install the timeout hook.
    pub fn set_timeout_hook(&mut self, hook: TimeoutHook) {
        self.on_timeout = Some(hook);
    }

    /// Build an echo request toward `dest` and record it as pending.
    ///
    /// Allocates (or reuses) the per-destination identifier, increments the
    /// per-destination sequence, and returns the packet plus its sequence
    /// number.
    pub fn create_echo_request(
        &mut self,
        dest: Ipv4Addr,
        data: Vec<u8>,
        now_ms: u64,
        timeout_ms: u64,
    ) -> (IcmpPacket, u16) {
        let identifier = match self.ident_by_dest.get(&dest) {
            Some(id) => *id,
            None => {
                self.next_identifier = self.next_identifier.wrapping_add(1);
                self.ident_by_dest.insert(dest, self.next_identifier);
                self.next_identifier
            }
        };
        let seq = self.seq_by_dest.entry(dest).or_insert(0);
        *seq = seq.wrapping_add(1);
        let sequence = *seq;

        self.pending.insert(
            (dest, sequence),
            PendingEcho {
                identifier,
                sent_at_ms: now_ms,
                data: data.clone(),
                timeout_ms,
            },
        );
        self.stats.sent += 1;
        trace!("echo request to {} id={} seq={}", dest, identifier, sequence);

        (IcmpPacket::echo_request(identifier, sequence, data), sequence)
    }

    /// Match an incoming echo reply against the pending set.
    ///
    /// Returns the completed exchange when (src, sequence) is pending and
    /// the identifier agrees; the reply is also queued for
    /// [`take_reply`](Self::take_reply).
    pub fn handle_echo_reply(
        &mut self,
        src: Ipv4Addr,
        ttl: u8,
        reply: &IcmpPacket,
        now_ms: u64,
    ) -> Option<EchoReply> {
        let (identifier, sequence, data) = reply.echo_fields()?;
        let pending = self.pending.get(&(src, sequence))?;
        if pending.identifier != identifier || pending.data != data {
            return None;
        }

        let pending = self.pending.remove(&(src, sequence))?;
        let rtt_ms = now_ms.saturating_sub(pending.sent_at_ms);
        self.stats.record_rtt(rtt_ms);

        let completed = EchoReply {
            from: src,
            identifier,
            sequence,
            rtt_ms,
            data_len: data.len(),
            ttl,
        };
        if let Some(hook) = self.on_reply.as_mut() {
            hook(&completed);
        }
        self.completed.push(completed.clone());
        Some(completed)
    }

    /// Dequeue the completed reply for (dest, sequence), if any.
    pub fn take_reply(&mut self, dest: Ipv4Addr, sequence: u16) -> Option<EchoReply> {
        let pos = self
            .completed
            .iter()
            .position(|r| r.from == dest && r.sequence == sequence)?;
        Some(self.completed.remove(pos))
    }

    /// Expire pending requests whose timeout has elapsed; returns how many
    /// were dropped.
    pub fn sweep_timeouts(&mut self, now_ms: u64) -> usize {
        let expired: Vec<(Ipv4Addr, u16)> = self
            .pending
            .iter()
            .filter(|(_, p)| now_ms.saturating_sub(p.sent_at_ms) >= p.timeout_ms)
            .map(|(k, _)| *k)
            .collect();
        for key in &expired {
            self.pending.remove(key);
            self.stats.timeouts += 1;
            if let Some(hook) = self.on_timeout.as_mut() {
                hook(key.0, key.1);
            }
        }
        expired.len()
    }
}
