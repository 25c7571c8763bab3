//! Linux-Style Commands
//!
//! `ifconfig`, `ping`, `dhclient` and `arp` against the host kernel.
//! Output mimics the real tools closely enough for lab exercises.

use wirelab_net::{Ipv4Addr, NetError, SubnetMask};

use crate::topology::{DeviceId, Topology};

/// Interval between ping iterations.
const PING_INTERVAL_MS: u64 = 1000;
/// How long a lost ping waits before the next one goes out.
const PING_TIMEOUT_MS: u64 = 5000;
/// DISCOVER retries before dhclient gives up.
const DHCP_ATTEMPTS: usize = 3;

// ── ifconfig ────────────────────────────────────────────────

pub fn cmd_ifconfig(topo: &mut Topology, id: DeviceId, args: &[&str]) -> Vec<String> {
    match args {
        [] => render_iface(topo, id, "eth0"),
        [iface] => render_iface(topo, id, iface),
        [iface, rest @ ..] => configure_iface(topo, id, iface, rest),
    }
}

fn render_iface(topo: &Topology, id: DeviceId, iface: &str) -> Vec<String> {
    let handle = match topo.device(id) {
        Some(h) => h,
        None => return vec![format!("{}: no such device", id)],
    };
    let dev = handle.lock();
    let nic = match dev.nic(iface) {
        Some(n) => n,
        None => {
            return vec![format!(
                "{}: error fetching interface information: Device not found",
                iface
            )]
        }
    };

    let flags = nic.flags();
    let stats = nic.stats();
    let mut out = vec![format!(
        "{}: flags={}<{}>  mtu {}",
        nic.name(),
        flags.bits(),
        flags,
        nic.mtu()
    )];
    if let (Some(ip), Some(mask)) = (nic.ip(), nic.netmask()) {
        out.push(format!(
            "        inet {}  netmask {}  broadcast {}",
            ip,
            mask,
            ip.broadcast_of(mask)
        ));
    }
    out.push(format!("        ether {}  (Ethernet)", nic.mac()));
    out.push(format!(
        "        RX packets {}  bytes {} ({} B)",
        stats.rx_frames, stats.rx_bytes, stats.rx_bytes
    ));
    out.push(format!(
        "        RX dropped {}",
        stats.dropped_frames
    ));
    out.push(format!(
        "        TX packets {}  bytes {} ({} B)",
        stats.tx_frames, stats.tx_bytes, stats.tx_bytes
    ));
    out.push(String::new());
    out
}

fn configure_iface(topo: &mut Topology, id: DeviceId, iface: &str, rest: &[&str]) -> Vec<String> {
    let handle = match topo.device(id) {
        Some(h) => h,
        None => return vec![format!("{}: no such device", id)],
    };
    let mut dev = handle.lock();
    let nic = match dev.nic_mut(iface) {
        Some(n) => n,
        None => {
            return vec![format!(
                "{}: error fetching interface information: Device not found",
                iface
            )]
        }
    };

    match rest {
        ["up"] => {
            nic.up();
            Vec::new()
        }
        ["down"] => {
            nic.down();
            Vec::new()
        }
        [addr, rest @ ..] => {
            let ip: Ipv4Addr = match addr.parse() {
                Ok(ip) => ip,
                Err(NetError::InvalidFormat(_)) => {
                    return vec![format!("ifconfig: bad address '{}'", addr)]
                }
                Err(e) => return vec![format!("ifconfig: {}", e)],
            };
            // Mask defaults to /24 unless `netmask <mask>` follows
            let mask = match rest {
                ["netmask", m, ..] => match m.parse::<SubnetMask>() {
                    Ok(mask) => mask,
                    Err(_) => return vec![format!("ifconfig: bad netmask '{}'", m)],
                },
                _ => SubnetMask::from_prefix(24).expect("static prefix"),
            };
            nic.set_ip(ip, mask);
            nic.up();
            Vec::new()
        }
        [] => Vec::new(),
    }
}

// ── ping ────────────────────────────────────────────────────

pub fn cmd_ping(topo: &mut Topology, id: DeviceId, args: &[&str]) -> Vec<String> {
    // `ping -c <n> <dest>`; count defaults to 4
    let mut count: u32 = 4;
    let mut target: Option<&str> = None;
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match *arg {
            "-c" => {
                count = match it.next().and_then(|v| v.parse().ok()) {
                    Some(n) => n,
                    None => return vec!["ping: bad number of packets to transmit.".into()],
                }
            }
            other => target = Some(other),
        }
    }
    let target = match target {
        Some(t) => t,
        None => return vec!["ping: usage error: Destination address required".into()],
    };
    let dest: Ipv4Addr = match target.parse() {
        Ok(ip) => ip,
        Err(_) => return vec![format!("ping: {}: Name or service not known", target)],
    };
    if count == 0 {
        return vec!["ping: bad number of packets to transmit.".into()];
    }

    let handle = match topo.device(id) {
        Some(h) => h,
        None => return vec![format!("{}: no such device", id)],
    };

    let started_ms = topo.now_ms();
    let mut out = vec![format!("PING {} ({}) 56(84) bytes of data.", target, dest)];
    let mut received: u32 = 0;
    let mut rtts: Vec<u64> = Vec::new();

    for i in 1..=count {
        if i > 1 {
            topo.advance(PING_INTERVAL_MS);
        }

        // First try may miss ARP; the request/reply settles synchronously,
        // so one retry is enough.
        let mut seq = None;
        for _ in 0..2 {
            let attempt = {
                let mut dev = handle.lock();
                match dev.as_host_mut() {
                    Some(host) => host.send_echo_request(dest, topo.now_ms()),
                    None => return vec!["ping: not a host".into()],
                }
            };
            topo.pump();
            match attempt {
                Ok(s) => {
                    seq = Some(s);
                    break;
                }
                Err(NetError::UnreachableNextHop) => continue,
                Err(NetError::NoRoute) | Err(NetError::InterfaceDown) => {
                    out.push("connect: Network is unreachable".into());
                    return out;
                }
                Err(e) => {
                    out.push(format!("ping: {}", e));
                    return out;
                }
            }
        }

        let reply = seq.and_then(|s| {
            let mut dev = handle.lock();
            dev.as_host_mut()?.icmp_mut().take_reply(dest, s)
        });

        match reply {
            Some(r) => {
                received += 1;
                rtts.push(r.rtt_ms);
                out.push(format!(
                    "64 bytes from {}: icmp_seq={} ttl={} time={:.3} ms",
                    dest, i, r.ttl, r.rtt_ms as f64
                ));
            }
            None => {
                // Lost (or never sent): run out the echo timeout before the
                // next iteration so the pending entry is reaped.
                topo.advance(PING_TIMEOUT_MS);
                if let Some(host) = handle.lock().as_host_mut() {
                    host.icmp_mut().sweep_timeouts(topo.now_ms());
                }
            }
        }
    }

    let loss = (count - received) * 100 / count;
    out.push(String::new());
    out.push(format!("--- {} ping statistics ---", target));
    out.push(format!(
        "{} packets transmitted, {} received, {}% packet loss, time {}ms",
        count,
        received,
        loss,
        topo.now_ms() - started_ms
    ));
    if !rtts.is_empty() {
        let min = *rtts.iter().min().expect("non-empty");
        let max = *rtts.iter().max().expect("non-empty");
        let avg = rtts.iter().sum::<u64>() / rtts.len() as u64;
        out.push(format!(
            "rtt min/avg/max = {:.3}/{:.3}/{:.3} ms",
            min as f64, avg as f64, max as f64
        ));
    }
    out
}

// ── dhclient ────────────────────────────────────────────────

pub fn cmd_dhclient(topo: &mut Topology, id: DeviceId, args: &[&str]) -> Vec<String> {
    let mut release = false;
    let mut iface = "eth0";
    for arg in args {
        match *arg {
            "-r" => release = true,
            "-v" => {}
            other => iface = other,
        }
    }
    if iface != "eth0" {
        return vec![format!("Cannot find device \"{}\"", iface)];
    }

    let handle = match topo.device(id) {
        Some(h) => h,
        None => return vec![format!("{}: no such device", id)],
    };

    let mac = {
        let dev = handle.lock();
        match dev.nic(iface) {
            Some(n) => n.mac(),
            None => return vec![format!("Cannot find device \"{}\"", iface)],
        }
    };

    let mut out = vec![
        "Internet Systems Consortium DHCP Client 4.4.3".to_string(),
        "Copyright 2004-2022 Internet Systems Consortium.".to_string(),
        "All rights reserved.".to_string(),
        String::new(),
        format!("Listening on LPF/{}/{}", iface, mac),
        format!("Sending on   LPF/{}/{}", iface, mac),
        "Sending on   Socket/fallback".to_string(),
    ];

    if release {
        let (lease_ip, server_ip) = {
            let dev = handle.lock();
            match dev.as_host().and_then(|h| h.dhcp().lease()) {
                Some(l) => (Some(l.ip), Some(l.server_ip)),
                None => (None, None),
            }
        };
        {
            let mut dev = handle.lock();
            if let Some(host) = dev.as_host_mut() {
                host.dhcp_release(topo.now_ms());
            }
        }
        topo.pump();
        if let (Some(ip), Some(server)) = (lease_ip, server_ip) {
            out.push(format!(
                "DHCPRELEASE of {} on {} to {} port 67",
                ip, iface, server
            ));
        }
        return out;
    }

    // Bring the interface up and run the exchange; each attempt is one
    // DISCOVER whose whole DORA settles inside the pump.
    {
        let mut dev = handle.lock();
        if let Some(nic) = dev.nic_mut(iface) {
            nic.up();
        }
    }

    let mut bound = false;
    for attempt in 0..DHCP_ATTEMPTS {
        {
            let mut dev = handle.lock();
            if let Some(host) = dev.as_host_mut() {
                host.start_dhcp_discover(topo.now_ms());
            }
        }
        out.push(format!(
            "DHCPDISCOVER on {} to 255.255.255.255 port 67 interval {}",
            iface,
            (attempt + 1) * 4
        ));
        topo.pump();

        let state_bound = {
            let dev = handle.lock();
            dev.as_host()
                .map(|h| h.dhcp().lease().is_some())
                .unwrap_or(false)
        };
        if state_bound {
            bound = true;
            break;
        }

        // Nothing answered: let the discover window lapse and retry.
        topo.advance(10_000);
        let mut dev = handle.lock();
        if let Some(host) = dev.as_host_mut() {
            if host.dhcp().is_discover_timeout(topo.now_ms()) {
                host.dhcp_mut().reset();
            }
        }
    }

    if bound {
        let dev = handle.lock();
        let host = match dev.as_host() {
            Some(h) => h,
            None => return out,
        };
        if let (Some(offer), Some(lease)) = (host.dhcp().selected_offer(), host.dhcp().lease()) {
            out.push(format!("DHCPOFFER of {} from {}", offer.ip, offer.server_ip));
            out.push(format!(
                "DHCPREQUEST for {} on {} to 255.255.255.255 port 67",
                offer.ip, iface
            ));
            out.push(format!("DHCPACK of {} from {}", lease.ip, lease.server_ip));
            out.push(format!(
                "bound to {} -- renewal in {} seconds.",
                lease.ip, lease.renewal_secs
            ));
        }
    } else {
        out.push("No DHCPOFFERS received.".to_string());
        out.push("No working leases in persistent database - sleeping.".to_string());
    }
    out
}

// ── arp ─────────────────────────────────────────────────────

pub fn cmd_arp(topo: &mut Topology, id: DeviceId, _args: &[&str]) -> Vec<String> {
    let handle = match topo.device(id) {
        Some(h) => h,
        None => return vec![format!("{}: no such device", id)],
    };
    let dev = handle.lock();
    let host = match dev.as_host() {
        Some(h) => h,
        None => return vec!["arp: not a host".into()],
    };

    let entries = host.arp().entries(topo.now_ms());
    if entries.is_empty() {
        return vec!["arp: no entries".into()];
    }
    entries
        .iter()
        .map(|e| format!("? ({}) at {} [ether] on eth0", e.ip, e.mac))
        .collect()
}
