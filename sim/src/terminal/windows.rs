//! Windows-Style Commands
//!
//! `ipconfig` with `/renew` and `/release`, driving the same DHCP client
//! state machine as `dhclient`.

use crate::topology::{DeviceId, Topology};

/// DISCOVER retries before /renew reports failure.
const DHCP_ATTEMPTS: usize = 3;

pub fn cmd_ipconfig(topo: &mut Topology, id: DeviceId, args: &[&str]) -> Vec<String> {
    match args.first().copied() {
        None | Some("/all") => render_config(topo, id),
        Some("/renew") => renew(topo, id),
        Some("/release") => release(topo, id),
        Some(other) => vec![format!("The operation \"{}\" is unknown.", other)],
    }
}

fn header() -> Vec<String> {
    vec![
        "Windows IP Configuration".to_string(),
        String::new(),
        "Ethernet adapter Ethernet0:".to_string(),
        String::new(),
    ]
}

fn render_config(topo: &Topology, id: DeviceId) -> Vec<String> {
    let handle = match topo.device(id) {
        Some(h) => h,
        None => return vec![format!("{}: no such device", id)],
    };
    let dev = handle.lock();
    let host = match dev.as_host() {
        Some(h) => h,
        None => return vec!["ipconfig: not a host".into()],
    };
    let nic = host.nic();

    let mut out = header();
    match (nic.ip(), nic.netmask()) {
        (Some(ip), Some(mask)) => {
            if let Some(domain) = host.dhcp().lease().and_then(|l| l.domain_name.clone()) {
                out.push(format!(
                    "   Connection-specific DNS Suffix  . : {}",
                    domain
                ));
            }
            out.push(format!("   IPv4 Address. . . . . . . . . . . : {}", ip));
            out.push(format!("   Subnet Mask . . . . . . . . . . . : {}", mask));
            out.push(format!(
                "   Default Gateway . . . . . . . . . : {}",
                nic.gateway()
                    .map(|g| g.to_string())
                    .unwrap_or_default()
            ));
        }
        _ => out.push("   Media State . . . . . . . . . . . : Media disconnected".to_string()),
    }
    out
}

fn renew(topo: &mut Topology, id: DeviceId) -> Vec<String> {
    let handle = match topo.device(id) {
        Some(h) => h,
        None => return vec![format!("{}: no such device", id)],
    };

    {
        let mut dev = handle.lock();
        if let Some(nic) = dev.nic_mut("eth0") {
            nic.up();
        }
    }

    let mut bound = false;
    for _ in 0..DHCP_ATTEMPTS {
        {
            let mut dev = handle.lock();
            if let Some(host) = dev.as_host_mut() {
                host.start_dhcp_discover(topo.now_ms());
            }
        }
        topo.pump();

        let has_lease = {
            let dev = handle.lock();
            dev.as_host()
                .map(|h| h.dhcp().lease().is_some())
                .unwrap_or(false)
        };
        if has_lease {
            bound = true;
            break;
        }

        topo.advance(10_000);
        let mut dev = handle.lock();
        if let Some(host) = dev.as_host_mut() {
            if host.dhcp().is_discover_timeout(topo.now_ms()) {
                host.dhcp_mut().reset();
            }
        }
    }

    if bound {
        render_config(topo, id)
    } else {
        let mut out = header();
        out.push(
            "An error occurred while renewing interface Ethernet0 : unable to contact your DHCP server."
                .to_string(),
        );
        out
    }
}

fn release(topo: &mut Topology, id: DeviceId) -> Vec<String> {
    let handle = match topo.device(id) {
        Some(h) => h,
        None => return vec![format!("{}: no such device", id)],
    };
    {
        let mut dev = handle.lock();
        if let Some(host) = dev.as_host_mut() {
            host.dhcp_release(topo.now_ms());
        }
    }
    topo.pump();

    let mut out = header();
    out.push("   Media State . . . . . . . . . . . : Media disconnected".to_string());
    out
}
