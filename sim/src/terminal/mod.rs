//! Terminal Surface
//!
//! The command dialects the simulator's hosts answer to. Parsers render
//! text; every side effect goes through the same engine operations the
//! tests drive directly.

mod linux;
mod windows;

use crate::device::DeviceKind;
use crate::host::OsFlavor;
use crate::topology::{DeviceId, Topology};

/// Run one command line on a device; returns the rendered output.
pub fn execute(topo: &mut Topology, id: DeviceId, line: &str) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (name, args) = match tokens.split_first() {
        Some((n, rest)) => (*n, rest),
        None => return String::new(),
    };

    let handle = match topo.device(id) {
        Some(h) => h,
        None => return format!("{}: no such device", id),
    };
    let (kind, os) = {
        let dev = handle.lock();
        (dev.kind(), dev.as_host().map(|h| h.os()))
    };

    let lines = match (kind, os) {
        (DeviceKind::Host, Some(OsFlavor::Linux)) => match name {
            "ifconfig" => linux::cmd_ifconfig(topo, id, args),
            "ping" => linux::cmd_ping(topo, id, args),
            "dhclient" => linux::cmd_dhclient(topo, id, args),
            "arp" => linux::cmd_arp(topo, id, args),
            _ => vec![format!("{}: command not found", name)],
        },
        (DeviceKind::Host, Some(OsFlavor::Windows)) => match name {
            "ipconfig" => windows::cmd_ipconfig(topo, id, args),
            "ping" => linux::cmd_ping(topo, id, args),
            _ => vec![format!(
                "'{}' is not recognized as an internal or external command,",
                name
            )],
        },
        _ => vec![format!("{}: command not found", name)],
    };

    lines.join("\n")
}
