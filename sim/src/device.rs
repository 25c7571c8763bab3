//! Device Dispatch
//!
//! The closed set of device kinds the topology can hold, with uniform
//! frame delivery and interface access over the concrete kernels.

use wirelab_net::nic::NetworkInterface;
use wirelab_net::wire::EthernetFrame;

use crate::host::Host;
use crate::hub::Hub;
use crate::router::Router;
use crate::switch::Switch;

/// Device kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Host,
    Hub,
    Switch,
    Router,
}

impl DeviceKind {
    /// Lowercase name for logs and rendering.
    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::Host => "host",
            DeviceKind::Hub => "hub",
            DeviceKind::Switch => "switch",
            DeviceKind::Router => "router",
        }
    }
}

/// A device in the topology.
pub enum Device {
    Host(Host),
    Hub(Hub),
    Switch(Switch),
    Router(Router),
}

/// `portN` → N for hub/switch port interfaces.
fn port_index(iface: &str) -> Option<usize> {
    iface.strip_prefix("port")?.parse().ok()
}

impl Device {
    /// Kind tag.
    pub fn kind(&self) -> DeviceKind {
        match self {
            Device::Host(_) => DeviceKind::Host,
            Device::Hub(_) => DeviceKind::Hub,
            Device::Switch(_) => DeviceKind::Switch,
            Device::Router(_) => DeviceKind::Router,
        }
    }

    /// Whether the device is powered on.
    pub fn online(&self) -> bool {
        match self {
            Device::Host(h) => h.online(),
            Device::Hub(h) => h.online(),
            Device::Switch(s) => s.online(),
            Device::Router(r) => r.online(),
        }
    }

    /// Power the device on or off.
    pub fn set_online(&mut self, online: bool) {
        match self {
            Device::Host(h) => h.set_online(online),
            Device::Hub(h) => h.set_online(online),
            Device::Switch(s) => s.set_online(online),
            Device::Router(r) => r.set_online(online),
        }
    }

    /// Interface names this device exposes for wiring.
    pub fn interface_names(&self) -> Vec<String> {
        match self {
            Device::Host(_) => vec!["eth0".into()],
            Device::Hub(h) => (0..h.port_count()).map(|i| format!("port{}", i)).collect(),
            Device::Switch(s) => (0..s.port_count()).map(|i| format!("port{}", i)).collect(),
            Device::Router(r) => r.engine().interface_names(),
        }
    }

    /// The NIC behind an interface name.
    pub fn nic_mut(&mut self, iface: &str) -> Option<&mut NetworkInterface> {
        match self {
            Device::Host(h) => (iface == "eth0").then(|| h.nic_mut()),
            Device::Hub(h) => port_index(iface).and_then(|i| h.nic_mut(i)),
            Device::Switch(s) => port_index(iface).and_then(|i| s.nic_mut(i)),
            Device::Router(r) => r.nic_mut(iface),
        }
    }

    /// Read-only NIC access.
    pub fn nic(&self, iface: &str) -> Option<&NetworkInterface> {
        match self {
            Device::Host(h) => (iface == "eth0").then(|| h.nic()),
            Device::Hub(h) => port_index(iface).and_then(|i| h.nic(i)),
            Device::Switch(s) => port_index(iface).and_then(|i| s.nic(i)),
            Device::Router(r) => r.nic(iface),
        }
    }

    /// Deliver a frame arriving on `iface`.
    pub fn receive_frame(&mut self, iface: &str, frame: EthernetFrame, now_ms: u64) {
        match self {
            Device::Host(h) => {
                if iface == "eth0" {
                    h.receive_frame(frame, now_ms);
                }
            }
            Device::Hub(h) => {
                if let Some(i) = port_index(iface) {
                    h.receive_frame(i, frame, now_ms);
                }
            }
            Device::Switch(s) => {
                if let Some(i) = port_index(iface) {
                    s.receive_frame(i, frame, now_ms);
                }
            }
            Device::Router(r) => r.receive_frame(iface, frame, now_ms),
        }
    }

    /// Downcast helpers for kind-specific operations.
    pub fn as_host(&self) -> Option<&Host> {
        match self {
            Device::Host(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_host_mut(&mut self) -> Option<&mut Host> {
        match self {
            Device::Host(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_switch(&self) -> Option<&Switch> {
        match self {
            Device::Switch(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_switch_mut(&mut self) -> Option<&mut Switch> {
        match self {
            Device::Switch(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_router(&self) -> Option<&Router> {
        match self {
            Device::Router(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_router_mut(&mut self) -> Option<&mut Router> {
        match self {
            Device::Router(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_hub(&self) -> Option<&Hub> {
        match self {
            Device::Hub(h) => Some(h),
            _ => None,
        }
    }
}
