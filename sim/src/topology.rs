//! Topology Registry
//!
//! Directory of devices and links, the logical clock, and the frame pump.
//!
//! Devices are owned here behind `Arc<Mutex<_>>` and identified by stable
//! ids; tx hooks capture ids and narrow shared state (the link's active
//! flag, the pending-frame queue), never whole devices, so tearing a link
//! or a device down never leaves a dangling reference.
//!
//! Delivery is synchronous in the observable sense: `transmit` enqueues
//! onto the wire, and the outermost operation drains the queue depth-first
//! before returning. A handler that transmits mid-delivery simply extends
//! the queue — re-entering a device that is higher up the call chain is
//! safe because each device is only borrowed for the span of one handler.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use spin::Mutex;

use wirelab_net::wire::EthernetFrame;
use wirelab_net::MacAddress;

use crate::device::Device;
use crate::host::{Host, OsFlavor};
use crate::hub::Hub;
use crate::link::{Endpoint, Link, LinkId, LinkState};
use crate::router::Router;
use crate::switch::Switch;
use crate::terminal;

/// Stable device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

// ── The wire ────────────────────────────────────────────────

/// A frame in flight toward a device interface.
struct Delivery {
    to: DeviceId,
    iface: String,
    frame: EthernetFrame,
}

/// The shared frame queue all tx hooks feed.
pub(crate) struct Fabric {
    queue: Mutex<VecDeque<Delivery>>,
    pumping: AtomicBool,
}

impl Fabric {
    fn new() -> Arc<Self> {
        Arc::new(Fabric {
            queue: Mutex::new(VecDeque::new()),
            pumping: AtomicBool::new(false),
        })
    }

    fn enqueue(&self, to: DeviceId, iface: String, frame: EthernetFrame) {
        self.queue.lock().push_back(Delivery { to, iface, frame });
    }
}

// ── Registry ────────────────────────────────────────────────

/// The device and link registry.
pub struct Topology {
    devices: BTreeMap<DeviceId, Arc<Mutex<Device>>>,
    positions: BTreeMap<DeviceId, (f64, f64)>,
    links: BTreeMap<LinkId, Link>,
    fabric: Arc<Fabric>,
    next_device: u64,
    next_link: LinkId,
    next_mac: u32,
    clock_ms: u64,
}

impl Topology {
    /// Create an empty topology at t = 0.
    pub fn new() -> Self {
        Topology {
            devices: BTreeMap::new(),
            positions: BTreeMap::new(),
            links: BTreeMap::new(),
            fabric: Fabric::new(),
            next_device: 1,
            next_link: 1,
            next_mac: 1,
            clock_ms: 0,
        }
    }

    // ── Clock ───────────────────────────────────────────────

    /// Current logical time.
    pub fn now_ms(&self) -> u64 {
        self.clock_ms
    }

    /// Advance the logical clock.
    pub fn advance(&mut self, ms: u64) {
        self.clock_ms += ms;
    }

    // ── Device management ───────────────────────────────────

    /// Next locally-administered MAC (02:57:4C:xx:xx:xx).
    fn alloc_mac(&mut self) -> MacAddress {
        let n = self.next_mac;
        self.next_mac += 1;
        MacAddress::new([
            0x02,
            0x57,
            0x4C,
            (n >> 16) as u8,
            (n >> 8) as u8,
            n as u8,
        ])
    }

    fn insert(&mut self, device: Device, x: f64, y: f64) -> DeviceId {
        let id = DeviceId(self.next_device);
        self.next_device += 1;
        info!("add {} {}", device.kind().name(), id);
        self.devices.insert(id, Arc::new(Mutex::new(device)));
        self.positions.insert(id, (x, y));
        id
    }

    /// Add a host.
    pub fn add_host(&mut self, hostname: &str, os: OsFlavor, x: f64, y: f64) -> DeviceId {
        let mac = self.alloc_mac();
        self.insert(Device::Host(Host::new(hostname, os, mac)), x, y)
    }

    /// Add a switch.
    pub fn add_switch(&mut self, port_count: usize, x: f64, y: f64) -> DeviceId {
        let macs = (0..port_count).map(|_| self.alloc_mac()).collect();
        self.insert(Device::Switch(Switch::new(macs)), x, y)
    }

    /// Add a hub.
    pub fn add_hub(&mut self, port_count: usize, x: f64, y: f64) -> DeviceId {
        let macs = (0..port_count).map(|_| self.alloc_mac()).collect();
        self.insert(Device::Hub(Hub::new(macs)), x, y)
    }

    /// Add a router.
    pub fn add_router(&mut self, iface_count: usize, x: f64, y: f64) -> DeviceId {
        let macs = (0..iface_count).map(|_| self.alloc_mac()).collect();
        self.insert(Device::Router(Router::new(macs)), x, y)
    }

    /// Handle to a device.
    pub fn device(&self, id: DeviceId) -> Option<Arc<Mutex<Device>>> {
        self.devices.get(&id).cloned()
    }

    /// Canvas position (opaque to the engine).
    pub fn position(&self, id: DeviceId) -> Option<(f64, f64)> {
        self.positions.get(&id).copied()
    }

    /// Ids of all devices, in creation order.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    // ── Wiring ──────────────────────────────────────────────

    /// Whether some link already terminates at (device, iface).
    pub fn endpoint_occupied(&self, device: DeviceId, iface: &str) -> bool {
        self.links.values().any(|l| l.touches(device, iface))
    }

    /// Wire two endpoints together.
    ///
    /// Returns `None` if a device or interface is missing, either endpoint
    /// is already occupied, or both endpoints are the same device.
    pub fn connect(
        &mut self,
        a: DeviceId,
        iface_a: &str,
        b: DeviceId,
        iface_b: &str,
    ) -> Option<LinkId> {
        if a == b {
            return None;
        }
        if self.endpoint_occupied(a, iface_a) || self.endpoint_occupied(b, iface_b) {
            return None;
        }
        // Both interfaces must exist before anything is installed
        for (dev, iface) in [(a, iface_a), (b, iface_b)] {
            let handle = self.devices.get(&dev)?;
            if handle.lock().nic_mut(iface).is_none() {
                return None;
            }
        }

        let id = self.next_link;
        self.next_link += 1;
        let state = LinkState::new();

        // A transmit lands on B, and vice versa, while the cable is active.
        self.install_hook(a, iface_a, Endpoint::new(b, iface_b), state.clone());
        self.install_hook(b, iface_b, Endpoint::new(a, iface_a), state.clone());

        debug!("link {}: {}:{} <-> {}:{}", id, a, iface_a, b, iface_b);
        self.links.insert(
            id,
            Link {
                id,
                a: Endpoint::new(a, iface_a),
                b: Endpoint::new(b, iface_b),
                state,
            },
        );
        Some(id)
    }

    fn install_hook(&self, device: DeviceId, iface: &str, peer: Endpoint, state: Arc<LinkState>) {
        let fabric = self.fabric.clone();
        if let Some(handle) = self.devices.get(&device) {
            if let Some(nic) = handle.lock().nic_mut(iface) {
                nic.set_tx_hook(Box::new(move |frame| {
                    if state.is_active() {
                        fabric.enqueue(peer.device, peer.iface.clone(), frame.clone());
                    }
                }));
            }
        }
    }

    /// Remove a link and detach both tx hooks.
    pub fn disconnect(&mut self, id: LinkId) {
        if let Some(link) = self.links.remove(&id) {
            for end in [&link.a, &link.b] {
                if let Some(handle) = self.devices.get(&end.device) {
                    if let Some(nic) = handle.lock().nic_mut(&end.iface) {
                        nic.clear_tx_hook();
                    }
                }
            }
        }
    }

    /// A link by id.
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    /// All link ids.
    pub fn link_ids(&self) -> Vec<LinkId> {
        self.links.keys().copied().collect()
    }

    /// Flip a cable live or dead without unwiring it.
    pub fn set_link_active(&mut self, id: LinkId, active: bool) {
        if let Some(link) = self.links.get(&id) {
            debug!("link {} {}", id, if active { "up" } else { "down" });
            link.state.set_active(active);
        }
    }

    /// Tear everything down: links unwired, devices powered off and
    /// dropped, pending frames discarded.
    pub fn clear_all(&mut self) {
        let link_ids: Vec<LinkId> = self.links.keys().copied().collect();
        for id in link_ids {
            self.disconnect(id);
        }
        for handle in self.devices.values() {
            handle.lock().set_online(false);
        }
        self.devices.clear();
        self.positions.clear();
        self.fabric.queue.lock().clear();
    }

    // ── Delivery ────────────────────────────────────────────

    /// Drain the wire until no frame is in flight.
    ///
    /// Handlers run one at a time with only their own device locked, so a
    /// protocol chain may wind back into a device that triggered it.
    /// Nested calls (a handler somehow pumping) are no-ops.
    pub fn pump(&self) {
        if self.fabric.pumping.swap(true, Ordering::Acquire) {
            return;
        }
        loop {
            let next = self.fabric.queue.lock().pop_front();
            let delivery = match next {
                Some(d) => d,
                None => break,
            };
            if let Some(handle) = self.devices.get(&delivery.to) {
                let handle = handle.clone();
                handle
                    .lock()
                    .receive_frame(&delivery.iface, delivery.frame, self.clock_ms);
            }
        }
        self.fabric.pumping.store(false, Ordering::Release);
    }

    /// Inject a frame as if it arrived at (device, iface), then pump.
    pub fn deliver(&self, to: DeviceId, iface: &str, frame: EthernetFrame) {
        self.fabric.enqueue(to, iface.to_string(), frame);
        self.pump();
    }

    // ── Terminal ────────────────────────────────────────────

    /// Run a terminal command line on a device, returning rendered output.
    pub fn execute_command(&mut self, id: DeviceId, line: &str) -> String {
        terminal::execute(self, id, line)
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}
