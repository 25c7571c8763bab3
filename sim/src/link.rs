//! Link
//!
//! A bidirectional wire between two (device, interface) endpoints. The
//! active flag models the cable itself: while inactive, neither direction
//! delivers, cached state on the endpoints notwithstanding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::topology::DeviceId;

/// Link identifier.
pub type LinkId = u64;

/// One side of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub device: DeviceId,
    pub iface: String,
}

impl Endpoint {
    pub fn new(device: DeviceId, iface: impl Into<String>) -> Self {
        Endpoint {
            device,
            iface: iface.into(),
        }
    }
}

/// Shared cable state, referenced by the tx hooks on both endpoints.
#[derive(Debug)]
pub struct LinkState {
    active: AtomicBool,
}

impl LinkState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(LinkState {
            active: AtomicBool::new(true),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }
}

/// A wired connection.
#[derive(Debug)]
pub struct Link {
    pub id: LinkId,
    pub a: Endpoint,
    pub b: Endpoint,
    pub(crate) state: Arc<LinkState>,
}

impl Link {
    /// Whether the cable currently carries frames.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Whether `endpoint` is one of this link's two sides.
    pub fn touches(&self, device: DeviceId, iface: &str) -> bool {
        (self.a.device == device && self.a.iface == iface)
            || (self.b.device == device && self.b.iface == iface)
    }

    /// The opposite endpoint, given one side.
    pub fn peer_of(&self, device: DeviceId, iface: &str) -> Option<&Endpoint> {
        if self.a.device == device && self.a.iface == iface {
            Some(&self.b)
        } else if self.b.device == device && self.b.iface == iface {
            Some(&self.a)
        } else {
            None
        }
    }
}
