//! Wirelab Simulation Layer
//!
//! Composes the protocol engine into virtual devices and wires them
//! together:
//!
//! - `host` / `hub` / `switch` / `router`: device kernels dispatching
//!   received frames by EtherType into the engine services
//! - `link`: the bidirectional wire between two (device, interface)
//!   endpoints
//! - `topology`: the registry owning devices and links, and the frame
//!   pump that realizes synchronous delivery
//! - `terminal`: the `ifconfig`/`ping`/`dhclient`/`ipconfig` surface
//!
//! Scheduling is single-threaded and cooperative: a transmitted frame is
//! queued on the wire and the registry drains the queue depth-first before
//! the triggering operation returns. Time is a logical millisecond counter
//! owned by the topology.

pub mod device;
pub mod host;
pub mod hub;
pub mod link;
pub mod router;
pub mod switch;
pub mod terminal;
pub mod topology;

pub use device::{Device, DeviceKind};
pub use host::{Host, OsFlavor};
pub use hub::Hub;
pub use link::{Endpoint, Link, LinkId};
pub use router::Router;
pub use switch::Switch;
pub use topology::{DeviceId, Topology};
