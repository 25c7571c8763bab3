//! Routing Table
//!
//! Longest-prefix match over connected and static routes. Ties break on
//! metric, then on insertion order.

use core::fmt;

use crate::addr::{Ipv4Addr, SubnetMask};

/// One routing table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub network: Ipv4Addr,
    pub mask: SubnetMask,
    pub next_hop: Option<Ipv4Addr>,
    pub iface: String,
    /// Synthesized from an interface address, as opposed to user-added.
    pub connected: bool,
    pub metric: u32,
}

impl Route {
    /// A connected route for an interface subnet (metric 0, no next hop).
    pub fn connected(ip: Ipv4Addr, mask: SubnetMask, iface: impl Into<String>) -> Self {
        Route {
            network: ip.network_of(mask),
            mask,
            next_hop: None,
            iface: iface.into(),
            connected: true,
            metric: 0,
        }
    }

    /// A static route.
    pub fn via(
        network: Ipv4Addr,
        mask: SubnetMask,
        next_hop: Ipv4Addr,
        iface: impl Into<String>,
        metric: u32,
    ) -> Self {
        Route {
            network: network.network_of(mask),
            mask,
            next_hop: Some(next_hop),
            iface: iface.into(),
            connected: false,
            metric,
        }
    }

    /// Whether `dest` falls inside this route's prefix.
    pub fn matches(&self, dest: Ipv4Addr) -> bool {
        dest.in_subnet(self.network, self.mask)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} via {} dev {} metric {}",
            self.network,
            self.mask.prefix_len(),
            self.next_hop
                .map(|n| n.to_string())
                .unwrap_or_else(|| "direct".into()),
            self.iface,
            self.metric
        )
    }
}

/// The table.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route.
    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Replace the connected route for `iface` (interface re-addressed),
    /// then append the new one.
    pub fn replace_connected(&mut self, route: Route) {
        debug_assert!(route.connected);
        self.routes
            .retain(|r| !(r.connected && r.iface == route.iface));
        self.routes.push(route);
    }

    /// Remove every route bound to `iface`.
    pub fn remove_iface(&mut self, iface: &str) {
        self.routes.retain(|r| r.iface != iface);
    }

    /// All routes, in insertion order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Longest-prefix match for `dest`.
    ///
    /// Most specific prefix wins; among equal prefixes the lowest metric
    /// wins; among equal metrics the earliest inserted wins.
    pub fn lookup(&self, dest: Ipv4Addr) -> Option<&Route> {
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if !route.matches(dest) {
                continue;
            }
            best = match best {
                None => Some(route),
                Some(current) => {
                    let better = route.mask.prefix_len() > current.mask.prefix_len()
                        || (route.mask.prefix_len() == current.mask.prefix_len()
                            && route.metric < current.metric);
                    if better {
                        Some(route)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(prefix: u8) -> SubnetMask {
        SubnetMask::from_prefix(prefix).unwrap()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut table = RoutingTable::new();
        table.add(Route::via(
            Ipv4Addr::new(10, 0, 0, 0),
            mask(8),
            Ipv4Addr::new(1, 1, 1, 1),
            "eth0",
            1,
        ));
        table.add(Route::via(
            Ipv4Addr::new(10, 1, 0, 0),
            mask(16),
            Ipv4Addr::new(2, 2, 2, 2),
            "eth1",
            1,
        ));

        let r = table.lookup(Ipv4Addr::new(10, 1, 5, 6)).unwrap();
        assert_eq!(r.iface, "eth1");
        let r = table.lookup(Ipv4Addr::new(10, 2, 5, 6)).unwrap();
        assert_eq!(r.iface, "eth0");
    }

    #[test]
    fn test_metric_breaks_prefix_tie() {
        let mut table = RoutingTable::new();
        table.add(Route::via(
            Ipv4Addr::new(10, 0, 0, 0),
            mask(8),
            Ipv4Addr::new(1, 1, 1, 1),
            "eth0",
            10,
        ));
        table.add(Route::via(
            Ipv4Addr::new(10, 0, 0, 0),
            mask(8),
            Ipv4Addr::new(2, 2, 2, 2),
            "eth1",
            1,
        ));
        assert_eq!(table.lookup(Ipv4Addr::new(10, 3, 3, 3)).unwrap().iface, "eth1");
    }

    #[test]
    fn test_insertion_order_breaks_full_tie() {
        let mut table = RoutingTable::new();
        table.add(Route::via(
            Ipv4Addr::new(10, 0, 0, 0),
            mask(8),
            Ipv4Addr::new(1, 1, 1, 1),
            "eth0",
            1,
        ));
        table.add(Route::via(
            Ipv4Addr::new(10, 0, 0, 0),
            mask(8),
            Ipv4Addr::new(2, 2, 2, 2),
            "eth1",
            1,
        ));
        assert_eq!(table.lookup(Ipv4Addr::new(10, 3, 3, 3)).unwrap().iface, "eth0");
    }

    #[test]
    fn test_no_match() {
        let mut table = RoutingTable::new();
        table.add(Route::connected(
            Ipv4Addr::new(192, 168, 1, 1),
            mask(24),
            "eth0",
        ));
        assert!(table.lookup(Ipv4Addr::new(8, 8, 8, 8)).is_none());
    }

    #[test]
    fn test_default_route_catches_all() {
        let mut table = RoutingTable::new();
        table.add(Route::connected(
            Ipv4Addr::new(192, 168, 1, 1),
            mask(24),
            "eth0",
        ));
        table.add(Route::via(
            Ipv4Addr::ANY,
            mask(0),
            Ipv4Addr::new(10, 0, 0, 2),
            "eth1",
            10,
        ));

        assert_eq!(table.lookup(Ipv4Addr::new(8, 8, 8, 8)).unwrap().iface, "eth1");
        // The /24 still beats the default for local traffic
        assert_eq!(
            table.lookup(Ipv4Addr::new(192, 168, 1, 30)).unwrap().iface,
            "eth0"
        );
    }

    #[test]
    fn test_replace_connected() {
        let mut table = RoutingTable::new();
        table.replace_connected(Route::connected(
            Ipv4Addr::new(192, 168, 1, 1),
            mask(24),
            "eth0",
        ));
        table.replace_connected(Route::connected(
            Ipv4Addr::new(172, 16, 0, 1),
            mask(16),
            "eth0",
        ));
        assert_eq!(table.routes().len(), 1);
        assert_eq!(
            table.routes()[0].network,
            Ipv4Addr::new(172, 16, 0, 0)
        );
    }
}
