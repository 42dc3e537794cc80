//! The IP routing information base (§2).
//!
//! Grounded in the teacher's `iface::route::Routes` idiom (a fixed-capacity
//! `heapless::Vec` rather than the original's red-black trees — a handful of
//! entries don't need a balanced tree) and in `ip_route.c`'s field names and
//! three-pass `ip_route_find_by_network` lookup (exact network match, then
//! netmask-masked match, then default gateway).

use heapless::Vec;

use crate::config::NSTACK_IP_RIB_SIZE;
use crate::error::{Error, Result};
use crate::wire::Ipv4Address;

/// A single routing table entry, field-for-field the original `ip_route`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub network: Ipv4Address,
    pub netmask: Ipv4Address,
    pub gateway: Ipv4Address,
    pub iface_addr: Ipv4Address,
    pub iface_handle: i32,
}

impl Route {
    fn masked_network(&self, addr: Ipv4Address) -> bool {
        u32::from(self.network) == u32::from(addr) & u32::from(self.netmask)
    }
}

/// The routing table: a bounded set of routes, looked up by destination
/// network or by local interface address.
#[derive(Debug)]
pub struct Rib {
    routes: Vec<Route, NSTACK_IP_RIB_SIZE>,
}

impl Rib {
    pub fn new() -> Rib {
        Rib { routes: Vec::new() }
    }

    /// Insert a route, replacing any existing entry for the same network.
    pub fn update(&mut self, route: Route) -> Result<()> {
        if let Some(existing) = self.routes.iter_mut().find(|r| r.network == route.network) {
            *existing = route;
            return Ok(());
        }
        self.routes.push(route).map_err(|_| Error::NoSlot)
    }

    /// Remove the route for `network`, if present.
    pub fn remove(&mut self, network: Ipv4Address) -> Option<Route> {
        let pos = self.routes.iter().position(|r| r.network == network)?;
        Some(self.routes.remove(pos))
    }

    /// Three-pass destination lookup: exact network match, then
    /// netmask-masked match, then a default (`0.0.0.0/0`) gateway route.
    pub fn find_by_network(&self, addr: Ipv4Address) -> Result<Route> {
        if let Some(route) = self.routes.iter().find(|r| r.network == addr) {
            return Ok(*route);
        }
        if let Some(route) = self.routes.iter().find(|r| r.masked_network(addr)) {
            return Ok(*route);
        }
        if let Some(route) = self
            .routes
            .iter()
            .find(|r| r.network == Ipv4Address::new(0, 0, 0, 0))
        {
            return Ok(*route);
        }
        Err(Error::NoRouteToHost(addr))
    }

    /// Look up the route whose interface address is `addr` — used to
    /// resolve "am I the destination" and to find the egress handle for a
    /// locally configured interface.
    pub fn find_by_iface(&self, addr: Ipv4Address) -> Result<Route> {
        self.routes
            .iter()
            .find(|r| r.iface_addr == addr)
            .copied()
            .ok_or(Error::NoRouteToHost(addr))
    }
}

impl Default for Rib {
    fn default() -> Self {
        Self::new()
    }
}
