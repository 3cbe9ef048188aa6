//! Registries of devices, interfaces and routes.
//!
//! Entries are registered once during setup and only read afterwards, so
//! every lookup clones out what it needs and releases the lock straight away.

use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    Weak,
};

use crate::core::dev::{
    Device,
    DeviceRef,
};
use crate::core::repr::Ipv4Address;
use crate::{
    Error,
    Result,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Registries hold plain data, a panicking holder can't leave them torn.
    match mutex.lock() {
        Ok(guard) => guard,
        Err(err) => err.into_inner(),
    }
}

/// Address family of an interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    Ipv4,
}

/// A protocol address bound to a device.
#[derive(Debug)]
pub struct Iface {
    pub family: Family,
    pub unicast: Ipv4Address,
    pub netmask: Ipv4Address,
    pub broadcast: Ipv4Address,
    dev: Weak<dyn Device>,
}

pub type IfaceRef = Arc<Iface>;

impl Iface {
    /// Creates an IPv4 interface on a device. The broadcast address is
    /// derived from the unicast address and netmask.
    pub fn new(unicast: Ipv4Address, netmask: Ipv4Address, dev: &DeviceRef) -> Iface {
        Iface {
            family: Family::Ipv4,
            unicast,
            netmask,
            broadcast: unicast.broadcast(netmask),
            dev: Arc::downgrade(dev),
        }
    }

    /// Returns the device, unless it has been dropped.
    pub fn dev(&self) -> Option<DeviceRef> {
        self.dev.upgrade()
    }

    pub fn network(&self) -> Ipv4Address {
        self.unicast.mask(self.netmask)
    }

    /// Checks if an address is on this interface's network.
    pub fn contains(&self, addr: Ipv4Address) -> bool {
        addr.mask(self.netmask) == self.network()
    }

    fn is_on(&self, dev: &dyn Device) -> bool {
        match self.dev() {
            Some(ref own) => own.equal(dev),
            None => false,
        }
    }
}

/// An entry of the routing table.
#[derive(Clone, Debug)]
pub struct Route {
    pub network: Ipv4Address,
    pub netmask: Ipv4Address,
    /// Gateway to forward through, or unspecified if the network is directly
    /// reachable.
    pub next_hop: Ipv4Address,
    pub iface: IfaceRef,
}

impl Route {
    pub fn matches(&self, dst_addr: Ipv4Address) -> bool {
        dst_addr.mask(self.netmask) == self.network
    }

    /// Returns the address to resolve on the link for a destination.
    pub fn next_hop_for(&self, dst_addr: Ipv4Address) -> Ipv4Address {
        if self.next_hop.is_unspecified() {
            dst_addr
        } else {
            self.next_hop
        }
    }
}

#[derive(Default)]
pub struct DeviceRepo {
    devices: Mutex<Vec<DeviceRef>>,
}

impl DeviceRepo {
    pub fn new() -> DeviceRepo {
        DeviceRepo::default()
    }

    /// Registers a device, rejecting duplicate names.
    pub fn register_device(&self, dev: DeviceRef) -> Result<()> {
        let mut devices = lock(&self.devices);

        if devices.iter().any(|other| other.equal(&*dev)) {
            return Err(Error::Exist);
        }

        info!("Registered device {} ({}).", dev.name(), dev.addr());
        devices.push(dev);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<DeviceRef> {
        lock(&self.devices)
            .iter()
            .find(|dev| dev.name() == name)
            .cloned()
    }

    /// Returns a snapshot of all registered devices.
    pub fn devices(&self) -> Vec<DeviceRef> {
        lock(&self.devices).clone()
    }
}

#[derive(Default)]
pub struct IfaceRepo {
    ifaces: Mutex<Vec<IfaceRef>>,
}

impl IfaceRepo {
    pub fn new() -> IfaceRepo {
        IfaceRepo::default()
    }

    /// Registers an interface. A device hosts at most one interface per
    /// family and a unicast address is bound at most once.
    pub fn register_interface(&self, iface: Iface) -> Result<IfaceRef> {
        let dev = iface.dev().ok_or(Error::DeviceNotOpened)?;
        let mut ifaces = lock(&self.ifaces);

        if ifaces.iter().any(|other| {
            other.unicast == iface.unicast || (other.family == iface.family && other.is_on(&*dev))
        }) {
            return Err(Error::Exist);
        }

        info!(
            "Registered interface {}/{} on {}.",
            iface.unicast,
            iface.netmask.prefix_len(),
            dev.name()
        );

        let iface = Arc::new(iface);
        ifaces.push(iface.clone());
        Ok(iface)
    }

    /// Looks up the interface of a family bound to a device.
    pub fn lookup_by_dev(&self, dev: &dyn Device, family: Family) -> Option<IfaceRef> {
        lock(&self.ifaces)
            .iter()
            .find(|iface| iface.family == family && iface.is_on(dev))
            .cloned()
    }

    pub fn lookup_by_unicast(&self, unicast: Ipv4Address) -> Option<IfaceRef> {
        lock(&self.ifaces)
            .iter()
            .find(|iface| iface.unicast == unicast)
            .cloned()
    }

    /// Looks up the first interface whose network contains an address.
    pub fn lookup_by_network(&self, addr: Ipv4Address) -> Option<IfaceRef> {
        lock(&self.ifaces)
            .iter()
            .find(|iface| iface.contains(addr))
            .cloned()
    }

    pub fn ifaces(&self) -> Vec<IfaceRef> {
        lock(&self.ifaces).clone()
    }
}

#[derive(Default)]
pub struct RouteRepo {
    routes: Mutex<Vec<Route>>,
}

impl RouteRepo {
    pub fn new() -> RouteRepo {
        RouteRepo::default()
    }

    /// Registers a route to network/netmask via next_hop (unspecified for
    /// directly attached networks).
    pub fn register_route(
        &self,
        network: Ipv4Address,
        netmask: Ipv4Address,
        next_hop: Ipv4Address,
        iface: &IfaceRef,
    ) -> Result<()> {
        let route = Route {
            network: network.mask(netmask),
            netmask,
            next_hop,
            iface: iface.clone(),
        };

        let mut routes = lock(&self.routes);

        if routes.iter().any(|other| {
            other.network == route.network && other.netmask == route.netmask
                && Arc::ptr_eq(&other.iface, &route.iface)
        }) {
            return Err(Error::Exist);
        }

        debug!(
            "Registered route {}/{} via {} on {}.",
            route.network,
            route.netmask.prefix_len(),
            route.next_hop,
            route.iface.unicast
        );

        routes.push(route);
        Ok(())
    }

    /// Registers 0.0.0.0/0 via next_hop.
    pub fn register_default_gateway(&self, iface: &IfaceRef, next_hop: Ipv4Address) -> Result<()> {
        self.register_route(
            Ipv4Address::UNSPECIFIED,
            Ipv4Address::UNSPECIFIED,
            next_hop,
            iface,
        )
    }

    /// Longest prefix match. Among equally specific routes the one
    /// registered first wins.
    pub fn lookup(&self, dst_addr: Ipv4Address) -> Option<Route> {
        let routes = lock(&self.routes);
        let mut best: Option<&Route> = None;

        for route in routes.iter().filter(|route| route.matches(dst_addr)) {
            best = match best {
                Some(other) if other.netmask.prefix_len() >= route.netmask.prefix_len() => {
                    Some(other)
                }
                _ => Some(route),
            };
        }

        best.cloned()
    }

    pub fn routes(&self) -> Vec<Route> {
        lock(&self.routes).clone()
    }
}
