//! Daemon configuration.
//!
//! A configuration is read from a TOML file, or built from the defaults for
//! a single TAP device:
//!
//! ```toml
//! [stack]
//! poll_timeout_ms = 1000
//!
//! [[device]]
//! name = "tap0"
//! kind = "tap"
//! mac = "06:11:22:33:44:55"
//!
//! [[interface]]
//! device = "tap0"
//! address = "10.0.0.102"
//! netmask = "255.255.255.0"
//!
//! [[route]]
//! network = "0.0.0.0"
//! netmask = "0.0.0.0"
//! next_hop = "10.0.0.101"
//! interface = "10.0.0.102"
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::core::dev::{
    DeviceRef,
    Loopback,
};
use crate::core::repo::Iface;
use crate::core::repr::{
    EthernetAddress,
    Ipv4Address,
};
use crate::core::service::Context;
use crate::core::stack::Settings;
#[cfg(target_os = "linux")]
use crate::linux::Tap;
use crate::{
    Error,
    Result,
};

lazy_static! {
    pub static ref DEFAULT_IPV4_ADDR: Ipv4Address = Ipv4Address::new([10, 0, 0, 102]);

    pub static ref DEFAULT_IPV4_NETMASK: Ipv4Address = Ipv4Address::netmask(24);

    pub static ref DEFAULT_IPV4_GATEWAY: Ipv4Address = Ipv4Address::new([10, 0, 0, 101]);

    pub static ref DEFAULT_ETH_ADDR: EthernetAddress = {
        // Use a local MAC address!
        EthernetAddress::new([0x06, 0x11, 0x22, 0x33, 0x44, 0x55])
    };
}

pub const DEFAULT_TAP: &str = "tap0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Tap,
    Loopback,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: DeviceKind,
    /// Link address to use instead of the kernel's.
    pub mac: Option<String>,
    pub mtu: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InterfaceConfig {
    pub device: String,
    pub address: String,
    pub netmask: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RouteConfig {
    pub network: String,
    pub netmask: String,
    /// Gateway, or absent for a directly attached network.
    pub next_hop: Option<String>,
    /// Unicast address of the interface to route through.
    pub interface: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ArpStaticConfig {
    pub ip: String,
    pub mac: String,
}

/// Tunables of the `[stack]` table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub poll_timeout_ms: u64,
    pub queue_capacity: usize,
    pub startup_timeout_ms: u64,
    pub arp_lifetime_secs: u64,
    pub arp_sweep_interval_ms: u64,
    pub forwarding: bool,
}

impl Default for StackConfig {
    fn default() -> StackConfig {
        StackConfig {
            poll_timeout_ms: 1000,
            queue_capacity: 8,
            startup_timeout_ms: 5000,
            arp_lifetime_secs: 24 * 60 * 60,
            arp_sweep_interval_ms: 1000,
            forwarding: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stack: StackConfig,
    #[serde(rename = "device", default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(rename = "interface", default)]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(rename = "route", default)]
    pub routes: Vec<RouteConfig>,
    #[serde(rename = "arp_static", default)]
    pub arp_static: Vec<ArpStaticConfig>,
}

fn parse_ipv4(what: &str, value: &str) -> Result<Ipv4Address> {
    Ipv4Address::from_str(value)
        .map_err(|_| Error::Config(format!("bad {} {:?}, expected A.B.C.D", what, value)))
}

fn parse_netmask(value: &str) -> Result<Ipv4Address> {
    let netmask = parse_ipv4("netmask", value)?;

    if Ipv4Address::netmask(netmask.prefix_len()) != netmask {
        return Err(Error::Config(format!("netmask {} is not contiguous", netmask)));
    }

    Ok(netmask)
}

fn parse_mac(value: &str) -> Result<EthernetAddress> {
    EthernetAddress::from_str(value)
        .map_err(|_| Error::Config(format!("bad MAC {:?}, expected A:B:C:D:E:F", value)))
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(config: &str) -> Result<Config> {
        toml::from_str(config).map_err(|err| Error::Config(err.to_string()))
    }
}

impl Config {
    /// Reads a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let config = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("can't read {}: {}", path.display(), err)))?;
        config.parse()
    }

    /// A single TAP device with one interface and a default gateway.
    pub fn single_tap(
        tap: &str,
        mac: EthernetAddress,
        address: Ipv4Address,
        netmask: Ipv4Address,
        gateway: Ipv4Address,
    ) -> Config {
        Config {
            stack: StackConfig::default(),
            devices: vec![DeviceConfig {
                name: tap.to_string(),
                kind: DeviceKind::Tap,
                mac: Some(mac.to_string()),
                mtu: None,
            }],
            interfaces: vec![InterfaceConfig {
                device: tap.to_string(),
                address: address.to_string(),
                netmask: netmask.to_string(),
            }],
            routes: vec![RouteConfig {
                network: Ipv4Address::UNSPECIFIED.to_string(),
                netmask: Ipv4Address::UNSPECIFIED.to_string(),
                next_hop: Some(gateway.to_string()),
                interface: address.to_string(),
            }],
            arp_static: Vec::new(),
        }
    }

    /// The default setup: `tap0` at 10.0.0.102/24 with gateway 10.0.0.101.
    pub fn default_tap() -> Config {
        Config::single_tap(
            DEFAULT_TAP,
            *DEFAULT_ETH_ADDR,
            *DEFAULT_IPV4_ADDR,
            *DEFAULT_IPV4_NETMASK,
            *DEFAULT_IPV4_GATEWAY,
        )
    }

    pub fn settings(&self) -> Settings {
        Settings {
            poll_timeout: Duration::from_millis(self.stack.poll_timeout_ms),
            queue_capacity: self.stack.queue_capacity.max(1),
            startup_timeout: Duration::from_millis(self.stack.startup_timeout_ms),
            arp_sweep_interval: Duration::from_millis(self.stack.arp_sweep_interval_ms.max(1)),
        }
    }

    pub fn arp_lifetime(&self) -> Duration {
        Duration::from_secs(self.stack.arp_lifetime_secs)
    }

    /// Registers the configured devices, interfaces, routes and static ARP
    /// entries in a new context. Every interface also gets a route to its
    /// own network.
    pub fn build_context(&self) -> Result<Context> {
        let mut ctx = Context::new(self.arp_lifetime());
        ctx.forwarding = self.stack.forwarding;

        for dev_config in self.devices.iter() {
            ctx.devices.register_device(build_device(dev_config)?)?;
        }

        for iface_config in self.interfaces.iter() {
            let dev = ctx.devices.get(&iface_config.device).ok_or_else(|| {
                Error::Config(format!("interface on unknown device {}", iface_config.device))
            })?;

            let iface = Iface::new(
                parse_ipv4("address", &iface_config.address)?,
                parse_netmask(&iface_config.netmask)?,
                &dev,
            );
            let iface = ctx.ifaces.register_interface(iface)?;
            ctx.routes.register_route(
                iface.network(),
                iface.netmask,
                Ipv4Address::UNSPECIFIED,
                &iface,
            )?;
        }

        for route_config in self.routes.iter() {
            let iface = ctx
                .ifaces
                .lookup_by_unicast(parse_ipv4("interface", &route_config.interface)?)
                .ok_or(Error::InterfaceNotFound)?;
            let next_hop = match route_config.next_hop {
                Some(ref next_hop) => parse_ipv4("next hop", next_hop)?,
                None => Ipv4Address::UNSPECIFIED,
            };
            let network = parse_ipv4("network", &route_config.network)?;
            let netmask = parse_netmask(&route_config.netmask)?;

            if network.prefix_len() == 0 && netmask.prefix_len() == 0 {
                ctx.routes.register_default_gateway(&iface, next_hop)?;
            } else {
                ctx.routes.register_route(network, netmask, next_hop, &iface)?;
            }
        }

        for entry in self.arp_static.iter() {
            ctx.arp_cache()
                .insert_static(parse_ipv4("ip", &entry.ip)?, parse_mac(&entry.mac)?)?;
        }

        Ok(ctx)
    }
}

fn build_device(dev_config: &DeviceConfig) -> Result<DeviceRef> {
    match dev_config.kind {
        DeviceKind::Loopback => {
            if dev_config.mac.is_some() || dev_config.mtu.is_some() {
                warn!("Ignoring MAC and MTU of loopback {}.", dev_config.name);
            }
            Ok(Arc::new(Loopback::new(&dev_config.name)))
        }
        #[cfg(target_os = "linux")]
        DeviceKind::Tap => {
            let mac = match dev_config.mac {
                Some(ref mac) => Some(parse_mac(mac)?),
                None => None,
            };
            Ok(Arc::new(Tap::new(&dev_config.name, mac, dev_config.mtu)))
        }
        #[cfg(not(target_os = "linux"))]
        DeviceKind::Tap => Err(Error::Config(format!(
            "TAP device {} needs Linux",
            dev_config.name
        ))),
    }
}
