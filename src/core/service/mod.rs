//! Packet processing for the different layers of the stack.
//!
//! Every function here handles one unit of work against a shared `Context`
//! and returns whatever the next stage should receive. Queues and threads
//! live in `core::stack`, so these functions can be driven directly from
//! tests.

pub mod arp;
pub mod ethernet;
pub mod icmpv4;
pub mod ipv4;

use std::sync::{
    Mutex,
    MutexGuard,
};
use std::time::Duration;

use crate::core::arp_cache::ArpCache;
use crate::core::repo::{
    DeviceRepo,
    IfaceRepo,
    RouteRepo,
};
use crate::core::time::{
    Env,
    SystemEnv,
};

pub use self::ipv4::Identification;

/// State shared by every stage of the stack.
pub struct Context<T = SystemEnv>
where
    T: Env,
{
    pub devices: DeviceRepo,
    pub ifaces: IfaceRepo,
    pub routes: RouteRepo,
    /// Cache for IPv4/Ethernet address translations.
    pub arp_cache: Mutex<ArpCache<T>>,
    /// Source of IPv4 identification values.
    pub ids: Identification,
    /// Forward packets which are not addressed to this host.
    pub forwarding: bool,
}

impl Context<SystemEnv> {
    pub fn new(arp_lifetime: Duration) -> Context<SystemEnv> {
        Context::with_env(arp_lifetime, SystemEnv::new(), Identification::new())
    }
}

impl<T: Env> Context<T> {
    pub fn with_env(arp_lifetime: Duration, time_env: T, ids: Identification) -> Context<T> {
        Context {
            devices: DeviceRepo::new(),
            ifaces: IfaceRepo::new(),
            routes: RouteRepo::new(),
            arp_cache: Mutex::new(ArpCache::new(arp_lifetime, time_env)),
            ids,
            forwarding: false,
        }
    }

    /// Locks the ARP cache. The guard must be dropped before any transmit.
    pub fn arp_cache(&self) -> MutexGuard<'_, ArpCache<T>> {
        match self.arp_cache.lock() {
            Ok(guard) => guard,
            Err(err) => err.into_inner(),
        }
    }
}
