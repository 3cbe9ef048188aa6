use std::time::{
    Duration,
    Instant,
};

use crate::core::repr::{
    EthernetAddress,
    Ipv4Address,
};
use crate::core::time::{
    Env,
    SystemEnv,
};
use crate::{
    Error,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Free,
    /// A request has been broadcast and no answer seen yet.
    Incomplete,
    Resolved,
    /// Never expires and is never evicted.
    Static,
}

/// A slot of the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub status: Status,
    pub created_at: Instant,
    pub hw_addr: EthernetAddress,
    pub proto_addr: Ipv4Address,
}

impl Entry {
    fn free(now: Instant) -> Entry {
        Entry {
            status: Status::Free,
            created_at: now,
            hw_addr: EthernetAddress::ZERO,
            proto_addr: Ipv4Address::UNSPECIFIED,
        }
    }

    fn is_free(&self) -> bool {
        self.status == Status::Free
    }
}

/// Maintains a fixed number of IPv4 -> Ethernet address mappings.
///
/// There is at most one entry per protocol address. When every slot is taken
/// the entry created longest ago is reused, regardless of how recently it was
/// looked up.
pub struct ArpCache<T = SystemEnv>
where
    T: Env,
{
    entries: Vec<Entry>,
    lifetime: Duration,
    time_env: T,
}

impl<T: Env> ArpCache<T> {
    pub const CAPACITY: usize = 32;

    /// Lifetime of dynamic entries unless configured otherwise.
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

    /// Creates an ARP cache whose dynamic entries expire lifetime after they
    /// were created or last renewed.
    pub fn new(lifetime: Duration, time_env: T) -> ArpCache<T> {
        let now = time_env.now_instant();

        ArpCache {
            entries: vec![Entry::free(now); Self::CAPACITY],
            lifetime,
            time_env,
        }
    }

    fn position(&self, proto_addr: Ipv4Address) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| !entry.is_free() && entry.proto_addr == proto_addr)
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        match entry.status {
            Status::Incomplete | Status::Resolved => {
                now.duration_since(entry.created_at) > self.lifetime
            }
            _ => false,
        }
    }

    /// Looks up the entry for a protocol address. Expired entries which the
    /// sweep has not reached yet are not returned.
    pub fn lookup(&self, proto_addr: Ipv4Address) -> Option<Entry> {
        let now = self.time_env.now_instant();

        self.position(proto_addr)
            .map(|i| self.entries[i])
            .filter(|entry| !self.is_expired(entry, now))
    }

    /// Creates or updates the entry for a protocol address.
    ///
    /// A resolved entry is never downgraded to incomplete and a static entry
    /// is left untouched. An expired entry counts as absent.
    pub fn create(
        &mut self,
        proto_addr: Ipv4Address,
        hw_addr: EthernetAddress,
        status: Status,
    ) -> Result<()> {
        let now = self.time_env.now_instant();

        if let Some(i) = self.position(proto_addr) {
            let expired = self.is_expired(&self.entries[i], now);
            let entry = &mut self.entries[i];
            match (entry.status, status) {
                (Status::Static, _) => {}
                _ if expired => {
                    entry.status = status;
                    entry.hw_addr = hw_addr;
                    entry.created_at = now;
                }
                (Status::Resolved, Status::Incomplete) => {}
                (Status::Incomplete, Status::Incomplete) => {}
                _ => {
                    entry.status = status;
                    entry.hw_addr = hw_addr;
                    entry.created_at = now;
                }
            }
            return Ok(());
        }

        let i = self.alloc()?;
        self.entries[i] = Entry {
            status,
            created_at: now,
            hw_addr,
            proto_addr,
        };
        Ok(())
    }

    /// Refreshes an existing entry with a newly seen hardware address,
    /// marking it resolved. Returns false if there is no dynamic entry for the
    /// protocol address.
    pub fn renew(&mut self, proto_addr: Ipv4Address, hw_addr: EthernetAddress) -> bool {
        let now = self.time_env.now_instant();

        match self.position(proto_addr) {
            Some(i) if self.entries[i].status != Status::Static => {
                let entry = &mut self.entries[i];
                entry.status = Status::Resolved;
                entry.hw_addr = hw_addr;
                entry.created_at = now;
                true
            }
            _ => false,
        }
    }

    /// Checks if a resolution for a protocol address is outstanding.
    pub fn is_waiting(&self, proto_addr: Ipv4Address) -> bool {
        match self.lookup(proto_addr) {
            Some(entry) => entry.status == Status::Incomplete,
            None => false,
        }
    }

    /// Completes an outstanding resolution. Returns false, leaving the cache
    /// alone, if nothing was waiting for the protocol address.
    pub fn renew_if_waiting(&mut self, proto_addr: Ipv4Address, hw_addr: EthernetAddress) -> bool {
        self.is_waiting(proto_addr) && self.renew(proto_addr, hw_addr)
    }

    /// Installs a permanent mapping, replacing any dynamic one.
    pub fn insert_static(&mut self, proto_addr: Ipv4Address, hw_addr: EthernetAddress) -> Result<()> {
        let i = match self.position(proto_addr) {
            Some(i) => i,
            None => self.alloc()?,
        };

        self.entries[i] = Entry {
            status: Status::Static,
            created_at: self.time_env.now_instant(),
            hw_addr,
            proto_addr,
        };
        Ok(())
    }

    /// Frees every dynamic entry older than the cache lifetime, returning
    /// the entries which were cleared.
    pub fn sweep(&mut self) -> Vec<Entry> {
        let now = self.time_env.now_instant();
        let mut cleared = Vec::new();

        for i in 0 .. self.entries.len() {
            if self.is_expired(&self.entries[i], now) {
                cleared.push(self.entries[i]);
                self.entries[i] = Entry::free(now);
            }
        }

        cleared
    }

    /// Returns a snapshot of the occupied slots.
    pub fn entries(&self) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_free())
            .cloned()
            .collect()
    }

    /// Finds a free slot, or the oldest dynamic entry to overwrite.
    fn alloc(&self) -> Result<usize> {
        if let Some(i) = self.entries.iter().position(|entry| entry.is_free()) {
            return Ok(i);
        }

        let oldest = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.status != Status::Static)
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(i, _)| i);

        match oldest {
            Some(i) => {
                debug!(
                    "ARP cache full, evicting {} ({}).",
                    self.entries[i].proto_addr, self.entries[i].hw_addr
                );
                Ok(i)
            }
            None => Err(Error::Exhausted),
        }
    }
}
