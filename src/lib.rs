//! A user space IPv4 stack which terminates Ethernet frames from TAP (or
//! loopback) devices, answers ARP and ICMP echo requests and routes IP
//! datagrams through a pipeline of worker threads.

#[cfg(test)]
#[macro_use]
extern crate assert_matches;
extern crate byteorder;
#[macro_use]
extern crate crossbeam;
#[macro_use]
extern crate lazy_static;
extern crate libc;
#[macro_use]
extern crate log;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate toml;

use std::fmt;
use std::io;

pub mod config;
pub mod core;

#[cfg(target_os = "linux")]
pub mod linux;

#[derive(Debug)]
pub enum Error {
    /// Indicates a packet or frame which is truncated or has inconsistent fields.
    InvalidPacket,
    /// Indicates an IP packet with a version other than 4.
    InvalidProtocolVersion(u8),
    /// Indicates a header or packet checksum which does not verify.
    ChecksumMismatch,
    /// Indicates an IP packet which arrived with no hops left.
    TtlExpired,
    /// Indicates an IP protocol number this stack does not handle.
    UnsupportedProtocol(u8),
    /// Indicates a device which can not perform address resolution.
    UnsupportedDevice,
    /// Indicates no interface is bound to a device or address.
    InterfaceNotFound,
    /// Indicates no route matches a destination.
    RouteNotFound,
    /// Indicates the link address of the next hop is still being resolved.
    ArpIncomplete,
    /// Indicates a destination outside of the source interface's network.
    NetworkAddressNotMatch,
    /// Indicates a packet which does not fit the device MTU.
    PacketTooLong,
    /// Indicates an operation on a device which is not up.
    DeviceNotOpened,
    /// Indicates an attempt to open a device which is already up.
    AlreadyOpened,
    /// Indicates a duplicate registration.
    Exist,
    /// Indicates a frame addressed to another station, or an empty read.
    NoDataToRead,
    /// Indicates a buffer, cache or queue is full.
    Exhausted,
    /// Indicates a wait interrupted by a signal. Callers retry.
    Interrupted,
    /// Indicates the device resource could not be opened.
    CantOpenResource(io::Error),
    /// Indicates the device resource could not be configured.
    CantConfigureResource(io::Error),
    /// Indicates a control socket could not be created.
    CantCreateEndpoint(io::Error),
    /// Indicates the readiness (epoll) instance could not be created.
    CantCreateReadinessInstance(io::Error),
    /// Indicates a generic failed system call.
    SyscallError(io::Error),
    /// Indicates the peer of a stage queue has gone away.
    ChannelClosed,
    /// Indicates a bounded wait ran out of time.
    Timeout,
    /// Indicates a worker of the stack stopped with an error.
    WorkerFailed,
    /// Indicates invalid configuration.
    Config(String),
}

impl Error {
    /// Checks if a stage can not keep running after this error.
    ///
    /// Per packet errors (malformed input, lookup misses) only drop the
    /// current unit of work.
    pub fn is_fatal(&self) -> bool {
        match *self {
            Error::CantOpenResource(_)
            | Error::CantConfigureResource(_)
            | Error::CantCreateEndpoint(_)
            | Error::CantCreateReadinessInstance(_)
            | Error::SyscallError(_)
            | Error::ChannelClosed
            | Error::WorkerFailed => true,
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::Interrupted => Error::Interrupted,
            _ => Error::SyscallError(err),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::InvalidProtocolVersion(version) => {
                write!(f, "invalid protocol version {}", version)
            }
            Error::UnsupportedProtocol(protocol) => write!(f, "unsupported protocol {}", protocol),
            Error::CantOpenResource(ref err) => write!(f, "can't open resource: {}", err),
            Error::CantConfigureResource(ref err) => write!(f, "can't configure resource: {}", err),
            Error::CantCreateEndpoint(ref err) => write!(f, "can't create endpoint: {}", err),
            Error::CantCreateReadinessInstance(ref err) => {
                write!(f, "can't create readiness instance: {}", err)
            }
            Error::SyscallError(ref err) => write!(f, "syscall error: {}", err),
            Error::Config(ref msg) => write!(f, "bad configuration: {}", msg),
            ref err => write!(f, "{:?}", err),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
