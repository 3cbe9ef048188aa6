//! Linux specific devices.

pub mod libc;
pub mod tap;

pub use self::tap::Tap;
