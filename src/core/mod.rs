//! Core, platform independent networking code.

pub mod arp_cache;
pub mod check;
pub mod dev;
pub mod message;
pub mod monitor;
pub mod repo;
pub mod repr;
pub mod service;
pub mod stack;
pub mod time;
pub mod worker;
