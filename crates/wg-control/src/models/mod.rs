//! Data models for peers and subnets

mod peer;
mod subnet;

pub use peer::{validate_peer_name, IpAllocation, Peer};
pub use subnet::{Subnet, PRIVATE_RANGES};
