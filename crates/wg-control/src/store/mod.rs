//! Peer store
//!
//! The authoritative persistent index of peers and their IP allocations.
//! Both tables live in one JSON document that is atomically replaced on every
//! commit, so a crash leaves either the old or the new state on disk.

use crate::fsutil::{write_atomic, SECRET_FILE_MODE};
use crate::models::{IpAllocation, Peer, Subnet};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// On-disk layout of the store
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    subnet: Subnet,
    #[serde(default)]
    peers: Vec<Peer>,
    #[serde(default)]
    ip_assignments: Vec<IpAllocation>,
}

impl StoreDocument {
    fn empty(subnet: Subnet) -> Self {
        Self {
            subnet,
            peers: Vec::new(),
            ip_assignments: Vec::new(),
        }
    }

    fn allocated(&self) -> BTreeSet<u32> {
        self.ip_assignments.iter().map(|a| u32::from(a.ip)).collect()
    }
}

/// Persistent store of peers keyed by name, with IP as secondary key
pub struct PeerStore {
    path: PathBuf,
    state: RwLock<StoreDocument>,
}

impl PeerStore {
    /// Open the store at `path`, creating it with `subnet` if absent
    pub fn open(path: impl Into<PathBuf>, subnet: Subnet) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            Self::read(&path)?
        } else {
            let document = StoreDocument::empty(subnet);
            Self::write(&path, &document)?;
            info!(path = %path.display(), subnet = %subnet, "Created peer store");
            document
        };
        debug!(path = %path.display(), peers = state.peers.len(), "Opened peer store");
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn read(path: &Path) -> Result<StoreDocument> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Storage(format!("Failed to decode {}: {}", path.display(), e)))
    }

    fn write(path: &Path, document: &StoreDocument) -> Result<()> {
        let json = serde_json::to_vec_pretty(document)?;
        write_atomic(path, &json, Some(SECRET_FILE_MODE))
    }

    /// Persist `next` and make it the in-memory state
    fn commit(&self, state: &mut StoreDocument, next: StoreDocument) -> Result<()> {
        Self::write(&self.path, &next)?;
        *state = next;
        Ok(())
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the backing file, discarding the in-memory state
    pub fn reload(&self) -> Result<()> {
        let document = Self::read(&self.path)?;
        *self.state.write() = document;
        debug!(path = %self.path.display(), "Reloaded peer store");
        Ok(())
    }

    /// Subnet used for allocation
    pub fn subnet(&self) -> Subnet {
        self.state.read().subnet
    }

    /// Insert a new peer together with its allocation record
    pub fn insert(&self, peer: Peer) -> Result<()> {
        let mut state = self.state.write();

        if state.peers.iter().any(|p| p.name == peer.name) {
            return Err(Error::DuplicateName(peer.name));
        }
        if peer.ip == state.subnet.server_ip()
            || state.ip_assignments.iter().any(|a| a.ip == peer.ip)
            || state.peers.iter().any(|p| p.ip == peer.ip)
        {
            return Err(Error::DuplicateIp(peer.ip.to_string()));
        }
        if !state.subnet.is_assignable(peer.ip) {
            return Err(Error::InvalidSubnet(format!(
                "{} is not an assignable address in {}",
                peer.ip, state.subnet
            )));
        }

        let mut next = state.clone();
        next.ip_assignments.push(peer.allocation());
        next.peers.push(peer);
        self.commit(&mut state, next)
    }

    /// Remove a peer and release its address
    pub fn delete_by_name(&self, name: &str) -> Result<Peer> {
        let mut state = self.state.write();

        let index = state
            .peers
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| Error::NotFound(format!("peer '{}'", name)))?;

        let mut next = state.clone();
        let peer = next.peers.remove(index);
        next.ip_assignments.retain(|a| a.name != name);
        self.commit(&mut state, next)?;
        Ok(peer)
    }

    pub fn find_by_name(&self, name: &str) -> Option<Peer> {
        self.state.read().peers.iter().find(|p| p.name == name).cloned()
    }

    /// All peers in insertion order
    pub fn list_all(&self) -> Vec<Peer> {
        self.state.read().peers.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().peers.is_empty()
    }

    /// Allocation records ordered by address
    pub fn allocations(&self) -> Vec<IpAllocation> {
        let mut allocations = self.state.read().ip_assignments.clone();
        allocations.sort_by_key(|a| u32::from(a.ip));
        allocations
    }

    /// Lowest free host address in the active subnet
    ///
    /// Free means neither the server address nor present in the allocation
    /// index. Nothing is reserved; the caller inserts the peer.
    pub fn allocate_next_ip(&self) -> Result<Ipv4Addr> {
        let state = self.state.read();
        let allocated = state.allocated();
        state
            .subnet
            .assignable_hosts()
            .find(|ip| !allocated.contains(&u32::from(*ip)))
            .ok_or_else(|| Error::SubnetExhausted(state.subnet.to_string()))
    }

    /// Move peers to new addresses in a single commit
    ///
    /// Peers absent from `mapping` keep their address. Fails without
    /// touching the store if a name is unknown or two peers would collide.
    pub fn rewrite_all_ips(&self, mapping: &HashMap<String, Ipv4Addr>) -> Result<()> {
        let mut state = self.state.write();

        for name in mapping.keys() {
            if !state.peers.iter().any(|p| &p.name == name) {
                return Err(Error::NotFound(format!("peer '{}'", name)));
            }
        }

        let mut next = state.clone();
        for peer in next.peers.iter_mut() {
            if let Some(ip) = mapping.get(&peer.name) {
                peer.ip = *ip;
            }
        }
        for allocation in next.ip_assignments.iter_mut() {
            if let Some(ip) = mapping.get(&allocation.name) {
                allocation.ip = *ip;
            }
        }

        let mut seen = HashSet::new();
        for peer in &next.peers {
            if !seen.insert(peer.ip) {
                return Err(Error::DuplicateIp(peer.ip.to_string()));
            }
        }

        self.commit(&mut state, next)?;
        info!(peers = mapping.len(), "Rewrote peer addresses");
        Ok(())
    }

    /// Record the subnet used by `allocate_next_ip`
    pub fn update_active_subnet(&self, subnet: Subnet) -> Result<()> {
        let mut state = self.state.write();
        let mut next = state.clone();
        next.subnet = subnet;
        self.commit(&mut state, next)?;
        info!(subnet = %subnet, "Updated active subnet");
        Ok(())
    }
}
