//! Subnet migration
//!
//! Moves every peer, the server address, the recorded subnet and the
//! firewall rules to a new subnet in one step.
//!
//! # Flow
//!
//! 1. **Analyze**: current addressing, overlay blockers, live connections
//! 2. **Validate**: size, RFC 1918, capacity, blockers, host conflicts
//! 3. **Snapshot**: copy every touched file and the firewall rules
//! 4. **Apply**: stop, rewrite store and interface config, update document
//!    and firewall, start, verify
//! 5. **Rollback**: on any failure in step 4, restore the snapshot and
//!    start the service again
//!
//! # Components
//!
//! - **Planner**: pure checks and the address mapping
//! - **Snapshot**: on-disk backup and restore
//! - **Executor**: [`SubnetMigrator`] driving the host

mod executor;
mod planner;
mod snapshot;

pub use executor::{MigrationOutcome, MigrationStep, SubnetMigrator};
pub use planner::{
    Blockers, CheckResult, IpMapping, PeerAddress, PeerMove, SubnetAnalysis, SubnetValidation,
    ValidationChecks,
};
pub use snapshot::{snapshot_id, Snapshot, SnapshotMetadata, SnapshotPaths, SnapshotSources};
