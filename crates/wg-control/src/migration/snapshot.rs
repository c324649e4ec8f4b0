//! Pre-migration snapshots
//!
//! A snapshot is a directory under the backup root holding copies of every
//! file a subnet change touches, the captured firewall rules and a metadata
//! file. It is the only source used by rollback.

use crate::fsutil::{write_atomic, SECRET_FILE_MODE};
use crate::models::Subnet;
use crate::system::FirewallCapture;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DOCUMENT_BACKUP: &str = "config.json";
const STORE_BACKUP: &str = "peers.json";
const FIREWALL_BACKUP: &str = "firewall_rules.json";
const METADATA_FILE: &str = "backup_metadata.json";

/// Live files captured by a snapshot
#[derive(Debug, Clone)]
pub struct SnapshotSources {
    pub interface_config: PathBuf,
    pub config_document: PathBuf,
    pub peer_store: PathBuf,
}

/// Copies held in the snapshot; `None` when the live file did not exist
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPaths {
    pub interface_config: Option<PathBuf>,
    pub config_document: Option<PathBuf>,
    pub peer_store: Option<PathBuf>,
    pub firewall_rules: PathBuf,
}

/// Contents of `backup_metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub original_subnet: Subnet,
    pub paths: SnapshotPaths,
}

/// A completed snapshot on disk
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    pub path: PathBuf,
    pub metadata: SnapshotMetadata,
}

/// `subnet_change_<unix seconds>`
pub fn snapshot_id(now: DateTime<Utc>) -> String {
    format!("subnet_change_{}", now.timestamp())
}

/// Pick a directory name under `root` that is not taken yet
fn unused_id(root: &Path, base: &str) -> String {
    let mut id = base.to_string();
    let mut n = 1;
    while root.join(&id).exists() {
        id = format!("{}_{}", base, n);
        n += 1;
    }
    id
}

fn copy_into(source: &Path, dest: &Path) -> Result<Option<PathBuf>> {
    if !source.exists() {
        return Ok(None);
    }
    std::fs::copy(source, dest).map_err(|e| {
        Error::Storage(format!(
            "Failed to copy {} to {}: {}",
            source.display(),
            dest.display(),
            e
        ))
    })?;
    Ok(Some(dest.to_path_buf()))
}

impl Snapshot {
    /// Capture `sources` and `firewall` under `root`
    ///
    /// On failure the partial directory is removed.
    pub fn create(
        root: &Path,
        now: DateTime<Utc>,
        sources: &SnapshotSources,
        original_subnet: Subnet,
        firewall: &FirewallCapture,
    ) -> Result<Self> {
        std::fs::create_dir_all(root)
            .map_err(|e| Error::Storage(format!("Failed to create {}: {}", root.display(), e)))?;
        let id = unused_id(root, &snapshot_id(now));
        let path = root.join(&id);

        match Self::write(&path, &id, now, sources, original_subnet, firewall) {
            Ok(metadata) => {
                info!(id = %id, path = %path.display(), "Created migration snapshot");
                Ok(Self { id, path, metadata })
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %cleanup, "Failed to remove partial snapshot");
                }
                Err(e)
            }
        }
    }

    fn write(
        path: &Path,
        id: &str,
        now: DateTime<Utc>,
        sources: &SnapshotSources,
        original_subnet: Subnet,
        firewall: &FirewallCapture,
    ) -> Result<SnapshotMetadata> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create {}: {}", path.display(), e)))?;

        let interface_name = sources
            .interface_config
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "interface.conf".into());

        let paths = SnapshotPaths {
            interface_config: copy_into(&sources.interface_config, &path.join(interface_name))?,
            config_document: copy_into(&sources.config_document, &path.join(DOCUMENT_BACKUP))?,
            peer_store: copy_into(&sources.peer_store, &path.join(STORE_BACKUP))?,
            firewall_rules: path.join(FIREWALL_BACKUP),
        };
        write_atomic(
            &paths.firewall_rules,
            &serde_json::to_vec_pretty(firewall)?,
            None,
        )?;

        let metadata = SnapshotMetadata {
            id: id.to_string(),
            timestamp: now,
            original_subnet,
            paths,
        };
        write_atomic(
            &path.join(METADATA_FILE),
            &serde_json::to_vec_pretty(&metadata)?,
            None,
        )?;
        Ok(metadata)
    }

    /// Put every captured file back in place
    ///
    /// A live file that did not exist when the snapshot was taken is removed.
    pub fn restore(&self, sources: &SnapshotSources) -> Result<()> {
        let paths = &self.metadata.paths;
        restore_file(paths.interface_config.as_deref(), &sources.interface_config, Some(SECRET_FILE_MODE))?;
        restore_file(paths.config_document.as_deref(), &sources.config_document, None)?;
        restore_file(paths.peer_store.as_deref(), &sources.peer_store, Some(SECRET_FILE_MODE))?;
        info!(id = %self.id, "Restored files from snapshot");
        Ok(())
    }
}

fn restore_file(backup: Option<&Path>, live: &Path, mode: Option<u32>) -> Result<()> {
    match backup {
        Some(backup) => {
            let content = std::fs::read(backup).map_err(|e| {
                Error::Storage(format!("Failed to read backup {}: {}", backup.display(), e))
            })?;
            write_atomic(live, &content, mode)
        }
        None if live.exists() => std::fs::remove_file(live)
            .map_err(|e| Error::Storage(format!("Failed to remove {}: {}", live.display(), e))),
        None => Ok(()),
    }
}
