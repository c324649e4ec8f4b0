//! Error types for the peer and subnet control plane

use std::path::PathBuf;
use thiserror::Error;

/// Result type for control plane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Control plane errors
///
/// Each component raises its own kind. Only the peer manager and the subnet
/// migrator translate one kind into another.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Peer errors
    #[error("Invalid peer name: {0}")]
    InvalidName(String),

    #[error("Peer already exists: {0}")]
    DuplicateName(String),

    #[error("IP {0} is already assigned")]
    DuplicateIp(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Addressing errors
    #[error("No available IP addresses in subnet {0}")]
    SubnetExhausted(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Invalid subnet: {0}")]
    InvalidSubnet(String),

    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    // WireGuard errors
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Interface sync failed: {0}")]
    InterfaceSyncFailed(String),

    #[error("Service restart failed: {0}")]
    ServiceRestartFailed(String),

    // Migration errors
    #[error("Subnet migration failed and was rolled back (backup {backup_id}): {reason}")]
    MigrationFailed { backup_id: String, reason: String },

    #[error("Rollback failed, manual restore required from {}: {reason}", backup_path.display())]
    RollbackFailed { backup_path: PathBuf, reason: String },

    // Tweak errors
    #[error("Unknown tweak: {0}")]
    UnknownTweak(String),

    // Infrastructure errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command failed: {0}")]
    Command(String),
}

impl Error {
    /// Stable machine-readable code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidName(_) => "INVALID_NAME",
            Error::DuplicateName(_) => "DUPLICATE_NAME",
            Error::DuplicateIp(_) => "DUPLICATE_IP",
            Error::NotFound(_) => "NOT_FOUND",
            Error::SubnetExhausted(_) => "SUBNET_EXHAUSTED",
            Error::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            Error::InvalidSubnet(_) => "INVALID_SUBNET",
            Error::ConfirmationRequired(_) => "CONFIRMATION_REQUIRED",
            Error::KeyGenerationFailed(_) => "KEY_GENERATION_FAILED",
            Error::InterfaceSyncFailed(_) => "INTERFACE_SYNC_FAILED",
            Error::ServiceRestartFailed(_) => "SERVICE_RESTART_FAILED",
            Error::MigrationFailed { .. } => "MIGRATION_FAILED",
            Error::RollbackFailed { .. } => "ROLLBACK_FAILED",
            Error::UnknownTweak(_) => "UNKNOWN_TWEAK",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Command(_) => "COMMAND_FAILED",
        }
    }
}

impl From<ipnet::AddrParseError> for Error {
    fn from(e: ipnet::AddrParseError) -> Self {
        Error::InvalidSubnet(e.to_string())
    }
}

impl From<ipnet::PrefixLenError> for Error {
    fn from(e: ipnet::PrefixLenError) -> Self {
        Error::InvalidSubnet(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
