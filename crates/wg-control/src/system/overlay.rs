//! Overlay mode flags that block a subnet change

use crate::config::ServerDocument;
use serde_json::Value;
use std::path::PathBuf;

/// Read-only view of the Ghost and Multihop overlays
#[derive(Debug, Clone)]
pub struct OverlayState {
    ghost_state_file: PathBuf,
}

impl OverlayState {
    pub fn new(ghost_state_file: impl Into<PathBuf>) -> Self {
        Self {
            ghost_state_file: ghost_state_file.into(),
        }
    }

    /// Ghost mode is active when its state file holds `{"enabled": true}`
    pub fn ghost_active(&self) -> bool {
        std::fs::read_to_string(&self.ghost_state_file)
            .ok()
            .and_then(|content| serde_json::from_str::<Value>(&content).ok())
            .and_then(|state| state.get("enabled").and_then(Value::as_bool))
            .unwrap_or(false)
    }

    /// Multihop is active when the main document says so
    pub fn multihop_active(&self, document: &ServerDocument) -> bool {
        document.multihop_enabled()
    }
}
