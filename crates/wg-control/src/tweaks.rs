//! Tweak registry
//!
//! A closed set of boolean runtime flags persisted under `tweaks.<name>` in
//! the main configuration document.

use crate::config::ServerDocument;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Restart the service instead of live-updating peers
pub const RESTART_SERVICE_AFTER_PEER_CHANGE: &str = "restart_service_after_peer_change";

struct TweakDefinition {
    name: &'static str,
    default: bool,
    description: &'static str,
}

const TWEAKS: &[TweakDefinition] = &[TweakDefinition {
    name: RESTART_SERVICE_AFTER_PEER_CHANGE,
    default: false,
    description: "Restart WireGuard service after adding & removing peers (causes connection drops)",
}];

fn definition(name: &str) -> Result<&'static TweakDefinition> {
    TWEAKS
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::UnknownTweak(name.to_string()))
}

/// Effective value of a tweak in `document`, falling back to its default
pub fn tweak_value(document: &ServerDocument, name: &str) -> Result<bool> {
    let def = definition(name)?;
    Ok(document.tweak(name).unwrap_or(def.default))
}

/// Runtime side effect applied after a tweak is written
#[async_trait]
pub trait TweakHook: Send + Sync {
    async fn apply(&self, name: &str, value: bool) -> Result<()>;
}

/// Current state of one tweak
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TweakInfo {
    pub name: String,
    pub value: bool,
    pub default: bool,
    pub description: String,
}

/// Result of writing a tweak
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TweakChange {
    pub name: String,
    pub old_value: bool,
    pub new_value: bool,
    /// Set when the runtime hook failed; the new value is persisted anyway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_error: Option<String>,
}

/// Reads and writes the closed set of tweaks
pub struct TweakRegistry {
    document_path: PathBuf,
    hooks: HashMap<&'static str, Arc<dyn TweakHook>>,
}

impl TweakRegistry {
    pub fn new(document_path: impl Into<PathBuf>) -> Self {
        Self {
            document_path: document_path.into(),
            hooks: HashMap::new(),
        }
    }

    /// Register the runtime side effect for `name`
    pub fn with_hook(mut self, name: &str, hook: Arc<dyn TweakHook>) -> Result<Self> {
        let def = definition(name)?;
        self.hooks.insert(def.name, hook);
        Ok(self)
    }

    fn info(document: &ServerDocument, def: &TweakDefinition) -> TweakInfo {
        TweakInfo {
            name: def.name.to_string(),
            value: document.tweak(def.name).unwrap_or(def.default),
            default: def.default,
            description: def.description.to_string(),
        }
    }

    /// Every tweak with its current value
    pub fn list(&self) -> Result<Vec<TweakInfo>> {
        let document = ServerDocument::load_or_default(&self.document_path)?;
        Ok(TWEAKS.iter().map(|def| Self::info(&document, def)).collect())
    }

    pub fn get(&self, name: &str) -> Result<TweakInfo> {
        let def = definition(name)?;
        let document = ServerDocument::load_or_default(&self.document_path)?;
        Ok(Self::info(&document, def))
    }

    /// Persist a new value, then run the tweak's hook
    ///
    /// A failing hook is logged and reported in the result; the persisted
    /// value stands.
    #[instrument(skip(self))]
    pub async fn set(&self, name: &str, value: bool) -> Result<TweakChange> {
        let def = definition(name)?;
        let mut document = ServerDocument::load_or_default(&self.document_path)?;
        let old_value = document.tweak(def.name).unwrap_or(def.default);

        document.set_tweak(def.name, value);
        document.save(&self.document_path)?;
        info!(old_value, new_value = value, "Tweak updated");

        let hook_error = match self.hooks.get(def.name) {
            Some(hook) => match hook.apply(def.name, value).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(error = %e, "Tweak runtime hook failed");
                    Some(e.to_string())
                }
            },
            None => None,
        };

        Ok(TweakChange {
            name: def.name.to_string(),
            old_value,
            new_value: value,
            hook_error,
        })
    }
}
