//! Key generation through `wg`
//!
//! Keys are produced by the WireGuard tools and treated as opaque base64
//! strings. A key that is not exactly 44 characters is rejected.

use super::tool::WgTool;
use crate::defaults::KEY_LENGTH;
use crate::{Error, Result};
use std::fmt;
use tracing::{debug, instrument};

/// The three keys a new peer needs
#[derive(Clone, PartialEq, Eq)]
pub struct PeerKeys {
    pub private_key: String,
    pub public_key: String,
    pub preshared_key: String,
}

impl fmt::Debug for PeerKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerKeys")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .field("preshared_key", &"[REDACTED]")
            .finish()
    }
}

/// Generates WireGuard keys
#[derive(Clone)]
pub struct KeyGenerator {
    tool: WgTool,
}

impl KeyGenerator {
    pub fn new(tool: WgTool) -> Self {
        Self { tool }
    }

    fn check(kind: &str, result: Result<String>) -> Result<String> {
        let key = result.map_err(|e| Error::KeyGenerationFailed(format!("{}: {}", kind, e)))?;
        if key.len() != KEY_LENGTH {
            return Err(Error::KeyGenerationFailed(format!(
                "{}: expected {} characters, got {}",
                kind,
                KEY_LENGTH,
                key.len()
            )));
        }
        Ok(key)
    }

    /// Generate a private key
    pub async fn private_key(&self) -> Result<String> {
        Self::check("private key", self.tool.genkey().await)
    }

    /// Derive the public key for `private_key`
    pub async fn public_key(&self, private_key: &str) -> Result<String> {
        Self::check("public key", self.tool.pubkey(private_key).await)
    }

    /// Generate a preshared key
    pub async fn preshared_key(&self) -> Result<String> {
        Self::check("preshared key", self.tool.genpsk().await)
    }

    /// Generate a complete key set for a new peer
    #[instrument(skip(self))]
    pub async fn peer_keys(&self) -> Result<PeerKeys> {
        let private_key = self.private_key().await?;
        let public_key = self.public_key(&private_key).await?;
        let preshared_key = self.preshared_key().await?;
        debug!(public_key = %public_key, "Generated peer keys");
        Ok(PeerKeys {
            private_key,
            public_key,
            preshared_key,
        })
    }
}
