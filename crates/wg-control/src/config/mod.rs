//! Configuration
//!
//! - **Settings**: control-plane settings (paths, timeouts, delays), TOML
//! - **Document**: the server's main configuration document, JSON

mod document;
mod settings;

pub use document::ServerDocument;
pub use settings::{DelaySettings, Settings, TimeoutSettings};
