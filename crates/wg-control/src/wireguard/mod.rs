//! WireGuard tooling
//!
//! - **Tool**: `wg` / `wg-quick` command wrappers
//! - **Keys**: key generation through the tool
//! - **Render**: client config and server stanza text
//! - **ServerFile**: the server's interface config file
//! - **Probe**: `wg show` parsing and connection liveness
//! - **Sync**: kernel and file projection with restart fallback

mod keys;
pub mod probe;
mod render;
pub mod server_file;
mod sync;
mod tool;

pub use keys::{KeyGenerator, PeerKeys};
pub use probe::{Connection, ConnectionProbe, Transfer, WgInterface, WgPeer, WgShow};
pub use render::{ClientSettings, ConfigRenderer};
pub use server_file::{InterfaceFile, PeerSection};
pub use sync::{InterfaceSync, ReconcileReport, SyncStrategy};
pub use tool::WgTool;
