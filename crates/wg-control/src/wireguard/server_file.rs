//! The server's interface configuration file
//!
//! WireGuard's INI-like format as consumed by `wg-quick`: one `[Interface]`
//! section followed by `[Peer]` sections. Comments on section lines are
//! preserved. Every write replaces the file atomically with mode 0600.

use super::render::ConfigRenderer;
use crate::fsutil::{write_atomic, SECRET_FILE_MODE};
use crate::models::Peer;
use crate::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

fn section_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\[(Interface|Peer)]").expect("static pattern compiles"))
}

fn key_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\w+)\s*=\s*(.+)$").expect("static pattern compiles"))
}

/// A `[Peer]` section as found in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSection {
    /// Comment after the section header, usually the peer name
    pub comment: Option<String>,
    pub public_key: Option<String>,
    pub allowed_ips: Vec<String>,
}

/// Split text into sections, each starting at a line that begins with `[`.
/// Lines before the first header form their own leading section.
fn split_sections(content: &str) -> Vec<Vec<&str>> {
    let mut sections: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in content.lines() {
        if line.trim_start().starts_with('[') && !current.is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push(line);
    }
    if !current.is_empty() {
        sections.push(current);
    }
    sections
}

/// Join sections with exactly one blank line between them
fn join_sections(sections: &[Vec<&str>]) -> String {
    let blocks: Vec<String> = sections
        .iter()
        .map(|section| {
            let mut lines = section.as_slice();
            while let Some((last, rest)) = lines.split_last() {
                if last.trim().is_empty() {
                    lines = rest;
                } else {
                    break;
                }
            }
            lines.join("\n")
        })
        .filter(|block| !block.is_empty())
        .collect();
    if blocks.is_empty() {
        String::new()
    } else {
        format!("{}\n", blocks.join("\n\n"))
    }
}

fn is_peer_header(line: &str) -> bool {
    line.trim_start().starts_with("[Peer")
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let caps = key_value_pattern().captures(line.trim())?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str().trim()))
}

fn allowed_ip_entries(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Parse every `[Peer]` section in `content`
pub fn peer_sections(content: &str) -> Vec<PeerSection> {
    split_sections(content)
        .into_iter()
        .filter(|section| section.first().is_some_and(|l| is_peer_header(l)))
        .map(|section| {
            let comment = section[0]
                .split_once('#')
                .map(|(_, c)| c.trim().to_string())
                .filter(|c| !c.is_empty());
            let mut parsed = PeerSection {
                comment,
                public_key: None,
                allowed_ips: Vec::new(),
            };
            for line in &section[1..] {
                match key_value(line) {
                    Some(("PublicKey", value)) => parsed.public_key = Some(value.to_string()),
                    Some(("AllowedIPs", value)) => parsed.allowed_ips = allowed_ip_entries(value),
                    _ => {}
                }
            }
            parsed
        })
        .collect()
}

/// `Address` value of the `[Interface]` section
pub fn interface_address(content: &str) -> Option<String> {
    let mut in_interface = false;
    for line in content.lines() {
        if let Some(caps) = section_pattern().captures(line.trim()) {
            in_interface = &caps[1] == "Interface";
            continue;
        }
        if in_interface {
            if let Some(("Address", value)) = key_value(line) {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Drop the `[Peer]` section whose AllowedIPs holds `{ip}/32`
///
/// Returns the new text, or `None` if no section matched.
pub fn without_peer(content: &str, ip: Ipv4Addr) -> Option<String> {
    let target = format!("{}/32", ip);
    let sections = split_sections(content);
    let before = sections.len();
    let kept: Vec<Vec<&str>> = sections
        .into_iter()
        .filter(|section| {
            let is_target = section.first().is_some_and(|l| is_peer_header(l))
                && section.iter().any(|line| {
                    matches!(key_value(line), Some(("AllowedIPs", value))
                        if allowed_ip_entries(value).iter().any(|e| *e == target))
                });
            !is_target
        })
        .collect();
    if kept.len() == before {
        return None;
    }
    Some(join_sections(&kept))
}

/// Rewrite addresses for a subnet change
///
/// Under `[Interface]`, `Address` becomes `{server_ip}/{prefix}`. Under
/// `[Peer]`, each AllowedIPs entry whose address is in `mapping` is moved
/// to the mapped address with its prefix kept. All other lines are copied
/// verbatim.
pub fn remap_addresses(
    content: &str,
    mapping: &HashMap<Ipv4Addr, Ipv4Addr>,
    server_ip: Ipv4Addr,
    prefix: u8,
) -> String {
    let mut out = String::with_capacity(content.len());
    let mut section: Option<String> = None;

    for line in content.split_inclusive('\n') {
        let stripped = line.trim();
        if let Some(caps) = section_pattern().captures(stripped) {
            section = Some(caps[1].to_string());
            out.push_str(line);
            continue;
        }

        match (section.as_deref(), key_value(stripped)) {
            (Some("Interface"), Some((key @ "Address", _))) => {
                out.push_str(&format!("{} = {}/{}\n", key, server_ip, prefix));
            }
            (Some("Peer"), Some((key @ "AllowedIPs", value))) => {
                let entries: Vec<String> = allowed_ip_entries(value)
                    .into_iter()
                    .map(|entry| {
                        let (addr, cidr) = entry.split_once('/').unwrap_or((entry.as_str(), "32"));
                        match addr.parse::<Ipv4Addr>().ok().and_then(|a| mapping.get(&a)) {
                            Some(new_ip) => format!("{}/{}", new_ip, cidr),
                            None => entry.clone(),
                        }
                    })
                    .collect();
                out.push_str(&format!("{} = {}\n", key, entries.join(", ")));
            }
            _ => out.push_str(line),
        }
    }
    out
}

/// Replace every `[Peer]` section with stanzas for `peers`, keeping the rest
pub fn with_peers(content: &str, peers: &[Peer]) -> String {
    let stanzas: Vec<String> = peers.iter().map(ConfigRenderer::server_stanza).collect();
    let mut sections: Vec<Vec<&str>> = split_sections(content)
        .into_iter()
        .filter(|section| !section.first().is_some_and(|l| is_peer_header(l)))
        .collect();
    for stanza in &stanzas {
        sections.push(stanza.lines().collect());
    }
    join_sections(&sections)
}

/// Handle on the interface configuration file
#[derive(Debug, Clone)]
pub struct InterfaceFile {
    path: PathBuf,
}

impl InterfaceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Current contents; empty when the file does not exist
    pub fn read(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    pub fn write(&self, content: &str) -> Result<()> {
        write_atomic(&self.path, content.as_bytes(), Some(SECRET_FILE_MODE))
    }

    /// Append the stanza for `peer`, separated by a blank line
    pub fn append_peer(&self, peer: &Peer) -> Result<()> {
        let mut content = self.read()?;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push('\n');
        content.push_str(&ConfigRenderer::server_stanza(peer));
        self.write(&content)?;
        debug!(peer = %peer.name, path = %self.path.display(), "Appended peer stanza");
        Ok(())
    }

    /// Remove the stanza for the peer at `ip`; false if none matched
    pub fn remove_peer(&self, ip: Ipv4Addr) -> Result<bool> {
        if !self.exists() {
            return Ok(false);
        }
        let content = self.read()?;
        match without_peer(&content, ip) {
            Some(updated) => {
                self.write(&updated)?;
                debug!(ip = %ip, path = %self.path.display(), "Removed peer stanza");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply [`remap_addresses`] to the file
    pub fn remap_addresses(
        &self,
        mapping: &HashMap<Ipv4Addr, Ipv4Addr>,
        server_ip: Ipv4Addr,
        prefix: u8,
    ) -> Result<()> {
        if !self.exists() {
            return Err(Error::Storage(format!(
                "Interface config {} not found",
                self.path.display()
            )));
        }
        let content = self.read()?;
        self.write(&remap_addresses(&content, mapping, server_ip, prefix))
    }

    /// Make the file's peer sections exactly `peers`
    pub fn sync_peers(&self, peers: &[Peer]) -> Result<()> {
        let content = self.read()?;
        self.write(&with_peers(&content, peers))
    }

    pub fn peers(&self) -> Result<Vec<PeerSection>> {
        Ok(peer_sections(&self.read()?))
    }

    pub fn address(&self) -> Result<Option<String>> {
        Ok(interface_address(&self.read()?))
    }
}
