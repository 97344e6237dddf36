//! Load-time configuration
//!
//! Everything here ends up in the eBPF object's globals before it is loaded:
//! the packet filter, the category mask and the kernel structure layout.

use crate::types::kernel::{constants::*, KernelLayout, PacketFilter};
use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default bpffs directory the in-flight map is pinned in
pub const DEFAULT_PIN_PATH: &str = "/sys/fs/bpf/ovs-trace";

/// Kernel layout overrides, as read from a JSON file
///
/// Fields left out keep their default offset.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LayoutOverride {
    pub flow_key_recirc_id: Option<u32>,
    pub upcall_portid: Option<u32>,
    pub upcall_cmd: Option<u32>,
    pub skb_len: Option<u32>,
    pub skb_data_len: Option<u32>,
    pub skb_protocol: Option<u32>,
    pub skb_data: Option<u32>,
}

impl LayoutOverride {
    /// Apply the overrides on top of `base`
    pub fn apply(&self, base: KernelLayout) -> KernelLayout {
        KernelLayout {
            flow_key_recirc_id: self.flow_key_recirc_id.unwrap_or(base.flow_key_recirc_id),
            upcall_portid: self.upcall_portid.unwrap_or(base.upcall_portid),
            upcall_cmd: self.upcall_cmd.unwrap_or(base.upcall_cmd),
            skb_len: self.skb_len.unwrap_or(base.skb_len),
            skb_data_len: self.skb_data_len.unwrap_or(base.skb_data_len),
            skb_protocol: self.skb_protocol.unwrap_or(base.skb_protocol),
            skb_data: self.skb_data.unwrap_or(base.skb_data),
            _padding: 0,
        }
    }
}

/// Parse a JSON layout override
pub fn parse_layout(json: &str) -> Result<KernelLayout> {
    let overrides: LayoutOverride =
        serde_json::from_str(json).context("Invalid kernel layout description")?;
    Ok(overrides.apply(KernelLayout::DEFAULT))
}

/// Kernel layout from an optional JSON file, defaults otherwise
pub fn load_layout(path: Option<&Path>) -> Result<KernelLayout> {
    let Some(path) = path else {
        return Ok(KernelLayout::DEFAULT);
    };

    info!("Loading kernel layout from: {:?}", path);
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read kernel layout file: {:?}", path))?;
    parse_layout(&json)
}

/// Parse an ethertype given as hex (`0x0800`), decimal, or by name
pub fn parse_ethertype(value: &str) -> Result<u16, String> {
    let value = value.trim().to_lowercase();
    let parsed = match value.as_str() {
        "ipv4" | "ip" => Ok(0x0800),
        "arp" => Ok(0x0806),
        "ipv6" => Ok(0x86dd),
        "vlan" => Ok(0x8100),
        "mpls" => Ok(0x8847),
        hex if hex.starts_with("0x") => u16::from_str_radix(&hex[2..], 16),
        dec => dec.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid ethertype '{}': {}", value, e))
}

/// Coarse predicate for actions not linked to a userspace command
///
/// `all_actions` takes precedence over an ethertype.
pub fn packet_filter(all_actions: bool, ethertype: Option<u16>) -> PacketFilter {
    match (all_actions, ethertype) {
        (true, _) => PacketFilter::ALL,
        (false, Some(ethertype)) => PacketFilter::for_ethertype(ethertype),
        (false, None) => PacketFilter::TRACKED_ONLY,
    }
}

/// Bitmask of enabled section owners
pub fn category_mask(disable_common: bool) -> u64 {
    if disable_common {
        ALL_CATEGORIES & !(1u64 << OWNER_COMMON)
    } else {
        ALL_CATEGORIES
    }
}

/// Values written into the eBPF object before loading
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub filter: PacketFilter,
    pub categories: u64,
    pub layout: KernelLayout,
    /// bpffs directory for pinned maps
    pub pin_path: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            filter: PacketFilter::TRACKED_ONLY,
            categories: ALL_CATEGORIES,
            layout: KernelLayout::DEFAULT,
            pin_path: PathBuf::from(DEFAULT_PIN_PATH),
        }
    }
}
