//! Kernel capability detection
//!
//! Decides, once at startup, whether the probes can use `bpf_get_func_ip`
//! and where the traced tracepoint lives in the kernel's address space.

use anyhow::{Context, Result};
use aya::util::{kernel_symbols, KernelVersion};
use log::{debug, info, warn};
use std::{collections::BTreeMap, path::Path};

const VMLINUX_BTF: &str = "/sys/kernel/btf/vmlinux";

/// Name the helper appears under in `enum bpf_func_id`
const FUNC_IP_HELPER: &[u8] = b"BPF_FUNC_get_func_ip";

/// Symbol of the action tracepoint
pub const EXEC_TRACEPOINT_SYMBOL: &str = "__tracepoint_ovs_do_execute_action";

/// Capabilities of the running kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelFeatures {
    /// `bpf_get_func_ip` is available to kprobes
    pub has_func_ip: bool,
    /// Address of the action tracepoint, 0 if unknown
    pub exec_tp_symbol: u64,
}

impl KernelFeatures {
    /// Detect the running kernel's capabilities
    pub fn detect() -> Result<Self> {
        let has_func_ip = detect_func_ip()?;
        let exec_tp_symbol = match kernel_symbols() {
            Ok(symbols) => lookup_symbol(&symbols, EXEC_TRACEPOINT_SYMBOL).unwrap_or_else(|| {
                warn!(
                    "{} not found in kernel symbols, is the openvswitch module loaded?",
                    EXEC_TRACEPOINT_SYMBOL
                );
                0
            }),
            Err(e) => {
                warn!("Failed to read kernel symbols: {}", e);
                0
            }
        };

        let features = Self {
            has_func_ip,
            exec_tp_symbol,
        };
        info!(
            "Kernel features: bpf_get_func_ip={}, tracepoint symbol={:#x}",
            features.has_func_ip, features.exec_tp_symbol
        );
        Ok(features)
    }
}

fn detect_func_ip() -> Result<bool> {
    if Path::new(VMLINUX_BTF).exists() {
        let btf = std::fs::read(VMLINUX_BTF)
            .with_context(|| format!("Failed to read {}", VMLINUX_BTF))?;
        return Ok(btf_has_func_ip(&btf));
    }

    debug!("{} not available, falling back to the kernel version", VMLINUX_BTF);
    match KernelVersion::current() {
        Ok(version) => Ok(version_has_func_ip(version)),
        Err(e) => {
            warn!("Failed to read the kernel version, assuming no bpf_get_func_ip: {}", e);
            Ok(false)
        }
    }
}

/// Whether a BTF blob knows the `bpf_get_func_ip` helper
pub fn btf_has_func_ip(btf: &[u8]) -> bool {
    btf.windows(FUNC_IP_HELPER.len()).any(|w| w == FUNC_IP_HELPER)
}

/// Whether a kernel version is recent enough for `bpf_get_func_ip`,
/// which shipped for kprobes in 5.15
pub fn version_has_func_ip(version: KernelVersion) -> bool {
    version >= KernelVersion::new(5, 15, 0)
}

/// Find a symbol's address in the kernel symbol table
///
/// Module symbols carry a tab-separated `[module]` suffix. Addresses read as
/// 0 when kptr_restrict hides them; those count as not found.
pub fn lookup_symbol(symbols: &BTreeMap<u64, String>, name: &str) -> Option<u64> {
    symbols
        .iter()
        .find(|(_, symbol)| symbol.split('\t').next() == Some(name))
        .map(|(addr, _)| *addr)
        .filter(|addr| *addr != 0)
}
