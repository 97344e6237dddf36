//! eBPF program loader
//!
//! Handles patching the load-time globals, loading the eBPF object and
//! attaching the kprobes and the raw tracepoint.

use crate::{config::RuntimeConfig, features::KernelFeatures, types::kernel::constants::MAX_STATS};
use anyhow::{Context, Result};
use aya::{
    maps::{perf::AsyncPerfEventArray, MapData, PerCpuArray},
    programs::{KProbe, RawTracePoint},
    Bpf, BpfLoader,
};
use log::info;
use std::path::PathBuf;

/// eBPF program loader and manager
pub struct ProbeLoader {
    ebpf: Bpf,
}

impl ProbeLoader {
    /// Load eBPF program from file or embedded bytecode
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to eBPF object file. If None, uses embedded bytecode.
    /// * `config` - Values for the load-time globals
    /// * `features` - Detected kernel capabilities
    pub fn load(path: Option<PathBuf>, config: &RuntimeConfig, features: &KernelFeatures) -> Result<Self> {
        info!("Loading eBPF program...");

        let data = match path {
            Some(obj_path) => {
                info!("Loading eBPF object from: {:?}", obj_path);
                std::fs::read(&obj_path)
                    .with_context(|| format!("Failed to read eBPF object file: {:?}", obj_path))?
            }
            None => embedded_object()?,
        };

        std::fs::create_dir_all(&config.pin_path)
            .with_context(|| format!("Failed to create pin directory: {:?}", config.pin_path))?;

        // Globals are borrowed by the loader until `load` returns.
        let has_func_ip = features.has_func_ip as u8;
        let exec_tp_symbol = features.exec_tp_symbol;
        let ebpf = BpfLoader::new()
            .set_global("HAS_FUNC_IP", &has_func_ip, true)
            .set_global("CATEGORIES", &config.categories, true)
            .set_global("PACKET_FILTER", &config.filter, true)
            .set_global("LAYOUT", &config.layout, true)
            .set_global("EXEC_TP_SYMBOL", &exec_tp_symbol, true)
            .map_pin_path(&config.pin_path)
            .load(&data)
            .context("Failed to load eBPF program")?;

        info!("eBPF program loaded successfully");
        info!("  In-flight map pinned under {:?}", config.pin_path);

        Ok(Self { ebpf })
    }

    fn attach_kprobe(&mut self, program: &str, function: &str) -> Result<()> {
        let kprobe: &mut KProbe = self
            .ebpf
            .program_mut(program)
            .with_context(|| format!("{} program not found in eBPF object", program))?
            .try_into()
            .with_context(|| format!("Failed to get {} as KProbe", program))?;
        kprobe
            .load()
            .with_context(|| format!("Failed to load {}", program))?;
        kprobe
            .attach(function, 0)
            .with_context(|| format!("Failed to attach {} to {}", program, function))?;
        Ok(())
    }

    /// Attach the upcall probes
    ///
    /// Attaches to:
    /// - queue_userspace_packet (entry and return)
    pub fn attach_upcall_probes(&mut self) -> Result<()> {
        info!("Attaching kprobes for upcall tracking...");

        self.attach_kprobe("queue_userspace_packet", "queue_userspace_packet")?;
        info!("  ✓ Attached to queue_userspace_packet");

        self.attach_kprobe("queue_userspace_packet_ret", "queue_userspace_packet")?;
        info!("  ✓ Attached to queue_userspace_packet (return)");

        Ok(())
    }

    /// Attach the action tracepoint
    ///
    /// Attaches to:
    /// - ovs_do_execute_action (raw tracepoint)
    pub fn attach_action_tracepoint(&mut self) -> Result<()> {
        info!("Attaching action tracepoint...");

        let program: &mut RawTracePoint = self
            .ebpf
            .program_mut("ovs_do_execute_action")
            .context("ovs_do_execute_action program not found in eBPF object")?
            .try_into()
            .context("Failed to get ovs_do_execute_action as RawTracePoint")?;
        program.load().context("Failed to load ovs_do_execute_action")?;
        program
            .attach("ovs_do_execute_action")
            .context("Failed to attach ovs_do_execute_action, is the openvswitch module loaded?")?;
        info!("  ✓ Attached to ovs_do_execute_action tracepoint");

        Ok(())
    }

    /// Get the perf event array for reading trace events
    pub fn get_perf_array(&mut self) -> Result<AsyncPerfEventArray<MapData>> {
        let map = self
            .ebpf
            .take_map("EVENTS")
            .context("EVENTS map not found in eBPF object")?;

        AsyncPerfEventArray::try_from(map)
            .context("Failed to create AsyncPerfEventArray from EVENTS map")
    }

    /// Read the probe counters, summed over all CPUs
    ///
    /// Indexed by the `STAT_*` constants.
    pub fn read_stats(&self) -> Result<Vec<u64>> {
        let map = self
            .ebpf
            .map("STATS")
            .context("STATS map not found in eBPF object")?;
        let stats: PerCpuArray<_, u64> =
            PerCpuArray::try_from(map).context("Failed to open STATS map")?;

        (0..MAX_STATS)
            .map(|index| {
                stats
                    .get(&index, 0)
                    .map(|values| values.iter().sum())
                    .with_context(|| format!("Failed to read counter {}", index))
            })
            .collect()
    }
}

#[cfg(feature = "embedded")]
fn embedded_object() -> Result<Vec<u8>> {
    info!("Loading embedded eBPF program...");
    Ok(aya::include_bytes_aligned!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../target/bpfel-unknown-none/release/ovs-trace"
    ))
    .to_vec())
}

#[cfg(not(feature = "embedded"))]
fn embedded_object() -> Result<Vec<u8>> {
    anyhow::bail!("No eBPF object file provided. Use --ebpf-object or compile with 'embedded' feature")
}
