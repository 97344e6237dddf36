//! OVS datapath tracer - Userspace Program
//!
//! Loads the OVS probes, attaches them to the openvswitch module, collects
//! upcall and action events, and exports a report.
//!
//! ## Usage
//!
//! ```bash
//! # Run for 60 seconds and export to JSON
//! sudo ./ovs-trace --duration 60 --output ovs-trace.json
//!
//! # Also report actions not linked to a userspace command, for IPv4 packets
//! sudo ./ovs-trace --ethertype ipv4
//!
//! # Dump every event as JSON lines
//! sudo ./ovs-trace --events events.jsonl
//!
//! # Use external eBPF object file and kernel layout
//! sudo ./ovs-trace --ebpf-object path/to/ovs-trace --layout layout.json
//!
//! # Export to Prometheus format
//! sudo ./ovs-trace --duration 60 --format prometheus --output ovs-trace.prom
//! ```

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use ovs_trace_daemon::{
    collector::TraceCollector,
    config::{self, RuntimeConfig},
    events::{EventLog, EventProcessor},
    exporter::ExporterType,
    features::KernelFeatures,
    loader::ProbeLoader,
    types::{ProbeStats, TraceReport},
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    signal,
    sync::Mutex,
    time::{sleep, Instant},
};

/// OVS datapath upcall and action tracer using eBPF
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Duration to run the probe (in seconds, 0 = infinite)
    #[clap(short, long, default_value_t = 60)]
    duration: u64,

    /// Output file for the report
    #[clap(short, long, default_value = "ovs-trace.json")]
    output: PathBuf,

    /// Output format (json, prometheus)
    #[clap(short, long, default_value = "json")]
    format: ExporterType,

    /// Also report actions not linked to a userspace command
    #[clap(long, conflicts_with = "ethertype")]
    all_actions: bool,

    /// Also report unlinked actions on packets of this L3 protocol
    /// (e.g. 0x0800, ipv6)
    #[clap(long, value_parser = config::parse_ethertype)]
    ethertype: Option<u16>,

    /// Leave the timestamp/symbol section out of events
    #[clap(long)]
    disable_common: bool,

    /// JSON file overriding kernel structure offsets
    #[clap(long)]
    layout: Option<PathBuf>,

    /// bpffs directory the in-flight map is pinned in
    #[clap(long, default_value = config::DEFAULT_PIN_PATH)]
    pin_path: PathBuf,

    /// Write every decoded event to this file, as JSON lines
    #[clap(long)]
    events: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,

    /// Path to eBPF object file (if not embedded)
    #[clap(long)]
    ebpf_object: Option<PathBuf>,

    /// Progress reporting interval in seconds
    #[clap(long, default_value_t = 10)]
    progress_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("Starting OVS datapath tracer...");
    info!(
        "   Duration: {} seconds",
        if args.duration == 0 {
            "infinite".to_string()
        } else {
            args.duration.to_string()
        }
    );
    info!("   Output: {:?}", args.output);
    info!("   Format: {:?}", args.format);

    let runtime_config = RuntimeConfig {
        filter: config::packet_filter(args.all_actions, args.ethertype),
        categories: config::category_mask(args.disable_common),
        layout: config::load_layout(args.layout.as_deref())?,
        pin_path: args.pin_path.clone(),
    };
    info!("   Packet filter: {:?}", runtime_config.filter);

    let features = KernelFeatures::detect()?;
    if !features.has_func_ip {
        warn!("bpf_get_func_ip unavailable, probe addresses are derived from the trapped IP");
    }

    // Load eBPF program
    let mut loader = ProbeLoader::load(args.ebpf_object.clone(), &runtime_config, &features)?;

    loader.attach_upcall_probes()?;
    loader.attach_action_tracepoint()?;

    let perf_array = loader.get_perf_array()?;

    info!("Collecting events...");

    let collector = Arc::new(Mutex::new(TraceCollector::new()));
    let event_log = args.events.as_deref().map(EventLog::create).transpose()?;

    let processor = EventProcessor::new(Arc::clone(&collector), event_log, args.verbose);
    processor.spawn_cpu_readers(perf_array).await?;
    processor.spawn_progress_reporter(args.progress_interval);

    // Run for specified duration or until interrupted
    let start_time = Instant::now();
    if args.duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {
                info!("Duration reached, shutting down...");
            }
            _ = signal::ctrl_c() => {
                info!("Interrupted, shutting down...");
            }
        }
    } else {
        signal::ctrl_c().await?;
        info!("Interrupted, shutting down...");
    }

    let elapsed = start_time.elapsed().as_secs();

    processor.flush().await?;

    let probe_stats = match loader.read_stats() {
        Ok(counters) => ProbeStats::from_counters(&counters),
        Err(e) => {
            warn!("Failed to read probe counters: {:#}", e);
            ProbeStats::default()
        }
    };

    info!("Generating report...");

    let report = collector.lock().await.generate_report(elapsed, probe_stats);
    args.format.exporter(args.output.clone()).export(&report)?;

    info!("Report written to {:?}", args.output);

    print_summary(&report);

    Ok(())
}

fn print_summary(report: &TraceReport) {
    info!("");
    info!("============================================");
    info!("             Summary Report");
    info!("============================================");
    info!("");
    info!("  Total events:       {}", report.total_events);
    info!("  Decode errors:      {}", report.decode_errors);
    info!("  Lost events:        {}", report.lost_events);
    info!("  Duration:           {} seconds", report.duration_seconds);
    info!("");
    info!("  Upcalls:            {}", report.upcalls.total);
    info!("    failed:           {}", report.upcalls.failed);
    let mut commands: Vec<_> = report.upcalls.by_command.iter().collect();
    commands.sort();
    for (command, count) in commands {
        info!("    {:<16}  {:>8}", command, count);
    }
    info!("");
    info!("  Actions:            {}", report.actions.total);
    info!("    tracked:          {}", report.actions.tracked);
    let mut actions: Vec<_> = report.actions.by_action.iter().collect();
    actions.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (action, count) in actions {
        info!("    {:<16}  {:>8}", action, count);
    }
    info!("");
    info!("  Fingerprinted packets: {}", report.queues.len());
    info!("    actions dropped:  {}", report.dropped_chains);
    info!("");
    info!("  Probe counters:");
    for (name, value) in report.probe_stats.entries() {
        info!("    {:<20}  {:>8}", name, value);
    }
    info!("");
    info!("============================================");
}
