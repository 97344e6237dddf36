//! OVS Trace Userspace Library
//!
//! Provides reusable components for loading the OVS datapath probes and
//! decoding, collecting and exporting what they report.

pub mod collector;
pub mod config;
pub mod decoder;
pub mod events;
pub mod exporter;
pub mod features;
pub mod loader;
pub mod types;

pub use collector::TraceCollector;
pub use config::RuntimeConfig;
pub use events::{EventLog, EventProcessor};
pub use exporter::{ExporterType, JsonExporter, PrometheusExporter, ReportExporter};
pub use features::KernelFeatures;
pub use loader::ProbeLoader;
pub use types::*;
