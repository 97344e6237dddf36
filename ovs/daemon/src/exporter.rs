//! Report exporters
//!
//! Provides different exporters for the trace report (JSON, Prometheus)

use crate::types::TraceReport;
use anyhow::{bail, Context, Result};
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Trait for report exporters
pub trait ReportExporter {
    /// Export the report
    ///
    /// # Arguments
    ///
    /// * `report` - Aggregated report to export
    fn export(&self, report: &TraceReport) -> Result<()>;
}

/// Export format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterType {
    /// JSON format
    Json,
    /// Prometheus text format
    Prometheus,
}

impl FromStr for ExporterType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExporterType::Json),
            "prometheus" | "prom" => Ok(ExporterType::Prometheus),
            _ => bail!("Unsupported format: {}. Use json or prometheus", s),
        }
    }
}

impl ExporterType {
    /// Build the exporter writing to `output_path`
    pub fn exporter(self, output_path: PathBuf) -> Box<dyn ReportExporter> {
        match self {
            ExporterType::Json => Box::new(JsonExporter::new(output_path, true)),
            ExporterType::Prometheus => Box::new(PrometheusExporter::new(output_path)),
        }
    }
}

fn write_file(path: &Path, data: &str) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create output file: {:?}", path))?;

    file.write_all(data.as_bytes())
        .with_context(|| format!("Failed to write to output file: {:?}", path))?;

    Ok(())
}

/// JSON exporter
pub struct JsonExporter {
    output_path: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: PathBuf, pretty: bool) -> Self {
        Self {
            output_path,
            pretty,
        }
    }
}

impl ReportExporter for JsonExporter {
    fn export(&self, report: &TraceReport) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };

        write_file(&self.output_path, &json)
    }
}

/// Prometheus exporter
pub struct PrometheusExporter {
    output_path: PathBuf,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Convert the report to Prometheus text format
    fn to_prometheus_format(report: &TraceReport) -> String {
        let mut output = String::new();

        // Totals
        output.push_str("# HELP ovs_trace_events_total Total number of decoded events\n");
        output.push_str("# TYPE ovs_trace_events_total counter\n");
        output.push_str(&format!("ovs_trace_events_total {}\n", report.total_events));
        output.push('\n');

        output.push_str("# HELP ovs_trace_decode_errors_total Events that failed to decode\n");
        output.push_str("# TYPE ovs_trace_decode_errors_total counter\n");
        output.push_str(&format!("ovs_trace_decode_errors_total {}\n", report.decode_errors));
        output.push('\n');

        output.push_str("# HELP ovs_trace_lost_events_total Events lost in the perf buffer\n");
        output.push_str("# TYPE ovs_trace_lost_events_total counter\n");
        output.push_str(&format!("ovs_trace_lost_events_total {}\n", report.lost_events));
        output.push('\n');

        output.push_str("# HELP ovs_trace_duration_seconds Duration of collection period\n");
        output.push_str("# TYPE ovs_trace_duration_seconds gauge\n");
        output.push_str(&format!("ovs_trace_duration_seconds {}\n", report.duration_seconds));
        output.push('\n');

        // Upcalls
        output.push_str("# HELP ovs_trace_upcalls_total Upcall enqueue attempts by command\n");
        output.push_str("# TYPE ovs_trace_upcalls_total counter\n");
        let mut commands: Vec<_> = report.upcalls.by_command.iter().collect();
        commands.sort();
        for (command, count) in commands {
            output.push_str(&format!("ovs_trace_upcalls_total{{command=\"{}\"}} {}\n", command, count));
        }
        output.push('\n');

        output.push_str("# HELP ovs_trace_upcalls_failed_total Upcall enqueues returning an error\n");
        output.push_str("# TYPE ovs_trace_upcalls_failed_total counter\n");
        output.push_str(&format!("ovs_trace_upcalls_failed_total {}\n", report.upcalls.failed));
        output.push('\n');

        // Actions
        output.push_str("# HELP ovs_trace_actions_total Reported action executions by action\n");
        output.push_str("# TYPE ovs_trace_actions_total counter\n");
        let mut actions: Vec<_> = report.actions.by_action.iter().collect();
        actions.sort();
        for (action, count) in actions {
            output.push_str(&format!("ovs_trace_actions_total{{action=\"{}\"}} {}\n", action, count));
        }
        output.push('\n');

        output.push_str("# HELP ovs_trace_actions_tracked_total Actions linked to a userspace command\n");
        output.push_str("# TYPE ovs_trace_actions_tracked_total counter\n");
        output.push_str(&format!("ovs_trace_actions_tracked_total {}\n", report.actions.tracked));
        output.push('\n');

        output.push_str("# HELP ovs_trace_queues Distinct packet fingerprints seen\n");
        output.push_str("# TYPE ovs_trace_queues gauge\n");
        output.push_str(&format!("ovs_trace_queues {}\n", report.queues.len()));
        output.push('\n');

        output.push_str("# HELP ovs_trace_queue_actions_dropped_total Tracked actions left out once the queue table was full\n");
        output.push_str("# TYPE ovs_trace_queue_actions_dropped_total counter\n");
        output.push_str(&format!(
            "ovs_trace_queue_actions_dropped_total {}\n",
            report.dropped_chains
        ));
        output.push('\n');

        // Kernel counters
        output.push_str("# HELP ovs_trace_probe_stat Kernel-side probe counters\n");
        output.push_str("# TYPE ovs_trace_probe_stat counter\n");
        for (name, value) in report.probe_stats.entries() {
            output.push_str(&format!("ovs_trace_probe_stat{{stat=\"{}\"}} {}\n", name, value));
        }
        output.push('\n');

        output
    }
}

impl ReportExporter for PrometheusExporter {
    fn export(&self, report: &TraceReport) -> Result<()> {
        let prometheus_data = Self::to_prometheus_format(report);
        write_file(&self.output_path, &prometheus_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use std::collections::HashMap;

    fn create_test_report() -> TraceReport {
        let mut by_command = HashMap::new();
        by_command.insert("miss".to_string(), 7);
        let mut by_action = HashMap::new();
        by_action.insert("output".to_string(), 12);
        by_action.insert("ct".to_string(), 3);

        TraceReport {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            duration_seconds: 60,
            total_events: 22,
            decode_errors: 0,
            lost_events: 1,
            upcalls: UpcallStats {
                total: 7,
                failed: 2,
                by_command,
            },
            actions: ActionStats {
                total: 15,
                tracked: 4,
                by_action,
            },
            queues: HashMap::new(),
            dropped_chains: 4,
            probe_stats: ProbeStats {
                firings: 30,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_prometheus_format() {
        let report = create_test_report();
        let prometheus = PrometheusExporter::to_prometheus_format(&report);

        assert!(prometheus.contains("ovs_trace_events_total 22"));
        assert!(prometheus.contains("ovs_trace_duration_seconds 60"));
        assert!(prometheus.contains("ovs_trace_upcalls_total{command=\"miss\"} 7"));
        assert!(prometheus.contains("ovs_trace_upcalls_failed_total 2"));
        assert!(prometheus.contains("ovs_trace_queue_actions_dropped_total 4"));
        assert!(prometheus.contains("ovs_trace_actions_total{action=\"output\"} 12"));
        assert!(prometheus.contains("ovs_trace_probe_stat{stat=\"firings\"} 30"));

        // Labels are emitted in a stable order
        let ct = prometheus.find("action=\"ct\"").unwrap();
        let output = prometheus.find("action=\"output\"").unwrap();
        assert!(ct < output);
    }

    #[test]
    fn test_json_export() {
        let path = std::env::temp_dir().join(format!("ovs-trace-test-{}.json", std::process::id()));
        let report = create_test_report();

        JsonExporter::new(path.clone(), false).export(&report).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["total_events"], 22);
        assert_eq!(written["upcalls"]["by_command"]["miss"], 7);
        assert_eq!(written["probe_stats"]["firings"], 30);
        assert_eq!(written["dropped_chains"], 4);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<ExporterType>().unwrap(), ExporterType::Json);
        assert_eq!("PROM".parse::<ExporterType>().unwrap(), ExporterType::Prometheus);
        assert!("influx".parse::<ExporterType>().is_err());
    }
}
