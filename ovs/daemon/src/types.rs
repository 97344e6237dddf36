//! Userspace type definitions
//!
//! Defines the data structures used by the userspace program for
//! event decoding, collection and export.
//!
//! ## Organization
//!
//! This module separates kernel and userspace types:
//! - **Kernel Types**: Types shared with eBPF programs (from ovs_trace_common)
//! - **Userspace Types**: Decoded events and the aggregated report

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Kernel Types (from eBPF programs)
// ============================================================================

pub mod kernel {
    //! Types shared between kernel eBPF programs and userspace
    //!
    //! These are re-exported from the ovs-trace-common crate and must
    //! maintain binary compatibility with the eBPF programs.

    pub use ovs_trace_common::constants;
    pub use ovs_trace_common::types::{
        ActionRecord, CommonRecord, KernelLayout, OutputRecord, PacketFilter, RawEvent,
        TrackingRecord, UpcallRecord,
    };
}

pub use kernel::RawEvent;

/// A decoded kernel event
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// `bpf_ktime_get_ns` at probe time, absent if the COMMON category is off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ns: Option<u64>,
    /// Address of the probed function or tracepoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<u64>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payload, by probe
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// `queue_userspace_packet` returned
    UpcallEnqueue {
        command: String,
        command_id: u8,
        port: u32,
        return_code: i32,
    },
    /// `ovs_do_execute_action` fired
    ActionExec {
        action: String,
        action_id: u8,
        recirc_id: u32,
        /// Packet fingerprint, for actions run while executing a userspace
        /// command
        #[serde(skip_serializing_if = "Option::is_none")]
        queue_id: Option<u32>,
        /// OUTPUT action port
        #[serde(skip_serializing_if = "Option::is_none")]
        output_port: Option<u32>,
    },
    /// Only sections this decoder does not know about
    Unknown,
}

/// Aggregated report for export
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TraceReport {
    /// ISO 8601 timestamp when the report was generated
    pub timestamp: String,
    /// Duration of collection period in seconds
    pub duration_seconds: u64,
    /// Total number of events decoded
    pub total_events: u64,
    /// Raw events that could not be decoded
    pub decode_errors: u64,
    /// Events the kernel dropped because the perf buffer was full
    pub lost_events: u64,
    /// Upcall enqueue statistics
    pub upcalls: UpcallStats,
    /// Action execution statistics
    pub actions: ActionStats,
    /// Actions grouped by packet fingerprint, keyed by hex queue id
    pub queues: HashMap<String, QueueChain>,
    /// Tracked actions left out of `queues` once it was full
    pub dropped_chains: u64,
    /// Kernel-side probe counters
    pub probe_stats: ProbeStats,
}

/// Upcall enqueue statistics
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct UpcallStats {
    /// Enqueue attempts
    pub total: u64,
    /// Enqueue attempts with a non-zero return code
    pub failed: u64,
    /// Attempts by `OVS_PACKET_CMD_*` name
    pub by_command: HashMap<String, u64>,
}

/// Action execution statistics
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct ActionStats {
    /// Reported actions
    pub total: u64,
    /// Actions carrying a packet fingerprint
    pub tracked: u64,
    /// Reported actions by name
    pub by_action: HashMap<String, u64>,
}

/// Actions applied to one fingerprinted packet
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueChain {
    /// Action names in arrival order
    pub actions: Vec<String>,
    /// Output ports, in arrival order
    pub output_ports: Vec<u32>,
    /// Actions seen past the chain length limit
    pub overflow: u64,
}

/// Kernel-side probe counters, summed over all CPUs
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbeStats {
    pub firings: u64,
    pub upcalls_emitted: u64,
    pub actions_emitted: u64,
    pub actions_discarded: u64,
    pub missing_input: u64,
    pub reservation_failed: u64,
    pub tracked_actions: u64,
    pub fingerprint_failed: u64,
    pub fallback_address: u64,
    pub scratch_unavailable: u64,
}

impl ProbeStats {
    /// Build from the `STATS` map values, indexed by the `STAT_*` constants
    ///
    /// Missing trailing counters read as zero.
    pub fn from_counters(counters: &[u64]) -> Self {
        use kernel::constants::*;

        let get = |id: u32| counters.get(id as usize).copied().unwrap_or_default();
        Self {
            firings: get(STAT_FIRINGS),
            upcalls_emitted: get(STAT_UPCALLS_EMITTED),
            actions_emitted: get(STAT_ACTIONS_EMITTED),
            actions_discarded: get(STAT_ACTIONS_DISCARDED),
            missing_input: get(STAT_MISSING_INPUT),
            reservation_failed: get(STAT_RESERVATION_FAILED),
            tracked_actions: get(STAT_TRACKED_ACTIONS),
            fingerprint_failed: get(STAT_FINGERPRINT_FAILED),
            fallback_address: get(STAT_FALLBACK_ADDRESS),
            scratch_unavailable: get(STAT_SCRATCH_UNAVAILABLE),
        }
    }

    /// Name/value pairs, in `STAT_*` order
    pub fn entries(&self) -> [(&'static str, u64); 10] {
        [
            ("firings", self.firings),
            ("upcalls_emitted", self.upcalls_emitted),
            ("actions_emitted", self.actions_emitted),
            ("actions_discarded", self.actions_discarded),
            ("missing_input", self.missing_input),
            ("reservation_failed", self.reservation_failed),
            ("tracked_actions", self.tracked_actions),
            ("fingerprint_failed", self.fingerprint_failed),
            ("fallback_address", self.fallback_address),
            ("scratch_unavailable", self.scratch_unavailable),
        ]
    }
}

/// Format a packet fingerprint the way reports key it
pub fn queue_id_to_string(queue_id: u32) -> String {
    format!("{:#010x}", queue_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_stats_from_counters() {
        let stats = ProbeStats::from_counters(&[10, 2, 5, 3, 0, 0, 4, 1]);

        assert_eq!(stats.firings, 10);
        assert_eq!(stats.actions_discarded, 3);
        assert_eq!(stats.tracked_actions, 4);
        assert_eq!(stats.fingerprint_failed, 1);
        // Short input reads as zero
        assert_eq!(stats.scratch_unavailable, 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = TraceEvent {
            timestamp_ns: Some(42),
            symbol: None,
            kind: EventKind::ActionExec {
                action: "output".to_string(),
                action_id: 1,
                recirc_id: 0,
                queue_id: Some(0xabcd),
                output_port: Some(2),
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "action_exec");
        assert_eq!(json["timestamp_ns"], 42);
        assert_eq!(json["queue_id"], 0xabcd);
        assert!(json.get("symbol").is_none());

        let back: TraceEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_queue_id_format() {
        assert_eq!(queue_id_to_string(0xabcd), "0x0000abcd");
    }
}
