//! Event collection and correlation
//!
//! Aggregates decoded events and groups fingerprinted actions by queue id,
//! which links the actions of an `OVS_PACKET_CMD_EXECUTE` back to the packet
//! it was issued for.

use crate::types::*;
use std::collections::HashMap;

/// Distinct queue ids kept before new ones are ignored
pub const MAX_QUEUE_CHAINS: usize = 4096;

/// Actions kept per queue id
pub const MAX_CHAIN_LENGTH: usize = 32;

/// Collector for decoded trace events
#[derive(Default)]
pub struct TraceCollector {
    upcalls: UpcallStats,
    actions: ActionStats,
    queues: HashMap<u32, QueueChain>,
    /// Tracked actions whose queue id did not fit in `queues`
    dropped_chains: u64,
    total_events: u64,
    decode_errors: u64,
    lost_events: u64,
}

impl TraceCollector {
    /// Create a new collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a decoded event to the collector
    pub fn add_event(&mut self, event: &TraceEvent) {
        match &event.kind {
            EventKind::UpcallEnqueue {
                command,
                return_code,
                ..
            } => {
                self.upcalls.total += 1;
                if *return_code != 0 {
                    self.upcalls.failed += 1;
                }
                *self.upcalls.by_command.entry(command.clone()).or_insert(0) += 1;
            }
            EventKind::ActionExec {
                action,
                queue_id,
                output_port,
                ..
            } => {
                self.actions.total += 1;
                *self.actions.by_action.entry(action.clone()).or_insert(0) += 1;

                if let Some(queue_id) = queue_id {
                    self.actions.tracked += 1;
                    self.chain_action(*queue_id, action, *output_port);
                }
            }
            EventKind::Unknown => {}
        }

        self.total_events += 1;
    }

    fn chain_action(&mut self, queue_id: u32, action: &str, output_port: Option<u32>) {
        if !self.queues.contains_key(&queue_id) && self.queues.len() >= MAX_QUEUE_CHAINS {
            self.dropped_chains += 1;
            return;
        }

        let chain = self.queues.entry(queue_id).or_default();
        if chain.actions.len() >= MAX_CHAIN_LENGTH {
            chain.overflow += 1;
            return;
        }
        chain.actions.push(action.to_string());
        if let Some(port) = output_port {
            chain.output_ports.push(port);
        }
    }

    /// Count a raw event that failed to decode
    pub fn add_decode_error(&mut self) {
        self.decode_errors += 1;
    }

    /// Count events lost in the perf buffer
    pub fn add_lost_events(&mut self, lost: usize) {
        self.lost_events += lost as u64;
    }

    /// Generate the report
    ///
    /// # Arguments
    ///
    /// * `elapsed_secs` - Duration of collection period in seconds
    /// * `probe_stats` - Kernel-side counters read at the end of the run
    pub fn generate_report(&self, elapsed_secs: u64, probe_stats: ProbeStats) -> TraceReport {
        let queues = self
            .queues
            .iter()
            .map(|(queue_id, chain)| (queue_id_to_string(*queue_id), chain.clone()))
            .collect();

        TraceReport {
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration_seconds: elapsed_secs,
            total_events: self.total_events,
            decode_errors: self.decode_errors,
            lost_events: self.lost_events,
            upcalls: self.upcalls.clone(),
            actions: self.actions.clone(),
            queues,
            dropped_chains: self.dropped_chains,
            probe_stats,
        }
    }

    /// Get current event count
    pub fn event_count(&self) -> u64 {
        self.total_events
    }

    /// Get number of distinct queue ids seen
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Get the action chain of a queue id
    pub fn chain(&self, queue_id: u32) -> Option<&QueueChain> {
        self.queues.get(&queue_id)
    }

    /// Get tracked actions dropped for lack of chain slots
    pub fn dropped_chains(&self) -> u64 {
        self.dropped_chains
    }
}
