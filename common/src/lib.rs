//! Shared types and correlation core for the OVS datapath probes
//!
//! This crate provides the record layouts, constants and probe logic shared
//! between the eBPF programs and the userspace daemon. The probe logic is
//! written against small collaborator traits so the kernel programs only
//! provide the kernel reads, and the logic itself is tested on the host.

#![cfg_attr(not(test), no_std)]

pub mod action;
pub mod assembler;
pub mod constants;
pub mod feature;
pub mod fingerprint;
pub mod inflight;
pub mod outcome;
pub mod types;
pub mod upcall;

// Re-export commonly used types
pub use action::{trace_action, ActionProbe, ActionVerdict, Correlation, NlAttrHeader};
pub use assembler::{reserve_section, EventAssembler, RawSection, Sections, StagedEvent};
pub use constants::*;
pub use feature::{CallerAddressMode, FeatureProbe, ProbeRegisters};
pub use fingerprint::{hash_packet, PacketSource};
pub use inflight::InFlightTracker;
pub use outcome::{HookError, Outcome};
pub use types::*;
pub use upcall::{trace_upcall_enqueue, UpcallProbe};
