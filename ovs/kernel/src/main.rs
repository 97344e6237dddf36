//! eBPF OVS datapath probes - Kernel Space Program
//!
//! Traces the two halves of an upcall round trip in the openvswitch kernel
//! module:
//!
//! ```text
//! flow miss -> queue_userspace_packet()  -> upcall enqueue event
//!                 |
//!                 v
//!            ovs-vswitchd handles the upcall, sends OVS_PACKET_CMD_EXECUTE
//!                 |
//!                 v
//!            ovs_do_execute_action tracepoint -> action event
//!                                                (+ packet fingerprint when
//!                                                 the task is in flight)
//! ```
//!
//! Events are staged in per-CPU scratch slots and only sent through the
//! `EVENTS` perf array once the probe decided to keep them. The correlation
//! logic itself lives in `ovs-trace-common`; this program provides the kernel
//! reads and the maps.
//!
//! ## Usage
//!
//! This program must be compiled for the bpfel-unknown-none target:
//!
//! ```bash
//! cargo build --release -p ovs-trace-ebpf --target=bpfel-unknown-none -Z build-std=core
//! ```
//!
//! The compiled bytecode is then loaded by the userspace daemon.

#![no_std]
#![no_main]

mod handlers;
mod helpers;
mod kernel_types;
mod maps;

// Re-export probe functions so they're visible to the loader
pub use handlers::{ovs_do_execute_action, queue_userspace_packet, queue_userspace_packet_ret};

// Re-export maps for verification
pub use maps::{EVENTS, INFLIGHT_EXEC_CMD, STATS};

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    // The verifier rejects any program that could reach this.
    loop {}
}
