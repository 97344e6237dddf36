//! BPF map definitions and load-time globals
//!
//! Maps used for communication with userspace, per-CPU scratch storage and
//! per-task state. Globals are patched by the loader before the programs are
//! loaded and never change afterwards.

use aya_ebpf::{
    macros::map,
    maps::{HashMap, LruHashMap, PerCpuArray, PerfEventArray},
};
use ovs_trace_common::{constants::*, types::*};

/// Perf event array sending kept events to userspace
#[map]
pub static EVENTS: PerfEventArray<RawEvent> = PerfEventArray::new(0);

/// Per-CPU staging slot for the event being assembled
///
/// Only one probe runs at a time on a given CPU, so the slot is never
/// shared. A discarded event is overwritten by the next firing.
#[map]
pub static EVENT_SCRATCH: PerCpuArray<RawEvent> = PerCpuArray::with_max_entries(1, 0);

/// Per-CPU storage for the packet bytes being fingerprinted
#[map]
pub static PACKET_BUFFERS: PerCpuArray<PacketBuffer> = PerCpuArray::with_max_entries(1, 0);

/// Tasks currently executing a userspace command
///
/// Key: pid_tgid of the task
/// Value: unused marker
///
/// Filled and cleared by the component tracing ovs-vswitchd, which finds it
/// pinned by name in the loader's pin directory. Read-only here.
#[map(name = "INFLIGHT_EXEC_CMD")]
pub static INFLIGHT_EXEC_CMD: HashMap<u64, u8> = HashMap::pinned(MAX_INFLIGHT, 0);

/// `queue_userspace_packet` arguments captured at function entry
///
/// Key: pid_tgid of the task
/// Value: descriptor pointer and caller address
///
/// A return the kretprobe misses leaves its entry behind; the LRU evicts
/// such entries instead of letting them fill the map.
#[map]
pub static UPCALL_ARGS: LruHashMap<u64, PendingUpcall> =
    LruHashMap::with_max_entries(MAX_PENDING_UPCALLS, 0);

/// Probe health counters, indexed by the `STAT_*` constants
#[map]
pub static STATS: PerCpuArray<u64> = PerCpuArray::with_max_entries(MAX_STATS, 0);

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PendingUpcall {
    /// `struct dp_upcall_info *`, possibly null
    pub upcall: u64,
    /// Caller address computed at entry
    pub symbol: u64,
}

/// Whether `bpf_get_func_ip` is available on the running kernel
#[no_mangle]
static HAS_FUNC_IP: u8 = 0;

/// Bitmask of enabled section owners
#[no_mangle]
static CATEGORIES: u64 = ALL_CATEGORIES;

/// Coarse packet predicate for untracked actions
#[no_mangle]
static PACKET_FILTER: PacketFilter = PacketFilter::TRACKED_ONLY;

/// Field offsets of the running kernel's structures
#[no_mangle]
static LAYOUT: KernelLayout = KernelLayout::DEFAULT;

/// Address of the `ovs_do_execute_action` tracepoint
#[no_mangle]
static EXEC_TP_SYMBOL: u64 = 0;

// Globals must be read through volatile loads or the compiler folds the
// defaults in.

#[inline(always)]
pub fn has_func_ip() -> bool {
    unsafe { core::ptr::read_volatile(&HAS_FUNC_IP) != 0 }
}

#[inline(always)]
pub fn categories() -> u64 {
    unsafe { core::ptr::read_volatile(&CATEGORIES) }
}

#[inline(always)]
pub fn packet_filter() -> PacketFilter {
    unsafe { core::ptr::read_volatile(&PACKET_FILTER) }
}

#[inline(always)]
pub fn layout() -> KernelLayout {
    unsafe { core::ptr::read_volatile(&LAYOUT) }
}

#[inline(always)]
pub fn exec_tp_symbol() -> u64 {
    unsafe { core::ptr::read_volatile(&EXEC_TP_SYMBOL) }
}
