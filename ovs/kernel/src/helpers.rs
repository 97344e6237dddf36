//! Helper functions for the OVS probes
//!
//! Safe wrappers around BPF helpers, scratch slot access and the common
//! section every event starts with.

use aya_ebpf::{
    helpers::{bpf_get_current_pid_tgid, bpf_ktime_get_ns, gen::bpf_get_func_ip},
    programs::ProbeContext,
    EbpfContext,
};
use ovs_trace_common::{
    constants::*, reserve_section, types::*, CallerAddressMode, FeatureProbe, HookError,
    ProbeRegisters, StagedEvent,
};

use crate::maps::{categories, has_func_ip, EVENTS, EVENT_SCRATCH, PACKET_BUFFERS, STATS};

/// Get current timestamp in nanoseconds
#[inline(always)]
pub fn get_timestamp() -> u64 {
    unsafe { bpf_ktime_get_ns() }
}

/// Get the current task's execution context
#[inline(always)]
pub fn current_context() -> ExecutionContextId {
    ExecutionContextId::from_pid_tgid(bpf_get_current_pid_tgid())
}

/// Add `n` to a statistics counter
///
/// Counters are per-CPU, the update needs no atomic operation.
#[inline(always)]
pub fn add_stat(stat_id: u32, n: u64) {
    if n == 0 {
        return;
    }
    if let Some(count) = STATS.get_ptr_mut(stat_id) {
        unsafe { *count += n };
    }
}

/// Increment a statistics counter
#[inline(always)]
pub fn increment_stat(stat_id: u32) {
    add_stat(stat_id, 1);
}

/// Account for a firing that produced nothing.
#[inline(always)]
pub fn record_error(err: HookError) {
    increment_stat(match err {
        HookError::MissingInput => STAT_MISSING_INPUT,
        HookError::ReservationExhausted => STAT_RESERVATION_FAILED,
    });
}

/// Start staging an event in this CPU's scratch slot.
#[inline(always)]
pub fn stage_event() -> Option<StagedEvent<'static>> {
    let Some(raw) = EVENT_SCRATCH.get_ptr_mut(0) else {
        increment_stat(STAT_SCRATCH_UNAVAILABLE);
        return None;
    };
    // SAFETY: per-CPU slot, only this program runs on this CPU until it returns.
    Some(StagedEvent::new(unsafe { &mut *raw }, categories()))
}

/// This CPU's fingerprint scratch buffer.
#[inline(always)]
pub fn packet_buffer() -> Option<&'static mut PacketBuffer> {
    let Some(buff) = PACKET_BUFFERS.get_ptr_mut(0) else {
        increment_stat(STAT_SCRATCH_UNAVAILABLE);
        return None;
    };
    // SAFETY: per-CPU slot, see `stage_event`.
    Some(unsafe { &mut *buff })
}

/// Add the common section.
///
/// A disabled COMMON category is not an error: the event simply goes
/// without it.
#[inline(always)]
pub fn write_common(event: &mut StagedEvent, symbol: u64) {
    if let Some(common) = reserve_section::<CommonRecord, _>(event) {
        common.timestamp = get_timestamp();
        common.symbol = symbol;
    }
}

/// Send a committed event to userspace.
#[inline(always)]
pub fn send_event<C: EbpfContext>(ctx: &C, event: StagedEvent) {
    EVENTS.output(ctx, event.commit(), 0);
}

/// Kprobe register view for the caller address resolution.
pub struct KprobeRegisters<'a>(pub &'a ProbeContext);

impl ProbeRegisters for KprobeRegisters<'_> {
    #[inline(always)]
    fn native_caller_address(&self) -> u64 {
        unsafe { bpf_get_func_ip(self.0.as_ptr()) }
    }

    #[cfg(bpf_target_arch = "x86_64")]
    #[inline(always)]
    fn instruction_pointer(&self) -> u64 {
        unsafe { (*self.0.regs).rip }
    }

    #[cfg(bpf_target_arch = "aarch64")]
    #[inline(always)]
    fn instruction_pointer(&self) -> u64 {
        unsafe { (*self.0.regs).pc }
    }
}

/// Address of the function a kprobe is attached to.
#[inline(always)]
pub fn caller_address(ctx: &ProbeContext) -> u64 {
    let features = FeatureProbe::resolve(has_func_ip);
    if features.mode() == CallerAddressMode::TrappedIp {
        increment_stat(STAT_FALLBACK_ADDRESS);
    }
    features.caller_address(&KprobeRegisters(ctx))
}
