//! Probe handlers for the OVS datapath
//!
//! Each handler gathers its inputs from the kernel and hands them to the
//! hook logic in `ovs-trace-common`, then sends or drops the staged event.

use aya_ebpf::{
    helpers::bpf_get_current_pid_tgid,
    macros::{kprobe, kretprobe, raw_tracepoint},
    programs::{ProbeContext, RawTracePointContext},
    EbpfContext,
};
use ovs_trace_common::{
    constants::*, trace_action, trace_upcall_enqueue, Correlation, Outcome,
};

use crate::{helpers::*, kernel_types::*, maps::*};

/// Capture the upcall descriptor
///
/// Attached to: queue_userspace_packet (entry)
///
/// `queue_userspace_packet(dp, skb, key, upcall_info, cutlen)`. The
/// descriptor is only interpreted at return, once the enqueue result is
/// known.
#[kprobe]
pub fn queue_userspace_packet(ctx: ProbeContext) -> u32 {
    match try_queue_userspace_packet(&ctx) {
        Ok(ret) => ret,
        Err(_) => 1,
    }
}

fn try_queue_userspace_packet(ctx: &ProbeContext) -> Result<u32, i64> {
    let pending = PendingUpcall {
        upcall: ctx.arg::<u64>(3).unwrap_or_default(),
        symbol: caller_address(ctx),
    };
    let key = bpf_get_current_pid_tgid();

    UPCALL_ARGS.insert(&key, &pending, 0)?;
    Ok(0)
}

/// Report an upcall enqueue
///
/// Attached to: queue_userspace_packet (return)
///
/// Emits one event per enqueue attempt, failed ones included.
#[kretprobe]
pub fn queue_userspace_packet_ret(ctx: ProbeContext) -> u32 {
    match try_queue_userspace_packet_ret(&ctx) {
        Ok(ret) => ret,
        Err(_) => 1,
    }
}

fn try_queue_userspace_packet_ret(ctx: &ProbeContext) -> Result<u32, i64> {
    increment_stat(STAT_FIRINGS);

    let key = bpf_get_current_pid_tgid();
    // Entry was missed, e.g. the probe was attached mid-call.
    let Some(pending) = (unsafe { UPCALL_ARGS.get(&key) }).copied() else {
        increment_stat(STAT_MISSING_INPUT);
        return Ok(0);
    };
    let _ = UPCALL_ARGS.remove(&key);

    let Some(mut event) = stage_event() else {
        return Ok(0);
    };
    write_common(&mut event, pending.symbol);

    let enqueue = UpcallEnqueue {
        upcall: pending.upcall,
        ret: ctx.ret::<i32>().unwrap_or_default(),
        layout: layout(),
    };

    match trace_upcall_enqueue(&enqueue, &mut event) {
        Ok(Outcome::Emitted) => {
            increment_stat(STAT_UPCALLS_EMITTED);
            send_event(ctx, event);
        }
        Ok(Outcome::Discarded) => {}
        Err(err) => record_error(err),
    }

    Ok(0)
}

/// Report an action execution
///
/// Attached to: ovs_do_execute_action (raw tracepoint)
///
/// Actions run by a task executing a userspace command are fingerprinted
/// so they can be matched with the upcall that caused them. Others are
/// reported only if they pass the coarse packet filter.
#[raw_tracepoint(tracepoint = "ovs_do_execute_action")]
pub fn ovs_do_execute_action(ctx: RawTracePointContext) -> i32 {
    match try_ovs_do_execute_action(&ctx) {
        Ok(ret) => ret,
        Err(_) => 1,
    }
}

#[inline(always)]
fn raw_tp_arg(ctx: &RawTracePointContext, n: usize) -> u64 {
    // SAFETY: `bpf_raw_tracepoint_args` is an array of the tracepoint's
    // arguments, the verifier bounds the access.
    unsafe { *(ctx.as_ptr() as *const u64).add(n) }
}

fn try_ovs_do_execute_action(ctx: &RawTracePointContext) -> Result<i32, i64> {
    increment_stat(STAT_FIRINGS);

    let Some(mut event) = stage_event() else {
        return Ok(0);
    };
    write_common(&mut event, exec_tp_symbol());

    let exec = ExecuteAction {
        skb: raw_tp_arg(ctx, 1),
        key: raw_tp_arg(ctx, 2),
        attr: raw_tp_arg(ctx, 3),
        ctx: current_context(),
        layout: layout(),
    };
    let filter = packet_filter();
    let matches = || filter.matches(exec.packet_protocol());

    let verdict = match trace_action(&exec, &InflightExecMap, packet_buffer(), matches, &mut event) {
        Ok(verdict) => verdict,
        Err(err) => {
            record_error(err);
            return Ok(0);
        }
    };

    match verdict.correlation {
        Correlation::Tracked(_) | Correlation::Unrecorded(_) => {
            increment_stat(STAT_TRACKED_ACTIONS)
        }
        Correlation::NoFingerprint => increment_stat(STAT_FINGERPRINT_FAILED),
        Correlation::NotInFlight => {}
    }
    // Tracking or output sections that did not make it into the event.
    add_stat(STAT_RESERVATION_FAILED, verdict.dropped_sections as u64);

    match verdict.outcome {
        Outcome::Emitted => {
            increment_stat(STAT_ACTIONS_EMITTED);
            send_event(ctx, event);
        }
        Outcome::Discarded => increment_stat(STAT_ACTIONS_DISCARDED),
    }

    Ok(0)
}
