//! In-flight command lookup
//!
//! A task is "in flight" while it executes a userspace command (an upcall
//! reply or an OVS_PACKET_CMD_EXECUTE) whose actions are expected to be
//! traced. The table is filled and cleared elsewhere; the probes only read it.
//!
//! Entries are keyed by task, and a task runs on a single CPU at a time, so
//! no two concurrent probes ever race on the same entry.

use crate::types::ExecutionContextId;

/// Read-only view of the in-flight table.
pub trait InFlightTracker {
    fn is_in_flight(&self, ctx: ExecutionContextId) -> bool;
}

impl<F> InFlightTracker for F
where
    F: Fn(ExecutionContextId) -> bool,
{
    #[inline(always)]
    fn is_in_flight(&self, ctx: ExecutionContextId) -> bool {
        self(ctx)
    }
}

/// Fixed-capacity in-flight table indexed by task slot, standing in for the
/// kernel map in host tests.
///
/// Each slot belongs to one task; a slot holds the context it was claimed by
/// so stale slots from a reused index never match another task.
#[cfg(test)]
pub struct InFlightSlots<const N: usize> {
    slots: [Option<ExecutionContextId>; N],
}

#[cfg(test)]
impl<const N: usize> InFlightSlots<N> {
    pub const fn new() -> Self {
        Self { slots: [None; N] }
    }

    #[inline(always)]
    fn slot(ctx: ExecutionContextId) -> usize {
        ctx.thread as usize % N
    }

    /// Mark `ctx` as in flight. Returns false if its slot is owned by a
    /// different live task.
    pub fn insert(&mut self, ctx: ExecutionContextId) -> bool {
        let slot = &mut self.slots[Self::slot(ctx)];
        match slot {
            Some(owner) if *owner != ctx => false,
            _ => {
                *slot = Some(ctx);
                true
            }
        }
    }

    pub fn remove(&mut self, ctx: ExecutionContextId) {
        let slot = &mut self.slots[Self::slot(ctx)];
        if *slot == Some(ctx) {
            *slot = None;
        }
    }
}

#[cfg(test)]
impl<const N: usize> Default for InFlightSlots<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl<const N: usize> InFlightTracker for InFlightSlots<N> {
    #[inline(always)]
    fn is_in_flight(&self, ctx: ExecutionContextId) -> bool {
        self.slots[Self::slot(ctx)] == Some(ctx)
    }
}
