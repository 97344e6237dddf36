//! Upcall enqueue hook
//!
//! Fires on return of `queue_userspace_packet` and reports the command and
//! port the packet was queued for, along with the enqueue result. Every
//! firing with a descriptor produces exactly one record.

use crate::{
    assembler::{reserve_section, EventAssembler},
    outcome::{HookError, Outcome},
    types::UpcallRecord,
};

/// Arguments of an upcall enqueue probe.
pub trait UpcallProbe {
    /// Handle on the `struct dp_upcall_info` passed to the function.
    type Descriptor: Copy;

    fn descriptor(&self) -> Option<Self::Descriptor>;

    /// `OVS_PACKET_CMD_*` of the upcall.
    fn command(&self, upcall: Self::Descriptor) -> u8;

    /// Netlink port id the upcall is sent to.
    fn port(&self, upcall: Self::Descriptor) -> u32;

    /// Value returned by the probed function.
    fn return_value(&self) -> i32;
}

/// Record an upcall enqueue completion.
#[inline(always)]
pub fn trace_upcall_enqueue<P, A>(probe: &P, event: &mut A) -> Result<Outcome, HookError>
where
    P: UpcallProbe + ?Sized,
    A: EventAssembler + ?Sized,
{
    let upcall = probe.descriptor().ok_or(HookError::MissingInput)?;

    let record = reserve_section::<UpcallRecord, _>(event).ok_or(HookError::ReservationExhausted)?;
    record.port = probe.port(upcall);
    record.command = probe.command(upcall);
    record.return_code = probe.return_value();

    Ok(Outcome::Emitted)
}
