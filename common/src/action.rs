//! Action execution hook
//!
//! Fires for every action the datapath executes. Actions executed on behalf
//! of a userspace command (the task is in flight) are tagged with the
//! fingerprint of the packet, which is what lets userspace tie them back to
//! the upcall that triggered the command. Untracked actions are only reported
//! when the coarse packet predicate matches; otherwise the staged event is
//! dropped and nothing is observable.
//!
//! ```text
//! start --inputs--> haveInputs --ActionRecord--> recorded
//!   recorded --in flight + fingerprint--> eligible --------------> kept
//!   recorded --miss--> ineligible --predicate--> kept | discarded
//!   kept + OUTPUT --> OutputRecord
//! ```

use crate::{
    assembler::{reserve_section, EventAssembler},
    constants::*,
    fingerprint::{hash_packet, PacketSource},
    inflight::InFlightTracker,
    outcome::{HookError, Outcome},
    types::*,
};

/// Header of a netlink attribute (`struct nlattr`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NlAttrHeader {
    pub nla_len: u16,
    pub nla_type: u16,
}

impl NlAttrHeader {
    /// Attribute type without the nested / byte order flags.
    #[inline(always)]
    pub const fn attr_type(&self) -> u16 {
        self.nla_type & NLA_TYPE_MASK
    }
}

/// Arguments of an action execution probe and the kernel reads on them.
pub trait ActionProbe {
    /// Handle on the `struct sw_flow_key`.
    type FlowKey: Copy;
    /// Handle on the action's `struct nlattr`.
    type Attr: Copy;
    type Packet: PacketSource;

    fn flow_key(&self) -> Option<Self::FlowKey>;

    fn action_attr(&self) -> Option<Self::Attr>;

    /// Recirculation id of the flow key.
    fn recirc_id(&self, key: Self::FlowKey) -> u32;

    fn attr_header(&self, attr: Self::Attr) -> Option<NlAttrHeader>;

    /// Read a u32 at `offset` bytes into the attribute payload.
    fn attr_payload_u32(&self, attr: Self::Attr, offset: usize) -> Option<u32>;

    /// The packet the action runs on.
    fn packet(&self) -> Option<Self::Packet>;

    /// Task running the probe.
    fn context(&self) -> ExecutionContextId;
}

/// Whether an action could be linked to an in-flight userspace command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Correlation {
    /// Tracked; a tracking section carries the fingerprint.
    Tracked(u32),
    /// Tracked, but the tracking section could not be reserved.
    Unrecorded(u32),
    /// The task has no command in flight.
    NotInFlight,
    /// In flight, but the packet could not be fingerprinted.
    NoFingerprint,
}

impl Correlation {
    #[inline(always)]
    pub const fn is_eligible(&self) -> bool {
        matches!(self, Correlation::Tracked(_) | Correlation::Unrecorded(_))
    }
}

/// Result of a completed action firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionVerdict {
    pub outcome: Outcome,
    pub correlation: Correlation,
    /// Optional sections that could not be reserved or read.
    pub dropped_sections: u8,
}

#[inline(always)]
fn correlate<P, T, A>(
    probe: &P,
    tracker: &T,
    scratch: Option<&mut PacketBuffer>,
    event: &mut A,
) -> Correlation
where
    P: ActionProbe + ?Sized,
    T: InFlightTracker + ?Sized,
    A: EventAssembler + ?Sized,
{
    if !tracker.is_in_flight(probe.context()) {
        return Correlation::NotInFlight;
    }

    let queue_id = match (scratch, probe.packet()) {
        (Some(scratch), Some(packet)) => hash_packet(scratch, &packet),
        _ => None,
    };
    let Some(queue_id) = queue_id else {
        return Correlation::NoFingerprint;
    };

    match reserve_section::<TrackingRecord, _>(event) {
        Some(track) => {
            track.queue_id = queue_id;
            Correlation::Tracked(queue_id)
        }
        None => Correlation::Unrecorded(queue_id),
    }
}

/// Record an action execution.
///
/// `scratch` is the per-CPU fingerprint buffer, absent if it could not be
/// looked up. `packet_matches` is the coarse predicate deciding whether an
/// untracked action is still worth reporting; it is only evaluated for
/// those.
#[inline(always)]
pub fn trace_action<P, T, A, F>(
    probe: &P,
    tracker: &T,
    scratch: Option<&mut PacketBuffer>,
    packet_matches: F,
    event: &mut A,
) -> Result<ActionVerdict, HookError>
where
    P: ActionProbe + ?Sized,
    T: InFlightTracker + ?Sized,
    A: EventAssembler + ?Sized,
    F: FnOnce() -> bool,
{
    let key = probe.flow_key().ok_or(HookError::MissingInput)?;
    let attr = probe.action_attr().ok_or(HookError::MissingInput)?;

    let action_type = probe
        .attr_header(attr)
        .map(|header| header.attr_type() as u8)
        .unwrap_or_default();

    let exec = reserve_section::<ActionRecord, _>(event).ok_or(HookError::ReservationExhausted)?;
    exec.action_type = action_type;
    exec.recirc_id = probe.recirc_id(key);

    let correlation = correlate(probe, tracker, scratch, event);
    let mut dropped_sections = match correlation {
        Correlation::Unrecorded(_) => 1,
        _ => 0,
    };

    if !correlation.is_eligible() && !packet_matches() {
        return Ok(ActionVerdict {
            outcome: Outcome::Discarded,
            correlation,
            dropped_sections,
        });
    }

    // Action-specific data.
    if action_type == OVS_ACTION_ATTR_OUTPUT {
        let port = probe.attr_payload_u32(attr, OUTPUT_PORT_OFFSET);
        match (port, reserve_section::<OutputRecord, _>(event)) {
            (Some(port), Some(output)) => output.port = port,
            _ => dropped_sections += 1,
        }
    }

    Ok(ActionVerdict {
        outcome: Outcome::Emitted,
        correlation,
        dropped_sections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembler::*, inflight::InFlightSlots};
    use core::cell::Cell;

    const OVS_ACTION_ATTR_RECIRC: u16 = 7;

    #[derive(Clone, Copy)]
    struct Frame<'a>(&'a [u8]);

    impl PacketSource for Frame<'_> {
        fn linear_len(&self) -> Option<u32> {
            Some(self.0.len() as u32)
        }

        fn read_head(&self, dst: &mut [u8]) -> Result<(), i64> {
            dst.copy_from_slice(&self.0[..dst.len()]);
            Ok(())
        }
    }

    struct Exec<'a> {
        key: Option<u32>,
        attr: Option<NlAttrHeader>,
        payload: [u8; 8],
        packet: Option<&'a [u8]>,
        ctx: ExecutionContextId,
    }

    impl<'a> Exec<'a> {
        fn new(action: u16, recirc_id: u32, packet: &'a [u8]) -> Self {
            Self {
                key: Some(recirc_id),
                attr: Some(NlAttrHeader {
                    nla_len: 8,
                    nla_type: action,
                }),
                payload: [0; 8],
                packet: Some(packet),
                ctx: ExecutionContextId {
                    process: 100,
                    thread: 101,
                },
            }
        }

        fn with_port(mut self, port: u32) -> Self {
            self.payload[..4].copy_from_slice(&port.to_ne_bytes());
            self
        }
    }

    impl<'a> ActionProbe for Exec<'a> {
        type FlowKey = u32;
        type Attr = NlAttrHeader;
        type Packet = Frame<'a>;

        fn flow_key(&self) -> Option<u32> {
            self.key
        }

        fn action_attr(&self) -> Option<NlAttrHeader> {
            self.attr
        }

        fn recirc_id(&self, key: u32) -> u32 {
            key
        }

        fn attr_header(&self, attr: NlAttrHeader) -> Option<NlAttrHeader> {
            Some(attr)
        }

        fn attr_payload_u32(&self, _attr: NlAttrHeader, offset: usize) -> Option<u32> {
            let bytes = self.payload.get(offset..offset + 4)?;
            Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }

        fn packet(&self) -> Option<Frame<'a>> {
            self.packet.map(Frame)
        }

        fn context(&self) -> ExecutionContextId {
            self.ctx
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Emitted {
        action: Option<ActionRecord>,
        track: Option<TrackingRecord>,
        output: Option<OutputRecord>,
        count: usize,
    }

    fn emitted(raw: &RawEvent) -> Emitted {
        let mut out = Emitted::default();
        for section in Sections::new(raw.sections()) {
            let section = section.unwrap();
            out.count += 1;
            out.action = out.action.or(section.parse());
            out.track = out.track.or(section.parse());
            out.output = out.output.or(section.parse());
        }
        out
    }

    fn in_flight(ctx: ExecutionContextId) -> InFlightSlots<16> {
        let mut slots = InFlightSlots::new();
        slots.insert(ctx);
        slots
    }

    fn nothing_in_flight() -> InFlightSlots<16> {
        InFlightSlots::new()
    }

    /// Run the hook and return what a consumer would see.
    fn run<T: InFlightTracker>(
        probe: &Exec,
        tracker: &T,
        matches: bool,
    ) -> (Result<ActionVerdict, HookError>, Emitted) {
        let mut raw = RawEvent::zeroed();
        let mut scratch = PacketBuffer::zeroed();
        let mut event = StagedEvent::new(&mut raw, ALL_CATEGORIES);

        let verdict = trace_action(probe, tracker, Some(&mut scratch), || matches, &mut event);
        let seen = match verdict {
            Ok(ActionVerdict {
                outcome: Outcome::Emitted,
                ..
            }) => emitted(event.commit()),
            _ => Emitted::default(),
        };
        (verdict, seen)
    }

    #[test]
    fn test_tracked_output() {
        let packet = [0x42u8; 80];
        let probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 9, &packet).with_port(5);
        let queue_id = hash_packet(&mut PacketBuffer::zeroed(), &Frame(&packet)).unwrap();

        let (verdict, seen) = run(&probe, &in_flight(probe.ctx), false);
        assert_eq!(
            verdict,
            Ok(ActionVerdict {
                outcome: Outcome::Emitted,
                correlation: Correlation::Tracked(queue_id),
                dropped_sections: 0,
            })
        );
        assert_eq!(
            seen,
            Emitted {
                action: Some(ActionRecord {
                    action_type: OVS_ACTION_ATTR_OUTPUT,
                    recirc_id: 9,
                }),
                track: Some(TrackingRecord { queue_id }),
                output: Some(OutputRecord { port: 5 }),
                count: 3,
            }
        );
    }

    #[test]
    fn test_untracked_unmatched_is_discarded() {
        let packet = [0x42u8; 80];
        let probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 9, &packet).with_port(5);

        let (verdict, seen) = run(&probe, &nothing_in_flight(), false);
        assert_eq!(verdict.unwrap().outcome, Outcome::Discarded);
        assert_eq!(seen.count, 0);
    }

    #[test]
    fn test_untracked_matched_is_kept() {
        let packet = [0x42u8; 80];
        let probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 0, &packet).with_port(2);

        let (verdict, seen) = run(&probe, &nothing_in_flight(), true);
        let verdict = verdict.unwrap();
        assert_eq!(verdict.outcome, Outcome::Emitted);
        assert_eq!(verdict.correlation, Correlation::NotInFlight);
        assert_eq!(seen.track, None);
        assert_eq!(seen.output, Some(OutputRecord { port: 2 }));
        assert_eq!(seen.count, 2);
    }

    #[test]
    fn test_non_output_has_no_output_section() {
        let packet = [0x17u8; 64];
        let probe = Exec::new(OVS_ACTION_ATTR_RECIRC, 3, &packet).with_port(5);

        for (tracked, matches) in [(true, false), (true, true), (false, true)] {
            let (verdict, seen) = if tracked {
                run(&probe, &in_flight(probe.ctx), matches)
            } else {
                run(&probe, &nothing_in_flight(), matches)
            };
            assert_eq!(verdict.unwrap().outcome, Outcome::Emitted);
            assert_eq!(seen.output, None);
            assert_eq!(
                seen.action,
                Some(ActionRecord {
                    action_type: OVS_ACTION_ATTR_RECIRC as u8,
                    recirc_id: 3,
                })
            );
        }
    }

    #[test]
    fn test_attr_flags_are_masked() {
        let packet = [0u8; 64];
        let probe = Exec::new(NLA_F_NESTED | OVS_ACTION_ATTR_RECIRC, 1, &packet);

        let (_, seen) = run(&probe, &nothing_in_flight(), true);
        assert_eq!(
            seen.action.map(|a| a.action_type),
            Some(OVS_ACTION_ATTR_RECIRC as u8)
        );
    }

    #[test]
    fn test_fingerprint_failure_is_ineligible() {
        let packet = [0u8; 64];
        let mut probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 1, &packet);
        probe.packet = None;

        let (verdict, seen) = run(&probe, &in_flight(probe.ctx), false);
        let verdict = verdict.unwrap();
        assert_eq!(verdict.outcome, Outcome::Discarded);
        assert_eq!(verdict.correlation, Correlation::NoFingerprint);
        assert_eq!(seen.count, 0);

        // Kept through the predicate, without a tracking section.
        let (verdict, seen) = run(&probe, &in_flight(probe.ctx), true);
        assert_eq!(verdict.unwrap().outcome, Outcome::Emitted);
        assert_eq!(seen.track, None);
        assert!(seen.action.is_some());
    }

    #[test]
    fn test_missing_scratch_is_ineligible() {
        let packet = [1u8; 64];
        let probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 1, &packet);
        let tracker = in_flight(probe.ctx);

        let mut raw = RawEvent::zeroed();
        let mut event = StagedEvent::new(&mut raw, ALL_CATEGORIES);
        let verdict = trace_action(&probe, &tracker, None, || false, &mut event).unwrap();
        assert_eq!(verdict.correlation, Correlation::NoFingerprint);
        assert_eq!(verdict.outcome, Outcome::Discarded);
    }

    #[test]
    fn test_other_task_in_flight() {
        let packet = [1u8; 64];
        let probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 1, &packet);
        let tracker = in_flight(ExecutionContextId {
            process: 100,
            thread: 102,
        });

        let (verdict, _) = run(&probe, &tracker, false);
        assert_eq!(verdict.unwrap().correlation, Correlation::NotInFlight);
    }

    #[test]
    fn test_predicate_only_evaluated_when_untracked() {
        let packet = [1u8; 64];
        let probe = Exec::new(OVS_ACTION_ATTR_RECIRC, 1, &packet);
        let tracker = in_flight(probe.ctx);
        let calls = Cell::new(0);

        let mut raw = RawEvent::zeroed();
        let mut scratch = PacketBuffer::zeroed();
        let mut event = StagedEvent::new(&mut raw, ALL_CATEGORIES);
        trace_action(
            &probe,
            &tracker,
            Some(&mut scratch),
            || {
                calls.set(calls.get() + 1);
                false
            },
            &mut event,
        )
        .unwrap();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_missing_inputs() {
        let packet = [1u8; 64];
        let mut probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 1, &packet);
        probe.key = None;
        let (verdict, seen) = run(&probe, &in_flight(probe.ctx), true);
        assert_eq!(verdict, Err(HookError::MissingInput));
        assert_eq!(seen.count, 0);

        let mut probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 1, &packet);
        probe.attr = None;
        let (verdict, _) = run(&probe, &in_flight(probe.ctx), true);
        assert_eq!(verdict, Err(HookError::MissingInput));
    }

    #[test]
    fn test_optional_sections_on_full_event() {
        let packet = [9u8; 64];
        let probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 4, &packet).with_port(5);
        let tracker = in_flight(probe.ctx);

        // Leave room for the action record only.
        let mut raw = RawEvent::zeroed();
        let mut scratch = PacketBuffer::zeroed();
        let mut event = StagedEvent::new(&mut raw, ALL_CATEGORIES);
        let filler = RAW_EVENT_DATA_SIZE - 2 * SECTION_HEADER_SIZE - 5;
        event.reserve(OWNER_COMMON, COMMON_KIND_CORE, filler).unwrap();

        let verdict = trace_action(&probe, &tracker, Some(&mut scratch), || false, &mut event).unwrap();
        assert_eq!(verdict.outcome, Outcome::Emitted);
        assert!(matches!(verdict.correlation, Correlation::Unrecorded(_)));
        assert_eq!(verdict.dropped_sections, 2);

        let seen = emitted(event.commit());
        assert!(seen.action.is_some());
        assert_eq!(seen.track, None);
        assert_eq!(seen.output, None);
    }

    #[test]
    fn test_output_dropped_after_tracking_section() {
        let packet = [3u8; 64];
        let probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 2, &packet).with_port(7);
        let tracker = in_flight(probe.ctx);
        let queue_id = hash_packet(&mut PacketBuffer::zeroed(), &Frame(&packet)).unwrap();

        // Room for the action and tracking records, not the output one.
        let mut raw = RawEvent::zeroed();
        let mut scratch = PacketBuffer::zeroed();
        let mut event = StagedEvent::new(&mut raw, ALL_CATEGORIES);
        let filler = RAW_EVENT_DATA_SIZE
            - 3 * SECTION_HEADER_SIZE
            - core::mem::size_of::<ActionRecord>()
            - core::mem::size_of::<TrackingRecord>();
        event.reserve(OWNER_COMMON, COMMON_KIND_CORE, filler).unwrap();

        let verdict = trace_action(&probe, &tracker, Some(&mut scratch), || false, &mut event).unwrap();
        assert_eq!(
            verdict,
            ActionVerdict {
                outcome: Outcome::Emitted,
                correlation: Correlation::Tracked(queue_id),
                dropped_sections: 1,
            }
        );

        let seen = emitted(event.commit());
        assert_eq!(seen.count, 3);
        assert_eq!(seen.track, Some(TrackingRecord { queue_id }));
        assert_eq!(seen.output, None);
    }

    #[test]
    fn test_action_reservation_failure_emits_nothing() {
        let packet = [9u8; 64];
        let probe = Exec::new(OVS_ACTION_ATTR_OUTPUT as u16, 4, &packet);
        let tracker = in_flight(probe.ctx);

        let mut raw = RawEvent::zeroed();
        let mut event = StagedEvent::new(&mut raw, 1 << OWNER_COMMON);
        let verdict = trace_action(&probe, &tracker, None, || true, &mut event);
        assert_eq!(verdict, Err(HookError::ReservationExhausted));
    }
}
