//! Raw event decoding
//!
//! Turns the section stream of a [`RawEvent`] into a [`TraceEvent`].

use crate::types::{EventKind, RawEvent, TraceEvent};
use anyhow::{bail, Result};
use log::debug;
use ovs_trace_common::{
    types::{ActionRecord, CommonRecord, OutputRecord, TrackingRecord, UpcallRecord},
    Sections,
};

/// `enum ovs_action_attr`
const ACTION_NAMES: [&str; 24] = [
    "unspecified",
    "output",
    "userspace",
    "set",
    "push_vlan",
    "pop_vlan",
    "sample",
    "recirc",
    "hash",
    "push_mpls",
    "pop_mpls",
    "set_masked",
    "ct",
    "trunc",
    "push_eth",
    "pop_eth",
    "ct_clear",
    "push_nsh",
    "pop_nsh",
    "meter",
    "clone",
    "check_pkt_len",
    "add_mpls",
    "dec_ttl",
];

/// `OVS_PACKET_CMD_*`
const COMMAND_NAMES: [&str; 4] = ["unspec", "miss", "action", "execute"];

/// Name of an `enum ovs_action_attr` value
pub fn action_name(action: u8) -> String {
    match ACTION_NAMES.get(action as usize) {
        Some(name) => name.to_string(),
        None => format!("unknown({})", action),
    }
}

/// Name of an `OVS_PACKET_CMD_*` value
pub fn command_name(command: u8) -> String {
    match COMMAND_NAMES.get(command as usize) {
        Some(name) => name.to_string(),
        None => format!("unknown({})", command),
    }
}

/// Decode a raw event
///
/// Sections this decoder does not know are skipped. A section running past
/// the end of the event, or an event holding OVS sections that do not fit
/// together, is an error.
pub fn decode_event(raw: &RawEvent) -> Result<TraceEvent> {
    let mut common = None;
    let mut upcall = None;
    let mut action = None;
    let mut tracking = None;
    let mut output = None;

    for section in Sections::new(raw.sections()) {
        let section = match section {
            Ok(section) => section,
            Err(truncated) => bail!("Truncated section at offset {}", truncated.offset),
        };

        if let Some(record) = section.parse::<CommonRecord>() {
            common = Some(record);
        } else if let Some(record) = section.parse::<UpcallRecord>() {
            upcall = Some(record);
        } else if let Some(record) = section.parse::<ActionRecord>() {
            action = Some(record);
        } else if let Some(record) = section.parse::<TrackingRecord>() {
            tracking = Some(record);
        } else if let Some(record) = section.parse::<OutputRecord>() {
            output = Some(record);
        } else {
            debug!(
                "Skipping unknown section owner={} kind={} size={}",
                section.owner,
                section.kind,
                section.payload.len()
            );
        }
    }

    let kind = match (upcall, action) {
        (Some(_), Some(_)) => bail!("Event holds both an upcall and an action"),
        (Some(upcall), None) => EventKind::UpcallEnqueue {
            command: command_name(upcall.command),
            command_id: upcall.command,
            port: upcall.port,
            return_code: upcall.return_code,
        },
        (None, Some(exec)) => EventKind::ActionExec {
            action: action_name(exec.action_type),
            action_id: exec.action_type,
            recirc_id: exec.recirc_id,
            queue_id: tracking.map(|t| t.queue_id),
            output_port: output.map(|o| o.port),
        },
        (None, None) => {
            if tracking.is_some() || output.is_some() {
                bail!("Action data without an action section");
            }
            EventKind::Unknown
        }
    };

    Ok(TraceEvent {
        timestamp_ns: common.map(|c| c.timestamp),
        symbol: common.map(|c| c.symbol),
        kind,
    })
}

/// Decode a raw event from perf buffer bytes
pub fn decode_bytes(bytes: &[u8]) -> Result<TraceEvent> {
    if bytes.len() < std::mem::size_of::<RawEvent>() {
        bail!(
            "Short event: {} bytes, expected {}",
            bytes.len(),
            std::mem::size_of::<RawEvent>()
        );
    }
    // SAFETY: `RawEvent` is plain data valid for any bit pattern and the
    // buffer holds at least `size_of::<RawEvent>()` bytes.
    let raw = unsafe { (bytes.as_ptr() as *const RawEvent).read_unaligned() };
    decode_event(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovs_trace_common::{
        constants::*, reserve_section, trace_action, trace_upcall_enqueue, ActionProbe,
        EventAssembler, NlAttrHeader, PacketSource, StagedEvent, UpcallProbe,
    };
    use ovs_trace_common::types::ExecutionContextId;

    struct Frame(Vec<u8>);

    impl PacketSource for Frame {
        fn linear_len(&self) -> Option<u32> {
            Some(self.0.len() as u32)
        }

        fn read_head(&self, dst: &mut [u8]) -> Result<(), i64> {
            dst.copy_from_slice(&self.0[..dst.len()]);
            Ok(())
        }
    }

    struct Exec {
        action: u16,
        port: u32,
        packet: Vec<u8>,
    }

    impl ActionProbe for Exec {
        type FlowKey = ();
        type Attr = ();
        type Packet = Frame;

        fn flow_key(&self) -> Option<()> {
            Some(())
        }

        fn action_attr(&self) -> Option<()> {
            Some(())
        }

        fn recirc_id(&self, _key: ()) -> u32 {
            3
        }

        fn attr_header(&self, _attr: ()) -> Option<NlAttrHeader> {
            Some(NlAttrHeader {
                nla_len: 8,
                nla_type: self.action,
            })
        }

        fn attr_payload_u32(&self, _attr: (), _offset: usize) -> Option<u32> {
            Some(self.port)
        }

        fn packet(&self) -> Option<Frame> {
            Some(Frame(self.packet.clone()))
        }

        fn context(&self) -> ExecutionContextId {
            ExecutionContextId::from_pid_tgid(0x0000_0010_0000_0011)
        }
    }

    fn always(_ctx: ExecutionContextId) -> bool {
        true
    }

    struct Enqueue;

    impl UpcallProbe for Enqueue {
        type Descriptor = ();

        fn descriptor(&self) -> Option<()> {
            Some(())
        }

        fn command(&self, _upcall: ()) -> u8 {
            3
        }

        fn port(&self, _upcall: ()) -> u32 {
            7
        }

        fn return_value(&self) -> i32 {
            0
        }
    }

    fn with_common(raw: &mut RawEvent, categories: u64) -> StagedEvent<'_> {
        let mut event = StagedEvent::new(raw, categories);
        if let Some(common) = reserve_section::<CommonRecord, _>(&mut event) {
            common.timestamp = 1_000;
            common.symbol = 0xffff_ffff_c0de_0000;
        }
        event
    }

    #[test]
    fn test_decode_upcall() {
        let mut raw = RawEvent::zeroed();
        let mut event = with_common(&mut raw, ALL_CATEGORIES);
        trace_upcall_enqueue(&Enqueue, &mut event).unwrap();
        let raw = *event.commit();

        let decoded = decode_event(&raw).unwrap();
        assert_eq!(decoded.timestamp_ns, Some(1_000));
        assert_eq!(decoded.symbol, Some(0xffff_ffff_c0de_0000));
        assert_eq!(
            decoded.kind,
            EventKind::UpcallEnqueue {
                command: "execute".to_string(),
                command_id: 3,
                port: 7,
                return_code: 0,
            }
        );
    }

    #[test]
    fn test_decode_tracked_output() {
        let exec = Exec {
            action: OVS_ACTION_ATTR_OUTPUT as u16,
            port: 2,
            packet: (0..64).collect(),
        };
        let mut scratch = ovs_trace_common::types::PacketBuffer::zeroed();

        let mut raw = RawEvent::zeroed();
        let mut event = with_common(&mut raw, ALL_CATEGORIES);
        let verdict = trace_action(&exec, &always, Some(&mut scratch), || false, &mut event).unwrap();
        let raw = *event.commit();

        let expected_queue = match verdict.correlation {
            ovs_trace_common::Correlation::Tracked(id) => id,
            other => panic!("unexpected correlation {:?}", other),
        };

        let decoded = decode_event(&raw).unwrap();
        assert_eq!(
            decoded.kind,
            EventKind::ActionExec {
                action: "output".to_string(),
                action_id: 1,
                recirc_id: 3,
                queue_id: Some(expected_queue),
                output_port: Some(2),
            }
        );
    }

    #[test]
    fn test_decode_without_common() {
        let exec = Exec {
            action: 7,
            port: 0,
            packet: vec![0xaa; 20],
        };
        let mut scratch = ovs_trace_common::types::PacketBuffer::zeroed();

        let mut raw = RawEvent::zeroed();
        let mut event = with_common(&mut raw, ALL_CATEGORIES & !(1 << OWNER_COMMON));
        trace_action(&exec, &always, Some(&mut scratch), || false, &mut event).unwrap();
        let raw = *event.commit();

        let decoded = decode_event(&raw).unwrap();
        assert_eq!(decoded.timestamp_ns, None);
        assert_eq!(decoded.symbol, None);
        match decoded.kind {
            EventKind::ActionExec {
                action, output_port, ..
            } => {
                assert_eq!(action, "recirc");
                assert_eq!(output_port, None);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unknown_sections_are_skipped() {
        let mut raw = RawEvent::zeroed();
        let mut event = with_common(&mut raw, ALL_CATEGORIES);
        event.reserve(42, 1, 6).unwrap().copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        let raw = *event.commit();

        let decoded = decode_event(&raw).unwrap();
        assert_eq!(decoded.kind, EventKind::Unknown);
        assert_eq!(decoded.timestamp_ns, Some(1_000));
    }

    #[test]
    fn test_truncated_section_is_an_error() {
        let mut raw = RawEvent::zeroed();
        raw.data[..4].copy_from_slice(&[OWNER_OVS, OVS_KIND_ACTION_EXEC, 0, 0]);
        raw.data[2..4].copy_from_slice(&200u16.to_ne_bytes());
        raw.size = 10;

        assert!(decode_event(&raw).is_err());
    }

    #[test]
    fn test_orphan_action_data_is_an_error() {
        let mut raw = RawEvent::zeroed();
        let mut event = StagedEvent::new(&mut raw, ALL_CATEGORIES);
        reserve_section::<OutputRecord, _>(&mut event).unwrap().port = 4;
        let raw = *event.commit();

        assert!(decode_event(&raw).is_err());
    }

    #[test]
    fn test_decode_bytes() {
        let mut raw = RawEvent::zeroed();
        let mut event = with_common(&mut raw, ALL_CATEGORIES);
        trace_upcall_enqueue(&Enqueue, &mut event).unwrap();
        let raw = *event.commit();

        let bytes = unsafe {
            std::slice::from_raw_parts(
                &raw as *const RawEvent as *const u8,
                std::mem::size_of::<RawEvent>(),
            )
        };
        assert!(decode_bytes(bytes).is_ok());
        assert!(decode_bytes(&bytes[..16]).is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(action_name(0), "unspecified");
        assert_eq!(action_name(12), "ct");
        assert_eq!(action_name(23), "dec_ttl");
        assert_eq!(action_name(24), "unknown(24)");
        assert_eq!(command_name(1), "miss");
        assert_eq!(command_name(9), "unknown(9)");
    }
}
