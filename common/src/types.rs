//! Shared data structures between kernel and userspace
//!
//! Records are `repr(C, packed)`: their field order and width is the wire
//! contract with the userspace decoder. Load-time configuration structures
//! are plain `repr(C)` with explicit padding.

use crate::constants::*;

/// Identity of the kernel task running when a probe fires.
///
/// Encoded by the kernel as `pid_tgid`: the process id (tgid) in the upper
/// 32 bits, the thread id (pid) in the lower ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExecutionContextId {
    /// Process id (kernel tgid)
    pub process: u32,
    /// Thread id (kernel pid)
    pub thread: u32,
}

impl ExecutionContextId {
    #[inline(always)]
    pub const fn from_pid_tgid(pid_tgid: u64) -> Self {
        Self {
            process: (pid_tgid >> 32) as u32,
            thread: pid_tgid as u32,
        }
    }

    /// Key used by the in-flight map.
    #[inline(always)]
    pub const fn as_key(&self) -> u64 {
        ((self.process as u64) << 32) | self.thread as u64
    }
}

/// A record section with a fixed owner and kind.
///
/// # Safety
///
/// Implementors must be `#[repr(C, packed)]` plain data (alignment 1, no
/// padding, every bit pattern valid), so that a zeroed byte region of
/// `size_of::<Self>()` bytes can be viewed as `&mut Self`.
pub unsafe trait Section: Sized {
    const OWNER: u8;
    const KIND: u8;
}

/// Common section: when and where the probe fired.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommonRecord {
    /// `bpf_ktime_get_ns` at probe time
    pub timestamp: u64,
    /// Caller address of the probed function or tracepoint
    pub symbol: u64,
}

/// Upcall enqueue completion (kretprobe:queue_userspace_packet).
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpcallRecord {
    /// Return value of `queue_userspace_packet`
    pub return_code: i32,
    /// Upcall command, one of `OVS_PACKET_CMD_*`
    pub command: u8,
    /// Netlink port id the upcall is sent to
    pub port: u32,
}

/// Datapath action execution.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActionRecord {
    /// Action type, one of `enum ovs_action_attr`
    pub action_type: u8,
    /// Recirculation id of the flow key
    pub recirc_id: u32,
}

/// Correlation of an action with an in-flight userspace command.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackingRecord {
    /// Packet fingerprint
    pub queue_id: u32,
}

/// OUTPUT action data.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputRecord {
    /// Datapath output port
    pub port: u32,
}

unsafe impl Section for CommonRecord {
    const OWNER: u8 = OWNER_COMMON;
    const KIND: u8 = COMMON_KIND_CORE;
}

unsafe impl Section for UpcallRecord {
    const OWNER: u8 = OWNER_OVS;
    const KIND: u8 = OVS_KIND_UPCALL_ENQUEUE;
}

unsafe impl Section for ActionRecord {
    const OWNER: u8 = OWNER_OVS;
    const KIND: u8 = OVS_KIND_ACTION_EXEC;
}

unsafe impl Section for TrackingRecord {
    const OWNER: u8 = OWNER_OVS;
    const KIND: u8 = OVS_KIND_ACTION_TRACK;
}

unsafe impl Section for OutputRecord {
    const OWNER: u8 = OWNER_OVS;
    const KIND: u8 = OVS_KIND_ACTION_OUTPUT;
}

/// Raw event as sent to userspace.
///
/// `data` holds `size` bytes of consecutive sections, each one a
/// `SECTION_HEADER_SIZE` header (owner, kind, payload size) followed by its
/// payload. Bytes past `size` are stale staging data.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawEvent {
    pub size: u16,
    pub data: [u8; RAW_EVENT_DATA_SIZE],
}

impl RawEvent {
    pub const fn zeroed() -> Self {
        Self {
            size: 0,
            data: [0; RAW_EVENT_DATA_SIZE],
        }
    }

    /// Section bytes actually written.
    pub fn sections(&self) -> &[u8] {
        let len = (self.size as usize).min(RAW_EVENT_DATA_SIZE);
        &self.data[..len]
    }
}

/// Scratch storage for the packet bytes being fingerprinted.
#[repr(C)]
pub struct PacketBuffer {
    pub data: [u8; PACKET_HASH_SPAN],
}

impl PacketBuffer {
    pub const fn zeroed() -> Self {
        Self {
            data: [0; PACKET_HASH_SPAN],
        }
    }
}

/// Offsets of the kernel structure fields the probes read.
///
/// The defaults match a x86_64 6.x kernel; the loader can override them
/// with values taken from the running kernel's BTF.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelLayout {
    /// `struct sw_flow_key`, `recirc_id`
    pub flow_key_recirc_id: u32,
    /// `struct dp_upcall_info`, `portid`
    pub upcall_portid: u32,
    /// `struct dp_upcall_info`, `cmd`
    pub upcall_cmd: u32,
    /// `struct sk_buff`, `len`
    pub skb_len: u32,
    /// `struct sk_buff`, `data_len`
    pub skb_data_len: u32,
    /// `struct sk_buff`, `protocol`
    pub skb_protocol: u32,
    /// `struct sk_buff`, `data`
    pub skb_data: u32,
    pub _padding: u32,
}

impl KernelLayout {
    pub const DEFAULT: Self = Self {
        flow_key_recirc_id: 328,
        upcall_portid: 28,
        upcall_cmd: 32,
        skb_len: 112,
        skb_data_len: 116,
        skb_protocol: 180,
        skb_data: 200,
        _padding: 0,
    };
}

/// Coarse packet-matching predicate configuration.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketFilter {
    /// One of the `FILTER_MODE_*` constants
    pub mode: u8,
    pub _padding: u8,
    /// L3 protocol to match in `FILTER_MODE_ETHERTYPE`, network byte order
    pub ethertype: u16,
}

impl PacketFilter {
    pub const TRACKED_ONLY: Self = Self {
        mode: FILTER_MODE_TRACKED_ONLY,
        _padding: 0,
        ethertype: 0,
    };

    pub const ALL: Self = Self {
        mode: FILTER_MODE_ALL,
        _padding: 0,
        ethertype: 0,
    };

    /// Filter on a host byte order ethertype.
    pub const fn for_ethertype(ethertype: u16) -> Self {
        Self {
            mode: FILTER_MODE_ETHERTYPE,
            _padding: 0,
            ethertype: ethertype.to_be(),
        }
    }

    /// Evaluate the predicate against a packet's `skb->protocol`, if known.
    #[inline(always)]
    pub fn matches(&self, protocol: Option<u16>) -> bool {
        match self.mode {
            FILTER_MODE_ALL => true,
            FILTER_MODE_ETHERTYPE => protocol == Some(self.ethertype),
            _ => false,
        }
    }
}

// Compile-time layout checks; any change here breaks the decoder.
const _: () = {
    assert!(core::mem::size_of::<CommonRecord>() == 16);
    assert!(core::mem::size_of::<UpcallRecord>() == 9);
    assert!(core::mem::size_of::<ActionRecord>() == 5);
    assert!(core::mem::size_of::<TrackingRecord>() == 4);
    assert!(core::mem::size_of::<OutputRecord>() == 4);
    assert!(core::mem::size_of::<RawEvent>() == RAW_EVENT_SIZE);
    assert!(core::mem::size_of::<KernelLayout>() % core::mem::align_of::<KernelLayout>() == 0);
    assert!(core::mem::size_of::<PacketFilter>() == 4);
};

// Implement Aya's Pod trait for userspace usage
#[cfg(feature = "userspace")]
mod userspace_impls {
    use super::*;

    // Pod implementations for load-time globals and perf buffer reads
    unsafe impl aya::Pod for RawEvent {}
    unsafe impl aya::Pod for KernelLayout {}
    unsafe impl aya::Pod for PacketFilter {}
}
