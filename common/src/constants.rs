//! Shared constants for the OVS datapath probes
//!
//! These constants are used by both kernel and userspace programs
//! and are part of the wire contract with the event decoder.

// ============================================================================
// BPF Map Sizes
// ============================================================================

/// Maximum number of tasks with an upcall or execute command in flight
pub const MAX_INFLIGHT: u32 = 8192;

/// Maximum number of pending `queue_userspace_packet` calls
pub const MAX_PENDING_UPCALLS: u32 = 8192;

// ============================================================================
// Raw Event Geometry
// ============================================================================

/// Size of a whole raw event, header included
pub const RAW_EVENT_SIZE: usize = 128;

/// Bytes available for sections in a raw event
pub const RAW_EVENT_DATA_SIZE: usize = RAW_EVENT_SIZE - 2;

/// Size of a section header (owner, kind, size)
pub const SECTION_HEADER_SIZE: usize = 4;

// ============================================================================
// Section Owners (event categories)
// ============================================================================

/// Sections shared by every probe (timestamp, symbol)
pub const OWNER_COMMON: u8 = 1;

/// Sections produced by the OVS datapath probes
pub const OWNER_OVS: u8 = 7;

/// Category mask with every owner enabled
pub const ALL_CATEGORIES: u64 = u64::MAX;

// ============================================================================
// Section Kinds
// ============================================================================

/// COMMON: timestamp and caller address
pub const COMMON_KIND_CORE: u8 = 1;

/// OVS: upcall enqueue completion (kretprobe:queue_userspace_packet)
pub const OVS_KIND_UPCALL_ENQUEUE: u8 = 1;

/// OVS: action execution (tracepoint:openvswitch:ovs_do_execute_action)
pub const OVS_KIND_ACTION_EXEC: u8 = 5;

/// OVS: action execution tracking (packet fingerprint)
pub const OVS_KIND_ACTION_TRACK: u8 = 6;

/// OVS: OUTPUT action specific data
pub const OVS_KIND_ACTION_OUTPUT: u8 = 7;

// ============================================================================
// Netlink / OVS ABI (uapi/linux/netlink.h, uapi/linux/openvswitch.h)
// ============================================================================

/// Size of a netlink attribute header, already aligned
pub const NLA_HDRLEN: usize = 4;

/// Attribute type flag: nested attribute
pub const NLA_F_NESTED: u16 = 1 << 15;

/// Attribute type flag: payload in network byte order
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;

/// Mask extracting the attribute type from `nla_type`
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// `OVS_ACTION_ATTR_OUTPUT`
pub const OVS_ACTION_ATTR_OUTPUT: u8 = 1;

/// Offset of the port number inside the OUTPUT attribute payload
pub const OUTPUT_PORT_OFFSET: usize = 0;

// ============================================================================
// Packet Fingerprint
// ============================================================================

/// Maximum number of packet bytes fed to the fingerprint
pub const PACKET_HASH_SPAN: usize = 150;

/// Seed of the fingerprint hash
pub const PACKET_HASH_SEED: u32 = 0;

// ============================================================================
// Coarse Packet Filter Modes
// ============================================================================

/// Only actions correlated with an in-flight command are reported
pub const FILTER_MODE_TRACKED_ONLY: u8 = 0;

/// Every action is reported
pub const FILTER_MODE_ALL: u8 = 1;

/// Untracked actions are reported when the packet's L3 protocol matches
pub const FILTER_MODE_ETHERTYPE: u8 = 2;

// ============================================================================
// Statistics Counter Indices (for STATS map)
// ============================================================================

/// Total number of probe firings
pub const STAT_FIRINGS: u32 = 0;

/// Number of upcall enqueue events sent to userspace
pub const STAT_UPCALLS_EMITTED: u32 = 1;

/// Number of action events sent to userspace
pub const STAT_ACTIONS_EMITTED: u32 = 2;

/// Number of action firings dropped by the keep/discard decision
pub const STAT_ACTIONS_DISCARDED: u32 = 3;

/// Number of firings aborted on a missing probe argument
pub const STAT_MISSING_INPUT: u32 = 4;

/// Number of section reservations that failed
pub const STAT_RESERVATION_FAILED: u32 = 5;

/// Number of actions carrying a tracking section
pub const STAT_TRACKED_ACTIONS: u32 = 6;

/// Number of in-flight actions whose packet could not be fingerprinted
pub const STAT_FINGERPRINT_FAILED: u32 = 7;

/// Number of caller addresses computed with the trapped-IP fallback
pub const STAT_FALLBACK_ADDRESS: u32 = 8;

/// Number of firings that found no per-CPU scratch slot
pub const STAT_SCRATCH_UNAVAILABLE: u32 = 9;

/// Total number of statistics counters
pub const MAX_STATS: u32 = 10;
