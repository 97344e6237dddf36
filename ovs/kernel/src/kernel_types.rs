//! Kernel structure access for the OVS probes
//!
//! aya programs have no CO-RE relocations, so fields are read at offsets
//! taken from the `LAYOUT` global, which the loader fills from the running
//! kernel. Every read goes through `bpf_probe_read_kernel` and a failed read
//! degrades to a missing value, never to a fault.

use aya_ebpf::helpers::{bpf_probe_read_kernel, bpf_probe_read_kernel_buf};
use ovs_trace_common::{
    constants::*, types::*, ActionProbe, InFlightTracker, NlAttrHeader, PacketSource, UpcallProbe,
};

use crate::maps::INFLIGHT_EXEC_CMD;

/// Read a `T` at `offset` bytes from `base`.
#[inline(always)]
fn read_field<T>(base: *const u8, offset: u32) -> Option<T> {
    if base.is_null() {
        return None;
    }
    unsafe { bpf_probe_read_kernel(base.add(offset as usize) as *const T).ok() }
}

#[inline(always)]
fn non_null(ptr: u64) -> Option<*const u8> {
    if ptr == 0 {
        None
    } else {
        Some(ptr as *const u8)
    }
}

/// `struct sk_buff *`
#[derive(Clone, Copy)]
pub struct SkBuff {
    ptr: *const u8,
    layout: KernelLayout,
}

impl SkBuff {
    #[inline(always)]
    pub fn new(ptr: u64, layout: KernelLayout) -> Option<Self> {
        non_null(ptr).map(|ptr| Self { ptr, layout })
    }

    /// `skb->protocol`, network byte order.
    #[inline(always)]
    pub fn protocol(&self) -> Option<u16> {
        read_field::<u16>(self.ptr, self.layout.skb_protocol)
    }
}

impl PacketSource for SkBuff {
    #[inline(always)]
    fn linear_len(&self) -> Option<u32> {
        let len = read_field::<u32>(self.ptr, self.layout.skb_len)?;
        let data_len = read_field::<u32>(self.ptr, self.layout.skb_data_len)?;
        len.checked_sub(data_len)
    }

    #[inline(always)]
    fn read_head(&self, dst: &mut [u8]) -> Result<(), i64> {
        let data = read_field::<*const u8>(self.ptr, self.layout.skb_data).ok_or(-1i64)?;
        if data.is_null() {
            return Err(-1);
        }
        unsafe { bpf_probe_read_kernel_buf(data, dst) }.map_err(|e| e as i64)
    }
}

/// Arguments of the `ovs_do_execute_action` tracepoint:
/// `(struct datapath *, struct sk_buff *, struct sw_flow_key *,
///   const struct nlattr *, int)`.
pub struct ExecuteAction {
    pub skb: u64,
    pub key: u64,
    pub attr: u64,
    pub ctx: ExecutionContextId,
    pub layout: KernelLayout,
}

impl ExecuteAction {
    /// Protocol of the packet the action runs on, for the coarse filter.
    #[inline(always)]
    pub fn packet_protocol(&self) -> Option<u16> {
        SkBuff::new(self.skb, self.layout)?.protocol()
    }
}

impl ActionProbe for ExecuteAction {
    type FlowKey = *const u8;
    type Attr = *const u8;
    type Packet = SkBuff;

    #[inline(always)]
    fn flow_key(&self) -> Option<*const u8> {
        non_null(self.key)
    }

    #[inline(always)]
    fn action_attr(&self) -> Option<*const u8> {
        non_null(self.attr)
    }

    #[inline(always)]
    fn recirc_id(&self, key: *const u8) -> u32 {
        read_field::<u32>(key, self.layout.flow_key_recirc_id).unwrap_or_default()
    }

    #[inline(always)]
    fn attr_header(&self, attr: *const u8) -> Option<NlAttrHeader> {
        read_field::<NlAttrHeader>(attr, 0)
    }

    #[inline(always)]
    fn attr_payload_u32(&self, attr: *const u8, offset: usize) -> Option<u32> {
        read_field::<u32>(attr, (NLA_HDRLEN + offset) as u32)
    }

    #[inline(always)]
    fn packet(&self) -> Option<SkBuff> {
        SkBuff::new(self.skb, self.layout)
    }

    #[inline(always)]
    fn context(&self) -> ExecutionContextId {
        self.ctx
    }
}

/// A `queue_userspace_packet` call, at return time.
pub struct UpcallEnqueue {
    pub upcall: u64,
    pub ret: i32,
    pub layout: KernelLayout,
}

impl UpcallProbe for UpcallEnqueue {
    type Descriptor = *const u8;

    #[inline(always)]
    fn descriptor(&self) -> Option<*const u8> {
        non_null(self.upcall)
    }

    #[inline(always)]
    fn command(&self, upcall: *const u8) -> u8 {
        read_field::<u8>(upcall, self.layout.upcall_cmd).unwrap_or_default()
    }

    #[inline(always)]
    fn port(&self, upcall: *const u8) -> u32 {
        read_field::<u32>(upcall, self.layout.upcall_portid).unwrap_or_default()
    }

    #[inline(always)]
    fn return_value(&self) -> i32 {
        self.ret
    }
}

/// The pinned in-flight map.
pub struct InflightExecMap;

impl InFlightTracker for InflightExecMap {
    #[inline(always)]
    fn is_in_flight(&self, ctx: ExecutionContextId) -> bool {
        unsafe { INFLIGHT_EXEC_CMD.get(&ctx.as_key()) }.is_some()
    }
}
