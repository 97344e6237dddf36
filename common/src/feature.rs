//! Caller address resolution for kprobes
//!
//! The proper way to get the probed function address from a kprobe is the
//! `bpf_get_func_ip` helper, introduced in Linux v5.15. On older kernels the
//! address is derived from the trapped instruction pointer, which points right
//! after the breakpoint instruction.
//!
//! That fallback is wrong on kernels built with `CONFIG_X86_KERNEL_IBT=y`:
//! indirect call landing sites start with an extra `endbr64` (or `nop4`),
//! moving the function address 4 bytes away from the computed one. IBT support
//! in `bpf_get_func_ip` and the helper itself landed in different releases
//! without a Fixes: tag, so some stable kernels with IBT and no helper will
//! report shifted addresses. There is no generic way to correct this.

/// How caller addresses are computed on the running kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallerAddressMode {
    /// The kernel provides `bpf_get_func_ip`.
    Native,
    /// Trapped instruction pointer minus the breakpoint instruction.
    TrappedIp,
}

/// Register state of a probe, as needed to compute its caller address.
pub trait ProbeRegisters {
    /// Address returned by the kernel's native helper. Only called in
    /// [`CallerAddressMode::Native`].
    fn native_caller_address(&self) -> u64;

    /// Instruction pointer at trap time.
    fn instruction_pointer(&self) -> u64;
}

/// Capability of the running kernel, resolved once and then reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureProbe {
    mode: CallerAddressMode,
}

impl FeatureProbe {
    /// Size of the breakpoint instruction the trapped IP points after.
    pub const BREAKPOINT_SIZE: u64 = 1;

    #[inline(always)]
    pub const fn new(has_native_helper: bool) -> Self {
        Self {
            mode: if has_native_helper {
                CallerAddressMode::Native
            } else {
                CallerAddressMode::TrappedIp
            },
        }
    }

    /// Run the capability query and keep its answer.
    #[inline(always)]
    pub fn resolve<F: FnOnce() -> bool>(query: F) -> Self {
        Self::new(query())
    }

    #[inline(always)]
    pub const fn mode(&self) -> CallerAddressMode {
        self.mode
    }

    /// Best-effort address of the probed function.
    #[inline(always)]
    pub fn caller_address<R: ProbeRegisters + ?Sized>(&self, regs: &R) -> u64 {
        match self.mode {
            CallerAddressMode::Native => regs.native_caller_address(),
            CallerAddressMode::TrappedIp => {
                regs.instruction_pointer().wrapping_sub(Self::BREAKPOINT_SIZE)
            }
        }
    }
}
