//! Hook results
//!
//! None of these ever leave a probe: they only decide whether the staged
//! event is sent and which health counter is bumped.

/// What happened to a probe firing that ran to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The staged sections must be sent.
    Emitted,
    /// Nothing must reach userspace for this firing.
    Discarded,
}

/// Why a probe firing produced nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookError {
    /// A required probe argument was absent.
    MissingInput,
    /// The mandatory first section could not be reserved.
    ReservationExhausted,
}
