//! Error taxonomy for the node's external surface.

use std::collections::TryReserveError;
use std::error::Error;
use std::fmt;

/// Status reported by the node's lifecycle and control entry points.
///
/// Variants carry no payload; the detail behind a failure is emitted as a
/// `tracing` event at the failing site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    /// A pin's rate, encoding, channel width, or cycle sizing cannot be
    /// negotiated.
    FormatUnsupported,
    /// Attached pins do not form exactly one reference source, one
    /// microphone source, and one output sink.
    RoleConflict,
    /// A reconfiguration carried contradictory or out-of-bounds channel
    /// counts.
    ChannelCountMismatch,
    /// A control write used an encoding the node does not accept, or its
    /// payload cannot be interpreted.
    UnsupportedControlType,
    /// Memory for scratch or the working arena could not be obtained.
    AllocationFailure,
    /// The algorithm capability returned a non-zero status.
    AlgorithmFailure,
    /// The call is not legal in the node's current lifecycle state.
    BadState,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            NodeError::FormatUnsupported => "stream format not supported on an attached pin",
            NodeError::RoleConflict => "attached pins do not match the required roles",
            NodeError::ChannelCountMismatch => "reconfigured channel counts are inconsistent",
            NodeError::UnsupportedControlType => "control payload type not supported",
            NodeError::AllocationFailure => "out of memory",
            NodeError::AlgorithmFailure => "algorithm call failed",
            NodeError::BadState => "call not permitted in the current lifecycle state",
        };
        f.write_str(message)
    }
}

impl Error for NodeError {}

impl From<TryReserveError> for NodeError {
    fn from(_: TryReserveError) -> Self {
        NodeError::AllocationFailure
    }
}
