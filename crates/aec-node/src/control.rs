//! Seam to the echo-cancellation capability.
//!
//! The algorithm is injected, not linked: the node drives whatever
//! implements [`EchoControl`] and obtains instances through an
//! [`EchoControlFactory`]. Working memory is attached at create and handed
//! back at detach, so one arena can be recycled across instance
//! re-creation without allocating again.

use std::error::Error;
use std::fmt;

use aec_stream::ChannelScratch;

/// Opaque non-zero status returned by a capability call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmError(pub i32);

impl fmt::Display for AlgorithmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "algorithm returned status {}", self.0)
    }
}

impl Error for AlgorithmError {}

/// Stream shape an algorithm instance is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayout {
    pub capture_rate_hz: u32,
    pub capture_input_channels: usize,
    pub capture_output_channels: usize,
    pub reference_rate_hz: u32,
    pub reference_channels: usize,
}

/// One parameter push. A `None` field leaves the algorithm's current value
/// untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParameterUpdate {
    /// Linear gain headroom applied to capture.
    pub mic_gain: Option<f32>,
    /// Acoustic delay of the reference relative to capture.
    pub reference_delay_ms: Option<f32>,
}

/// Echo-cancellation capability driven by the node.
///
/// Each method maps to one call on the underlying implementation; a
/// non-zero status surfaces as [`AlgorithmError`]. Dropping the boxed
/// instance destroys it.
pub trait EchoControl {
    /// Feeds one cycle of the render/loudspeaker signal for echo-path
    /// modeling.
    fn analyze_reference(&mut self, reference: &ChannelScratch) -> Result<(), AlgorithmError>;

    /// Cancels echo in one cycle of capture, in place.
    fn process_capture(&mut self, capture: &mut ChannelScratch) -> Result<(), AlgorithmError>;

    /// Applies an opaque tuning payload.
    fn reconfigure(&mut self, tuning: &[u8]) -> Result<(), AlgorithmError>;

    /// Pushes gain and delay together in one call.
    fn set_parameters(&mut self, update: ParameterUpdate) -> Result<(), AlgorithmError>;

    /// Moves the instance to a new stream shape.
    fn set_stream_layout(&mut self, layout: StreamLayout) -> Result<(), AlgorithmError>;

    /// Tears the instance down, handing back any attached working memory.
    fn detach_working_memory(self: Box<Self>) -> Option<Vec<u8>>;
}

/// Creates algorithm instances.
///
/// `working_memory` is an optional arena the instance allocates from
/// instead of the heap; it stays attached until
/// [`EchoControl::detach_working_memory`].
pub trait EchoControlFactory {
    fn create(
        &self,
        layout: StreamLayout,
        working_memory: Option<Vec<u8>>,
    ) -> Result<Box<dyn EchoControl>, AlgorithmError>;
}
