//! Pass-through capability for pipelines running without a real canceller.
//!
//! Analysis discards its input, processing leaves capture untouched, and
//! every control call is accepted and recorded. Stands in for the
//! production algorithm on targets that do not ship it, and doubles as the
//! identity stub in tests.

use derive_more::Debug;

use aec_stream::ChannelScratch;

use crate::control::{
    AlgorithmError, EchoControl, EchoControlFactory, ParameterUpdate, StreamLayout,
};

/// Factory handing out [`Passthrough`] instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughFactory;

impl EchoControlFactory for PassthroughFactory {
    fn create(
        &self,
        layout: StreamLayout,
        working_memory: Option<Vec<u8>>,
    ) -> Result<Box<dyn EchoControl>, AlgorithmError> {
        Ok(Box::new(Passthrough::new(layout, working_memory)))
    }
}

/// Identity echo control: processed capture equals pulled capture.
#[derive(Debug)]
pub struct Passthrough {
    layout: StreamLayout,
    mic_gain: Option<f32>,
    reference_delay_ms: Option<f32>,
    #[debug(skip)]
    tuning: Option<Vec<u8>>,
    #[debug(skip)]
    working_memory: Option<Vec<u8>>,
    analyzed_cycles: u64,
    processed_cycles: u64,
    control_pushes: u64,
}

impl Passthrough {
    pub fn new(layout: StreamLayout, working_memory: Option<Vec<u8>>) -> Self {
        Self {
            layout,
            mic_gain: None,
            reference_delay_ms: None,
            tuning: None,
            working_memory,
            analyzed_cycles: 0,
            processed_cycles: 0,
            control_pushes: 0,
        }
    }

    #[inline]
    pub fn layout(&self) -> StreamLayout {
        self.layout
    }

    #[inline]
    pub fn mic_gain(&self) -> Option<f32> {
        self.mic_gain
    }

    #[inline]
    pub fn reference_delay_ms(&self) -> Option<f32> {
        self.reference_delay_ms
    }

    /// Last tuning payload accepted through `reconfigure`.
    pub fn tuning(&self) -> Option<&[u8]> {
        self.tuning.as_deref()
    }

    #[inline]
    pub fn analyzed_cycles(&self) -> u64 {
        self.analyzed_cycles
    }

    #[inline]
    pub fn processed_cycles(&self) -> u64 {
        self.processed_cycles
    }

    /// Total reconfigure/parameter/layout calls accepted.
    #[inline]
    pub fn control_pushes(&self) -> u64 {
        self.control_pushes
    }
}

impl EchoControl for Passthrough {
    fn analyze_reference(&mut self, reference: &ChannelScratch) -> Result<(), AlgorithmError> {
        debug_assert_eq!(reference.active_channels(), self.layout.reference_channels);
        self.analyzed_cycles += 1;
        Ok(())
    }

    fn process_capture(&mut self, capture: &mut ChannelScratch) -> Result<(), AlgorithmError> {
        debug_assert_eq!(capture.active_channels(), self.layout.capture_input_channels);
        self.processed_cycles += 1;
        Ok(())
    }

    fn reconfigure(&mut self, tuning: &[u8]) -> Result<(), AlgorithmError> {
        self.tuning = Some(tuning.to_vec());
        self.control_pushes += 1;
        Ok(())
    }

    fn set_parameters(&mut self, update: ParameterUpdate) -> Result<(), AlgorithmError> {
        if let Some(gain) = update.mic_gain {
            self.mic_gain = Some(gain);
        }
        if let Some(delay) = update.reference_delay_ms {
            self.reference_delay_ms = Some(delay);
        }
        self.control_pushes += 1;
        Ok(())
    }

    fn set_stream_layout(&mut self, layout: StreamLayout) -> Result<(), AlgorithmError> {
        self.layout = layout;
        self.control_pushes += 1;
        Ok(())
    }

    fn detach_working_memory(self: Box<Self>) -> Option<Vec<u8>> {
        self.working_memory
    }
}
