//! Pin classification and bind-time format enforcement.
//!
//! Everything here runs at prepare. The sizing checks are what make the
//! cycle path panic-free: a pin that passes them is contractually able to
//! deliver or absorb exactly one cycle every period.

use aec_stream::{PinRole, SampleFormat, Sink, Source, StreamFormat};

use crate::error::NodeError;

/// Indices of the classified sources within the attached slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PinBindings {
    pub(crate) reference: usize,
    pub(crate) microphone: usize,
}

/// Validates the fixed topology and pushes the node's format requirements
/// onto the attached pins.
#[derive(Debug)]
pub(crate) struct PinNegotiator {
    rate_hz: u32,
    supported: &'static [SampleFormat],
    frames_per_cycle: usize,
}

impl PinNegotiator {
    pub(crate) fn new(
        rate_hz: u32,
        supported: &'static [SampleFormat],
        frames_per_cycle: usize,
    ) -> Self {
        Self {
            rate_hz,
            supported,
            frames_per_cycle,
        }
    }

    /// Classifies the attached pins: exactly one reference source, one
    /// microphone source, one output sink.
    pub(crate) fn attach(
        &self,
        sources: &[&mut dyn Source],
        sinks: &[&mut dyn Sink],
    ) -> Result<PinBindings, NodeError> {
        let mut reference = None;
        let mut microphone = None;
        for (index, source) in sources.iter().enumerate() {
            match source.role() {
                PinRole::Reference if reference.is_none() => reference = Some(index),
                PinRole::Microphone if microphone.is_none() => microphone = Some(index),
                role => {
                    tracing::error!(index, ?role, "source pin does not fit the topology");
                    return Err(NodeError::RoleConflict);
                }
            }
        }
        let (Some(reference), Some(microphone)) = (reference, microphone) else {
            tracing::error!(
                sources = sources.len(),
                "need one reference and one microphone source"
            );
            return Err(NodeError::RoleConflict);
        };
        match sinks {
            [sink] if sink.role() == PinRole::Output => {}
            _ => {
                tracing::error!(sinks = sinks.len(), "need exactly one output sink");
                return Err(NodeError::RoleConflict);
            }
        }
        Ok(PinBindings {
            reference,
            microphone,
        })
    }

    /// Checks a source pin against the node's requirements and pushes the
    /// accepted format back onto it.
    pub(crate) fn enforce_source(
        &self,
        pin: &mut dyn Source,
        min_channels: usize,
    ) -> Result<(), NodeError> {
        let format = self.enforced(pin.format(), min_channels)?;
        pin.set_format(format);
        Ok(())
    }

    /// Checks the output sink likewise.
    pub(crate) fn enforce_sink(
        &self,
        pin: &mut dyn Sink,
        min_channels: usize,
    ) -> Result<(), NodeError> {
        let format = self.enforced(pin.format(), min_channels)?;
        pin.set_format(format);
        Ok(())
    }

    fn enforced(
        &self,
        actual: StreamFormat,
        min_channels: usize,
    ) -> Result<StreamFormat, NodeError> {
        if actual.sample_rate_hz != self.rate_hz {
            tracing::error!(
                pin_rate = actual.sample_rate_hz,
                required = self.rate_hz,
                "pin rate does not match"
            );
            return Err(NodeError::FormatUnsupported);
        }
        if !self.supported.contains(&actual.sample_format) {
            tracing::error!(encoding = ?actual.sample_format, "pin encoding not supported");
            return Err(NodeError::FormatUnsupported);
        }
        if actual.channels < min_channels {
            tracing::error!(
                channels = actual.channels,
                min_channels,
                "pin too narrow for the stream"
            );
            return Err(NodeError::FormatUnsupported);
        }
        Ok(StreamFormat::new(
            self.rate_hz,
            actual.channels,
            actual.sample_format,
        ))
    }

    /// Verifies the source can deliver exactly one cycle per period.
    pub(crate) fn check_source_sizing(&self, pin: &dyn Source) -> Result<(), NodeError> {
        let required = pin.format().span_bytes(self.frames_per_cycle);
        let granted = pin.min_available();
        if granted != required {
            tracing::error!(granted, required, "source period is not one cycle");
            return Err(NodeError::FormatUnsupported);
        }
        Ok(())
    }

    /// Verifies the sink can absorb exactly one cycle per period.
    pub(crate) fn check_sink_sizing(&self, pin: &dyn Sink) -> Result<(), NodeError> {
        let required = pin.format().span_bytes(self.frames_per_cycle);
        let granted = pin.min_free_space();
        if granted != required {
            tracing::error!(granted, required, "sink period is not one cycle");
            return Err(NodeError::FormatUnsupported);
        }
        Ok(())
    }
}
