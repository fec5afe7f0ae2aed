//! Reconciles control-plane configuration writes with the processing loop.
//!
//! Writes land here fragment by fragment; a completed image parks in a
//! last-writer-wins pending slot and is consumed at the top of a later
//! cycle, never mid-write. Writers and the cycle are assumed serialized by
//! the surrounding runtime (single cooperative execution context); there
//! is no locking here, and under a truly parallel runtime the slot handoff
//! would not be atomic: a write could be lost or observed half-replaced.
//! That assumption is inherited, not patched over.

use crate::blob::{BlobAssembler, ConfigBlob, FragmentError, FragmentPosition};
use crate::control::{EchoControl, ParameterUpdate, StreamLayout};
use crate::error::NodeError;

/// Param id of the opaque binary control this node is configured through.
pub const BYTES_CONTROL_PARAM_ID: u32 = 0;
/// Param id of toggle controls. Always rejected.
pub const SWITCH_CONTROL_PARAM_ID: u32 = 200;
/// Param id of enumerated controls. Always rejected.
pub const ENUM_CONTROL_PARAM_ID: u32 = 201;

/// Staging plus the pending slot and its consumption flag.
///
/// The flag starts raised so the first image ever delivered is consumed on
/// the next cycle. A failed apply leaves it raised: the failure repeats
/// every cycle until the control plane replaces the image.
#[derive(Debug)]
pub(crate) struct ReconfigEngine {
    assembler: BlobAssembler,
    image: Option<Vec<u8>>,
    pending: bool,
}

impl ReconfigEngine {
    pub(crate) fn new() -> Self {
        Self {
            assembler: BlobAssembler::new(),
            image: None,
            pending: true,
        }
    }

    #[inline]
    pub(crate) fn pending(&self) -> bool {
        self.pending
    }

    /// Accepts one control write, staging fragments until an image
    /// completes and parking the completed image for the next apply.
    pub(crate) fn set_config(
        &mut self,
        param_id: u32,
        position: FragmentPosition,
        offset_or_size: usize,
        fragment: &[u8],
    ) -> Result<(), NodeError> {
        if matches!(param_id, SWITCH_CONTROL_PARAM_ID | ENUM_CONTROL_PARAM_ID) {
            tracing::error!(param_id, "only opaque binary controls are supported");
            return Err(NodeError::UnsupportedControlType);
        }
        match self.assembler.push(position, offset_or_size, fragment) {
            Ok(Some(image)) => {
                self.image = Some(image);
                self.pending = true;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(FragmentError::Allocation) => {
                tracing::error!(size = offset_or_size, "config staging allocation failed");
                Err(NodeError::AllocationFailure)
            }
            Err(error) => {
                tracing::error!(%error, ?position, offset_or_size, "config fragment rejected");
                Err(NodeError::UnsupportedControlType)
            }
        }
    }

    /// Consumes the pending image, if any, pushing its fields into the
    /// algorithm and the node's layout.
    ///
    /// Field order: tuning payload, then channel counts, then one gain and
    /// delay parameter push. Channel fields are validated before anything
    /// is pushed, so a count rejection leaves both the algorithm and
    /// `layout` exactly as they were. The flag clears only when every
    /// present field applied.
    pub(crate) fn apply(
        &mut self,
        algorithm: &mut dyn EchoControl,
        layout: &mut StreamLayout,
        max_capture_channels: usize,
    ) -> Result<(), NodeError> {
        if !self.pending {
            return Ok(());
        }
        let Some(image) = self.image.as_deref() else {
            // Armed but nothing delivered yet; keep polling.
            return Ok(());
        };
        let blob = ConfigBlob::decode(image).map_err(|error| {
            tracing::error!(%error, "pending config image does not parse");
            NodeError::UnsupportedControlType
        })?;
        if blob == ConfigBlob::default() {
            tracing::warn!("config image carries no fields");
        }

        let capture_channels = blob.requested_capture_channels().map_err(|(input, output)| {
            tracing::error!(input, output, "capture channel fields disagree");
            NodeError::ChannelCountMismatch
        })?;
        let capture_channels = match capture_channels {
            Some(channels) => {
                let channels = channels as usize;
                if channels == 0 || channels > max_capture_channels {
                    tracing::error!(
                        channels,
                        max_capture_channels,
                        "capture channel count outside the negotiated width"
                    );
                    return Err(NodeError::ChannelCountMismatch);
                }
                Some(channels)
            }
            None => None,
        };

        if let Some(tuning) = &blob.tuning {
            algorithm.reconfigure(tuning).map_err(|error| {
                tracing::error!(%error, bytes = tuning.len(), "tuning payload rejected");
                NodeError::AlgorithmFailure
            })?;
        }

        if let Some(channels) = capture_channels {
            let mut updated = *layout;
            updated.capture_input_channels = channels;
            updated.capture_output_channels = channels;
            algorithm.set_stream_layout(updated).map_err(|error| {
                tracing::error!(%error, channels, "stream layout rejected");
                NodeError::AlgorithmFailure
            })?;
            *layout = updated;
        }

        if blob.mic_gain.is_some() || blob.reference_delay_ms.is_some() {
            let update = ParameterUpdate {
                mic_gain: blob.mic_gain,
                reference_delay_ms: blob.reference_delay_ms,
            };
            algorithm.set_parameters(update).map_err(|error| {
                tracing::error!(%error, "parameter update rejected");
                NodeError::AlgorithmFailure
            })?;
        }

        tracing::info!(
            tuning = blob.tuning.is_some(),
            channels = ?capture_channels,
            gain = ?blob.mic_gain,
            delay_ms = ?blob.reference_delay_ms,
            "reconfigure applied"
        );
        self.pending = false;
        Ok(())
    }

    /// Discards staged fragments and the pending image, re-arming the flag
    /// as after init.
    pub(crate) fn reset(&mut self) {
        self.assembler.clear();
        self.image = None;
        self.pending = true;
    }

    /// Discards everything without re-arming.
    pub(crate) fn release(&mut self) {
        self.assembler.clear();
        self.image = None;
        self.pending = false;
    }
}
