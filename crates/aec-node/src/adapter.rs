//! Cycle data movement between pins and per-channel scratch.
//!
//! Pulls de-interlace one cycle of wire frames into normalized f32 runs;
//! the push interlaces the processed capture back out. Spans are acquired
//! over circular storage whose contiguous view can be shorter than the
//! span, so the frame cursor wraps to the start of storage instead of
//! stepping past its end. The same discipline covers both pulls and the
//! push. Pins always hold whole frames, so a wrap never lands inside a
//! frame.

use aec_stream::convert::{s16_to_sample, sample_to_s16};
use aec_stream::{ChannelScratch, SampleFormat, Sink, Source};

use crate::error::NodeError;

/// Owns the two scratch buffers and moves one cycle per call.
///
/// Scratch is sized once from the widths negotiated at init; the capture
/// side can be narrowed later without reallocating. Nothing here
/// allocates, and a pin unable to serve a full span is a broken sizing
/// contract, which panics in the underlying ring.
#[derive(Debug)]
pub(crate) struct StreamAdapter {
    frames: usize,
    reference: ChannelScratch,
    capture: ChannelScratch,
}

impl StreamAdapter {
    pub(crate) fn new(
        frames: usize,
        reference_channels: usize,
        capture_channels: usize,
    ) -> Result<Self, NodeError> {
        let reference = scratch(reference_channels, frames)?;
        let capture = scratch(capture_channels, frames)?;
        Ok(Self {
            frames,
            reference,
            capture,
        })
    }

    #[inline]
    pub(crate) fn capture_allocated(&self) -> usize {
        self.capture.allocated_channels()
    }

    #[inline]
    pub(crate) fn capture_active(&self) -> usize {
        self.capture.active_channels()
    }

    pub(crate) fn set_active_capture(&mut self, channels: usize) {
        self.capture.set_active_channels(channels);
    }

    pub(crate) fn silence(&mut self) {
        self.reference.silence();
        self.capture.silence();
    }

    pub(crate) fn release(&mut self) {
        self.reference.release();
        self.capture.release();
    }

    /// Consumes one cycle from the reference pin into scratch.
    pub(crate) fn pull_reference(&mut self, pin: &mut dyn Source) -> &ChannelScratch {
        pull_into(pin, &mut self.reference, self.frames);
        &self.reference
    }

    /// Consumes one cycle from the microphone pin into scratch.
    pub(crate) fn pull_microphone(&mut self, pin: &mut dyn Source) -> &mut ChannelScratch {
        pull_into(pin, &mut self.capture, self.frames);
        &mut self.capture
    }

    /// Produces one cycle from the capture scratch onto the output pin.
    ///
    /// Pin channels past the active capture width are written as silence.
    pub(crate) fn push_output(&self, pin: &mut dyn Sink) {
        push_from(&self.capture, pin, self.frames);
    }
}

fn scratch(channels: usize, frames: usize) -> Result<ChannelScratch, NodeError> {
    ChannelScratch::new(channels, frames).map_err(|error| {
        tracing::error!(%error, channels, frames, "scratch allocation failed");
        NodeError::from(error)
    })
}

/// De-interlaces `frames` wire frames from `pin` into `scratch`.
///
/// The pin may carry more channels than scratch takes; the cursor strides
/// whole frames regardless, so extra channels are skipped, not misread as
/// later frames.
fn pull_into(pin: &mut dyn Source, scratch: &mut ChannelScratch, frames: usize) {
    let format = pin.format();
    debug_assert_eq!(format.sample_format, SampleFormat::S16Le);
    debug_assert!(scratch.active_channels() <= format.channels);
    debug_assert_eq!(scratch.frames(), frames);

    let span = format.span_bytes(frames);
    let frame_bytes = format.frame_bytes();
    let take = scratch.active_channels();
    {
        let region = pin.acquire(span);
        let storage = region.storage();
        let end = storage.len();
        let mut cursor = region.start();
        for frame in 0..frames {
            if cursor >= end {
                cursor = 0;
            }
            for channel in 0..take {
                let at = cursor + channel * 2;
                let raw = i16::from_le_bytes([storage[at], storage[at + 1]]);
                scratch.channel_mut(channel)[frame] = s16_to_sample(raw);
            }
            cursor += frame_bytes;
        }
    }
    pin.release(span);
}

/// Interlaces `frames` frames from `scratch` onto `pin`.
fn push_from(scratch: &ChannelScratch, pin: &mut dyn Sink, frames: usize) {
    let format = pin.format();
    debug_assert_eq!(format.sample_format, SampleFormat::S16Le);
    debug_assert!(scratch.active_channels() <= format.channels);
    debug_assert_eq!(scratch.frames(), frames);

    let span = format.span_bytes(frames);
    let frame_bytes = format.frame_bytes();
    let channels = format.channels;
    let give = scratch.active_channels();
    {
        let mut region = pin.acquire(span);
        let start = region.start();
        let storage = region.storage_mut();
        let end = storage.len();
        let mut cursor = start;
        for frame in 0..frames {
            if cursor >= end {
                cursor = 0;
            }
            for channel in 0..channels {
                let value = if channel < give {
                    sample_to_s16(scratch.channel(channel)[frame])
                } else {
                    0
                };
                let at = cursor + channel * 2;
                storage[at..at + 2].copy_from_slice(&value.to_le_bytes());
            }
            cursor += frame_bytes;
        }
    }
    pin.commit(span);
}
