//! Stream format descriptors for pipeline pins.

/// Wire encoding of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    S16Le,
    /// Signed 24-bit little-endian in a 4-byte container.
    S24Le,
    /// Signed 32-bit little-endian.
    S32Le,
}

impl SampleFormat {
    /// Bytes one sample occupies on the wire.
    #[inline]
    pub fn sample_bytes(self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
            SampleFormat::S24Le | SampleFormat::S32Le => 4,
        }
    }
}

/// Role a pin plays for the processing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinRole {
    /// Render/loudspeaker feedback used to model the echo path.
    Reference,
    /// Live capture signal to be cleaned.
    Microphone,
    /// Processed capture leaving the node.
    Output,
}

/// Format of one audio stream flowing through a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate_hz: u32,
    pub channels: usize,
    pub sample_format: SampleFormat,
}

impl StreamFormat {
    pub fn new(sample_rate_hz: u32, channels: usize, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate_hz,
            channels,
            sample_format,
        }
    }

    /// Bytes one frame (one sample per channel) occupies on the wire.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.channels * self.sample_format.sample_bytes()
    }

    /// Bytes a run of `frames` frames occupies on the wire.
    #[inline]
    pub fn span_bytes(&self, frames: usize) -> usize {
        frames * self.frame_bytes()
    }
}
