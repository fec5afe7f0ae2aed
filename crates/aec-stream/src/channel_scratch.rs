//! Per-channel scratch frames in the processing domain.

use std::collections::TryReserveError;

use derive_more::Debug;

/// De-interlaced sample scratch: one fixed-length run of frames per
/// channel, all in a single contiguous allocation.
///
/// The allocated width in channels is fixed at construction. A narrower
/// *active* width can be selected afterwards so runtime reconfiguration
/// never reallocates; the allocation is the upper bound.
#[derive(Debug)]
pub struct ChannelScratch {
    #[debug(skip)]
    data: Vec<f32>,
    frames: usize,
    allocated_channels: usize,
    active_channels: usize,
}

impl ChannelScratch {
    /// Allocates zeroed scratch for `channels` runs of `frames` samples.
    ///
    /// Allocation failure is reported, not aborted on, so callers under an
    /// init contract can map it into their own error domain.
    pub fn new(channels: usize, frames: usize) -> Result<Self, TryReserveError> {
        assert!(channels > 0, "scratch needs at least one channel");
        assert!(frames > 0, "scratch needs at least one frame");
        let mut data = Vec::new();
        data.try_reserve_exact(channels * frames)?;
        data.resize(channels * frames, 0.0);
        Ok(Self {
            data,
            frames,
            allocated_channels: channels,
            active_channels: channels,
        })
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn allocated_channels(&self) -> usize {
        self.allocated_channels
    }

    #[inline]
    pub fn active_channels(&self) -> usize {
        self.active_channels
    }

    /// Selects how many of the allocated channels are in use.
    ///
    /// Panics when `channels` is zero or exceeds the allocation.
    pub fn set_active_channels(&mut self, channels: usize) {
        assert!(
            channels > 0 && channels <= self.allocated_channels,
            "active width {channels} outside 1..={}",
            self.allocated_channels
        );
        self.active_channels = channels;
    }

    /// Samples of one active channel.
    #[inline]
    pub fn channel(&self, channel: usize) -> &[f32] {
        assert!(
            channel < self.active_channels,
            "channel {channel} outside active width {}",
            self.active_channels
        );
        let at = channel * self.frames;
        &self.data[at..at + self.frames]
    }

    /// Mutable samples of one active channel.
    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        assert!(
            channel < self.active_channels,
            "channel {channel} outside active width {}",
            self.active_channels
        );
        let at = channel * self.frames;
        &mut self.data[at..at + self.frames]
    }

    /// Active channels in index order.
    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.data
            .chunks_exact(self.frames)
            .take(self.active_channels)
    }

    /// Zeroes every allocated sample.
    pub fn silence(&mut self) {
        self.data.fill(0.0);
    }

    /// Drops the backing allocation. Only drop is meaningful afterwards.
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.allocated_channels = 0;
        self.active_channels = 0;
    }
}
