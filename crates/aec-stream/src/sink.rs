//! Sink pin seam: where a node pushes processed stream data.

use std::num::NonZero;

use aec_ring_buffer::{RingBuffer, WriteRegion};

use crate::format::{PinRole, StreamFormat};

/// Downstream pin a node writes one cycle of data to per invocation.
///
/// [`min_free_space`](Self::min_free_space) is the scheduling contract,
/// not a fill query: the pipeline guarantees at least that much room every
/// time the owning node's cycle runs. `acquire` never blocks; asking for
/// room the transport does not actually have is a broken contract and
/// panics.
pub trait Sink {
    fn role(&self) -> PinRole;

    fn format(&self) -> StreamFormat;

    /// Overwrites the pin's advertised format. Called by a node once it
    /// has validated compatibility.
    fn set_format(&mut self, format: StreamFormat);

    /// Bytes guaranteed writable whenever the owning node's cycle runs.
    fn min_free_space(&self) -> usize;

    /// Address and frame alignment hints for the pin's transport.
    fn set_alignment(&mut self, address_align: usize, frame_align: usize);

    /// Acquires a write view over the next `len` free bytes.
    fn acquire(&mut self, len: usize) -> WriteRegion<'_, u8>;

    /// Publishes `len` bytes previously filled through `acquire`.
    fn commit(&mut self, len: usize);
}

/// Sink pin over an in-memory circular transport.
///
/// The transport holds a whole number of frames, so spans always wrap on a
/// frame boundary. The pipeline side promises to have drained down to at
/// least `period_frames` of room ahead of every producer cycle; that
/// promise is what `min_free_space` reports.
#[derive(Debug)]
pub struct RingSink {
    role: PinRole,
    format: StreamFormat,
    ring: RingBuffer<u8>,
    period_frames: NonZero<usize>,
    address_align: usize,
    frame_align: usize,
}

impl RingSink {
    /// Creates a pin whose transport holds `capacity_frames` frames of
    /// `format`-sized data and schedules `period_frames` per cycle.
    pub fn new(
        role: PinRole,
        format: StreamFormat,
        capacity_frames: NonZero<usize>,
        period_frames: NonZero<usize>,
    ) -> Self {
        assert!(format.channels > 0, "pin format must carry at least one channel");
        assert!(
            period_frames <= capacity_frames,
            "period of {period_frames} frames exceeds transport capacity {capacity_frames}"
        );
        let bytes = capacity_frames.get() * format.frame_bytes();
        let capacity = NonZero::new(bytes).expect("whole frames of a nonzero frame size");
        Self {
            role,
            format,
            ring: RingBuffer::new(capacity),
            period_frames,
            address_align: 1,
            frame_align: 1,
        }
    }

    /// Pipeline-side drain. Copies up to `out.len()` committed bytes out,
    /// returning the count actually copied.
    pub fn drain(&mut self, out: &mut [u8]) -> usize {
        self.ring.read(out)
    }

    /// Committed bytes waiting to be drained.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.ring.available_read()
    }

    /// Transport capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Alignment hints last pushed by a node.
    #[inline]
    pub fn alignment(&self) -> (usize, usize) {
        (self.address_align, self.frame_align)
    }
}

impl Sink for RingSink {
    fn role(&self) -> PinRole {
        self.role
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn set_format(&mut self, format: StreamFormat) {
        assert!(
            self.ring.capacity() % format.frame_bytes() == 0,
            "transport capacity must stay a whole number of frames"
        );
        self.format = format;
    }

    fn min_free_space(&self) -> usize {
        self.period_frames.get() * self.format.frame_bytes()
    }

    fn set_alignment(&mut self, address_align: usize, frame_align: usize) {
        self.address_align = address_align;
        self.frame_align = frame_align;
    }

    fn acquire(&mut self, len: usize) -> WriteRegion<'_, u8> {
        self.ring.write_region(len)
    }

    fn commit(&mut self, len: usize) {
        self.ring.commit_write(len);
    }
}
