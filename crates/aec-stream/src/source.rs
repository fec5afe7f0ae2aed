//! Source pin seam: where a node pulls stream data from the pipeline.

use std::num::NonZero;

use aec_ring_buffer::{ReadRegion, RingBuffer};

use crate::format::{PinRole, StreamFormat};

/// Upstream pin a node reads one cycle of data from per invocation.
///
/// Implementations are owned by the surrounding pipeline; the node only
/// negotiates against them and consumes through them.
/// [`min_available`](Self::min_available) is the scheduling contract, not a
/// fill query: the pipeline guarantees at least that many bytes are
/// readable every time the owning node's cycle runs. `acquire` never
/// blocks; asking for bytes the transport does not actually hold is a
/// broken contract and panics.
pub trait Source {
    fn role(&self) -> PinRole;

    fn format(&self) -> StreamFormat;

    /// Overwrites the pin's advertised format. Called by a node once it
    /// has validated compatibility.
    fn set_format(&mut self, format: StreamFormat);

    /// Bytes guaranteed readable whenever the owning node's cycle runs.
    fn min_available(&self) -> usize;

    /// Address and frame alignment hints for the pin's transport.
    fn set_alignment(&mut self, address_align: usize, frame_align: usize);

    /// Acquires a read view over the next `len` bytes.
    fn acquire(&mut self, len: usize) -> ReadRegion<'_, u8>;

    /// Consumes `len` bytes previously exposed through `acquire`.
    fn release(&mut self, len: usize);
}

/// Source pin over an in-memory circular transport.
///
/// The transport holds a whole number of frames, so spans always wrap on a
/// frame boundary. The pipeline side promises to keep at least
/// `period_frames` buffered ahead of every consumer cycle; that promise is
/// what `min_available` reports.
#[derive(Debug)]
pub struct RingSource {
    role: PinRole,
    format: StreamFormat,
    ring: RingBuffer<u8>,
    period_frames: NonZero<usize>,
    address_align: usize,
    frame_align: usize,
}

impl RingSource {
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

    /// Pipeline-side fill. Appends up to `data.len()` bytes, returning the
    /// count actually buffered.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        self.ring.write(data)
    }

    /// Bytes currently buffered in the transport.
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

impl Source for RingSource {
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

    fn min_available(&self) -> usize {
        self.period_frames.get() * self.format.frame_bytes()
    }

    fn set_alignment(&mut self, address_align: usize, frame_align: usize) {
        self.address_align = address_align;
        self.frame_align = frame_align;
    }

    fn acquire(&mut self, len: usize) -> ReadRegion<'_, u8> {
        self.ring.read_region(len)
    }

    fn release(&mut self, len: usize) {
        self.ring.release_read(len);
    }
}
