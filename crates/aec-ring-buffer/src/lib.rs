//! Fixed-capacity circular buffer with explicit region views.
//!
//! Pipeline pins hand out one cycle's worth of samples at a time without
//! copying. A consumer acquires a [`ReadRegion`] or [`WriteRegion`]
//! describing a logical span that may cross the physical end of storage;
//! the view carries the full storage window, the cursor offset where the
//! span begins, and both the logical and the contiguous length, so the
//! consumer walks the span itself and wraps its cursor to the start of
//! storage when it crosses the end. Every acquired region must be paired
//! with exactly one `release_read`/`commit_write` of the consumed length.
//!
//! Acquiring more than is readable (or writable) is a broken sizing
//! contract on the caller's side and panics rather than erroring.

#![deny(unsafe_code)]

use std::num::NonZero;

/// Fixed-capacity FIFO over `T` with region-view access.
#[derive(Debug)]
pub struct RingBuffer<T> {
    data: Vec<T>,
    /// Index of the oldest unread element. Always `< data.len()`.
    read_pos: usize,
    /// Number of readable elements. Always `<= data.len()`.
    filled: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer holding up to `capacity` elements.
    pub fn new(capacity: NonZero<usize>) -> Self
    where
        T: Clone + Default,
    {
        Self {
            data: vec![T::default(); capacity.get()],
            read_pos: 0,
            filled: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Elements that can be read right now.
    #[inline]
    pub fn available_read(&self) -> usize {
        self.filled
    }

    /// Elements that can be written right now.
    #[inline]
    pub fn available_write(&self) -> usize {
        self.data.len() - self.filled
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Drops all buffered data. Storage is retained.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.filled = 0;
    }

    /// Acquires a view over the next `len` readable elements.
    ///
    /// Panics if fewer than `len` elements are readable. The view does not
    /// consume anything; call [`release_read`](Self::release_read) with the
    /// same length afterwards.
    pub fn read_region(&self, len: usize) -> ReadRegion<'_, T> {
        assert!(
            len <= self.filled,
            "read region of {len} elements exceeds {} readable",
            self.filled
        );
        ReadRegion {
            storage: &self.data,
            start: self.read_pos,
            len,
        }
    }

    /// Consumes `len` elements previously exposed through a read region.
    ///
    /// Panics if fewer than `len` elements are readable.
    pub fn release_read(&mut self, len: usize) {
        assert!(
            len <= self.filled,
            "release of {len} elements exceeds {} readable",
            self.filled
        );
        self.read_pos = self.wrap(self.read_pos + len);
        self.filled -= len;
    }

    /// Acquires a view over the next `len` writable elements.
    ///
    /// Panics if fewer than `len` elements are writable. Nothing becomes
    /// readable until [`commit_write`](Self::commit_write) is called with
    /// the same length.
    pub fn write_region(&mut self, len: usize) -> WriteRegion<'_, T> {
        let free = self.available_write();
        assert!(len <= free, "write region of {len} elements exceeds {free} free");
        let start = self.wrap(self.read_pos + self.filled);
        WriteRegion {
            storage: &mut self.data,
            start,
            len,
        }
    }

    /// Publishes `len` elements previously filled through a write region.
    ///
    /// Panics if fewer than `len` elements are writable.
    pub fn commit_write(&mut self, len: usize) {
        let free = self.available_write();
        assert!(len <= free, "commit of {len} elements exceeds {free} free");
        self.filled += len;
    }

    /// Copies as much of `data` in as fits, returning the count written.
    pub fn write(&mut self, data: &[T]) -> usize
    where
        T: Copy,
    {
        let n = data.len().min(self.available_write());
        {
            let mut region = self.write_region(n);
            let (head, tail) = region.split_mut();
            let split = head.len();
            head.copy_from_slice(&data[..split]);
            tail.copy_from_slice(&data[split..n]);
        }
        self.commit_write(n);
        n
    }

    /// Copies up to `out.len()` elements out, returning the count read.
    pub fn read(&mut self, out: &mut [T]) -> usize
    where
        T: Copy,
    {
        let n = out.len().min(self.available_read());
        {
            let region = self.read_region(n);
            let head = region.head();
            let split = head.len();
            out[..split].copy_from_slice(head);
            out[split..n].copy_from_slice(region.tail());
        }
        self.release_read(n);
        n
    }

    #[inline]
    fn wrap(&self, pos: usize) -> usize {
        // pos is always < 2 * capacity here.
        if pos >= self.data.len() {
            pos - self.data.len()
        } else {
            pos
        }
    }
}

/// View over a logical read span inside the circular storage.
///
/// `storage()[start()]` is the first element of the span. The span covers
/// `len()` elements but only `contiguous_len()` of them before the physical
/// end of storage; a walker that steps past the end wraps to index 0.
#[derive(Debug)]
pub struct ReadRegion<'a, T> {
    storage: &'a [T],
    start: usize,
    len: usize,
}

impl<'a, T> ReadRegion<'a, T> {
    /// The full circular storage window.
    #[inline]
    pub fn storage(&self) -> &'a [T] {
        self.storage
    }

    /// Offset into storage where the span begins.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Logical span length.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Span elements reachable before the physical end of storage.
    #[inline]
    pub fn contiguous_len(&self) -> usize {
        self.len.min(self.storage.len() - self.start)
    }

    /// True when the span wraps past the end of storage.
    #[inline]
    pub fn is_split(&self) -> bool {
        self.len > self.contiguous_len()
    }

    /// Leading contiguous part of the span.
    pub fn head(&self) -> &'a [T] {
        &self.storage[self.start..self.start + self.contiguous_len()]
    }

    /// Wrapped remainder of the span. Empty when not split.
    pub fn tail(&self) -> &'a [T] {
        &self.storage[..self.len - self.contiguous_len()]
    }
}

/// View over a logical write span inside the circular storage.
///
/// The caller must fill exactly the span `[start, start + len)` modulo the
/// storage length; the rest of the exposed window holds live unread data.
#[derive(Debug)]
pub struct WriteRegion<'a, T> {
    storage: &'a mut [T],
    start: usize,
    len: usize,
}

impl<T> WriteRegion<'_, T> {
    /// The full circular storage window.
    #[inline]
    pub fn storage_mut(&mut self) -> &mut [T] {
        self.storage
    }

    /// Offset into storage where the span begins.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Logical span length.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Span elements reachable before the physical end of storage.
    #[inline]
    pub fn contiguous_len(&self) -> usize {
        self.len.min(self.storage.len() - self.start)
    }

    /// True when the span wraps past the end of storage.
    #[inline]
    pub fn is_split(&self) -> bool {
        self.len > self.contiguous_len()
    }

    /// The span as (leading part, wrapped remainder).
    pub fn split_mut(&mut self) -> (&mut [T], &mut [T]) {
        let head_len = self.contiguous_len();
        let tail_len = self.len - head_len;
        let (front, back) = self.storage.split_at_mut(self.start);
        (&mut back[..head_len], &mut front[..tail_len])
    }
}
