//! Stream plumbing for pipeline processing nodes.
//!
//! Formats and role tags for pins, the source/sink seams a node consumes,
//! ring-backed pin implementations for pipelines and tests, per-channel
//! scratch in the processing domain, and the fixed-scale wire conversions.

#![deny(unsafe_code)]

pub mod channel_scratch;
pub mod convert;
pub mod format;
pub mod sink;
pub mod source;

pub use channel_scratch::ChannelScratch;
pub use format::{PinRole, SampleFormat, StreamFormat};
pub use sink::{RingSink, Sink};
pub use source::{RingSource, Source};
