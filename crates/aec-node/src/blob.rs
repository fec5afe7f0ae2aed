//! Runtime configuration payloads.
//!
//! A payload is a little-endian header (version, field mask) followed by the
//! fields the mask announces, in mask-bit order. Payloads too large for one
//! control write arrive as fragments; [`BlobAssembler`] stages them until the
//! final fragment completes the image.

use std::fmt;

/// Payload wire version understood by [`ConfigBlob::decode`].
pub const BLOB_VERSION: u32 = 1;

const FIELD_CAPTURE_INPUT_CHANNELS: u32 = 1 << 0;
const FIELD_CAPTURE_OUTPUT_CHANNELS: u32 = 1 << 1;
const FIELD_REFERENCE_DELAY_MS: u32 = 1 << 2;
const FIELD_MIC_GAIN: u32 = 1 << 3;
const FIELD_TUNING: u32 = 1 << 4;
const KNOWN_FIELDS: u32 = FIELD_CAPTURE_INPUT_CHANNELS
    | FIELD_CAPTURE_OUTPUT_CHANNELS
    | FIELD_REFERENCE_DELAY_MS
    | FIELD_MIC_GAIN
    | FIELD_TUNING;

/// Decoded runtime configuration. Every field is optional; an absent field
/// leaves the corresponding node state unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigBlob {
    pub capture_input_channels: Option<u32>,
    pub capture_output_channels: Option<u32>,
    pub reference_delay_ms: Option<f32>,
    pub mic_gain: Option<f32>,
    pub tuning: Option<Vec<u8>>,
}

impl ConfigBlob {
    /// Parses one complete payload image.
    pub fn decode(bytes: &[u8]) -> Result<Self, BlobError> {
        let mut cursor = bytes;
        let version = take_u32(&mut cursor)?;
        if version != BLOB_VERSION {
            return Err(BlobError::UnknownVersion(version));
        }
        let fields = take_u32(&mut cursor)?;
        if fields & !KNOWN_FIELDS != 0 {
            return Err(BlobError::UnknownFields(fields & !KNOWN_FIELDS));
        }

        let mut blob = Self::default();
        if fields & FIELD_CAPTURE_INPUT_CHANNELS != 0 {
            blob.capture_input_channels = Some(take_u32(&mut cursor)?);
        }
        if fields & FIELD_CAPTURE_OUTPUT_CHANNELS != 0 {
            blob.capture_output_channels = Some(take_u32(&mut cursor)?);
        }
        if fields & FIELD_REFERENCE_DELAY_MS != 0 {
            blob.reference_delay_ms = Some(take_f32(&mut cursor)?);
        }
        if fields & FIELD_MIC_GAIN != 0 {
            blob.mic_gain = Some(take_f32(&mut cursor)?);
        }
        if fields & FIELD_TUNING != 0 {
            let len = take_u32(&mut cursor)? as usize;
            if cursor.len() < len {
                return Err(BlobError::Truncated);
            }
            let (tuning, rest) = cursor.split_at(len);
            blob.tuning = Some(tuning.to_vec());
            cursor = rest;
        }
        if !cursor.is_empty() {
            return Err(BlobError::TrailingBytes(cursor.len()));
        }
        Ok(blob)
    }

    /// Serializes the present fields into a payload image.
    pub fn encode(&self) -> Vec<u8> {
        let mut fields = 0;
        if self.capture_input_channels.is_some() {
            fields |= FIELD_CAPTURE_INPUT_CHANNELS;
        }
        if self.capture_output_channels.is_some() {
            fields |= FIELD_CAPTURE_OUTPUT_CHANNELS;
        }
        if self.reference_delay_ms.is_some() {
            fields |= FIELD_REFERENCE_DELAY_MS;
        }
        if self.mic_gain.is_some() {
            fields |= FIELD_MIC_GAIN;
        }
        if self.tuning.is_some() {
            fields |= FIELD_TUNING;
        }

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&BLOB_VERSION.to_le_bytes());
        bytes.extend_from_slice(&fields.to_le_bytes());
        if let Some(channels) = self.capture_input_channels {
            bytes.extend_from_slice(&channels.to_le_bytes());
        }
        if let Some(channels) = self.capture_output_channels {
            bytes.extend_from_slice(&channels.to_le_bytes());
        }
        if let Some(delay) = self.reference_delay_ms {
            bytes.extend_from_slice(&delay.to_le_bytes());
        }
        if let Some(gain) = self.mic_gain {
            bytes.extend_from_slice(&gain.to_le_bytes());
        }
        if let Some(tuning) = &self.tuning {
            bytes.extend_from_slice(&(tuning.len() as u32).to_le_bytes());
            bytes.extend_from_slice(tuning);
        }
        bytes
    }

    /// Capture channel count this payload asks for, reconciling the input
    /// and output fields.
    ///
    /// With one field present its value wins. With both present they must
    /// agree; disagreement is reported so the caller can reject the payload
    /// instead of guessing.
    pub fn requested_capture_channels(&self) -> Result<Option<u32>, (u32, u32)> {
        match (self.capture_input_channels, self.capture_output_channels) {
            (None, None) => Ok(None),
            (Some(channels), None) | (None, Some(channels)) => Ok(Some(channels)),
            (Some(input), Some(output)) if input == output => Ok(Some(input)),
            (Some(input), Some(output)) => Err((input, output)),
        }
    }
}

fn take_u32(cursor: &mut &[u8]) -> Result<u32, BlobError> {
    let (word, rest) = cursor.split_first_chunk::<4>().ok_or(BlobError::Truncated)?;
    *cursor = rest;
    Ok(u32::from_le_bytes(*word))
}

fn take_f32(cursor: &mut &[u8]) -> Result<f32, BlobError> {
    Ok(f32::from_bits(take_u32(cursor)?))
}

/// Why a payload image failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobError {
    /// Header names a wire version this build does not speak.
    UnknownVersion(u32),
    /// Field mask has bits this build does not know how to skip.
    UnknownFields(u32),
    /// Image ends before the announced fields do.
    Truncated,
    /// Image continues past the announced fields.
    TrailingBytes(usize),
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownVersion(version) => write!(f, "unknown payload version {version}"),
            Self::UnknownFields(bits) => write!(f, "unknown payload field bits {bits:#x}"),
            Self::Truncated => write!(f, "payload ends inside a field"),
            Self::TrailingBytes(count) => write!(f, "{count} bytes past the last field"),
        }
    }
}

impl std::error::Error for BlobError {}

/// Where a control write sits in a fragmented payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentPosition {
    /// The whole payload in one write.
    Single,
    /// Opens a fragmented payload; the position argument carries the total
    /// payload size instead of an offset.
    First,
    /// Continues a fragmented payload at the given offset.
    Middle,
    /// Closes a fragmented payload at the given offset.
    Last,
}

/// Why fragment staging was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    /// Fragment does not continue the staged image: no opener, an offset
    /// that skips or repeats bytes, or a closer that leaves a gap.
    OutOfSequence,
    /// Fragment runs past the size the opener announced.
    Overflow,
    /// Staging buffer for the announced size could not be allocated.
    Allocation,
}

impl fmt::Display for FragmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfSequence => write!(f, "fragment does not continue the staged payload"),
            Self::Overflow => write!(f, "fragment overruns the announced payload size"),
            Self::Allocation => write!(f, "payload staging allocation failed"),
        }
    }
}

impl std::error::Error for FragmentError {}

#[derive(Debug)]
struct Staging {
    data: Vec<u8>,
    filled: usize,
}

impl Staging {
    fn with_size(size: usize) -> Result<Self, FragmentError> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| FragmentError::Allocation)?;
        data.resize(size, 0);
        Ok(Self { data, filled: 0 })
    }

    fn append(&mut self, offset: usize, fragment: &[u8]) -> Result<(), FragmentError> {
        if offset != self.filled {
            return Err(FragmentError::OutOfSequence);
        }
        let end = self
            .filled
            .checked_add(fragment.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(FragmentError::Overflow)?;
        self.data[self.filled..end].copy_from_slice(fragment);
        self.filled = end;
        Ok(())
    }
}

/// Reassembles fragmented payload writes into complete images.
///
/// Any staging error drops the partial image; the writer restarts from a
/// `First` fragment. A completed image is handed back by value so the
/// assembler is immediately ready for the next sequence.
#[derive(Debug, Default)]
pub struct BlobAssembler {
    staging: Option<Staging>,
}

impl BlobAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one control write.
    ///
    /// `offset_or_size` is the total payload size on a `First` fragment and
    /// the write offset on `Middle` and `Last` fragments; `Single` ignores
    /// it. Returns the complete image once the payload closes.
    pub fn push(
        &mut self,
        position: FragmentPosition,
        offset_or_size: usize,
        fragment: &[u8],
    ) -> Result<Option<Vec<u8>>, FragmentError> {
        match position {
            FragmentPosition::Single => {
                self.staging = None;
                let mut image = Vec::new();
                image
                    .try_reserve_exact(fragment.len())
                    .map_err(|_| FragmentError::Allocation)?;
                image.extend_from_slice(fragment);
                Ok(Some(image))
            }
            FragmentPosition::First => {
                if offset_or_size < fragment.len() {
                    self.staging = None;
                    return Err(FragmentError::Overflow);
                }
                let mut staging = Staging::with_size(offset_or_size)?;
                if let Err(error) = staging.append(0, fragment) {
                    self.staging = None;
                    return Err(error);
                }
                self.staging = Some(staging);
                Ok(None)
            }
            FragmentPosition::Middle | FragmentPosition::Last => {
                let Some(staging) = self.staging.as_mut() else {
                    return Err(FragmentError::OutOfSequence);
                };
                if let Err(error) = staging.append(offset_or_size, fragment) {
                    self.staging = None;
                    return Err(error);
                }
                if position == FragmentPosition::Middle {
                    return Ok(None);
                }
                let staging = self.staging.take().filter(|s| s.filled == s.data.len());
                match staging {
                    Some(staging) => Ok(Some(staging.data)),
                    None => Err(FragmentError::OutOfSequence),
                }
            }
        }
    }

    /// Drops any partially staged payload.
    pub fn clear(&mut self) {
        self.staging = None;
    }

    /// Whether a fragmented payload is mid-flight.
    pub fn is_staging(&self) -> bool {
        self.staging.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{BlobAssembler, BlobError, ConfigBlob, FragmentError, FragmentPosition};
    use proptest::collection::vec as pvec;
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn sample_blob() -> ConfigBlob {
        ConfigBlob {
            capture_input_channels: Some(2),
            capture_output_channels: None,
            reference_delay_ms: Some(12.5),
            mic_gain: Some(0.75),
            tuning: Some(vec![0xAA; 9]),
        }
    }

    #[test]
    fn encoded_payload_decodes_to_the_same_fields() {
        let blob = sample_blob();
        assert_eq!(ConfigBlob::decode(&blob.encode()).unwrap(), blob);
    }

    #[test]
    fn empty_mask_is_a_valid_payload() {
        let blob = ConfigBlob::default();
        let bytes = blob.encode();
        assert_eq!(bytes.len(), 8);
        assert_eq!(ConfigBlob::decode(&bytes).unwrap(), blob);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = sample_blob().encode();
        bytes[0] = 9;
        assert_eq!(
            ConfigBlob::decode(&bytes),
            Err(BlobError::UnknownVersion(9))
        );
    }

    #[test]
    fn unknown_field_bits_are_rejected() {
        let mut bytes = ConfigBlob::default().encode();
        bytes[4] |= 0x80;
        assert_eq!(
            ConfigBlob::decode(&bytes),
            Err(BlobError::UnknownFields(0x80))
        );
    }

    #[test]
    fn truncated_tuning_is_rejected() {
        let mut bytes = sample_blob().encode();
        bytes.truncate(bytes.len() - 1);
        assert_eq!(ConfigBlob::decode(&bytes), Err(BlobError::Truncated));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = sample_blob().encode();
        bytes.push(0);
        assert_eq!(ConfigBlob::decode(&bytes), Err(BlobError::TrailingBytes(1)));
    }

    #[test]
    fn channel_fields_reconcile() {
        let mut blob = ConfigBlob::default();
        assert_eq!(blob.requested_capture_channels(), Ok(None));

        blob.capture_output_channels = Some(4);
        assert_eq!(blob.requested_capture_channels(), Ok(Some(4)));

        blob.capture_input_channels = Some(4);
        assert_eq!(blob.requested_capture_channels(), Ok(Some(4)));

        blob.capture_input_channels = Some(2);
        assert_eq!(blob.requested_capture_channels(), Err((2, 4)));
    }

    #[test]
    fn fragments_reassemble_the_single_image() {
        let image = sample_blob().encode();
        let mut assembler = BlobAssembler::new();

        assert_eq!(
            assembler
                .push(FragmentPosition::First, image.len(), &image[..8])
                .unwrap(),
            None
        );
        assert_eq!(
            assembler
                .push(FragmentPosition::Middle, 8, &image[8..16])
                .unwrap(),
            None
        );
        let complete = assembler
            .push(FragmentPosition::Last, 16, &image[16..])
            .unwrap();
        assert_eq!(complete, Some(image));
        assert!(!assembler.is_staging());
    }

    #[test]
    fn single_write_discards_any_staged_fragments() {
        let mut assembler = BlobAssembler::new();
        assembler
            .push(FragmentPosition::First, 32, &[0; 8])
            .unwrap();
        let image = assembler
            .push(FragmentPosition::Single, 0, &[1, 2, 3])
            .unwrap();
        assert_eq!(image, Some(vec![1, 2, 3]));
        assert!(!assembler.is_staging());
    }

    #[test]
    fn middle_without_first_is_out_of_sequence() {
        let mut assembler = BlobAssembler::new();
        assert_eq!(
            assembler.push(FragmentPosition::Middle, 0, &[0; 4]),
            Err(FragmentError::OutOfSequence)
        );
    }

    #[test]
    fn wrong_offset_drops_the_staged_payload() {
        let mut assembler = BlobAssembler::new();
        assembler
            .push(FragmentPosition::First, 16, &[0; 8])
            .unwrap();
        assert_eq!(
            assembler.push(FragmentPosition::Middle, 4, &[0; 4]),
            Err(FragmentError::OutOfSequence)
        );
        assert!(!assembler.is_staging());
        // The writer must reopen with First; a retry at the failed offset
        // has nothing to continue.
        assert_eq!(
            assembler.push(FragmentPosition::Middle, 8, &[0; 4]),
            Err(FragmentError::OutOfSequence)
        );
    }

    #[test]
    fn oversized_fragment_is_an_overflow() {
        let mut assembler = BlobAssembler::new();
        assembler
            .push(FragmentPosition::First, 8, &[0; 8])
            .unwrap();
        assert_eq!(
            assembler.push(FragmentPosition::Last, 8, &[0; 1]),
            Err(FragmentError::Overflow)
        );
    }

    #[test]
    fn short_close_is_out_of_sequence() {
        let mut assembler = BlobAssembler::new();
        assembler
            .push(FragmentPosition::First, 16, &[0; 8])
            .unwrap();
        assert_eq!(
            assembler.push(FragmentPosition::Last, 8, &[0; 4]),
            Err(FragmentError::OutOfSequence)
        );
    }

    #[proptest]
    fn decode_never_panics(#[strategy(pvec(any::<u8>(), 0..64))] bytes: Vec<u8>) {
        let _ = ConfigBlob::decode(&bytes);
    }

    #[proptest]
    fn any_split_into_fragments_reassembles(
        #[strategy(pvec(any::<u8>(), 3..40))] image: Vec<u8>,
        #[strategy(1usize..8)] chunk: usize,
    ) {
        let mut assembler = BlobAssembler::new();
        // At least two fragments, so the sequence exercises First and Last.
        let chunk = chunk.min(image.len() - 1);
        let mut offset = 0;
        let mut result = None;
        while offset < image.len() {
            let end = (offset + chunk).min(image.len());
            let position = if offset == 0 {
                FragmentPosition::First
            } else if end == image.len() {
                FragmentPosition::Last
            } else {
                FragmentPosition::Middle
            };
            let arg = if offset == 0 { image.len() } else { offset };
            result = assembler.push(position, arg, &image[offset..end]).unwrap();
            offset = end;
        }
        prop_assert_eq!(result, Some(image));
    }
}
