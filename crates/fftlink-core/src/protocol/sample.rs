//! Two-byte sample encoding
//!
//! Every wire byte carries 6 bits of payload. The top two bits are reserved
//! for frame markers: they are set on the first three bytes of a frame and
//! clear everywhere else.
//!
//! ```text
//!  byte 2k            byte 2k+1
//! [m m h5 h4 h3 h2 h1 h0] [m m l5 l4 l3 l2 l1 l0]  ->  sample k = h << 6 | l
//! ```

use crate::{FRAME_BYTES, MAX_SAMPLE, SAMPLES_PER_FRAME};

/// Both marker bits of a wire byte
pub const MARKER_MASK: u8 = 0xC0;

/// Payload bits of a wire byte
pub const PAYLOAD_MASK: u8 = 0x3F;

/// Number of leading frame bytes that carry markers
pub const MARKER_BYTES: usize = 3;

/// Decode one sample from two consecutive wire bytes
///
/// # Example
/// ```
/// use fftlink_core::protocol::sample::decode_sample;
///
/// assert_eq!(decode_sample(0xFF, 0xFF), 4095);
/// assert_eq!(decode_sample(0x00, 0x00), 0);
/// assert_eq!(decode_sample(0xE0, 0x00), 2048);
/// ```
#[inline]
pub fn decode_sample(b0: u8, b1: u8) -> u16 {
    (u16::from(b0 & PAYLOAD_MASK) << 6) | u16::from(b1 & PAYLOAD_MASK)
}

/// True when both marker bits are set
#[inline]
pub fn has_marker(byte: u8) -> bool {
    byte & MARKER_MASK == MARKER_MASK
}

/// True when the three leading bytes of `frame` all carry markers
pub fn markers_valid(frame: &[u8]) -> bool {
    frame.len() >= MARKER_BYTES && frame[..MARKER_BYTES].iter().all(|&b| has_marker(b))
}

/// Decode a whole frame into sample values
pub fn decode_frame(frame: &[u8; FRAME_BYTES]) -> [u16; SAMPLES_PER_FRAME] {
    let mut samples = [0u16; SAMPLES_PER_FRAME];
    decode_into(frame, &mut samples);
    samples
}

/// Decode a frame into a caller-owned buffer
pub fn decode_into(frame: &[u8; FRAME_BYTES], samples: &mut [u16; SAMPLES_PER_FRAME]) {
    for (pair, out) in frame.chunks_exact(2).zip(samples.iter_mut()) {
        *out = decode_sample(pair[0], pair[1]);
    }
}

/// Encode samples into device wire format
///
/// Values above 4095 are clamped. Marker bits are set on the first three
/// bytes, which is what the device emits at every frame boundary.
pub fn encode_frame(samples: &[u16; SAMPLES_PER_FRAME]) -> [u8; FRAME_BYTES] {
    let mut frame = [0u8; FRAME_BYTES];
    for (pair, &value) in frame.chunks_exact_mut(2).zip(samples.iter()) {
        let value = value.min(MAX_SAMPLE);
        pair[0] = ((value >> 6) as u8) & PAYLOAD_MASK;
        pair[1] = (value as u8) & PAYLOAD_MASK;
    }
    for byte in &mut frame[..MARKER_BYTES] {
        *byte |= MARKER_MASK;
    }
    frame
}

/// Encode a frame where every sample has the same value
pub fn encode_constant_frame(value: u16) -> [u8; FRAME_BYTES] {
    encode_frame(&[value; SAMPLES_PER_FRAME])
}
