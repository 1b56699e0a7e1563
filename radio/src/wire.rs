//! Wire Message Codec
//!
//! Fixed-layout framing for IQ subframes carried over the IPC transport.
//! One datagram is one message: a header with explicit little-endian field
//! encoding (the two peers are separate processes and must agree byte for
//! byte), a small reserved tail for future extension, then the complex
//! sample payload.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use common::RadioTime;
use num_complex::Complex32;

use crate::RadioError;

/// Longest subframe the link carries, in samples.
pub const MAX_SUBFRAME_SAMPLES: usize = 0x8000;

/// Bytes per complex sample (f32 I + f32 Q).
pub const BYTES_PER_SAMPLE: usize = 8;

/// Longest subframe payload in bytes.
pub const MAX_SUBFRAME_BYTES: usize = MAX_SUBFRAME_SAMPLES * BYTES_PER_SAMPLE;

/// Reserved tail after the fixed header fields.
pub const RESERVED_LEN: usize = 24;

/// Encoded header length in bytes.
pub const HEADER_LEN: usize = 8 + 4 + 4 + 4 + 4 + 4 + 12 + 12 + RESERVED_LEN;

bitflags! {
    /// Burst delimiters carried in the header flags field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BurstFlags: u32 {
        /// First block of a contiguous transmission
        const START_OF_BURST = 1 << 0;
        /// Last block of a contiguous transmission
        const END_OF_BURST = 1 << 1;
    }
}

/// Framing header preceding every IQ payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    /// Strictly increasing per sender
    pub seqnum: u64,
    /// Payload length in bytes, always `nof_samples * BYTES_PER_SAMPLE`
    pub nof_bytes: u32,
    /// Payload length in complex samples
    pub nof_samples: u32,
    /// Sample rate the payload was produced at, in Hz
    pub srate: f32,
    /// Transmit gain applied at the sender, in dB
    pub gain: f32,
    /// Burst delimiters
    pub flags: BurstFlags,
    /// TTI this payload is scheduled for
    pub target_tti: RadioTime,
    /// Wall-clock time the message left the sender
    pub sent_at: RadioTime,
}

impl FrameHeader {
    /// Serialize into `buf` with the fixed little-endian layout.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.seqnum);
        buf.put_u32_le(self.nof_bytes);
        buf.put_u32_le(self.nof_samples);
        buf.put_f32_le(self.srate);
        buf.put_f32_le(self.gain);
        buf.put_u32_le(self.flags.bits());
        buf.put_u64_le(self.target_tti.full_secs());
        buf.put_u32_le(self.target_tti.subsec_micros());
        buf.put_u64_le(self.sent_at.full_secs());
        buf.put_u32_le(self.sent_at.subsec_micros());
        buf.put_bytes(0, RESERVED_LEN);
    }

    /// Parse a header from the front of `data`, enforcing the framing
    /// invariants.
    pub fn decode(data: &[u8]) -> Result<Self, RadioError> {
        if data.len() < HEADER_LEN {
            return Err(RadioError::Codec(format!(
                "truncated header, {} of {} bytes",
                data.len(),
                HEADER_LEN
            )));
        }

        let mut buf = data;
        let seqnum = buf.get_u64_le();
        let nof_bytes = buf.get_u32_le();
        let nof_samples = buf.get_u32_le();
        let srate = buf.get_f32_le();
        let gain = buf.get_f32_le();
        let flags = BurstFlags::from_bits_truncate(buf.get_u32_le());
        let tti_secs = buf.get_u64_le();
        let tti_micros = buf.get_u32_le();
        let sent_secs = buf.get_u64_le();
        let sent_micros = buf.get_u32_le();
        buf.advance(RESERVED_LEN);

        if nof_bytes as usize != nof_samples as usize * BYTES_PER_SAMPLE {
            return Err(RadioError::Codec(format!(
                "byte count {} does not match {} samples",
                nof_bytes, nof_samples
            )));
        }
        if nof_samples as usize > MAX_SUBFRAME_SAMPLES {
            return Err(RadioError::Codec(format!(
                "{} samples exceeds the {} sample subframe limit",
                nof_samples, MAX_SUBFRAME_SAMPLES
            )));
        }

        Ok(Self {
            seqnum,
            nof_bytes,
            nof_samples,
            srate,
            gain,
            flags,
            target_tti: RadioTime::new(tti_secs, tti_micros),
            sent_at: RadioTime::new(sent_secs, sent_micros),
        })
    }
}

/// Append the IQ payload to `buf` as little-endian f32 pairs.
pub fn encode_samples(samples: &[Complex32], buf: &mut BytesMut) {
    buf.reserve(samples.len() * BYTES_PER_SAMPLE);
    for s in samples {
        buf.put_f32_le(s.re);
        buf.put_f32_le(s.im);
    }
}

/// Parse an IQ payload of little-endian f32 pairs.
pub fn decode_samples(data: &[u8]) -> Result<Vec<Complex32>, RadioError> {
    if data.len() % BYTES_PER_SAMPLE != 0 {
        return Err(RadioError::Codec(format!(
            "payload of {} bytes is not a whole number of samples",
            data.len()
        )));
    }

    let mut buf = data;
    let mut samples = Vec::with_capacity(data.len() / BYTES_PER_SAMPLE);
    while buf.has_remaining() {
        let re = buf.get_f32_le();
        let im = buf.get_f32_le();
        samples.push(Complex32::new(re, im));
    }
    Ok(samples)
}

/// A decoded message as it sits in the receive queue.
#[derive(Debug, Clone)]
pub struct IqFrame {
    pub header: FrameHeader,
    pub samples: Vec<Complex32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> FrameHeader {
        FrameHeader {
            seqnum: 42,
            nof_bytes: 4 * BYTES_PER_SAMPLE as u32,
            nof_samples: 4,
            srate: 1.92e6,
            gain: 12.5,
            flags: BurstFlags::START_OF_BURST,
            target_tti: RadioTime::new(100, 250_000),
            sent_at: RadioTime::new(100, 248_000),
        }
    }

    #[test]
    fn test_header_round_trip() {
        let hdr = sample_header();
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);

        let decoded = FrameHeader::decode(&buf).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn test_header_rejects_mismatched_byte_count() {
        let mut hdr = sample_header();
        hdr.nof_bytes += 1;
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);

        assert!(matches!(
            FrameHeader::decode(&buf),
            Err(RadioError::Codec(_))
        ));
    }

    #[test]
    fn test_header_rejects_oversized_subframe() {
        let mut hdr = sample_header();
        hdr.nof_samples = MAX_SUBFRAME_SAMPLES as u32 + 1;
        hdr.nof_bytes = hdr.nof_samples * BYTES_PER_SAMPLE as u32;
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);

        assert!(FrameHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_header_rejects_truncation() {
        let hdr = sample_header();
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);

        assert!(FrameHeader::decode(&buf[..HEADER_LEN - 1]).is_err());
    }

    #[test]
    fn test_payload_round_trip() {
        let samples = vec![
            Complex32::new(1.0, 0.0),
            Complex32::new(0.0, 1.0),
            Complex32::new(-1.0, 0.0),
            Complex32::new(0.0, -1.0),
        ];
        let mut buf = BytesMut::new();
        encode_samples(&samples, &mut buf);
        assert_eq!(buf.len(), samples.len() * BYTES_PER_SAMPLE);

        let decoded = decode_samples(&buf).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_payload_rejects_partial_sample() {
        assert!(decode_samples(&[0u8; 7]).is_err());
    }
}
