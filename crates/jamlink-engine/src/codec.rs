//! Interval payload codec seam.
//!
//! The wire treats interval audio as opaque bytes; the engine only needs the
//! capability set below. Variants are selected at construction and one codec
//! instance is bound per seat (the encode seat, and one decoder per peer
//! channel slot).

use jamlink_protocol::fourcc;

use crate::error::ClientError;

/// Raw 16-bit PCM frames, always available. Interoperates only with other
/// instances of this client.
pub const FOURCC_RAW_PCM: u32 = fourcc(*b"RAWw");

#[cfg(feature = "opus-codec")]
pub const FOURCC_OPUS: u32 = fourcc(*b"OPUS");

/// One directional codec instance: an encoder fed interleaved stereo f32,
/// or a decoder accumulating payload chunks back into PCM.
pub trait BlockCodec: Send {
    /// Payload tag announced in interval-begin messages.
    fn fourcc(&self) -> u32;

    /// Compresses a block of interleaved stereo samples. May return an empty
    /// vector while the codec buffers internally.
    fn encode_block(&mut self, pcm: &[f32]) -> Result<Vec<u8>, ClientError>;

    /// Flushes whatever the encoder still holds at an interval boundary.
    fn finalize(&mut self) -> Result<Vec<u8>, ClientError>;

    /// Decompresses one payload chunk, appending interleaved stereo samples.
    fn decode_block(&mut self, payload: &[u8], out: &mut Vec<f32>) -> Result<(), ClientError>;

    /// Discards streaming state between intervals.
    fn reset(&mut self);
}

/// Codec variant chosen when the plugin instance is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    RawPcm,
    #[cfg(feature = "opus-codec")]
    Opus,
}

impl CodecKind {
    pub fn create(
        self,
        sample_rate: u32,
        bitrate_kbps: u32,
    ) -> Result<Box<dyn BlockCodec>, ClientError> {
        match self {
            CodecKind::RawPcm => Ok(Box::new(RawPcmCodec)),
            #[cfg(feature = "opus-codec")]
            CodecKind::Opus => Ok(Box::new(opus_impl::OpusCodec::new(
                sample_rate,
                bitrate_kbps,
            )?)),
        }
    }
}

/// 16-bit little-endian PCM, two samples per frame, no container.
struct RawPcmCodec;

impl BlockCodec for RawPcmCodec {
    fn fourcc(&self) -> u32 {
        FOURCC_RAW_PCM
    }

    fn encode_block(&mut self, pcm: &[f32]) -> Result<Vec<u8>, ClientError> {
        let mut out = Vec::with_capacity(pcm.len() * 2);
        for &sample in pcm {
            let q = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            out.extend_from_slice(&q.to_le_bytes());
        }
        Ok(out)
    }

    fn finalize(&mut self) -> Result<Vec<u8>, ClientError> {
        Ok(Vec::new())
    }

    fn decode_block(&mut self, payload: &[u8], out: &mut Vec<f32>) -> Result<(), ClientError> {
        if payload.len() % 2 != 0 {
            return Err(ClientError::Codec("odd pcm payload length".into()));
        }
        out.reserve(payload.len() / 2);
        for pair in payload.chunks_exact(2) {
            let q = i16::from_le_bytes([pair[0], pair[1]]);
            out.push(f32::from(q) / f32::from(i16::MAX));
        }
        Ok(())
    }

    fn reset(&mut self) {}
}

#[cfg(feature = "opus-codec")]
mod opus_impl {
    use super::{BlockCodec, ClientError, FOURCC_OPUS};

    /// Stereo frames per Opus packet at 48 kHz (20 ms).
    const FRAME_SAMPLES: usize = 960 * 2;

    /// Opus packets prefixed with a little-endian u16 length so the chunked
    /// interval stream can be re-split on the receiving side.
    pub struct OpusCodec {
        encoder: opus::Encoder,
        decoder: opus::Decoder,
        pending: Vec<f32>,
        partial: Vec<u8>,
        packet: Vec<u8>,
    }

    impl OpusCodec {
        pub fn new(sample_rate: u32, bitrate_kbps: u32) -> Result<Self, ClientError> {
            let mut encoder =
                opus::Encoder::new(sample_rate, opus::Channels::Stereo, opus::Application::Audio)
                    .map_err(|e| ClientError::Codec(e.to_string()))?;
            encoder
                .set_bitrate(opus::Bitrate::Bits((bitrate_kbps * 1000) as i32))
                .map_err(|e| ClientError::Codec(e.to_string()))?;
            let decoder = opus::Decoder::new(sample_rate, opus::Channels::Stereo)
                .map_err(|e| ClientError::Codec(e.to_string()))?;
            Ok(Self {
                encoder,
                decoder,
                pending: Vec::new(),
                partial: Vec::new(),
                packet: vec![0u8; 4096],
            })
        }

        fn drain_pending(&mut self, flush: bool, out: &mut Vec<u8>) -> Result<(), ClientError> {
            while self.pending.len() >= FRAME_SAMPLES {
                let frame: Vec<f32> = self.pending.drain(..FRAME_SAMPLES).collect();
                let n = self
                    .encoder
                    .encode_float(&frame, &mut self.packet)
                    .map_err(|e| ClientError::Codec(e.to_string()))?;
                out.extend_from_slice(&(n as u16).to_le_bytes());
                out.extend_from_slice(&self.packet[..n]);
            }
            if flush && !self.pending.is_empty() {
                self.pending.resize(FRAME_SAMPLES, 0.0);
                self.drain_pending(false, out)?;
            }
            Ok(())
        }
    }

    impl BlockCodec for OpusCodec {
        fn fourcc(&self) -> u32 {
            FOURCC_OPUS
        }

        fn encode_block(&mut self, pcm: &[f32]) -> Result<Vec<u8>, ClientError> {
            self.pending.extend_from_slice(pcm);
            let mut out = Vec::new();
            self.drain_pending(false, &mut out)?;
            Ok(out)
        }

        fn finalize(&mut self) -> Result<Vec<u8>, ClientError> {
            let mut out = Vec::new();
            self.drain_pending(true, &mut out)?;
            Ok(out)
        }

        fn decode_block(&mut self, payload: &[u8], out: &mut Vec<f32>) -> Result<(), ClientError> {
            self.partial.extend_from_slice(payload);
            let mut frame = vec![0f32; FRAME_SAMPLES];
            loop {
                if self.partial.len() < 2 {
                    return Ok(());
                }
                let n = u16::from_le_bytes([self.partial[0], self.partial[1]]) as usize;
                if self.partial.len() < 2 + n {
                    return Ok(());
                }
                let decoded = self
                    .decoder
                    .decode_float(&self.partial[2..2 + n], &mut frame, false)
                    .map_err(|e| ClientError::Codec(e.to_string()))?;
                out.extend_from_slice(&frame[..decoded * 2]);
                self.partial.drain(..2 + n);
            }
        }

        fn reset(&mut self) {
            self.pending.clear();
            self.partial.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_pcm_round_trip_preserves_length() {
        let mut codec = CodecKind::RawPcm.create(48_000, 64).unwrap();
        let pcm: Vec<f32> = (0..960).map(|i| ((i as f32) * 0.01).sin() * 0.8).collect();

        let mut wire = codec.encode_block(&pcm).unwrap();
        wire.extend(codec.finalize().unwrap());

        let mut back = Vec::new();
        codec.decode_block(&wire, &mut back).unwrap();
        assert_eq!(back.len(), pcm.len());

        let worst = pcm
            .iter()
            .zip(&back)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(worst < 1.0 / 16_000.0, "quantization error {worst}");
    }

    #[test]
    fn odd_payload_is_a_codec_error() {
        let mut codec = CodecKind::RawPcm.create(48_000, 64).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            codec.decode_block(&[1, 2, 3], &mut out),
            Err(ClientError::Codec(_))
        ));
    }
}
