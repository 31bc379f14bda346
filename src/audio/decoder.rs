//! # Decode Capabilities
//!
//! Two ways of getting PCM out of a container, both backed by `symphonia`:
//!
//! - **Primary** ([`AudioDecoder`]): decode a whole file in one go and return a
//!   mono [`PcmBuffer`]. Used directly for WAV/FLAC/OGG and on the transcoder's
//!   WAV output.
//! - **Streaming** ([`StreamingDecoder`]): open the bytes as a stream of raw
//!   PCM frames plus the declared sample rate and channel count. This is the
//!   fallback when no transcoder is around; the caller interprets the frames
//!   itself (see [`crate::audio::frames`]).
//!
//! Both are traits so the normalizer can be tested with fakes.

use crate::audio::format::AudioFormat;
use crate::audio::frames::{downmix_to_mono, FrameError};
use crate::audio::{PcmBuffer, PcmError};
use byteorder::{ByteOrder, LittleEndian};
use std::io::Cursor;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::ConvertibleSample;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::debug;

/// Errors produced by the decode capabilities.
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("no decodable audio track found")]
    NoAudioTrack,

    #[error("audio stream does not declare a sample rate")]
    MissingSampleRate,

    #[error("unsupported or corrupt audio: {0}")]
    Symphonia(#[from] SymphoniaError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Pcm(#[from] PcmError),
}

/// Whole-file decode to mono PCM.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], format: &AudioFormat) -> Result<PcmBuffer, DecoderError>;
}

/// A stream of raw little-endian PCM frames.
pub trait FrameSource {
    /// Declared sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Declared channel count; frames are interleaved across this many channels.
    fn channels(&self) -> usize;

    /// Next raw frame, or `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, DecoderError>;
}

/// Opens bytes as a [`FrameSource`] without any external transcoder.
pub trait StreamingDecoder: Send + Sync {
    fn open(&self, bytes: &[u8], format: &AudioFormat) -> Result<Box<dyn FrameSource>, DecoderError>;
}

/// Probed container plus a codec decoder for its first audio track.
struct OpenedStream {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    declared_rate: Option<u32>,
    declared_channels: Option<usize>,
}

impl OpenedStream {
    fn open(bytes: &[u8], format: &AudioFormat) -> Result<Self, DecoderError> {
        let cursor = Cursor::new(bytes.to_vec());
        let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

        // The hint only biases probing; symphonia still sniffs the content.
        let mut hint = Hint::new();
        hint.with_extension(format.as_str());

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoAudioTrack)?;

        let track_id = track.id;
        let declared_rate = track.codec_params.sample_rate;
        let declared_channels = track.codec_params.channels.map(|c| c.count());
        let decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            declared_rate,
            declared_channels,
        })
    }

    /// Decode the next packet of our track into interleaved samples.
    ///
    /// Corrupt packets are skipped, matching how most players behave.
    fn next_samples<S: ConvertibleSample>(&mut self) -> Result<Option<(SignalSpec, Vec<S>)>, DecoderError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buf = SampleBuffer::<S>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    return Ok(Some((spec, buf.samples().to_vec())));
                }
                Err(SymphoniaError::DecodeError(reason)) => {
                    debug!("Skipping corrupt packet: {}", reason);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Primary decoder: WAV, FLAC, OGG/Vorbis (and whatever else symphonia was built with).
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8], format: &AudioFormat) -> Result<PcmBuffer, DecoderError> {
        let mut stream = OpenedStream::open(bytes, format)?;
        let mut sample_rate = stream.declared_rate;
        let mut samples = Vec::new();

        while let Some((spec, interleaved)) = stream.next_samples::<f32>()? {
            sample_rate.get_or_insert(spec.rate);
            samples.extend(downmix_to_mono(&interleaved, spec.channels.count())?);
        }

        let sample_rate = sample_rate.ok_or(DecoderError::MissingSampleRate)?;
        Ok(PcmBuffer::new(samples, sample_rate)?)
    }
}

/// Streaming decoder that emits each packet as interleaved s16le bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaStreamingDecoder;

impl StreamingDecoder for SymphoniaStreamingDecoder {
    fn open(&self, bytes: &[u8], format: &AudioFormat) -> Result<Box<dyn FrameSource>, DecoderError> {
        let mut stream = OpenedStream::open(bytes, format)?;

        // Some containers (MP4/AAC) only reveal the channel layout once the
        // first packet is decoded, so decode it up front.
        let first = stream.next_samples::<i16>()?;
        let (sample_rate, channels) = match &first {
            Some((spec, _)) => (Some(spec.rate), spec.channels.count()),
            None => (stream.declared_rate, stream.declared_channels.unwrap_or(1)),
        };
        let sample_rate = sample_rate.ok_or(DecoderError::MissingSampleRate)?;

        Ok(Box::new(SymphoniaFrameSource {
            stream,
            sample_rate,
            channels,
            pending: first.map(|(_, samples)| samples),
        }))
    }
}

struct SymphoniaFrameSource {
    stream: OpenedStream,
    sample_rate: u32,
    channels: usize,
    pending: Option<Vec<i16>>,
}

impl FrameSource for SymphoniaFrameSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, DecoderError> {
        let samples = match self.pending.take() {
            Some(samples) => samples,
            None => match self.stream.next_samples::<i16>()? {
                Some((_, samples)) => samples,
                None => return Ok(None),
            },
        };

        let mut bytes = vec![0u8; samples.len() * 2];
        LittleEndian::write_i16_into(&samples, &mut bytes);
        Ok(Some(bytes))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{sine_i16, wav_bytes};
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_primary_decoder_reads_wav() {
        let samples = sine_i16(4410, 22050);
        let bytes = wav_bytes(&samples, 22050, 1);

        let buf = SymphoniaDecoder.decode(&bytes, &AudioFormat::Wav).unwrap();

        assert_eq!(buf.sample_rate(), 22050);
        assert_eq!(buf.len(), samples.len());
        assert_relative_eq!(buf.samples()[100], samples[100] as f32 / 32768.0, epsilon = 1e-4);
    }

    #[test]
    fn test_primary_decoder_downmixes_stereo() {
        // Left and right cancel out.
        let interleaved: Vec<i16> = (0..2000).flat_map(|_| [8000i16, -8000]).collect();
        let bytes = wav_bytes(&interleaved, 16000, 2);

        let buf = SymphoniaDecoder.decode(&bytes, &AudioFormat::Wav).unwrap();

        assert_eq!(buf.sample_rate(), 16000);
        assert_eq!(buf.len(), 2000);
        assert!(buf.samples().iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn test_primary_decoder_rejects_garbage() {
        let garbage = b"definitely not a wav file, just some text".to_vec();
        assert!(SymphoniaDecoder.decode(&garbage, &AudioFormat::Wav).is_err());
    }

    #[test]
    fn test_streaming_decoder_yields_s16le_frames() {
        let interleaved: Vec<i16> = (0..1000).flat_map(|i| [i as i16, -(i as i16)]).collect();
        let bytes = wav_bytes(&interleaved, 8000, 2);

        let mut source = SymphoniaStreamingDecoder.open(&bytes, &AudioFormat::Wav).unwrap();
        assert_eq!(source.sample_rate(), 8000);
        assert_eq!(source.channels(), 2);

        let mut total_bytes = 0;
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.len() % 4, 0);
            total_bytes += frame.len();
        }
        assert_eq!(total_bytes, interleaved.len() * 2);
    }
}
