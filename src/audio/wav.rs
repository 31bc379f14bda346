//! PCM WAV serialization of the final masked audio.

use crate::audio::PcmBuffer;
use std::io::Cursor;

/// Encode a mono buffer as a 16-bit PCM WAV file, in memory.
///
/// Samples are clamped to [-1.0, 1.0] before scaling, so anything the DSP
/// stages pushed past full scale clips instead of wrapping around.
pub fn encode_wav(buffer: &PcmBuffer) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + buffer.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in buffer.samples() {
            writer.write_sample(float_to_pcm(sample))?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

fn float_to_pcm(sample: f32) -> i16 {
    let scaled = sample.clamp(-1.0, 1.0) * 32767.0;
    scaled.round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_wav_keeps_rate_and_length() {
        let buffer = PcmBuffer::new(vec![0.0, 0.5, -0.5, 1.0, -1.0], 44100).unwrap();
        let bytes = encode_wav(&buffer).unwrap();

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);

        let samples: Vec<i16> = reader.into_samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0, 16384, -16384, 32767, -32767]);
    }

    #[test]
    fn test_out_of_range_samples_clip() {
        assert_eq!(float_to_pcm(3.0), 32767);
        assert_eq!(float_to_pcm(-3.0), -32767);
    }
}
