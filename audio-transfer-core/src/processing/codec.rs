use crate::models::audio_models::SampleFormat;

const INT32_SCALE: f64 = 2_147_483_648.0; // 2^31
const INT16_SCALE: f64 = 32_768.0; // 2^15

/// A single device-native sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeSample {
    F32(f32),
    I32(i32),
    I16(i16),
}

/// Converts between normalized `f64` samples and a device-native format.
///
/// Encoding saturates out-of-range input to the native extremes; it never
/// wraps and never fails. Decoding divides by the same scale the encoder
/// multiplied by. One codec is built per session from the negotiated format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCodec {
    format: SampleFormat,
}

impl SampleCodec {
    pub fn new(format: SampleFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Bytes per native sample.
    pub fn sample_size(&self) -> usize {
        self.format.sample_size()
    }

    pub fn encode(&self, sample: f64) -> NativeSample {
        match self.format {
            SampleFormat::Float32 => NativeSample::F32(sample as f32),
            SampleFormat::Int32 => {
                let scaled = (sample * INT32_SCALE).clamp(i32::MIN as f64, i32::MAX as f64);
                NativeSample::I32(scaled as i32)
            }
            SampleFormat::Int16 => {
                let scaled = (sample * INT16_SCALE).clamp(i16::MIN as f64, i16::MAX as f64);
                NativeSample::I16(scaled as i16)
            }
        }
    }

    pub fn decode(&self, sample: NativeSample) -> f64 {
        match sample {
            NativeSample::F32(v) => v as f64,
            NativeSample::I32(v) => v as f64 / INT32_SCALE,
            NativeSample::I16(v) => v as f64 / INT16_SCALE,
        }
    }

    /// Encode `sample` into `out`, which must be exactly `sample_size()` bytes.
    #[inline]
    pub fn write_bytes(&self, sample: f64, out: &mut [u8]) {
        match self.encode(sample) {
            NativeSample::F32(v) => out.copy_from_slice(&v.to_ne_bytes()),
            NativeSample::I32(v) => out.copy_from_slice(&v.to_ne_bytes()),
            NativeSample::I16(v) => out.copy_from_slice(&v.to_ne_bytes()),
        }
    }

    /// Decode one native sample from exactly `sample_size()` bytes.
    #[inline]
    pub fn read_bytes(&self, bytes: &[u8]) -> f64 {
        let native = match self.format {
            SampleFormat::Float32 => {
                NativeSample::F32(f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            SampleFormat::Int32 => {
                NativeSample::I32(i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            SampleFormat::Int16 => NativeSample::I16(i16::from_ne_bytes([bytes[0], bytes[1]])),
        };
        self.decode(native)
    }

    /// Largest decode error the format can introduce for in-range input.
    pub fn quantization_step(&self) -> f64 {
        match self.format {
            SampleFormat::Float32 => 0.0,
            SampleFormat::Int32 => 1.0 / INT32_SCALE,
            SampleFormat::Int16 => 1.0 / INT16_SCALE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Vec<f64> {
        (0..=200).map(|i| (i as f64 - 100.0) / 100.0).collect()
    }

    #[test]
    fn int16_round_trip_within_one_step() {
        let codec = SampleCodec::new(SampleFormat::Int16);
        for x in ramp() {
            let back = codec.decode(codec.encode(x));
            assert!((back - x).abs() <= 1.0 / 32768.0, "x={} back={}", x, back);
        }
    }

    #[test]
    fn int32_round_trip_within_one_step() {
        let codec = SampleCodec::new(SampleFormat::Int32);
        for x in ramp() {
            let back = codec.decode(codec.encode(x));
            assert!((back - x).abs() <= 1.0 / 2_147_483_648.0, "x={} back={}", x, back);
        }
    }

    #[test]
    fn float32_passes_representable_values_through() {
        let codec = SampleCodec::new(SampleFormat::Float32);
        for x in [0.0, 0.5, -0.25, 1.0, -1.0, 0.125] {
            assert_eq!(codec.decode(codec.encode(x)), x);
        }
        // Float32 does not scale or clamp.
        assert_eq!(codec.encode(2.0), NativeSample::F32(2.0));
    }

    #[test]
    fn int16_saturates_instead_of_wrapping() {
        let codec = SampleCodec::new(SampleFormat::Int16);
        assert_eq!(codec.encode(1.0), NativeSample::I16(i16::MAX));
        assert_eq!(codec.encode(2.0), NativeSample::I16(i16::MAX));
        assert_eq!(codec.encode(-1.0), NativeSample::I16(i16::MIN));
        assert_eq!(codec.encode(-3.0), NativeSample::I16(i16::MIN));
    }

    #[test]
    fn int32_saturates_instead_of_wrapping() {
        let codec = SampleCodec::new(SampleFormat::Int32);
        assert_eq!(codec.encode(1.5), NativeSample::I32(i32::MAX));
        assert_eq!(codec.encode(-1.5), NativeSample::I32(i32::MIN));
    }

    #[test]
    fn byte_round_trip_uses_native_width() {
        let codec = SampleCodec::new(SampleFormat::Int16);
        let mut bytes = [0u8; 2];
        codec.write_bytes(0.5, &mut bytes);
        assert_eq!(i16::from_ne_bytes(bytes), 16384);
        assert_eq!(codec.read_bytes(&bytes), 0.5);

        let codec = SampleCodec::new(SampleFormat::Float32);
        let mut bytes = [0u8; 4];
        codec.write_bytes(-0.75, &mut bytes);
        assert_eq!(f32::from_ne_bytes(bytes), -0.75);
    }
}
