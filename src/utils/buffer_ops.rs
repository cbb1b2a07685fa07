const I16_SCALE: f32 = 32768.0;

#[inline(always)]
pub fn short_to_float(sample: i16) -> f32 {
    sample as f32 / I16_SCALE
}

/// Rounds to the nearest step and saturates; NaN maps to silence.
#[inline(always)]
pub fn float_to_short(sample: f32) -> i16 {
    (sample * I16_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn shorts_to_floats(input: &[i16], output: &mut [f32]) {
    debug_assert!(output.len() >= input.len());

    for (out, &sample) in output.iter_mut().zip(input) {
        *out = short_to_float(sample);
    }
}

pub fn floats_to_shorts(input: &[f32], output: &mut [i16]) {
    debug_assert!(output.len() >= input.len());

    for (out, &sample) in output.iter_mut().zip(input) {
        *out = float_to_short(sample);
    }
}

pub fn rms(buffer: &[f32]) -> f32 {
    if buffer.is_empty() {
        return 0.0;
    }
    let sum: f64 = buffer.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / buffer.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_scale_round_trip() {
        let short = float_to_short(0.5);
        assert_eq!(short, 16384);
        assert!((short_to_float(short) - 0.5).abs() <= 1.0 / I16_SCALE);
    }

    #[test]
    fn test_full_integer_range_round_trips() {
        for value in i16::MIN..=i16::MAX {
            assert_eq!(float_to_short(short_to_float(value)), value);
        }
    }

    #[test]
    fn test_conversion_rounds_instead_of_truncating() {
        // 0.7 steps above zero must become 1, not 0.
        assert_eq!(float_to_short(0.7 / I16_SCALE), 1);
        assert_eq!(float_to_short(-0.7 / I16_SCALE), -1);
        assert_eq!(float_to_short(0.3 / I16_SCALE), 0);
    }

    #[test]
    fn test_out_of_range_saturates() {
        assert_eq!(float_to_short(1.5), i16::MAX);
        assert_eq!(float_to_short(-1.5), i16::MIN);
        assert_eq!(float_to_short(f32::NAN), 0);
    }

    #[test]
    fn test_slice_conversion() {
        let input = vec![i16::MIN, -16384, 0, 16384, i16::MAX];
        let mut floats = vec![0.0; 5];
        shorts_to_floats(&input, &mut floats);
        assert_eq!(&floats[..4], &[-1.0, -0.5, 0.0, 0.5]);

        let mut shorts = vec![0; 5];
        floats_to_shorts(&floats, &mut shorts);
        assert_eq!(shorts, input);
    }

    #[test]
    fn test_rms_of_full_scale_square() {
        let buffer = vec![1.0, -1.0, 1.0, -1.0];
        assert!((rms(&buffer) - 1.0).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }
}
