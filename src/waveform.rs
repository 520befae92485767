//! Waveform synthesis.
//!
//! The DAC takes 12-bit samples MSB-aligned in 16-bit words; the low nibble
//! is padding and is ignored on transmit, so every written word has it
//! cleared. The test tone goes out on the Q lane only, I stays at zero.

use std::f64::consts::TAU;

use crate::RawSample;

/// Clears the 4 padding bits of a 12-bit-in-16-bit sample word.
pub const SAMPLE_MASK: RawSample = !0xf;

/// Fills `words` (interleaved I, Q) with a cosine at `tone_hz`:
/// `q[n] = round(ampl * cos(2π·f·n/fs))` shifted into the top 12 bits.
/// Each written pair is reported through `sink` so the transmitted sequence
/// can be persisted alongside the captured one. Pure and deterministic.
pub fn fill_tone(
    words: &mut [RawSample],
    fs_hz: i64,
    tone_hz: f64,
    ampl: f64,
    mut sink: impl FnMut(RawSample, RawSample),
) {
    let dt = 1.0 / fs_hz as f64;
    for (n, pair) in words.chunks_exact_mut(2).enumerate() {
        let t = n as f64 * dt;
        let q = ((ampl * (TAU * tone_hz * t).cos()).round() as RawSample) << 4;
        pair[0] = 0;
        pair[1] = q & SAMPLE_MASK;
        sink(pair[0], pair[1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    #[test]
    fn reference_tone_matches_the_closed_form() {
        let mut words = vec![0i16; 2 * 1024];
        fill_tone(&mut words, 3_000_000, 50.0e3, 48.0, |_, _| {});

        for (n, pair) in words.chunks_exact(2).enumerate() {
            let expected =
                ((48.0 * (TAU * 50.0e3 * n as f64 / 3.0e6).cos()).round() as i16 * 16) & !0xf;
            assert_eq!(pair[0], 0, "I lane must stay zero at n={n}");
            assert_eq!(pair[1], expected, "Q mismatch at n={n}");
        }
    }

    #[test]
    fn low_nibble_is_always_clear() {
        let mut words = vec![0i16; 2 * 600];
        fill_tone(&mut words, 3_000_000, 50.0e3, 48.0, |_, _| {});
        assert!(words.iter().all(|w| w & 0xf == 0));
    }

    #[test]
    fn sink_sees_every_pair_in_order() {
        let mut words = vec![0i16; 2 * 32];
        let mut seen = Vec::new();
        fill_tone(&mut words, 3_000_000, 50.0e3, 48.0, |i, q| seen.push((i, q)));
        assert_eq!(seen.len(), 32);
        for (pair, &(i, q)) in words.chunks_exact(2).zip(&seen) {
            assert_eq!((pair[0], pair[1]), (i, q));
        }
    }

    #[test]
    fn tone_period_repeats_every_sixty_samples() {
        // 3 MS/s over 50 kHz is exactly 60 samples per cycle.
        let mut words = vec![0i16; 2 * 240];
        fill_tone(&mut words, 3_000_000, 50.0e3, 48.0, |_, _| {});
        let q: Vec<i16> = words.chunks_exact(2).map(|p| p[1]).collect();
        assert_eq!(&q[..60], &q[60..120]);
        assert_eq!(q[0], 48 * 16);
    }
}
