//! Legacy Tanh-Saturated Score with Spectral Terms
//!
//! Alternate scorer kept for experiment tooling. Components are pushed
//! through tanh instead of normalized, and two frequency-domain terms
//! computed over the concatenated window bitstream are folded in. Not
//! numerically interchangeable with the canonical ratio form and not
//! wired into the interval controller.

use rustfft::{num_complex::Complex, FftPlanner};
use tracing::trace;

/// Feature sums at or above this are capped to the controller ceiling
const CAP_THRESHOLD: f64 = 2.5;

/// Value returned once the cap threshold is reached
const CAP_VALUE: f64 = 4.0;

/// Legacy scorer holding a reusable FFT planner
pub struct LegacyScorer {
    planner: FftPlanner<f64>,
}

/// Component breakdown of a legacy score
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyFeatures {
    pub changing_bits: f64,
    pub entropy: f64,
    pub power_spectrum_density: f64,
    pub frequency_ratio: f64,
}

impl LegacyFeatures {
    /// Saturating sum: totals past the threshold collapse to the cap
    pub fn feature_sum(&self) -> f64 {
        let sum =
            self.changing_bits + self.entropy + self.power_spectrum_density + self.frequency_ratio;
        if sum < CAP_THRESHOLD {
            sum
        } else {
            CAP_VALUE
        }
    }
}

impl LegacyScorer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Score a window of raw payloads, oldest first
    pub fn score(&mut self, payloads: &[&[u8]]) -> LegacyFeatures {
        if payloads.len() < 2 {
            return LegacyFeatures::default();
        }

        let spectrum = self.power_spectrum(payloads);
        let features = LegacyFeatures {
            changing_bits: changing_bits(payloads),
            entropy: entropy(payloads),
            power_spectrum_density: power_spectrum_density(&spectrum),
            frequency_ratio: frequency_ratio(&spectrum),
        };
        trace!(?features, "legacy score components");
        features
    }

    /// Power spectrum of the concatenated window bitstream, DC bin and
    /// mirrored half dropped
    fn power_spectrum(&mut self, payloads: &[&[u8]]) -> Vec<f64> {
        let bits: Vec<f64> = payloads
            .iter()
            .flat_map(|payload| payload.iter())
            .flat_map(|byte| (0..8).rev().map(move |i| ((byte >> i) & 1) as f64))
            .collect();
        if bits.len() < 4 {
            return Vec::new();
        }

        let mut buffer: Vec<Complex<f64>> = bits.iter().map(|&b| Complex::new(b, 0.0)).collect();
        let fft = self.planner.plan_fft_forward(buffer.len());
        fft.process(&mut buffer);

        buffer
            .iter()
            .take(buffer.len() / 2)
            .skip(1)
            .map(|c| c.norm_sqr())
            .collect()
    }
}

impl Default for LegacyScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Total differing bits across adjacent pairs, tanh-saturated
fn changing_bits(payloads: &[&[u8]]) -> f64 {
    let mut total = 0u64;
    for pair in payloads.windows(2) {
        let len = pair[0].len().min(pair[1].len());
        for i in 0..len {
            total += (pair[0][i] ^ pair[1][i]).count_ones() as u64;
        }
    }
    (total as f64).tanh()
}

/// Unnormalized Shannon entropy of sample values, tanh-saturated
fn entropy(payloads: &[&[u8]]) -> f64 {
    let total = payloads.len();
    let mut counts: std::collections::HashMap<&[u8], usize> = std::collections::HashMap::new();
    for payload in payloads {
        *counts.entry(payload).or_insert(0) += 1;
    }
    if counts.len() < 2 {
        return 0.0;
    }
    let entropy: f64 = counts
        .values()
        .map(|&count| {
            let p = count as f64 / total as f64;
            p * (1.0 / p).log2()
        })
        .sum();
    entropy.tanh()
}

/// Sum of squared spectrum magnitudes, tanh-saturated
fn power_spectrum_density(spectrum: &[f64]) -> f64 {
    let total: f64 = spectrum.iter().map(|p| p * p).sum();
    total.tanh()
}

/// Ratio between the two dominant spectral peaks, tanh-saturated
fn frequency_ratio(spectrum: &[f64]) -> f64 {
    if spectrum.len() < 2 {
        return 0.0;
    }
    let mut sorted: Vec<f64> = spectrum.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    if sorted[1] == 0.0 {
        return 0.0;
    }
    (sorted[0] / sorted[1]).tanh()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_window_scores_zero() {
        let payload: &[u8] = &[0x55; 4];
        let window = vec![payload; 10];
        let mut scorer = LegacyScorer::new();
        let features = scorer.score(&window);
        assert_eq!(features.changing_bits, 0.0);
        assert_eq!(features.entropy, 0.0);
        assert_eq!(features.feature_sum(), 0.0);
    }

    #[test]
    fn test_sum_is_capped() {
        // Heavy bit churn saturates every tanh term toward 1
        let a: &[u8] = &[0x00; 8];
        let b: &[u8] = &[0xFF; 8];
        let window = vec![a, b, a, b, a, b, a, b];
        let mut scorer = LegacyScorer::new();
        let features = scorer.score(&window);
        assert_eq!(features.feature_sum(), 4.0);
    }

    #[test]
    fn test_score_bounded() {
        let window: Vec<&[u8]> = vec![&[1, 2, 3], &[4, 5, 6], &[7, 8, 9]];
        let mut scorer = LegacyScorer::new();
        let features = scorer.score(&window);
        assert!(features.feature_sum() <= 4.0);
        assert!(features.feature_sum() >= 0.0);
    }

    #[test]
    fn test_short_window_scores_zero() {
        let single: &[u8] = &[1, 2];
        let mut scorer = LegacyScorer::new();
        assert_eq!(scorer.score(&[single]).feature_sum(), 0.0);
    }
}
