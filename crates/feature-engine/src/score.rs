//! Normalized Ratio Score (canonical form)

use serde::{Deserialize, Serialize};

/// Minimum window length below which features are undefined (scored 0)
pub const MIN_WINDOW: usize = 2;

/// Derived volatility features for one signal window
///
/// Both components lie in [0, 1]; the feature sum is their total and is
/// only meaningful as a relative score between signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalFeatures {
    /// Average fraction of bits flipping between adjacent samples
    pub changing_bits_ratio: f64,
    /// Shannon entropy of sample values, normalized by log2(window len)
    pub entropy: f64,
}

impl SignalFeatures {
    /// Combined score driving the interval controller
    pub fn feature_sum(&self) -> f64 {
        self.changing_bits_ratio + self.entropy
    }
}

/// Score a window of raw payloads, oldest first
///
/// Windows shorter than [`MIN_WINDOW`] score zero on both components. A
/// constant window also scores zero.
pub fn estimate(payloads: &[&[u8]]) -> SignalFeatures {
    if payloads.len() < MIN_WINDOW {
        return SignalFeatures::default();
    }
    SignalFeatures {
        changing_bits_ratio: changing_bits_ratio(payloads),
        entropy: entropy(payloads),
    }
}

/// Per-pair XOR bit difference, averaged over the window and normalized
/// by the bit width of the first sample. Pairs are compared up to the
/// shorter payload's length.
fn changing_bits_ratio(payloads: &[&[u8]]) -> f64 {
    let bit_width = payloads[0].len() * 8;
    if bit_width == 0 {
        return 0.0;
    }

    let mut total_different_bits = 0u64;
    for pair in payloads.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let len = a.len().min(b.len());
        for i in 0..len {
            total_different_bits += (a[i] ^ b[i]).count_ones() as u64;
        }
    }

    let average = total_different_bits as f64 / (payloads.len() - 1) as f64;
    round3(average / bit_width as f64)
}

/// Empirical Shannon entropy over the window, each sample treated as one
/// symbol, normalized into [0, 1] by log2(window length).
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

    round3(entropy / (total as f64).log2())
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
