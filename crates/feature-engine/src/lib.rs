//! Signal Volatility Scoring
//!
//! Turns the bounded payload history of one polled signal into a scalar
//! "interestingness" score driving adaptive poll intervals. Two
//! formulations exist: the normalized ratio form (canonical) and a
//! legacy tanh-saturated form with spectral terms.

mod score;
mod spectral;

pub use score::{estimate, SignalFeatures, MIN_WINDOW};
pub use spectral::LegacyScorer;
