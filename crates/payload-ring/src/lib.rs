//! Payload Sample Ring Buffer
//!
//! Provides a bounded ring buffer holding the raw payload history of a
//! single polled signal. The oldest sample is evicted once capacity is
//! reached.

mod ring;

pub use ring::{SampleRing, DEFAULT_CAPACITY};

use serde::{Deserialize, Serialize};

/// One raw payload observation for a signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSample {
    /// Raw response bytes (identifier stripped)
    pub bytes: Vec<u8>,
    /// Timestamp when the sample was captured (Unix ms)
    pub timestamp_ms: u64,
}

impl PayloadSample {
    /// Create a new sample
    pub fn new(bytes: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            bytes,
            timestamp_ms,
        }
    }

    /// Payload width in bits
    pub fn bit_len(&self) -> usize {
        self.bytes.len() * 8
    }
}
