//! UDS Diagnostic Protocol Support
//!
//! This crate provides the wire-level pieces the polling scheduler
//! consumes: building multiplexed ReadDataByIdentifier requests,
//! decoding positive/negative responses, thin DoIP framing over TCP,
//! and per-server capacity profiles.

mod capacity;
mod doip;
mod error;
mod request;
mod response;
mod transport;

pub use capacity::{CapacityMap, ServerCapacity};
pub use doip::{DiagFrame, DoipPayload};
pub use error::UdsError;
pub use request::{did_from_bytes, read_data_by_identifier};
pub use response::{decode_response, ResponseCode, UdsResponse};
pub use transport::{LoopbackConfig, UdsTransport};

/// UDS service identifiers
pub mod service {
    /// ReadDataByIdentifier request
    pub const READ_DATA_BY_IDENTIFIER: u8 = 0x22;
    /// ReadDataByIdentifier positive response
    pub const READ_DATA_BY_IDENTIFIER_REPLY: u8 = 0x62;
    /// Negative response marker
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
}
