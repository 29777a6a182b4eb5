//! UDS Response Decoding
//!
//! Responses are modeled as a tagged variant rather than a single
//! struct whose meaning depends on which fields are populated.

use crate::error::UdsError;
use crate::service;
use serde::{Deserialize, Serialize};

/// Negative response codes relevant to batched polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLength,
    ResponseTooLong,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestOutOfRange,
    SecurityAccessDenied,
    ResponsePending,
    Other(u8),
}

impl ResponseCode {
    /// Decode from the NRC byte
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x10 => ResponseCode::GeneralReject,
            0x11 => ResponseCode::ServiceNotSupported,
            0x12 => ResponseCode::SubFunctionNotSupported,
            0x13 => ResponseCode::IncorrectMessageLength,
            0x14 => ResponseCode::ResponseTooLong,
            0x21 => ResponseCode::BusyRepeatRequest,
            0x22 => ResponseCode::ConditionsNotCorrect,
            0x31 => ResponseCode::RequestOutOfRange,
            0x33 => ResponseCode::SecurityAccessDenied,
            0x78 => ResponseCode::ResponsePending,
            other => ResponseCode::Other(other),
        }
    }

    /// Encode back to the NRC byte
    pub fn as_byte(&self) -> u8 {
        match self {
            ResponseCode::GeneralReject => 0x10,
            ResponseCode::ServiceNotSupported => 0x11,
            ResponseCode::SubFunctionNotSupported => 0x12,
            ResponseCode::IncorrectMessageLength => 0x13,
            ResponseCode::ResponseTooLong => 0x14,
            ResponseCode::BusyRepeatRequest => 0x21,
            ResponseCode::ConditionsNotCorrect => 0x22,
            ResponseCode::RequestOutOfRange => 0x31,
            ResponseCode::SecurityAccessDenied => 0x33,
            ResponseCode::ResponsePending => 0x78,
            ResponseCode::Other(byte) => *byte,
        }
    }

    /// Codes signaling that the batch shape itself was wrong
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ResponseCode::RequestOutOfRange | ResponseCode::ResponseTooLong
        )
    }
}

/// Decoded diagnostic response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdsResponse {
    /// Positive response: echoed service id and payload data
    Positive { service: u8, data: Vec<u8> },
    /// Negative response for a service
    Negative { service: u8, code: ResponseCode },
}

impl UdsResponse {
    pub fn is_positive(&self) -> bool {
        matches!(self, UdsResponse::Positive { .. })
    }
}

/// Decode raw UDS bytes into a tagged response
pub fn decode_response(raw: &[u8]) -> Result<UdsResponse, UdsError> {
    match raw {
        [] => Err(UdsError::InvalidResponse("empty payload".into())),
        [service::NEGATIVE_RESPONSE, rest @ ..] => {
            if rest.len() < 2 {
                return Err(UdsError::InvalidResponse(
                    "negative response shorter than 3 bytes".into(),
                ));
            }
            Ok(UdsResponse::Negative {
                service: rest[0],
                code: ResponseCode::from_byte(rest[1]),
            })
        }
        [sid, rest @ ..] if sid & 0x40 != 0 => Ok(UdsResponse::Positive {
            service: sid & !0x40,
            data: rest.to_vec(),
        }),
        [sid, ..] => Err(UdsError::InvalidResponse(format!(
            "unexpected service id {sid:02X} in response"
        ))),
    }
}
