//! Thin DoIP Framing
//!
//! Only the pieces the scheduler needs: diagnostic messages in and out,
//! acknowledgements recognized and skipped. Routing activation and
//! vehicle announcement stay with the discovery tooling.

use crate::error::UdsError;

/// ISO 13400-2:2012 protocol version
pub const PROTOCOL_VERSION: u8 = 0x02;

/// DoIP payload type: diagnostic message
pub const DIAGNOSTIC_MESSAGE: u16 = 0x8001;
/// DoIP payload type: diagnostic message positive acknowledgement
pub const DIAGNOSTIC_ACK: u16 = 0x8002;
/// DoIP payload type: diagnostic message negative acknowledgement
pub const DIAGNOSTIC_NACK: u16 = 0x8003;

/// One diagnostic message as seen by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagFrame {
    /// Logical address the message came from
    pub source: u16,
    /// Logical address the message is for
    pub target: u16,
    /// UDS bytes
    pub payload: Vec<u8>,
}

/// Decoded DoIP payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoipPayload {
    Diagnostic(DiagFrame),
    Ack,
    Nack(u8),
    Other(u16),
}

/// Encode a diagnostic message into a full DoIP frame
pub fn encode_diagnostic(source: u16, target: u16, payload: &[u8]) -> Vec<u8> {
    let body_len = 4 + payload.len();
    let mut frame = Vec::with_capacity(8 + body_len);
    frame.push(PROTOCOL_VERSION);
    frame.push(!PROTOCOL_VERSION);
    frame.extend_from_slice(&DIAGNOSTIC_MESSAGE.to_be_bytes());
    frame.extend_from_slice(&(body_len as u32).to_be_bytes());
    frame.extend_from_slice(&source.to_be_bytes());
    frame.extend_from_slice(&target.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Parse a DoIP header, returning (payload type, payload length)
pub fn parse_header(header: &[u8; 8]) -> Result<(u16, usize), UdsError> {
    if header[0] != PROTOCOL_VERSION || header[1] != !PROTOCOL_VERSION {
        return Err(UdsError::UnsupportedVersion(header[0]));
    }
    let payload_type = u16::from_be_bytes([header[2], header[3]]);
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    Ok((payload_type, length))
}

/// Decode a DoIP payload body for a known payload type
pub fn decode_payload(payload_type: u16, body: &[u8]) -> Result<DoipPayload, UdsError> {
    match payload_type {
        DIAGNOSTIC_MESSAGE => {
            if body.len() < 4 {
                return Err(UdsError::TruncatedFrame {
                    expected: 4,
                    actual: body.len(),
                });
            }
            Ok(DoipPayload::Diagnostic(DiagFrame {
                source: u16::from_be_bytes([body[0], body[1]]),
                target: u16::from_be_bytes([body[2], body[3]]),
                payload: body[4..].to_vec(),
            }))
        }
        DIAGNOSTIC_ACK => Ok(DoipPayload::Ack),
        DIAGNOSTIC_NACK => {
            // ACK code follows the address pair when present
            Ok(DoipPayload::Nack(body.get(4).copied().unwrap_or(0)))
        }
        other => Ok(DoipPayload::Other(other)),
    }
}
