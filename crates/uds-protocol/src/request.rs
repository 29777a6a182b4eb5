//! ReadDataByIdentifier Request Building

use crate::service;

/// Build a multiplexed ReadDataByIdentifier request for a list of DIDs
///
/// The DIDs are encoded big-endian in order. An empty list yields the
/// bare service byte, which servers reject with IncorrectMessageLength;
/// callers are expected to batch at least one DID.
pub fn read_data_by_identifier(dids: &[u16]) -> Vec<u8> {
    let mut request = Vec::with_capacity(1 + dids.len() * 2);
    request.push(service::READ_DATA_BY_IDENTIFIER);
    for did in dids {
        request.extend_from_slice(&did.to_be_bytes());
    }
    request
}

/// Read the leading 2-byte identifier from a response payload slice
pub fn did_from_bytes(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_did() {
        assert_eq!(read_data_by_identifier(&[0xF190]), vec![0x22, 0xF1, 0x90]);
    }

    #[test]
    fn test_multiplexed_dids_keep_order() {
        let request = read_data_by_identifier(&[0x1234, 0xABCD, 0x0001]);
        assert_eq!(
            request,
            vec![0x22, 0x12, 0x34, 0xAB, 0xCD, 0x00, 0x01]
        );
    }

    #[test]
    fn test_did_from_bytes() {
        assert_eq!(did_from_bytes(&[0xF1, 0x90, 0xAA]), Some(0xF190));
        assert_eq!(did_from_bytes(&[0xF1]), None);
    }
}
