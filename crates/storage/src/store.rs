//! Request List Persistence

use crate::StorageError;
use payload_ring::PayloadSample;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// One persisted pollable signal
///
/// The scheduler owns its own richer request type; this is the flat
/// shape that survives between sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRequest {
    pub server_id: u16,
    pub tester_id: u16,
    pub did: u16,
    pub payload_length: usize,
    #[serde(default)]
    pub blacklisted: bool,
    /// Interval carried over so a follow-up session resumes where the
    /// last one left off; None means start from the configured maximum
    #[serde(default)]
    pub interval_current: Option<f64>,
    #[serde(default)]
    pub history: Vec<PayloadSample>,
}

/// Options controlling what gets loaded
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Drop stored payload history on load
    pub skip_history: bool,
    /// Drop requests whose first stored payload exceeds this length
    pub max_payload_length: Option<usize>,
}

/// Load a request list with default options
pub fn load_request_list(path: &Path) -> Result<Vec<StoredRequest>, StorageError> {
    load_request_list_with(path, &LoadOptions::default())
}

/// Load a request list, optionally filtering long payloads
pub fn load_request_list_with(
    path: &Path,
    options: &LoadOptions,
) -> Result<Vec<StoredRequest>, StorageError> {
    let content = std::fs::read_to_string(path)?;
    let mut requests: Vec<StoredRequest> = serde_json::from_str(&content)?;

    if let Some(max_len) = options.max_payload_length {
        let before = requests.len();
        requests.retain(|request| {
            request
                .history
                .first()
                .map_or(true, |sample| sample.bytes.len() <= max_len)
        });
        debug!(
            "Payload length filter ({} bytes) dropped {} requests",
            max_len,
            before - requests.len()
        );
    }

    if options.skip_history {
        for request in &mut requests {
            request.history.clear();
        }
    }

    if requests.is_empty() {
        return Err(StorageError::EmptyRequestList(path.display().to_string()));
    }

    info!("Loaded {} requests from {}", requests.len(), path.display());
    Ok(requests)
}

/// Store a request list as JSON
///
/// Written to a temporary sibling first and renamed into place, so a
/// failed write never leaves a truncated list behind.
pub fn store_request_list(path: &Path, requests: &[StoredRequest]) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(requests)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    info!("Stored {} requests to {}", requests.len(), path.display());
    Ok(())
}
