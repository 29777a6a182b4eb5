//! Per-Server Batch Capacity Profiles
//!
//! The discovery tooling measures how many DIDs and payload bytes each
//! server tolerates in one multiplexed request. The scheduler consumes
//! that profile to bound batch formation; defaults apply when a server
//! was never profiled.

use crate::error::UdsError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Default DIDs per multiplexed request when no profile exists
pub const DEFAULT_MAX_DIDS: usize = 4;
/// Default payload byte budget per request when no profile exists
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256;

/// Batch limits for one server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapacity {
    /// Maximum DIDs in one multiplexed request
    pub max_dids_per_batch: usize,
    /// Maximum summed response payload bytes per request
    pub max_payload_bytes: usize,
}

impl Default for ServerCapacity {
    fn default() -> Self {
        Self {
            max_dids_per_batch: DEFAULT_MAX_DIDS,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Capacity profiles keyed by server id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapacityMap {
    servers: HashMap<u16, ServerCapacity>,
}

impl CapacityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a measured profile for a server
    pub fn insert(&mut self, server_id: u16, capacity: ServerCapacity) {
        self.servers.insert(server_id, capacity);
    }

    /// Profile for a server, falling back to defaults
    pub fn for_server(&self, server_id: u16) -> ServerCapacity {
        self.servers.get(&server_id).copied().unwrap_or_default()
    }

    /// Number of profiled servers
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Load profiles from the discovery performance list
    ///
    /// CSV rows of `server_id(hex),_,max_dids,max_payload_bytes` with a
    /// header line. Quoting with single quotes, as the discovery tool
    /// writes it, is tolerated.
    pub fn load_performance_list(path: &Path) -> Result<Self, UdsError> {
        let content = std::fs::read_to_string(path)?;
        let mut map = Self::new();
        for line in content.lines().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(|f| f.trim().trim_matches('\'')).collect();
            if fields.len() < 4 {
                return Err(UdsError::InvalidCapacityProfile(line.to_string()));
            }
            let server_id = u16::from_str_radix(fields[0].trim_start_matches("0x"), 16)
                .map_err(|_| UdsError::InvalidCapacityProfile(line.to_string()))?;
            let max_dids = fields[2]
                .parse::<usize>()
                .map_err(|_| UdsError::InvalidCapacityProfile(line.to_string()))?;
            let max_payload = fields[3]
                .parse::<usize>()
                .map_err(|_| UdsError::InvalidCapacityProfile(line.to_string()))?;
            map.insert(
                server_id,
                ServerCapacity {
                    max_dids_per_batch: max_dids.max(1),
                    max_payload_bytes: max_payload.max(1),
                },
            );
        }
        info!("Loaded capacity profiles for {} servers", map.len());
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_unknown_server() {
        let map = CapacityMap::new();
        let capacity = map.for_server(0x1781);
        assert_eq!(capacity.max_dids_per_batch, DEFAULT_MAX_DIDS);
        assert_eq!(capacity.max_payload_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut map = CapacityMap::new();
        map.insert(
            0x1781,
            ServerCapacity {
                max_dids_per_batch: 8,
                max_payload_bytes: 512,
            },
        );
        assert_eq!(map.for_server(0x1781).max_dids_per_batch, 8);
        assert_eq!(map.for_server(0x1782).max_dids_per_batch, DEFAULT_MAX_DIDS);
    }

    #[test]
    fn test_load_performance_list() {
        let dir = std::env::temp_dir().join("didpoll-capacity-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("performance.csv");
        std::fs::write(
            &path,
            "server,services,max_dids,max_payload\n'1781',_,6,300\n'0e81',_,2,64\n",
        )
        .unwrap();

        let map = CapacityMap::load_performance_list(&path).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.for_server(0x1781).max_dids_per_batch, 6);
        assert_eq!(map.for_server(0x0E81).max_payload_bytes, 64);
        std::fs::remove_file(&path).ok();
    }
}
