//! Persistence Layer
//!
//! Loads and stores the polled request list (JSON, written atomically)
//! and appends per-poll results to a CSV row sink during long sessions.

mod sink;
mod store;

pub use sink::{CsvResultSink, NullResultSink, ResultRecord, ResultSink};
pub use store::{
    load_request_list, load_request_list_with, store_request_list, LoadOptions, StoredRequest,
};

use thiserror::Error;

/// Storage errors
///
/// Load/store failures are fatal for the operation that invoked them;
/// callers abort the session rather than continue with partial state.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No requests loaded from {0}")]
    EmptyRequestList(String),
}
