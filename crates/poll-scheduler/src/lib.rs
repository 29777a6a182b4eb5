//! Adaptive DID Polling Scheduler
//!
//! Polls many independently-identified signals on remote ECUs over a
//! shared, lossy request/response transport. Each signal's poll
//! interval adapts to the volatility of its recent payload history;
//! batches are multiplexed per server and matched back to their
//! in-flight slot asynchronously.

mod capture;
mod config;
mod dispatch;
mod error;
mod interval;
mod partition;
mod registry;
mod request;
mod session;
mod slot;
mod stats;
mod worker;

pub use config::{DispatchMode, SchedulerConfig};
pub use dispatch::{Batch, DispatchQueue};
pub use error::SchedulerError;
pub use interval::Interval;
pub use partition::{needs_split, partition, SPLIT_MARGIN};
pub use registry::Registry;
pub use request::{PolledRequest, SharedRequest, SignalId, SignalKey};
pub use session::{PollSession, StopHandle};
pub use slot::{Delivery, SlotTable};
pub use stats::{SessionStats, StatsSnapshot};
