//! Outcome recording.
//!
//! - [`StatisticsAggregator`]: best-effort counters in the `statistics` record
//! - [`LogRecorder`]: the operator-facing validation log

mod logs;
mod statistics;

pub use logs::{should_record, LogRecorder};
pub use statistics::{ProviderStats, Statistics, StatisticsAggregator};
