//! Reader Module
//!
//! Multi-segment point reads over one shard or many.
//!
//! ## Lookup order
//! ```text
//!   memory segments (building, then dumping; newest first)
//!        │ all NotFound
//!        ▼
//!   disk segments (newest first, skipping those not older than the
//!                  caller's visibility locator)
//!        │
//!        ▼
//!   first non-NotFound wins, then TTL downgrade
//! ```

mod batch;
mod metrics;
mod multi_shard;
mod shard;
mod terminator;

pub use metrics::{PhaseTimer, ReadMetrics, ReadPhase};
pub use multi_shard::{shard_for_key, MultiShardReader};
pub use shard::{GetOptions, ShardReader};
pub use terminator::TimeoutTerminator;
