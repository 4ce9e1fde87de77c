//! # varsel-core
//!
//! Foundation layer for the varsel stream-matching workers: inbound event and
//! alarm record types plus the shared indicator hit-statistics table.
//!
//! ### Key submodules:
//! - `events`: wire types for consumed events and produced alarms
//! - `stats`: mutex-guarded indicator occurrence table shared with the
//!   metrics surface

pub mod events;
pub mod stats;

pub use events::{AlarmRecord, InboundEvent};
pub use stats::{MatchStat, StatsTracker};
