//! C8/C9 — zone-based counting and the daily-dedup wrapper around it.

pub mod daily;
pub mod zone_counter;

pub use daily::{DailyCounterEvent, DailyPersonCounter, DailyUpdateResult};
pub use zone_counter::{CounterEvent, CounterUpdateResult, EventType, ZoneCounter, ZoneCounts};
