//!
//! # retail-people-counter
//!
//! A multi-camera people-counting pipeline: per-frame detections flow through
//! a staff/customer classifier, zone geometry, cross-camera re-identification
//! and a once-per-day dedup gate before landing as enter/exit events on a
//! batched event sink.
//!
//! Each camera channel runs its own [`pipeline::ChannelWorker`] against
//! channel-local zone state; identity resolution and the daily count are
//! the only state shared across channels, both backed by a Redis-compatible
//! [`kv::KvStore`].
//!
//! ## Stack
//!
//! * `std::thread` - per-channel workers run on their own OS thread, not
//!   inside an async runtime (`spec.md` §5); see [`pipeline::ChannelWorker`].
//! * [metrics](https://docs.rs/metrics/latest/metrics/) - the instrument
//!   facade in [`metrics`]; an exporter is installed once by the binary.
//! * [log](https://docs.rs/log/latest/log/) / [env_logger](https://docs.rs/env_logger/latest/env_logger/) -
//!   structured log lines, configured by `RUST_LOG` the same way across
//!   every binary in this stack.
//! * [redis](https://docs.rs/redis/latest/redis/) - the identity catalog and
//!   daily counters in [`kv`]/[`identity`].
//! * [postgres](https://docs.rs/postgres/latest/postgres/) / [r2d2](https://docs.rs/r2d2/latest/r2d2/) -
//!   the batched event sink in [`sink`].

/// Zone polygon/line geometry and the hysteresis-free raw containment
/// tests `counter` builds its state machine on top of.
pub mod geometry;

/// The per-frame [`detection::Detection`] record and the external
/// collaborator contracts (detector, tracker, embedder, staff classifier).
pub mod detection;

/// Per-track staff/customer voting cache.
pub mod voting;

/// Redis-compatible key/value store contract plus an in-memory fallback.
pub mod kv;

/// Cross-channel person identity resolution and the once-per-day count gate.
pub mod identity;

/// Zone-based counting and its daily-person-dedup wrapper.
pub mod counter;

/// Batched counting-event sink, Postgres-backed with an in-memory
/// alternative for tests.
pub mod sink;

/// Named counters, histograms and gauges this crate emits.
pub mod metrics;

/// Configuration schema and loader.
pub mod config;

/// Per-channel worker composing the above into a running pipeline.
pub mod pipeline;

/// Crate-wide error type.
pub mod errors;

pub use errors::{Errors, Result};
