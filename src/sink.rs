//! Counting-event sink: a Postgres-compatible batched writer plus an
//! in-memory stand-in for tests, fronted by a flush-policy batcher.
//!
//! Grounded on `postgres_manager.py::PostgresManager`: a connection pool
//! (there `psycopg2.pool.SimpleConnectionPool`, here `r2d2_postgres`), one
//! multi-row `INSERT` per batch, and a capped rolling latency sample buffer
//! feeding `snapshot_metrics`. The batch-by-count-or-time policy and the
//! overflow cap are `spec.md` §6 additions the original's caller-driven
//! `insert_detections` does not need, since Python always received
//! pre-batched rows from its caller.

use crate::errors::Errors;
use postgres::NoTls;
use r2d2_postgres::PostgresConnectionManager;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const FLUSH_ROW_THRESHOLD: usize = 200;
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);
const OVERFLOW_CAP: usize = 10_000;
const LATENCY_SAMPLE_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEventType {
    Enter,
    Exit,
}

#[derive(Debug, Clone)]
pub struct SinkEvent {
    pub event_type: SinkEventType,
    pub zone_id: String,
    pub zone_name: String,
    pub channel_id: u32,
    pub track_id: u64,
    pub person_id: Option<String>,
    pub frame_num: u64,
    pub epoch_millis: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySnapshot {
    pub insert_p50_ms: f64,
    pub insert_p95_ms: f64,
    pub samples: usize,
}

/// A sink that accepts already-batched rows. `flush` is idempotent and
/// returns the number of rows it persisted.
pub trait EventSink: Send + Sync {
    fn write_batch(&self, events: &[SinkEvent]) -> Result<usize, Errors>;
    fn ping(&self) -> bool;
}

/// Postgres-backed sink. One pooled connection per `write_batch` call, as
/// the source's `_conn()` context manager does per call.
pub struct PostgresEventSink {
    pool: r2d2::Pool<PostgresConnectionManager<NoTls>>,
    latencies_ms: Mutex<VecDeque<f64>>,
}

impl PostgresEventSink {
    pub fn connect(dsn: &str, pool_max_size: u32) -> Result<Self, Errors> {
        let config: postgres::Config = dsn.parse().map_err(|e: postgres::Error| Errors::SinkUnavailable(e.to_string()))?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = r2d2::Pool::builder()
            .max_size(pool_max_size)
            .build(manager)
            .map_err(|e| Errors::SinkUnavailable(e.to_string()))?;
        Ok(Self {
            pool,
            latencies_ms: Mutex::new(VecDeque::new()),
        })
    }

    fn record_latency(&self, latency_ms: f64) {
        let mut samples = self.latencies_ms.lock().unwrap();
        samples.push_back(latency_ms);
        if samples.len() > LATENCY_SAMPLE_CAP {
            samples.pop_front();
        }
    }

    /// Supplemented from `snapshot_metrics` — a p50/p95 view over the last
    /// 100 inserts, exposed as a metrics gauge rather than a log line.
    pub fn latency_snapshot(&self) -> LatencySnapshot {
        let mut data: Vec<f64> = self.latencies_ms.lock().unwrap().iter().copied().collect();
        if data.is_empty() {
            return LatencySnapshot {
                insert_p50_ms: 0.0,
                insert_p95_ms: 0.0,
                samples: 0,
            };
        }
        data.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = data.len();
        let p50 = data[((n - 1) as f64 * 0.5) as usize];
        let p95 = data[((n - 1) as f64 * 0.95) as usize];
        LatencySnapshot {
            insert_p50_ms: p50,
            insert_p95_ms: p95,
            samples: n,
        }
    }
}

impl EventSink for PostgresEventSink {
    fn write_batch(&self, events: &[SinkEvent]) -> Result<usize, Errors> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().map_err(|e| Errors::SinkUnavailable(e.to_string()))?;
        let started = Instant::now();

        let mut txn = conn.transaction().map_err(|e| Errors::SinkUnavailable(e.to_string()))?;
        for event in events {
            let event_type = match event.event_type {
                SinkEventType::Enter => "enter",
                SinkEventType::Exit => "exit",
            };
            txn.execute(
                "INSERT INTO counter_events \
                 (event_type, zone_id, zone_name, channel_id, track_id, person_id, frame_number, occurred_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, to_timestamp($8::double precision / 1000.0))",
                &[
                    &event_type,
                    &event.zone_id,
                    &event.zone_name,
                    &(event.channel_id as i64),
                    &(event.track_id as i64),
                    &event.person_id,
                    &(event.frame_num as i64),
                    &event.epoch_millis,
                ],
            )
            .map_err(|e| Errors::SinkUnavailable(e.to_string()))?;
        }
        txn.commit().map_err(|e| Errors::SinkUnavailable(e.to_string()))?;

        self.record_latency(started.elapsed().as_secs_f64() * 1000.0);
        Ok(events.len())
    }

    fn ping(&self) -> bool {
        match self.pool.get() {
            Ok(mut conn) => conn.simple_query("SELECT 1").is_ok(),
            Err(_) => false,
        }
    }
}

/// In-memory sink for tests and for the `spec.md` §4.2-style degraded path.
#[derive(Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for InMemoryEventSink {
    fn write_batch(&self, events: &[SinkEvent]) -> Result<usize, Errors> {
        self.events.lock().unwrap().extend_from_slice(events);
        Ok(events.len())
    }

    fn ping(&self) -> bool {
        true
    }
}

/// Accumulates events and flushes them to the underlying [`EventSink`] once
/// 200 rows have queued or 500ms have elapsed since the oldest unflushed
/// row arrived, whichever comes first (`spec.md` §6). Past 10,000 queued
/// rows the oldest are dropped rather than grown without bound, and the
/// drop is surfaced via the `sink_overflow_dropped_total` counter.
pub struct EventBatcher {
    sink: Arc<dyn EventSink>,
    queue: Mutex<BatcherQueue>,
}

struct BatcherQueue {
    events: VecDeque<SinkEvent>,
    oldest_queued_at: Option<Instant>,
}

impl EventBatcher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            queue: Mutex::new(BatcherQueue {
                events: VecDeque::new(),
                oldest_queued_at: None,
            }),
        }
    }

    /// Enqueues `event` and flushes synchronously if the row-count or
    /// elapsed-time threshold has been crossed.
    pub fn push(&self, event: SinkEvent) -> Result<(), Errors> {
        let should_flush = {
            let mut queue = self.queue.lock().unwrap();
            if queue.events.len() >= OVERFLOW_CAP {
                queue.events.pop_front();
                metrics::counter!("sink_overflow_dropped_total").increment(1);
            }
            if queue.oldest_queued_at.is_none() {
                queue.oldest_queued_at = Some(Instant::now());
            }
            queue.events.push_back(event);
            queue.events.len() >= FLUSH_ROW_THRESHOLD
                || queue.oldest_queued_at.map(|t| t.elapsed() >= FLUSH_INTERVAL).unwrap_or(false)
        };
        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Unconditional flush, e.g. at shutdown. Returns the row count
    /// actually written. Rows stay queued if the sink call fails, so a
    /// transient outage doesn't silently drop data — only the overflow cap
    /// does that, and it says so via `sink_overflow_dropped_total`.
    pub fn flush(&self) -> Result<usize, Errors> {
        let batch: Vec<SinkEvent> = {
            let queue = self.queue.lock().unwrap();
            queue.events.iter().cloned().collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }
        let written = self.sink.write_batch(&batch)?;
        let mut queue = self.queue.lock().unwrap();
        let drain_count = written.min(queue.events.len());
        queue.events.drain(..drain_count);
        queue.oldest_queued_at = if queue.events.is_empty() { None } else { Some(Instant::now()) };
        Ok(written)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().unwrap().events.len()
    }
}
