//! KV store contract (`spec.md` §6) plus two implementations: an in-memory
//! fallback (mandated by §4.2's failure semantics) and a Redis-backed
//! adapter. Grounded on `reid/cache.py`'s single-client-reference posture —
//! one shared connection guarded by a lock, not a pool, matching how the
//! original talks to Redis.

use crate::errors::Errors;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// `GET` / `SETEX key ttl value` / `SCAN cursor MATCH pattern COUNT n`
/// against a Redis-compatible store, values encoded as UTF-8 (JSON or raw
/// string per key schema in `spec.md` §6).
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, Errors>;
    fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), Errors>;
    /// Full un-paginated scan over a `*`-glob pattern; the caller handles
    /// cursoring concerns, this trait just returns the matched keys.
    fn scan(&self, pattern: &str) -> Result<Vec<String>, Errors>;
    /// Best-effort connectivity probe, used at startup and to drive the
    /// `kv_degraded` gauge.
    fn ping(&self) -> bool;
}

/// Shell-style glob match supporting only `*` (what `SCAN MATCH` patterns
/// in this crate ever use: a trailing `*` or a `*` splitting a fixed
/// prefix/suffix around a variable segment).
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == candidate;
    }

    let mut cursor = 0usize;
    if let Some(first) = segments.first() {
        if !candidate[cursor..].starts_with(first) {
            return false;
        }
        cursor += first.len();
    }

    let last_index = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate().skip(1) {
        if i == last_index {
            return candidate[cursor..].ends_with(segment);
        }
        if segment.is_empty() {
            continue;
        }
        match candidate[cursor..].find(segment) {
            Some(found) => cursor += found + segment.len(),
            None => return false,
        }
    }
    true
}

struct InMemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Mutex-guarded in-memory fallback, used per-process when the real KV
/// backend is unreachable (`spec.md` §4.2, §5).
#[derive(Default)]
pub struct InMemoryKv {
    entries: Mutex<HashMap<String, InMemoryEntry>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_expired(entry: &InMemoryEntry) -> bool {
        Instant::now() >= entry.expires_at
    }
}

impl KvStore for InMemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, Errors> {
        let mut guard = self.entries.lock().unwrap();
        if let Some(entry) = guard.get(key) {
            if Self::now_expired(entry) {
                guard.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), Errors> {
        let mut guard = self.entries.lock().unwrap();
        guard.insert(
            key.to_string(),
            InMemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + std::time::Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    fn scan(&self, pattern: &str) -> Result<Vec<String>, Errors> {
        let mut guard = self.entries.lock().unwrap();
        guard.retain(|_, v| !Self::now_expired(v));
        Ok(guard
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect())
    }

    fn ping(&self) -> bool {
        true
    }
}

/// Redis-backed adapter. One shared, mutex-guarded connection — matching
/// the original's single `redis.Redis` client reference rather than a
/// pool, since Redis multiplexes a single connection fine at this call
/// volume.
pub struct RedisKv {
    conn: Mutex<redis::Connection>,
}

impl RedisKv {
    pub fn connect(url: &str) -> Result<Self, Errors> {
        let client = redis::Client::open(url).map_err(|e| Errors::KvUnavailable(e.to_string()))?;
        let conn = client
            .get_connection()
            .map_err(|e| Errors::KvUnavailable(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl KvStore for RedisKv {
    fn get(&self, key: &str) -> Result<Option<String>, Errors> {
        use redis::Commands;
        let mut conn = self.conn.lock().unwrap();
        conn.get(key).map_err(|e| Errors::KvUnavailable(e.to_string()))
    }

    fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), Errors> {
        use redis::Commands;
        let mut conn = self.conn.lock().unwrap();
        conn.set_ex(key, value, ttl_secs)
            .map_err(|e| Errors::KvUnavailable(e.to_string()))
    }

    fn scan(&self, pattern: &str) -> Result<Vec<String>, Errors> {
        use redis::Commands;
        let mut conn = self.conn.lock().unwrap();
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query(&mut *conn)
                .map_err(|e| Errors::KvUnavailable(e.to_string()))?;
            out.extend(keys);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(out)
    }

    fn ping(&self) -> bool {
        let mut conn = match self.conn.lock() {
            Ok(c) => c,
            Err(_) => return false,
        };
        redis::cmd("PING").query::<String>(&mut *conn).is_ok()
    }
}

/// Seconds since the Unix epoch, used for the daily-counter TTL arithmetic
/// that `spec.md` §4.2 specifies in wall-clock terms.
pub fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
