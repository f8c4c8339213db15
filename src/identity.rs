//! C7 — person identity manager.
//!
//! Grounded on `person_identity_manager.py`: cross-channel re-identification
//! against a KV-persisted catalog, plus the global once-per-day enter/exit
//! dedup counter. The cosine-similarity shape mirrors the teacher's
//! [`crate::distance::cosine`], generalized from fixed-size `nalgebra`
//! feature matrices to the KV-serialized `Vec<f32>` embeddings this system
//! persists across process restarts.

use crate::kv::{unix_seconds_now, KvStore};
use chrono::TimeZone;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.75;
pub const DEFAULT_REDIS_TTL_SECONDS: u64 = 86_400;
const SECONDS_PER_DAY: u64 = 86_400;
const MIN_COUNTER_TTL_SECONDS: u64 = 3_600;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersonIdentityRecord {
    person_id: String,
    embedding: Vec<f32>,
    updated_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DailyCounts {
    pub enter: u8,
    pub exit: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Enter,
    Exit,
}

impl EventType {
    fn field(self, counts: &mut DailyCounts) -> &mut u8 {
        match self {
            EventType::Enter => &mut counts.enter,
            EventType::Exit => &mut counts.exit,
        }
    }
}

fn key_person(person_id: &str) -> String {
    format!("person:identity:{person_id}")
}

fn key_track(channel_id: u32, track_id: u64) -> String {
    format!("person:track:{channel_id}:{track_id}")
}

fn key_counter_global(person_id: &str, date_str: &str) -> String {
    format!("person:counter:global:{person_id}:{date_str}")
}

/// Cosine similarity; norms below `1e-9` are treated as zero so a
/// degenerate (all-zero) embedding never "matches" anything (`spec.md`
/// §4.2 step 2).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for i in 0..len {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a < 1e-9 || norm_b < 1e-9 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// `P{channel_id}_{first 8 hex chars of md5(channel_id "_" track_id "_"
/// epoch_seconds)}` — `spec.md` §4.2. Two identities minted in the same
/// second for the same `(channel, track)` collide; this is a documented
/// open question in `spec.md` §9, not fixed here.
fn mint_person_id(channel_id: u32, track_id: u64, epoch_seconds: u64) -> String {
    let input = format!("{channel_id}_{track_id}_{epoch_seconds}");
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("P{channel_id}_{}", &hex[..8])
}

/// Today's date key in the configured timezone, `YYYY-MM-DD`.
pub fn today_date_key(tz: &chrono_tz::Tz) -> String {
    let now_utc = chrono::Utc::now();
    now_utc.with_timezone(tz).format("%Y-%m-%d").to_string()
}

/// Seconds remaining until the next local midnight in `tz`, floored to a
/// full day if under an hour remains (`spec.md` §4.2 step 3).
pub fn seconds_until_midnight(tz: &chrono_tz::Tz) -> u64 {
    let now = chrono::Utc::now().with_timezone(tz);
    let tomorrow = now.date_naive().succ_opt().unwrap_or(now.date_naive());
    let midnight = tz
        .from_local_datetime(&tomorrow.and_hms_opt(0, 0, 0).unwrap())
        .single()
        .unwrap_or_else(|| now + chrono::Duration::seconds(SECONDS_PER_DAY as i64));
    let remaining = (midnight.timestamp() - now.timestamp()).max(0) as u64;
    if remaining < MIN_COUNTER_TTL_SECONDS {
        SECONDS_PER_DAY
    } else {
        remaining
    }
}

struct InMemoryFallback {
    persons: HashMap<String, Vec<f32>>,
    tracks: HashMap<String, String>,
    daily_counters: HashMap<String, DailyCounts>,
}

impl InMemoryFallback {
    fn new() -> Self {
        Self {
            persons: HashMap::new(),
            tracks: HashMap::new(),
            daily_counters: HashMap::new(),
        }
    }
}

/// Degradation signal the manager surfaces (`spec.md` §4.2's "must surface
/// this degradation via a metric, not an error return").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityBackend {
    Kv,
    InMemoryFallback,
}

pub struct PersonIdentityManager {
    kv: Box<dyn KvStore>,
    similarity_threshold: f32,
    redis_ttl_seconds: u64,
    timezone: chrono_tz::Tz,
    fallback: Mutex<InMemoryFallback>,
    degraded: std::sync::atomic::AtomicBool,
}

impl PersonIdentityManager {
    pub fn new(kv: Box<dyn KvStore>, similarity_threshold: f32, redis_ttl_seconds: u64, timezone: chrono_tz::Tz) -> Self {
        let degraded = !kv.ping();
        Self {
            kv,
            similarity_threshold,
            redis_ttl_seconds,
            timezone,
            fallback: Mutex::new(InMemoryFallback::new()),
            degraded: std::sync::atomic::AtomicBool::new(degraded),
        }
    }

    pub fn backend(&self) -> IdentityBackend {
        if self.degraded.load(std::sync::atomic::Ordering::Relaxed) {
            IdentityBackend::InMemoryFallback
        } else {
            IdentityBackend::Kv
        }
    }

    fn mark_degraded(&self) {
        crate::metrics::kv_error();
        if !self.degraded.swap(true, std::sync::atomic::Ordering::Relaxed) {
            crate::metrics::kv_degraded(true);
        }
    }

    /// `get_or_assign` — `spec.md` §4.2. Returns `None` iff `embedding` is
    /// empty.
    pub fn get_or_assign(&self, channel_id: u32, track_id: u64, embedding: &[f32]) -> Option<String> {
        if embedding.is_empty() {
            return None;
        }

        if let Some(existing) = self.get_track_person_id(channel_id, track_id) {
            return Some(existing);
        }

        if let Some(matched) = self.match_person(embedding) {
            self.set_track_person_id(channel_id, track_id, &matched);
            crate::metrics::reid_match();
            return Some(matched);
        }

        let new_id = mint_person_id(channel_id, track_id, unix_seconds_now());
        self.set_person_embedding(&new_id, embedding);
        self.set_track_person_id(channel_id, track_id, &new_id);
        crate::metrics::reid_new_identity();
        Some(new_id)
    }

    fn get_track_person_id(&self, channel_id: u32, track_id: u64) -> Option<String> {
        let key = key_track(channel_id, track_id);
        let started = std::time::Instant::now();
        let result = self.kv.get(&key);
        crate::metrics::kv_call_ms(started.elapsed().as_secs_f64() * 1000.0);
        match result {
            Ok(value) => value,
            Err(_) => {
                self.mark_degraded();
                self.fallback.lock().unwrap().tracks.get(&key).cloned()
            }
        }
    }

    fn set_track_person_id(&self, channel_id: u32, track_id: u64, person_id: &str) {
        let key = key_track(channel_id, track_id);
        let started = std::time::Instant::now();
        let result = self.kv.setex(&key, self.redis_ttl_seconds, person_id);
        crate::metrics::kv_call_ms(started.elapsed().as_secs_f64() * 1000.0);
        if result.is_err() {
            self.mark_degraded();
        }
        self.fallback.lock().unwrap().tracks.insert(key, person_id.to_string());
    }

    fn set_person_embedding(&self, person_id: &str, embedding: &[f32]) {
        let record = PersonIdentityRecord {
            person_id: person_id.to_string(),
            embedding: embedding.to_vec(),
            updated_at: unix_seconds_now() as f64,
        };
        if let Ok(payload) = serde_json::to_string(&record) {
            let started = std::time::Instant::now();
            let result = self.kv.setex(&key_person(person_id), self.redis_ttl_seconds, &payload);
            crate::metrics::kv_call_ms(started.elapsed().as_secs_f64() * 1000.0);
            if result.is_err() {
                self.mark_degraded();
            }
        }
        self.fallback
            .lock()
            .unwrap()
            .persons
            .insert(person_id.to_string(), embedding.to_vec());
    }

    /// O(|catalog|) scan, as documented in `spec.md` §9 — acceptable up to
    /// ~10^4 active identities, the bound `redis_ttl_seconds` imposes on
    /// catalog size.
    fn match_person(&self, embedding: &[f32]) -> Option<String> {
        let mut best: Option<(String, f32)> = None;

        let scan_started = std::time::Instant::now();
        let scan_result = self.kv.scan("person:identity:*");
        crate::metrics::kv_call_ms(scan_started.elapsed().as_secs_f64() * 1000.0);
        match scan_result {
            Ok(keys) => {
                for key in keys {
                    let Ok(Some(raw)) = self.kv.get(&key) else { continue };
                    let Ok(record) = serde_json::from_str::<PersonIdentityRecord>(&raw) else { continue };
                    let sim = cosine_similarity(embedding, &record.embedding);
                    if best.as_ref().map(|(_, s)| sim > *s).unwrap_or(true) {
                        best = Some((record.person_id, sim));
                    }
                }
            }
            Err(_) => self.mark_degraded(),
        }

        let fallback = self.fallback.lock().unwrap();
        for (person_id, existing) in fallback.persons.iter() {
            let sim = cosine_similarity(embedding, existing);
            if best.as_ref().map(|(_, s)| sim > *s).unwrap_or(true) {
                best = Some((person_id.clone(), sim));
            }
        }
        drop(fallback);

        match best {
            Some((person_id, sim)) if sim >= self.similarity_threshold => Some(person_id),
            _ => None,
        }
    }

    /// `check_daily_count` — `spec.md` §4.2. Idempotent per I3: a second
    /// call for the same `(person_id, date, event_type)` after a successful
    /// one returns `(false, current)`.
    pub fn check_daily_count(&self, person_id: &str, event_type: EventType) -> (bool, DailyCounts) {
        let date_str = today_date_key(&self.timezone);
        let key = key_counter_global(person_id, &date_str);

        let get_started = std::time::Instant::now();
        let get_result = self.kv.get(&key);
        crate::metrics::kv_call_ms(get_started.elapsed().as_secs_f64() * 1000.0);
        let mut counts = match get_result {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => DailyCounts::default(),
            Err(_) => {
                self.mark_degraded();
                return self.check_daily_count_fallback(person_id, &date_str, event_type);
            }
        };

        if *event_type.field(&mut counts) >= 1 {
            return (false, counts);
        }
        *event_type.field(&mut counts) = 1;

        if let Ok(payload) = serde_json::to_string(&counts) {
            let ttl = seconds_until_midnight(&self.timezone);
            let setex_started = std::time::Instant::now();
            let setex_result = self.kv.setex(&key, ttl, &payload);
            crate::metrics::kv_call_ms(setex_started.elapsed().as_secs_f64() * 1000.0);
            if setex_result.is_err() {
                self.mark_degraded();
            }
        }
        (true, counts)
    }

    /// Mirrors `check_daily_count`'s idempotence against the in-memory
    /// fallback store, used whenever the KV backend is unreachable.
    fn check_daily_count_fallback(&self, person_id: &str, date_str: &str, event_type: EventType) -> (bool, DailyCounts) {
        let key = format!("global:{person_id}:{date_str}");
        let mut fallback = self.fallback.lock().unwrap();
        let counts = fallback.daily_counters.entry(key).or_default();
        if *event_type.field(counts) >= 1 {
            return (false, *counts);
        }
        *event_type.field(counts) = 1;
        (true, *counts)
    }

    /// `daily_counts_all` for "today", across the whole catalog — the KV
    /// scan backing `global_enter`/`global_exit`/`global_unique_persons`
    /// (`spec.md` §4.4 step 7).
    pub fn daily_counts_all(&self) -> HashMap<String, DailyCounts> {
        let date_str = today_date_key(&self.timezone);
        let pattern = format!("person:counter:global:*:{date_str}");
        let mut out = HashMap::new();

        match self.kv.scan(&pattern) {
            Ok(keys) => {
                for key in keys {
                    let Some(person_id) = extract_person_id_from_counter_key(&key) else { continue };
                    if let Ok(Some(raw)) = self.kv.get(&key) {
                        if let Ok(counts) = serde_json::from_str(&raw) {
                            out.insert(person_id, counts);
                        }
                    }
                }
            }
            Err(_) => self.mark_degraded(),
        }

        let fallback_suffix = format!(":{date_str}");
        for (key, counts) in self.fallback.lock().unwrap().daily_counters.iter() {
            if let Some(rest) = key.strip_prefix("global:") {
                if let Some(person_id) = rest.strip_suffix(&fallback_suffix) {
                    out.entry(person_id.to_string()).or_insert(*counts);
                }
            }
        }
        out
    }

    /// Clears in-memory daily state; KV entries expire naturally via TTL.
    pub fn reset_daily(&self) {
        self.fallback.lock().unwrap().daily_counters.clear();
    }
}

fn extract_person_id_from_counter_key(key: &str) -> Option<String> {
    // "person:counter:global:{person_id}:{date}"
    let parts: Vec<&str> = key.split(':').collect();
    if parts.len() >= 5 {
        Some(parts[3].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;

    fn manager() -> PersonIdentityManager {
        PersonIdentityManager::new(
            Box::new(InMemoryKv::new()),
            DEFAULT_SIMILARITY_THRESHOLD,
            DEFAULT_REDIS_TTL_SECONDS,
            chrono_tz::UTC,
        )
    }

    #[test]
    fn empty_embedding_yields_none() {
        let m = manager();
        assert!(m.get_or_assign(1, 1, &[]).is_none());
    }

    #[test]
    fn identity_idempotence() {
        let m = manager();
        let e = vec![1.0_f32, 0.0, 0.0];
        let id1 = m.get_or_assign(1, 7, &e).unwrap();
        let id2 = m.get_or_assign(1, 7, &e).unwrap();
        assert_eq!(id1, id2);
    }

    /// E3: a sufficiently similar embedding from a different channel/track
    /// resolves to the same person_id.
    #[test]
    fn e3_cross_channel_reid_matches_similar_embedding() {
        let m = manager();
        let e = vec![1.0_f32, 0.0, 0.0];
        let id_a = m.get_or_assign(1, 1, &e).unwrap();

        // cos(theta) ~= 0.894, above the 0.75 default threshold.
        let e2 = vec![0.8_f32, 0.6, 0.0];
        let id_b = m.get_or_assign(2, 9, &e2).unwrap();
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn dissimilar_embeddings_mint_distinct_identities() {
        let m = manager();
        let id_a = m.get_or_assign(1, 1, &[1.0, 0.0, 0.0]).unwrap();
        let id_b = m.get_or_assign(1, 2, &[0.0, 1.0, 0.0]).unwrap();
        assert_ne!(id_a, id_b);
    }

    /// E5: a second enter for the same person/day is rejected.
    #[test]
    fn e5_daily_dedup_rejects_repeat_enter() {
        let m = manager();
        let (can_count, counts) = m.check_daily_count("P1", EventType::Enter);
        assert!(can_count);
        assert_eq!(counts, DailyCounts { enter: 1, exit: 0 });

        let (can_count, counts) = m.check_daily_count("P1", EventType::Enter);
        assert!(!can_count);
        assert_eq!(counts, DailyCounts { enter: 1, exit: 0 });
    }

    #[test]
    fn enter_and_exit_are_tracked_independently() {
        let m = manager();
        assert!(m.check_daily_count("P1", EventType::Enter).0);
        assert!(m.check_daily_count("P1", EventType::Exit).0);
        assert!(!m.check_daily_count("P1", EventType::Enter).0);
        assert!(!m.check_daily_count("P1", EventType::Exit).0);
    }

    #[test]
    fn person_id_format_matches_spec() {
        let id = mint_person_id(3, 42, 1_700_000_000);
        assert!(id.starts_with("P3_"));
        assert_eq!(id.len(), "P3_".len() + 8);
    }
}
