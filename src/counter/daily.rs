//! C9 — daily per-person dedup wrapper around [`ZoneCounter`].
//!
//! Grounded on `daily_person_counter.py::DailyPersonCounter`: filter staff,
//! resolve a `person_id` per track, delegate to the zone counter, then
//! filter its events through the identity manager's once-per-day gate
//! before republishing them with the resolved `person_id` attached.

use super::zone_counter::{CounterEvent, EventType as ZoneEventType, ZoneCounter, ZoneCounts};
use crate::detection::Detection;
use crate::identity::{EventType as IdentityEventType, PersonIdentityManager};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct DailyCounterEvent {
    pub event_type: ZoneEventType,
    pub zone_id: String,
    pub zone_name: String,
    pub track_id: u64,
    pub person_id: Option<String>,
    pub reason: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneDailyDelta {
    pub enter: u32,
    pub exit: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalDailyTotals {
    pub enter: usize,
    pub exit: usize,
    pub unique_persons: usize,
}

pub struct DailyUpdateResult {
    pub counts: HashMap<String, ZoneCounts>,
    pub events: Vec<DailyCounterEvent>,
    pub daily_counts: HashMap<String, ZoneDailyDelta>,
    pub global: GlobalDailyTotals,
    pub active_tracks: usize,
}

fn to_identity_event_type(event_type: ZoneEventType) -> IdentityEventType {
    match event_type {
        ZoneEventType::Enter => IdentityEventType::Enter,
        ZoneEventType::Exit => IdentityEventType::Exit,
    }
}

/// Composes a [`ZoneCounter`] with a shared [`PersonIdentityManager`] — the
/// identity manager is shared across every channel's counter (re-ID and the
/// daily gate are both cross-channel, per `spec.md` §2 C7/C9), while the
/// zone counter and `track_to_person` map are channel-local.
pub struct DailyPersonCounter {
    zone_counter: ZoneCounter,
    identity_manager: Arc<PersonIdentityManager>,
    track_to_person: HashMap<u64, Option<String>>,
}

impl DailyPersonCounter {
    pub fn new(zone_counter: ZoneCounter, identity_manager: Arc<PersonIdentityManager>) -> Self {
        Self {
            zone_counter,
            identity_manager,
            track_to_person: HashMap::new(),
        }
    }

    pub fn get_counts(&self) -> HashMap<String, ZoneCounts> {
        self.zone_counter.get_counts()
    }

    pub fn disappeared_track_count(&self) -> usize {
        self.zone_counter.disappeared_track_count()
    }

    pub fn reset_all_zones(&mut self) {
        self.zone_counter.reset(None);
        self.track_to_person.clear();
    }

    pub fn update(&mut self, detections: &[Detection], frame_w: u32, frame_h: u32, frame_num: u64) -> DailyUpdateResult {
        // Staff are filtered out before reaching zone tracking at all — I4.
        let customer_detections: Vec<&Detection> = detections.iter().filter(|d| !d.is_marked_staff()).collect();

        for detection in &customer_detections {
            let person_id = detection.person_id.clone().or_else(|| {
                detection
                    .embedding
                    .as_deref()
                    .and_then(|embedding| self.identity_manager.get_or_assign(detection.channel_id, detection.track_id, embedding))
            });
            self.track_to_person.insert(detection.track_id, person_id);
        }

        let owned_customer_detections: Vec<Detection> = customer_detections.into_iter().cloned().collect();
        let zone_result = self.zone_counter.update(&owned_customer_detections, frame_w, frame_h, frame_num);

        let mut filtered_events = Vec::new();
        let mut daily_counts: HashMap<String, ZoneDailyDelta> = HashMap::new();

        for event in zone_result.events {
            let person_id = self.track_to_person.get(&event.track_id).cloned().flatten();

            let Some(person_id) = person_id else {
                filtered_events.push(into_daily_event(event, None));
                continue;
            };

            let (can_count, _) = self
                .identity_manager
                .check_daily_count(&person_id, to_identity_event_type(event.event_type));

            if can_count {
                let delta = daily_counts.entry(event.zone_id.clone()).or_default();
                match event.event_type {
                    ZoneEventType::Enter => delta.enter += 1,
                    ZoneEventType::Exit => delta.exit += 1,
                }
                filtered_events.push(into_daily_event(event, Some(person_id)));
            } else {
                crate::metrics::daily_dedup_skipped();
            }
        }

        let all_global = self.identity_manager.daily_counts_all();
        let mut entered = std::collections::HashSet::new();
        let mut exited = std::collections::HashSet::new();
        for (person_id, counts) in &all_global {
            if counts.enter > 0 {
                entered.insert(person_id.clone());
            }
            if counts.exit > 0 {
                exited.insert(person_id.clone());
            }
        }
        let unique_persons = entered.union(&exited).count();
        let global = GlobalDailyTotals {
            enter: entered.len(),
            exit: exited.len(),
            unique_persons,
        };

        DailyUpdateResult {
            counts: zone_result.counts,
            events: filtered_events,
            daily_counts,
            global,
            active_tracks: zone_result.active_tracks,
        }
    }
}

fn into_daily_event(event: CounterEvent, person_id: Option<String>) -> DailyCounterEvent {
    DailyCounterEvent {
        event_type: event.event_type,
        zone_id: event.zone_id,
        zone_name: event.zone_name,
        track_id: event.track_id,
        person_id,
        reason: event.reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CoordinateType, Zone};
    use crate::identity::{DEFAULT_REDIS_TTL_SECONDS, DEFAULT_SIMILARITY_THRESHOLD};
    use crate::kv::InMemoryKv;

    fn square_zone() -> Zone {
        Zone::new_polygon(
            "z1",
            "Entrance",
            CoordinateType::Absolute,
            vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
            1,
            1,
            true,
        )
        .unwrap()
    }

    fn det(track_id: u64, cx: f32, cy: f32, staff: bool, embedding: Option<Vec<f32>>) -> Detection {
        Detection {
            track_id,
            channel_id: 1,
            bbox: (cx - 1.0, cy - 1.0, cx + 1.0, cy + 1.0),
            confidence: 0.9,
            embedding,
            person_type: None,
            is_staff: Some(staff),
            person_id: None,
        }
    }

    fn manager() -> Arc<PersonIdentityManager> {
        Arc::new(PersonIdentityManager::new(
            Box::new(InMemoryKv::new()),
            DEFAULT_SIMILARITY_THRESHOLD,
            DEFAULT_REDIS_TTL_SECONDS,
            chrono_tz::UTC,
        ))
    }

    /// I4: staff detections never reach zone tracking, so they never
    /// produce an event even while crossing into a zone.
    #[test]
    fn staff_detections_are_excluded_from_counting() {
        let mut counter = DailyPersonCounter::new(ZoneCounter::new(vec![square_zone()]), manager());
        counter.update(&[det(1, 200.0, 200.0, true, None)], 1000, 1000, 0);
        let r = counter.update(&[det(1, 50.0, 50.0, true, None)], 1000, 1000, 1);
        assert!(r.events.is_empty());
    }

    /// E5: once a person's enter is counted today, a second physical
    /// crossing of any zone by the same person does not add to the daily
    /// delta, though the underlying zone counter still fires its own event.
    #[test]
    fn repeat_enter_same_day_is_not_double_counted() {
        let embedding = vec![1.0_f32, 0.0, 0.0];
        let mut counter = DailyPersonCounter::new(ZoneCounter::new(vec![square_zone()]), manager());

        counter.update(&[det(1, 200.0, 200.0, false, Some(embedding.clone()))], 1000, 1000, 0);
        let r = counter.update(&[det(1, 50.0, 50.0, false, Some(embedding.clone()))], 1000, 1000, 1);
        assert_eq!(r.events.len(), 1);
        assert!(r.events[0].person_id.is_some());

        // track 1 leaves and a fresh track (same person via embedding) re-enters.
        counter.update(&[], 1000, 1000, 2);
        counter.update(&[det(2, 200.0, 200.0, false, Some(embedding.clone()))], 1000, 1000, 12);
        let r = counter.update(&[det(2, 50.0, 50.0, false, Some(embedding))], 1000, 1000, 13);
        assert!(r.events.is_empty(), "same person re-entering should be filtered by the daily gate");
    }
}
