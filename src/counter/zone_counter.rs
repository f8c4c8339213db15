//! C8 — zone-based person counter.
//!
//! Grounded line-for-line on `zone_counter.py`'s `ZoneCounter.update`: the
//! stale-track snapshot precedes the disappeared-track rescue match, which
//! in turn precedes the per-zone hysteresis update, which in turn precedes
//! the synthetic exit for tracks that stay unmatched past the rescue
//! window. Reordering any of these steps changes which events fire on a
//! given frame, so the ordering here follows the source exactly rather
//! than whatever felt more "natural" in Rust.

use crate::detection::Detection;
use crate::geometry::{Point, Zone};
use std::collections::{HashMap, HashSet};

const DEFAULT_POSITION_MATCH_THRESHOLD: f32 = 100.0;
const DEFAULT_RESCUE_WINDOW_FRAMES: u64 = 10;
const DEFAULT_DISAPPEARED_KEEP_FRAMES: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Enter,
    Exit,
}

#[derive(Debug, Clone)]
pub struct CounterEvent {
    pub event_type: EventType,
    pub zone_id: String,
    pub zone_name: String,
    pub track_id: u64,
    /// Set to `Some("track_disappeared")` for the synthetic exits a
    /// vanished, unmatched track generates.
    pub reason: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneCounts {
    pub enter: u64,
    pub exit: u64,
    pub total: i64,
    pub current: u64,
}

#[derive(Debug, Clone, Default)]
struct TrackZoneState {
    /// Confirmed (post-hysteresis) membership, not the raw per-frame test.
    confirmed_in_zone: bool,
    /// Positive: consecutive frames seen inside. Negative: consecutive
    /// frames seen outside. Zero: never yet seen inside.
    frame_balance: i32,
    last_counted: Option<EventType>,
}

struct DisappearedTrack {
    position: Point,
    frame: u64,
    zone_states: HashMap<String, TrackZoneState>,
}

pub struct CounterUpdateResult {
    pub counts: HashMap<String, ZoneCounts>,
    pub events: Vec<CounterEvent>,
    pub active_tracks: usize,
}

/// Per-channel instance: tracks and their zone states are channel-local, so
/// every camera worker owns one (`spec.md` §5).
pub struct ZoneCounter {
    zones: Vec<Zone>,
    zone_counts: HashMap<String, ZoneCounts>,
    track_positions: HashMap<u64, Point>,
    track_zone_states: HashMap<u64, HashMap<String, TrackZoneState>>,
    disappeared_tracks: HashMap<u64, DisappearedTrack>,
    position_match_threshold: f32,
    rescue_window_frames: u64,
    disappeared_keep_frames: u64,
}

impl ZoneCounter {
    pub fn new(zones: Vec<Zone>) -> Self {
        let zone_counts = zones
            .iter()
            .map(|z| (z.zone_id.clone(), ZoneCounts::default()))
            .collect();
        Self {
            zones,
            zone_counts,
            track_positions: HashMap::new(),
            track_zone_states: HashMap::new(),
            disappeared_tracks: HashMap::new(),
            position_match_threshold: DEFAULT_POSITION_MATCH_THRESHOLD,
            rescue_window_frames: DEFAULT_RESCUE_WINDOW_FRAMES,
            disappeared_keep_frames: DEFAULT_DISAPPEARED_KEEP_FRAMES,
        }
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn get_counts(&self) -> HashMap<String, ZoneCounts> {
        self.zone_counts.clone()
    }

    /// Size of the stale-track recovery pool, fed to the `disappeared_tracks`
    /// gauge (`spec.md` §6).
    pub fn disappeared_track_count(&self) -> usize {
        self.disappeared_tracks.len()
    }

    /// `spec.md` §4.3.4 — clears per-track state too, matching the
    /// source's full reset (not just the published counters), else a track
    /// that was confirmed-in-zone before a reset would immediately
    /// re-trigger an enter event it already fired once.
    pub fn reset(&mut self, zone_id: Option<&str>) {
        match zone_id {
            None => {
                for counts in self.zone_counts.values_mut() {
                    *counts = ZoneCounts::default();
                }
                self.track_positions.clear();
                self.track_zone_states.clear();
                self.disappeared_tracks.clear();
            }
            Some(zone_id) => {
                if let Some(counts) = self.zone_counts.get_mut(zone_id) {
                    *counts = ZoneCounts::default();
                }
                for states in self.track_zone_states.values_mut() {
                    states.remove(zone_id);
                }
            }
        }
    }

    pub fn update(&mut self, detections: &[Detection], frame_w: u32, frame_h: u32, frame_num: u64) -> CounterUpdateResult {
        let current_track_ids: HashSet<u64> = detections.iter().map(|d| d.track_id).collect();
        let mut events = Vec::new();

        let stale_tracks: Vec<u64> = self
            .track_positions
            .keys()
            .filter(|id| !current_track_ids.contains(id))
            .copied()
            .collect();

        for &stale_id in &stale_tracks {
            if let Some(&position) = self.track_positions.get(&stale_id) {
                let zone_states = self.track_zone_states.get(&stale_id).cloned().unwrap_or_default();
                self.disappeared_tracks.insert(
                    stale_id,
                    DisappearedTrack {
                        position,
                        frame: frame_num,
                        zone_states,
                    },
                );
            }
        }

        let mut matched_stale_ids: HashSet<u64> = HashSet::new();
        for detection in detections {
            let track_id = detection.track_id;
            let is_new_track = !self.track_positions.contains_key(&track_id);
            if !is_new_track {
                continue;
            }
            let new_centroid = detection.centroid();

            let mut best_match: Option<u64> = None;
            let mut best_distance = f32::INFINITY;
            for (&stale_id, info) in self.disappeared_tracks.iter() {
                if matched_stale_ids.contains(&stale_id) {
                    continue;
                }
                let distance = ((new_centroid.0 - info.position.0).powi(2) + (new_centroid.1 - info.position.1).powi(2)).sqrt();
                let frame_diff = frame_num.saturating_sub(info.frame);
                if distance < self.position_match_threshold && distance < best_distance && frame_diff <= self.rescue_window_frames {
                    best_match = Some(stale_id);
                    best_distance = distance;
                }
            }

            if let Some(matched_id) = best_match {
                if let Some(info) = self.disappeared_tracks.remove(&matched_id) {
                    let entry = self.track_zone_states.entry(track_id).or_default();
                    for (zone_id, state) in info.zone_states {
                        entry.insert(zone_id, state);
                    }
                    matched_stale_ids.insert(matched_id);
                }
            }
        }

        for detection in detections {
            let track_id = detection.track_id;
            let centroid = detection.centroid();
            let prev_centroid = self.track_positions.get(&track_id).copied().unwrap_or(centroid);

            for zone in &self.zones {
                if !zone.active {
                    continue;
                }
                let zone_states = self.track_zone_states.entry(track_id).or_default();
                let state = zone_states.entry(zone.zone_id.clone()).or_default();

                let prev_confirmed_in_zone = state.confirmed_in_zone;
                let last_counted = state.last_counted;

                let curr_in_zone = zone.in_raw(prev_centroid, centroid, frame_w, frame_h);

                if curr_in_zone {
                    state.frame_balance = if state.frame_balance >= 0 { state.frame_balance + 1 } else { 1 };
                } else if state.frame_balance > 0 {
                    state.frame_balance = -1;
                } else if state.frame_balance < 0 {
                    state.frame_balance -= 1;
                } else {
                    state.frame_balance = 0;
                }

                let confirmed_curr_in_zone = curr_in_zone && state.frame_balance >= zone.enter_threshold as i32;
                let outside_frames = if state.frame_balance < 0 { -state.frame_balance } else { 0 };
                let confirmed_exit = !curr_in_zone && prev_confirmed_in_zone && outside_frames >= zone.exit_threshold as i32;

                let mut flipped_state_already = false;

                if !prev_confirmed_in_zone && confirmed_curr_in_zone {
                    if last_counted != Some(EventType::Enter) {
                        let counts = self.zone_counts.entry(zone.zone_id.clone()).or_default();
                        counts.enter += 1;
                        counts.total += 1;
                        state.last_counted = Some(EventType::Enter);
                        events.push(CounterEvent {
                            event_type: EventType::Enter,
                            zone_id: zone.zone_id.clone(),
                            zone_name: zone.name.clone(),
                            track_id,
                            reason: None,
                        });
                    }
                } else if prev_confirmed_in_zone && confirmed_exit {
                    if last_counted != Some(EventType::Exit) {
                        let counts = self.zone_counts.entry(zone.zone_id.clone()).or_default();
                        counts.exit += 1;
                        counts.total -= 1;
                        state.last_counted = Some(EventType::Exit);
                        state.confirmed_in_zone = false;
                        flipped_state_already = true;
                        events.push(CounterEvent {
                            event_type: EventType::Exit,
                            zone_id: zone.zone_id.clone(),
                            zone_name: zone.name.clone(),
                            track_id,
                            reason: None,
                        });
                    } else {
                        state.confirmed_in_zone = false;
                        flipped_state_already = true;
                    }
                }

                if !flipped_state_already {
                    state.confirmed_in_zone = confirmed_curr_in_zone;
                }

                if confirmed_curr_in_zone && !prev_confirmed_in_zone && state.last_counted == Some(EventType::Exit) {
                    state.last_counted = None;
                }
            }

            self.track_positions.insert(track_id, centroid);
        }

        for zone in &self.zones {
            if !zone.active {
                continue;
            }
            let current = self
                .track_zone_states
                .values()
                .filter(|states| states.get(&zone.zone_id).map(|s| s.confirmed_in_zone).unwrap_or(false))
                .count() as u64;
            self.zone_counts.entry(zone.zone_id.clone()).or_default().current = current;
        }

        for &stale_id in &stale_tracks {
            if matched_stale_ids.contains(&stale_id) {
                continue;
            }
            if !self.disappeared_tracks.contains_key(&stale_id) {
                continue;
            }
            for zone in &self.zones {
                if !zone.active {
                    continue;
                }
                let was_in_zone = self
                    .track_zone_states
                    .get(&stale_id)
                    .and_then(|states| states.get(&zone.zone_id))
                    .map(|s| s.confirmed_in_zone)
                    .unwrap_or(false);
                if was_in_zone {
                    if let Some(states) = self.track_zone_states.get_mut(&stale_id) {
                        if let Some(state) = states.get_mut(&zone.zone_id) {
                            state.confirmed_in_zone = false;
                        }
                    }
                    let counts = self.zone_counts.entry(zone.zone_id.clone()).or_default();
                    counts.exit += 1;
                    counts.total -= 1;
                    counts.current = counts.current.saturating_sub(1);
                    events.push(CounterEvent {
                        event_type: EventType::Exit,
                        zone_id: zone.zone_id.clone(),
                        zone_name: zone.name.clone(),
                        track_id: stale_id,
                        reason: Some("track_disappeared"),
                    });
                }
            }
            self.disappeared_tracks.remove(&stale_id);
        }

        self.disappeared_tracks
            .retain(|_, info| frame_num.saturating_sub(info.frame) <= self.disappeared_keep_frames);

        CounterUpdateResult {
            counts: self.zone_counts.clone(),
            events,
            active_tracks: current_track_ids.len(),
        }
    }
}
