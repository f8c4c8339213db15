//! C6 — staff voting cache.
//!
//! Grounded on `staff_voting_cache.py` and on the teacher's own vote-based
//! collaborator-selection idiom (see [`crate::track::voting::Voting`] and
//! `trackers/sort/voting.rs`'s `SortVoting`): a small per-track accumulator
//! that latches a decision once enough weighted evidence has piled up.
//! Unlike the teacher's `Voting` trait (which ranks *distances* across many
//! candidate tracks per call), this cache ranks two *buckets* across many
//! calls for the *same* track — the shapes differ enough that reusing the
//! trait directly would have forced an awkward fit, so this module defines
//! its own small state machine in the same spirit.

use crate::detection::PersonType;
use std::collections::HashMap;

pub const DEFAULT_VOTE_WINDOW: u64 = 10;
pub const DEFAULT_VOTE_THRESHOLD: f32 = 4.0;
pub const DEFAULT_CACHE_KEEP_FRAMES: u64 = 30;

/// Raw per-frame classification handed to `vote`, separate from
/// [`PersonType`] because a latched decision can never be `Unknown` —
/// unknown votes only ever nudge the customer bucket (`spec.md` §4.1 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Staff,
    Customer,
    Unknown,
}

#[derive(Debug, Clone)]
struct VoteEntry {
    votes_staff: f32,
    votes_customer: f32,
    vote_count: u32,
    first_frame: u64,
    last_frame: u64,
    fixed: bool,
    final_label: Option<PersonType>,
}

impl VoteEntry {
    fn new(frame_num: u64) -> Self {
        Self {
            votes_staff: 0.0,
            votes_customer: 0.0,
            vote_count: 0,
            first_frame: frame_num,
            last_frame: frame_num,
            fixed: false,
            final_label: None,
        }
    }
}

fn confidence_weight(confidence: f32) -> f32 {
    if confidence > 0.7 {
        2.0
    } else if confidence > 0.5 {
        1.5
    } else {
        1.0
    }
}

pub struct StaffVotingCache {
    vote_window: u64,
    vote_threshold: f32,
    cache_keep_frames: u64,
    entries: HashMap<u64, VoteEntry>,
}

impl Default for StaffVotingCache {
    fn default() -> Self {
        Self::new(DEFAULT_VOTE_WINDOW, DEFAULT_VOTE_THRESHOLD, DEFAULT_CACHE_KEEP_FRAMES)
    }
}

impl StaffVotingCache {
    pub fn new(vote_window: u64, vote_threshold: f32, cache_keep_frames: u64) -> Self {
        Self {
            vote_window,
            vote_threshold,
            cache_keep_frames,
            entries: HashMap::new(),
        }
    }

    /// Implements `spec.md` §4.1's six-step algorithm verbatim.
    pub fn vote(
        &mut self,
        track_id: u64,
        classification: Classification,
        confidence: f32,
        frame_num: u64,
    ) -> (Option<PersonType>, bool) {
        let entry = self
            .entries
            .entry(track_id)
            .or_insert_with(|| VoteEntry::new(frame_num));
        entry.last_frame = frame_num;

        if entry.fixed {
            return (entry.final_label, true);
        }

        let weight = confidence_weight(confidence);
        match classification {
            Classification::Staff => entry.votes_staff += weight,
            Classification::Customer => entry.votes_customer += weight,
            Classification::Unknown => entry.votes_customer += weight * 0.5,
        }
        entry.vote_count += 1;

        if entry.votes_staff >= self.vote_threshold {
            entry.fixed = true;
            entry.final_label = Some(PersonType::Staff);
            return (entry.final_label, true);
        }
        if entry.votes_customer >= self.vote_threshold {
            entry.fixed = true;
            entry.final_label = Some(PersonType::Customer);
            return (entry.final_label, true);
        }

        let frames_since_first = frame_num - entry.first_frame + 1;
        if frames_since_first >= self.vote_window {
            entry.fixed = true;
            entry.final_label = Some(if entry.votes_staff > entry.votes_customer {
                PersonType::Staff
            } else {
                PersonType::Customer
            });
            return (entry.final_label, true);
        }

        (None, false)
    }

    pub fn get(&self, track_id: u64) -> Option<PersonType> {
        self.entries.get(&track_id).and_then(|e| if e.fixed { e.final_label } else { None })
    }

    /// Evicts entries whose `last_frame` precedes `frame_num -
    /// cache_keep_frames` and whose track is not currently active.
    pub fn cleanup(&mut self, active_track_ids: &std::collections::HashSet<u64>, frame_num: u64) {
        self.entries.retain(|track_id, entry| {
            active_track_ids.contains(track_id)
                || frame_num.saturating_sub(entry.last_frame) <= self.cache_keep_frames
        });
    }

    /// Supplemented from `staff_voting_cache.py::get_stats` — a snapshot fit
    /// for a metrics gauge, not a user-facing feature.
    pub fn stats(&self) -> VotingStats {
        let total = self.entries.len();
        let fixed_staff = self
            .entries
            .values()
            .filter(|e| e.final_label == Some(PersonType::Staff))
            .count();
        let fixed_customer = self
            .entries
            .values()
            .filter(|e| e.final_label == Some(PersonType::Customer))
            .count();
        VotingStats {
            total_tracks: total,
            fixed_staff,
            fixed_customer,
            still_voting: total - fixed_staff - fixed_customer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotingStats {
    pub total_tracks: usize,
    pub fixed_staff: usize,
    pub fixed_customer: usize,
    pub still_voting: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `spec.md` E4 shape: medium-confidence staff votes (weight 1.5 each)
    /// accumulate until the weighted sum crosses `vote_threshold=4`.
    #[test]
    fn staff_latches_once_weighted_votes_cross_threshold() {
        let mut cache = StaffVotingCache::new(DEFAULT_VOTE_WINDOW, 4.0, DEFAULT_CACHE_KEEP_FRAMES);
        let (label, fixed) = cache.vote(1, Classification::Staff, 0.6, 0);
        assert!(!fixed);
        assert!(label.is_none());
        let (label, fixed) = cache.vote(1, Classification::Staff, 0.6, 1);
        assert!(!fixed);
        assert!(label.is_none());
        let (label, fixed) = cache.vote(1, Classification::Staff, 0.6, 2);
        assert!(fixed);
        assert_eq!(label, Some(PersonType::Staff));
    }

    #[test]
    fn fixed_label_never_changes_after_latch() {
        let mut cache = StaffVotingCache::default();
        for f in 0..4 {
            cache.vote(1, Classification::Staff, 0.9, f);
        }
        assert_eq!(cache.get(1), Some(PersonType::Staff));
        let (label, fixed) = cache.vote(1, Classification::Customer, 0.95, 10);
        assert!(fixed);
        assert_eq!(label, Some(PersonType::Staff));
    }

    #[test]
    fn window_expiry_breaks_ties_toward_customer() {
        let mut cache = StaffVotingCache::new(3, 100.0, DEFAULT_CACHE_KEEP_FRAMES);
        cache.vote(1, Classification::Staff, 0.6, 0);
        cache.vote(1, Classification::Customer, 0.6, 1);
        let (label, fixed) = cache.vote(1, Classification::Unknown, 0.3, 2);
        assert!(fixed);
        assert_eq!(label, Some(PersonType::Customer));
    }

    #[test]
    fn cleanup_evicts_only_stale_inactive_tracks() {
        let mut cache = StaffVotingCache::default();
        cache.vote(1, Classification::Customer, 0.9, 0);
        cache.vote(2, Classification::Customer, 0.9, 0);
        let mut active = std::collections::HashSet::new();
        active.insert(2);
        cache.cleanup(&active, 31);
        assert!(cache.get(1).is_none() && !cache.entries.contains_key(&1));
        assert!(cache.entries.contains_key(&2));
    }
}
