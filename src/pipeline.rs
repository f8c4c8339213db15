//! Composition root: one [`ChannelWorker`] per camera, wiring the
//! [`detection`] collaborator traits into staff voting, zone counting and
//! the event sink. Each worker owns its tracker, voting cache and zone
//! counter outright — no cross-channel lock is ever taken on the
//! frame-processing path, only the shared [`identity::PersonIdentityManager`]
//! and [`sink::EventBatcher`] are touched, and both are already safe to
//! share across threads on their own (`spec.md` §5).

use crate::counter::{DailyCounterEvent, DailyPersonCounter};
use crate::detection::{Detector, Embedder, PersonType, StaffClassifier, Tracker, DEFAULT_CONFIDENCE_FLOOR, PERSON_CLASS_ID};
use crate::sink::{EventBatcher, SinkEvent, SinkEventType};
use crate::voting::{Classification, StaffVotingCache};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

fn epoch_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Ties one camera's detector/tracker/embedder/staff-classifier bindings
/// together with the counting stack. `D::Frame` is shared by the tracker
/// and by `crop_extractor`, which turns a frame + bbox into whatever crop
/// type the embedder and staff classifier expect.
pub struct ChannelWorker<D, T, Em, Sc>
where
    D: Detector,
    T: Tracker<Frame = D::Frame>,
    Em: Embedder,
    Sc: StaffClassifier<Crop = Em::Crop>,
{
    channel_id: u32,
    session_id: u64,
    detector: D,
    tracker: T,
    embedder: Option<Em>,
    staff_classifier: Option<Sc>,
    crop_extractor: Box<dyn Fn(&D::Frame, (f32, f32, f32, f32)) -> Em::Crop + Send>,
    voting_cache: StaffVotingCache,
    daily_counter: DailyPersonCounter,
    batcher: Arc<EventBatcher>,
    reid_enabled: bool,
    staff_filter_enabled: bool,
    confidence_floor: f32,
    frame_num: u64,
}

impl<D, T, Em, Sc> ChannelWorker<D, T, Em, Sc>
where
    D: Detector,
    T: Tracker<Frame = D::Frame>,
    Em: Embedder,
    Sc: StaffClassifier<Crop = Em::Crop>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_id: u32,
        detector: D,
        tracker: T,
        embedder: Option<Em>,
        staff_classifier: Option<Sc>,
        crop_extractor: Box<dyn Fn(&D::Frame, (f32, f32, f32, f32)) -> Em::Crop + Send>,
        daily_counter: DailyPersonCounter,
        batcher: Arc<EventBatcher>,
        reid_enabled: bool,
        staff_filter_enabled: bool,
    ) -> Self {
        Self {
            channel_id,
            session_id: channel_id as u64,
            detector,
            tracker,
            embedder,
            staff_classifier,
            crop_extractor,
            voting_cache: StaffVotingCache::default(),
            daily_counter,
            batcher,
            reid_enabled,
            staff_filter_enabled,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            frame_num: 0,
        }
    }

    /// Overrides the default confidence floor (`spec.md` §6) applied to raw
    /// detections before they reach the tracker.
    pub fn with_confidence_floor(mut self, confidence_floor: f32) -> Self {
        self.confidence_floor = confidence_floor;
        self
    }

    /// One pipeline tick: detect, track, classify, re-identify, count,
    /// publish. Matches the per-channel frame loop `spec.md` §2/§5
    /// describes: strictly sequential within a channel, no `.await` point
    /// anywhere since this crate never pulls in an async runtime.
    pub fn process_frame(&mut self, frame: &D::Frame, frame_w: u32, frame_h: u32) -> Vec<DailyCounterEvent> {
        let started = Instant::now();
        let frame_num = self.frame_num;

        // `spec.md` §6: the pipeline filters `class_id == person` and applies
        // a confidence floor before anything reaches the tracker.
        let raw_detections: Vec<_> = self
            .detector
            .detect(frame)
            .into_iter()
            .filter(|d| d.class_id == PERSON_CLASS_ID && d.confidence >= self.confidence_floor)
            .collect();
        let mut detections = self.tracker.update(&raw_detections, frame, self.session_id);

        for detection in detections.iter_mut() {
            crate::metrics::detection_received(self.channel_id);

            if self.staff_filter_enabled {
                if let Some(classifier) = self.staff_classifier.as_mut() {
                    let crop = (self.crop_extractor)(frame, detection.bbox);
                    let (label, confidence) = classifier.classify(&crop);
                    let classification = match label {
                        PersonType::Staff => Classification::Staff,
                        PersonType::Customer => Classification::Customer,
                    };
                    if let (Some(voted), _) = self.voting_cache.vote(detection.track_id, classification, confidence, frame_num) {
                        detection.person_type = Some(voted);
                        detection.is_staff = Some(voted == PersonType::Staff);
                    }
                }
            }

            if self.reid_enabled && detection.embedding.is_none() {
                if let Some(embedder) = self.embedder.as_mut() {
                    let crop = (self.crop_extractor)(frame, detection.bbox);
                    detection.embedding = Some(embedder.embed(&crop));
                }
            }

            if detection.is_marked_staff() {
                crate::metrics::staff_filtered();
            }
        }

        let result = self.daily_counter.update(&detections, frame_w, frame_h, frame_num);

        for event in &result.events {
            let event_type = match event.event_type {
                crate::counter::EventType::Enter => "enter",
                crate::counter::EventType::Exit => "exit",
            };
            crate::metrics::event_emitted(self.channel_id, &event.zone_id, event_type);
            if self.batcher.push(to_sink_event(self.channel_id, frame_num, event)).is_err() {
                crate::metrics::sink_error();
            }
        }

        for (zone_id, counts) in &result.counts {
            crate::metrics::zone_current_occupancy(zone_id, counts.current);
        }

        let active_track_ids: HashSet<u64> = detections.iter().map(|d| d.track_id).collect();
        self.voting_cache.cleanup(&active_track_ids, frame_num);

        crate::metrics::active_tracks(self.channel_id, result.active_tracks);
        crate::metrics::disappeared_tracks(self.channel_id, self.daily_counter.disappeared_track_count());
        crate::metrics::frame_latency_ms(self.channel_id, started.elapsed().as_secs_f64() * 1000.0);
        self.frame_num += 1;
        result.events
    }

    pub fn get_counts(&self) -> std::collections::HashMap<String, crate::counter::ZoneCounts> {
        self.daily_counter.get_counts()
    }
}

fn to_sink_event(channel_id: u32, frame_num: u64, event: &DailyCounterEvent) -> SinkEvent {
    SinkEvent {
        event_type: match event.event_type {
            crate::counter::EventType::Enter => SinkEventType::Enter,
            crate::counter::EventType::Exit => SinkEventType::Exit,
        },
        zone_id: event.zone_id.clone(),
        zone_name: event.zone_name.clone(),
        channel_id,
        track_id: event.track_id,
        person_id: event.person_id.clone(),
        frame_num,
        epoch_millis: epoch_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::ZoneCounter;
    use crate::detection::{Detection, RawDetection};
    use crate::geometry::{CoordinateType, Zone};
    use crate::identity::{DEFAULT_REDIS_TTL_SECONDS, DEFAULT_SIMILARITY_THRESHOLD};
    use crate::kv::InMemoryKv;
    use crate::sink::InMemoryEventSink;

    struct FixedDetector(Vec<RawDetection>);
    impl Detector for FixedDetector {
        type Frame = ();
        fn detect(&mut self, _frame: &()) -> Vec<RawDetection> {
            self.0.clone()
        }
    }

    struct PassthroughTracker;
    impl Tracker for PassthroughTracker {
        type Frame = ();
        fn update(&mut self, detections: &[RawDetection], _frame: &(), _session_id: u64) -> Vec<Detection> {
            detections
                .iter()
                .enumerate()
                .map(|(i, d)| Detection {
                    track_id: i as u64 + 1,
                    channel_id: 1,
                    bbox: d.bbox,
                    confidence: d.confidence,
                    embedding: None,
                    person_type: None,
                    is_staff: None,
                    person_id: None,
                })
                .collect()
        }
    }

    struct NoopEmbedder;
    impl Embedder for NoopEmbedder {
        type Crop = ();
        fn embed(&mut self, _crop: &()) -> Vec<f32> {
            vec![1.0, 0.0, 0.0]
        }
    }

    struct AlwaysCustomer;
    impl StaffClassifier for AlwaysCustomer {
        type Crop = ();
        fn classify(&mut self, _crop: &()) -> (PersonType, f32) {
            (PersonType::Customer, 0.9)
        }
    }

    fn worker() -> ChannelWorker<FixedDetector, PassthroughTracker, NoopEmbedder, AlwaysCustomer> {
        let zone = Zone::new_polygon(
            "z1",
            "Entrance",
            CoordinateType::Absolute,
            vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
            1,
            1,
            true,
        )
        .unwrap();
        let identity_manager = Arc::new(crate::identity::PersonIdentityManager::new(
            Box::new(InMemoryKv::new()),
            DEFAULT_SIMILARITY_THRESHOLD,
            DEFAULT_REDIS_TTL_SECONDS,
            chrono_tz::UTC,
        ));
        let daily_counter = DailyPersonCounter::new(ZoneCounter::new(vec![zone]), identity_manager);
        let batcher = Arc::new(EventBatcher::new(Arc::new(InMemoryEventSink::new())));

        ChannelWorker::new(
            1,
            FixedDetector(vec![]),
            PassthroughTracker,
            Some(NoopEmbedder),
            Some(AlwaysCustomer),
            Box::new(|_frame: &(), _bbox| ()),
            daily_counter,
            batcher,
            true,
            true,
        )
    }

    #[test]
    fn processes_a_frame_end_to_end_without_panicking() {
        let mut worker = worker();
        worker.detector.0 = vec![RawDetection { bbox: (10.0, 10.0, 20.0, 20.0), confidence: 0.9, class_id: 0 }];
        let events = worker.process_frame(&(), 1000, 1000, 0);
        assert!(events.is_empty());
    }

    /// Staff marked via the voting cache stop producing zone events once
    /// the vote latches, even if still physically crossing a zone.
    #[test]
    fn classified_staff_are_filtered_before_zone_counting() {
        struct AlwaysStaff;
        impl StaffClassifier for AlwaysStaff {
            type Crop = ();
            fn classify(&mut self, _crop: &()) -> (PersonType, f32) {
                (PersonType::Staff, 0.95)
            }
        }

        let zone = Zone::new_polygon(
            "z1",
            "Entrance",
            CoordinateType::Absolute,
            vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
            1,
            1,
            true,
        )
        .unwrap();
        let identity_manager = Arc::new(crate::identity::PersonIdentityManager::new(
            Box::new(InMemoryKv::new()),
            DEFAULT_SIMILARITY_THRESHOLD,
            DEFAULT_REDIS_TTL_SECONDS,
            chrono_tz::UTC,
        ));
        let daily_counter = DailyPersonCounter::new(ZoneCounter::new(vec![zone]), identity_manager);
        let batcher = Arc::new(EventBatcher::new(Arc::new(InMemoryEventSink::new())));
        let mut worker: ChannelWorker<FixedDetector, PassthroughTracker, NoopEmbedder, AlwaysStaff> = ChannelWorker::new(
            1,
            FixedDetector(vec![]),
            PassthroughTracker,
            Some(NoopEmbedder),
            Some(AlwaysStaff),
            Box::new(|_frame: &(), _bbox| ()),
            daily_counter,
            batcher,
            true,
            true,
        );

        worker.detector.0 = vec![RawDetection { bbox: (199.0, 199.0, 201.0, 201.0), confidence: 0.9, class_id: 0 }];
        worker.process_frame(&(), 1000, 1000, 0);

        // confidence 0.95 -> weight 2.0; fixes staff after two votes.
        worker.detector.0 = vec![RawDetection { bbox: (49.0, 49.0, 51.0, 51.0), confidence: 0.9, class_id: 0 }];
        worker.process_frame(&(), 1000, 1000, 1);
        let events = worker.process_frame(&(), 1000, 1000, 2);
        assert!(events.is_empty(), "staff-classified track must never fire a zone event");
    }
}
