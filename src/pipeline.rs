use crate::config::Config;
use crate::detection::{Detector, FrameSource, Recognizer};
use crate::event::ExportEvent;
use crate::queue::QueueSender;
use crate::spool::Spool;
use crate::track::Track;
use crate::tracker::Tracker;
use log::{error, info, warn};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Frames seen before the working marker is written.
const WORKING_AFTER: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Overheated,
    Stopped,
}

/// Observer for the live track set, called once per frame. Display and
/// overlay code hangs off this.
pub type TrackObserver = Box<dyn FnMut(&[Track], u64) + Send>;

/// The driver loop: reads frames, runs the external detector and
/// recognizer, feeds the tracker, and enqueues each completed event
/// exactly once. Running out of frames is the single terminal condition
/// and tears the whole process down cooperatively.
pub struct Pipeline<S, D, R>
where
    S: FrameSource,
    D: Detector<S::Frame>,
    R: Recognizer,
{
    source: S,
    detector: D,
    recognizer: R,
    tracker: Tracker,
    queue: QueueSender,
    spool: Spool,
    temp_cell: Arc<AtomicU32>,
    max_temp: u32,
    overheated_sleep: Duration,
    working_marker: Option<PathBuf>,
    time_log: Option<PathBuf>,
    observer: Option<TrackObserver>,
    state: PipelineState,
    frames: u64,
}

impl<S, D, R> Pipeline<S, D, R>
where
    S: FrameSource,
    D: Detector<S::Frame>,
    R: Recognizer,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &Config,
        source: S,
        detector: D,
        recognizer: R,
        tracker: Tracker,
        queue: QueueSender,
        spool: Spool,
        temp_cell: Arc<AtomicU32>,
    ) -> Self {
        Pipeline {
            source,
            detector,
            recognizer,
            tracker,
            queue,
            spool,
            temp_cell,
            max_temp: cfg.thermal.max_temp,
            overheated_sleep: Duration::from_secs(cfg.thermal.overheated_sleep_secs),
            working_marker: cfg.log.working_marker.clone(),
            time_log: cfg.log.time_log.clone(),
            observer: None,
            state: PipelineState::Running,
            frames: 0,
        }
    }

    pub fn with_observer(mut self, observer: TrackObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let temp = self.temp_cell.load(Ordering::Relaxed);
            if temp > self.max_temp {
                self.state = PipelineState::Overheated;
                info!(
                    "[PIPELINE] overheated ({}), sleeping {}s",
                    temp,
                    self.overheated_sleep.as_secs()
                );
                std::thread::sleep(self.overheated_sleep);
                // hold at a nominal value until the guard samples again
                self.temp_cell.store(1, Ordering::Relaxed);
                self.state = PipelineState::Running;
            }

            let Some(frame) = self.source.next_frame()? else {
                self.stop();
                return Ok(());
            };
            self.frames += 1;
            if self.frames == WORKING_AFTER {
                self.touch_working_marker();
            }

            let (boxes, faces) = self.detector.detect(&frame)?;
            let votes = self.recognizer.recognize(&faces)?;
            let (live, event, passages) = self.tracker.track(boxes, votes, faces)?;
            if let Some(observer) = self.observer.as_mut() {
                observer(live, passages);
            }

            if let Some(event) = event {
                self.log_passage_time();
                self.enqueue(event);
            }
        }
    }

    /// Hand one event to the delivery side, exactly once: the queue if
    /// it has room, the spool otherwise. The frame loop never blocks on
    /// delivery.
    fn enqueue(&self, event: ExportEvent) {
        if let Err(event) = self.queue.push(event) {
            if let Err(e) = self.spool.save(std::slice::from_ref(&event)) {
                error!("[PIPELINE] event '{}' lost: {}", event.name, e);
            }
        }
    }

    fn stop(&mut self) {
        info!(
            "[PIPELINE] stream ended after {} frame(s), shutting down",
            self.frames
        );
        self.temp_cell.store(0, Ordering::Relaxed);
        self.queue.push_stop();
        self.state = PipelineState::Stopped;
    }

    fn touch_working_marker(&self) {
        if let Some(path) = &self.working_marker {
            if let Err(e) = fs::write(path, "true\n") {
                warn!("[PIPELINE] could not write working marker: {}", e);
            }
        }
    }

    fn log_passage_time(&self) {
        if let Some(path) = &self.time_log {
            let line = chrono::Local::now().format("%H:%M\n").to_string();
            let result = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut f| f.write_all(line.as_bytes()));
            if let Err(e) = result {
                warn!("[PIPELINE] could not append time log: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Direction;
    use crate::detection::{BBox, VoteMap};
    use crate::queue::{delivery_queue, QueueItem, QueueReceiver};
    use anyhow::Result;
    use std::collections::VecDeque;

    /// One scripted frame: aligned boxes, votes, and face crops.
    type Scripted = (Vec<BBox>, Vec<VoteMap>, Vec<Vec<u8>>);

    struct ScriptedSource {
        frames: VecDeque<Scripted>,
    }

    impl FrameSource for ScriptedSource {
        type Frame = Scripted;

        fn next_frame(&mut self) -> Result<Option<Scripted>> {
            Ok(self.frames.pop_front())
        }
    }

    struct PassthroughDetector;

    impl Detector<Scripted> for PassthroughDetector {
        fn detect(&mut self, frame: &Scripted) -> Result<(Vec<BBox>, Vec<Vec<u8>>)> {
            Ok((frame.0.clone(), frame.2.clone()))
        }
    }

    /// Replays each frame's scripted votes in lockstep with the driver.
    struct ScriptedRecognizer {
        votes: VecDeque<Vec<VoteMap>>,
    }

    impl Recognizer for ScriptedRecognizer {
        fn recognize(&mut self, _faces: &[Vec<u8>]) -> Result<Vec<VoteMap>> {
            Ok(self.votes.pop_front().unwrap_or_default())
        }
    }

    fn test_config(spool_dir: &std::path::Path) -> Config {
        let raw = format!(
            r#"{{
                "direction": "in",
                "server": {{
                    "capture_url": "http://collector/capture",
                    "status_url": "http://collector/status"
                }},
                "tracking": {{
                    "shared": {{ "min_appear": 0, "max_disappear": 0 }}
                }},
                "spool_dir": {:?}
            }}"#,
            spool_dir
        );
        serde_json::from_str(&raw).unwrap()
    }

    fn vote(name: &str, score: f32) -> VoteMap {
        [(name.to_string(), score)].into_iter().collect()
    }

    /// Build a pipeline over scripted frames; returns the queue receiver
    /// and the shared temperature cell alongside it.
    fn build(
        cfg: &Config,
        frames: Vec<Scripted>,
        capacity: usize,
    ) -> (
        Pipeline<ScriptedSource, PassthroughDetector, ScriptedRecognizer>,
        QueueReceiver,
        Arc<AtomicU32>,
        Spool,
    ) {
        let votes = frames.iter().map(|f| f.1.clone()).collect();
        let source = ScriptedSource {
            frames: frames.into(),
        };
        let tracker = Tracker::new(
            cfg.direction,
            cfg.tracking.settings_for(cfg.direction),
        );
        let (tx, rx) = delivery_queue(capacity);
        let spool = Spool::new(cfg.spool_dir.clone()).unwrap();
        let cell = Arc::new(AtomicU32::new(1));
        let pipeline = Pipeline::new(
            cfg,
            source,
            PassthroughDetector,
            ScriptedRecognizer { votes },
            tracker,
            tx,
            spool.clone(),
            cell.clone(),
        );
        (pipeline, rx, cell, spool)
    }

    fn one_person_frames() -> Vec<Scripted> {
        vec![
            // one detection, then an empty frame so the track expires
            (
                vec![[0.0, 0.0, 20.0, 20.0]],
                vec![vote("alice", 0.9)],
                vec![vec![1u8]],
            ),
            (vec![], vec![], vec![]),
        ]
    }

    #[test]
    fn test_event_enqueued_exactly_once_and_stop_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("spool"));
        let (mut pipeline, rx, cell, spool) = build(&cfg, one_person_frames(), 8);

        pipeline.run().unwrap();

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(cell.load(Ordering::Relaxed), 0);

        match rx.try_take() {
            Some(QueueItem::Event(e)) => assert_eq!(e.name, "alice"),
            other => panic!("expected the passage event, got {:?}", other),
        }
        assert!(matches!(rx.try_take(), Some(QueueItem::Stop)));
        assert!(rx.try_take().is_none());
        assert!(spool.load().unwrap().is_none());
    }

    #[test]
    fn test_full_queue_overflows_to_spool() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("spool"));
        let (mut pipeline, rx, _cell, spool) = build(&cfg, one_person_frames(), 1);

        // fill the queue before the pipeline produces anything
        pipeline
            .queue
            .push(ExportEvent::new(
                Direction::In,
                "blocker".to_string(),
                vec![],
            ))
            .unwrap();

        // the stop sentinel blocks until the consumer makes room, so the
        // driver runs on its own thread like in production
        let handle = std::thread::spawn(move || {
            pipeline.run().unwrap();
            pipeline
        });

        // only start draining once the overflow has landed on disk, so
        // the produced event cannot sneak into the queue instead
        while fs::read_dir(spool.dir()).unwrap().count() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        let blocker = loop {
            match rx.try_take() {
                Some(QueueItem::Event(e)) => break e,
                Some(other) => panic!("unexpected {:?}", other),
                None => std::thread::sleep(Duration::from_millis(1)),
            }
        };
        assert_eq!(blocker.name, "blocker");

        let pipeline = handle.join().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        // the produced event bypassed the full queue onto disk
        let spooled = spool.load().unwrap().expect("event should be spooled");
        assert_eq!(spooled.len(), 1);
        assert_eq!(spooled[0].name, "alice");
        assert!(matches!(rx.try_take(), Some(QueueItem::Stop)));
    }

    #[test]
    fn test_overheat_pause_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(&dir.path().join("spool"));
        cfg.thermal.overheated_sleep_secs = 0;
        let (mut pipeline, rx, cell, _spool) = build(&cfg, one_person_frames(), 8);

        // guard reported a temperature above the limit
        cell.store(cfg.thermal.max_temp + 10, Ordering::Relaxed);
        pipeline.run().unwrap();

        // the pipeline recovered, processed the stream, and stopped
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(matches!(rx.try_take(), Some(QueueItem::Event(_))));
    }

    #[test]
    fn test_working_marker_written_after_warmup() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("working");
        let mut cfg = test_config(&dir.path().join("spool"));
        cfg.log.working_marker = Some(marker.clone());

        let frames = (0..12)
            .map(|_| (vec![], vec![], vec![]))
            .collect::<Vec<Scripted>>();
        let (mut pipeline, _rx, _cell, _spool) = build(&cfg, frames, 8);
        pipeline.run().unwrap();

        assert_eq!(fs::read_to_string(marker).unwrap(), "true\n");
        assert_eq!(pipeline.frames(), 12);
    }

    #[test]
    fn test_observer_sees_live_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("spool"));
        let (pipeline, _rx, _cell, _spool) = build(&cfg, one_person_frames(), 8);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut pipeline = pipeline.with_observer(Box::new(move |tracks, _| {
            sink.lock().unwrap().push(tracks.len());
        }));
        pipeline.run().unwrap();

        // one live track on the first frame, none after expiry
        assert_eq!(*seen.lock().unwrap(), vec![1, 0]);
    }
}
