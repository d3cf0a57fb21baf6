use crate::config::{Direction, TrackerSettings};
use crate::detection::{BBox, Detection, VoteMap};
use crate::event::{ExportEvent, UnknownCounter};
use crate::track::{AbsorbSettings, Track, UNKNOWN};
use log::{debug, info};
use nalgebra::DMatrix;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    /// Detection arrays for one frame must be positionally aligned.
    #[error("misaligned detection input: {boxes} boxes, {votes} vote maps, {faces} faces")]
    MisalignedInput {
        boxes: usize,
        votes: usize,
        faces: usize,
    },
}

/// Frame-to-frame tracker for one camera/direction. Owns the active
/// track set; nothing here is shared across threads.
pub struct Tracker {
    direction: Direction,
    settings: TrackerSettings,
    active: Vec<Track>,
    next_id: u64,
    unknown_counter: UnknownCounter,
    passages: u64,
}

impl Tracker {
    pub fn new(direction: Direction, settings: TrackerSettings) -> Self {
        let unknown_counter = UnknownCounter::open(
            settings.counter_file.clone(),
            settings.unknown_ceiling,
        );
        Tracker {
            direction,
            settings,
            active: Vec::new(),
            next_id: 0,
            unknown_counter,
            passages: 0,
        }
    }

    /// Currently active tracks.
    pub fn tracks(&self) -> &[Track] {
        &self.active
    }

    /// Passages reported so far by this tracker.
    pub fn passages(&self) -> u64 {
        self.passages
    }

    /// Ingest one frame's detections and advance every track by exactly
    /// one step: matched, aged, or newly created. Returns the live track
    /// set, at most one completed passage event, and the running passage
    /// counter.
    pub fn track(
        &mut self,
        boxes: Vec<BBox>,
        votes: Vec<VoteMap>,
        faces: Vec<Vec<u8>>,
    ) -> Result<(&[Track], Option<ExportEvent>, u64), TrackError> {
        if boxes.len() != votes.len() || boxes.len() != faces.len() {
            return Err(TrackError::MisalignedInput {
                boxes: boxes.len(),
                votes: votes.len(),
                faces: faces.len(),
            });
        }

        let incoming: Vec<Detection> = boxes
            .into_iter()
            .zip(votes)
            .zip(faces)
            .map(|((bbox, votes), face)| Detection::new(bbox, votes, face))
            .collect();

        let matches = self.associate(&incoming);
        let mut incoming: Vec<Option<Detection>> = incoming.into_iter().map(Some).collect();
        let mut matched_rows = vec![false; self.active.len()];

        let absorb = AbsorbSettings {
            skip_frame: self.settings.skip_frame,
            max_stack: self.settings.max_stack,
            tolerance: self.settings.tolerance,
        };
        for &(row, col) in &matches {
            if let Some(det) = incoming[col].take() {
                matched_rows[row] = true;
                self.active[row].absorb(det, &absorb);
            }
        }

        let event = self.age_unmatched(&matched_rows);

        for det in incoming.into_iter().flatten() {
            let mut track = Track::new(det, self.direction, self.settings.tolerance);
            track.id = self.next_id;
            self.next_id += 1;
            self.active.push(track);
        }

        Ok((&self.active, event, self.passages))
    }

    /// Greedy nearest-neighbor bipartite matching over the full pairwise
    /// Euclidean distance matrix: repeatedly take the globally smallest
    /// remaining cell, gate it on relative box-size change, and on accept
    /// poison its whole row and column. A gated rejection poisons only
    /// the one cell. Ties break by scan order. Deliberately not optimal
    /// assignment; cheap enough to run every frame.
    fn associate(&self, incoming: &[Detection]) -> Vec<(usize, usize)> {
        let n_old = self.active.len();
        let n_new = incoming.len();
        let mut matches = Vec::new();
        if n_old == 0 || n_new == 0 {
            return matches;
        }

        let mut dist = DMatrix::from_fn(n_old, n_new, |i, j| {
            euclidean(self.active[i].position, incoming[j].center())
        });

        let rounds = n_old.min(n_new);
        while matches.len() < rounds {
            let mut best = f32::INFINITY;
            let mut cell = None;
            for i in 0..n_old {
                for j in 0..n_new {
                    if dist[(i, j)] < best {
                        best = dist[(i, j)];
                        cell = Some((i, j));
                    }
                }
            }
            let Some((row, col)) = cell else { break };

            if let Some(max_ratio) = self.settings.max_ratio {
                let new_size = incoming[col].size();
                if size_change(self.active[row].size, new_size) > max_ratio {
                    // implausible pair; the row and column stay in play
                    dist[(row, col)] = f32::INFINITY;
                    continue;
                }
            }

            for j in 0..n_new {
                dist[(row, j)] = f32::INFINITY;
            }
            for i in 0..n_old {
                dist[(i, col)] = f32::INFINITY;
            }
            matches.push((row, col));
        }
        matches
    }

    /// Age every unmatched track by one disappear tick and remove the
    /// expired ones. At most one qualifying removal is exported per
    /// cycle; a second expired track keeps aging and goes out on a later
    /// cycle, so the single-event hand-off never drops a passage.
    fn age_unmatched(&mut self, matched_rows: &[bool]) -> Option<ExportEvent> {
        let mut event = None;
        let mut i = self.active.len();
        while i > 0 {
            i -= 1;
            if matched_rows[i] {
                continue;
            }
            self.active[i].disappear_count += 1;
            if self.active[i].disappear_count <= self.settings.max_disappear {
                continue;
            }
            if self.active[i].appear_count <= self.settings.min_appear {
                let track = self.active.remove(i);
                debug!(
                    "[TRACKER] {} dropping brief track {} ({} frames)",
                    self.direction, track.id, track.appear_count
                );
            } else if event.is_none() {
                let track = self.active.remove(i);
                event = Some(self.export(track));
            }
        }
        event
    }

    fn export(&mut self, track: Track) -> ExportEvent {
        self.passages += 1;
        let (name, images) = if track.resolved_name == UNKNOWN {
            let name = format!("{}-{}", UNKNOWN, self.unknown_counter.next());
            let mut stack = track.into_face_stack();
            let skip = stack.len().saturating_sub(self.settings.max_send);
            stack.drain(..skip);
            (name, stack)
        } else {
            let name = track.resolved_name.clone();
            let latest = track.into_face_stack().pop().unwrap_or_default();
            (name, vec![latest])
        };
        info!(
            "[TRACKER] {} passage #{}: {}",
            self.direction, self.passages, name
        );
        ExportEvent::new(self.direction, name, images)
    }
}

fn euclidean(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Relative size change between two boxes, `1 - min/max`. Zero for
/// identical sizes, approaching one as they diverge.
fn size_change(a: f32, b: f32) -> f32 {
    let max = a.max(b);
    if max <= 0.0 {
        return 0.0;
    }
    1.0 - a.min(b) / max
}
