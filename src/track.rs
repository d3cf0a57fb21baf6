use crate::config::Direction;
use crate::detection::{Detection, VoteMap};

/// Name assigned to a track whose votes never clear the confidence floor.
pub const UNKNOWN: &str = "UNKNOWN";

/// One continuously observed person, as seen by a single tracker.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique among the owning tracker's active set; stable while the
    /// same person stays tracked.
    pub id: u64,
    /// Centroid of the latest matched box.
    pub position: (f32, f32),
    /// Box width from the latest match.
    pub size: f32,
    /// Size at creation. Kept so a deployment can read the shrink/grow
    /// trend; no direction inference is done on it here.
    pub size0: f32,
    /// Accumulated identity votes, summed across matched frames.
    pub votes: VoteMap,
    /// Current best name, or UNKNOWN below the confidence floor.
    pub resolved_name: String,
    /// Sampled face crops, insertion order, capped at `max_stack`.
    face_stack: Vec<Vec<u8>>,
    /// Frames in which this track matched a detection.
    pub appear_count: u32,
    /// Consecutive frames since the last match.
    pub disappear_count: u32,
    pub direction: Direction,
}

impl Track {
    /// Build a fresh track from a single detection.
    pub fn new(detection: Detection, direction: Direction, tolerance: f32) -> Self {
        let position = detection.center();
        let size = detection.size();
        let resolved_name = resolve_name(&detection.votes, tolerance);
        Track {
            id: 0, // assigned by the tracker on insertion
            position,
            size,
            size0: size,
            votes: detection.votes,
            resolved_name,
            face_stack: vec![detection.face],
            appear_count: 1,
            disappear_count: 0,
            direction,
        }
    }

    /// Fold a matched detection into this track: sum votes key-wise,
    /// take the new geometry, sample the face crop, bump the counters.
    pub fn absorb(&mut self, detection: Detection, settings: &AbsorbSettings) {
        self.position = detection.center();
        self.size = detection.size();
        for (name, score) in detection.votes {
            *self.votes.entry(name).or_insert(0.0) += score;
        }

        // Sampling keys off the appear count before this match.
        if settings.skip_frame > 0 && self.appear_count % settings.skip_frame == 0 {
            self.face_stack.push(detection.face);
            self.trim_stack(settings.max_stack);
        }

        self.resolved_name = resolve_name(&self.votes, settings.tolerance);
        self.appear_count += 1;
        self.disappear_count = 0;
    }

    /// Keep the earliest `max_stack - 1` crops plus the newest.
    fn trim_stack(&mut self, max_stack: usize) {
        let max_stack = max_stack.max(1);
        if self.face_stack.len() > max_stack {
            if let Some(newest) = self.face_stack.pop() {
                self.face_stack.truncate(max_stack - 1);
                self.face_stack.push(newest);
            }
        }
    }

    pub fn face_stack(&self) -> &[Vec<u8>] {
        &self.face_stack
    }

    /// Most recent face crop. Every track holds at least one.
    pub fn latest_face(&self) -> &[u8] {
        self.face_stack.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Take the stack out of the track, newest last. Used at export.
    pub fn into_face_stack(self) -> Vec<Vec<u8>> {
        self.face_stack
    }
}

/// Knobs consulted when absorbing a matched detection.
pub struct AbsorbSettings {
    pub skip_frame: u32,
    pub max_stack: usize,
    pub tolerance: f32,
}

/// Pick the name with the highest accumulated vote, or UNKNOWN if the
/// best vote stays under `tolerance` (or the map is empty). Ties go to
/// whichever key is seen first.
pub fn resolve_name(votes: &VoteMap, tolerance: f32) -> String {
    let mut best: Option<(&String, f32)> = None;
    for (name, &score) in votes {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((name, score)),
        }
    }
    match best {
        Some((name, top)) if top >= tolerance => name.clone(),
        _ => UNKNOWN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn det(bbox: [f32; 4], votes: &[(&str, f32)], face: &[u8]) -> Detection {
        let votes = votes
            .iter()
            .map(|(n, s)| (n.to_string(), *s))
            .collect::<VoteMap>();
        Detection::new(bbox, votes, face.to_vec())
    }

    fn settings(skip_frame: u32, max_stack: usize) -> AbsorbSettings {
        AbsorbSettings {
            skip_frame,
            max_stack,
            tolerance: 0.5,
        }
    }

    #[test]
    fn test_new_track_state() {
        let track = Track::new(
            det([10.0, 10.0, 30.0, 40.0], &[("alice", 0.9)], b"f0"),
            Direction::In,
            0.5,
        );
        assert_eq!(track.appear_count, 1);
        assert_eq!(track.disappear_count, 0);
        assert_eq!(track.size0, 20.0);
        assert_eq!(track.resolved_name, "alice");
        assert_eq!(track.face_stack().len(), 1);
    }

    #[test]
    fn test_vote_merge_sums_and_unions() {
        let mut track = Track::new(
            det([0.0, 0.0, 10.0, 10.0], &[("alice", 0.4), ("bob", 0.1)], b"f0"),
            Direction::In,
            0.5,
        );
        track.absorb(
            det([1.0, 1.0, 11.0, 11.0], &[("alice", 0.3), ("carol", 0.2)], b"f1"),
            &settings(1, 5),
        );
        assert_relative_eq!(track.votes["alice"], 0.7);
        assert_relative_eq!(track.votes["bob"], 0.1);
        assert_relative_eq!(track.votes["carol"], 0.2);
        assert_eq!(track.resolved_name, "alice");
    }

    #[test]
    fn test_votes_only_grow() {
        let mut track = Track::new(
            det([0.0, 0.0, 10.0, 10.0], &[("alice", 0.2)], b"f0"),
            Direction::In,
            0.5,
        );
        let mut previous = track.votes["alice"];
        for i in 0..5 {
            track.absorb(
                det([0.0, 0.0, 10.0, 10.0], &[("alice", 0.2)], &[i]),
                &settings(1, 5),
            );
            assert!(track.votes["alice"] > previous);
            previous = track.votes["alice"];
        }
    }

    #[test]
    fn test_resolve_name_floor() {
        let low: VoteMap = [("bob".to_string(), 0.2)].into_iter().collect();
        assert_eq!(resolve_name(&low, 0.5), UNKNOWN);
        let high: VoteMap = [("bob".to_string(), 0.6)].into_iter().collect();
        assert_eq!(resolve_name(&high, 0.5), "bob");
        assert_eq!(resolve_name(&VoteMap::new(), 0.5), UNKNOWN);
    }

    #[test]
    fn test_stack_bound_holds_for_all_caps() {
        for max_stack in 1..=4 {
            let mut track = Track::new(
                det([0.0, 0.0, 10.0, 10.0], &[], b"f0"),
                Direction::Out,
                0.5,
            );
            for i in 0..20u8 {
                track.absorb(
                    det([0.0, 0.0, 10.0, 10.0], &[], &[i]),
                    &settings(1, max_stack),
                );
                assert!(track.face_stack().len() <= max_stack);
            }
            // the most recent crop always survives trimming
            assert_eq!(track.latest_face(), &[19]);
        }
    }

    #[test]
    fn test_stack_keeps_earliest_plus_newest() {
        let mut track = Track::new(det([0.0, 0.0, 10.0, 10.0], &[], b"a"), Direction::In, 0.5);
        for face in [b"b", b"c", b"d", b"e"] {
            track.absorb(det([0.0, 0.0, 10.0, 10.0], &[], face), &settings(1, 3));
        }
        // earliest two retained, middle dropped, newest kept
        let stack: Vec<&[u8]> = track.face_stack().iter().map(Vec::as_slice).collect();
        assert_eq!(stack, vec![b"a" as &[u8], b"b", b"e"]);
    }

    #[test]
    fn test_skip_frame_sampling() {
        let mut track = Track::new(det([0.0, 0.0, 10.0, 10.0], &[], b"f0"), Direction::In, 0.5);
        // appear_count runs 1,2,3,... and with skip_frame=3 only the
        // matches at appear_count 3 and 6 add a crop
        for i in 1..=6u8 {
            track.absorb(det([0.0, 0.0, 10.0, 10.0], &[], &[i]), &settings(3, 10));
        }
        assert_eq!(track.face_stack().len(), 3); // creation crop + two samples
    }
}
