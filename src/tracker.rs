//! Centroid re-identification: durable virtual ids across detector id churn.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::config::Tracking;
use crate::detection::{Detection, Label};
use crate::geometry::Point;

#[derive(Debug, Clone)]
struct Identity {
    label: Label,
    centers: VecDeque<Point>, // newest last
    last_seen_frame: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackUpdate {
    /// transient id -> virtual id for every detection in the frame
    pub assignments: BTreeMap<i64, u64>,
    pub created: Vec<u64>,
    pub evicted: Vec<u64>,
}

#[derive(Debug)]
pub struct CentroidTracker {
    th: Tracking,
    next_id: u64,
    identities: BTreeMap<u64, Identity>,
}

impl CentroidTracker {
    pub fn new(th: Tracking) -> Self {
        Self {
            th,
            next_id: 1,
            identities: BTreeMap::new(),
        }
    }

    /// Assign a virtual id to every detection of `frame`.
    ///
    /// Detections are matched in ascending transient id order against the
    /// last center of each retained identity with the same label. The closest
    /// identity strictly under `distance_threshold` wins; on equal distance
    /// the lowest virtual id wins. An identity claimed earlier in the frame is
    /// not offered again.
    pub fn update(&mut self, frame: u64, detections: &[Detection]) -> TrackUpdate {
        let mut out = TrackUpdate {
            evicted: self.evict(frame),
            ..Default::default()
        };

        let mut ordered: Vec<&Detection> = detections.iter().collect();
        ordered.sort_by_key(|d| d.transient_id);

        let mut claimed = BTreeSet::new();
        for det in ordered {
            let center = det.bbox.center();

            let mut best: Option<u64> = None;
            let mut min_dist = f32::INFINITY;
            for (vid, ident) in &self.identities {
                if ident.label != det.label || claimed.contains(vid) {
                    continue;
                }
                let Some(last) = ident.centers.back() else {
                    continue;
                };
                let d = center.distance(last);
                if d < self.th.distance_threshold && d < min_dist {
                    best = Some(*vid);
                    min_dist = d;
                }
            }

            let vid = match best {
                Some(vid) => {
                    if let Some(ident) = self.identities.get_mut(&vid) {
                        ident.centers.push_back(center);
                        while ident.centers.len() > self.th.max_history {
                            ident.centers.pop_front();
                        }
                        ident.last_seen_frame = frame;
                    }
                    vid
                }
                None => {
                    let vid = self.next_id;
                    self.next_id += 1;
                    self.identities.insert(
                        vid,
                        Identity {
                            label: det.label,
                            centers: VecDeque::from([center]),
                            last_seen_frame: frame,
                        },
                    );
                    out.created.push(vid);
                    vid
                }
            };
            claimed.insert(vid);
            out.assignments.insert(det.transient_id, vid);
        }

        out
    }

    fn evict(&mut self, frame: u64) -> Vec<u64> {
        let horizon = self.th.max_missing_frames;
        let stale: Vec<u64> = self
            .identities
            .iter()
            .filter(|(_, i)| frame.saturating_sub(i.last_seen_frame) > horizon)
            .map(|(vid, _)| *vid)
            .collect();
        for vid in &stale {
            self.identities.remove(vid);
        }
        stale
    }

    /// Displacement between the oldest and newest retained center.
    pub fn velocity(&self, vid: u64) -> f32 {
        match self.identities.get(&vid) {
            Some(i) if i.centers.len() >= 2 => match (i.centers.front(), i.centers.back()) {
                (Some(a), Some(b)) => a.distance(b),
                _ => 0.0,
            },
            _ => 0.0,
        }
    }

    pub fn path(&self, vid: u64) -> Vec<Point> {
        self.identities
            .get(&vid)
            .map(|i| i.centers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;

    fn th() -> Tracking {
        Tracking {
            distance_threshold: 80.0,
            max_history: 5,
            max_missing_frames: 30,
        }
    }

    fn det(tid: i64, label: Label, cx: f32, cy: f32) -> Detection {
        Detection {
            transient_id: tid,
            label,
            bbox: BBox::new(cx - 15.0, cy - 15.0, cx + 15.0, cy + 15.0).unwrap(),
        }
    }

    fn hand(tid: i64, cx: f32, cy: f32) -> Detection {
        det(tid, Label::Hand, cx, cy)
    }

    #[test]
    fn slow_motion_keeps_identity_despite_id_churn() {
        let mut t = CentroidTracker::new(th());
        let first = t.update(0, &[hand(10, 100.0, 100.0)]).assignments[&10];
        for f in 1..50u64 {
            // detector hands out a fresh id every frame
            let tid = 10 + f as i64;
            let u = t.update(f, &[hand(tid, 100.0 + 20.0 * f as f32, 100.0)]);
            assert_eq!(u.assignments[&tid], first);
            assert!(u.created.is_empty());
        }
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn brief_occlusion_reuses_identity() {
        let mut t = CentroidTracker::new(th());
        let vid = t.update(0, &[hand(1, 200.0, 200.0)]).assignments[&1];
        for f in 1..4 {
            t.update(f, &[]);
        }
        assert_eq!(t.len(), 1);
        let u = t.update(4, &[hand(99, 230.0, 210.0)]);
        assert_eq!(u.assignments[&99], vid);
    }

    #[test]
    fn far_detection_gets_new_monotonic_id() {
        let mut t = CentroidTracker::new(th());
        let a = t.update(0, &[hand(1, 0.0, 0.0)]).assignments[&1];
        let b = t.update(1, &[hand(1, 500.0, 500.0)]).assignments[&1];
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        // exactly at the threshold does not match
        let c = t.update(2, &[hand(1, 580.0, 500.0)]).assignments[&1];
        assert_eq!(c, 3);
    }

    #[test]
    fn equal_distance_prefers_lowest_virtual_id() {
        let mut t = CentroidTracker::new(th());
        t.update(0, &[hand(1, 100.0, 100.0), hand(2, 160.0, 100.0)]);
        let u = t.update(1, &[hand(7, 130.0, 100.0)]);
        assert_eq!(u.assignments[&7], 1);
    }

    #[test]
    fn claimed_identity_is_not_shared() {
        let mut t = CentroidTracker::new(th());
        t.update(0, &[hand(1, 100.0, 100.0)]);
        let u = t.update(1, &[hand(5, 105.0, 100.0), hand(6, 110.0, 100.0)]);
        assert_eq!(u.assignments[&5], 1);
        assert_eq!(u.assignments[&6], 2);
        assert_eq!(u.created, vec![2]);
    }

    #[test]
    fn labels_do_not_steal_identities() {
        let mut t = CentroidTracker::new(th());
        let u = t.update(0, &[hand(2, 415.0, 315.0), det(1, Label::Tool, 415.0, 315.0)]);
        let tool_vid = u.assignments[&1];
        let hand_vid = u.assignments[&2];
        assert_ne!(tool_vid, hand_vid);
        let u = t.update(1, &[det(3, Label::Tool, 415.0, 315.0), hand(4, 416.0, 315.0)]);
        assert_eq!(u.assignments[&3], tool_vid);
        assert_eq!(u.assignments[&4], hand_vid);
    }

    #[test]
    fn stale_identities_are_evicted() {
        let mut t = CentroidTracker::new(th());
        t.update(0, &[hand(1, 100.0, 100.0)]);
        let u = t.update(30, &[]);
        assert!(u.evicted.is_empty());
        assert_eq!(t.len(), 1);
        let u = t.update(31, &[]);
        assert_eq!(u.evicted, vec![1]);
        assert!(t.is_empty());
        // evicted ids are never handed out again
        let u = t.update(32, &[hand(1, 100.0, 100.0)]);
        assert_eq!(u.assignments[&1], 2);
    }

    #[test]
    fn history_is_bounded() {
        let mut t = CentroidTracker::new(th());
        for f in 0..10u64 {
            t.update(f, &[hand(1, 10.0 * f as f32, 0.0)]);
        }
        let path = t.path(1);
        assert_eq!(path.len(), 5);
        assert_eq!(path[0].x, 50.0);
        assert_eq!(path[4].x, 90.0);
        assert!((t.velocity(1) - 40.0).abs() < 1e-4);
        assert_eq!(t.velocity(42), 0.0);
    }
}
