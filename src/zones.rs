//! Zone membership for hands, with debounced entry confirmation.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::config::EntryDebounce;
use crate::geometry::BBox;

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub id: String,
    pub rect: BBox,
}

/// An open occupancy event for one identity, awaiting a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryRecord {
    pub virtual_id: u64,
    pub zone_id: String,
    pub entry_frame: u64,
    pub last_seen_frame: u64,
    pub touched_ingredient: bool,
    pub used_tool: bool,
    pub tool_id: Option<i64>,
}

impl EntryRecord {
    fn new(virtual_id: u64, zone_id: &str, frame: u64) -> Self {
        Self {
            virtual_id,
            zone_id: zone_id.to_string(),
            entry_frame: frame,
            last_seen_frame: frame,
            touched_ingredient: false,
            used_tool: false,
            tool_id: None,
        }
    }
}

/// Open entries keyed by virtual id; at most one per identity.
pub type EntryTable = BTreeMap<u64, EntryRecord>;

#[derive(Debug, Clone, PartialEq)]
pub enum Occupancy {
    Outside,
    /// Overlapping `zone_id`, not yet confirmed.
    Pending { zone_id: String, hits: usize },
    /// Entry confirmed this frame.
    Confirmed { zone_id: String },
    /// Already has an open entry; only `last_seen_frame` moved.
    Inside,
}

#[derive(Debug)]
pub struct ZoneOccupancy {
    cfg: EntryDebounce,
    // vid -> recent (frame, zone index) overlaps
    hits: HashMap<u64, VecDeque<(u64, usize)>>,
}

impl ZoneOccupancy {
    pub fn new(cfg: EntryDebounce) -> Self {
        Self {
            cfg,
            hits: HashMap::new(),
        }
    }

    pub fn observe(
        &mut self,
        virtual_id: u64,
        bbox: &BBox,
        frame: u64,
        zones: &[Zone],
        entries: &mut EntryTable,
    ) -> Occupancy {
        let Some(idx) = zones.iter().position(|z| z.rect.intersects(bbox)) else {
            return Occupancy::Outside;
        };

        if let Some(entry) = entries.get_mut(&virtual_id) {
            entry.last_seen_frame = frame;
            return Occupancy::Inside;
        }

        let window = self.cfg.confirmation_window;
        let buf = self.hits.entry(virtual_id).or_default();
        while let Some(&(f, _)) = buf.front() {
            if frame.saturating_sub(f) < window {
                break;
            }
            buf.pop_front();
        }
        buf.push_back((frame, idx));

        let count = buf.iter().filter(|(_, z)| *z == idx).count();
        let zone_id = zones[idx].id.clone();
        if count >= self.cfg.confirmation_hits {
            self.hits.remove(&virtual_id);
            entries.insert(virtual_id, EntryRecord::new(virtual_id, &zone_id, frame));
            Occupancy::Confirmed { zone_id }
        } else {
            Occupancy::Pending {
                zone_id,
                hits: count,
            }
        }
    }

    /// Drop buffered overlaps for an identity whose entry just closed.
    pub fn forget(&mut self, virtual_id: u64) {
        self.hits.remove(&virtual_id);
    }

    /// Drop buffers whose newest overlap fell out of the window.
    pub fn prune(&mut self, frame: u64) {
        let window = self.cfg.confirmation_window;
        self.hits
            .retain(|_, buf| buf.back().is_some_and(|&(f, _)| frame.saturating_sub(f) < window));
    }

    pub fn pending_count(&self) -> usize {
        self.hits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zones() -> Vec<Zone> {
        vec![
            Zone {
                id: "protein".into(),
                rect: BBox::new(380.0, 250.0, 510.0, 680.0).unwrap(),
            },
            Zone {
                id: "cheese".into(),
                rect: BBox::new(400.0, 250.0, 700.0, 680.0).unwrap(),
            },
        ]
    }

    fn hand() -> BBox {
        BBox::new(400.0, 300.0, 430.0, 330.0).unwrap()
    }

    fn occ(hits: usize) -> ZoneOccupancy {
        ZoneOccupancy::new(EntryDebounce {
            confirmation_window: 30,
            confirmation_hits: hits,
        })
    }

    #[test]
    fn confirms_after_enough_hits() {
        let mut z = occ(3);
        let mut entries = EntryTable::new();
        let zs = zones();
        assert!(matches!(z.observe(1, &hand(), 8, &zs, &mut entries), Occupancy::Pending { hits: 1, .. }));
        assert!(matches!(z.observe(1, &hand(), 9, &zs, &mut entries), Occupancy::Pending { hits: 2, .. }));
        assert_eq!(
            z.observe(1, &hand(), 10, &zs, &mut entries),
            Occupancy::Confirmed { zone_id: "protein".into() }
        );
        let e = &entries[&1];
        assert_eq!(e.entry_frame, 10);
        assert_eq!(e.zone_id, "protein");
        assert!(!e.used_tool && !e.touched_ingredient);
    }

    #[test]
    fn flicker_never_creates_entry() {
        let mut z = occ(3);
        let mut entries = EntryTable::new();
        let zs = zones();
        let away = BBox::new(0.0, 0.0, 30.0, 30.0).unwrap();
        z.observe(1, &hand(), 1, &zs, &mut entries);
        z.observe(1, &hand(), 2, &zs, &mut entries);
        for f in 3..100 {
            assert_eq!(z.observe(1, &away, f, &zs, &mut entries), Occupancy::Outside);
        }
        assert!(entries.is_empty());
        // old hits have aged out: two more frames are still not enough
        z.observe(1, &hand(), 100, &zs, &mut entries);
        z.observe(1, &hand(), 101, &zs, &mut entries);
        assert!(entries.is_empty());
    }

    #[test]
    fn open_entry_is_refreshed_not_duplicated() {
        let mut z = occ(1);
        let mut entries = EntryTable::new();
        let zs = zones();
        z.observe(4, &hand(), 10, &zs, &mut entries);
        assert_eq!(
            z.observe(4, &hand(), 11, &zs, &mut entries),
            Occupancy::Inside
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[&4].entry_frame, 10);
        assert_eq!(entries[&4].last_seen_frame, 11);
    }

    #[test]
    fn first_configured_zone_wins() {
        let mut z = occ(1);
        let mut entries = EntryTable::new();
        // overlaps both zones
        let b = BBox::new(450.0, 300.0, 480.0, 330.0).unwrap();
        z.observe(2, &b, 0, &zones(), &mut entries);
        assert_eq!(entries[&2].zone_id, "protein");
    }

    #[test]
    fn prune_drops_stale_buffers() {
        let mut z = occ(3);
        let mut entries = EntryTable::new();
        z.observe(1, &hand(), 0, &zones(), &mut entries);
        z.observe(2, &hand(), 25, &zones(), &mut entries);
        z.prune(40);
        assert_eq!(z.pending_count(), 1);
        z.forget(2);
        assert_eq!(z.pending_count(), 0);
    }
}
