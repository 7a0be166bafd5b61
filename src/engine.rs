//! Per-stream violation engine: re-id, zone occupancy, interaction and the
//! decision table, run in that order once per frame.

use anyhow::Result;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::config::Config;
use crate::detection::{ClassMap, Label, RawFrame, resolve_frame};
use crate::events::{EngineEvent, EventSink};
use crate::geometry::{BBox, Point};
use crate::interaction::{self, Contact};
use crate::tracker::CentroidTracker;
use crate::violations::{ViolationRecord, ViolationStateMachine};
use crate::zones::{EntryTable, Occupancy, Zone, ZoneOccupancy};

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("frame {frame} arrived after frame {last}; frames must be strictly increasing")]
    OutOfOrder { frame: u64, last: u64 },
}

/// Overlay data for one detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedObject {
    pub track_id: i64,
    pub virtual_id: u64,
    pub label: Label,
    pub bbox: BBox,
    pub caption: String,
    /// Recent centers, oldest first, and the distance covered across them.
    pub trail: Vec<Point>,
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame_id: u64,
    pub violation_count: u64,
    pub tracked_identities: usize,
    pub open_entries: usize,
    pub pending_entries: usize,
    pub objects: Vec<TrackedObject>,
    pub violations: Vec<ViolationRecord>,
    /// Hand ids of this frame's violations whose record did not reach the log.
    pub unpersisted: Vec<u64>,
}

#[derive(Debug)]
pub struct Engine {
    zones: Vec<Zone>,
    classes: ClassMap,
    tracker: CentroidTracker,
    occupancy: ZoneOccupancy,
    machine: ViolationStateMachine,
    entries: EntryTable,
    violation_count: u64,
    last_frame: Option<u64>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl Engine {
    pub fn new(cfg: &Config) -> Result<Self> {
        Ok(Self {
            zones: cfg.zones()?,
            classes: cfg.classes.clone(),
            tracker: CentroidTracker::new(cfg.tracking.clone()),
            occupancy: ZoneOccupancy::new(cfg.entry.clone()),
            machine: ViolationStateMachine::new(cfg.policy.clone()),
            entries: EntryTable::new(),
            violation_count: 0,
            last_frame: None,
        })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn violation_count(&self) -> u64 {
        self.violation_count
    }

    pub fn open_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn process(
        &mut self,
        raw: &RawFrame,
        sink: &mut dyn EventSink,
    ) -> Result<FrameReport, EngineError> {
        self.process_at(raw, sink, unix_now())
    }

    /// Like `process`, with the wall-clock seconds stamped on new violations.
    pub fn process_at(
        &mut self,
        raw: &RawFrame,
        sink: &mut dyn EventSink,
        timestamp: u64,
    ) -> Result<FrameReport, EngineError> {
        let frame = raw.frame_id;
        if let Some(last) = self.last_frame {
            if frame <= last {
                return Err(EngineError::OutOfOrder { frame, last });
            }
        }
        self.last_frame = Some(frame);

        let (detections, rejected) = resolve_frame(raw, &self.classes);
        for error in rejected {
            sink.emit(EngineEvent::DetectionRejected { frame, error });
        }

        // identity
        let update = self.tracker.update(frame, &detections);
        for &virtual_id in &update.created {
            sink.emit(EngineEvent::IdentityCreated { frame, virtual_id });
        }
        if !update.evicted.is_empty() {
            sink.emit(EngineEvent::IdentitiesEvicted {
                frame,
                virtual_ids: update.evicted.clone(),
            });
        }
        let vids = &update.assignments;

        // occupancy
        for d in detections.iter().filter(|d| d.label == Label::Hand) {
            let Some(&vid) = vids.get(&d.transient_id) else {
                continue;
            };
            match self
                .occupancy
                .observe(vid, &d.bbox, frame, &self.zones, &mut self.entries)
            {
                Occupancy::Pending { zone_id, hits } => sink.emit(EngineEvent::EntryPending {
                    frame,
                    virtual_id: vid,
                    zone_id,
                    hits,
                }),
                Occupancy::Confirmed { zone_id } => sink.emit(EngineEvent::EntryConfirmed {
                    frame,
                    virtual_id: vid,
                    zone_id,
                }),
                Occupancy::Inside | Occupancy::Outside => {}
            }
        }
        self.occupancy.prune(frame);

        // contact
        for c in interaction::evaluate(&detections, vids, &mut self.entries) {
            sink.emit(match c {
                Contact::Tool {
                    virtual_id,
                    tool_id,
                } => EngineEvent::ToolUsed {
                    frame,
                    virtual_id,
                    tool_id,
                },
                Contact::Ingredient {
                    virtual_id,
                    ingredient_id,
                } => EngineEvent::IngredientTouched {
                    frame,
                    virtual_id,
                    ingredient_id,
                },
            });
        }

        // decision
        let outcome = self.machine.step(frame, &mut self.entries, timestamp);
        for closed in outcome.closed {
            let vid = closed.entry.virtual_id;
            self.occupancy.forget(vid);
            if closed.suppressed {
                sink.emit(EngineEvent::ViolationSuppressed {
                    frame,
                    virtual_id: vid,
                    zone_id: closed.entry.zone_id.clone(),
                });
            }
            sink.emit(EngineEvent::Resolved {
                frame,
                virtual_id: vid,
                zone_id: closed.entry.zone_id,
                resolution: closed.resolution,
                duration: frame - closed.entry.entry_frame,
                last_seen_frame: closed.entry.last_seen_frame,
            });
        }
        for v in &outcome.violations {
            self.violation_count += 1;
            sink.emit(EngineEvent::ViolationEmitted(v.clone()));
        }

        let objects = detections
            .iter()
            .filter_map(|d| {
                let vid = *vids.get(&d.transient_id)?;
                Some(TrackedObject {
                    track_id: d.transient_id,
                    virtual_id: vid,
                    label: d.label,
                    bbox: d.bbox,
                    caption: format!("ID:{vid} {}", d.label),
                    trail: self.tracker.path(vid),
                    speed: self.tracker.velocity(vid),
                })
            })
            .collect();

        Ok(FrameReport {
            frame_id: frame,
            violation_count: self.violation_count,
            tracked_identities: self.tracker.len(),
            open_entries: self.open_entries(),
            pending_entries: self.occupancy.pending_count(),
            objects,
            violations: outcome.violations,
            unpersisted: Vec::new(),
        })
    }

    /// Drop unresolved entries at end of stream; nothing is inferred from them.
    pub fn shutdown(&mut self, sink: &mut dyn EventSink) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        if count > 0 {
            sink.emit(EngineEvent::EntriesDropped { count });
        }
        count
    }
}
