//! Structured engine events and the sink the caller hands to the engine.

use log::{debug, info, warn};

use crate::detection::DetectionError;
use crate::violations::{Resolution, ViolationRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    DetectionRejected {
        frame: u64,
        error: DetectionError,
    },
    IdentityCreated {
        frame: u64,
        virtual_id: u64,
    },
    IdentitiesEvicted {
        frame: u64,
        virtual_ids: Vec<u64>,
    },
    EntryPending {
        frame: u64,
        virtual_id: u64,
        zone_id: String,
        hits: usize,
    },
    EntryConfirmed {
        frame: u64,
        virtual_id: u64,
        zone_id: String,
    },
    ToolUsed {
        frame: u64,
        virtual_id: u64,
        tool_id: i64,
    },
    IngredientTouched {
        frame: u64,
        virtual_id: u64,
        ingredient_id: i64,
    },
    Resolved {
        frame: u64,
        virtual_id: u64,
        zone_id: String,
        resolution: Resolution,
        duration: u64,
        last_seen_frame: u64,
    },
    ViolationEmitted(ViolationRecord),
    ViolationSuppressed {
        frame: u64,
        virtual_id: u64,
        zone_id: String,
    },
    EntriesDropped {
        count: usize,
    },
}

pub trait EventSink {
    fn emit(&mut self, event: EngineEvent);
}

impl EventSink for Vec<EngineEvent> {
    fn emit(&mut self, event: EngineEvent) {
        self.push(event);
    }
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::DetectionRejected { frame, error } => {
                warn!("frame {frame}: skipped detection: {error}")
            }
            EngineEvent::IdentityCreated { frame, virtual_id } => {
                debug!("frame {frame}: new identity {virtual_id}")
            }
            EngineEvent::IdentitiesEvicted { frame, virtual_ids } => {
                debug!("frame {frame}: evicted identities {virtual_ids:?}")
            }
            EngineEvent::EntryPending {
                frame,
                virtual_id,
                zone_id,
                hits,
            } => debug!("frame {frame}: hand {virtual_id} overlapping {zone_id} ({hits} hits)"),
            EngineEvent::EntryConfirmed {
                frame,
                virtual_id,
                zone_id,
            } => info!("frame {frame}: hand {virtual_id} entered {zone_id}"),
            EngineEvent::ToolUsed {
                frame,
                virtual_id,
                tool_id,
            } => debug!("frame {frame}: hand {virtual_id} used tool {tool_id}"),
            EngineEvent::IngredientTouched {
                frame,
                virtual_id,
                ingredient_id,
            } => debug!("frame {frame}: hand {virtual_id} touched ingredient {ingredient_id}"),
            EngineEvent::Resolved {
                frame,
                virtual_id,
                zone_id,
                resolution,
                duration,
                last_seen_frame,
            } => info!(
                "frame {frame}: hand {virtual_id} in {zone_id} resolved as {resolution:?} after {duration} frames (last seen {last_seen_frame})"
            ),
            EngineEvent::ViolationEmitted(v) => warn!(
                "VIOLATION frame {}: hand {} touched ingredient without tool in {}",
                v.frame_id, v.hand_id, v.roi_id
            ),
            EngineEvent::ViolationSuppressed {
                frame,
                virtual_id,
                zone_id,
            } => info!("frame {frame}: repeat violation by hand {virtual_id} in {zone_id} within cooldown"),
            EngineEvent::EntriesDropped { count } => {
                info!("dropped {count} unresolved zone entries")
            }
        }
    }
}
