//! Per-entry decision table plus cooldown gating of violation reports.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::Policy;
use crate::zones::{EntryRecord, EntryTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Ingredient touched without a tool inside the cleaning window.
    Violation,
    /// No ingredient contact for the whole cleaning window.
    Cleaning,
    ToolUsed,
    /// Ingredient touched without a tool, but only after the window.
    LateTouch,
}

/// Persisted form of one reported violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub frame_id: u64,
    pub hand_id: u64,
    pub roi_id: String,
    pub scooper_id: Option<i64>,
    pub timestamp: u64,
}

/// First matching rule wins; `None` keeps the entry open.
pub fn decide(entry: &EntryRecord, frame: u64, cleaning_timeout: u64) -> Option<Resolution> {
    let duration = frame.saturating_sub(entry.entry_frame);
    let timed_out = duration >= cleaning_timeout;
    match (entry.touched_ingredient, entry.used_tool, timed_out) {
        (true, false, false) => Some(Resolution::Violation),
        (false, _, true) => Some(Resolution::Cleaning),
        (true, true, _) => Some(Resolution::ToolUsed),
        (true, false, true) => Some(Resolution::LateTouch),
        (false, _, false) => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closed {
    pub entry: EntryRecord,
    pub resolution: Resolution,
    /// Violation held back by the cooldown.
    pub suppressed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    pub closed: Vec<Closed>,
    pub violations: Vec<ViolationRecord>,
}

#[derive(Debug)]
pub struct ViolationStateMachine {
    policy: Policy,
    last_violation: HashMap<u64, u64>,
}

impl ViolationStateMachine {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            last_violation: HashMap::new(),
        }
    }

    fn cooling_down(&self, vid: u64, frame: u64) -> bool {
        self.last_violation
            .get(&vid)
            .is_some_and(|&last| frame.saturating_sub(last) < self.policy.violation_cooldown)
    }

    /// Run the decision table over every open entry, closing the resolved ones.
    pub fn step(&mut self, frame: u64, entries: &mut EntryTable, timestamp: u64) -> StepOutcome {
        let mut out = StepOutcome::default();

        let decided: Vec<(u64, Resolution)> = entries
            .iter()
            .filter_map(|(vid, e)| Some((*vid, decide(e, frame, self.policy.cleaning_timeout)?)))
            .collect();

        for (vid, resolution) in decided {
            let Some(entry) = entries.remove(&vid) else {
                continue;
            };
            let mut suppressed = false;
            if resolution == Resolution::Violation {
                if self.cooling_down(vid, frame) {
                    suppressed = true;
                } else {
                    self.last_violation.insert(vid, frame);
                    out.violations.push(ViolationRecord {
                        frame_id: frame,
                        hand_id: vid,
                        roi_id: entry.zone_id.clone(),
                        scooper_id: entry.tool_id,
                        timestamp,
                    });
                }
            }
            out.closed.push(Closed {
                entry,
                resolution,
                suppressed,
            });
        }

        let cooldown = self.policy.violation_cooldown;
        self.last_violation
            .retain(|_, last| frame.saturating_sub(*last) < cooldown);
        out
    }
}
