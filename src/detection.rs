//! Detector output: wire frames, class mapping and per-detection validation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::geometry::BBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Label {
    Hand,
    Person,
    Tool,
    Ingredient,
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hand" => Ok(Label::Hand),
            "person" => Ok(Label::Person),
            "tool" | "scooper" => Ok(Label::Tool),
            "ingredient" | "pizza" => Ok(Label::Ingredient),
            other => Err(format!("unknown label '{other}'")),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Label::Hand => "Hand",
            Label::Person => "Person",
            Label::Tool => "Tool",
            Label::Ingredient => "Ingredient",
        };
        f.write_str(s)
    }
}

/// Detector class id -> label, fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMap(BTreeMap<u32, Label>);

impl ClassMap {
    pub fn new(map: BTreeMap<u32, Label>) -> Self {
        Self(map)
    }

    pub fn get(&self, class_id: u32) -> Option<Label> {
        self.0.get(&class_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Label)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

impl Default for ClassMap {
    fn default() -> Self {
        Self(BTreeMap::from([
            (0, Label::Hand),
            (1, Label::Person),
            (2, Label::Ingredient),
            (3, Label::Tool),
        ]))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub track_id: Option<i64>,
    pub class_id: u32,
    pub bbox: [f32; 4],
}

/// One detector call, as read from the frame stream.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    pub frame_id: u64,
    #[serde(default)]
    pub detections: Vec<RawDetection>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub transient_id: i64,
    pub label: Label,
    pub bbox: BBox,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DetectionError {
    #[error("detection of class {class_id} has no track id")]
    MissingTrackId { class_id: u32 },
    #[error("track {track_id}: unknown class id {class_id}")]
    UnknownClass { track_id: i64, class_id: u32 },
    #[error("track {track_id}: degenerate box {bbox:?}")]
    DegenerateBox { track_id: i64, bbox: [f32; 4] },
    #[error("track {track_id} appears more than once in the frame")]
    DuplicateTrackId { track_id: i64 },
}

/// Validate one frame's detections. Bad detections are returned as errors and
/// left out; the rest of the frame is kept in input order.
pub fn resolve_frame(
    raw: &RawFrame,
    classes: &ClassMap,
) -> (Vec<Detection>, Vec<DetectionError>) {
    let mut out = Vec::with_capacity(raw.detections.len());
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for d in &raw.detections {
        let Some(track_id) = d.track_id else {
            errors.push(DetectionError::MissingTrackId {
                class_id: d.class_id,
            });
            continue;
        };
        let Some(label) = classes.get(d.class_id) else {
            errors.push(DetectionError::UnknownClass {
                track_id,
                class_id: d.class_id,
            });
            continue;
        };
        let Ok(bbox) = BBox::from_array(d.bbox) else {
            errors.push(DetectionError::DegenerateBox {
                track_id,
                bbox: d.bbox,
            });
            continue;
        };
        if !seen.insert(track_id) {
            errors.push(DetectionError::DuplicateTrackId { track_id });
            continue;
        }
        out.push(Detection {
            transient_id: track_id,
            label,
            bbox,
        });
    }

    (out, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_aliases() {
        assert_eq!("Scooper".parse::<Label>(), Ok(Label::Tool));
        assert_eq!("pizza".parse::<Label>(), Ok(Label::Ingredient));
        assert_eq!(" HAND ".parse::<Label>(), Ok(Label::Hand));
        assert!("spoon".parse::<Label>().is_err());
    }

    #[test]
    fn parses_wire_frame() {
        let line = r#"{"frame_id": 7, "detections": [
            {"track_id": 4, "class_id": 0, "bbox": [400, 300, 430, 330]},
            {"class_id": 3, "bbox": [405, 305, 425, 325]}
        ]}"#;
        let raw: RawFrame = serde_json::from_str(line).unwrap();
        assert_eq!(raw.frame_id, 7);
        assert_eq!(raw.detections.len(), 2);
        assert_eq!(raw.detections[1].track_id, None);
    }

    #[test]
    fn bad_detections_are_skipped_not_fatal() {
        let raw = RawFrame {
            frame_id: 1,
            detections: vec![
                RawDetection { track_id: Some(1), class_id: 0, bbox: [0.0, 0.0, 10.0, 10.0] },
                RawDetection { track_id: None, class_id: 0, bbox: [0.0, 0.0, 10.0, 10.0] },
                RawDetection { track_id: Some(2), class_id: 9, bbox: [0.0, 0.0, 10.0, 10.0] },
                RawDetection { track_id: Some(3), class_id: 3, bbox: [10.0, 0.0, 5.0, 10.0] },
                RawDetection { track_id: Some(1), class_id: 2, bbox: [0.0, 0.0, 10.0, 10.0] },
                RawDetection { track_id: Some(5), class_id: 2, bbox: [20.0, 20.0, 40.0, 40.0] },
            ],
        };
        let (dets, errs) = resolve_frame(&raw, &ClassMap::default());
        let ids: Vec<i64> = dets.iter().map(|d| d.transient_id).collect();
        assert_eq!(ids, vec![1, 5]);
        assert_eq!(dets[1].label, Label::Ingredient);
        assert_eq!(errs.len(), 4);
        assert!(matches!(errs[0], DetectionError::MissingTrackId { .. }));
        assert!(matches!(errs[1], DetectionError::UnknownClass { class_id: 9, .. }));
        assert!(matches!(errs[2], DetectionError::DegenerateBox { track_id: 3, .. }));
        assert!(matches!(errs[3], DetectionError::DuplicateTrackId { track_id: 1 }));
    }

    #[test]
    fn empty_frame_is_fine() {
        let raw = RawFrame { frame_id: 0, detections: vec![] };
        let (dets, errs) = resolve_frame(&raw, &ClassMap::default());
        assert!(dets.is_empty());
        assert!(errs.is_empty());
    }
}
