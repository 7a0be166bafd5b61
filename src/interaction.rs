//! Hand/tool and hand/ingredient contact within open zone entries.

use std::collections::BTreeMap;

use crate::detection::{Detection, Label};
use crate::zones::EntryTable;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contact {
    Tool { virtual_id: u64, tool_id: i64 },
    Ingredient { virtual_id: u64, ingredient_id: i64 },
}

/// Set the sticky `used_tool` / `touched_ingredient` flags on every open
/// entry whose hand overlaps a tool or ingredient this frame. When several
/// tools overlap, the one with the highest transient id is recorded.
pub fn evaluate(
    detections: &[Detection],
    virtual_ids: &BTreeMap<i64, u64>,
    entries: &mut EntryTable,
) -> Vec<Contact> {
    let mut contacts = Vec::new();

    let mut hands: Vec<(u64, &Detection)> = detections
        .iter()
        .filter(|d| d.label == Label::Hand)
        .filter_map(|d| {
            let vid = *virtual_ids.get(&d.transient_id)?;
            entries.contains_key(&vid).then_some((vid, d))
        })
        .collect();
    if hands.is_empty() {
        return contacts;
    }
    hands.sort_by_key(|(vid, _)| *vid);

    let mut objects: Vec<&Detection> = detections
        .iter()
        .filter(|d| matches!(d.label, Label::Tool | Label::Ingredient))
        .collect();
    objects.sort_by_key(|d| d.transient_id);

    for obj in objects {
        for (vid, hand) in &hands {
            if !obj.bbox.intersects(&hand.bbox) {
                continue;
            }
            let Some(entry) = entries.get_mut(vid) else {
                continue;
            };
            match obj.label {
                Label::Tool => {
                    entry.used_tool = true;
                    entry.tool_id = Some(obj.transient_id);
                    contacts.push(Contact::Tool {
                        virtual_id: *vid,
                        tool_id: obj.transient_id,
                    });
                }
                Label::Ingredient => {
                    entry.touched_ingredient = true;
                    contacts.push(Contact::Ingredient {
                        virtual_id: *vid,
                        ingredient_id: obj.transient_id,
                    });
                }
                _ => {}
            }
        }
    }
    contacts
}
