//! DM 23-21 legacy HMA pay-item remapping and transitional adders.

use serde::{Deserialize, Serialize};

use crate::domain::bid::normalize_item_code;
use crate::domain::crosswalk::CrosswalkTable;

pub const DM_23_21_RULE: &str = "DM 23-21";

/// Per-ton adders by course, applied while the new codes lack history.
const COURSE_ADDERS: [(&str, f64); 3] = [("Base", 2.00), ("Intermediate", 2.50), ("Surface", 3.00)];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapMetadata {
    pub mapping_rule: Option<String>,
    pub deleted: bool,
    pub source_item: Option<String>,
    pub mapped_item: Option<String>,
    pub old_desc: Option<String>,
    pub new_desc: Option<String>,
    pub course: Option<String>,
    pub esal_cat: Option<String>,
    pub binder_class: Option<String>,
}

impl RemapMetadata {
    pub fn is_remapped(&self) -> bool {
        self.mapping_rule.is_some() && !self.deleted
    }
}

/// Maps a legacy code through the crosswalk.
///
/// Codes without a crosswalk row pass through unchanged. A deleted row, or
/// one without a successor, yields `None` and the caller drops the item.
pub fn remap_item(old_code: &str, crosswalk: &CrosswalkTable) -> (Option<String>, RemapMetadata) {
    let code = normalize_item_code(old_code);
    let Some(row) = crosswalk.get(&code) else {
        return (Some(code), RemapMetadata::default());
    };

    if row.removes_item() {
        return (
            None,
            RemapMetadata {
                mapping_rule: Some(DM_23_21_RULE.to_string()),
                deleted: true,
                source_item: Some(code),
                ..RemapMetadata::default()
            },
        );
    }

    let metadata = RemapMetadata {
        mapping_rule: Some(DM_23_21_RULE.to_string()),
        deleted: false,
        source_item: Some(code),
        mapped_item: row.new_pay_item.clone(),
        old_desc: row.old_desc.clone(),
        new_desc: row.new_desc.clone(),
        course: row.course.clone(),
        esal_cat: row.esal_cat.clone(),
        binder_class: row.binder_class.clone(),
    };
    (row.new_pay_item.clone(), metadata)
}

/// Adds the course adder when enabled and the remapped item's own history
/// is not yet sufficient. Returns the price and whether an adder applied.
pub fn maybe_apply_dm2321_adder(
    course: Option<&str>,
    price: f64,
    enabled: bool,
    sufficient_history: bool,
) -> (f64, bool) {
    if !enabled || sufficient_history {
        return (price, false);
    }
    let Some(course) = course.map(str::trim) else {
        return (price, false);
    };
    match COURSE_ADDERS.iter().find(|(name, _)| name.eq_ignore_ascii_case(course)) {
        Some((_, adder)) => (price + adder, true),
        None => (price, false),
    }
}
