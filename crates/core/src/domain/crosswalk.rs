//! Legacy pay-item crosswalk.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::bid::normalize_item_code;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrosswalkStatus {
    Active,
    Deleted,
}

impl CrosswalkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for CrosswalkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrosswalkStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "" | "ACTIVE" => Ok(Self::Active),
            "DELETED" => Ok(Self::Deleted),
            other => Err(other.to_string()),
        }
    }
}

/// A crosswalk row as loaded from an external table, status still textual.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCrosswalkRow {
    #[serde(alias = "OLD_PAY_ITEM")]
    pub old_pay_item: String,
    #[serde(default, alias = "NEW_PAY_ITEM")]
    pub new_pay_item: Option<String>,
    #[serde(default, alias = "STATUS")]
    pub status: String,
    #[serde(default, alias = "COURSE")]
    pub course: Option<String>,
    #[serde(default, alias = "ESAL_CAT")]
    pub esal_cat: Option<String>,
    #[serde(default, alias = "BINDER_CLASS")]
    pub binder_class: Option<String>,
    #[serde(default, alias = "OLD_DESC")]
    pub old_desc: Option<String>,
    #[serde(default, alias = "NEW_DESC")]
    pub new_desc: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosswalkRow {
    pub old_pay_item: String,
    pub new_pay_item: Option<String>,
    pub status: CrosswalkStatus,
    pub course: Option<String>,
    pub esal_cat: Option<String>,
    pub binder_class: Option<String>,
    pub old_desc: Option<String>,
    pub new_desc: Option<String>,
}

impl CrosswalkRow {
    /// True when the legacy item has no successor and must leave the estimate.
    pub fn removes_item(&self) -> bool {
        self.status == CrosswalkStatus::Deleted || self.new_pay_item.is_none()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|text| text.trim().to_string()).filter(|text| !text.is_empty())
}

impl TryFrom<RawCrosswalkRow> for CrosswalkRow {
    type Error = DomainError;

    fn try_from(raw: RawCrosswalkRow) -> Result<Self, Self::Error> {
        let old_pay_item = normalize_item_code(&raw.old_pay_item);
        let status = raw.status.parse::<CrosswalkStatus>().map_err(|status| {
            DomainError::UnknownCrosswalkStatus { old_pay_item: old_pay_item.clone(), status }
        })?;

        Ok(Self {
            old_pay_item,
            new_pay_item: non_blank(raw.new_pay_item).map(|code| normalize_item_code(&code)),
            status,
            course: non_blank(raw.course),
            esal_cat: non_blank(raw.esal_cat),
            binder_class: non_blank(raw.binder_class),
            old_desc: non_blank(raw.old_desc),
            new_desc: non_blank(raw.new_desc),
        })
    }
}

/// Legacy code -> crosswalk row, with a reverse index on the new code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrosswalkTable {
    by_old: BTreeMap<String, CrosswalkRow>,
    by_new: BTreeMap<String, String>,
}

impl CrosswalkTable {
    pub fn new(rows: Vec<RawCrosswalkRow>) -> Result<Self, DomainError> {
        let mut table = Self::default();
        for raw in rows {
            let row = CrosswalkRow::try_from(raw)?;
            if row.old_pay_item.is_empty() {
                continue;
            }
            if let Some(new_code) = row.new_pay_item.as_ref() {
                table.by_new.entry(new_code.clone()).or_insert_with(|| row.old_pay_item.clone());
            }
            table.by_old.entry(row.old_pay_item.clone()).or_insert(row);
        }
        Ok(table)
    }

    pub fn get(&self, old_code: &str) -> Option<&CrosswalkRow> {
        self.by_old.get(&normalize_item_code(old_code))
    }

    /// First crosswalk row whose successor is `new_code`.
    pub fn find_by_new(&self, new_code: &str) -> Option<&CrosswalkRow> {
        let old_code = self.by_new.get(&normalize_item_code(new_code))?;
        self.by_old.get(old_code)
    }

    pub fn len(&self) -> usize {
        self.by_old.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_old.is_empty()
    }
}
