//! Design-memo reference tables.
//!
//! Two kinds of memo output feed the fallback cascade: obsolete-code rollup
//! mappings (a replacement pay item priced from the bid history of the codes
//! it retired) and direct price guidance extracted from memo text. Both are
//! built once per run and consulted read-only.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::bid::normalize_item_code;
use crate::errors::DomainError;

/// Confidence ceiling for guidance whose unit disagrees with the catalog.
const UNIT_MISMATCH_CONFIDENCE: f64 = 0.6;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignMemoMapping {
    pub memo_id: String,
    pub effective_date: String,
    pub replacement_code: String,
    pub obsolete_codes: BTreeSet<String>,
}

impl DesignMemoMapping {
    pub fn new<I, S>(
        memo_id: impl Into<String>,
        effective_date: impl Into<String>,
        replacement_code: impl AsRef<str>,
        obsolete_codes: I,
    ) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mapping = Self {
            memo_id: memo_id.into(),
            effective_date: effective_date.into(),
            replacement_code: normalize_item_code(replacement_code.as_ref()),
            obsolete_codes: obsolete_codes
                .into_iter()
                .map(|code| normalize_item_code(code.as_ref()))
                .filter(|code| !code.is_empty())
                .collect(),
        };
        mapping.validate()?;
        Ok(mapping)
    }

    fn validate(&self) -> Result<(), DomainError> {
        if self.obsolete_codes.is_empty() {
            return Err(DomainError::EmptyMemoMapping {
                memo_id: self.memo_id.clone(),
                replacement_code: self.replacement_code.clone(),
            });
        }
        Ok(())
    }

    pub fn obsolete_codes(&self) -> Vec<&str> {
        self.obsolete_codes.iter().map(String::as_str).collect()
    }

    /// `A+B` rendering used in labels and notes.
    pub fn joined_codes(&self) -> String {
        self.obsolete_codes().join("+")
    }
}

/// One row of an external mapping table, one obsolete code per row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignMemoMappingRow {
    pub memo_id: String,
    pub effective_date: String,
    pub replacement_code: String,
    pub obsolete_code: String,
}

/// Replacement code -> mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesignMemoTable {
    mappings: BTreeMap<String, DesignMemoMapping>,
}

impl DesignMemoTable {
    pub fn new(mappings: Vec<DesignMemoMapping>) -> Result<Self, DomainError> {
        let mut table = BTreeMap::new();
        for mapping in mappings {
            mapping.validate()?;
            let key = mapping.replacement_code.clone();
            if table.insert(key.clone(), mapping).is_some() {
                return Err(DomainError::DuplicateReplacementCode(key));
            }
        }
        Ok(Self { mappings: table })
    }

    /// Mappings published with the estimator itself.
    pub fn builtin() -> Self {
        let mut mappings = BTreeMap::new();
        let dm_25_10 = DesignMemoMapping {
            memo_id: "25-10".to_string(),
            effective_date: "2025-04-16".to_string(),
            replacement_code: "401-11526".to_string(),
            obsolete_codes: ["401-10258", "401-10259"].iter().map(|code| code.to_string()).collect(),
        };
        mappings.insert(dm_25_10.replacement_code.clone(), dm_25_10);
        Self { mappings }
    }

    /// Folds long-format rows into the table. Replacement codes already
    /// present are left untouched, so built-in mappings win over external ones.
    pub fn merge_rows(&mut self, rows: Vec<DesignMemoMappingRow>) -> Result<(), DomainError> {
        let mut incoming: BTreeMap<String, DesignMemoMapping> = BTreeMap::new();
        for row in rows {
            let replacement = normalize_item_code(&row.replacement_code);
            let obsolete = normalize_item_code(&row.obsolete_code);
            if replacement.is_empty() || obsolete.is_empty() {
                continue;
            }
            incoming
                .entry(replacement.clone())
                .or_insert_with(|| DesignMemoMapping {
                    memo_id: row.memo_id.trim().to_string(),
                    effective_date: row.effective_date.trim().to_string(),
                    replacement_code: replacement,
                    obsolete_codes: BTreeSet::new(),
                })
                .obsolete_codes
                .insert(obsolete);
        }

        for (code, mapping) in incoming {
            mapping.validate()?;
            self.mappings.entry(code).or_insert(mapping);
        }
        Ok(())
    }

    pub fn get(&self, item_code: &str) -> Option<&DesignMemoMapping> {
        self.mappings.get(&normalize_item_code(item_code))
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

fn default_confidence() -> f64 {
    1.0
}

/// Price recommendation tied to a pay item by a design memo.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoPriceGuidance {
    pub memo_id: String,
    pub price: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub effective_date: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// Guidance lookup keyed by normalized item code. Manual overrides shadow
/// parsed guidance; an optional catalog of expected units lowers confidence
/// for guidance quoted in a different unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoGuidanceTable {
    overrides: BTreeMap<String, MemoPriceGuidance>,
    parsed: BTreeMap<String, MemoPriceGuidance>,
    catalog_units: BTreeMap<String, String>,
}

impl MemoGuidanceTable {
    pub fn new(parsed: BTreeMap<String, MemoPriceGuidance>) -> Self {
        let parsed =
            parsed.into_iter().map(|(code, guidance)| (normalize_item_code(&code), guidance)).collect();
        Self { parsed, ..Self::default() }
    }

    pub fn with_override(mut self, item_code: &str, guidance: MemoPriceGuidance) -> Self {
        self.overrides.insert(normalize_item_code(item_code), guidance);
        self
    }

    pub fn with_catalog_units(mut self, units: BTreeMap<String, String>) -> Self {
        self.catalog_units = units
            .into_iter()
            .map(|(code, unit)| (normalize_item_code(&code), unit.trim().to_ascii_uppercase()))
            .collect();
        self
    }

    /// DM 25-07 topsoil guidance, published ahead of any bid history.
    pub fn with_builtin_overrides(self) -> Self {
        let context_149 = "DM 25-07 Topsoil Management: For estimating purposes, a unit price of \
                           $2.22 per SYS should be used until a bid history is established.";
        let context_150 =
            "DM 25-07 Topsoil Management: Topsoil Amendment Budget is set at $1.00 per DOL.";
        self.with_override(
            "629-000149",
            MemoPriceGuidance {
                memo_id: "dm-2025-07-20topsoil-20management".to_string(),
                price: 2.22,
                unit: Some("SYS".to_string()),
                context: context_149.to_string(),
                effective_date: Some("September 1, 2025".to_string()),
                confidence: 1.0,
            },
        )
        .with_override(
            "629-000150",
            MemoPriceGuidance {
                memo_id: "dm-2025-07-20topsoil-20management".to_string(),
                price: 1.00,
                unit: Some("DOL".to_string()),
                context: context_150.to_string(),
                effective_date: Some("September 1, 2025".to_string()),
                confidence: 1.0,
            },
        )
    }

    pub fn lookup(&self, item_code: &str) -> Option<MemoPriceGuidance> {
        let code = normalize_item_code(item_code);
        if code.is_empty() {
            return None;
        }
        if let Some(guidance) = self.overrides.get(&code) {
            return Some(guidance.clone());
        }

        let mut guidance = self.parsed.get(&code)?.clone();
        let expected_unit = self.catalog_units.get(&code);
        let unit_mismatch = match (expected_unit, guidance.unit.as_deref()) {
            (Some(expected), Some(unit)) => {
                !expected.is_empty() && !expected.eq_ignore_ascii_case(unit.trim())
            }
            _ => false,
        };
        if unit_mismatch {
            guidance.confidence = guidance.confidence.min(UNIT_MISMATCH_CONFIDENCE);
        }
        Some(guidance)
    }
}
