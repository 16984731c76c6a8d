pub mod aggregate;
pub mod band;
pub mod cascade;
pub mod category;
pub mod estimate;
pub mod factors;
pub mod remap;
pub mod rollup;
pub mod summary;
pub mod window;

use crate::domain::crosswalk::CrosswalkTable;
use crate::domain::memo::{DesignMemoTable, MemoGuidanceTable};
use crate::domain::summary::UnitPriceSummaryTable;

/// Read-only reference data for one run. Built once by the caller and
/// borrowed by every pricing stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReferenceTables {
    pub memo_mappings: DesignMemoTable,
    pub memo_guidance: MemoGuidanceTable,
    pub summaries: UnitPriceSummaryTable,
    pub crosswalk: CrosswalkTable,
}

impl ReferenceTables {
    /// Tables seeded with the built-in design-memo mappings and overrides.
    pub fn builtin() -> Self {
        Self {
            memo_mappings: DesignMemoTable::builtin(),
            memo_guidance: MemoGuidanceTable::default().with_builtin_overrides(),
            ..Self::default()
        }
    }
}
