//! Scope x recency windows over a bid pool.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::bid::{BidObservation, RowId};
use crate::domain::item::ProjectContext;
use crate::pricing::aggregate::population_std;

/// Windows with fewer priced rows are never trimmed.
pub const CATEGORY_TRIM_MIN_ROWS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    District,
    State,
}

/// One of the six scope x recency partitions, in walk order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "DIST_12M")]
    Dist12M,
    #[serde(rename = "DIST_24M")]
    Dist24M,
    #[serde(rename = "DIST_36M")]
    Dist36M,
    #[serde(rename = "STATE_12M")]
    State12M,
    #[serde(rename = "STATE_24M")]
    State24M,
    #[serde(rename = "STATE_36M")]
    State36M,
}

impl Category {
    /// Most local and most recent first.
    pub const ALL: [Category; 6] = [
        Category::Dist12M,
        Category::Dist24M,
        Category::Dist36M,
        Category::State12M,
        Category::State24M,
        Category::State36M,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dist12M => "DIST_12M",
            Self::Dist24M => "DIST_24M",
            Self::Dist36M => "DIST_36M",
            Self::State12M => "STATE_12M",
            Self::State24M => "STATE_24M",
            Self::State36M => "STATE_36M",
        }
    }

    pub fn window(&self) -> CategoryWindow {
        let (scope, min_months, max_months) = match self {
            Self::Dist12M => (Scope::District, 0, 12),
            Self::Dist24M => (Scope::District, 12, 24),
            Self::Dist36M => (Scope::District, 24, 36),
            Self::State12M => (Scope::State, 0, 12),
            Self::State24M => (Scope::State, 12, 24),
            Self::State36M => (Scope::State, 24, 36),
        };
        CategoryWindow { scope, min_months, max_months }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived per query; never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryWindow {
    pub scope: Scope,
    pub min_months: u32,
    pub max_months: u32,
}

impl CategoryWindow {
    /// Letting-date membership relative to `as_of`. The most recent window
    /// (`min_months == 0`) includes its upper edge and rows with no usable
    /// date; older windows exclude their upper edge.
    pub fn contains_date(&self, letting_date: Option<NaiveDate>, as_of: NaiveDate) -> bool {
        let Some(date) = letting_date else {
            return self.min_months == 0;
        };

        let lower_ok = match as_of.checked_sub_months(Months::new(self.max_months)) {
            Some(lower) => date >= lower,
            None => true,
        };
        if !lower_ok {
            return false;
        }

        if self.min_months == 0 {
            return date <= as_of;
        }
        match as_of.checked_sub_months(Months::new(self.min_months)) {
            Some(upper) => date < upper,
            None => false,
        }
    }

    pub fn contains_scope(&self, row: &BidObservation, project_region: Option<u32>) -> bool {
        match self.scope {
            Scope::State => true,
            Scope::District => match (project_region, row.region) {
                (Some(project), Some(region)) => project == region,
                _ => false,
            },
        }
    }
}

/// Rows of `rows` that fall in `category` for this project, sigma-trimmed.
pub fn category_rows<'a>(
    rows: &[&'a BidObservation],
    category: Category,
    context: &ProjectContext,
    sigma_threshold: f64,
) -> Vec<&'a BidObservation> {
    let window = category.window();
    let in_window: Vec<&BidObservation> = rows
        .iter()
        .copied()
        .filter(|row| window.contains_scope(row, context.project_region))
        .filter(|row| window.contains_date(row.letting_date, context.as_of))
        .collect();

    sigma_trim(in_window, sigma_threshold, CATEGORY_TRIM_MIN_ROWS)
}

/// Drops rows priced outside `mean ± threshold·σ` (population σ), repeating
/// until no row is dropped. Stops as soon as fewer than `min_rows` remain or
/// the prices have no spread. A threshold that is not positive disables it.
pub fn sigma_trim<'a>(
    mut rows: Vec<&'a BidObservation>,
    threshold: f64,
    min_rows: usize,
) -> Vec<&'a BidObservation> {
    if !(threshold > 0.0) {
        return rows;
    }

    loop {
        if rows.len() < min_rows {
            return rows;
        }
        let prices: Vec<f64> = rows.iter().map(|row| row.unit_price).collect();
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        let std = population_std(&prices);
        if !(std > 0.0) {
            return rows;
        }

        let lower = mean - threshold * std;
        let upper = mean + threshold * std;
        let before = rows.len();
        rows.retain(|row| row.unit_price >= lower && row.unit_price <= upper);
        if rows.len() == before {
            return rows;
        }
    }
}

/// Row ids already admitted to a combined pool.
#[derive(Clone, Debug, Default)]
pub struct SeenRows(BTreeSet<RowId>);

impl SeenRows {
    /// Returns the rows not seen before and marks them seen.
    pub fn admit<'a>(&mut self, rows: &[&'a BidObservation]) -> Vec<&'a BidObservation> {
        rows.iter().copied().filter(|row| self.0.insert(row.row_id)).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{category_rows, sigma_trim, Category, SeenRows};
    use crate::domain::bid::{BidObservation, BidPool};
    use crate::domain::item::ProjectContext;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn recent_window_includes_undated_rows_and_today() {
        let window = Category::State12M.window();
        assert!(window.contains_date(None, as_of()));
        assert!(window.contains_date(Some(as_of()), as_of()));
        assert!(window.contains_date(Some(date(2024, 6, 30)), as_of()));
        assert!(!window.contains_date(Some(date(2024, 6, 29)), as_of()));
        assert!(!window.contains_date(Some(date(2025, 7, 1)), as_of()));
    }

    #[test]
    fn older_windows_exclude_their_upper_edge_and_undated_rows() {
        let window = Category::State24M.window();
        assert!(!window.contains_date(None, as_of()));
        assert!(!window.contains_date(Some(date(2024, 6, 30)), as_of()));
        assert!(window.contains_date(Some(date(2024, 6, 29)), as_of()));
        assert!(window.contains_date(Some(date(2023, 6, 30)), as_of()));
    }

    #[test]
    fn district_scope_requires_matching_project_region() {
        let pool = BidPool::from_observations(vec![
            BidObservation::new("A", 10.0).with_region(3),
            BidObservation::new("A", 11.0).with_region(4),
            BidObservation::new("A", 12.0),
        ]);
        let rows = pool.for_item("A");

        let with_region = ProjectContext::new(Some(3), as_of());
        let district = category_rows(&rows, Category::Dist12M, &with_region, 0.0);
        assert_eq!(district.len(), 1);
        assert_eq!(district[0].unit_price, 10.0);

        let without_region = ProjectContext::new(None, as_of());
        assert!(category_rows(&rows, Category::Dist12M, &without_region, 0.0).is_empty());
        assert_eq!(category_rows(&rows, Category::State12M, &without_region, 0.0).len(), 3);
    }

    #[test]
    fn sigma_trim_drops_outliers_and_reaches_a_fixed_point() {
        let mut observations: Vec<BidObservation> =
            (0..10).map(|i| BidObservation::new("A", 100.0 + f64::from(i))).collect();
        observations.push(BidObservation::new("A", 1_000.0));
        let pool = BidPool::from_observations(observations);

        let trimmed = sigma_trim(pool.for_item("A"), 2.0, 3);
        assert_eq!(trimmed.len(), 10);
        assert!(trimmed.iter().all(|row| row.unit_price < 1_000.0));

        let again = sigma_trim(trimmed.clone(), 2.0, 3);
        assert_eq!(again.len(), trimmed.len());
    }

    #[test]
    fn sigma_trim_leaves_small_or_flat_windows_alone() {
        let pool = BidPool::from_observations(vec![
            BidObservation::new("A", 90.0),
            BidObservation::new("A", 95.0),
            BidObservation::new("A", 110.0),
        ]);
        assert_eq!(sigma_trim(pool.for_item("A"), 2.0, 3).len(), 3);
        assert_eq!(sigma_trim(pool.for_item("A"), 0.5, 4).len(), 3);
        assert_eq!(sigma_trim(pool.for_item("A"), 0.0, 3).len(), 3);
    }

    #[test]
    fn seen_rows_admit_each_row_once() {
        let pool = BidPool::from_observations(vec![
            BidObservation::new("A", 1.0),
            BidObservation::new("A", 2.0),
        ]);
        let rows = pool.for_item("A");
        let mut seen = SeenRows::default();

        assert_eq!(seen.admit(&rows[..1]).len(), 1);
        assert_eq!(seen.admit(&rows).len(), 1);
        assert_eq!(seen.len(), 2);
    }
}
