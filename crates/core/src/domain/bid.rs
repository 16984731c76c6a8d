use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::crosswalk::CrosswalkTable;

/// Stable identity of a row within one ingested pool. Used to de-duplicate
/// rows that fall into more than one category window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub usize);

/// Canonical form used for every item-code comparison and table lookup.
pub fn normalize_item_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// One historical bid line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BidObservation {
    pub row_id: RowId,
    pub item_code: String,
    pub unit_price: f64,
    pub quantity: Option<f64>,
    pub weight: Option<f64>,
    pub job_size: Option<f64>,
    pub region: Option<u32>,
    pub letting_date: Option<NaiveDate>,
}

impl BidObservation {
    /// Row id is assigned when the observation enters a [`BidPool`].
    pub fn new(item_code: impl AsRef<str>, unit_price: f64) -> Self {
        Self {
            row_id: RowId(0),
            item_code: normalize_item_code(item_code.as_ref()),
            unit_price,
            quantity: None,
            weight: None,
            job_size: None,
            region: None,
            letting_date: None,
        }
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_job_size(mut self, job_size: f64) -> Self {
        self.job_size = Some(job_size);
        self
    }

    pub fn with_region(mut self, region: u32) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_letting_date(mut self, letting_date: NaiveDate) -> Self {
        self.letting_date = Some(letting_date);
        self
    }
}

/// A cell as it arrives from an external table: number or free text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => value.is_finite().then_some(*value),
            Self::Text(text) => {
                let cleaned: String =
                    text.chars().filter(|ch| *ch != '$' && *ch != ',').collect();
                cleaned.trim().parse::<f64>().ok().filter(|value| value.is_finite())
            }
        }
    }
}

/// Uncoerced bid row. Column names accept both the snake-case and the
/// upper-case BidTabs spellings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBidRow {
    #[serde(alias = "ITEM_CODE")]
    pub item_code: String,
    #[serde(default, alias = "UNIT_PRICE")]
    pub unit_price: Option<RawValue>,
    #[serde(default, alias = "QUANTITY")]
    pub quantity: Option<RawValue>,
    #[serde(default, alias = "WEIGHT")]
    pub weight: Option<RawValue>,
    #[serde(default, alias = "JOB_SIZE")]
    pub job_size: Option<RawValue>,
    #[serde(default, alias = "REGION")]
    pub region: Option<RawValue>,
    #[serde(default, alias = "LETTING_DATE")]
    pub letting_date: Option<String>,
}

impl RawBidRow {
    /// Coerces the row; `None` when the price is unusable.
    fn coerce(&self) -> Option<BidObservation> {
        let unit_price = self.unit_price.as_ref().and_then(RawValue::as_f64)?;
        if unit_price <= 0.0 {
            return None;
        }

        Some(BidObservation {
            row_id: RowId(0),
            item_code: normalize_item_code(&self.item_code),
            unit_price,
            quantity: self.quantity.as_ref().and_then(RawValue::as_f64),
            weight: self.weight.as_ref().and_then(RawValue::as_f64),
            job_size: self.job_size.as_ref().and_then(RawValue::as_f64),
            region: self.region.as_ref().and_then(RawValue::as_f64).and_then(parse_region),
            letting_date: self.letting_date.as_deref().and_then(parse_letting_date),
        })
    }
}

fn parse_region(value: f64) -> Option<u32> {
    if value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
        return None;
    }
    Some(value as u32)
}

/// Accepts ISO dates, US month/day/year (4 or 2 digit year), and RFC 3339
/// timestamps. Anything else is treated as a missing date.
pub fn parse_letting_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    for format in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    DateTime::parse_from_rfc3339(value).ok().map(|timestamp| timestamp.date_naive())
}

/// Bounds applied by [`BidPool::filter_contract_size`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractSizeBounds {
    pub lower: f64,
    pub upper: f64,
    pub rows_before: usize,
    pub rows_after: usize,
}

/// In-memory historical bid pool. Rows are immutable once ingested; every
/// filter downstream works on borrowed views.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BidPool {
    rows: Vec<BidObservation>,
    rejected: usize,
}

impl BidPool {
    pub fn ingest<I>(raw_rows: I) -> Self
    where
        I: IntoIterator<Item = RawBidRow>,
    {
        let mut rows = Vec::new();
        let mut rejected = 0;

        for raw in raw_rows {
            match raw.coerce() {
                Some(mut observation) => {
                    observation.row_id = RowId(rows.len());
                    rows.push(observation);
                }
                None => rejected += 1,
            }
        }

        if rejected > 0 {
            tracing::debug!(
                event_name = "pricing.ingest.rows_rejected",
                rejected,
                accepted = rows.len(),
                "dropped bid rows with unusable unit prices"
            );
        }

        Self { rows, rejected }
    }

    /// Builds a pool from already-typed observations, assigning row ids in
    /// order. Non-finite or non-positive prices are rejected here as well.
    pub fn from_observations(observations: Vec<BidObservation>) -> Self {
        let mut rows = Vec::with_capacity(observations.len());
        let mut rejected = 0;

        for mut observation in observations {
            if !observation.unit_price.is_finite() || observation.unit_price <= 0.0 {
                rejected += 1;
                continue;
            }
            observation.item_code = normalize_item_code(&observation.item_code);
            observation.row_id = RowId(rows.len());
            rows.push(observation);
        }

        Self { rows, rejected }
    }

    pub fn rows(&self) -> &[BidObservation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected
    }

    pub fn for_item(&self, item_code: &str) -> Vec<&BidObservation> {
        let code = normalize_item_code(item_code);
        self.rows.iter().filter(|row| row.item_code == code).collect()
    }

    /// Rows for any of `codes`, grouped in the order the codes are given.
    pub fn for_codes<S: AsRef<str>>(&self, codes: &[S]) -> Vec<&BidObservation> {
        let mut pooled = Vec::new();
        for code in codes {
            pooled.extend(self.for_item(code.as_ref()));
        }
        pooled
    }

    /// Keeps rows whose job size is within `expected_cost * (1 ± pct/100)`.
    /// A no-op when the expected cost is not positive or no row has a job size.
    pub fn filter_contract_size(
        &self,
        expected_cost: f64,
        pct: f64,
    ) -> (BidPool, Option<ContractSizeBounds>) {
        let has_job_size = self.rows.iter().any(|row| row.job_size.is_some());
        if !(expected_cost > 0.0) || !has_job_size {
            return (self.clone(), None);
        }

        let tolerance = pct.clamp(0.0, 500.0) / 100.0;
        let lower = expected_cost * (1.0 - tolerance);
        let upper = expected_cost * (1.0 + tolerance);
        let rows: Vec<BidObservation> = self
            .rows
            .iter()
            .filter(|row| row.job_size.is_some_and(|size| size >= lower && size <= upper))
            .cloned()
            .collect();

        let bounds = ContractSizeBounds {
            lower,
            upper,
            rows_before: self.rows.len(),
            rows_after: rows.len(),
        };
        (BidPool { rows, rejected: self.rejected }, Some(bounds))
    }

    /// Re-keys history recorded under legacy codes onto their successors.
    /// Rows of deleted codes leave the pool; row ids are kept. Returns the
    /// re-keyed pool and the number of rows dropped.
    pub fn remap(&self, crosswalk: &CrosswalkTable) -> (BidPool, usize) {
        let mut deleted = 0;
        let mut rows = Vec::with_capacity(self.rows.len());

        for row in &self.rows {
            let Some(entry) = crosswalk.get(&row.item_code) else {
                rows.push(row.clone());
                continue;
            };
            match entry.new_pay_item.as_ref().filter(|_| !entry.removes_item()) {
                Some(new_code) => {
                    let mut row = row.clone();
                    row.item_code = new_code.clone();
                    rows.push(row);
                }
                None => deleted += 1,
            }
        }

        (BidPool { rows, rejected: self.rejected }, deleted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{parse_letting_date, BidObservation, BidPool, RawBidRow, RawValue, RowId};
    use crate::domain::crosswalk::{CrosswalkTable, RawCrosswalkRow};

    fn raw(code: &str, price: RawValue) -> RawBidRow {
        RawBidRow { item_code: code.to_string(), unit_price: Some(price), ..RawBidRow::default() }
    }

    #[test]
    fn ingest_drops_unusable_prices_and_assigns_row_ids() {
        let pool = BidPool::ingest(vec![
            raw("401-10258", RawValue::Text("$1,250.50".to_string())),
            raw("401-10258", RawValue::Text("n/a".to_string())),
            raw("401-10258", RawValue::Number(-3.0)),
            raw(" 401-10259 ", RawValue::Number(95.0)),
        ]);

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.rejected_count(), 2);
        assert_eq!(pool.rows()[0].unit_price, 1250.5);
        assert_eq!(pool.rows()[1].row_id, RowId(1));
        assert_eq!(pool.rows()[1].item_code, "401-10259");
    }

    #[test]
    fn ingest_coerces_optional_columns_to_none() {
        let mut row = raw("A", RawValue::Number(10.0));
        row.quantity = Some(RawValue::Text("lots".to_string()));
        row.region = Some(RawValue::Text("3".to_string()));
        row.letting_date = Some("not a date".to_string());

        let pool = BidPool::ingest(vec![row]);
        let observation = &pool.rows()[0];

        assert_eq!(observation.quantity, None);
        assert_eq!(observation.region, Some(3));
        assert_eq!(observation.letting_date, None);
    }

    #[test]
    fn raw_rows_accept_bidtabs_column_names() {
        let rows: Vec<RawBidRow> = serde_json::from_str(
            r#"[{"ITEM_CODE": "401-10258", "UNIT_PRICE": "90.00", "QUANTITY": 95, "REGION": 3,
                 "LETTING_DATE": "01/15/2024"}]"#,
        )
        .expect("bidtabs rows parse");
        let pool = BidPool::ingest(rows);

        assert_eq!(pool.rows()[0].quantity, Some(95.0));
        assert_eq!(pool.rows()[0].letting_date, NaiveDate::from_ymd_opt(2024, 1, 15));
    }

    #[test]
    fn letting_dates_parse_common_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 9, 20);
        assert_eq!(parse_letting_date("2023-09-20"), expected);
        assert_eq!(parse_letting_date("09/20/2023"), expected);
        assert_eq!(parse_letting_date("09/20/23"), expected);
        assert_eq!(parse_letting_date("2023-09-20T10:00:00-05:00"), expected);
        assert_eq!(parse_letting_date(""), None);
    }

    #[test]
    fn contract_size_filter_keeps_rows_inside_tolerance() {
        let pool = BidPool::from_observations(vec![
            BidObservation::new("A", 10.0).with_job_size(500_000.0),
            BidObservation::new("A", 11.0).with_job_size(1_000_000.0),
            BidObservation::new("A", 12.0).with_job_size(2_000_000.0),
            BidObservation::new("A", 13.0),
        ]);

        let (filtered, bounds) = pool.filter_contract_size(1_000_000.0, 50.0);
        let bounds = bounds.expect("filter applied");

        assert_eq!(filtered.len(), 2);
        assert_eq!(bounds.rows_before, 4);
        assert_eq!(bounds.lower, 500_000.0);
        assert_eq!(filtered.rows()[1].row_id, RowId(1));
    }

    #[test]
    fn contract_size_filter_skips_without_job_sizes() {
        let pool = BidPool::from_observations(vec![BidObservation::new("A", 10.0)]);
        let (filtered, bounds) = pool.filter_contract_size(1_000_000.0, 50.0);

        assert!(bounds.is_none());
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn remap_moves_legacy_history_and_drops_deleted_codes() {
        let crosswalk = CrosswalkTable::new(vec![
            RawCrosswalkRow {
                old_pay_item: "401-07321".to_string(),
                new_pay_item: Some("401-11526".to_string()),
                status: "ACTIVE".to_string(),
                ..RawCrosswalkRow::default()
            },
            RawCrosswalkRow {
                old_pay_item: "401-07000".to_string(),
                status: "DELETED".to_string(),
                ..RawCrosswalkRow::default()
            },
        ])
        .expect("valid crosswalk");
        let pool = BidPool::from_observations(vec![
            BidObservation::new("401-07000", 50.0),
            BidObservation::new("401-07321", 90.0),
            BidObservation::new("203-20000", 12.0),
        ]);

        let (remapped, deleted) = pool.remap(&crosswalk);

        assert_eq!(deleted, 1);
        assert_eq!(remapped.len(), 2);
        assert_eq!(remapped.rows()[0].item_code, "401-11526");
        assert_eq!(remapped.rows()[0].row_id, RowId(1));
        assert_eq!(remapped.rows()[1].item_code, "203-20000");
        assert!(remapped.for_item("401-07321").is_empty());
    }
}
