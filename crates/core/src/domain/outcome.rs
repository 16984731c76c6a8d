use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::pricing::window::Category;

/// Where a price came from. Rendered as the upper-case tag used in estimate
/// and audit output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PricingSource {
    Category(Category),
    GeometryAlternate,
    DesignMemoPrice,
    DesignMemoRollup,
    UnitPriceSummary,
    NoData,
}

impl PricingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category(category) => category.as_str(),
            Self::GeometryAlternate => "GEOMETRY_ALTERNATE",
            Self::DesignMemoPrice => "DESIGN_MEMO_PRICE",
            Self::DesignMemoRollup => "DESIGN_MEMO_ROLLUP",
            Self::UnitPriceSummary => "UNIT_PRICE_SUMMARY",
            Self::NoData => "NO_DATA",
        }
    }
}

impl fmt::Display for PricingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PricingSource {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let tag = value.trim().to_ascii_uppercase();
        if let Some(category) = Category::ALL.iter().find(|category| category.as_str() == tag) {
            return Ok(Self::Category(*category));
        }
        match tag.as_str() {
            "GEOMETRY_ALTERNATE" => Ok(Self::GeometryAlternate),
            "DESIGN_MEMO_PRICE" => Ok(Self::DesignMemoPrice),
            "DESIGN_MEMO_ROLLUP" => Ok(Self::DesignMemoRollup),
            "UNIT_PRICE_SUMMARY" => Ok(Self::UnitPriceSummary),
            "NO_DATA" => Ok(Self::NoData),
            other => Err(DomainError::InvariantViolation(format!("unknown pricing source `{other}`"))),
        }
    }
}

impl From<PricingSource> for String {
    fn from(value: PricingSource) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for PricingSource {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Ordered diagnostic trail, rendered pipe-joined.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Notes(Vec<String>);

impl Notes {
    pub fn push(&mut self, part: impl Into<String>) {
        let part = part.into();
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            self.0.push(trimmed.to_string());
        }
    }

    pub fn with(mut self, part: impl Into<String>) -> Self {
        self.push(part);
        self
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.iter().any(|part| part.contains(needle))
    }

    pub fn render(&self) -> String {
        self.0.join(" | ")
    }
}

impl fmt::Display for Notes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Result of one pricing attempt for one pay item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingOutcome {
    /// NaN when nothing priced the item.
    pub price: f64,
    pub source: PricingSource,
    pub data_points_used: usize,
    pub std_dev: f64,
    pub coef_var: f64,
    pub notes: Notes,
}

impl PricingOutcome {
    pub fn no_data(notes: Notes) -> Self {
        Self {
            price: f64::NAN,
            source: PricingSource::NoData,
            data_points_used: 0,
            std_dev: f64::NAN,
            coef_var: f64::NAN,
            notes,
        }
    }

    pub fn has_price(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::{Notes, PricingOutcome, PricingSource};
    use crate::pricing::window::Category;

    #[test]
    fn source_tags_round_trip_through_strings() {
        let source: PricingSource = "state_24m".parse().expect("category tag parses");
        assert_eq!(source, PricingSource::Category(Category::State24M));
        assert_eq!(PricingSource::UnitPriceSummary.to_string(), "UNIT_PRICE_SUMMARY");
        assert!("SOMETHING_ELSE".parse::<PricingSource>().is_err());
    }

    #[test]
    fn source_serializes_as_plain_tag() {
        let json = serde_json::to_string(&PricingSource::DesignMemoRollup).expect("serialize");
        assert_eq!(json, "\"DESIGN_MEMO_ROLLUP\"");
    }

    #[test]
    fn notes_skip_blank_parts_and_join_with_pipes() {
        let notes = Notes::default().with("first").with("   ").with("second");
        assert_eq!(notes.render(), "first | second");
        assert!(notes.contains("sec"));
    }

    #[test]
    fn no_data_outcome_has_no_price() {
        let outcome = PricingOutcome::no_data(Notes::default());
        assert!(!outcome.has_price());
        assert_eq!(outcome.source, PricingSource::NoData);
    }
}
