pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod pricing;

pub use audit::{AuditTrail, DetailRecord, DetailRow};
pub use config::{AppConfig, ConfigError, LoadOptions, LogFormat, PricingConfig, ProjectConfig};
pub use domain::bid::{BidObservation, BidPool, RawBidRow, RawValue, RowId};
pub use domain::item::{PayItem, ProjectContext};
pub use domain::outcome::{Notes, PricingOutcome, PricingSource};
pub use errors::{ApplicationError, DomainError};
pub use pricing::aggregate::AggregationMode;
pub use pricing::estimate::{
    AlternateMatch, AlternateSeek, BatchEstimate, DeterministicEstimateRuntime, EstimateInput,
    EstimateLine, EstimateRuntime, NoAlternateSeek,
};
pub use pricing::remap::{maybe_apply_dm2321_adder, remap_item, RemapMetadata};
pub use pricing::window::Category;
pub use pricing::ReferenceTables;
