pub mod bid;
pub mod crosswalk;
pub mod item;
pub mod memo;
pub mod outcome;
pub mod summary;
