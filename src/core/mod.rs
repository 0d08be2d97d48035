pub mod reporting;
pub mod schedule;
pub mod units;
