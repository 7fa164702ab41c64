//! Expense reconciliation and aggregation pipeline.
//!
//! Quarterly filings are filtered down to claims expense, joined against the
//! operator registry, consolidated into a YTD table, deaccumulated and rolled
//! up into per-operator statistics.

pub mod aggregate;
pub mod consolidate;
pub mod deaccumulate;
pub mod filter;
pub mod history;
pub mod registry;
pub mod types;
pub mod utility;
