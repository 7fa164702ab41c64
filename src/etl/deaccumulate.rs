//! Year-to-date to per-quarter conversion.
//!
//! Filings report cumulative values that reset every January. The isolated
//! value of a quarter is its YTD value minus the previous row of the same
//! (operator, year) partition; the first row of a partition keeps its YTD value.
//! Both the aggregation step and the history query go through [`isolate_sorted`].

use crate::etl::types::{IsolatedExpense, QuarterlyExpense};

/// Orders rows by (identifier, year, quarter). Stable, so duplicate keys keep input order.
pub fn sort_series(rows: &mut [QuarterlyExpense]) {
    rows.sort_by(|a, b| a.key().cmp(&b.key()));
}

/// Isolated values for a series already ordered with [`sort_series`], index-aligned with it.
pub fn isolate_sorted(series: &[QuarterlyExpense]) -> Vec<f64> {
    series
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let previous = i.checked_sub(1).map(|p| &series[p]);
            match previous {
                Some(prev) if prev.identifier == row.identifier && prev.year == row.year => {
                    row.value - prev.value
                }
                _ => row.value,
            }
        })
        .collect()
}

/// Sorts a copy of `series` and returns its isolated values.
pub fn isolate(series: &[QuarterlyExpense]) -> Vec<IsolatedExpense> {
    let mut sorted = series.to_vec();
    sort_series(&mut sorted);
    let isolated = isolate_sorted(&sorted);

    sorted
        .into_iter()
        .zip(isolated)
        .map(|(row, isolated)| IsolatedExpense {
            identifier: row.identifier,
            year: row.year,
            quarter: row.quarter,
            ytd: row.value,
            isolated,
        })
        .collect()
}
