//! Per-operator expense history computed on read.

use serde::Serialize;

use crate::etl::deaccumulate::isolate;
use crate::etl::types::{IsolatedExpense, QuarterlyExpense};

pub const MAX_PAGE_LIMIT: usize = 100;

/// One page of an operator's quarterly series, newest quarter first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub identifier: String,
    pub legal_name: String,
    pub data: Vec<IsolatedExpense>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

/// Deaccumulates `identifier`'s rows and returns the requested page.
///
/// `page` is 1-based and clamped to at least 1; `limit` is clamped to
/// `1..=MAX_PAGE_LIMIT`. Returns `None` when the operator has no rows.
pub fn operator_history(
    rows: &[QuarterlyExpense],
    identifier: &str,
    page: usize,
    limit: usize,
) -> Option<HistoryPage> {
    let own: Vec<QuarterlyExpense> = rows
        .iter()
        .filter(|r| r.identifier == identifier)
        .cloned()
        .collect();
    let legal_name = own.first()?.legal_name.clone();

    let page = page.max(1);
    let limit = limit.clamp(1, MAX_PAGE_LIMIT);

    let mut series = isolate(&own);
    series.reverse();

    let total = series.len();
    let data = series
        .into_iter()
        .skip(page.saturating_sub(1).saturating_mul(limit))
        .take(limit)
        .collect();

    Some(HistoryPage {
        identifier: identifier.to_string(),
        legal_name,
        data,
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    })
}
