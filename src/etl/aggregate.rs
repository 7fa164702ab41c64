use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::etl::deaccumulate::{isolate_sorted, sort_series};
use crate::etl::types::{AggregatedStat, QuarterlyExpense};
use crate::etl::utility::{mean, round2, sample_stddev};
use crate::identifier::normalize_identifier;

type GroupKey = (
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
);

/// Consolidated rows accepted for aggregation and the reasons others were not.
#[derive(Debug, Clone, Default)]
pub struct CleanOutcome {
    pub rows: Vec<QuarterlyExpense>,
    pub invalid_identifier: usize,
    pub non_positive: usize,
    pub unnamed: usize,
}

/// Drops rows whose CNPJ fails check-digit validation, whose value is not
/// strictly positive, or whose legal name is blank. Accepted identifiers are
/// rewritten in normalized 14-digit form.
pub fn clean_consolidated(rows: Vec<QuarterlyExpense>) -> CleanOutcome {
    let mut outcome = CleanOutcome::default();

    for mut row in rows {
        let Some(identifier) = normalize_identifier(&row.identifier) else {
            outcome.invalid_identifier += 1;
            continue;
        };
        if !(row.value > 0.0) {
            outcome.non_positive += 1;
            continue;
        }
        if row.legal_name.trim().is_empty() {
            outcome.unnamed += 1;
            continue;
        }
        row.identifier = identifier;
        outcome.rows.push(row);
    }

    info!(
        kept = outcome.rows.len(),
        invalid_identifier = outcome.invalid_identifier,
        non_positive = outcome.non_positive,
        unnamed = outcome.unnamed,
        "Consolidated rows cleaned"
    );

    outcome
}

/// Aggregates a consolidated YTD series into one [`AggregatedStat`] per operator.
///
/// Values are deaccumulated per (identifier, year) first, then grouped by
/// (identifier, registry number, legal name, category, state). `total`, `mean`
/// and `std_dev` are rounded to cents; `std_dev` is the sample deviation and is
/// 0 for single-quarter operators. `quarter_count` counts YTD observations.
/// Output is ordered by `total` descending, ties by identifier.
pub fn aggregate(consolidated: &[QuarterlyExpense]) -> Vec<AggregatedStat> {
    let mut sorted = consolidated.to_vec();
    sort_series(&mut sorted);
    let isolated = isolate_sorted(&sorted);

    let mut groups: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();
    for (row, value) in sorted.into_iter().zip(isolated) {
        let key = (
            row.identifier,
            row.registry_number,
            row.legal_name,
            row.category,
            row.state,
        );
        groups.entry(key).or_default().push(value);
    }

    let mut stats: Vec<AggregatedStat> = groups
        .into_iter()
        .map(|((identifier, registry_number, legal_name, category, state), values)| {
            let avg = mean(&values);
            let sd = sample_stddev(&values, avg);
            debug!(identifier = %identifier, quarters = values.len(), "Operator aggregated");

            AggregatedStat {
                identifier,
                legal_name,
                registry_number,
                category,
                state,
                total: round2(values.iter().sum()),
                mean: round2(avg),
                std_dev: round2(sd),
                quarter_count: values.len(),
            }
        })
        .collect();

    stats.sort_by(|a, b| {
        b.total
            .total_cmp(&a.total)
            .then_with(|| a.identifier.cmp(&b.identifier))
    });

    info!(operators = stats.len(), "Aggregation complete");
    stats
}
