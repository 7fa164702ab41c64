//! Selection of claims/event expense rows and quarter bucketing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Datelike;
use tracing::info;

use crate::columns::{CD_CONTA_CONTABIL, DATA, DESCRICAO, REG_ANS, VL_SALDO_FINAL};
use crate::error::{EtlError, Result};
use crate::etl::types::ExpenseBucket;
use crate::etl::utility::{parse_date, parse_decimal, quarter_of, round2};
use crate::table::Table;

/// Chart-of-accounts description of the claims expense line.
pub const EVENT_DESCRIPTION: &str = "DESPESAS COM EVENTOS / SINISTROS";

const EXPENSE_CLASS_PREFIX: char = '4';
const EVENT_ACCOUNT_LEN: usize = 9;

/// Which accounting rows count as claims expense.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterPolicy {
    /// Account starts with `4`, has 9 characters and the description is exactly
    /// [`EVENT_DESCRIPTION`] after trimming and uppercasing.
    #[default]
    Strict,
    /// Account starts with `4` and the description mentions `EVENTO` or `SINISTRO`.
    Loose,
}

impl FilterPolicy {
    pub fn matches(&self, account_code: &str, description: &str) -> bool {
        if !account_code.starts_with(EXPENSE_CLASS_PREFIX) {
            return false;
        }
        let description = description.trim().to_uppercase();
        match self {
            FilterPolicy::Strict => {
                description == EVENT_DESCRIPTION
                    && account_code.chars().count() == EVENT_ACCOUNT_LEN
            }
            FilterPolicy::Loose => {
                description.contains("EVENTO") || description.contains("SINISTRO")
            }
        }
    }
}

impl fmt::Display for FilterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterPolicy::Strict => write!(f, "strict"),
            FilterPolicy::Loose => write!(f, "loose"),
        }
    }
}

impl FromStr for FilterPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(FilterPolicy::Strict),
            "loose" => Ok(FilterPolicy::Loose),
            other => Err(format!("unknown filter policy '{other}' (expected strict or loose)")),
        }
    }
}

/// Filters a normalized filing table down to quarterly claims expense buckets.
#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    policy: FilterPolicy,
}

impl ExpenseFilter {
    pub fn new(policy: FilterPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FilterPolicy {
        self.policy
    }

    /// Sums matching rows per (registry id, year, quarter), rounded to cents.
    ///
    /// Unparseable balances count as zero; rows with unparseable dates are
    /// dropped. Output is ordered by key.
    pub fn filter(&self, table: &Table) -> Result<Vec<ExpenseBucket>> {
        let missing: Vec<String> = [REG_ANS, CD_CONTA_CONTABIL, DESCRICAO, VL_SALDO_FINAL, DATA]
            .iter()
            .filter(|c| !table.has_column(c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(EtlError::MissingColumns {
                file: "<table>".to_string(),
                missing,
            });
        }

        let idx = |name: &str| table.column_index(name).unwrap_or_default();
        let (reg_col, account_col, desc_col, balance_col, date_col) = (
            idx(REG_ANS),
            idx(CD_CONTA_CONTABIL),
            idx(DESCRICAO),
            idx(VL_SALDO_FINAL),
            idx(DATA),
        );

        let mut buckets: BTreeMap<(String, i32, u32), f64> = BTreeMap::new();
        let mut matched = 0usize;
        let mut bad_dates = 0usize;

        for row in &table.rows {
            let account_code = Table::cell(row, account_col).trim();
            if !self.policy.matches(account_code, Table::cell(row, desc_col)) {
                continue;
            }

            let Some(date) = parse_date(Table::cell(row, date_col)) else {
                bad_dates += 1;
                continue;
            };

            matched += 1;
            let key = (
                Table::cell(row, reg_col).trim().to_string(),
                date.year(),
                quarter_of(date),
            );
            *buckets.entry(key).or_insert(0.0) += parse_decimal(Table::cell(row, balance_col));
        }

        info!(
            policy = %self.policy,
            rows = table.len(),
            matched,
            bad_dates,
            buckets = buckets.len(),
            "Expense rows filtered"
        );

        Ok(buckets
            .into_iter()
            .map(|((registry_id, year, quarter), value)| ExpenseBucket {
                registry_id,
                year,
                quarter,
                value: round2(value),
            })
            .collect())
    }
}
