//! Operator registry: loading, deduplication and joins against expenses.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{info, warn};

use crate::columns::{CNPJ, ColumnNormalizer, DATA_REGISTRO, MODALIDADE, RAZAO_SOCIAL, REG_ANS, UF};
use crate::error::{EtlError, Result};
use crate::etl::types::{ExpenseBucket, Operator, QuarterlyExpense};
use crate::etl::utility::parse_date;
use crate::identifier::pad_identifier;
use crate::reader::TabularReader;
use crate::table::Table;

const REQUIRED_REGISTRY_COLUMNS: &[&str] = &[REG_ANS, CNPJ, RAZAO_SOCIAL];

/// Reads the registry file, normalizes its columns and builds a deduplicated [`Registry`].
#[tracing::instrument(skip(reader, normalizer), fields(registry = %path.display()))]
pub fn load_registry(
    reader: &TabularReader,
    normalizer: &ColumnNormalizer,
    path: &Path,
) -> Result<Registry> {
    let table = normalizer.normalize_columns(reader.read(path)?);
    let missing = normalizer.validate_required(&table, REQUIRED_REGISTRY_COLUMNS);
    if !missing.is_empty() {
        return Err(EtlError::MissingColumns {
            file: path.display().to_string(),
            missing,
        });
    }

    let operators = operators_from_table(&table);
    let registry = Registry::from_operators(operators);
    if registry.is_empty() {
        warn!("Registry has no operators; every expense row will be dropped");
    }
    info!(operators = registry.len(), "Registry loaded");
    Ok(registry)
}

/// Maps registry rows onto [`Operator`]s. Identifiers are padded to 14 digits;
/// rows whose identifier has no digits get an empty identifier.
pub fn operators_from_table(table: &Table) -> Vec<Operator> {
    let col = |name: &str| table.column_index(name);
    let (reg, cnpj, name, category, state, registered) = (
        col(REG_ANS),
        col(CNPJ),
        col(RAZAO_SOCIAL),
        col(MODALIDADE),
        col(UF),
        col(DATA_REGISTRO),
    );

    let text = |row: &[String], idx: Option<usize>| -> Option<String> {
        idx.map(|i| Table::cell(row, i).trim().to_string())
            .filter(|v| !v.is_empty())
    };

    table
        .rows
        .iter()
        .map(|row| {
            let raw_id = text(row, cnpj).unwrap_or_default();
            let identifier = if raw_id.chars().any(|c| c.is_ascii_digit()) {
                pad_identifier(&raw_id)
            } else {
                String::new()
            };

            Operator {
                identifier,
                legal_name: text(row, name).unwrap_or_default(),
                registry_number: text(row, reg),
                category: text(row, category),
                state: text(row, state),
                registered_at: text(row, registered).and_then(|d| parse_date(&d)),
            }
        })
        .collect()
}

/// Most recent registration first, then keep one row per registry number and
/// one row per identifier.
///
/// Rows without a registration date sort after dated rows; ties keep input order.
/// A missing registry number or an empty identifier is not a key, so such rows
/// never collapse into each other on that field.
pub fn dedupe_registry(mut operators: Vec<Operator>) -> Vec<Operator> {
    operators.sort_by(|a, b| match (a.registered_at, b.registered_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let before = operators.len();
    let mut seen_registry: HashSet<String> = HashSet::new();
    operators.retain(|op| {
        op.registry_number
            .as_ref()
            .is_none_or(|reg| seen_registry.insert(reg.clone()))
    });

    let mut seen_identifier: HashSet<String> = HashSet::new();
    operators.retain(|op| {
        op.identifier.is_empty() || seen_identifier.insert(op.identifier.clone())
    });

    let removed = before - operators.len();
    if removed > 0 {
        info!(removed, "Duplicate registry rows removed");
    }

    operators
}

/// Read-only operator lookup shared by every file of a batch.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    operators: Vec<Operator>,
    by_registry_number: HashMap<String, usize>,
    by_identifier: HashMap<String, usize>,
}

impl Registry {
    /// Deduplicates `operators` with [`dedupe_registry`] and indexes them.
    pub fn from_operators(operators: Vec<Operator>) -> Self {
        let operators = dedupe_registry(operators);
        let mut by_registry_number = HashMap::new();
        let mut by_identifier = HashMap::new();

        for (i, op) in operators.iter().enumerate() {
            if let Some(reg) = &op.registry_number {
                by_registry_number.insert(reg.clone(), i);
            }
            if !op.identifier.is_empty() {
                by_identifier.insert(op.identifier.clone(), i);
            }
        }

        Self {
            operators,
            by_registry_number,
            by_identifier,
        }
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn by_registry_number(&self, registry_number: &str) -> Option<&Operator> {
        self.by_registry_number
            .get(registry_number.trim())
            .map(|&i| &self.operators[i])
    }

    pub fn by_identifier(&self, identifier: &str) -> Option<&Operator> {
        self.by_identifier
            .get(identifier)
            .map(|&i| &self.operators[i])
    }
}

/// Rows that survived a join plus the number dropped for lack of a registry match.
#[derive(Debug, Clone, Default)]
pub struct JoinOutcome {
    pub rows: Vec<QuarterlyExpense>,
    pub dropped: usize,
}

/// Enriches expense rows with registry attributes.
pub struct RegistryJoiner<'a> {
    registry: &'a Registry,
}

impl<'a> RegistryJoiner<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Joins filtered buckets on registry number. Buckets without an operator,
    /// or whose operator has no identifier, are dropped and counted.
    pub fn join(&self, buckets: Vec<ExpenseBucket>) -> JoinOutcome {
        let mut outcome = JoinOutcome::default();

        for bucket in buckets {
            match self.registry.by_registry_number(&bucket.registry_id) {
                Some(op) if !op.identifier.is_empty() => outcome.rows.push(QuarterlyExpense {
                    identifier: op.identifier.clone(),
                    legal_name: op.legal_name.clone(),
                    quarter: bucket.quarter,
                    year: bucket.year,
                    value: bucket.value,
                    registry_number: op.registry_number.clone(),
                    category: op.category.clone(),
                    state: op.state.clone(),
                }),
                _ => outcome.dropped += 1,
            }
        }

        if outcome.dropped > 0 {
            warn!(
                dropped = outcome.dropped,
                "Rows removed (registry id without active registration)"
            );
        }

        outcome
    }

    /// Inner join on identifier for consolidated rows read back from disk.
    /// The consolidated legal name is kept; registry number, category and
    /// state come from the registry.
    pub fn join_by_identifier(&self, rows: Vec<QuarterlyExpense>) -> JoinOutcome {
        let mut outcome = JoinOutcome::default();

        for mut row in rows {
            match self.registry.by_identifier(&row.identifier) {
                Some(op) => {
                    row.registry_number = op.registry_number.clone();
                    row.category = op.category.clone();
                    row.state = op.state.clone();
                    outcome.rows.push(row);
                }
                None => outcome.dropped += 1,
            }
        }

        if outcome.dropped > 0 {
            warn!(
                dropped = outcome.dropped,
                "Consolidated rows without a registry match removed"
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn operator(id: &str, reg: &str, name: &str, date: Option<(i32, u32, u32)>) -> Operator {
        Operator {
            identifier: id.to_string(),
            legal_name: name.to_string(),
            registry_number: Some(reg.to_string()),
            category: Some("Cooperativa Médica".to_string()),
            state: Some("SP".to_string()),
            registered_at: date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        }
    }

    fn bucket(reg: &str, quarter: u32, value: f64) -> ExpenseBucket {
        ExpenseBucket {
            registry_id: reg.to_string(),
            year: 2023,
            quarter,
            value,
        }
    }

    #[test]
    fn test_dedupe_most_recent_registration_wins() {
        let deduped = dedupe_registry(vec![
            operator("11222333000181", "100", "Old Name", Some((2001, 1, 1))),
            operator("11222333000181", "100", "New Name", Some((2020, 5, 1))),
            operator("11444777000161", "200", "Undated", None),
        ]);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].legal_name, "New Name");
        assert_eq!(deduped[1].legal_name, "Undated");
    }

    #[test]
    fn test_dedupe_by_identifier_after_registry_number() {
        let deduped = dedupe_registry(vec![
            operator("11222333000181", "100", "First", Some((2022, 1, 1))),
            operator("11222333000181", "101", "Second", Some((2021, 1, 1))),
        ]);

        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].registry_number.as_deref(), Some("100"));
    }

    #[test]
    fn test_dedupe_keeps_rows_missing_a_key() {
        let mut unnumbered = operator("11222333000181", "", "Unnumbered A", None);
        unnumbered.registry_number = None;
        let mut other = operator("11444777000161", "", "Unnumbered B", None);
        other.registry_number = None;

        let deduped = dedupe_registry(vec![
            unnumbered,
            other,
            operator("", "300", "No CNPJ 1", None),
            operator("", "301", "No CNPJ 2", None),
        ]);

        let names: Vec<&str> = deduped.iter().map(|op| op.legal_name.as_str()).collect();
        assert_eq!(names, vec!["Unnumbered A", "Unnumbered B", "No CNPJ 1", "No CNPJ 2"]);
    }

    #[test]
    fn test_join_drops_and_counts_unmatched() {
        let registry = Registry::from_operators(vec![operator(
            "11222333000181",
            "100",
            "Acme Saude",
            None,
        )]);
        let joiner = RegistryJoiner::new(&registry);

        let outcome = joiner.join(vec![bucket("100", 1, 10.0), bucket("999", 1, 5.0)]);

        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].legal_name, "Acme Saude");
        assert_eq!(outcome.rows[0].state.as_deref(), Some("SP"));
        assert_eq!(outcome.rows[0].identifier, "11222333000181");
    }

    #[test]
    fn test_join_drops_operator_without_identifier() {
        let registry = Registry::from_operators(vec![operator("", "100", "No CNPJ", None)]);
        let outcome = RegistryJoiner::new(&registry).join(vec![bucket("100", 2, 1.0)]);
        assert_eq!(outcome.dropped, 1);
        assert!(outcome.rows.is_empty());
    }

    #[test]
    fn test_join_by_identifier_fills_attributes() {
        let registry = Registry::from_operators(vec![operator(
            "11222333000181",
            "100",
            "Acme Saude",
            None,
        )]);
        let row = QuarterlyExpense {
            identifier: "11222333000181".to_string(),
            legal_name: "ACME SAUDE LTDA".to_string(),
            quarter: 1,
            year: 2023,
            value: 10.0,
            registry_number: None,
            category: None,
            state: None,
        };
        let mut other = row.clone();
        other.identifier = "11444777000161".to_string();

        let outcome = RegistryJoiner::new(&registry).join_by_identifier(vec![row, other]);

        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.rows[0].legal_name, "ACME SAUDE LTDA");
        assert_eq!(outcome.rows[0].registry_number.as_deref(), Some("100"));
        assert_eq!(outcome.rows[0].state.as_deref(), Some("SP"));
    }

    #[test]
    fn test_operators_from_table_pads_identifier() {
        let table = Table::new(
            vec![
                REG_ANS.to_string(),
                CNPJ.to_string(),
                RAZAO_SOCIAL.to_string(),
                DATA_REGISTRO.to_string(),
            ],
            vec![
                vec!["419761".into(), "191".into(), "Banco".into(), "2010-05-01".into()],
                vec!["419762".into(), "".into(), "Sem CNPJ".into(), "".into()],
            ],
        );

        let ops = operators_from_table(&table);

        assert_eq!(ops[0].identifier, "00000000000191");
        assert_eq!(ops[0].registered_at, NaiveDate::from_ymd_opt(2010, 5, 1));
        assert_eq!(ops[0].state, None);
        assert_eq!(ops[1].identifier, "");
    }
}
