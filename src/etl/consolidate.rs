//! Batch consolidation of quarterly filings into one YTD expense table.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::archive::extract_entries;
use crate::columns::{
    CD_CONTA_CONTABIL, ColumnNormalizer, DATA, DESCRICAO, REG_ANS, VL_SALDO_FINAL,
};
use crate::error::{EtlError, Result};
use crate::etl::filter::ExpenseFilter;
use crate::etl::registry::{Registry, RegistryJoiner, load_registry};
use crate::etl::types::QuarterlyExpense;
use crate::etl::utility::parse_decimal;
use crate::reader::{TabularReader, is_supported};
use crate::table::Table;

/// Columns every filing must carry after normalization.
pub const REQUIRED_COLUMNS: &[&str] =
    &[DATA, REG_ANS, CD_CONTA_CONTABIL, DESCRICAO, VL_SALDO_FINAL];

/// Header of the materialized consolidated table.
pub const CONSOLIDATED_HEADERS: [&str; 5] =
    ["CNPJ", "RazaoSocial", "Trimestre", "Ano", "ValorDespesas"];

/// Result of one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub rows: Vec<QuarterlyExpense>,
    pub processed: usize,
    pub skipped: usize,
    /// Expense buckets dropped because no active operator matched their registry id.
    pub unmatched: usize,
    /// (identifier, year, quarter) keys that appear more than once across files.
    pub duplicate_keys: usize,
}

/// Orchestrates read → normalize → validate → filter → join for every filing.
#[derive(Debug, Clone)]
pub struct Consolidator {
    reader: TabularReader,
    expense_normalizer: ColumnNormalizer,
    registry_normalizer: ColumnNormalizer,
    filter: ExpenseFilter,
}

impl Consolidator {
    pub fn new(
        reader: TabularReader,
        expense_normalizer: ColumnNormalizer,
        registry_normalizer: ColumnNormalizer,
        filter: ExpenseFilter,
    ) -> Self {
        Self {
            reader,
            expense_normalizer,
            registry_normalizer,
            filter,
        }
    }

    /// Loads the registry once, then consolidates every supported file in `source_dir`.
    #[tracing::instrument(
        skip(self),
        fields(source_dir = %source_dir.display(), policy = %self.filter.policy())
    )]
    pub fn run_batch(&self, source_dir: &Path, registry_path: &Path) -> Result<BatchOutput> {
        let files = discover_files(source_dir)?;
        info!(files = files.len(), "Data files found");

        let registry = load_registry(&self.reader, &self.registry_normalizer, registry_path)?;
        self.consolidate(&files, &registry)
    }

    /// Processes `files` in order against a loaded registry.
    ///
    /// A file missing required columns is skipped and counted; any other
    /// failure aborts the batch.
    pub fn consolidate(&self, files: &[PathBuf], registry: &Registry) -> Result<BatchOutput> {
        let mut output = BatchOutput::default();

        for file in files {
            match self.process_file(file, registry) {
                Ok((rows, unmatched)) => {
                    output.rows.extend(rows);
                    output.unmatched += unmatched;
                    output.processed += 1;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(file = %file.display(), error = %e, "File skipped");
                    output.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        output.duplicate_keys = count_duplicate_keys(&output.rows);
        if output.duplicate_keys > 0 {
            warn!(
                duplicate_keys = output.duplicate_keys,
                "Same operator/year/quarter reported by more than one file; rows kept as-is"
            );
        }

        info!(
            processed = output.processed,
            skipped = output.skipped,
            rows = output.rows.len(),
            "Consolidation complete"
        );
        Ok(output)
    }

    /// Runs one filing through the pipeline. Returns the joined rows and the
    /// number of buckets dropped by the registry join.
    pub fn process_file(
        &self,
        path: &Path,
        registry: &Registry,
    ) -> Result<(Vec<QuarterlyExpense>, usize)> {
        let table = self
            .expense_normalizer
            .normalize_columns(self.reader.read(path)?);

        let missing = self
            .expense_normalizer
            .validate_required(&table, REQUIRED_COLUMNS);
        if !missing.is_empty() {
            return Err(EtlError::MissingColumns {
                file: file_name(path),
                missing,
            });
        }

        let buckets = self.filter.filter(&table)?;
        let joined = RegistryJoiner::new(registry).join(buckets);
        info!(file = %file_name(path), rows = joined.rows.len(), "File consolidated");

        Ok((joined.rows, joined.dropped))
    }
}

/// Supported files directly under `dir`, sorted by path.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_supported(&path) {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(EtlError::NoSourceFiles(dir.to_path_buf()));
    }

    files.sort();
    Ok(files)
}

/// Reads a consolidated table written by [`crate::output::write_consolidated`].
///
/// Rows with unparseable year or quarter are skipped; registry attributes are
/// left empty for a later join by identifier.
pub fn read_consolidated(reader: &TabularReader, path: &Path) -> Result<Vec<QuarterlyExpense>> {
    let table = reader.read(path)?;
    consolidated_from_table(&table, &file_name(path))
}

/// Reads the consolidated table stored as `entry_name` inside the zip at
/// `zip_path`, without extracting anything to disk.
pub fn read_consolidated_archive(
    reader: &TabularReader,
    zip_path: &Path,
    entry_name: &str,
) -> Result<Vec<QuarterlyExpense>> {
    let entries = extract_entries(File::open(zip_path)?)?;
    let bytes = entries
        .iter()
        .find(|(name, _)| Path::new(name.as_str()).file_name() == Some(OsStr::new(entry_name)))
        .map(|(_, bytes)| bytes)
        .ok_or_else(|| EtlError::UnreadableFile(zip_path.join(entry_name)))?;

    let table = reader
        .parse_bytes(bytes)
        .ok_or_else(|| EtlError::UnreadableFile(zip_path.join(entry_name)))?;
    consolidated_from_table(&table, entry_name)
}

fn consolidated_from_table(table: &Table, file: &str) -> Result<Vec<QuarterlyExpense>> {
    let missing: Vec<String> = CONSOLIDATED_HEADERS
        .iter()
        .filter(|h| !table.has_column(h))
        .map(|h| h.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(EtlError::MissingColumns {
            file: file.to_string(),
            missing,
        });
    }

    let idx: Vec<usize> = CONSOLIDATED_HEADERS
        .iter()
        .filter_map(|h| table.column_index(h))
        .collect();

    let rows: Vec<QuarterlyExpense> = table
        .rows
        .iter()
        .filter_map(|row| {
            let quarter = Table::cell(row, idx[2]).trim().parse::<u32>().ok()?;
            let year = Table::cell(row, idx[3]).trim().parse::<i32>().ok()?;
            Some(QuarterlyExpense {
                identifier: Table::cell(row, idx[0]).trim().to_string(),
                legal_name: Table::cell(row, idx[1]).trim().to_string(),
                quarter,
                year,
                value: parse_decimal(Table::cell(row, idx[4])),
                registry_number: None,
                category: None,
                state: None,
            })
        })
        .collect();

    info!(file, rows = rows.len(), "Consolidated table loaded");
    Ok(rows)
}

fn count_duplicate_keys(rows: &[QuarterlyExpense]) -> usize {
    let mut counts: HashMap<(&str, i32, u32), usize> = HashMap::new();
    for row in rows {
        *counts.entry(row.key()).or_default() += 1;
    }
    counts.values().filter(|&&n| n > 1).count()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
