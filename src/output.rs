//! Materialization of the consolidated and aggregated tables.
//!
//! Files use `;` as field delimiter and `,` as decimal separator, UTF-8 encoded,
//! which is the format downstream loaders expect.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use csv::WriterBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::etl::consolidate::CONSOLIDATED_HEADERS;
use crate::etl::types::{AggregatedStat, QuarterlyExpense};

pub const AGGREGATED_HEADERS: [&str; 9] = [
    "CNPJ",
    "RazaoSocial",
    "RegistroANS",
    "Modalidade",
    "UF",
    "TotalDespesas",
    "MediaTrimestral",
    "DesvioPadrao",
    "QtdTrimestres",
];

/// Two decimals with a comma separator: `1234.5` becomes `1234,50`.
pub fn format_decimal(value: f64) -> String {
    format!("{value:.2}").replace('.', ",")
}

/// Logs any serializable value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> serde_json::Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes the consolidated table (header included) to `writer`.
pub fn write_consolidated_to<W: Write>(writer: W, rows: &[QuarterlyExpense]) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b';').from_writer(writer);

    writer.write_record(CONSOLIDATED_HEADERS)?;
    for row in rows {
        writer.write_record([
            row.identifier.clone(),
            row.legal_name.clone(),
            row.quarter.to_string(),
            row.year.to_string(),
            format_decimal(row.value),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Consolidated table as CSV bytes, ready to be placed in an archive.
pub fn consolidated_csv_bytes(rows: &[QuarterlyExpense]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_consolidated_to(&mut buf, rows)?;
    Ok(buf)
}

/// Writes the consolidated table to `path`, replacing any previous file.
pub fn write_consolidated(path: &Path, rows: &[QuarterlyExpense]) -> Result<()> {
    debug!(path = %path.display(), rows = rows.len(), "Writing consolidated table");
    write_consolidated_to(create(path)?, rows)?;
    info!(path = %path.display(), rows = rows.len(), "Consolidated table written");
    Ok(())
}

/// Writes the per-operator statistics to `path`, replacing any previous file.
pub fn write_aggregated(path: &Path, stats: &[AggregatedStat]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b';')
        .from_writer(create(path)?);

    writer.write_record(AGGREGATED_HEADERS)?;
    for stat in stats {
        writer.write_record([
            stat.identifier.as_str(),
            stat.legal_name.as_str(),
            stat.registry_number.as_deref().unwrap_or(""),
            stat.category.as_deref().unwrap_or(""),
            stat.state.as_deref().unwrap_or(""),
            format_decimal(stat.total).as_str(),
            format_decimal(stat.mean).as_str(),
            format_decimal(stat.std_dev).as_str(),
            stat.quarter_count.to_string().as_str(),
        ])?;
    }
    writer.flush()?;

    info!(path = %path.display(), operators = stats.len(), "Aggregated table written");
    Ok(())
}

fn create(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}
