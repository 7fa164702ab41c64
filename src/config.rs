//! Run configuration resolved once at startup.

use std::path::PathBuf;

use tracing::debug;

use crate::columns::{ColumnAliases, ColumnNormalizer};
use crate::error::{EtlError, Result};
use crate::etl::consolidate::Consolidator;
use crate::etl::filter::{ExpenseFilter, FilterPolicy};
use crate::reader::TabularReader;

pub const DATA_DIR_VAR: &str = "ANS_DATA_DIR";
pub const OUTPUT_DIR_VAR: &str = "ANS_OUTPUT_DIR";
pub const FILTER_POLICY_VAR: &str = "ANS_FILTER_POLICY";

pub const CONSOLIDATED_CSV: &str = "consolidado_despesas.csv";
pub const CONSOLIDATED_ZIP: &str = "consolidado_despesas.zip";
pub const AGGREGATED_CSV: &str = "despesas_agregadas.csv";

#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub filter_policy: FilterPolicy,
    pub expense_aliases: ColumnAliases,
    pub registry_aliases: ColumnAliases,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            filter_policy: FilterPolicy::default(),
            expense_aliases: ColumnAliases::expense_defaults(),
            registry_aliases: ColumnAliases::registry_defaults(),
        }
    }
}

impl EtlConfig {
    /// Reads `ANS_DATA_DIR`, `ANS_OUTPUT_DIR` and `ANS_FILTER_POLICY` from the
    /// process environment, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EtlConfig::from_env`] with a caller-supplied variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(DATA_DIR_VAR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(OUTPUT_DIR_VAR) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(policy) = lookup(FILTER_POLICY_VAR) {
            config.filter_policy = policy.parse::<FilterPolicy>().map_err(EtlError::InvalidConfig)?;
        }

        debug!(
            data_dir = %config.data_dir.display(),
            output_dir = %config.output_dir.display(),
            policy = %config.filter_policy,
            "Configuration resolved"
        );
        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_filter_policy(mut self, policy: FilterPolicy) -> Self {
        self.filter_policy = policy;
        self
    }

    /// Directory holding the extracted quarterly filings.
    pub fn trimestres_dir(&self) -> PathBuf {
        self.data_dir.join("trimestres")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("operadoras").join("operadoras.csv")
    }

    pub fn consolidated_csv(&self) -> PathBuf {
        self.output_dir.join(CONSOLIDATED_CSV)
    }

    pub fn consolidated_zip(&self) -> PathBuf {
        self.output_dir.join(CONSOLIDATED_ZIP)
    }

    pub fn aggregated_csv(&self) -> PathBuf {
        self.output_dir.join(AGGREGATED_CSV)
    }

    pub fn reader(&self) -> TabularReader {
        TabularReader::default()
    }

    pub fn registry_normalizer(&self) -> ColumnNormalizer {
        ColumnNormalizer::new(self.registry_aliases.clone())
    }

    /// Builds a [`Consolidator`] wired with this configuration's aliases and policy.
    pub fn consolidator(&self) -> Consolidator {
        Consolidator::new(
            self.reader(),
            ColumnNormalizer::new(self.expense_aliases.clone()),
            self.registry_normalizer(),
            ExpenseFilter::new(self.filter_policy),
        )
    }
}
