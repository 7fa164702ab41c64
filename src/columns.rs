//! Canonical column naming for heterogeneous filings.

use tracing::info;

use crate::table::Table;

pub const REG_ANS: &str = "REG_ANS";
pub const CD_CONTA_CONTABIL: &str = "CD_CONTA_CONTABIL";
pub const DESCRICAO: &str = "DESCRICAO";
pub const VL_SALDO_FINAL: &str = "VL_SALDO_FINAL";
pub const DATA: &str = "DATA";

pub const CNPJ: &str = "CNPJ";
pub const RAZAO_SOCIAL: &str = "Razao_Social";
pub const MODALIDADE: &str = "Modalidade";
pub const UF: &str = "UF";
pub const DATA_REGISTRO: &str = "Data_Registro_ANS";

/// Ordered alias table: canonical name followed by the spellings seen in the wild.
///
/// Order matters twice: canonical names are resolved in insertion order and,
/// within one canonical name, the first alias present in the table wins.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAliases {
    entries: Vec<(String, Vec<String>)>,
}

impl ColumnAliases {
    pub fn new(entries: Vec<(String, Vec<String>)>) -> Self {
        Self { entries }
    }

    /// Alias table for quarterly accounting filings.
    pub fn expense_defaults() -> Self {
        Self::new(vec![
            entry(REG_ANS, &["REG_ANS", "REGISTRO_ANS", "CD_OPERADORA", "OPERADORA"]),
            entry(
                CD_CONTA_CONTABIL,
                &["CD_CONTA_CONTABIL", "CONTA_CONTABIL", "COD_CONTA", "CONTA"],
            ),
            entry(DESCRICAO, &["DESCRICAO", "DESC_CONTA", "NOME_CONTA", "DS_CONTA"]),
            entry(
                VL_SALDO_FINAL,
                &["VL_SALDO_FINAL", "SALDO_FINAL", "VL_FINAL", "VALOR_FINAL"],
            ),
            entry(DATA, &["DATA", "DT_BALANCETE", "DATA_BALANCETE", "DT_BASE"]),
        ])
    }

    /// Alias table for the active-operator registry export.
    pub fn registry_defaults() -> Self {
        Self::new(vec![
            entry(REG_ANS, &["REG_ANS", "REGISTRO_OPERADORA", "REGISTRO_ANS"]),
            entry(CNPJ, &["CNPJ", "NR_CNPJ", "CNPJ_OPERADORA"]),
            entry(RAZAO_SOCIAL, &["Razao_Social", "RAZAO_SOCIAL", "RazaoSocial", "NOME"]),
            entry(MODALIDADE, &["Modalidade", "MODALIDADE", "DS_MODALIDADE"]),
            entry(UF, &["UF", "SG_UF", "ESTADO"]),
            entry(
                DATA_REGISTRO,
                &["Data_Registro_ANS", "DATA_REGISTRO_ANS", "DT_REGISTRO"],
            ),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(canonical, aliases)| (canonical.as_str(), aliases.as_slice()))
    }
}

fn entry(canonical: &str, aliases: &[&str]) -> (String, Vec<String>) {
    (
        canonical.to_string(),
        aliases.iter().map(|a| a.to_string()).collect(),
    )
}

/// Renames alias columns onto canonical names and checks required columns.
#[derive(Debug, Clone)]
pub struct ColumnNormalizer {
    aliases: ColumnAliases,
}

impl ColumnNormalizer {
    pub fn new(aliases: ColumnAliases) -> Self {
        Self { aliases }
    }

    /// Renames, case-insensitively, the first matching alias of each canonical name.
    ///
    /// Tables already using canonical names come back unchanged.
    pub fn normalize_columns(&self, mut table: Table) -> Table {
        let mut renamed: Vec<(String, String)> = Vec::new();

        for (canonical, aliases) in self.aliases.iter() {
            let found = aliases.iter().find_map(|alias| {
                table
                    .headers
                    .iter()
                    .position(|h| h.eq_ignore_ascii_case(alias))
            });

            if let Some(idx) = found {
                if table.headers[idx] != canonical {
                    renamed.push((table.headers[idx].clone(), canonical.to_string()));
                    table.headers[idx] = canonical.to_string();
                }
            }
        }

        if !renamed.is_empty() {
            info!(renamed = ?renamed, "Columns normalized");
        }

        table
    }

    /// Returns the entries of `required` that are not columns of `table`.
    pub fn validate_required(&self, table: &Table, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|name| !table.has_column(name))
            .map(|name| name.to_string())
            .collect()
    }
}
