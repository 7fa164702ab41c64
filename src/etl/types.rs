//! Data types flowing between the pipeline stages.

use chrono::NaiveDate;
use serde::Serialize;

/// One active health-plan operator from the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operator {
    /// 14-digit CNPJ, zero padded. Empty when the registry row carried no digits.
    pub identifier: String,
    pub legal_name: String,
    pub registry_number: Option<String>,
    pub category: Option<String>,
    pub state: Option<String>,
    #[serde(skip)]
    pub registered_at: Option<NaiveDate>,
}

/// Claims expense summed per (registry id, year, quarter) for one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseBucket {
    pub registry_id: String,
    pub year: i32,
    pub quarter: u32,
    pub value: f64,
}

/// Year-to-date expense of one operator for one quarter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuarterlyExpense {
    pub identifier: String,
    pub legal_name: String,
    pub quarter: u32,
    pub year: i32,
    pub value: f64,
    pub registry_number: Option<String>,
    pub category: Option<String>,
    pub state: Option<String>,
}

impl QuarterlyExpense {
    pub fn key(&self) -> (&str, i32, u32) {
        (&self.identifier, self.year, self.quarter)
    }
}

/// Quarter value with the cumulative effect of earlier quarters removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IsolatedExpense {
    pub identifier: String,
    pub year: i32,
    pub quarter: u32,
    pub ytd: f64,
    pub isolated: f64,
}

/// Per-operator statistics over its isolated quarterly series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedStat {
    pub identifier: String,
    pub legal_name: String,
    pub registry_number: Option<String>,
    pub category: Option<String>,
    pub state: Option<String>,
    pub total: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub quarter_count: usize,
}
