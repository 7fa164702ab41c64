//! Uniform in-memory table produced by every reader path.

/// Header row plus string cells. Rows may be shorter than the header, so
/// cells are read through [`Table::cell`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Exact (case-sensitive) lookup of a column position.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Returns the cell at `row`/`column` or an empty string for ragged rows.
    pub fn cell(row: &[String], column: usize) -> &str {
        row.get(column).map(String::as_str).unwrap_or("")
    }
}
