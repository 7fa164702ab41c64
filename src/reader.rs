//! Tabular file reader with encoding and delimiter auto-detection.
//!
//! Quarterly filings arrive with inconsistent encodings and separators, so
//! delimited text is decoded by brute force over a fixed priority order of
//! (encoding, delimiter) pairs. Spreadsheets go straight through `calamine`.

use std::borrow::Cow;
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use encoding_rs::{UTF_8, WINDOWS_1252};
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::table::Table;

/// Extensions accepted by [`TabularReader::read`], lowercase, without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "txt", "xlsx", "xls"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Text encodings tried for delimited files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Windows1252,
}

impl TextEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
            TextEncoding::Windows1252 => "windows-1252",
        }
    }

    /// Decodes `bytes` strictly; `None` when the bytes are malformed for this encoding.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            TextEncoding::Utf8 => {
                let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                UTF_8
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .map(Cow::into_owned)
            }
            // ISO-8859-1 maps every byte to the code point of the same value.
            TextEncoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            TextEncoding::Windows1252 => WINDOWS_1252
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(Cow::into_owned),
        }
    }
}

/// Returns true when `path` has one of the [`SUPPORTED_EXTENSIONS`].
pub fn is_supported(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Loads csv/txt/xlsx/xls files into a [`Table`].
#[derive(Debug, Clone)]
pub struct TabularReader {
    encodings: Vec<TextEncoding>,
    delimiters: Vec<u8>,
}

impl Default for TabularReader {
    fn default() -> Self {
        Self {
            encodings: vec![
                TextEncoding::Utf8,
                TextEncoding::Latin1,
                TextEncoding::Windows1252,
            ],
            delimiters: vec![b';', b',', b'\t', b'|'],
        }
    }
}

impl TabularReader {
    /// Reads `path`, dispatching on its extension.
    ///
    /// # Errors
    ///
    /// [`EtlError::UnsupportedFormat`] for unknown extensions and
    /// [`EtlError::UnreadableFile`] when no (encoding, delimiter) pair yields
    /// more than one column.
    #[tracing::instrument(skip(self), fields(file = %path.display()))]
    pub fn read(&self, path: &Path) -> Result<Table> {
        let extension = extension_of(path).unwrap_or_default();

        match extension.as_str() {
            "xlsx" | "xls" => self.read_spreadsheet(path),
            "csv" | "txt" => self.read_delimited(path),
            _ => Err(EtlError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }

    fn read_spreadsheet(&self, path: &Path) -> Result<Table> {
        let mut workbook = open_workbook_auto(path)?;
        let range = match workbook.worksheet_range_at(0) {
            Some(range) => range?,
            None => return Err(EtlError::UnreadableFile(path.to_path_buf())),
        };

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header) => header.iter().map(|c| cell_to_string(c).trim().to_string()).collect(),
            None => return Err(EtlError::UnreadableFile(path.to_path_buf())),
        };
        let rows: Vec<Vec<String>> = rows
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();

        info!(rows = rows.len(), "Spreadsheet loaded");
        Ok(Table::new(headers, rows))
    }

    fn read_delimited(&self, path: &Path) -> Result<Table> {
        let bytes = std::fs::read(path)?;
        self.parse_bytes(&bytes)
            .ok_or_else(|| EtlError::UnreadableFile(path.to_path_buf()))
    }

    /// Tries every (encoding, delimiter) pair in priority order and returns the
    /// first table with more than one column.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Option<Table> {
        for encoding in &self.encodings {
            let Some(text) = encoding.decode(bytes) else {
                debug!(encoding = encoding.label(), "Decode failed");
                continue;
            };

            for &delimiter in &self.delimiters {
                match parse_delimited(&text, delimiter) {
                    Ok(table) if table.column_count() > 1 => {
                        info!(
                            encoding = encoding.label(),
                            delimiter = %(delimiter as char).escape_default(),
                            rows = table.len(),
                            "Delimited file decoded"
                        );
                        return Some(table);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(
                            encoding = encoding.label(),
                            delimiter = %(delimiter as char).escape_default(),
                            error = %e,
                            "Parse attempt failed"
                        );
                    }
                }
            }
        }

        None
    }
}

fn parse_delimited(text: &str, delimiter: u8) -> std::result::Result<Table, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Table::new(headers, rows))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::filter::{EVENT_DESCRIPTION, ExpenseFilter, FilterPolicy};
    use std::io::Write;
    use tempfile::{Builder, TempDir};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn write_temp(suffix: &str, bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_utf8_semicolon_read_on_first_attempt() {
        let reader = TabularReader::default();
        let table = reader
            .parse_bytes("DATA;REG_ANS;DESCRICAO\n2023-01-01;123;Saúde\n".as_bytes())
            .unwrap();
        assert_eq!(table.headers, vec!["DATA", "REG_ANS", "DESCRICAO"]);
        assert_eq!(table.rows[0][2], "Saúde");
    }

    #[test]
    fn test_comma_delimited_falls_through_semicolon() {
        let reader = TabularReader::default();
        let table = reader.parse_bytes(b"a,b,c\n1,2,3\n").unwrap();
        assert_eq!(table.column_count(), 3);
        assert_eq!(table.rows[0], vec!["1", "2", "3"]);
    }

    #[test]
    fn test_latin1_file_is_decoded() {
        // "Saúde" with ú as 0xFA, invalid UTF-8.
        let bytes = b"NOME;UF\nSa\xFAde;SP\n";
        let reader = TabularReader::default();
        let table = reader.parse_bytes(bytes).unwrap();
        assert_eq!(table.rows[0][0], "Saúde");
    }

    #[test]
    fn test_pipe_delimited() {
        let reader = TabularReader::default();
        let table = reader.parse_bytes(b"a|b\n1|2\n").unwrap();
        assert_eq!(table.headers, vec!["a", "b"]);
    }

    #[test]
    fn test_single_column_is_unreadable() {
        let file = write_temp(".csv", b"only\n1\n2\n");
        let err = TabularReader::default().read(file.path()).unwrap_err();
        assert!(matches!(err, EtlError::UnreadableFile(_)));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_temp(".json", b"{}");
        let err = TabularReader::default().read(file.path()).unwrap_err();
        assert!(matches!(
            err,
            EtlError::UnsupportedFormat { ref extension, .. } if extension == "json"
        ));
    }

    #[test]
    fn test_uppercase_txt_extension_supported() {
        let file = write_temp(".TXT", b"a;b\n1;2\n");
        assert!(is_supported(file.path()));
        let table = TabularReader::default().read(file.path()).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_utf8_bom_stripped_from_first_header() {
        let reader = TabularReader::default();
        let table = reader.parse_bytes(b"\xEF\xBB\xBFDATA;VALOR\n1;2\n").unwrap();
        assert_eq!(table.headers[0], "DATA");
    }

    #[test]
    fn test_short_trailing_row_is_kept() {
        let reader = TabularReader::default();
        let table = reader
            .parse_bytes(
                b"DATA;REG_ANS;CD_CONTA_CONTABIL\n\
                  2023-01-01;100;411110101\n\
                  2023-01-01;100\n",
            )
            .unwrap();

        assert_eq!(table.column_count(), 3);
        assert_eq!(table.len(), 2);
        assert_eq!(Table::cell(&table.rows[1], 1), "100");
        assert_eq!(Table::cell(&table.rows[1], 2), "");
    }

    const SHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

    /// Minimal workbook: one sheet, inline strings, style 1 formatted as a date.
    fn write_xlsx(path: &Path, sheet_rows: &str) {
        let parts = [
            (
                "[Content_Types].xml",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels"
 ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml"
 ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml"
 ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
<Override PartName="/xl/styles.xml"
 ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>
</Types>"#
                    .to_string(),
            ),
            (
                "_rels/.rels",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Target="xl/workbook.xml"
 Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument"/>
</Relationships>"#
                    .to_string(),
            ),
            (
                "xl/workbook.xml",
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="{SHEET_NS}"
 xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Balancete" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#
                ),
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Target="worksheets/sheet1.xml"
 Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet"/>
<Relationship Id="rId2" Target="styles.xml"
 Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles"/>
</Relationships>"#
                    .to_string(),
            ),
            (
                "xl/styles.xml",
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="{SHEET_NS}">
<cellXfs count="2"><xf numFmtId="0"/><xf numFmtId="14" applyNumberFormat="1"/></cellXfs>
</styleSheet>"#
                ),
            ),
            (
                "xl/worksheets/sheet1.xml",
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="{SHEET_NS}"><sheetData>{sheet_rows}</sheetData></worksheet>"#
                ),
            ),
        ];

        let mut zip = ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, body) in parts {
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn text_cell(reference: &str, text: &str) -> String {
        format!(r#"<c r="{reference}" t="inlineStr"><is><t>{text}</t></is></c>"#)
    }

    #[test]
    fn test_xlsx_cells_rendered_for_filter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1T2023.xlsx");

        let columns = ["DATA", "REG_ANS", "CD_CONTA_CONTABIL", "DESCRICAO", "VL_SALDO_FINAL"];
        let header: String = columns
            .iter()
            .zip(["A1", "B1", "C1", "D1", "E1"])
            .map(|(name, reference)| text_cell(reference, name))
            .collect();
        // 44927 is 2023-01-01 in the 1900 date system.
        let data = [
            r#"<c r="A2" s="1"><v>44927</v></c>"#.to_string(),
            r#"<c r="B2"><v>100</v></c>"#.to_string(),
            r#"<c r="C2"><v>411110101</v></c>"#.to_string(),
            text_cell("D2", EVENT_DESCRIPTION),
            r#"<c r="E2"><v>1234.5</v></c>"#.to_string(),
        ]
        .concat();
        write_xlsx(
            &path,
            &format!(r#"<row r="1">{header}</row><row r="2">{data}</row>"#),
        );

        let table = TabularReader::default().read(&path).unwrap();

        assert_eq!(table.headers, columns);
        assert_eq!(table.rows[0][0], "2023-01-01 00:00:00");
        assert_eq!(table.rows[0][1], "100");
        assert_eq!(table.rows[0][2], "411110101");
        assert_eq!(table.rows[0][4], "1234.5");

        let buckets = ExpenseFilter::new(FilterPolicy::Strict).filter(&table).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].registry_id, "100");
        assert_eq!((buckets[0].year, buckets[0].quarter), (2023, 1));
        assert_eq!(buckets[0].value, 1234.5);
    }
}
