//! Zip handling: path-traversal-safe extraction and CSV export.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{EtlError, Result};

fn malicious(name: &str) -> EtlError {
    EtlError::MaliciousArchive {
        entry: name.to_string(),
    }
}

/// Extracts every entry of the archive at `archive_path` under `dest`.
pub fn extract_file(archive_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)?;
    safe_extract(file, dest)
}

/// Extracts an archive under `dest`. Every entry must resolve inside `dest`
/// (no absolute paths, no `..` escaping the root). All entries are checked
/// before anything is written, so a single bad entry aborts the extraction.
#[tracing::instrument(skip(reader), fields(dest = %dest.display()))]
pub fn safe_extract<R: Read + Seek>(reader: R, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(reader)?;

    let mut targets = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| malicious(entry.name()))?;
        targets.push(relative);
    }

    fs::create_dir_all(dest)?;
    let mut written = Vec::new();

    for (i, relative) in targets.into_iter().enumerate() {
        let mut entry = archive.by_index(i)?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        debug!(file = %target.display(), "Entry extracted");
        written.push(target);
    }

    info!(files = written.len(), "Archive extracted");
    Ok(written)
}

/// Reads every file entry into memory, keyed by entry name. Directories are
/// skipped; an entry that would escape the archive root fails the whole read.
pub fn extract_entries<R: Read + Seek>(reader: R) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = ZipArchive::new(reader)?;
    let mut files = BTreeMap::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        if entry.enclosed_name().is_none() {
            return Err(malicious(entry.name()));
        }

        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        files.insert(entry.name().to_string(), bytes);
    }

    Ok(files)
}

/// Writes `csv` into a new deflate-compressed zip at `zip_path` as `entry_name`.
pub fn export_csv_to_zip(csv: &[u8], zip_path: &Path, entry_name: &str) -> Result<()> {
    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut zip = ZipWriter::new(File::create(zip_path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry_name, options)?;
    zip.write_all(csv)?;
    zip.finish()?;

    info!(zip = %zip_path.display(), entry = entry_name, "CSV exported to zip");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = ZipWriter::new(Cursor::new(&mut buf));
            for (name, data) in entries {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(data.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_nested_parent_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let bytes = build_zip(&[("sub/../../evil.csv", "evil")]);

        let err = safe_extract(Cursor::new(bytes), dir.path()).unwrap_err();

        assert!(matches!(err, EtlError::MaliciousArchive { .. }));
    }

    #[test]
    fn test_extract_entries_rejects_escape() {
        let bytes = build_zip(&[("ok.csv", "1"), ("../evil.csv", "2")]);
        let err = extract_entries(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(
            err,
            EtlError::MaliciousArchive { ref entry } if entry == "../evil.csv"
        ));
    }

    #[test]
    fn test_safe_extract_writes_entries() {
        let dir = TempDir::new().unwrap();
        let bytes = build_zip(&[("1T2023.csv", "a;b\n1;2\n"), ("nested/2T2023.csv", "x;y\n")]);

        let written = safe_extract(Cursor::new(bytes), dir.path()).unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("1T2023.csv")).unwrap(),
            "a;b\n1;2\n"
        );
        assert!(dir.path().join("nested/2T2023.csv").exists());
    }

    #[test]
    fn test_traversal_aborts_before_writing() {
        let dir = TempDir::new().unwrap();
        let bytes = build_zip(&[("ok.csv", "a;b\n"), ("../escape.csv", "evil")]);

        let err = safe_extract(Cursor::new(bytes), &dir.path().join("out")).unwrap_err();

        assert!(matches!(
            err,
            EtlError::MaliciousArchive { ref entry } if entry == "../escape.csv"
        ));
        assert!(!dir.path().join("out/ok.csv").exists());
        assert!(!dir.path().join("escape.csv").exists());
    }

    #[test]
    fn test_extract_entries_in_memory() {
        let bytes = build_zip(&[("b.csv", "2"), ("a.csv", "1")]);
        let files = extract_entries(Cursor::new(bytes)).unwrap();
        let names: Vec<&String> = files.keys().collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
        assert_eq!(files["a.csv"], b"1");
    }

    #[test]
    fn test_export_then_extract() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("out/consolidado_despesas.zip");

        export_csv_to_zip(b"CNPJ;Ano\n1;2023\n", &zip_path, "consolidado_despesas.csv").unwrap();
        let written = extract_file(&zip_path, &dir.path().join("x")).unwrap();

        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("consolidado_despesas.csv"));
    }
}
