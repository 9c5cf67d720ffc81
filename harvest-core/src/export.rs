use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::records::ProductRecord;

pub type ExportResult<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no records to export")]
    NoRecords,
    #[error("failed to write {path}: {source}")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
    #[error("failed to encode json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn exporter(&self) -> Box<dyn Exporter> {
        match self {
            ExportFormat::Csv => Box::new(CsvExporter::default()),
            ExportFormat::Json => Box::new(JsonExporter),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub format: ExportFormat,
    pub path: PathBuf,
    pub records: usize,
}

/// Persists the final ordered records.
pub trait Exporter {
    fn format(&self) -> ExportFormat;

    fn export(&self, records: &[ProductRecord], path: &Path) -> ExportResult<ExportReport>;
}

/// Header row followed by one row per record, every field quoted.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    separator: char,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self { separator: ',' }
    }
}

impl CsvExporter {
    pub fn with_separator(separator: char) -> Self {
        Self { separator }
    }

    pub fn write_row<W: Write>(&self, mut out: W, row: &[String]) -> io::Result<()> {
        for (idx, cell) in row.iter().enumerate() {
            if idx > 0 {
                write!(out, "{}", self.separator)?;
            }
            write!(out, "\"{}\"", cell.replace('"', "\"\""))?;
        }
        writeln!(out)
    }

    pub fn write_records<W: Write>(&self, mut out: W, records: &[ProductRecord]) -> io::Result<()> {
        let header = ProductRecord::COLUMNS
            .iter()
            .map(|column| column.to_string())
            .collect::<Vec<_>>();
        self.write_row(&mut out, &header)?;
        for record in records {
            self.write_row(&mut out, &record.to_row())?;
        }
        out.flush()
    }
}

impl Exporter for CsvExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn export(&self, records: &[ProductRecord], path: &Path) -> ExportResult<ExportReport> {
        let file = create_output(records, path)?;
        self.write_records(BufWriter::new(file), records)
            .map_err(|source| io_error(source, path))?;
        Ok(report(self.format(), records, path))
    }
}

/// Pretty-printed JSON array.
#[derive(Debug, Clone, Default)]
pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn export(&self, records: &[ProductRecord], path: &Path) -> ExportResult<ExportReport> {
        let file = create_output(records, path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, records)?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|source| io_error(source, path))?;
        Ok(report(self.format(), records, path))
    }
}

fn create_output(records: &[ProductRecord], path: &Path) -> ExportResult<File> {
    if records.is_empty() {
        return Err(ExportError::NoRecords);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| io_error(source, parent))?;
    }
    File::create(path).map_err(|source| io_error(source, path))
}

fn io_error(source: io::Error, path: &Path) -> ExportError {
    ExportError::Io {
        source,
        path: path.to_path_buf(),
    }
}

fn report(format: ExportFormat, records: &[ProductRecord], path: &Path) -> ExportReport {
    info!(
        format = %format,
        records = records.len(),
        path = %path.display(),
        "records exported"
    );
    ExportReport {
        format,
        path: path.to_path_buf(),
        records: records.len(),
    }
}
