//! Append-merge dataset store.
//!
//! The dataset is a UTF-8 CSV file with a header row:
//!
//! ```text
//! Latitude,Longitude,Pothole Area (pixels),Severity,Timestamp
//! ```
//!
//! New batches are validated against the existing file and then appended in
//! place. Files written by the older four-column layout (no area column) are
//! still readable; the first persist against such a file rewrites it in the
//! canonical layout, with an empty area for the migrated rows. A file whose
//! header lists the canonical columns in another order is read by column
//! name and rewritten in canonical order on the next persist.
//!
//! Single writer only. There is no locking: two processes persisting to the
//! same file at once can interleave rows.

use anyhow::Result;
use chrono::NaiveDateTime;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::record::{truncate_to_seconds, PotholeRecord, TIMESTAMP_FORMAT};
use crate::severity::Severity;

pub const COL_LATITUDE: &str = "Latitude";
pub const COL_LONGITUDE: &str = "Longitude";
pub const COL_AREA: &str = "Pothole Area (pixels)";
pub const COL_SEVERITY: &str = "Severity";
pub const COL_TIMESTAMP: &str = "Timestamp";

pub const CANONICAL_COLUMNS: [&str; 5] =
    [COL_LATITUDE, COL_LONGITUDE, COL_AREA, COL_SEVERITY, COL_TIMESTAMP];
pub const LEGACY_COLUMNS: [&str; 4] = [COL_LATITUDE, COL_LONGITUDE, COL_SEVERITY, COL_TIMESTAMP];

/// Column layout found in an existing dataset file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schema {
    Canonical,
    /// Four columns, no area.
    Legacy,
}

#[derive(Debug)]
pub enum DatasetError {
    Schema { path: PathBuf, message: String },
    /// `column` is `None` when the row could not be split into fields.
    Row {
        path: PathBuf,
        line: u64,
        column: Option<&'static str>,
        message: String,
    },
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetError::Schema { path, message } => {
                write!(f, "dataset {}: bad header: {}", path.display(), message)
            }
            DatasetError::Row {
                path,
                line,
                column: Some(column),
                message,
            } => write!(
                f,
                "dataset {} line {}, column '{}': {}",
                path.display(),
                line,
                column,
                message
            ),
            DatasetError::Row {
                path,
                line,
                column: None,
                message,
            } => write!(f, "dataset {} line {}: {}", path.display(), line, message),
            DatasetError::Io { path, source } => {
                write!(f, "dataset {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DatasetError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result of a `persist` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The file did not exist and was created with `rows` records.
    Created { rows: usize },
    /// `rows` records were added; the dataset now holds `total`.
    Appended { rows: usize, total: usize },
    /// Empty batch; the file was not touched.
    NoChange,
}

impl PersistOutcome {
    pub fn rows_written(&self) -> usize {
        match self {
            PersistOutcome::Created { rows } => *rows,
            PersistOutcome::Appended { rows, .. } => *rows,
            PersistOutcome::NoChange => 0,
        }
    }
}

impl fmt::Display for PersistOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistOutcome::Created { rows } => write!(f, "created dataset with {} record(s)", rows),
            PersistOutcome::Appended { rows, total } => {
                write!(f, "appended {} record(s), {} total", rows, total)
            }
            PersistOutcome::NoChange => write!(f, "no new records"),
        }
    }
}

struct LoadedDataset {
    schema: Schema,
    /// Header is exactly the canonical columns in canonical order.
    canonical_order: bool,
    records: Vec<PotholeRecord>,
}

pub struct DatasetStore {
    path: PathBuf,
}

impl DatasetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records in file order. A missing file is an empty dataset.
    pub fn load(&self) -> Result<Vec<PotholeRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Ok(self.read_dataset()?.records)
    }

    /// Append `records` after the existing dataset.
    ///
    /// The existing file is parsed in full first; a corrupt file fails the
    /// call and is left untouched.
    pub fn persist(&self, records: &[PotholeRecord]) -> Result<PersistOutcome> {
        if records.is_empty() {
            log::debug!("persist: empty batch for {}", self.path.display());
            return Ok(PersistOutcome::NoChange);
        }

        if !self.path.exists() {
            self.write_full(records)?;
            log::info!(
                "created dataset {} with {} record(s)",
                self.path.display(),
                records.len()
            );
            return Ok(PersistOutcome::Created {
                rows: records.len(),
            });
        }

        let existing = self.read_dataset()?;
        let total = existing.records.len() + records.len();
        match existing.schema {
            // Appended rows are encoded in canonical order and must line up
            // with the header already on disk.
            Schema::Canonical if existing.canonical_order => self.append_rows(records)?,
            schema => {
                log::info!(
                    "rewriting {} dataset {} ({} row(s)) in the canonical layout",
                    match schema {
                        Schema::Legacy => "legacy",
                        Schema::Canonical => "reordered",
                    },
                    self.path.display(),
                    existing.records.len()
                );
                let mut merged = existing.records;
                merged.extend_from_slice(records);
                self.write_full(&merged)?;
            }
        }
        log::info!(
            "appended {} record(s) to {} ({} total)",
            records.len(),
            self.path.display(),
            total
        );
        Ok(PersistOutcome::Appended {
            rows: records.len(),
            total,
        })
    }

    /// Rewrite the dataset in canonical form. Returns the row count.
    ///
    /// Migrates legacy files and normalises formatting; row order is kept.
    pub fn compact(&self) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let existing = self.read_dataset()?;
        self.write_full(&existing.records)?;
        log::info!(
            "compacted {} ({} record(s))",
            self.path.display(),
            existing.records.len()
        );
        Ok(existing.records.len())
    }

    fn io_err(&self, source: io::Error) -> DatasetError {
        DatasetError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_err(&self, err: csv::Error) -> DatasetError {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        let message = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(source) => self.io_err(source),
            _ => DatasetError::Row {
                path: self.path.clone(),
                line,
                column: None,
                message,
            },
        }
    }

    fn read_dataset(&self) -> std::result::Result<LoadedDataset, DatasetError> {
        let file = fs::File::open(&self.path).map_err(|e| self.io_err(e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers = reader.headers().map_err(|e| self.csv_err(e))?.clone();
        let schema = self.detect_schema(&headers)?;
        let columns = ColumnIndex::new(&headers, schema);
        let canonical_order = headers.iter().eq(CANONICAL_COLUMNS.iter().copied());

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| self.csv_err(e))?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            let record = parse_row(&row, &columns).map_err(|(column, message)| {
                DatasetError::Row {
                    path: self.path.clone(),
                    line,
                    column: Some(column),
                    message,
                }
            })?;
            records.push(record);
        }
        Ok(LoadedDataset {
            schema,
            canonical_order,
            records,
        })
    }

    fn detect_schema(&self, headers: &csv::StringRecord) -> std::result::Result<Schema, DatasetError> {
        let mut found: Vec<&str> = headers.iter().collect();
        if found.iter().all(|h| h.is_empty()) {
            return Err(DatasetError::Schema {
                path: self.path.clone(),
                message: "file is empty".to_string(),
            });
        }
        found.sort_unstable();

        let mut canonical = CANONICAL_COLUMNS.to_vec();
        canonical.sort_unstable();
        if found == canonical {
            return Ok(Schema::Canonical);
        }
        let mut legacy = LEGACY_COLUMNS.to_vec();
        legacy.sort_unstable();
        if found == legacy {
            return Ok(Schema::Legacy);
        }
        Err(DatasetError::Schema {
            path: self.path.clone(),
            message: format!(
                "expected columns [{}], found [{}]",
                CANONICAL_COLUMNS.join(", "),
                headers.iter().collect::<Vec<_>>().join(", ")
            ),
        })
    }

    fn append_rows(&self, records: &[PotholeRecord]) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        if !ends_with_newline(&mut file).map_err(|e| self.io_err(e))? {
            file.write_all(b"\n").map_err(|e| self.io_err(e))?;
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for record in records {
            writer
                .write_record(&encode_row(record))
                .map_err(|e| self.csv_err(e))?;
        }
        writer.flush().map_err(|e| self.io_err(e))?;
        Ok(())
    }

    /// Header plus `records`, written beside the target and renamed over it.
    ///
    /// The temp file is removed again if any step fails.
    fn write_full(&self, records: &[PotholeRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let tmp = temp_path(&self.path);
        let written = self
            .write_canonical(&tmp, records)
            .and_then(|()| fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e)));
        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    log::warn!("could not remove {}: {}", tmp.display(), cleanup);
                }
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn write_canonical(
        &self,
        target: &Path,
        records: &[PotholeRecord],
    ) -> std::result::Result<(), DatasetError> {
        let file = fs::File::create(target).map_err(|e| self.io_err(e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .write_record(CANONICAL_COLUMNS)
            .map_err(|e| self.csv_err(e))?;
        for record in records {
            writer
                .write_record(&encode_row(record))
                .map_err(|e| self.csv_err(e))?;
        }
        writer.flush().map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

struct ColumnIndex {
    latitude: usize,
    longitude: usize,
    area: Option<usize>,
    severity: usize,
    timestamp: usize,
}

impl ColumnIndex {
    // Only called after detect_schema has confirmed the column set.
    fn new(headers: &csv::StringRecord, schema: Schema) -> Self {
        let position = |name: &str| headers.iter().position(|h| h == name).unwrap_or(0);
        Self {
            latitude: position(COL_LATITUDE),
            longitude: position(COL_LONGITUDE),
            area: match schema {
                Schema::Canonical => Some(position(COL_AREA)),
                Schema::Legacy => None,
            },
            severity: position(COL_SEVERITY),
            timestamp: position(COL_TIMESTAMP),
        }
    }
}

fn field<'a>(row: &'a csv::StringRecord, idx: usize, name: &str) -> std::result::Result<&'a str, String> {
    row.get(idx)
        .ok_or_else(|| format!("missing '{}' value", name))
}

type RowError = (&'static str, String);

fn parse_row(row: &csv::StringRecord, columns: &ColumnIndex) -> std::result::Result<PotholeRecord, RowError> {
    let in_column = |column: &'static str| move |message: String| (column, message);

    let latitude = field(row, columns.latitude, COL_LATITUDE)
        .and_then(|raw| parse_degrees(raw, COL_LATITUDE, 90.0))
        .map_err(in_column(COL_LATITUDE))?;
    let longitude = field(row, columns.longitude, COL_LONGITUDE)
        .and_then(|raw| parse_degrees(raw, COL_LONGITUDE, 180.0))
        .map_err(in_column(COL_LONGITUDE))?;
    let area_px = match columns.area {
        Some(idx) => field(row, idx, COL_AREA)
            .and_then(parse_area)
            .map_err(in_column(COL_AREA))?,
        None => None,
    };
    let severity: Severity = field(row, columns.severity, COL_SEVERITY)
        .and_then(|raw| raw.parse().map_err(|e: anyhow::Error| e.to_string()))
        .map_err(in_column(COL_SEVERITY))?;
    let timestamp = field(row, columns.timestamp, COL_TIMESTAMP)
        .and_then(parse_timestamp)
        .map_err(in_column(COL_TIMESTAMP))?;
    Ok(PotholeRecord::from_parts(
        latitude, longitude, area_px, severity, timestamp,
    ))
}

fn parse_degrees(raw: &str, name: &str, limit: f64) -> std::result::Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("{} '{}' is not a number", name, raw))?;
    if !value.is_finite() || value.abs() > limit {
        return Err(format!("{} {} out of range", name, value));
    }
    Ok(value)
}

/// Integer pixels; float values from other writers are rounded.
fn parse_area(raw: &str) -> std::result::Result<Option<u64>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(area) = raw.parse::<u64>() {
        return Ok(Some(area));
    }
    match raw.parse::<f64>() {
        Ok(area) if area.is_finite() && area >= 0.0 => Ok(Some(area.round() as u64)),
        _ => Err(format!("area '{}' is not a non-negative number", raw)),
    }
}

fn parse_timestamp(raw: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(truncate_to_seconds)
        .map_err(|_| format!("timestamp '{}' is not YYYY-MM-DD HH:MM:SS", raw))
}

fn encode_row(record: &PotholeRecord) -> [String; 5] {
    [
        record.latitude().to_string(),
        record.longitude().to_string(),
        record
            .area_px()
            .map(|area| area.to_string())
            .unwrap_or_default(),
        record.severity().to_string(),
        record.timestamp().format(TIMESTAMP_FORMAT).to_string(),
    ]
}

fn ends_with_newline(file: &mut fs::File) -> io::Result<bool> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "dataset.csv".into());
    name.push(".tmp");
    path.with_file_name(name)
}
