//! Correlation table: maps each renamed spectrum back to where it came from.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Serialize;

use crate::domain::JobLabel;
use crate::error::MergeError;

/// Accepted header names per logical column; the first entry is what the
/// MassQL extraction workflow writes.
const NEW_FILENAME: &[&str] = &["new_filename"];
const NEW_SCAN: &[&str] = &["new_scan"];
const ORIGINAL_SCAN: &[&str] = &["scan", "original_scan"];
const ORIGINAL_PATH: &[&str] = &["original_path"];
const PRECURSOR_MZ: &[&str] = &["precmz", "precursor_mz"];
const INTENSITY: &[&str] = &["i", "intensity"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationRow {
    pub origin_label: String,
    pub original_path: String,
    pub original_scan: i64,
    pub new_scan: i64,
    pub new_filename: String,
    pub precursor_mz: f64,
    pub intensity: f64,
    /// Cell text as written in the table; provenance lines copy these so
    /// `800` stays `800` and `204.1230` keeps its trailing zero.
    pub precursor_mz_text: String,
    pub intensity_text: String,
}

/// Rows of one job's table, grouped by output filename in first-seen order.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    filenames: Vec<String>,
    by_filename: HashMap<String, Vec<CorrelationRow>>,
    by_scan: HashMap<(String, i64), (usize, usize)>,
}

struct ColumnMap {
    new_filename: usize,
    new_scan: usize,
    original_scan: usize,
    original_path: usize,
    precursor_mz: usize,
    intensity: usize,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, MergeError> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let find = |aliases: &[&str]| -> Result<usize, MergeError> {
            names
                .iter()
                .position(|name| aliases.contains(&name.as_str()))
                .ok_or_else(|| {
                    MergeError::MalformedTable(format!("missing required column '{}'", aliases[0]))
                })
        };
        Ok(Self {
            new_filename: find(NEW_FILENAME)?,
            new_scan: find(NEW_SCAN)?,
            original_scan: find(ORIGINAL_SCAN)?,
            original_path: find(ORIGINAL_PATH)?,
            precursor_mz: find(PRECURSOR_MZ)?,
            intensity: find(INTENSITY)?,
        })
    }
}

impl CorrelationTable {
    pub fn from_tsv_file(path: &Path, origin: &JobLabel) -> Result<Self, MergeError> {
        let file = File::open(path)
            .map_err(|err| MergeError::Filesystem(format!("open {}: {err}", path.display())))?;
        Self::from_reader(BufReader::new(file), origin)
    }

    pub fn from_reader<R: Read>(reader: R, origin: &JobLabel) -> Result<Self, MergeError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|err| MergeError::MalformedTable(err.to_string()))?
            .clone();
        let columns = ColumnMap::from_headers(&headers)?;

        let mut table = CorrelationTable::default();
        for (index, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|err| MergeError::MalformedTable(err.to_string()))?;
            // header is line 1
            let line = index + 2;
            let precursor_mz_text = field(&record, columns.precursor_mz, "precmz", line)?;
            let intensity_text = field(&record, columns.intensity, "i", line)?;
            let row = CorrelationRow {
                origin_label: origin.as_str().to_string(),
                original_path: field(&record, columns.original_path, "original_path", line)?
                    .to_string(),
                original_scan: parse_integer(
                    field(&record, columns.original_scan, "scan", line)?,
                    "scan",
                    line,
                )?,
                new_scan: parse_integer(
                    field(&record, columns.new_scan, "new_scan", line)?,
                    "new_scan",
                    line,
                )?,
                new_filename: field(&record, columns.new_filename, "new_filename", line)?
                    .to_string(),
                precursor_mz: parse_float(precursor_mz_text, "precmz", line)?,
                intensity: parse_float(intensity_text, "i", line)?,
                precursor_mz_text: precursor_mz_text.to_string(),
                intensity_text: intensity_text.to_string(),
            };
            table.insert(row, line)?;
        }
        Ok(table)
    }

    fn insert(&mut self, row: CorrelationRow, line: usize) -> Result<(), MergeError> {
        let key = (row.new_filename.clone(), row.new_scan);
        if self.by_scan.contains_key(&key) {
            return Err(MergeError::MalformedTable(format!(
                "line {line}: duplicate row for {} scan {}",
                key.0, key.1
            )));
        }
        let filename_index = match self.filenames.iter().position(|f| *f == row.new_filename) {
            Some(index) => index,
            None => {
                self.filenames.push(row.new_filename.clone());
                self.filenames.len() - 1
            }
        };
        let rows = self.by_filename.entry(row.new_filename.clone()).or_default();
        self.by_scan.insert(key, (filename_index, rows.len()));
        rows.push(row);
        Ok(())
    }

    /// Distinct output filenames in the order they first appear.
    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    /// Pairs each filename with the stem of the MGF that holds its spectra.
    /// Two filenames sharing a stem would both read and write the same MGF,
    /// so that is rejected.
    pub fn mgf_stems(&self) -> Result<Vec<(&str, &str)>, MergeError> {
        let mut owners: HashMap<&str, &str> = HashMap::new();
        let mut stems = Vec::with_capacity(self.filenames.len());
        for filename in &self.filenames {
            let stem = filename_stem(filename);
            if let Some(previous) = owners.insert(stem, filename) {
                return Err(MergeError::MalformedTable(format!(
                    "filenames '{previous}' and '{filename}' both map to MGF stem '{stem}'"
                )));
            }
            stems.push((filename.as_str(), stem));
        }
        Ok(stems)
    }

    pub fn rows_for(&self, filename: &str) -> &[CorrelationRow] {
        self.by_filename
            .get(filename)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn lookup(&self, filename: &str, new_scan: i64) -> Option<&CorrelationRow> {
        let (filename_index, row_index) = self.by_scan.get(&(filename.to_string(), new_scan))?;
        let filename = self.filenames.get(*filename_index)?;
        self.by_filename.get(filename)?.get(*row_index)
    }

    pub fn len(&self) -> usize {
        self.by_scan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_scan.is_empty()
    }
}

fn field<'a>(
    record: &'a csv::StringRecord,
    column: usize,
    name: &str,
    line: usize,
) -> Result<&'a str, MergeError> {
    record.get(column).map(str::trim).ok_or_else(|| {
        MergeError::MalformedTable(format!("line {line}: missing value for '{name}'"))
    })
}

fn parse_integer(value: &str, column: &str, line: usize) -> Result<i64, MergeError> {
    if let Ok(parsed) = value.parse::<i64>() {
        return Ok(parsed);
    }
    // dataframe exports sometimes write integral columns as "12.0"
    match value.parse::<f64>() {
        Ok(parsed) if parsed.fract() == 0.0 && parsed.is_finite() => Ok(parsed as i64),
        _ => Err(MergeError::MalformedTable(format!(
            "line {line}: '{value}' in column '{column}' is not an integer"
        ))),
    }
}

fn parse_float(value: &str, column: &str, line: usize) -> Result<f64, MergeError> {
    value.parse::<f64>().map_err(|_| {
        MergeError::MalformedTable(format!(
            "line {line}: '{value}' in column '{column}' is not a number"
        ))
    })
}

/// Stem used to locate a file's MGF: everything before the first `.`.
pub fn filename_stem(filename: &str) -> &str {
    filename.split('.').next().unwrap_or(filename)
}
