//! Line-level view of the MGF grammar.
//!
//! Nothing here builds spectra. The pipeline only needs to recognize record
//! boundaries and the `SCANS=` line, and copy every other byte through.

use std::io::{BufRead, Write};
use std::path::Path;

use crate::error::MergeError;
use crate::table::CorrelationRow;

pub const BEGIN_IONS: &str = "BEGIN IONS";
pub const END_IONS: &str = "END IONS";
pub const SCAN_PREFIX: &str = "SCANS";
pub const PROVENANCE_PREFIX: &str = "MASSQL_";

/// Injected keys, in the order they are written.
pub const PROVENANCE_KEYS: [&str; 7] = [
    "MASSQL_ORIGIN",
    "MASSQL_PEPMASS",
    "MASSQL_ORIGINAL_PATH",
    "MASSQL_SCAN",
    "MASSQL_NEW_SCAN",
    "MASSQL_NEW_FILENAME",
    "MASSQL_I",
];

/// Classification of one physical line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Begin,
    End,
    Scan,
    Provenance,
    Other,
}

/// Strips the line terminator (`\n` or `\r\n`) from a raw line.
pub fn line_content(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.strip_suffix(b"\r").unwrap_or(raw)
}

/// The terminator of a raw line, empty for a final unterminated line.
pub fn line_ending(raw: &[u8]) -> &[u8] {
    let content = line_content(raw);
    &raw[content.len()..]
}

pub fn classify(raw: &[u8]) -> LineKind {
    let content = line_content(raw);
    let trimmed = content.trim_ascii();
    if trimmed == BEGIN_IONS.as_bytes() {
        LineKind::Begin
    } else if trimmed == END_IONS.as_bytes() {
        LineKind::End
    } else if content.starts_with(SCAN_PREFIX.as_bytes()) {
        LineKind::Scan
    } else if content.starts_with(PROVENANCE_PREFIX.as_bytes()) {
        LineKind::Provenance
    } else {
        LineKind::Other
    }
}

/// Parses the integer of a `SCANS=<int>` line: split on the first `=` and
/// trim whitespace around the value.
pub fn parse_scan(raw: &[u8]) -> Result<i64, String> {
    let content = String::from_utf8_lossy(line_content(raw));
    let (_, value) = content
        .split_once('=')
        .ok_or_else(|| format!("scan line without '=': {content}"))?;
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| format!("scan value is not an integer: {}", value.trim()))
}

/// Reads one raw line including its terminator. Returns `false` at end of input.
pub fn read_raw_line<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    source: &Path,
) -> Result<bool, MergeError> {
    buf.clear();
    let read = reader
        .read_until(b'\n', buf)
        .map_err(|err| MergeError::Filesystem(format!("read {}: {err}", source.display())))?;
    Ok(read > 0)
}

pub fn write_raw<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), MergeError> {
    writer
        .write_all(bytes)
        .map_err(|err| MergeError::Filesystem(err.to_string()))
}

/// Provenance lines derived from one correlation row.
#[derive(Debug, Clone, Copy)]
pub struct ProvenanceBlock<'a> {
    row: &'a CorrelationRow,
}

impl<'a> ProvenanceBlock<'a> {
    pub fn new(row: &'a CorrelationRow) -> Self {
        Self { row }
    }

    pub fn entries(&self) -> [(&'static str, String); 7] {
        let row = self.row;
        [
            (PROVENANCE_KEYS[0], row.origin_label.clone()),
            (PROVENANCE_KEYS[1], row.precursor_mz_text.clone()),
            (PROVENANCE_KEYS[2], row.original_path.clone()),
            (PROVENANCE_KEYS[3], row.original_scan.to_string()),
            (PROVENANCE_KEYS[4], row.new_scan.to_string()),
            (PROVENANCE_KEYS[5], row.new_filename.clone()),
            (PROVENANCE_KEYS[6], row.intensity_text.clone()),
        ]
    }

    /// Each line ends with `ending`, or `\n` when `ending` is empty.
    pub fn write_to<W: Write>(&self, writer: &mut W, ending: &[u8]) -> Result<(), MergeError> {
        let ending = if ending.is_empty() { b"\n".as_slice() } else { ending };
        for (key, value) in self.entries() {
            write!(writer, "{key}={value}")
                .map_err(|err| MergeError::Filesystem(err.to_string()))?;
            write_raw(writer, ending)?;
        }
        Ok(())
    }
}

/// Collects the values of every `KEYWORD=value` line, skipping blank lines.
pub fn extract_keyword_values<R: BufRead>(
    mut reader: R,
    keyword: &str,
    case_sensitive: bool,
    source: &Path,
) -> Result<Vec<String>, MergeError> {
    let needle = if case_sensitive {
        format!("{keyword}=")
    } else {
        format!("{}=", keyword.to_uppercase())
    };

    let mut values = Vec::new();
    let mut buf = Vec::new();
    while read_raw_line(&mut reader, &mut buf, source)? {
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let matches = if case_sensitive {
            line.starts_with(&needle)
        } else {
            line.to_uppercase().starts_with(&needle)
        };
        if matches {
            if let Some((_, value)) = line.split_once('=') {
                values.push(value.to_string());
            }
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_lines() {
        assert_eq!(classify(b"BEGIN IONS\n"), LineKind::Begin);
        assert_eq!(classify(b"END IONS\r\n"), LineKind::End);
        assert_eq!(classify(b"SCANS=12\n"), LineKind::Scan);
        assert_eq!(classify(b"MASSQL_ORIGIN=x\n"), LineKind::Provenance);
        assert_eq!(classify(b"101.5 20\n"), LineKind::Other);
        assert_eq!(classify(b"TITLE=SCANS inside\n"), LineKind::Other);
    }

    #[test]
    fn parse_scan_trims_value() {
        assert_eq!(parse_scan(b"SCANS= 42 \r\n"), Ok(42));
        assert!(parse_scan(b"SCANS=abc\n").is_err());
        assert!(parse_scan(b"SCANS\n").is_err());
    }

    #[test]
    fn line_ending_is_preserved() {
        assert_eq!(line_ending(b"SCANS=1\r\n"), b"\r\n");
        assert_eq!(line_ending(b"SCANS=1"), b"");
    }

    #[test]
    fn provenance_block_order() {
        let row = CorrelationRow {
            origin_label: "workbench".to_string(),
            original_path: "ST001/x.mzML".to_string(),
            original_scan: 1234,
            new_scan: 5,
            new_filename: "a.mzML".to_string(),
            precursor_mz: 162.1125,
            intensity: 5000.0,
            precursor_mz_text: "162.1125".to_string(),
            intensity_text: "5000.0".to_string(),
        };
        let mut out = Vec::new();
        ProvenanceBlock::new(&row).write_to(&mut out, b"\n").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "MASSQL_ORIGIN=workbench\n\
             MASSQL_PEPMASS=162.1125\n\
             MASSQL_ORIGINAL_PATH=ST001/x.mzML\n\
             MASSQL_SCAN=1234\n\
             MASSQL_NEW_SCAN=5\n\
             MASSQL_NEW_FILENAME=a.mzML\n\
             MASSQL_I=5000.0\n"
        );
    }

    #[test]
    fn keyword_values() {
        let data = "BEGIN IONS\nTITLE=first\n\nSCANS=1\ntitle=second\nEND IONS\n";
        let path = Path::new("mem.mgf");
        let any_case = extract_keyword_values(data.as_bytes(), "title", false, path).unwrap();
        assert_eq!(any_case, vec!["first", "second"]);
        let exact = extract_keyword_values(data.as_bytes(), "TITLE", true, path).unwrap();
        assert_eq!(exact, vec!["first"]);
    }
}
