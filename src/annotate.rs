use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::MergeError;
use crate::mgf::{self, LineKind, ProvenanceBlock};
use crate::store::Store;
use crate::table::CorrelationTable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationStats {
    pub records: usize,
    pub annotated: usize,
    pub unmatched: usize,
    pub already_annotated: usize,
}

impl AnnotationStats {
    pub fn absorb(&mut self, other: AnnotationStats) {
        self.records += other.records;
        self.annotated += other.annotated;
        self.unmatched += other.unmatched;
        self.already_annotated += other.already_annotated;
    }
}

/// Injects provenance lines ahead of each matched `SCANS=` line of one MGF
/// file. Output is a new stream; the input is never modified.
pub struct MgfAnnotator<'a> {
    table: &'a CorrelationTable,
    filename: &'a str,
}

#[derive(Default)]
struct RecordState {
    open: bool,
    scan_seen: bool,
    has_provenance: bool,
}

impl<'a> MgfAnnotator<'a> {
    /// `filename` is the `new_filename` the MGF was produced for.
    pub fn new(table: &'a CorrelationTable, filename: &'a str) -> Self {
        Self { table, filename }
    }

    pub fn annotate_file(&self, source: &Path, destination: &Path) -> Result<AnnotationStats, MergeError> {
        let file = File::open(source)
            .map_err(|err| MergeError::Filesystem(format!("open {}: {err}", source.display())))?;
        let reader = BufReader::new(file);
        Store::write_atomic(destination, |out| self.annotate(reader, out, source))
    }

    /// `source` only labels errors.
    pub fn annotate<R: BufRead, W: Write>(
        &self,
        mut reader: R,
        writer: &mut W,
        source: &Path,
    ) -> Result<AnnotationStats, MergeError> {
        let malformed = |line: usize, message: String| MergeError::MalformedRecord {
            path: PathBuf::from(source),
            line,
            message,
        };

        let mut stats = AnnotationStats::default();
        let mut record = RecordState::default();
        let mut buf = Vec::new();
        let mut line_no = 0usize;

        while mgf::read_raw_line(&mut reader, &mut buf, source)? {
            line_no += 1;
            match mgf::classify(&buf) {
                LineKind::Begin => {
                    if record.open {
                        return Err(malformed(
                            line_no,
                            "BEGIN IONS before END IONS of the previous record".to_string(),
                        ));
                    }
                    record = RecordState {
                        open: true,
                        ..RecordState::default()
                    };
                    stats.records += 1;
                }
                LineKind::End => {
                    if !record.open {
                        return Err(malformed(line_no, "END IONS outside a record".to_string()));
                    }
                    if !record.scan_seen {
                        return Err(malformed(line_no, "record has no SCANS line".to_string()));
                    }
                    record.open = false;
                }
                LineKind::Scan => {
                    if !record.open {
                        return Err(malformed(line_no, "SCANS line outside a record".to_string()));
                    }
                    if record.scan_seen {
                        return Err(malformed(line_no, "second SCANS line in record".to_string()));
                    }
                    record.scan_seen = true;
                    let scan = mgf::parse_scan(&buf).map_err(|message| malformed(line_no, message))?;

                    if record.has_provenance {
                        stats.already_annotated += 1;
                    } else if let Some(row) = self.table.lookup(self.filename, scan) {
                        ProvenanceBlock::new(row).write_to(writer, mgf::line_ending(&buf))?;
                        stats.annotated += 1;
                    } else {
                        debug!(filename = self.filename, scan, "no correlation row for scan");
                        stats.unmatched += 1;
                    }
                }
                LineKind::Provenance => {
                    if record.open && !record.scan_seen {
                        record.has_provenance = true;
                    }
                }
                LineKind::Other => {}
            }
            mgf::write_raw(writer, &buf)?;
        }

        if record.open {
            return Err(malformed(line_no, "missing END IONS at end of file".to_string()));
        }
        Ok(stats)
    }
}
