use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::MergeError;
use crate::mgf::{self, LineKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub files: usize,
    pub records: usize,
}

/// Concatenates MGF files in the given order with one blank line between
/// consecutive files. Records are copied verbatim.
pub struct MgfMerger;

impl MgfMerger {
    pub fn merge<W: Write>(inputs: &[PathBuf], writer: &mut W) -> Result<MergeStats, MergeError> {
        let mut stats = MergeStats::default();
        let mut ends_with_newline = true;
        let mut buf = Vec::new();

        for (index, path) in inputs.iter().enumerate() {
            if index > 0 {
                if !ends_with_newline {
                    mgf::write_raw(writer, b"\n")?;
                }
                mgf::write_raw(writer, b"\n")?;
                ends_with_newline = true;
            }

            let records = Self::copy_file(path, writer, &mut buf, &mut ends_with_newline)?;
            debug!(path = %path.display(), records, "merged file");
            stats.files += 1;
            stats.records += records;
        }
        Ok(stats)
    }

    fn copy_file<W: Write>(
        path: &Path,
        writer: &mut W,
        buf: &mut Vec<u8>,
        ends_with_newline: &mut bool,
    ) -> Result<usize, MergeError> {
        let file = File::open(path)
            .map_err(|err| MergeError::Filesystem(format!("open {}: {err}", path.display())))?;
        let mut reader = BufReader::new(file);
        let mut records = 0;
        while mgf::read_raw_line(&mut reader, buf, path)? {
            if mgf::classify(buf) == LineKind::Begin {
                records += 1;
            }
            mgf::write_raw(writer, buf)?;
            *ends_with_newline = buf.ends_with(b"\n");
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_files_with_blank_line() {
        let temp = tempfile::tempdir().unwrap();
        let first = temp.path().join("processed_a.mgf");
        let second = temp.path().join("processed_b.mgf");
        let third = temp.path().join("processed_c.mgf");
        std::fs::write(&first, "BEGIN IONS\nSCANS=1\nEND IONS").unwrap();
        std::fs::write(&second, "BEGIN IONS\nSCANS=1\nEND IONS\n").unwrap();
        std::fs::write(&third, "BEGIN IONS\nSCANS=2\nEND IONS\n").unwrap();

        let mut out = Vec::new();
        let stats = MgfMerger::merge(&[first, second, third], &mut out).unwrap();
        assert_eq!(stats, MergeStats { files: 3, records: 3 });
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "BEGIN IONS\nSCANS=1\nEND IONS\n\
             \n\
             BEGIN IONS\nSCANS=1\nEND IONS\n\
             \n\
             BEGIN IONS\nSCANS=2\nEND IONS\n"
        );
    }

    #[test]
    fn missing_input_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        assert!(MgfMerger::merge(&[temp.path().join("nope.mgf")], &mut out).is_err());
    }
}
