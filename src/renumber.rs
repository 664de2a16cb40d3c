use std::io::{BufRead, Write};
use std::path::Path;

use crate::error::MergeError;
use crate::mgf::{self, LineKind, SCAN_PREFIX};

/// Hands out scan identifiers 1, 2, 3, ... in order.
#[derive(Debug, Clone)]
pub struct ScanSequence {
    next: u64,
}

impl Default for ScanSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanSequence {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_scan(&mut self) -> u64 {
        let scan = self.next;
        self.next += 1;
        scan
    }

    /// How many identifiers have been handed out.
    pub fn issued(&self) -> u64 {
        self.next - 1
    }
}

pub struct MgfRenumberer;

impl MgfRenumberer {
    /// Rewrites every `SCANS` line to `SCANS=<n>` using `sequence`; all other
    /// lines pass through unchanged. Returns the number of lines rewritten.
    pub fn renumber<R: BufRead, W: Write>(
        mut reader: R,
        writer: &mut W,
        sequence: &mut ScanSequence,
        source: &Path,
    ) -> Result<u64, MergeError> {
        let mut buf = Vec::new();
        let mut rewritten = 0;
        while mgf::read_raw_line(&mut reader, &mut buf, source)? {
            if mgf::classify(&buf) == LineKind::Scan {
                let ending = mgf::line_ending(&buf);
                write!(writer, "{SCAN_PREFIX}={}", sequence.next_scan())
                    .map_err(|err| MergeError::Filesystem(err.to_string()))?;
                mgf::write_raw(writer, ending)?;
                rewritten += 1;
            } else {
                mgf::write_raw(writer, &buf)?;
            }
        }
        Ok(rewritten)
    }
}
