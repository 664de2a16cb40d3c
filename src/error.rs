use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MergeError {
    #[error("invalid job specifier: {0}")]
    InvalidSpecifier(String),

    #[error("invalid GNPS2 task id: {0}")]
    InvalidTaskId(String),

    #[error("invalid job label: {0}")]
    InvalidJobLabel(String),

    #[error("duplicate job in configuration: {0}")]
    DuplicateJob(String),

    #[error("missing config file massql-merge.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("GNPS2 request failed: {0}")]
    Gnps2Http(String),

    #[error("GNPS2 returned status {status}: {message}")]
    Gnps2Status { status: u16, message: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("no archive members under '{prefix}' in {archive}")]
    NothingExtracted { archive: PathBuf, prefix: String },

    #[error("malformed correlation table: {0}")]
    MalformedTable(String),

    #[error("malformed MGF record in {path} at line {line}: {message}")]
    #[diagnostic(help("each record needs BEGIN IONS, one SCANS=<int> line and END IONS"))]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("no job completed annotation; nothing to merge")]
    NoSurvivingJobs,
}

impl MergeError {
    /// Fetch failures are the only ones a caller may sensibly retry.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            MergeError::Gnps2Http(_) | MergeError::Gnps2Status { .. }
        )
    }
}
