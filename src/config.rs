use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::Job;
use crate::error::MergeError;

pub const DEFAULT_CONFIG_FILE: &str = "massql-merge.json";
pub const DEFAULT_OUTPUT: &str = "final_mgf/renumbered_all_concatenated.mgf";
pub const DEFAULT_WORK_DIR: &str = "downloaded_content";
pub const DEFAULT_EXTRACT_PREFIX: &str = "nf_output/extracted/extracted_mgf";
pub const DEFAULT_TABLE_MEMBER: &str = "nf_output/extracted/extracted.tsv";
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub extract_prefix: Option<String>,
    #[serde(default)]
    pub table_member: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum JobEntry {
    Shorthand(String),
    Detailed(JobEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct JobEntryObject {
    pub label: String,
    pub task: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub jobs: Vec<Job>,
    pub output: PathBuf,
    pub work_dir: PathBuf,
    pub extract_prefix: String,
    pub table_member: String,
    pub timeout_secs: u64,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MergeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(MergeError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MergeError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MergeError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MergeError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let jobs = config
            .jobs
            .into_iter()
            .map(|entry| match entry {
                JobEntry::Shorthand(value) => value.parse::<Job>(),
                JobEntry::Detailed(obj) => Ok(Job {
                    label: obj.label.parse()?,
                    task: obj.task.parse()?,
                }),
            })
            .collect::<Result<Vec<_>, MergeError>>()?;

        let mut labels = HashSet::new();
        let mut tasks = HashSet::new();
        for job in &jobs {
            if !labels.insert(job.label.as_str()) {
                return Err(MergeError::DuplicateJob(job.label.to_string()));
            }
            if !tasks.insert(job.task.as_str()) {
                return Err(MergeError::DuplicateJob(job.task.to_string()));
            }
        }

        let extract_prefix = config
            .extract_prefix
            .unwrap_or_else(|| DEFAULT_EXTRACT_PREFIX.to_string())
            .trim_matches('/')
            .to_string();

        Ok(ResolvedConfig {
            schema_version,
            jobs,
            output: config
                .output
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            work_dir: config
                .work_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
            extract_prefix,
            table_member: config
                .table_member
                .unwrap_or_else(|| DEFAULT_TABLE_MEMBER.to_string()),
            timeout_secs: config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        })
    }
}
