use std::time::Instant;

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::domain::Job;
use crate::error::MergeError;
use crate::gnps::Gnps2Client;
use crate::pipeline::{ProgressEvent, ProgressSink};
use crate::store::{ArchiveMetadata, Store};

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub force: bool,
    pub no_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchAction {
    Project,
    Cache,
    Download,
}

impl FetchAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchAction::Project => "project",
            FetchAction::Cache => "cache",
            FetchAction::Download => "download",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedArchive {
    pub path: Utf8PathBuf,
    pub action: FetchAction,
}

/// Brings a job's packaged output to local disk. Idempotent: an archive
/// already in the work root or the shared cache is reused.
pub struct ArchiveFetcher<'a, G: Gnps2Client> {
    store: &'a Store,
    client: &'a G,
}

impl<'a, G: Gnps2Client> ArchiveFetcher<'a, G> {
    pub fn new(store: &'a Store, client: &'a G) -> Self {
        Self { store, client }
    }

    pub fn fetch_archive(
        &self,
        job: &Job,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FetchedArchive, MergeError> {
        let project_path = self.store.project_archive_path(&job.task);
        let cache_path = self.store.cache_archive_path(&job.task);

        if !options.force && self.store.exists(&project_path) {
            info!(job = %job.label, path = %project_path, "archive already present, skipping download");
            sink.event(ProgressEvent::new(format!(
                "phase=Fetch; {} already in work directory",
                job.label
            )));
            return Ok(FetchedArchive {
                path: project_path,
                action: FetchAction::Project,
            });
        }

        if !options.force && self.store.exists(&cache_path) {
            info!(job = %job.label, path = %cache_path, "using cached archive");
            sink.event(ProgressEvent::new(format!(
                "phase=Fetch; {} using cached archive",
                job.label
            )));
            Store::copy_file_atomic(&cache_path, &project_path)?;
            return Ok(FetchedArchive {
                path: project_path,
                action: FetchAction::Cache,
            });
        }

        self.store.ensure_work_root()?;
        let parent = project_path
            .parent()
            .ok_or_else(|| MergeError::Filesystem("invalid archive path".to_string()))?;
        std::fs::create_dir_all(parent.as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".massql-merge-archive")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;

        sink.event(ProgressEvent::new(format!(
            "gnps2.request task={}",
            job.task
        )));
        let start = Instant::now();
        self.client.download_task_archive(&job.task, temp.path())?;
        let elapsed = start.elapsed();
        sink.event(ProgressEvent {
            message: format!("gnps2.response latency_ms={}", elapsed.as_millis()),
            elapsed: Some(elapsed),
        });

        temp.persist(project_path.as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        info!(job = %job.label, path = %project_path, "archive downloaded");

        let source = self.client.archive_url(&job.task);
        Store::write_metadata(
            &project_path.with_extension("json"),
            &build_metadata(job, &source, project_path.as_str()),
        )?;

        if !options.no_cache {
            self.store.ensure_cache_root()?;
            Store::copy_file_atomic(&project_path, &cache_path)?;
            Store::write_metadata(
                &cache_path.with_extension("json"),
                &build_metadata(job, &source, cache_path.as_str()),
            )?;
        }

        Ok(FetchedArchive {
            path: project_path,
            action: FetchAction::Download,
        })
    }

    /// Fetches the correlation table stored at `member` inside the job's
    /// results, skipping the request when a local copy exists.
    pub fn fetch_table(
        &self,
        job: &Job,
        member: &str,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Utf8PathBuf, MergeError> {
        let table_path = self.store.table_path(&job.task);
        if !options.force && self.store.exists(&table_path) {
            info!(job = %job.label, path = %table_path, "correlation table already present");
            return Ok(table_path);
        }

        sink.event(ProgressEvent::new(format!(
            "phase=Fetch; {} correlation table",
            job.label
        )));
        let parent = table_path
            .parent()
            .ok_or_else(|| MergeError::Filesystem("invalid table path".to_string()))?;
        std::fs::create_dir_all(parent.as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".massql-merge-table")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        self.client
            .download_result_file(&job.task, member, temp.path())?;
        temp.persist(table_path.as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        info!(job = %job.label, path = %table_path, "correlation table downloaded");
        Ok(table_path)
    }
}

fn build_metadata(job: &Job, source: &str, path: &str) -> ArchiveMetadata {
    ArchiveMetadata {
        source: source.to_string(),
        task: job.task.to_string(),
        label: job.label.to_string(),
        fetched_at: chrono::Utc::now().to_rfc3339(),
        tool: format!("massql-merge/{}", env!("CARGO_PKG_VERSION")),
        resolved_path: path.to_string(),
    }
}
