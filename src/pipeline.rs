use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::annotate::{AnnotationStats, MgfAnnotator};
use crate::archive;
use crate::config::ResolvedConfig;
use crate::domain::{Job, JobState};
use crate::error::MergeError;
use crate::fetch::{ArchiveFetcher, FetchOptions};
use crate::gnps::Gnps2Client;
use crate::merge::{MergeStats, MgfMerger};
use crate::renumber::{MgfRenumberer, ScanSequence};
use crate::store::Store;
use crate::table::CorrelationTable;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Where one job ended up and what it produced.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub label: String,
    pub task: String,
    pub state: JobState,
    pub failed_in: Option<JobState>,
    pub error: Option<String>,
    pub archive_action: Option<String>,
    pub processed_files: Vec<PathBuf>,
    pub stats: AnnotationStats,
}

impl JobReport {
    fn new(job: &Job) -> Self {
        Self {
            label: job.label.to_string(),
            task: job.task.to_string(),
            state: JobState::Pending,
            failed_in: None,
            error: None,
            archive_action: None,
            processed_files: Vec::new(),
            stats: AnnotationStats::default(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == JobState::Done
    }

    fn enter(&mut self, next: JobState, sink: &dyn ProgressSink) {
        debug_assert_eq!(self.state.advance(), Some(next));
        self.state = next;
        info!(job = %self.label, state = %next, "job state");
        sink.event(ProgressEvent::new(format!(
            "phase={next}; {}",
            self.label
        )));
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub output: PathBuf,
    pub concatenated: PathBuf,
    pub merge: MergeStats,
    pub scans: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub jobs: Vec<JobReport>,
    pub outcome: MergeOutcome,
}

#[derive(Clone)]
pub struct Pipeline<G: Gnps2Client> {
    store: Store,
    client: G,
}

impl<G: Gnps2Client> Pipeline<G> {
    pub fn new(store: Store, client: G) -> Self {
        Self { store, client }
    }

    /// Full run: every job up to the merge barrier, then merge and renumber.
    pub fn run(
        &self,
        config: &ResolvedConfig,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, MergeError> {
        let jobs = self.process_jobs(config, options, sink);
        let outcome = self.merge_jobs(&jobs, &config.output, sink)?;
        Ok(RunReport { jobs, outcome })
    }

    /// Runs each job through fetch, extract, table load and annotation.
    /// A failing job is recorded and does not stop the others.
    pub fn process_jobs(
        &self,
        config: &ResolvedConfig,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Vec<JobReport> {
        config
            .jobs
            .iter()
            .map(|job| self.process_job(job, config, options, sink))
            .collect()
    }

    pub fn process_job(
        &self,
        job: &Job,
        config: &ResolvedConfig,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> JobReport {
        let mut report = JobReport::new(job);
        let start = Instant::now();
        match self.drive_job(job, config, options, sink, &mut report) {
            Ok(()) => {
                report.enter(JobState::Done, sink);
                sink.event(ProgressEvent {
                    message: format!(
                        "job {} done: {} records, {} annotated",
                        job.label, report.stats.records, report.stats.annotated
                    ),
                    elapsed: Some(start.elapsed()),
                });
            }
            Err(err) => {
                warn!(job = %job.label, state = %report.state, error = %err, "job failed");
                report.failed_in = Some(report.state);
                report.state = JobState::Error;
                report.error = Some(err.to_string());
                report.processed_files.clear();
            }
        }
        report
    }

    fn drive_job(
        &self,
        job: &Job,
        config: &ResolvedConfig,
        options: FetchOptions,
        sink: &dyn ProgressSink,
        report: &mut JobReport,
    ) -> Result<(), MergeError> {
        let fetcher = ArchiveFetcher::new(&self.store, &self.client);

        report.enter(JobState::Fetching, sink);
        let archive = fetcher.fetch_archive(job, options, sink)?;
        report.archive_action = Some(archive.action.as_str().to_string());

        report.enter(JobState::Extracting, sink);
        let extract_dir = self.store.extract_dir(&job.task);
        Store::reset_dir(&extract_dir)?;
        archive::extract_prefix(
            archive.path.as_std_path(),
            &config.extract_prefix,
            extract_dir.as_std_path(),
        )?;

        let table_path = fetcher.fetch_table(job, &config.table_member, options, sink)?;
        let table = CorrelationTable::from_tsv_file(table_path.as_std_path(), &job.label)?;
        report.enter(JobState::TableLoaded, sink);
        if table.is_empty() {
            warn!(job = %job.label, "correlation table has no rows");
        }

        let stems = table.mgf_stems()?;

        report.enter(JobState::Annotating, sink);
        let mgf_dir = extract_dir.as_std_path().join(&config.extract_prefix);
        for (filename, stem) in stems {
            let source = mgf_dir.join(format!("{stem}.mgf"));
            let destination = self.store.processed_path(&job.task, stem);
            let stats = MgfAnnotator::new(&table, filename)
                .annotate_file(&source, destination.as_std_path())?;
            info!(
                job = %job.label,
                file = %destination,
                records = stats.records,
                annotated = stats.annotated,
                unmatched = stats.unmatched,
                "annotated MGF"
            );
            report.stats.absorb(stats);
            report.processed_files.push(destination.into_std_path_buf());
        }
        Ok(())
    }

    /// Merge barrier: concatenates the processed files of every completed
    /// job in job order, then renumbers scans into `output`. Both files are
    /// written atomically.
    pub fn merge_jobs(
        &self,
        jobs: &[JobReport],
        output: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<MergeOutcome, MergeError> {
        let surviving: Vec<&JobReport> = jobs.iter().filter(|job| job.succeeded()).collect();
        if surviving.is_empty() {
            return Err(MergeError::NoSurvivingJobs);
        }
        let inputs: Vec<PathBuf> = surviving
            .iter()
            .flat_map(|job| job.processed_files.iter().cloned())
            .collect();

        sink.event(ProgressEvent::new(format!(
            "phase=Merge; {} files from {} jobs",
            inputs.len(),
            surviving.len()
        )));
        self.store.ensure_work_root()?;
        let concatenated = self.store.concatenated_path().into_std_path_buf();
        let merge = Store::write_atomic(&concatenated, |out| MgfMerger::merge(&inputs, out))?;
        info!(
            files = merge.files,
            records = merge.records,
            path = %concatenated.display(),
            "concatenated MGF files"
        );

        sink.event(ProgressEvent::new("phase=Renumber; assigning scan numbers"));
        let reader = BufReader::new(File::open(&concatenated).map_err(|err| {
            MergeError::Filesystem(format!("open {}: {err}", concatenated.display()))
        })?);
        let mut sequence = ScanSequence::new();
        let scans = Store::write_atomic(output, |out| {
            MgfRenumberer::renumber(reader, out, &mut sequence, &concatenated)
        })?;
        if scans != merge.records as u64 {
            warn!(scans, records = merge.records, "scan line count differs from record count");
        }
        info!(scans, path = %output.display(), "wrote renumbered MGF");

        Ok(MergeOutcome {
            output: output.to_path_buf(),
            concatenated,
            merge,
            scans,
        })
    }
}
