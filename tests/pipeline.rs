use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use massql_mgf_merge::config::{ConfigLoader, JobEntry, ResolvedConfig};
use massql_mgf_merge::domain::{JobState, TaskId};
use massql_mgf_merge::error::MergeError;
use massql_mgf_merge::fetch::FetchOptions;
use massql_mgf_merge::gnps::Gnps2Client;
use massql_mgf_merge::output::JsonOutput;
use massql_mgf_merge::pipeline::Pipeline;
use massql_mgf_merge::store::Store;

const TASK_A: &str = "2e50af7f1cfc42c391a5fe2eb7b06de7";
const TASK_B: &str = "9980bbf19ae54657a2d3d881475745fe";
const TASK_C: &str = "1a998a6fa2c2475695f0111039c09515";
const PREFIX: &str = "nf_output/extracted/extracted_mgf";

struct MockTask {
    table: String,
    members: Vec<(String, String)>,
}

#[derive(Default)]
struct MockGnps2 {
    tasks: HashMap<String, MockTask>,
    archive_calls: Mutex<usize>,
}

impl MockGnps2 {
    fn with_task(mut self, task: &str, table: &str, members: Vec<(String, String)>) -> Self {
        self.tasks.insert(
            task.to_string(),
            MockTask {
                table: table.to_string(),
                members,
            },
        );
        self
    }
}

impl Gnps2Client for MockGnps2 {
    fn download_task_archive(&self, task: &TaskId, destination: &Path) -> Result<(), MergeError> {
        *self.archive_calls.lock().unwrap() += 1;
        let Some(mock) = self.tasks.get(task.as_str()) else {
            return Err(MergeError::Gnps2Status {
                status: 404,
                message: "task not found".to_string(),
            });
        };
        let file = std::fs::File::create(destination).unwrap();
        let mut builder = tar::Builder::new(file);
        for (name, body) in &mock.members {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, body.as_bytes())
                .unwrap();
        }
        builder.finish().unwrap();
        Ok(())
    }

    fn download_result_file(
        &self,
        task: &TaskId,
        _member: &str,
        destination: &Path,
    ) -> Result<(), MergeError> {
        let mock = self.tasks.get(task.as_str()).ok_or(MergeError::Gnps2Status {
            status: 404,
            message: "task not found".to_string(),
        })?;
        std::fs::write(destination, &mock.table).unwrap();
        Ok(())
    }

    fn archive_url(&self, task: &TaskId) -> String {
        format!("mock://taskzip/{task}")
    }
}

const HEADER: &str = "new_filename\tnew_scan\tscan\toriginal_path\tprecmz\ti\n";

fn record(scan: u32) -> String {
    format!("BEGIN IONS\nPEPMASS=162.11\nCHARGE=1\nSCANS={scan}\n60.08 100\n85.03 40\nEND IONS\n")
}

fn mgf_member(stem: &str, body: &str) -> (String, String) {
    (format!("{PREFIX}/{stem}.mgf"), body.to_string())
}

fn mock_client() -> MockGnps2 {
    let table_a = format!(
        "{HEADER}a.mzML\t1\t1001\tMSV1/a.mzML\t162.1125\t5000.0\n\
         a.mzML\t2\t1002\tMSV1/a.mzML\t204.1230\t120.5\n"
    );
    let table_b = format!(
        "{HEADER}b1.mzML\t1\t11\tST2/b1.mzML\t162.1125\t10\n\
         b1.mzML\t2\t12\tST2/b1.mzML\t218.1387\t20\n\
         b2.mzML\t3\t31\tST2/b2.mzML\t232.1543\t30\n"
    );
    let mgf_a = format!("{}{}", record(1), record(2));
    let mgf_b1 = format!("{}{}", record(1), record(2));
    let mgf_b2 = record(3);
    MockGnps2::default()
        .with_task(
            TASK_A,
            &table_a,
            vec![
                mgf_member("a", &mgf_a),
                (
                    "nf_output/extracted/extracted.tsv".to_string(),
                    table_a.clone(),
                ),
            ],
        )
        .with_task(
            TASK_B,
            &table_b,
            vec![mgf_member("b1", &mgf_b1), mgf_member("b2", &mgf_b2)],
        )
}

fn config(root: &Path, jobs: &[String]) -> ResolvedConfig {
    let config = massql_mgf_merge::config::Config {
        schema_version: Some(1),
        jobs: jobs
            .iter()
            .map(|job| JobEntry::Shorthand(job.clone()))
            .collect(),
        output: Some(root.join("final").join("renumbered.mgf")),
        work_dir: Some(root.join("work")),
        extract_prefix: None,
        table_member: None,
        timeout_secs: None,
    };
    ConfigLoader::resolve_config(config).unwrap()
}

fn pipeline(root: &Path, client: MockGnps2) -> Pipeline<MockGnps2> {
    let store = Store::new_with_paths(
        Utf8PathBuf::from_path_buf(root.join("work")).unwrap(),
        Utf8PathBuf::from_path_buf(root.join("cache")).unwrap(),
    );
    Pipeline::new(store, client)
}

fn values(text: &str, key: &str) -> Vec<String> {
    let prefix = format!("{key}=");
    text.lines()
        .filter_map(|line| line.strip_prefix(&prefix))
        .map(str::to_string)
        .collect()
}

#[test]
fn two_jobs_merge_into_one_renumbered_stream() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(
        temp.path(),
        &[format!("jobA:{TASK_A}"), format!("jobB:{TASK_B}")],
    );
    let pipeline = pipeline(temp.path(), mock_client());

    let report = pipeline
        .run(&config, FetchOptions::default(), &JsonOutput)
        .unwrap();

    assert!(report.jobs.iter().all(|job| job.state == JobState::Done));
    assert_eq!(report.outcome.merge.records, 5);
    assert_eq!(report.outcome.scans, 5);

    let merged = std::fs::read_to_string(&config.output).unwrap();
    assert_eq!(merged.matches("BEGIN IONS").count(), 5);
    assert_eq!(values(&merged, "SCANS"), vec!["1", "2", "3", "4", "5"]);
    assert_eq!(
        values(&merged, "MASSQL_ORIGIN"),
        vec!["jobA", "jobA", "jobB", "jobB", "jobB"]
    );
    assert_eq!(
        values(&merged, "MASSQL_NEW_SCAN"),
        vec!["1", "2", "1", "2", "3"]
    );
    assert_eq!(
        values(&merged, "MASSQL_NEW_FILENAME"),
        vec!["a.mzML", "a.mzML", "b1.mzML", "b1.mzML", "b2.mzML"]
    );
    assert_eq!(values(&merged, "MASSQL_SCAN")[2], "11");
    assert_eq!(values(&merged, "MASSQL_I")[0], "5000.0");
    assert_eq!(values(&merged, "MASSQL_PEPMASS")[1], "204.1230");

    // the concatenated intermediate keeps the per-file scan numbers
    let concatenated = std::fs::read_to_string(&report.outcome.concatenated).unwrap();
    assert_eq!(values(&concatenated, "SCANS"), vec!["1", "2", "1", "2", "3"]);
}

#[test]
fn failed_job_is_excluded_from_merge() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(
        temp.path(),
        &[format!("missing:{TASK_C}"), format!("jobB:{TASK_B}")],
    );
    let pipeline = pipeline(temp.path(), mock_client());

    let report = pipeline
        .run(&config, FetchOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(report.jobs[0].state, JobState::Error);
    assert_eq!(report.jobs[0].failed_in, Some(JobState::Fetching));
    assert!(report.jobs[0].error.as_deref().unwrap().contains("404"));
    assert_eq!(report.jobs[1].state, JobState::Done);

    let merged = std::fs::read_to_string(&config.output).unwrap();
    assert_eq!(values(&merged, "SCANS"), vec!["1", "2", "3"]);
    assert!(values(&merged, "MASSQL_ORIGIN").iter().all(|o| o == "jobB"));
}

#[test]
fn no_surviving_jobs_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path(), &[format!("missing:{TASK_C}")]);
    let pipeline = pipeline(temp.path(), mock_client());

    let err = pipeline
        .run(&config, FetchOptions::default(), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, MergeError::NoSurvivingJobs);
    assert!(!config.output.exists());
}

#[test]
fn malformed_mgf_fails_only_its_job() {
    let temp = tempfile::tempdir().unwrap();
    let table = format!("{HEADER}bad.mzML\t1\t1\tp\t1.0\t1.0\n");
    let client = mock_client().with_task(
        TASK_C,
        &table,
        vec![mgf_member("bad", "BEGIN IONS\nSCANS=one\nEND IONS\n")],
    );
    let config = config(
        temp.path(),
        &[format!("jobA:{TASK_A}"), format!("bad:{TASK_C}")],
    );
    let report = pipeline(temp.path(), client)
        .run(&config, FetchOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(report.jobs[1].failed_in, Some(JobState::Annotating));
    assert!(report.jobs[1].processed_files.is_empty());
    assert_eq!(report.outcome.scans, 2);
}

#[test]
fn filenames_sharing_an_mgf_stem_fail_the_job() {
    let temp = tempfile::tempdir().unwrap();
    let table = format!(
        "{HEADER}s.mzML\t1\t10\tp/s.mzML\t100.0\t1\n\
         s.mzXML\t2\t20\tp/s.mzXML\t200.0\t2\n"
    );
    let client = mock_client().with_task(
        TASK_C,
        &table,
        vec![mgf_member("s", &format!("{}{}", record(1), record(2)))],
    );
    let config = config(
        temp.path(),
        &[format!("jobA:{TASK_A}"), format!("shared:{TASK_C}")],
    );
    let report = pipeline(temp.path(), client)
        .run(&config, FetchOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(report.jobs[1].state, JobState::Error);
    assert_eq!(report.jobs[1].failed_in, Some(JobState::TableLoaded));
    assert!(report.jobs[1].error.as_deref().unwrap().contains("'s'"));
    assert_eq!(report.outcome.merge.records, 2);

    let merged = std::fs::read_to_string(&config.output).unwrap();
    assert_eq!(merged.matches("BEGIN IONS").count(), 2);
    assert_eq!(values(&merged, "SCANS"), vec!["1", "2"]);
}

#[test]
fn rerun_reuses_archives_and_is_stable() {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path(), &[format!("jobA:{TASK_A}")]);
    let pipeline = pipeline(temp.path(), mock_client());

    pipeline
        .run(&config, FetchOptions::default(), &JsonOutput)
        .unwrap();
    let first = std::fs::read_to_string(&config.output).unwrap();
    let report = pipeline
        .run(&config, FetchOptions::default(), &JsonOutput)
        .unwrap();
    let second = std::fs::read_to_string(&config.output).unwrap();

    assert_eq!(first, second);
    assert_eq!(values(&second, "MASSQL_NEW_SCAN").len(), 2);
    assert_eq!(report.jobs[0].archive_action.as_deref(), Some("project"));
}
