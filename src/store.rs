use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::TaskId;
use crate::error::MergeError;

/// On-disk layout: a per-run work root and a shared archive cache.
#[derive(Debug, Clone)]
pub struct Store {
    work_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new(work_dir: &Path) -> Result<Self, MergeError> {
        let work_dir = if work_dir.is_absolute() {
            work_dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|err| MergeError::Filesystem(err.to_string()))?
                .join(work_dir)
        };
        let work_root = Utf8PathBuf::from_path_buf(work_dir)
            .map_err(|_| MergeError::Filesystem("invalid work directory path".to_string()))?;

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("massql-mgf-merge"))
                    .ok()
            })
            .ok_or_else(|| {
                MergeError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            work_root,
            cache_root,
        })
    }

    pub fn new_with_paths(work_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            work_root,
            cache_root,
        }
    }

    pub fn project_archive_path(&self, task: &TaskId) -> Utf8PathBuf {
        self.work_root
            .join("archives")
            .join(format!("{}.tar", task.as_str()))
    }

    pub fn cache_archive_path(&self, task: &TaskId) -> Utf8PathBuf {
        self.cache_root
            .join("archives")
            .join(format!("{}.tar", task.as_str()))
    }

    pub fn job_dir(&self, task: &TaskId) -> Utf8PathBuf {
        self.work_root.join(task.as_str())
    }

    pub fn extract_dir(&self, task: &TaskId) -> Utf8PathBuf {
        self.job_dir(task).join("extracted")
    }

    pub fn table_path(&self, task: &TaskId) -> Utf8PathBuf {
        self.job_dir(task)
            .join(format!("extracted_{}.tsv", task.as_str()))
    }

    pub fn processed_path(&self, task: &TaskId, stem: &str) -> Utf8PathBuf {
        self.job_dir(task).join(format!("processed_{stem}.mgf"))
    }

    pub fn concatenated_path(&self) -> Utf8PathBuf {
        self.work_root.join("all_concatenated.mgf")
    }

    pub fn ensure_work_root(&self) -> Result<(), MergeError> {
        fs::create_dir_all(self.work_root.as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))
    }

    pub fn ensure_cache_root(&self) -> Result<(), MergeError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    /// Removes a directory tree if present, then recreates it empty.
    pub fn reset_dir(path: &Utf8Path) -> Result<(), MergeError> {
        if path.as_std_path().exists() {
            fs::remove_dir_all(path.as_std_path())
                .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        }
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))
    }

    pub fn write_metadata(path: &Utf8Path, metadata: &ArchiveMetadata) -> Result<(), MergeError> {
        let content = serde_json::to_vec_pretty(metadata)
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        Self::write_atomic(path.as_std_path(), |out| {
            out.write_all(&content)
                .map_err(|err| MergeError::Filesystem(err.to_string()))
        })
    }

    pub fn read_metadata(path: &Utf8Path) -> Result<Option<ArchiveMetadata>, MergeError> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| MergeError::Filesystem(err.to_string()))
    }

    /// Runs `fill` against a temporary file next to `dest` and moves it into
    /// place only when `fill` succeeds. Readers never observe a partial file.
    pub fn write_atomic<T, F>(dest: &Path, fill: F) -> Result<T, MergeError>
    where
        F: FnOnce(&mut BufWriter<fs::File>) -> Result<T, MergeError>,
    {
        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir().map_err(|err| MergeError::Filesystem(err.to_string()))?,
        };
        fs::create_dir_all(&parent).map_err(|err| MergeError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".massql-merge")
            .tempfile_in(&parent)
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        let file = temp
            .reopen()
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        let mut writer = BufWriter::new(file);
        let value = fill(&mut writer)?;
        writer
            .flush()
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        temp.persist(dest)
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        Ok(value)
    }

    pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), MergeError> {
        let mut input = fs::File::open(source.as_std_path())
            .map_err(|err| MergeError::Filesystem(format!("open {source}: {err}")))?;
        Self::write_atomic(dest.as_std_path(), |out| {
            std::io::copy(&mut input, out)
                .map(|_| ())
                .map_err(|err| MergeError::Filesystem(err.to_string()))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub source: String,
    pub task: String,
    pub label: String,
    pub fetched_at: String,
    pub tool: String,
    pub resolved_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new_with_paths(
            Utf8PathBuf::from("/work"),
            Utf8PathBuf::from("/cache"),
        );
        let task: TaskId = "2e50af7f1cfc42c391a5fe2eb7b06de7".parse().unwrap();

        assert!(
            store
                .project_archive_path(&task)
                .ends_with("archives/2e50af7f1cfc42c391a5fe2eb7b06de7.tar")
        );
        assert!(store.cache_archive_path(&task).starts_with("/cache"));
        assert!(
            store
                .processed_path(&task, "sample")
                .ends_with("2e50af7f1cfc42c391a5fe2eb7b06de7/processed_sample.mgf")
        );
        assert_eq!(
            store.concatenated_path(),
            Utf8PathBuf::from("/work/all_concatenated.mgf")
        );
    }

    #[test]
    fn failed_atomic_write_leaves_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out.mgf");
        let result: Result<(), MergeError> = Store::write_atomic(&dest, |out| {
            out.write_all(b"BEGIN IONS\n").unwrap();
            Err(MergeError::NoSurvivingJobs)
        });
        assert!(result.is_err());
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
