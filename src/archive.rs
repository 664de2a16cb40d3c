use std::fs;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::MergeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
    Zip,
}

/// Sniffs the container from its leading bytes; anything unrecognized is
/// treated as a plain tar, which has no reliable magic at offset zero.
pub fn detect_kind(path: &Path) -> Result<ArchiveKind, MergeError> {
    let mut file = fs::File::open(path)
        .map_err(|err| MergeError::Archive(format!("open {}: {err}", path.display())))?;
    let mut magic = [0u8; 4];
    let read = read_prefix(&mut file, &mut magic)
        .map_err(|err| MergeError::Archive(err.to_string()))?;
    let kind = match &magic[..read] {
        [0x1f, 0x8b, ..] => ArchiveKind::TarGz,
        [b'P', b'K', 0x03, 0x04] => ArchiveKind::Zip,
        _ => ArchiveKind::Tar,
    };
    Ok(kind)
}

fn read_prefix(file: &mut fs::File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(filled)
}

/// Extracts the members of `archive_path` whose path starts with `prefix`
/// into `target_dir`, keeping their full relative path. Returns the files
/// written, in archive order.
pub fn extract_prefix(
    archive_path: &Path,
    prefix: &str,
    target_dir: &Path,
) -> Result<Vec<PathBuf>, MergeError> {
    let prefix = prefix.trim_start_matches("./");
    fs::create_dir_all(target_dir).map_err(|err| MergeError::Filesystem(err.to_string()))?;

    let kind = detect_kind(archive_path)?;
    debug!(?kind, archive = %archive_path.display(), "extracting");
    let file = fs::File::open(archive_path)
        .map_err(|err| MergeError::Archive(format!("open {}: {err}", archive_path.display())))?;
    let extracted = match kind {
        ArchiveKind::Tar => extract_tar(BufReader::new(file), prefix, target_dir)?,
        ArchiveKind::TarGz => {
            extract_tar(GzDecoder::new(BufReader::new(file)), prefix, target_dir)?
        }
        ArchiveKind::Zip => extract_zip(file, prefix, target_dir)?,
    };

    if extracted.is_empty() {
        return Err(MergeError::NothingExtracted {
            archive: archive_path.to_path_buf(),
            prefix: prefix.to_string(),
        });
    }
    info!(
        files = extracted.len(),
        prefix,
        target = %target_dir.display(),
        "extracted archive members"
    );
    Ok(extracted)
}

fn extract_tar<R: Read>(
    reader: R,
    prefix: &str,
    target_dir: &Path,
) -> Result<Vec<PathBuf>, MergeError> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|err| MergeError::Archive(err.to_string()))?;

    let mut extracted = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|err| MergeError::Archive(err.to_string()))?;
        let member = entry
            .path()
            .map_err(|err| MergeError::Archive(err.to_string()))?
            .into_owned();
        if !member_matches(&member, prefix) {
            continue;
        }
        let Some(relative) = enclosed(&member) else {
            return Err(MergeError::Archive(format!(
                "tar entry path traversal detected: {}",
                member.display()
            )));
        };
        let destination = target_dir.join(&relative);
        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&destination)
                .map_err(|err| MergeError::Filesystem(err.to_string()))?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| MergeError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&destination)
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| MergeError::Archive(err.to_string()))?;
        extracted.push(destination);
    }
    Ok(extracted)
}

fn extract_zip(file: fs::File, prefix: &str, target_dir: &Path) -> Result<Vec<PathBuf>, MergeError> {
    let mut archive =
        ZipArchive::new(file).map_err(|err| MergeError::Archive(err.to_string()))?;

    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| MergeError::Archive(err.to_string()))?;
        if !member_matches(Path::new(entry.name()), prefix) {
            continue;
        }
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(MergeError::Archive(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| MergeError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| MergeError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| MergeError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| MergeError::Archive(err.to_string()))?;
        extracted.push(entry_path);
    }
    Ok(extracted)
}

/// Plain string prefix match on the member path, ignoring a leading `./`.
fn member_matches(member: &Path, prefix: &str) -> bool {
    let name = member.to_string_lossy();
    let name = name.trim_start_matches("./");
    name.starts_with(prefix)
}

fn enclosed(member: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in member.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}
