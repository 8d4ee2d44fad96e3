//! Filesystem helpers for task workers: unique names, chunked copies, size scans.

use filetime::FileTime;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;
use walkdir::WalkDir;

/// Copy buffer size; cancellation and pause requests are honored between chunks.
pub(super) const CHUNK_SIZE: usize = 1024 * 1024;

// ============================================================================
// Naming
// ============================================================================

/// Finds a free name by appending " (1)", " (2)", ... before the extension.
pub fn find_unique_name(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path.extension().map(|s| s.to_string_lossy().to_string());

    let mut counter = 1;
    loop {
        let new_name = match &extension {
            Some(ext) => format!("{} ({}).{}", stem, counter, ext),
            None => format!("{} ({})", stem, counter),
        };
        let new_path = parent.join(new_name);
        if fs::symlink_metadata(&new_path).is_err() {
            return new_path;
        }
        counter += 1;
    }
}

/// Sibling temp path used while a copy is in flight, so partial files never carry the final name.
pub(super) fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!("{}.vfs-tmp-{}", name, Uuid::new_v4()))
}

/// Returns the first source directory that `destination` lives in (or is).
pub(super) fn source_containing<'a>(sources: &'a [PathBuf], destination: &Path) -> Option<&'a PathBuf> {
    let destination = canonical_or_self(destination);
    sources.iter().find(|source| {
        let canonical = canonical_or_self(source);
        canonical.is_dir() && destination.starts_with(&canonical)
    })
}

fn canonical_or_self(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

// ============================================================================
// Sizing
// ============================================================================

/// Sums regular file sizes under `sources`. Returns `None` if `deadline` passes first.
pub(super) fn scan_size(sources: &[PathBuf], deadline: Instant) -> Option<u64> {
    let mut total = 0u64;
    for source in sources {
        for entry in WalkDir::new(source).follow_links(false).into_iter().flatten() {
            if Instant::now() > deadline {
                return None;
            }
            if entry.file_type().is_file()
                && let Ok(metadata) = entry.metadata()
            {
                total += metadata.len();
            }
        }
    }
    Some(total)
}

/// Size of one source item, recursing into directories.
pub(super) fn tree_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

// ============================================================================
// Copying
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CopyOutcome {
    Copied,
    Aborted,
}

/// Copies a regular file through a sibling temp file, then renames it over `dest`.
///
/// `on_chunk` receives the byte count of every written chunk and returns `false` to abort.
/// An aborted or failed copy leaves `dest` untouched and removes the temp file.
pub(super) fn copy_file_chunked<F>(source: &Path, dest: &Path, mut on_chunk: F) -> io::Result<CopyOutcome>
where
    F: FnMut(u64) -> bool,
{
    let metadata = fs::metadata(source)?;
    let temp = temp_path_for(dest);

    let finished = write_chunks(source, &temp, &mut on_chunk).and_then(|complete| {
        if complete {
            copy_attributes(&metadata, &temp)?;
            fs::rename(&temp, dest)?;
        }
        Ok(complete)
    });

    match finished {
        Ok(true) => Ok(CopyOutcome::Copied),
        Ok(false) => {
            let _ = fs::remove_file(&temp);
            Ok(CopyOutcome::Aborted)
        }
        Err(e) => {
            let _ = fs::remove_file(&temp);
            Err(e)
        }
    }
}

fn write_chunks(source: &Path, temp: &Path, on_chunk: &mut dyn FnMut(u64) -> bool) -> io::Result<bool> {
    let mut reader = File::open(source)?;
    let mut writer = OpenOptions::new().write(true).create_new(true).open(temp)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..read])?;
        if !on_chunk(read as u64) {
            return Ok(false);
        }
    }
    writer.flush()?;
    Ok(true)
}

/// Copies permission bits and access/modification times from `metadata` onto `target`.
pub(super) fn copy_attributes(metadata: &Metadata, target: &Path) -> io::Result<()> {
    fs::set_permissions(target, metadata.permissions())?;
    let atime = FileTime::from_last_access_time(metadata);
    let mtime = FileTime::from_last_modification_time(metadata);
    filetime::set_file_times(target, atime, mtime)
}

// ============================================================================
// Sync
// ============================================================================

/// Flushes filesystem buffers in the background so finished copies survive a power loss.
pub(super) fn spawn_async_sync() {
    std::thread::spawn(|| {
        #[cfg(unix)]
        unsafe {
            libc::sync();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_unique_name_with_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.txt");
        fs::write(&path, "x").unwrap();
        assert_eq!(find_unique_name(&path), dir.path().join("report (1).txt"));

        fs::write(dir.path().join("report (1).txt"), "x").unwrap();
        assert_eq!(find_unique_name(&path), dir.path().join("report (2).txt"));
    }

    #[test]
    fn test_find_unique_name_without_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("folder");
        fs::create_dir(&path).unwrap();
        assert_eq!(find_unique_name(&path), dir.path().join("folder (1)"));
    }

    #[test]
    fn test_source_containing() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        fs::create_dir_all(source.join("inner")).unwrap();

        let sources = vec![source.clone()];
        assert_eq!(source_containing(&sources, &source.join("inner")), Some(&source));
        assert_eq!(source_containing(&sources, &source), Some(&source));
        assert_eq!(source_containing(&sources, dir.path()), None);
        // Prefix match on names is not containment
        let sibling = dir.path().join("src-other");
        fs::create_dir(&sibling).unwrap();
        assert_eq!(source_containing(&sources, &sibling), None);
    }

    #[test]
    fn test_scan_and_tree_size() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join("sub/b"), vec![0u8; 5]).unwrap();

        assert_eq!(tree_size(dir.path()), 15);
        let far = Instant::now() + std::time::Duration::from_secs(60);
        assert_eq!(scan_size(&[dir.path().to_path_buf()], far), Some(15));
    }

    #[test]
    fn test_copy_file_chunked_preserves_content_and_mtime() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        let dest = dir.path().join("dest.bin");
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &data).unwrap();
        filetime::set_file_mtime(&source, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let mut chunks = Vec::new();
        let outcome = copy_file_chunked(&source, &dest, |n| {
            chunks.push(n);
            true
        })
        .unwrap();

        assert_eq!(outcome, CopyOutcome::Copied);
        assert_eq!(fs::read(&dest).unwrap(), data);
        assert_eq!(chunks.iter().sum::<u64>(), data.len() as u64);
        assert_eq!(chunks.len(), 3);
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&dest).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_000_000);
    }

    #[test]
    fn test_copy_file_chunked_abort_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        let dest = dir.path().join("dest.bin");
        fs::write(&source, vec![1u8; CHUNK_SIZE * 3]).unwrap();

        let outcome = copy_file_chunked(&source, &dest, |_| false).unwrap();

        assert_eq!(outcome, CopyOutcome::Aborted);
        assert!(!dest.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_copy_file_chunked_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("new.txt");
        let dest = dir.path().join("old.txt");
        fs::write(&source, "new content").unwrap();
        fs::write(&dest, "old").unwrap();

        copy_file_chunked(&source, &dest, |_| true).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new content");
    }
}
