//! The per-directory `.hidden` file: one bare file name per line.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

pub const HIDDEN_FILE_NAME: &str = ".hidden";

/// Parses `.hidden` contents. Absolute paths and names with a slash are skipped with a warning.
pub fn parse_hidden(contents: &str, dir: &Path) -> HashSet<String> {
    let mut names = HashSet::new();
    for line in contents.lines() {
        let name = line.trim_end_matches('\r');
        if name.is_empty() {
            continue;
        }
        if name.contains('/') {
            log::warn!(
                "Ignoring '{}' in {}: only bare file names are allowed",
                name,
                dir.join(HIDDEN_FILE_NAME).display()
            );
            continue;
        }
        names.insert(name.to_string());
    }
    names
}

/// Reads the `.hidden` list for `dir`. A missing or unreadable file means nothing is hidden.
pub fn read_hidden(dir: &Path) -> HashSet<String> {
    match fs::read_to_string(dir.join(HIDDEN_FILE_NAME)) {
        Ok(contents) => parse_hidden(&contents, dir),
        Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
        Err(e) => {
            log::debug!("Can't read {}: {}", dir.join(HIDDEN_FILE_NAME).display(), e);
            HashSet::new()
        }
    }
}

/// Appends `name` to the `.hidden` file in `dir`, creating it if needed.
pub fn append_hidden(dir: &Path, name: &str) -> io::Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\n') {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a bare file name"));
    }
    let path = dir.join(HIDDEN_FILE_NAME);
    let needs_newline = fs::read(&path).map(|c| !c.is_empty() && !c.ends_with(b"\n")).unwrap_or(false);

    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    if needs_newline {
        file.write_all(b"\n")?;
    }
    writeln!(file, "{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_absolute_and_blank() {
        let names = parse_hidden("a.txt\n\n/etc/passwd\nsub/dir\nnotes\r\n", Path::new("/d"));
        assert_eq!(names.len(), 2);
        assert!(names.contains("a.txt"));
        assert!(names.contains("notes"));
    }

    #[test]
    fn test_read_missing_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_hidden(tmp.path()).is_empty());
    }

    #[test]
    fn test_append_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(HIDDEN_FILE_NAME), "first").unwrap();

        append_hidden(tmp.path(), "second").unwrap();
        append_hidden(tmp.path(), "third").unwrap();

        let contents = fs::read_to_string(tmp.path().join(HIDDEN_FILE_NAME)).unwrap();
        assert_eq!(contents, "first\nsecond\nthird\n");
        assert_eq!(read_hidden(tmp.path()).len(), 3);
    }

    #[test]
    fn test_append_rejects_paths() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(append_hidden(tmp.path(), "/abs").is_err());
        assert!(append_hidden(tmp.path(), "").is_err());
        assert!(!tmp.path().join(HIDDEN_FILE_NAME).exists());
    }
}
