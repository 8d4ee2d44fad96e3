//! Mime-type handles and the resolver interface FileEntry consumes.
//!
//! Handles are interned by type string: every entry of the same type shares one
//! `Arc<MimeType>`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use crate::ignore_poison::IgnorePoison;
use crate::stat::{FileStat, FileType};

pub const DIRECTORY: &str = "inode/directory";
pub const OCTET_STREAM: &str = "application/octet-stream";
pub const EXECUTABLE: &str = "application/x-executable";

const ARCHIVE_TYPES: &[&str] = &[
    "application/zip",
    "application/x-tar",
    "application/gzip",
    "application/x-gzip",
    "application/x-bzip2",
    "application/x-bzip",
    "application/x-xz",
    "application/x-7z-compressed",
    "application/x-rar-compressed",
    "application/vnd.rar",
    "application/x-lzma",
    "application/x-compressed-tar",
    "application/x-cpio",
    "application/zstd",
    "application/java-archive",
];

const EXECUTABLE_TYPES: &[&str] = &[
    EXECUTABLE,
    "application/x-pie-executable",
    "application/x-sharedlib",
    "application/x-shellscript",
    "application/x-sh",
    "application/vnd.microsoft.portable-executable",
];

const TEXT_APPLICATION_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-sh",
    "application/x-shellscript",
    "application/toml",
    "application/x-yaml",
];

/// A resolved mime type. Compare handles with `Arc::ptr_eq` or by [`type_str`](Self::type_str).
#[derive(Debug, PartialEq, Eq)]
pub struct MimeType {
    type_str: String,
    description: String,
}

impl MimeType {
    pub fn new(type_str: &str) -> Self {
        Self {
            type_str: type_str.to_string(),
            description: describe(type_str),
        }
    }

    pub fn type_str(&self) -> &str {
        &self.type_str
    }

    /// Human-readable description, like "PNG image".
    pub fn description(&self) -> &str {
        &self.description
    }

    fn media(&self) -> &str {
        self.type_str.split('/').next().unwrap_or_default()
    }

    pub fn is_directory(&self) -> bool {
        self.type_str == DIRECTORY
    }

    pub fn is_archive(&self) -> bool {
        ARCHIVE_TYPES.contains(&self.type_str.as_str())
    }

    pub fn is_executable(&self) -> bool {
        EXECUTABLE_TYPES.contains(&self.type_str.as_str())
    }

    pub fn is_text(&self) -> bool {
        self.media() == "text" || TEXT_APPLICATION_TYPES.contains(&self.type_str.as_str())
    }

    pub fn is_image(&self) -> bool {
        self.media() == "image"
    }

    pub fn is_video(&self) -> bool {
        self.media() == "video"
    }

    pub fn is_audio(&self) -> bool {
        self.media() == "audio"
    }
}

fn describe(type_str: &str) -> String {
    match type_str {
        DIRECTORY => return "Folder".to_string(),
        OCTET_STREAM => return "Binary data".to_string(),
        EXECUTABLE => return "Executable".to_string(),
        "text/plain" => return "Plain text document".to_string(),
        "application/x-shellscript" | "application/x-sh" => return "Shell script".to_string(),
        _ => {}
    }
    let Some((media, sub)) = type_str.split_once('/') else {
        return type_str.to_string();
    };
    let sub = sub.trim_start_matches("x-").trim_start_matches("vnd.");
    let kind = match media {
        "image" => "image",
        "video" => "video",
        "audio" => "audio",
        "text" => "document",
        _ if ARCHIVE_TYPES.contains(&type_str) => "archive",
        _ => return format!("{} file", sub.to_uppercase()),
    };
    format!("{} {}", sub.to_uppercase(), kind)
}

/// Resolves paths to shared mime-type handles.
pub trait MimeResolver: Send + Sync {
    /// `stat` is the entry's current snapshot when the caller has one.
    fn resolve(&self, path: &Path, stat: Option<&FileStat>) -> Arc<MimeType>;
}

/// Extension-based resolver backed by `mime_guess`, with interning.
#[derive(Default)]
pub struct GuessMimeResolver {
    interned: Mutex<HashMap<String, Weak<MimeType>>>,
}

impl std::fmt::Debug for GuessMimeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuessMimeResolver")
            .field("interned", &self.interned.lock_ignore_poison().len())
            .finish()
    }
}

impl GuessMimeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared handle for `type_str`, creating it on first use.
    pub fn intern(&self, type_str: &str) -> Arc<MimeType> {
        let mut interned = self.interned.lock_ignore_poison();
        if let Some(existing) = interned.get(type_str).and_then(Weak::upgrade) {
            return existing;
        }
        interned.retain(|_, weak| weak.strong_count() > 0);
        let mime = Arc::new(MimeType::new(type_str));
        interned.insert(type_str.to_string(), Arc::downgrade(&mime));
        mime
    }

    fn guess_type(path: &Path, stat: Option<&FileStat>) -> String {
        let file_type = match stat {
            // Classify symlinks by their target
            Some(s) if s.is_symlink() => std::fs::metadata(path)
                .map(|m| {
                    if m.is_dir() {
                        FileType::Directory
                    } else {
                        FileType::Regular
                    }
                })
                .unwrap_or(FileType::Symlink),
            Some(s) => s.file_type(),
            None => FileType::Regular,
        };

        match file_type {
            FileType::Directory => return DIRECTORY.to_string(),
            FileType::BlockDevice => return "inode/blockdevice".to_string(),
            FileType::CharDevice => return "inode/chardevice".to_string(),
            FileType::Fifo => return "inode/fifo".to_string(),
            FileType::Socket => return "inode/socket".to_string(),
            FileType::Symlink => return "inode/symlink".to_string(),
            FileType::Regular | FileType::Other => {}
        }

        if let Some(guess) = mime_guess::from_path(path).first() {
            return guess.essence_str().to_string();
        }
        if path.extension().is_none() && stat.is_some_and(|s| s.permissions() & 0o111 != 0) {
            return EXECUTABLE.to_string();
        }
        OCTET_STREAM.to_string()
    }
}

impl MimeResolver for GuessMimeResolver {
    fn resolve(&self, path: &Path, stat: Option<&FileStat>) -> Arc<MimeType> {
        self.intern(&Self::guess_type(path, stat))
    }
}
