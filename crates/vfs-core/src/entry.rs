//! One filesystem entry: stat snapshot, mime type, display strings and thumbnails.

use chrono::{DateTime, Local};
use image::DynamicImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock};
use std::time::SystemTime;
use uzers::{get_group_by_gid, get_user_by_uid};

use crate::ignore_poison::{IgnorePoison, IgnorePoisonRw};
use crate::mime::{MimeResolver, MimeType};
use crate::stat::{FileStat, FileType};
use crate::thumbnailer::Thumbnailer;

/// Cache for uid→username resolution.
static OWNER_CACHE: LazyLock<RwLock<HashMap<u32, String>>> = LazyLock::new(|| RwLock::new(HashMap::new()));
/// Cache for gid→groupname resolution.
static GROUP_CACHE: LazyLock<RwLock<HashMap<u32, String>>> = LazyLock::new(|| RwLock::new(HashMap::new()));

/// Resolves a uid to a username, with caching. Unknown uids render as the number.
pub fn owner_name(uid: u32) -> String {
    if let Some(name) = OWNER_CACHE.read_ignore_poison().get(&uid) {
        return name.clone();
    }
    let name = get_user_by_uid(uid)
        .map(|u| u.name().to_string_lossy().into_owned())
        .unwrap_or_else(|| uid.to_string());
    OWNER_CACHE.write_ignore_poison().insert(uid, name.clone());
    name
}

/// Resolves a gid to a group name, with caching.
pub fn group_name(gid: u32) -> String {
    if let Some(name) = GROUP_CACHE.read_ignore_poison().get(&gid) {
        return name.clone();
    }
    let name = get_group_by_gid(gid)
        .map(|g| g.name().to_string_lossy().into_owned())
        .unwrap_or_else(|| gid.to_string());
    GROUP_CACHE.write_ignore_poison().insert(gid, name.clone());
    name
}

/// Formats bytes in human-readable form.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M").to_string()
}

/// `ls -l` style mode string, like `drwxr-xr-x` or `-rwsr-x--T`.
pub fn format_permissions(file_type: FileType, mode: u32) -> String {
    let type_char = match file_type {
        FileType::Regular => '-',
        FileType::Directory => 'd',
        FileType::Symlink => 'l',
        FileType::Socket => 's',
        FileType::Fifo => 'p',
        FileType::BlockDevice => 'b',
        FileType::CharDevice => 'c',
        FileType::Other => '?',
    };
    let bit = |mask: u32, c: char| if mode & mask != 0 { c } else { '-' };
    let special = |exec: u32, special: u32, set: char, unset: char| match (mode & exec != 0, mode & special != 0) {
        (true, true) => set,
        (false, true) => unset,
        (true, false) => 'x',
        (false, false) => '-',
    };

    [
        type_char,
        bit(0o400, 'r'),
        bit(0o200, 'w'),
        special(0o100, 0o4000, 's', 'S'),
        bit(0o040, 'r'),
        bit(0o020, 'w'),
        special(0o010, 0o2000, 's', 'S'),
        bit(0o004, 'r'),
        bit(0o002, 'w'),
        special(0o001, 0o1000, 't', 'T'),
    ]
    .iter()
    .collect()
}

/// Pre-formatted strings, recomputed on every stat refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayStrings {
    pub size: String,
    pub size_on_disk: String,
    pub owner: String,
    pub group: String,
    pub permissions: String,
    pub atime: String,
    pub mtime: String,
    pub ctime: String,
    pub btime: String,
}

impl DisplayStrings {
    fn from_stat(stat: &FileStat) -> Self {
        Self {
            size: format_size(stat.size()),
            size_on_disk: format_size(stat.size_on_disk()),
            owner: owner_name(stat.uid()),
            group: group_name(stat.gid()),
            permissions: format_permissions(stat.file_type(), stat.mode()),
            atime: format_time(stat.atime()),
            mtime: format_time(stat.mtime()),
            ctime: format_time(stat.ctime()),
            btime: stat.btime().map(format_time).unwrap_or_default(),
        }
    }
}

struct EntryData {
    /// `None` for a broken entry whose stat failed.
    stat: Option<FileStat>,
    mime: Arc<MimeType>,
    display: DisplayStrings,
}

/// A filesystem entry as seen by a directory listing.
///
/// Shared as `Arc<FileEntry>`: a UI holding a handle keeps the entry alive even after it was
/// removed from its directory.
pub struct FileEntry {
    path: PathBuf,
    name: String,
    data: RwLock<EntryData>,
    user_hidden: AtomicBool,
    thumbnails: Mutex<HashMap<u32, Arc<DynamicImage>>>,
}

impl std::fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEntry")
            .field("path", &self.path)
            .field("mime", &self.mime().type_str())
            .field("broken", &self.is_broken())
            .finish()
    }
}

impl FileEntry {
    /// Stats `path` and resolves its mime type.
    ///
    /// A failed stat still produces an entry, marked broken, so a listing survives files
    /// disappearing between readdir and stat.
    pub fn create(path: &Path, resolver: &dyn MimeResolver) -> FileEntry {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let stat = FileStat::refresh(path);
        let mime = resolver.resolve(path, stat.as_ref());
        let display = stat.as_ref().map(DisplayStrings::from_stat).unwrap_or_default();

        FileEntry {
            path: path.to_path_buf(),
            name,
            data: RwLock::new(EntryData { stat, mime, display }),
            user_hidden: AtomicBool::new(false),
            thumbnails: Mutex::new(HashMap::new()),
        }
    }

    /// Re-stats the entry. Returns false if the path no longer exists; the owner must then
    /// drop this entry from its collection.
    pub fn update(&self, resolver: &dyn MimeResolver) -> bool {
        let Some(stat) = FileStat::refresh(&self.path) else {
            return false;
        };

        let mut data = self.data.write_ignore_poison();
        let reresolve = match &data.stat {
            None => true,
            Some(old) => old.file_type() != stat.file_type() || (old.size() == 0) != (stat.size() == 0),
        };
        if reresolve {
            data.mime = resolver.resolve(&self.path, Some(&stat));
        }
        data.display = DisplayStrings::from_stat(&stat);
        data.stat = Some(stat);
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current stat snapshot, `None` if the entry is broken.
    pub fn stat(&self) -> Option<FileStat> {
        self.data.read_ignore_poison().stat.clone()
    }

    pub fn mime(&self) -> Arc<MimeType> {
        Arc::clone(&self.data.read_ignore_poison().mime)
    }

    /// All display strings, consistent with the last `update()`.
    pub fn display(&self) -> DisplayStrings {
        self.data.read_ignore_poison().display.clone()
    }

    pub fn display_size(&self) -> String {
        self.data.read_ignore_poison().display.size.clone()
    }

    pub fn display_mtime(&self) -> String {
        self.data.read_ignore_poison().display.mtime.clone()
    }

    pub fn display_owner(&self) -> String {
        self.data.read_ignore_poison().display.owner.clone()
    }

    pub fn is_broken(&self) -> bool {
        self.data.read_ignore_poison().stat.is_none()
    }

    pub fn size(&self) -> u64 {
        self.data.read_ignore_poison().stat.as_ref().map(FileStat::size).unwrap_or(0)
    }

    pub fn is_directory(&self) -> bool {
        let data = self.data.read_ignore_poison();
        data.mime.is_directory() || data.stat.as_ref().is_some_and(FileStat::is_directory)
    }

    pub fn is_symlink(&self) -> bool {
        self.data.read_ignore_poison().stat.as_ref().is_some_and(FileStat::is_symlink)
    }

    pub fn is_executable(&self) -> bool {
        let data = self.data.read_ignore_poison();
        let exec_bits = data.stat.as_ref().is_some_and(|s| s.is_regular_file() && s.permissions() & 0o111 != 0);
        exec_bits && (data.mime.is_executable() || data.mime.is_text())
    }

    pub fn is_desktop_entry(&self) -> bool {
        self.name.ends_with(".desktop")
    }

    /// Dotfile convention or listed in the directory's `.hidden` file.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.') || self.user_hidden.load(Ordering::Relaxed)
    }

    /// Marks the entry as listed (or not) in its directory's `.hidden` file.
    pub fn set_user_hidden(&self, hidden: bool) {
        self.user_hidden.store(hidden, Ordering::Relaxed);
    }

    pub fn is_thumbnail_loaded(&self, size: u32) -> bool {
        self.thumbnails.lock_ignore_poison().contains_key(&size)
    }

    pub fn thumbnail(&self, size: u32) -> Option<Arc<DynamicImage>> {
        self.thumbnails.lock_ignore_poison().get(&size).cloned()
    }

    /// Sizes that currently hold a thumbnail.
    pub fn loaded_thumbnail_sizes(&self) -> Vec<u32> {
        let mut sizes: Vec<u32> = self.thumbnails.lock_ignore_poison().keys().copied().collect();
        sizes.sort_unstable();
        sizes
    }

    /// Queues thumbnail generation. Returns immediately; `thumbnailer` emits
    /// `thumbnail_created` once the image is attached.
    pub fn load_thumbnail(self: &Arc<Self>, thumbnailer: &Thumbnailer, size: u32) {
        if self.is_thumbnail_loaded(size) {
            return;
        }
        thumbnailer.request(Arc::clone(self), size);
    }

    pub fn unload_thumbnail(&self, size: u32) {
        self.thumbnails.lock_ignore_poison().remove(&size);
    }

    pub fn unload_all_thumbnails(&self) {
        self.thumbnails.lock_ignore_poison().clear();
    }

    pub(crate) fn set_thumbnail(&self, size: u32, image: DynamicImage) {
        self.thumbnails.lock_ignore_poison().insert(size, Arc::new(image));
    }

    /// True when the stat changed in a way a listing would show.
    pub(crate) fn differs_from(&self, old: Option<&FileStat>) -> bool {
        let data = self.data.read_ignore_poison();
        match (old, data.stat.as_ref()) {
            (Some(old), Some(new)) => {
                old.size() != new.size()
                    || old.mtime() != new.mtime()
                    || old.ctime() != new.ctime()
                    || old.mode() != new.mode()
            }
            (None, None) => false,
            _ => true,
        }
    }
}
