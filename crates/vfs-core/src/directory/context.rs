use std::path::PathBuf;
use std::sync::Arc;

use super::Directory;
use crate::cache::SmartCache;
use crate::config::Settings;
use crate::mime::{GuessMimeResolver, MimeResolver};
use crate::thumbnailer::default_cache_dir;

/// Everything a [`Directory`] needs from its surroundings: read-only settings, the mime
/// resolver, and the cache that makes directories shared per path.
///
/// One context per process is the norm; tests build their own to stay isolated.
#[derive(Clone)]
pub struct VfsContext {
    pub settings: Arc<Settings>,
    pub resolver: Arc<dyn MimeResolver>,
    /// Root of the on-disk thumbnail cache; `None` keeps thumbnails in memory only.
    pub thumbnail_cache: Option<PathBuf>,
    pub(super) directories: Arc<SmartCache<PathBuf, Directory>>,
}

impl std::fmt::Debug for VfsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VfsContext")
            .field("settings", &self.settings)
            .field("directories", &self.directories)
            .finish()
    }
}

impl Default for VfsContext {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl VfsContext {
    /// Context with the default extension-based mime resolver.
    pub fn new(settings: Settings) -> Self {
        Self::with_resolver(settings, Arc::new(GuessMimeResolver::new()))
    }

    pub fn with_resolver(settings: Settings, resolver: Arc<dyn MimeResolver>) -> Self {
        Self {
            settings: Arc::new(settings),
            resolver,
            thumbnail_cache: default_cache_dir(),
            directories: Arc::new(SmartCache::new()),
        }
    }

    /// Live directories, pinned or still referenced somewhere.
    pub fn directories(&self) -> Vec<Arc<Directory>> {
        self.directories.items()
    }

    /// The live directory for `path`, without creating one.
    pub fn find_directory(&self, path: &std::path::Path) -> Option<Arc<Directory>> {
        self.directories.get(&super::normalize(path))
    }

    /// Releases the pin taken by `Directory::create(.., permanent = true)`.
    pub fn unpin_directory(&self, path: &std::path::Path) -> bool {
        self.directories.unpin(&super::normalize(path))
    }
}
