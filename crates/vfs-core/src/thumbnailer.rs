//! Background thumbnail generation.
//!
//! One worker thread drains a request queue guarded by a mutex and condvar. Images are decoded
//! and scaled with the `image` crate; video frames come from `ffmpegthumbnailer` when it is
//! installed. Results are cached as PNG under the user cache directory, keyed by the SHA-256
//! of the source path, and reused while newer than the source.
//!
//! [`Thumbnailer::thumbnail_created`] fires on the worker thread. Getting the notification onto
//! a UI thread is the subscriber's job, typically through [`Signal::connect_queued`].

use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::config::Settings;
use crate::entry::FileEntry;
use crate::ignore_poison::{CondvarIgnorePoison, IgnorePoison, join_unless_current};
use crate::signal::Signal;

struct Request {
    entry: Arc<FileEntry>,
    size: u32,
}

#[derive(Default)]
struct Queue {
    requests: VecDeque<Request>,
    /// (path, size) pairs queued or in flight.
    pending: HashSet<(PathBuf, u32)>,
    stopped: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    cond: Condvar,
    settings: Arc<Settings>,
    cache_dir: Option<PathBuf>,
    created: Signal<Arc<FileEntry>>,
}

pub struct Thumbnailer {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Thumbnailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thumbnailer")
            .field("pending", &self.pending())
            .field("cache_dir", &self.shared.cache_dir)
            .finish()
    }
}

/// Default on-disk cache root, `None` if the platform has no cache directory.
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("vfs-core").join("thumbnails"))
}

impl Thumbnailer {
    /// Creates an idle thumbnailer using the default disk cache. Call [`run`](Self::run) to
    /// start the worker.
    pub fn new(settings: Arc<Settings>) -> Self {
        Self::with_cache_dir(settings, default_cache_dir())
    }

    /// Like [`new`](Self::new) with an explicit cache root; `None` disables the disk cache.
    pub fn with_cache_dir(settings: Arc<Settings>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue::default()),
                cond: Condvar::new(),
                settings,
                cache_dir,
                created: Signal::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Emitted on the worker thread after a thumbnail was attached to its entry.
    pub fn thumbnail_created(&self) -> &Signal<Arc<FileEntry>> {
        &self.shared.created
    }

    /// Starts the worker thread. No-op if it is already running or the thumbnailer was stopped.
    pub fn run(&self) -> std::io::Result<()> {
        let mut worker = self.worker.lock_ignore_poison();
        if worker.is_some() || self.shared.queue.lock_ignore_poison().stopped {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("vfs-thumbnailer".into())
            .spawn(move || worker_loop(&shared))?;
        *worker = Some(handle);
        Ok(())
    }

    /// Queues a thumbnail for `entry` at `size` pixels. Returns false when the pair is already
    /// queued or loaded, or the thumbnailer is stopped.
    pub fn request(&self, entry: Arc<FileEntry>, size: u32) -> bool {
        if entry.is_thumbnail_loaded(size) {
            return false;
        }
        let mut queue = self.shared.queue.lock_ignore_poison();
        if queue.stopped || !queue.pending.insert((entry.path().to_path_buf(), size)) {
            return false;
        }
        queue.requests.push_back(Request { entry, size });
        self.shared.cond.notify_one();
        true
    }

    /// Requests queued or in flight.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock_ignore_poison().pending.len()
    }

    /// Drops queued requests and wakes the worker so it exits after its current job.
    pub fn stop(&self) {
        let mut queue = self.shared.queue.lock_ignore_poison();
        queue.stopped = true;
        queue.requests.clear();
        queue.pending.clear();
        self.shared.cond.notify_all();
    }

    /// Stops and waits for the worker thread.
    pub fn join(&self) {
        self.stop();
        if let Some(handle) = self.worker.lock_ignore_poison().take() {
            join_unless_current(handle);
        }
    }
}

impl Drop for Thumbnailer {
    fn drop(&mut self) {
        self.join();
    }
}

fn worker_loop(shared: &Shared) {
    log::debug!("Thumbnailer: worker started");
    loop {
        let request = {
            let guard = shared.queue.lock_ignore_poison();
            let mut queue = shared
                .cond
                .wait_while_ignore_poison(guard, |q| q.requests.is_empty() && !q.stopped);
            if queue.stopped {
                break;
            }
            queue.requests.pop_front()
        };
        let Some(request) = request else { continue };

        let loaded = generate(shared, &request.entry, request.size);
        shared
            .queue
            .lock_ignore_poison()
            .pending
            .remove(&(request.entry.path().to_path_buf(), request.size));

        if let Some(image) = loaded {
            request.entry.set_thumbnail(request.size, image);
            shared.created.emit(&request.entry);
        }
    }
    log::debug!("Thumbnailer: worker finished");
}

/// Produces the thumbnail for one request, or `None` when the source cannot be thumbnailed.
/// Failures are not retried.
fn generate(shared: &Shared, entry: &FileEntry, size: u32) -> Option<DynamicImage> {
    if !shared.settings.thumbnails_enabled || entry.is_thumbnail_loaded(size) || entry.is_broken() {
        return None;
    }
    let mime = entry.mime();
    if !mime.is_image() && !mime.is_video() {
        return None;
    }
    if mime.is_image() && entry.size() > shared.settings.max_thumbnail_bytes {
        log::debug!(
            "Thumbnailer: {} exceeds the {} byte limit",
            entry.path().display(),
            shared.settings.max_thumbnail_bytes
        );
        return None;
    }

    let cache_path = shared.cache_dir.as_deref().map(|dir| cache_path(dir, entry.path(), size));
    if let Some(cached) = cache_path.as_deref().and_then(|p| load_cached(p, entry)) {
        return Some(cached);
    }

    let result = if mime.is_image() {
        image::open(entry.path()).map(|img| img.thumbnail(size, size)).map_err(|e| e.to_string())
    } else {
        video_frame(entry.path(), size)
    };
    let image = match result {
        Ok(image) => image,
        Err(e) => {
            log::debug!("Thumbnailer: no thumbnail for {}: {}", entry.path().display(), e);
            return None;
        }
    };

    if let Some(path) = cache_path {
        store_cached(&path, &image);
    }
    Some(image)
}

/// `<root>/<size>/<sha256 of path>.png`
pub fn cache_path(root: &Path, source: &Path, size: u32) -> PathBuf {
    let digest = Sha256::digest(source.as_os_str().as_bytes());
    root.join(size.to_string()).join(format!("{:x}.png", digest))
}

fn load_cached(cache: &Path, entry: &FileEntry) -> Option<DynamicImage> {
    let cached_at = fs::metadata(cache).and_then(|m| m.modified()).ok()?;
    let source_mtime = entry.stat()?.mtime();
    if cached_at < source_mtime {
        return None;
    }
    match image::open(cache) {
        Ok(image) => Some(image),
        Err(e) => {
            log::debug!("Thumbnailer: discarding unreadable cache file {}: {}", cache.display(), e);
            let _ = fs::remove_file(cache);
            None
        }
    }
}

fn store_cached(cache: &Path, image: &DynamicImage) {
    if let Some(parent) = cache.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        log::debug!("Thumbnailer: can't create cache dir {}: {}", parent.display(), e);
        return;
    }
    if let Err(e) = image.save(cache) {
        log::debug!("Thumbnailer: can't write cache file {}: {}", cache.display(), e);
    }
}

/// Extracts one frame through `ffmpegthumbnailer` into a temp PNG and decodes it.
fn video_frame(source: &Path, size: u32) -> Result<DynamicImage, String> {
    let out = std::env::temp_dir().join(format!("vfs-thumb-{}.png", uuid::Uuid::new_v4()));
    let status = Command::new("ffmpegthumbnailer")
        .arg("-i")
        .arg(source)
        .arg("-o")
        .arg(&out)
        .arg("-s")
        .arg(size.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| format!("ffmpegthumbnailer unavailable: {e}"))?;

    let result = if status.success() {
        image::open(&out).map_err(|e| e.to_string())
    } else {
        Err(format!("ffmpegthumbnailer exited with {status}"))
    };
    let _ = fs::remove_file(&out);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::GuessMimeResolver;
    use std::sync::mpsc;
    use std::time::Duration;

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 10, 10, 255]));
        img.save(path).unwrap();
    }

    fn entry(path: &Path) -> Arc<FileEntry> {
        Arc::new(FileEntry::create(path, &GuessMimeResolver::new()))
    }

    #[test]
    fn test_generates_and_signals() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("pic.png");
        write_png(&source, 64, 32);

        let cache = tmp.path().join("cache");
        let thumbnailer = Thumbnailer::with_cache_dir(Arc::new(Settings::default()), Some(cache.clone()));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        thumbnailer
            .thumbnail_created()
            .connect(move |e: &Arc<FileEntry>| {
                let _ = tx.lock().unwrap().send(e.name().to_string());
            });
        thumbnailer.run().unwrap();

        let pic = entry(&source);
        assert!(thumbnailer.request(Arc::clone(&pic), 16));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "pic.png");

        let thumb = pic.thumbnail(16).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (16, 8));
        assert!(cache_path(&cache, &source, 16).exists());
        // Already loaded
        assert!(!thumbnailer.request(pic, 16));
    }

    #[test]
    fn test_duplicate_request_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("pic.png");
        write_png(&source, 8, 8);

        // Worker not started, so the first request stays queued
        let thumbnailer = Thumbnailer::with_cache_dir(Arc::new(Settings::default()), None);
        let pic = entry(&source);
        assert!(thumbnailer.request(Arc::clone(&pic), 22));
        assert!(!thumbnailer.request(Arc::clone(&pic), 22));
        assert!(thumbnailer.request(pic, 48));
        assert_eq!(thumbnailer.pending(), 2);
    }

    #[test]
    fn test_corrupt_source_produces_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("broken.png");
        fs::write(&source, b"not a png").unwrap();

        let thumbnailer = Thumbnailer::with_cache_dir(Arc::new(Settings::default()), None);
        let pic = entry(&source);
        assert!(generate(&thumbnailer.shared, &pic, 16).is_none());
        assert!(!pic.is_thumbnail_loaded(16));
    }

    #[test]
    fn test_respects_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("pic.png");
        write_png(&source, 8, 8);
        let pic = entry(&source);

        let disabled = Settings {
            thumbnails_enabled: false,
            ..Settings::default()
        };
        let thumbnailer = Thumbnailer::with_cache_dir(Arc::new(disabled), None);
        assert!(generate(&thumbnailer.shared, &pic, 16).is_none());

        let tiny_limit = Settings {
            max_thumbnail_bytes: 1,
            ..Settings::default()
        };
        let thumbnailer = Thumbnailer::with_cache_dir(Arc::new(tiny_limit), None);
        assert!(generate(&thumbnailer.shared, &pic, 16).is_none());
    }

    #[test]
    fn test_non_media_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("notes.txt");
        fs::write(&source, "text").unwrap();

        let thumbnailer = Thumbnailer::with_cache_dir(Arc::new(Settings::default()), None);
        assert!(generate(&thumbnailer.shared, &entry(&source), 16).is_none());
    }

    #[test]
    fn test_stop_joins_idle_worker() {
        let thumbnailer = Thumbnailer::with_cache_dir(Arc::new(Settings::default()), None);
        thumbnailer.run().unwrap();
        thumbnailer.join();

        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("pic.png");
        write_png(&source, 8, 8);
        assert!(!thumbnailer.request(entry(&source), 16));
    }

    #[test]
    fn test_cache_path_layout() {
        let path = cache_path(Path::new("/cache"), Path::new("/home/u/a.png"), 48);
        assert!(path.starts_with("/cache/48"));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(path.file_stem().map(|s| s.len()), Some(64));
        assert_ne!(path, cache_path(Path::new("/cache"), Path::new("/home/u/b.png"), 48));
    }
}
