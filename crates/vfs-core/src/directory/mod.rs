//! Live, incrementally updated snapshot of one directory.
//!
//! A [`Directory`] lists its path once on a loader thread, then follows change notifications.
//! Raw events only stage a file name in the "created" or "changed" list and arm a debounce
//! timer; when the timer fires, both lists are drained in one pass that emits the minimal
//! set of `file_created` / `file_changed` / `file_deleted` signals. An editor's
//! write-close-rename burst therefore surfaces as one signal.
//!
//! Directories are shared per path through the [`VfsContext`] cache.

mod context;
pub mod hidden;
pub mod mount;

pub use context::VfsContext;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Settings;
use crate::debounce::Debouncer;
use crate::entry::FileEntry;
use crate::ignore_poison::{CondvarIgnorePoison, IgnorePoison, join_unless_current};
use crate::mime::MimeResolver;
use crate::notifier::{ChangeNotifier, EventMask, Notification, StopToken};
use crate::signal::Signal;
use crate::thumbnailer::Thumbnailer;

/// Events the directory watch subscribes to.
const WATCH_MASK: EventMask = EventMask::CREATE
    .union(EventMask::MOVE)
    .union(EventMask::DELETE)
    .union(EventMask::MODIFY)
    .union(EventMask::ATTRIB)
    .union(EventMask::CLOSE_WRITE)
    .union(EventMask::DELETE_SELF)
    .union(EventMask::MOVE_SELF);

/// Cache key for `path`: trailing slashes and `.` components removed.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

#[derive(Debug, Default)]
struct LoadState {
    loading: bool,
    loaded: bool,
}

pub struct Directory {
    path: PathBuf,
    settings: Arc<Settings>,
    resolver: Arc<dyn MimeResolver>,

    /// Keyed by basename, so the collection can never hold two entries with the same name.
    entries: Mutex<BTreeMap<String, Arc<FileEntry>>>,
    hidden: Mutex<HashSet<String>>,
    created_pending: Mutex<Vec<String>>,
    changed_pending: Mutex<Vec<String>>,

    load: Mutex<LoadState>,
    load_cond: Condvar,
    refreshing: AtomicBool,
    avoid_changes: AtomicBool,
    stopping: AtomicBool,

    notifier: Option<Arc<ChangeNotifier>>,
    notifier_stop: StopToken,
    debouncer: Debouncer,
    thumbnailer: Thumbnailer,
    threads: Mutex<Vec<JoinHandle<()>>>,

    file_created: Signal<Arc<FileEntry>>,
    file_changed: Signal<Option<Arc<FileEntry>>>,
    file_deleted: Signal<Option<Arc<FileEntry>>>,
    file_listed: Signal<()>,
    thumbnail_loaded: Signal<Arc<FileEntry>>,
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("path", &self.path)
            .field("entries", &self.len())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Directory {
    /// Returns the live directory for `path`, creating and loading it if there is none.
    ///
    /// `permanent` pins the instance in the context's cache so it outlives its last handle.
    pub fn create(ctx: &VfsContext, path: &Path, permanent: bool) -> Arc<Directory> {
        let key = normalize(path);
        ctx.directories
            .get_or_create(key.clone(), || Directory::open(ctx, key), permanent)
    }

    fn open(ctx: &VfsContext, path: PathBuf) -> Arc<Directory> {
        let dir = Arc::new_cyclic(|weak: &Weak<Directory>| {
            let debounce_target = weak.clone();
            let debouncer = Debouncer::new(move || {
                if let Some(dir) = debounce_target.upgrade() {
                    dir.flush_pending();
                }
            });

            let thumbnailer = Thumbnailer::with_cache_dir(Arc::clone(&ctx.settings), ctx.thumbnail_cache.clone());
            let thumb_target = weak.clone();
            thumbnailer.thumbnail_created().connect(move |entry: &Arc<FileEntry>| {
                if let Some(dir) = thumb_target.upgrade()
                    && dir.owns(entry)
                {
                    dir.thumbnail_loaded.emit(entry);
                }
            });

            let notifier = match ChangeNotifier::new() {
                Ok(notifier) => Some(Arc::new(notifier)),
                Err(e) => {
                    log::warn!("Directory: no change notifications for {}: {}", path.display(), e);
                    None
                }
            };

            Directory {
                avoid_changes: AtomicBool::new(mount::is_unreliable_filesystem(&path)),
                path,
                settings: Arc::clone(&ctx.settings),
                resolver: Arc::clone(&ctx.resolver),
                entries: Mutex::new(BTreeMap::new()),
                hidden: Mutex::new(HashSet::new()),
                created_pending: Mutex::new(Vec::new()),
                changed_pending: Mutex::new(Vec::new()),
                load: Mutex::new(LoadState::default()),
                load_cond: Condvar::new(),
                refreshing: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                notifier,
                notifier_stop: StopToken::new(),
                debouncer,
                thumbnailer,
                threads: Mutex::new(Vec::new()),
                file_created: Signal::new(),
                file_changed: Signal::new(),
                file_deleted: Signal::new(),
                file_listed: Signal::new(),
                thumbnail_loaded: Signal::new(),
            }
        });

        dir.start();
        dir
    }

    fn start(self: &Arc<Self>) {
        self.start_watching();
        if let Err(e) = self.thumbnailer.run() {
            log::warn!("Directory: can't start thumbnailer for {}: {}", self.path.display(), e);
        }

        self.load.lock_ignore_poison().loading = true;
        let dir = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("vfs-dir-load".into())
            .spawn(move || dir.load_entries());
        match spawned {
            Ok(handle) => self.threads.lock_ignore_poison().push(handle),
            Err(e) => {
                log::error!("Directory: can't start loader for {}: {}", self.path.display(), e);
                self.finish_load();
            }
        }
    }

    fn start_watching(self: &Arc<Self>) {
        let Some(notifier) = &self.notifier else { return };
        if let Err(e) = notifier.watch_directory(&self.path, WATCH_MASK) {
            log::warn!("Directory: can't watch {}: {}", self.path.display(), e);
            return;
        }

        let target = Arc::downgrade(self);
        let handled = [
            EventMask::CREATE,
            EventMask::MOVE,
            EventMask::DELETE,
            EventMask::MODIFY,
            EventMask::ATTRIB,
            EventMask::CLOSE_WRITE,
            EventMask::DELETE_SELF,
            EventMask::MOVE_SELF,
        ];
        notifier.on_events(&handled, move |n| {
            if let Some(dir) = target.upgrade() {
                dir.on_notification(n);
            }
        });

        let target = Arc::downgrade(self);
        notifier.on_unexpected_event(move |n| {
            let Some(dir) = target.upgrade() else { return };
            if n.event == EventMask::QUEUE_OVERFLOW {
                log::info!("Directory: event queue overflowed for {}, refreshing", dir.path.display());
                dir.refresh();
            } else if n.is_self() {
                dir.file_changed.emit(&None);
            } else {
                log::debug!("Directory: ignoring {} event for {}", n.event.event_name(), n.path.display());
            }
        });

        let runner = Arc::clone(notifier);
        let token = self.notifier_stop.clone();
        let spawned = std::thread::Builder::new()
            .name("vfs-dir-notify".into())
            .spawn(move || runner.run(&token));
        match spawned {
            Ok(handle) => self.threads.lock_ignore_poison().push(handle),
            Err(e) => log::warn!("Directory: can't start notifier thread: {}", e),
        }
    }

    /// Routes one raw notification into the staging lists.
    fn on_notification(&self, n: &Notification) {
        if n.is_self() {
            if n.event.intersects(EventMask::DELETE_SELF | EventMask::MOVE_SELF) {
                log::debug!("Directory: {} went away", self.path.display());
                self.entries.lock_ignore_poison().clear();
                self.file_deleted.emit(&None);
            } else {
                self.file_changed.emit(&None);
            }
            return;
        }

        let Some(name) = n.file_name() else { return };
        if n.event.intersects(EventMask::CREATE | EventMask::MOVED_TO) {
            self.emit_file_created(&name, false);
        } else if n.event.intersects(EventMask::DELETE | EventMask::MOVED_FROM) {
            self.emit_file_changed(&name, true);
        } else {
            self.emit_file_changed(&name, false);
        }
    }

    // ========================================================================
    // Initial load
    // ========================================================================

    fn load_entries(&self) {
        log::debug!("Directory: loading {}", self.path.display());
        let hidden = hidden::read_hidden(&self.path);
        *self.hidden.lock_ignore_poison() = hidden.clone();

        match fs::read_dir(&self.path) {
            Ok(read_dir) => {
                for item in read_dir.flatten() {
                    if self.stopping.load(Ordering::Relaxed) {
                        break;
                    }
                    let name = item.file_name().to_string_lossy().into_owned();
                    if hidden.contains(&name) {
                        continue;
                    }
                    let entry = Arc::new(FileEntry::create(&item.path(), &*self.resolver));
                    // The debounce drain may already have added it
                    self.entries.lock_ignore_poison().entry(name).or_insert(entry);
                }
            }
            Err(e) => log::warn!("Directory: can't list {}: {}", self.path.display(), e),
        }

        self.finish_load();
        log::debug!("Directory: loaded {} ({} entries)", self.path.display(), self.len());
        self.file_listed.emit(&());
    }

    fn finish_load(&self) {
        let mut load = self.load.lock_ignore_poison();
        load.loading = false;
        load.loaded = true;
        self.load_cond.notify_all();
    }

    pub fn is_loading(&self) -> bool {
        self.load.lock_ignore_poison().loading
    }

    pub fn is_loaded(&self) -> bool {
        self.load.lock_ignore_poison().loaded
    }

    /// Blocks until the initial load completes. Returns false on timeout.
    pub fn wait_until_loaded(&self, timeout: Duration) -> bool {
        let guard = self.load.lock_ignore_poison();
        let (guard, _) = self
            .load_cond
            .wait_timeout_while_ignore_poison(guard, timeout, |load| !load.loaded);
        guard.loaded
    }

    // ========================================================================
    // Change staging and the debounce drain
    // ========================================================================

    /// Stages `name` as created and arms the debounce timer.
    pub fn emit_file_created(&self, name: &str, force: bool) {
        push_unique(&self.created_pending, name);
        self.schedule_flush(force);
    }

    /// Stages `name` as changed. With [`avoid_changes`](Self::avoid_changes) set, only forced
    /// changes are staged.
    pub fn emit_file_changed(&self, name: &str, force: bool) {
        if !force && self.avoid_changes() {
            return;
        }
        push_unique(&self.changed_pending, name);
        self.schedule_flush(force);
    }

    fn schedule_flush(&self, force: bool) {
        let delay = if force {
            self.settings.forced_debounce_ms
        } else {
            self.settings.debounce_ms
        };
        self.debouncer.schedule(Duration::from_millis(delay));
    }

    /// Drains both staging lists now. Runs on the debounce timer thread normally; callers
    /// that need the result synchronously may call it directly.
    pub fn flush_pending(&self) {
        let created = std::mem::take(&mut *self.created_pending.lock_ignore_poison());
        let mut changed = std::mem::take(&mut *self.changed_pending.lock_ignore_poison());
        let hidden = self.hidden.lock_ignore_poison().clone();
        let mut created_now = HashSet::new();

        for name in created {
            if hidden.contains(&name) {
                continue;
            }
            let path = self.path.join(&name);
            let entry = {
                let mut entries = self.entries.lock_ignore_poison();
                if entries.contains_key(&name) {
                    drop(entries);
                    if !changed.contains(&name) {
                        changed.push(name);
                    }
                    continue;
                }
                let entry = FileEntry::create(&path, &*self.resolver);
                // Gone again before the drain ran
                if entry.is_broken() {
                    continue;
                }
                let entry = Arc::new(entry);
                entries.insert(name.clone(), Arc::clone(&entry));
                entry
            };
            created_now.insert(name);
            self.file_created.emit(&entry);
        }

        for name in changed {
            if created_now.contains(&name) {
                continue;
            }
            let Some(entry) = self.find(&name) else { continue };
            if entry.update(&*self.resolver) {
                self.file_changed.emit(&Some(entry));
            } else {
                self.remove_entry(&name);
                self.file_deleted.emit(&Some(entry));
            }
        }
    }

    fn remove_entry(&self, name: &str) -> Option<Arc<FileEntry>> {
        self.entries.lock_ignore_poison().remove(name)
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Re-lists the directory on a transient thread and reconciles the collection with it.
    /// Returns false if the initial load hasn't finished or a refresh is already running.
    pub fn refresh(self: &Arc<Self>) -> bool {
        if !self.begin_refresh() {
            return false;
        }
        let dir = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("vfs-dir-refresh".into())
            .spawn(move || {
                dir.reconcile();
                dir.refreshing.store(false, Ordering::SeqCst);
            });
        match spawned {
            Ok(handle) => {
                let mut threads = self.threads.lock_ignore_poison();
                threads.retain(|t| !t.is_finished());
                threads.push(handle);
                true
            }
            Err(e) => {
                log::warn!("Directory: can't start refresh thread: {}", e);
                self.refreshing.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// [`refresh`](Self::refresh) on the calling thread.
    pub fn refresh_sync(&self) -> bool {
        if !self.begin_refresh() {
            return false;
        }
        self.reconcile();
        self.refreshing.store(false, Ordering::SeqCst);
        true
    }

    fn begin_refresh(&self) -> bool {
        if !self.is_loaded() || self.is_loading() {
            return false;
        }
        !self.refreshing.swap(true, Ordering::SeqCst)
    }

    fn reconcile(&self) {
        let hidden = hidden::read_hidden(&self.path);
        *self.hidden.lock_ignore_poison() = hidden.clone();

        let on_disk: HashSet<String> = match fs::read_dir(&self.path) {
            Ok(read_dir) => read_dir
                .flatten()
                .map(|item| item.file_name().to_string_lossy().into_owned())
                .filter(|name| !hidden.contains(name))
                .collect(),
            Err(e) => {
                log::warn!("Directory: can't re-list {}: {}", self.path.display(), e);
                return;
            }
        };

        let current = self.entries();
        for entry in &current {
            let name = entry.name();
            if hidden.contains(name) || !on_disk.contains(name) {
                self.remove_entry(name);
                self.file_deleted.emit(&Some(Arc::clone(entry)));
                continue;
            }
            let before = entry.stat();
            if !entry.update(&*self.resolver) {
                self.remove_entry(name);
                self.file_deleted.emit(&Some(Arc::clone(entry)));
                continue;
            }
            if entry.differs_from(before.as_ref()) {
                self.file_changed.emit(&Some(Arc::clone(entry)));
            }
            for size in entry.loaded_thumbnail_sizes() {
                entry.unload_thumbnail(size);
                self.thumbnailer.request(Arc::clone(entry), size);
            }
        }

        let known: HashSet<&str> = current.iter().map(|e| e.name()).collect();
        let mut added: Vec<&String> = on_disk.iter().filter(|n| !known.contains(n.as_str())).collect();
        added.sort();
        for name in added {
            let entry = Arc::new(FileEntry::create(&self.path.join(name), &*self.resolver));
            let inserted = {
                let mut entries = self.entries.lock_ignore_poison();
                if entries.contains_key(name) {
                    false
                } else {
                    entries.insert(name.clone(), Arc::clone(&entry));
                    true
                }
            };
            if inserted {
                self.file_created.emit(&entry);
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the entries, sorted by name. Handles stay valid after removal.
    pub fn entries(&self) -> Vec<Arc<FileEntry>> {
        self.entries.lock_ignore_poison().values().cloned().collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<FileEntry>> {
        self.entries.lock_ignore_poison().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock_ignore_poison().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn owns(&self, entry: &Arc<FileEntry>) -> bool {
        self.find(entry.name()).is_some_and(|own| Arc::ptr_eq(&own, entry))
    }

    /// Names listed in this directory's `.hidden` file at the last load or refresh.
    pub fn hidden_names(&self) -> HashSet<String> {
        self.hidden.lock_ignore_poison().clone()
    }

    /// Adds `entry` to the `.hidden` file. The entry stays listed, flagged hidden, until the
    /// next refresh. Returns whether the write succeeded.
    pub fn add_hidden(&self, entry: &FileEntry) -> bool {
        match hidden::append_hidden(&self.path, entry.name()) {
            Ok(()) => {
                self.hidden.lock_ignore_poison().insert(entry.name().to_string());
                entry.set_user_hidden(true);
                true
            }
            Err(e) => {
                log::warn!("Directory: can't hide {}: {}", entry.path().display(), e);
                false
            }
        }
    }

    /// True when only forced change events are honored for this directory.
    pub fn avoid_changes(&self) -> bool {
        self.avoid_changes.load(Ordering::Relaxed)
    }

    /// Re-reads the mount type and returns the new [`avoid_changes`](Self::avoid_changes).
    pub fn update_avoid_changes(&self) -> bool {
        let avoid = mount::is_unreliable_filesystem(&self.path);
        self.avoid_changes.store(avoid, Ordering::Relaxed);
        avoid
    }

    /// Forces [`avoid_changes`](Self::avoid_changes), for mounts the type check misses.
    pub fn set_avoid_changes(&self, avoid: bool) {
        self.avoid_changes.store(avoid, Ordering::Relaxed);
    }

    /// Requests a thumbnail for `entry` from this directory's thumbnailer.
    pub fn load_thumbnail(&self, entry: &Arc<FileEntry>, size: u32) {
        entry.load_thumbnail(&self.thumbnailer, size);
    }

    pub fn thumbnailer(&self) -> &Thumbnailer {
        &self.thumbnailer
    }

    pub fn notifier(&self) -> Option<&Arc<ChangeNotifier>> {
        self.notifier.as_ref()
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Emitted after a new entry joined the collection.
    pub fn file_created(&self) -> &Signal<Arc<FileEntry>> {
        &self.file_created
    }

    /// Emitted after an entry was re-stated; `None` means the directory itself changed.
    pub fn file_changed(&self) -> &Signal<Option<Arc<FileEntry>>> {
        &self.file_changed
    }

    /// Emitted after an entry left the collection; `None` means the directory itself is gone.
    pub fn file_deleted(&self) -> &Signal<Option<Arc<FileEntry>>> {
        &self.file_deleted
    }

    /// Emitted once, when the initial load completes.
    pub fn file_listed(&self) -> &Signal<()> {
        &self.file_listed
    }

    pub fn thumbnail_loaded(&self) -> &Signal<Arc<FileEntry>> {
        &self.thumbnail_loaded
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        log::debug!("Directory: closing {}", self.path.display());
        self.stopping.store(true, Ordering::Relaxed);
        self.notifier_stop.stop();
        if let Some(notifier) = &self.notifier {
            notifier.stop();
        }
        self.debouncer.cancel();
        self.thumbnailer.join();
        let threads: Vec<JoinHandle<()>> = self.threads.lock_ignore_poison().drain(..).collect();
        for handle in threads {
            join_unless_current(handle);
        }
    }
}

fn push_unique(list: &Mutex<Vec<String>>, name: &str) {
    let mut list = list.lock_ignore_poison();
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

#[cfg(test)]
mod directory_test;
