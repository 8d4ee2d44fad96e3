//! Path watches with per-event observers.
//!
//! [`ChangeNotifier`] wraps the platform watcher from the `notify` crate (inotify on Linux).
//! Raw backend events are queued on a channel and translated into single-bit
//! [`Notification`]s by a dispatch loop ([`ChangeNotifier::run`]) on the caller's thread.
//! Observers run synchronously on that thread, so a slow observer delays every watch.

mod error;
mod event;

pub use error::NotifyError;
pub use event::{EventMask, Notification};

use ::notify::event::{AccessKind, AccessMode, Flag, ModifyKind, RenameMode};
use ::notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::ignore_poison::{IgnorePoison, IgnorePoisonRw};

/// How often a blocked `run` re-checks its stop token.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

type Observer = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Cooperative cancellation flag shared between a dispatch loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum Message {
    Raw(::notify::Result<Event>),
    Synthetic(Notification),
    Wake,
}

pub struct ChangeNotifier {
    watcher: Mutex<RecommendedWatcher>,
    sender: Sender<Message>,
    receiver: Mutex<Receiver<Message>>,
    /// Installed watches and the events each one asked for.
    watches: RwLock<HashMap<PathBuf, EventMask>>,
    /// Keyed by single event bit.
    observers: RwLock<HashMap<EventMask, Observer>>,
    unexpected: RwLock<Option<Observer>>,
    ignored: Mutex<HashSet<PathBuf>>,
    ignored_once: Mutex<HashSet<PathBuf>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("watches", &self.watches.read_ignore_poison().len())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl ChangeNotifier {
    pub fn new() -> Result<Self, NotifyError> {
        let (sender, receiver) = mpsc::channel();
        let backend_sender = sender.clone();
        let watcher = RecommendedWatcher::new(
            move |result: ::notify::Result<Event>| {
                // The receiver only goes away with the notifier itself
                let _ = backend_sender.send(Message::Raw(result));
            },
            Config::default(),
        )?;

        Ok(Self {
            watcher: Mutex::new(watcher),
            sender,
            receiver: Mutex::new(receiver),
            watches: RwLock::new(HashMap::new()),
            observers: RwLock::new(HashMap::new()),
            unexpected: RwLock::new(None),
            ignored: Mutex::new(HashSet::new()),
            ignored_once: Mutex::new(HashSet::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Watches a single non-directory path.
    pub fn watch_file(&self, path: &Path, mask: EventMask) -> Result<(), NotifyError> {
        if check_exists(path)?.is_dir() {
            return Err(NotifyError::NotExpectedType {
                path: path.to_path_buf(),
                expected: "file",
            });
        }
        self.add_watch(path, mask)
    }

    /// Watches a directory and its direct children.
    pub fn watch_directory(&self, path: &Path, mask: EventMask) -> Result<(), NotifyError> {
        if !check_exists(path)?.is_dir() {
            return Err(NotifyError::NotExpectedType {
                path: path.to_path_buf(),
                expected: "directory",
            });
        }
        self.add_watch(path, mask)
    }

    /// Watches `path` and every directory below it, each with its own watch.
    /// Returns the number of directories watched.
    pub fn watch_path_recursively(&self, path: &Path, mask: EventMask) -> Result<usize, NotifyError> {
        if !check_exists(path)?.is_dir() {
            return Err(NotifyError::NotExpectedType {
                path: path.to_path_buf(),
                expected: "directory",
            });
        }

        let mut count = 0;
        for entry in walkdir::WalkDir::new(path).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::debug!("Notifier: skipping unreadable subtree: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            self.add_watch(entry.path(), mask)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn unwatch(&self, path: &Path) -> Result<(), NotifyError> {
        if self.watches.write_ignore_poison().remove(path).is_none() {
            return Err(NotifyError::NotWatched(path.to_path_buf()));
        }
        self.watcher.lock_ignore_poison().unwatch(path)?;
        log::debug!("Notifier: unwatched {}", path.display());
        Ok(())
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watches.read_ignore_poison().contains_key(path)
    }

    fn add_watch(&self, path: &Path, mask: EventMask) -> Result<(), NotifyError> {
        self.watcher
            .lock_ignore_poison()
            .watch(path, RecursiveMode::NonRecursive)?;
        self.watches.write_ignore_poison().insert(path.to_path_buf(), mask);
        log::debug!("Notifier: watching {} for {:?}", path.display(), mask);
        Ok(())
    }

    /// Registers `observer` for one event. A later registration for the same event replaces
    /// this one. Multi-bit masks register every bit, like [`on_events`](Self::on_events).
    pub fn on_event<F>(&self, event: EventMask, observer: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(observer));
    }

    /// Fans the same observer out to every event in `events`.
    pub fn on_events<F>(&self, events: &[EventMask], observer: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let observer: Observer = Arc::new(observer);
        for event in events {
            self.register(*event, Arc::clone(&observer));
        }
    }

    fn register(&self, events: EventMask, observer: Observer) {
        let mut observers = self.observers.write_ignore_poison();
        for event in events.single_events() {
            observers.insert(event, Arc::clone(&observer));
        }
    }

    /// Fallback for events with no registered observer. Without one, such events are
    /// logged at warn level.
    pub fn on_unexpected_event<F>(&self, observer: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        *self.unexpected.write_ignore_poison() = Some(Arc::new(observer));
    }

    /// Drops every future event for `path`.
    pub fn ignore(&self, path: &Path) {
        self.ignored.lock_ignore_poison().insert(path.to_path_buf());
    }

    /// Drops the next event for `path` only.
    pub fn ignore_once(&self, path: &Path) {
        self.ignored_once.lock_ignore_poison().insert(path.to_path_buf());
    }

    pub fn unignore(&self, path: &Path) {
        self.ignored.lock_ignore_poison().remove(path);
        self.ignored_once.lock_ignore_poison().remove(path);
    }

    /// Queues a notification as if the backend had produced it.
    pub fn inject(&self, notification: Notification) {
        let _ = self.sender.send(Message::Synthetic(notification));
    }

    /// Dispatches events until `token` or [`stop`](Self::stop) fires.
    pub fn run(&self, token: &StopToken) {
        log::debug!("Notifier: dispatch loop started");
        while !self.should_stop(token) {
            let message = self.receiver.lock_ignore_poison().recv_timeout(STOP_POLL_INTERVAL);
            match message {
                Ok(message) => self.handle(message),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("Notifier: dispatch loop finished");
    }

    /// Waits up to `timeout` for one queued message and dispatches it. Returns false if
    /// nothing arrived or the notifier is stopped.
    pub fn run_once(&self, token: &StopToken, timeout: Duration) -> bool {
        if self.should_stop(token) {
            return false;
        }
        let message = self.receiver.lock_ignore_poison().recv_timeout(timeout);
        match message {
            Ok(Message::Wake) => false,
            Ok(message) => {
                self.handle(message);
                true
            }
            Err(_) => false,
        }
    }

    /// Stops the dispatch loop and wakes it if blocked. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.sender.send(Message::Wake);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn should_stop(&self, token: &StopToken) -> bool {
        token.is_stopped() || self.is_stopped()
    }

    fn handle(&self, message: Message) {
        match message {
            Message::Raw(Ok(event)) => {
                for notification in self.translate(&event) {
                    self.dispatch(notification);
                }
            }
            Message::Raw(Err(e)) => log::warn!("Notifier: backend error: {}", e),
            Message::Synthetic(notification) => self.dispatch(notification),
            Message::Wake => {}
        }
    }

    /// Maps one backend event to zero or more single-bit notifications.
    fn translate(&self, event: &Event) -> Vec<Notification> {
        let watches = self.watches.read_ignore_poison();

        if event.flag() == Some(Flag::Rescan) {
            return watches
                .keys()
                .map(|w| Notification::new(EventMask::QUEUE_OVERFLOW, w.clone(), w.clone()))
                .collect();
        }
        // Both halves of a rename also arrive as separate From/To events
        if matches!(event.kind, EventKind::Modify(ModifyKind::Name(RenameMode::Both))) {
            return Vec::new();
        }

        let mut notifications = Vec::new();
        for path in &event.paths {
            let Some(watched) = watched_for(&watches, path) else {
                log::debug!("Notifier: event for unwatched path {}", path.display());
                continue;
            };
            let is_self = watched.as_path() == path.as_path();
            let Some(bit) = event_bit(&event.kind, path, is_self) else {
                continue;
            };
            notifications.push(Notification::new(bit, path.clone(), watched));
        }
        notifications
    }

    fn dispatch(&self, notification: Notification) {
        if self.ignored.lock_ignore_poison().contains(&notification.path) {
            return;
        }
        if self.ignored_once.lock_ignore_poison().remove(&notification.path) {
            return;
        }

        let mask = self
            .watches
            .read_ignore_poison()
            .get(&notification.watched)
            .copied()
            .unwrap_or(EventMask::ALL);
        if !(mask | EventMask::ALWAYS_DELIVERED).intersects(notification.event) {
            return;
        }

        let observer = self.observers.read_ignore_poison().get(&notification.event).cloned();
        if let Some(observer) = observer {
            observer(&notification);
            return;
        }
        let fallback = self.unexpected.read_ignore_poison().clone();
        match fallback {
            Some(fallback) => fallback(&notification),
            None => log::warn!(
                "Notifier: unhandled {} event for {}",
                notification.event.event_name(),
                notification.path.display()
            ),
        }
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.stop();
    }
}

fn check_exists(path: &Path) -> Result<fs::Metadata, NotifyError> {
    fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => NotifyError::DoesNotExist(path.to_path_buf()),
        _ => NotifyError::Backend(format!("{}: {}", path.display(), e)),
    })
}

/// The watch an event path belongs to: the path itself, or its parent directory.
fn watched_for(watches: &HashMap<PathBuf, EventMask>, path: &Path) -> Option<PathBuf> {
    if watches.contains_key(path) {
        return Some(path.to_path_buf());
    }
    path.parent().filter(|p| watches.contains_key(*p)).map(Path::to_path_buf)
}

fn event_bit(kind: &EventKind, path: &Path, is_self: bool) -> Option<EventMask> {
    let bit = match kind {
        EventKind::Access(AccessKind::Open(_)) => EventMask::OPEN,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => EventMask::CLOSE_WRITE,
        EventKind::Access(AccessKind::Close(_)) => EventMask::CLOSE_NOWRITE,
        EventKind::Access(_) => EventMask::ACCESS,
        EventKind::Create(_) => EventMask::CREATE,
        EventKind::Modify(ModifyKind::Metadata(_)) => EventMask::ATTRIB,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => EventMask::MOVED_FROM,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => EventMask::MOVED_TO,
        EventKind::Modify(ModifyKind::Name(_)) if is_self => EventMask::MOVE_SELF,
        // Direction unknown: whichever side of the rename the path is on now
        EventKind::Modify(ModifyKind::Name(_)) => {
            if path.symlink_metadata().is_ok() {
                EventMask::MOVED_TO
            } else {
                EventMask::MOVED_FROM
            }
        }
        EventKind::Modify(_) => EventMask::MODIFY,
        EventKind::Remove(_) if is_self => EventMask::DELETE_SELF,
        EventKind::Remove(_) => EventMask::DELETE,
        EventKind::Other => EventMask::IGNORED,
        EventKind::Any => return None,
    };
    Some(bit)
}

#[cfg(test)]
mod notifier_test;
