//! Background file tasks (copy, move, link, delete, trash, chmod/chown, exec).
//!
//! A [`FileTask`] runs on its own worker thread and reports every state transition through a
//! single state callback, which executes on the worker thread. The owner steers the task with
//! [`pause`](FileTask::pause), [`answer_overwrite`](FileTask::answer_overwrite) and
//! [`try_abort_task`](FileTask::try_abort_task); all three only flip shared state and wake the
//! worker, they never block.
//!
//! Safety features:
//! - Copies land in a uuid-suffixed temp file and are renamed into place, so aborted or failed
//!   copies never leave a partial file under the final name
//! - Destination-inside-source is rejected before anything is touched
//! - Symlinks are copied as links, never followed
//! - Special files (sockets, FIFOs, devices) are skipped

mod helpers;
mod ops;
mod progress;
mod types;


use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::command::{BuildError, CommandBuilder};
use crate::config::Settings;
use crate::ignore_poison::{CondvarIgnorePoison, IgnorePoison, IgnorePoisonRw, join_unless_current};

pub use helpers::find_unique_name;
pub use progress::{TaskProgress, format_duration};
pub use types::{ChmodAction, ErrorPolicy, OverwriteDecision, OverwriteMode, TaskError, TaskState, TaskType};

use progress::ProgressTracker;

/// Upper bound on the size pre-scan; past it the total stays unknown.
const SIZE_SCAN_LIMIT: Duration = Duration::from_secs(5);

/// Receives `(task, new state, payload)` on the worker thread. The payload is the item being
/// processed, or the conflicting destination for `QueryOverwrite`. Returning a decision for a
/// `QueryOverwrite` resolves it immediately; `None` leaves the worker waiting for
/// [`FileTask::answer_overwrite`]. Return values for other states are ignored.
pub type StateCallback = Arc<dyn Fn(&FileTask, TaskState, Option<&Path>) -> Option<OverwriteDecision> + Send + Sync>;

#[derive(Debug, Clone)]
struct TaskConfig {
    recursive: bool,
    chmod: ChmodAction,
    owner: Option<u32>,
    group: Option<u32>,
    overwrite_mode: OverwriteMode,
    error_policy: ErrorPolicy,
    exec_command: Option<String>,
    exec_working_dir: Option<PathBuf>,
    progress_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            chmod: ChmodAction::default(),
            owner: None,
            group: None,
            overwrite_mode: OverwriteMode::Ask,
            error_policy: ErrorPolicy::Continue,
            exec_command: None,
            exec_working_dir: None,
            progress_interval: Duration::from_millis(Settings::default().progress_interval_ms),
        }
    }
}

/// Mutable task state, published under one mutex.
struct Status {
    state: TaskState,
    /// Hold requested by the owner (`Pause` or `Queue`)
    hold: Option<TaskState>,
    tracker: ProgressTracker,
    current_file: Option<PathBuf>,
    errors: Vec<TaskError>,
    log: String,
    decision: Option<OverwriteDecision>,
    started: bool,
    finished: bool,
    last_report: Option<Instant>,
}

struct TaskInner {
    task_type: TaskType,
    sources: Vec<PathBuf>,
    destination: Option<PathBuf>,
    config: Mutex<TaskConfig>,
    status: Mutex<Status>,
    cond: Condvar,
    aborted: AtomicBool,
    /// Set when the task as a whole has failed
    failed: AtomicBool,
    callback: RwLock<Option<StateCallback>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one bulk file operation. Clones share the same task.
#[derive(Clone)]
pub struct FileTask {
    inner: Arc<TaskInner>,
}

impl fmt::Debug for FileTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTask")
            .field("type", &self.inner.task_type)
            .field("sources", &self.inner.sources)
            .field("destination", &self.inner.destination)
            .field("state", &self.state())
            .finish()
    }
}

impl FileTask {
    pub fn new(task_type: TaskType, sources: Vec<PathBuf>, destination: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                task_type,
                sources,
                destination,
                config: Mutex::new(TaskConfig::default()),
                status: Mutex::new(Status {
                    state: TaskState::Queue,
                    hold: None,
                    tracker: ProgressTracker::new(),
                    current_file: None,
                    errors: Vec::new(),
                    log: String::new(),
                    decision: None,
                    started: false,
                    finished: false,
                    last_report: None,
                }),
                cond: Condvar::new(),
                aborted: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                callback: RwLock::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Copies `sources` into the directory `destination`.
    pub fn copy(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(TaskType::Copy, sources, Some(destination.into()))
    }

    /// Moves `sources` into the directory `destination`.
    pub fn move_to(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(TaskType::Move, sources, Some(destination.into()))
    }

    /// Creates symlinks to `sources` inside the directory `destination`.
    pub fn link(sources: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self::new(TaskType::Link, sources, Some(destination.into()))
    }

    pub fn delete(sources: Vec<PathBuf>) -> Self {
        Self::new(TaskType::Delete, sources, None)
    }

    pub fn trash(sources: Vec<PathBuf>) -> Self {
        Self::new(TaskType::Trash, sources, None)
    }

    pub fn chmod_chown(sources: Vec<PathBuf>) -> Self {
        Self::new(TaskType::ChmodChown, sources, None)
    }

    /// Runs `command` with `/bin/sh -c`. Accepts the output of a [`crate::command`] builder.
    pub fn exec(command: impl Into<String>) -> Self {
        let task = Self::new(TaskType::Exec, Vec::new(), None);
        task.set_exec_command(command);
        task
    }

    /// An exec task running the line compiled by `builder`.
    pub fn from_command<B: CommandBuilder>(builder: &B) -> Result<Self, BuildError> {
        Ok(Self::exec(builder.dump()?))
    }

    pub fn task_type(&self) -> TaskType {
        self.inner.task_type
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.inner.sources
    }

    pub fn destination(&self) -> Option<&Path> {
        self.inner.destination.as_deref()
    }

    /// Whether two handles refer to the same task.
    pub fn ptr_eq(&self, other: &FileTask) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Recurse into directories for delete and chmod/chown. Defaults to `true`.
    pub fn set_recursive(&self, recursive: bool) {
        self.inner.config.lock_ignore_poison().recursive = recursive;
    }

    pub fn set_chmod_action(&self, action: ChmodAction) {
        self.inner.config.lock_ignore_poison().chmod = action;
    }

    /// New owner and/or group for chmod/chown tasks; `None` leaves the id unchanged.
    pub fn set_chown(&self, owner: Option<u32>, group: Option<u32>) {
        let mut config = self.inner.config.lock_ignore_poison();
        config.owner = owner;
        config.group = group;
    }

    pub fn set_overwrite_mode(&self, mode: OverwriteMode) {
        self.inner.config.lock_ignore_poison().overwrite_mode = mode;
    }

    pub fn overwrite_mode(&self) -> OverwriteMode {
        self.inner.config.lock_ignore_poison().overwrite_mode
    }

    pub fn set_error_policy(&self, policy: ErrorPolicy) {
        self.inner.config.lock_ignore_poison().error_policy = policy;
    }

    pub fn set_exec_command(&self, command: impl Into<String>) {
        self.inner.config.lock_ignore_poison().exec_command = Some(command.into());
    }

    pub fn set_exec_working_dir(&self, dir: impl Into<PathBuf>) {
        self.inner.config.lock_ignore_poison().exec_working_dir = Some(dir.into());
    }

    /// Minimum spacing of in-file progress callbacks. Item boundaries always report.
    pub fn set_progress_interval(&self, interval: Duration) {
        self.inner.config.lock_ignore_poison().progress_interval = interval;
    }

    /// Takes task-related preferences (progress interval) from `settings`.
    pub fn apply_settings(&self, settings: &Settings) {
        self.set_progress_interval(Duration::from_millis(settings.progress_interval_ms));
    }

    pub fn set_state_callback<F>(&self, callback: F)
    where
        F: Fn(&FileTask, TaskState, Option<&Path>) -> Option<OverwriteDecision> + Send + Sync + 'static,
    {
        *self.inner.callback.write_ignore_poison() = Some(Arc::new(callback));
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Starts the worker thread. Calling it again is a no-op.
    pub fn run_task(&self) -> io::Result<()> {
        {
            let mut status = self.inner.status.lock_ignore_poison();
            if status.started {
                return Ok(());
            }
            status.started = true;
        }

        let task = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("vfs-task-{}", self.inner.task_type.verb()))
            .spawn(move || task.run_worker());

        match spawned {
            Ok(handle) => {
                *self.inner.worker.lock_ignore_poison() = Some(handle);
                Ok(())
            }
            Err(e) => {
                warn!("Couldn't start {} task: {}", self.inner.task_type.verb(), e);
                self.record_error(TaskError::from_io(
                    "start",
                    self.inner.sources.first().map(PathBuf::as_path).unwrap_or(Path::new("")),
                    None,
                    &e,
                ));
                self.inner.failed.store(true, Ordering::Relaxed);
                self.finish();
                Err(e)
            }
        }
    }

    /// Requests `Pause`, `Queue` or `Running`. The worker picks the request up at its next
    /// checkpoint. Returns `false` for other states or a finished task.
    pub fn pause(&self, state: TaskState) -> bool {
        if !state.is_requestable() {
            return false;
        }
        let mut status = self.inner.status.lock_ignore_poison();
        if status.finished {
            return false;
        }
        status.hold = state.is_held().then_some(state);
        if !status.started {
            status.state = state;
        }
        self.inner.cond.notify_all();
        true
    }

    /// Requests cooperative cancellation and returns immediately.
    pub fn try_abort_task(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        let _status = self.inner.status.lock_ignore_poison();
        self.inner.cond.notify_all();
    }

    /// Requests cancellation and waits for the worker to finish.
    pub fn abort_task(&self) {
        self.try_abort_task();
        self.join();
    }

    /// Waits for the worker thread, if one was started.
    pub fn join(&self) {
        let handle = self.inner.worker.lock_ignore_poison().take();
        if let Some(handle) = handle {
            join_unless_current(handle);
        }
    }

    /// Resolves a pending `QueryOverwrite`. Returns `false` if no query is pending.
    pub fn answer_overwrite(&self, decision: OverwriteDecision) -> bool {
        let mut status = self.inner.status.lock_ignore_poison();
        if status.state != TaskState::QueryOverwrite || status.decision.is_some() {
            return false;
        }
        status.decision = Some(decision);
        self.inner.cond.notify_all();
        true
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn state(&self) -> TaskState {
        self.inner.status.lock_ignore_poison().state
    }

    pub fn is_finished(&self) -> bool {
        self.inner.status.lock_ignore_poison().finished
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn err_count(&self) -> usize {
        self.inner.status.lock_ignore_poison().errors.len()
    }

    pub fn errors(&self) -> Vec<TaskError> {
        self.inner.status.lock_ignore_poison().errors.clone()
    }

    /// Running text log: one line per recorded error, plus exec output.
    pub fn log(&self) -> String {
        self.inner.status.lock_ignore_poison().log.clone()
    }

    pub fn snapshot(&self) -> TaskProgress {
        let status = self.inner.status.lock_ignore_poison();
        let mut progress = status.tracker.snapshot(status.state);
        progress.current_file = status.current_file.clone();
        progress.err_count = status.errors.len();
        progress.aborted = self.is_aborted();
        progress
    }

    // ========================================================================
    // Conflict and safety checks (worker side)
    // ========================================================================

    /// Fails the task if the destination is one of the source directories or inside one.
    pub fn check_dest_in_src(&self) -> bool {
        let Some(destination) = &self.inner.destination else {
            return false;
        };
        let Some(source) = helpers::source_containing(&self.inner.sources, destination) else {
            return false;
        };
        self.record_error(TaskError::new(
            self.inner.task_type.verb(),
            source,
            Some(destination.as_path()),
            "destination is inside the source folder",
        ));
        self.inner.failed.store(true, Ordering::Relaxed);
        true
    }

    /// Decides what to do with `dest` when it already exists. Returns whether to proceed and the
    /// path to write to, which differs from `dest` after a rename.
    ///
    /// In `Ask` mode this blocks the calling (worker) thread until the owner answers.
    pub fn check_overwrite(&self, dest: &Path) -> (bool, PathBuf) {
        let mut dest = dest.to_path_buf();
        loop {
            if std::fs::symlink_metadata(&dest).is_err() {
                return (true, dest);
            }

            let decision = match self.overwrite_mode() {
                OverwriteMode::OverwriteAll => return (true, dest),
                OverwriteMode::SkipAll => return (false, dest),
                OverwriteMode::AutoRenameAll => return (true, find_unique_name(&dest)),
                OverwriteMode::Ask => self.query_overwrite(&dest),
            };
            if let Some(mode) = decision.persistent_mode() {
                self.set_overwrite_mode(mode);
            }

            match decision {
                OverwriteDecision::Overwrite | OverwriteDecision::OverwriteAll => return (true, dest),
                OverwriteDecision::Skip | OverwriteDecision::SkipAll => return (false, dest),
                OverwriteDecision::AutoRename | OverwriteDecision::AutoRenameAll => {
                    return (true, find_unique_name(&dest));
                }
                OverwriteDecision::Rename(name) => {
                    // The new name may collide as well, so it goes through the same checks
                    dest = match dest.parent() {
                        Some(parent) if name.is_relative() => parent.join(name),
                        _ => name,
                    };
                }
                OverwriteDecision::Cancel => {
                    self.try_abort_task();
                    return (false, dest);
                }
            }
        }
    }

    fn query_overwrite(&self, dest: &Path) -> OverwriteDecision {
        {
            let mut status = self.inner.status.lock_ignore_poison();
            status.decision = None;
            status.state = TaskState::QueryOverwrite;
        }
        debug!("Asking about existing destination {}", dest.display());

        let decision = match self.emit(TaskState::QueryOverwrite, Some(dest)) {
            Some(decision) => {
                self.inner.status.lock_ignore_poison().decision = None;
                decision
            }
            None => {
                let status = self.inner.status.lock_ignore_poison();
                let mut status = self
                    .inner
                    .cond
                    .wait_while_ignore_poison(status, |s| s.decision.is_none() && !self.is_aborted());
                status.decision.take().unwrap_or(OverwriteDecision::Cancel)
            }
        };

        self.set_state(TaskState::Running, Some(dest));
        decision
    }

    // ========================================================================
    // Worker internals
    // ========================================================================

    fn run_worker(&self) {
        info!(
            "Starting {} task with {} source(s)",
            self.inner.task_type.verb(),
            self.inner.sources.len()
        );
        self.inner.status.lock_ignore_poison().tracker.start();

        if self.checkpoint() {
            self.set_state(TaskState::Running, None);
            if self.prepare() {
                match self.inner.task_type {
                    TaskType::Copy => self.run_copy(),
                    TaskType::Move => self.run_move(),
                    TaskType::Link => self.run_link(),
                    TaskType::Delete => self.run_delete(),
                    TaskType::Trash => self.run_trash(),
                    TaskType::ChmodChown => self.run_chmod_chown(),
                    TaskType::Exec => self.run_exec(),
                }
            }
        }

        self.finish();
    }

    /// Validates the task and sizes it. Returns `false` if the task must not proceed.
    fn prepare(&self) -> bool {
        if self.inner.task_type.needs_destination() {
            match &self.inner.destination {
                Some(destination) if destination.is_dir() => {}
                Some(destination) => {
                    self.fail(TaskError::new(
                        self.inner.task_type.verb(),
                        destination,
                        None,
                        "destination is not a folder",
                    ));
                    return false;
                }
                None => {
                    self.fail(TaskError::new(
                        self.inner.task_type.verb(),
                        Path::new(""),
                        None,
                        "no destination given",
                    ));
                    return false;
                }
            }
            if self.check_dest_in_src() {
                return false;
            }
        }

        if self.inner.task_type != TaskType::Exec {
            self.compute_total_size();
        }
        !self.should_stop()
    }

    fn compute_total_size(&self) {
        self.set_state(TaskState::SizeTimeout, None);
        let deadline = Instant::now() + SIZE_SCAN_LIMIT;
        match helpers::scan_size(&self.inner.sources, deadline) {
            Some(total) => {
                debug!("Task total size: {} bytes", total);
                self.inner.status.lock_ignore_poison().tracker.set_total(total);
            }
            None => debug!("Size scan exceeded {:?}, total stays unknown", SIZE_SCAN_LIMIT),
        }
        self.set_state(TaskState::Running, None);
    }

    fn finish(&self) {
        let failed = self.inner.failed.load(Ordering::Relaxed);
        let aborted = self.is_aborted();
        if failed {
            self.set_state(TaskState::Error, None);
        }

        {
            let mut status = self.inner.status.lock_ignore_poison();
            if !failed && !aborted {
                status.tracker.complete();
            }
            status.state = TaskState::Finish;
            status.finished = true;
            status.current_file = None;
            info!(
                "{} task finished: {} error(s){}",
                self.inner.task_type.verb(),
                status.errors.len(),
                if aborted { ", aborted" } else { "" }
            );
        }
        self.inner.cond.notify_all();

        if self.inner.task_type.writes_data() {
            helpers::spawn_async_sync();
        }
        self.emit(TaskState::Finish, None);
    }

    /// Invokes the state callback outside every task lock.
    fn emit(&self, state: TaskState, path: Option<&Path>) -> Option<OverwriteDecision> {
        let callback = self.inner.callback.read_ignore_poison().clone();
        callback.and_then(|callback| callback(self, state, path))
    }

    fn set_state(&self, state: TaskState, path: Option<&Path>) {
        self.inner.status.lock_ignore_poison().state = state;
        self.emit(state, path);
    }

    /// Honors pause/queue requests, then reports whether the worker may continue.
    fn checkpoint(&self) -> bool {
        let mut held = self.inner.status.lock_ignore_poison().hold;
        if held.is_none() {
            return !self.should_stop();
        }

        while let Some(hold) = held {
            if self.is_aborted() {
                break;
            }
            debug!("Task held in {:?}", hold);
            self.set_state(hold, None);
            let status = self.inner.status.lock_ignore_poison();
            let status = self
                .inner
                .cond
                .wait_while_ignore_poison(status, |s| s.hold == Some(hold) && !self.is_aborted());
            held = status.hold;
        }

        if self.should_stop() {
            return false;
        }
        self.set_state(TaskState::Running, None);
        true
    }

    fn should_stop(&self) -> bool {
        self.is_aborted() || self.inner.failed.load(Ordering::Relaxed)
    }

    fn set_current(&self, path: &Path) {
        self.inner.status.lock_ignore_poison().current_file = Some(path.to_path_buf());
    }

    fn add_progress(&self, bytes: u64) {
        self.inner.status.lock_ignore_poison().tracker.add(bytes);
    }

    /// Whether the total is known, in which case skipped work is accounted for.
    fn total_known(&self) -> bool {
        self.inner.status.lock_ignore_poison().tracker.total().is_some()
    }

    /// Reports progress for `path`, at most once per progress interval unless `force`d.
    fn report_progress(&self, path: &Path, force: bool) {
        let interval = self.inner.config.lock_ignore_poison().progress_interval;
        {
            let mut status = self.inner.status.lock_ignore_poison();
            let now = Instant::now();
            let due = status.last_report.is_none_or(|last| now.duration_since(last) >= interval);
            if !force && !due {
                return;
            }
            status.last_report = Some(now);
        }
        self.emit(TaskState::Running, Some(path));
    }

    fn item_finished(&self, path: &Path) {
        self.inner.status.lock_ignore_poison().tracker.item_done();
        self.report_progress(path, true);
    }

    /// Records a per-item failure. Under `StopOnFirst` the whole task fails.
    fn record_error(&self, error: TaskError) {
        warn!("{}", error);
        let stop = self.inner.config.lock_ignore_poison().error_policy == ErrorPolicy::StopOnFirst;
        {
            let mut status = self.inner.status.lock_ignore_poison();
            status.log.push_str(&error.user_message());
            status.log.push('\n');
            status.errors.push(error);
        }
        if stop {
            self.inner.failed.store(true, Ordering::Relaxed);
        }
    }

    fn fail(&self, error: TaskError) {
        self.record_error(error);
        self.inner.failed.store(true, Ordering::Relaxed);
    }

    fn append_log(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut status = self.inner.status.lock_ignore_poison();
        status.log.push_str(text);
        if !text.ends_with('\n') {
            status.log.push('\n');
        }
    }
}
