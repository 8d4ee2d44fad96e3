//! Type definitions for file tasks.
//!
//! Contains task kinds, states, overwrite policy, chmod toggles and the per-item error record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

// ============================================================================
// Task kinds and states
// ============================================================================

/// Kind of bulk operation a task performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Copy,
    Move,
    Link,
    Delete,
    Trash,
    ChmodChown,
    Exec,
}

impl TaskType {
    /// Whether the operation places items into a destination directory.
    pub fn needs_destination(self) -> bool {
        matches!(self, TaskType::Copy | TaskType::Move | TaskType::Link)
    }

    /// Whether finished tasks of this kind flush pending writes with `sync()`.
    pub fn writes_data(self) -> bool {
        matches!(self, TaskType::Copy | TaskType::Move | TaskType::Link)
    }

    /// Verb used in logs and error records.
    pub fn verb(self) -> &'static str {
        match self {
            TaskType::Copy => "copy",
            TaskType::Move => "move",
            TaskType::Link => "link",
            TaskType::Delete => "delete",
            TaskType::Trash => "trash",
            TaskType::ChmodChown => "chmod",
            TaskType::Exec => "exec",
        }
    }
}

/// Externally visible task state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Running,
    /// Still computing the total size for progress reporting
    SizeTimeout,
    /// Blocked until the owner decides what to do with an existing destination
    QueryOverwrite,
    Error,
    Pause,
    /// Eligible to run but held back by the owner
    Queue,
    Finish,
}

impl TaskState {
    /// States the owner can request through [`FileTask::pause`](super::FileTask::pause).
    pub fn is_requestable(self) -> bool {
        matches!(self, TaskState::Running | TaskState::Pause | TaskState::Queue)
    }

    pub(super) fn is_held(self) -> bool {
        matches!(self, TaskState::Pause | TaskState::Queue)
    }
}

// ============================================================================
// Overwrite policy
// ============================================================================

/// What happens when a destination path already exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteMode {
    /// Suspend and query the owner through the state callback
    #[default]
    Ask,
    OverwriteAll,
    SkipAll,
    /// Append " (1)", " (2)", etc. to conflicting names
    AutoRenameAll,
}

/// The owner's answer to a `QueryOverwrite`. "All" variants persist for the rest of the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverwriteDecision {
    Overwrite,
    OverwriteAll,
    Skip,
    SkipAll,
    /// Use this name instead; a bare name is resolved next to the original destination
    Rename(PathBuf),
    AutoRename,
    AutoRenameAll,
    /// Abort the whole task
    Cancel,
}

impl OverwriteDecision {
    /// The mode this decision leaves behind for later conflicts, if it is persistent.
    pub(super) fn persistent_mode(&self) -> Option<OverwriteMode> {
        match self {
            OverwriteDecision::OverwriteAll => Some(OverwriteMode::OverwriteAll),
            OverwriteDecision::SkipAll => Some(OverwriteMode::SkipAll),
            OverwriteDecision::AutoRenameAll => Some(OverwriteMode::AutoRenameAll),
            _ => None,
        }
    }
}

/// How per-item failures affect the rest of the task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record the failure and continue with the next item
    #[default]
    Continue,
    /// Move the task to `Error` on the first failure
    StopOnFirst,
}

// ============================================================================
// chmod toggles
// ============================================================================

/// Permission changes for a chmod/chown task. `Some(true)` sets a bit, `Some(false)` clears it,
/// `None` leaves it alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChmodAction {
    pub owner_read: Option<bool>,
    pub owner_write: Option<bool>,
    pub owner_exec: Option<bool>,
    pub group_read: Option<bool>,
    pub group_write: Option<bool>,
    pub group_exec: Option<bool>,
    pub other_read: Option<bool>,
    pub other_write: Option<bool>,
    pub other_exec: Option<bool>,
    pub set_uid: Option<bool>,
    pub set_gid: Option<bool>,
    pub sticky: Option<bool>,
}

impl ChmodAction {
    /// An action that forces every bit to match `mode`.
    pub fn from_mode(mode: u32) -> Self {
        let bit = |mask: u32| Some(mode & mask != 0);
        ChmodAction {
            owner_read: bit(0o400),
            owner_write: bit(0o200),
            owner_exec: bit(0o100),
            group_read: bit(0o040),
            group_write: bit(0o020),
            group_exec: bit(0o010),
            other_read: bit(0o004),
            other_write: bit(0o002),
            other_exec: bit(0o001),
            set_uid: bit(0o4000),
            set_gid: bit(0o2000),
            sticky: bit(0o1000),
        }
    }

    fn toggles(&self) -> [(Option<bool>, u32); 12] {
        [
            (self.owner_read, 0o400),
            (self.owner_write, 0o200),
            (self.owner_exec, 0o100),
            (self.group_read, 0o040),
            (self.group_write, 0o020),
            (self.group_exec, 0o010),
            (self.other_read, 0o004),
            (self.other_write, 0o002),
            (self.other_exec, 0o001),
            (self.set_uid, 0o4000),
            (self.set_gid, 0o2000),
            (self.sticky, 0o1000),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.toggles().iter().all(|(toggle, _)| toggle.is_none())
    }

    /// Applies the toggles to the permission bits of `mode`.
    pub fn apply(&self, mode: u32) -> u32 {
        self.toggles().iter().fold(mode & 0o7777, |acc, (toggle, mask)| match toggle {
            Some(true) => acc | mask,
            Some(false) => acc & !mask,
            None => acc,
        })
    }
}

// ============================================================================
// Error record
// ============================================================================

/// One recorded per-item failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    /// OS error number when the failure came from a syscall
    pub errno: Option<i32>,
    /// What the task was doing ("copy", "mkdir", "chown", ...)
    pub action: String,
    pub path: PathBuf,
    pub target: Option<PathBuf>,
    pub message: String,
}

impl TaskError {
    pub fn new(action: &str, path: &Path, target: Option<&Path>, message: impl Into<String>) -> Self {
        Self {
            errno: None,
            action: action.to_string(),
            path: path.to_path_buf(),
            target: target.map(Path::to_path_buf),
            message: message.into(),
        }
    }

    pub fn from_io(action: &str, path: &Path, target: Option<&Path>, err: &io::Error) -> Self {
        Self {
            errno: err.raw_os_error(),
            ..Self::new(action, path, target, err.to_string())
        }
    }

    /// One-line description for log views.
    pub fn user_message(&self) -> String {
        let reason = match self.errno {
            Some(libc::EACCES) | Some(libc::EPERM) => "permission denied".to_string(),
            Some(libc::ENOENT) => "no longer exists".to_string(),
            Some(libc::EEXIST) => "destination already exists".to_string(),
            Some(libc::ENOSPC) => "not enough space on the destination".to_string(),
            Some(libc::EROFS) => "read-only file system".to_string(),
            _ => self.message.clone(),
        };
        match &self.target {
            Some(target) => format!(
                "Cannot {} {} to {}: {}",
                self.action,
                self.path.display(),
                target.display(),
                reason
            ),
            None => format!("Cannot {} {}: {}", self.action, self.path.display(), reason),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errno {
            Some(errno) => write!(f, "{} (errno {})", self.user_message(), errno),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for TaskError {}
