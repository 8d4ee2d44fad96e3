//! Directory monitoring and background file tasks for file managers.
//!
//! Two halves:
//! - [`Directory`] keeps a live snapshot of one directory: an initial bulk listing followed by
//!   debounced change notifications, exposed as `file_created` / `file_changed` / `file_deleted`
//!   signals.
//! - [`FileTask`] runs one long bulk operation (copy, move, link, delete, trash, chmod/chown,
//!   exec) on a worker thread with progress, pause/queue, abort and overwrite-conflict queries.
//!
//! The [`command`] builders compile shell-safe command lines for the same operations.

// Dead code and unused imports are errors
#![deny(unused)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod cache;
pub mod command;
pub mod config;
pub mod debounce;
pub mod directory;
pub mod entry;
mod ignore_poison;
pub mod logging;
pub mod mime;
pub mod notifier;
pub mod signal;
pub mod stat;
pub mod task;
pub mod thumbnailer;


pub use cache::SmartCache;
pub use command::{BuildError, CommandBuilder};
pub use config::{Settings, load_settings};
pub use directory::{Directory, VfsContext};
pub use entry::FileEntry;
pub use mime::{GuessMimeResolver, MimeResolver, MimeType};
pub use notifier::{ChangeNotifier, EventMask, Notification, NotifyError, StopToken};
pub use signal::{MainQueue, Signal};
pub use stat::{FileStat, FileType};
pub use task::{
    ChmodAction, ErrorPolicy, FileTask, OverwriteDecision, OverwriteMode, StateCallback, TaskError, TaskProgress,
    TaskState, TaskType,
};
pub use thumbnailer::Thumbnailer;
