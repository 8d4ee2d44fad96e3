//! Shell command builders for chmod, chown, cp, mv, rm, mkdir and ln.
//!
//! Each builder is a small value type configured by chaining:
//!
//! ```
//! use vfs_core::command::{self, CommandBuilder};
//!
//! let line = command::chmod().mode(0o700).path("/does-not-exist").compile().dump();
//! assert_eq!(line.unwrap(), "chmod --preserve-root  700 \"/does-not-exist\"");
//! ```
//!
//! Validation happens while chaining and at [`compile`](CommandBuilder::compile). Empty paths
//! and `/` are rejected, and the first error sticks: later calls are no-ops and
//! [`dump`](CommandBuilder::dump) returns it. All paths are double-quoted, so the resulting
//! line can be handed to [`FileTask::exec`](crate::FileTask::exec) or any POSIX shell.

mod builders;
mod error;
mod quote;


use std::path::{Component, Path};

pub use builders::{Chmod, Chown, Copy, CreateDirectory, CreateHardlink, CreateSymlink, Move, Remove};
pub use error::BuildError;
pub use quote::{quote, unquote};

/// Compiled command line or the first validation error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildState {
    error: Option<BuildError>,
    command: Option<String>,
}

/// Behavior shared by every builder.
pub trait CommandBuilder: Sized + Clone {
    #[doc(hidden)]
    fn state(&self) -> &BuildState;

    #[doc(hidden)]
    fn state_mut(&mut self) -> &mut BuildState;

    /// Produces the command line from fully validated fields.
    #[doc(hidden)]
    fn render(&self) -> Result<String, BuildError>;

    /// Validates the configuration and stores the command line, or the error.
    fn compile(mut self) -> Self {
        if self.state().error.is_none() && self.state().command.is_none() {
            match self.render() {
                Ok(command) => self.state_mut().command = Some(command),
                Err(error) => self.state_mut().error = Some(error),
            }
        }
        self
    }

    fn error(&self) -> Option<BuildError> {
        self.state().error
    }

    /// The compiled command line. Compiles a copy first if needed.
    fn dump(&self) -> Result<String, BuildError> {
        if let Some(error) = self.state().error {
            return Err(error);
        }
        match &self.state().command {
            Some(command) => Ok(command.clone()),
            None => self.clone().compile().dump(),
        }
    }
}

/// Applies one chained change unless an error is already stored. Any change discards a
/// previously compiled line.
fn chain<B, F>(mut builder: B, change: F) -> B
where
    B: CommandBuilder,
    F: FnOnce(&mut B) -> Result<(), BuildError>,
{
    if builder.state().error.is_some() {
        return builder;
    }
    builder.state_mut().command = None;
    if let Err(error) = change(&mut builder) {
        builder.state_mut().error = Some(error);
    }
    builder
}

/// Rejects empty paths and the filesystem root.
fn check_path(path: &Path, empty: BuildError, root: BuildError) -> Result<(), BuildError> {
    if path.as_os_str().is_empty() {
        return Err(empty);
    }
    if path.components().all(|c| c == Component::RootDir) {
        return Err(root);
    }
    Ok(())
}

/// Joins set flags with single spaces; no flags yields an empty string.
fn options(flags: &[(bool, &str)]) -> String {
    flags
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, flag)| *flag)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn chmod() -> Chmod {
    Chmod::default()
}

pub fn chown() -> Chown {
    Chown::default()
}

pub fn copy() -> Copy {
    Copy::default()
}

pub fn move_file() -> Move {
    Move::default()
}

pub fn remove() -> Remove {
    Remove::default()
}

pub fn create_directory() -> CreateDirectory {
    CreateDirectory::default()
}

pub fn create_symlink() -> CreateSymlink {
    CreateSymlink::default()
}

pub fn create_hardlink() -> CreateHardlink {
    CreateHardlink::default()
}
