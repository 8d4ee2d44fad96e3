//! Validation errors for command builders.

use std::fmt;

/// Why a builder refused to produce a command line. Every variant is detected before anything
/// is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildError {
    EmptyPath,
    EmptySource,
    EmptyDestination,
    RootPreserve,
    RootPreserveSource,
    RootPreserveDestination,
    /// A required field was never set
    BadConstruction,
}

impl BuildError {
    /// Stable identifier, like `task_root_preserve`.
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::EmptyPath => "task_empty_path",
            BuildError::EmptySource => "task_empty_source",
            BuildError::EmptyDestination => "task_empty_destination",
            BuildError::RootPreserve => "task_root_preserve",
            BuildError::RootPreserveSource => "task_root_preserve_source",
            BuildError::RootPreserveDestination => "task_root_preserve_destination",
            BuildError::BadConstruction => "task_bad_construction",
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            BuildError::EmptyPath => "path is empty",
            BuildError::EmptySource => "source path is empty",
            BuildError::EmptyDestination => "destination path is empty",
            BuildError::RootPreserve => "refusing to operate on /",
            BuildError::RootPreserveSource => "refusing to use / as the source",
            BuildError::RootPreserveDestination => "refusing to use / as the destination",
            BuildError::BadConstruction => "command is missing a required argument",
        };
        write!(f, "{} ({})", message, self.code())
    }
}

impl std::error::Error for BuildError {}
