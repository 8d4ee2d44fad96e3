use std::path::PathBuf;

/// Errors raised synchronously when installing or removing a watch.
#[derive(Debug)]
pub enum NotifyError {
    /// The path to watch does not exist.
    DoesNotExist(PathBuf),
    /// A file was passed where a directory was expected, or the reverse.
    NotExpectedType { path: PathBuf, expected: &'static str },
    /// `unwatch` on a path that has no watch.
    NotWatched(PathBuf),
    /// The OS watch backend refused the request.
    Backend(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::DoesNotExist(path) => write!(f, "{} does not exist", path.display()),
            NotifyError::NotExpectedType { path, expected } => {
                write!(f, "{} is not a {}", path.display(), expected)
            }
            NotifyError::NotWatched(path) => write!(f, "{} is not watched", path.display()),
            NotifyError::Backend(msg) => write!(f, "Watch backend error: {msg}"),
        }
    }
}

impl std::error::Error for NotifyError {}

impl From<::notify::Error> for NotifyError {
    fn from(e: ::notify::Error) -> Self {
        NotifyError::Backend(e.to_string())
    }
}
