//! The individual builders.

use std::path::{Path, PathBuf};

use super::quote::{quote, quote_path};
use super::{BuildError, BuildState, CommandBuilder, chain, check_path, options};

fn required<T>(value: &Option<T>) -> Result<&T, BuildError> {
    value.as_ref().ok_or(BuildError::BadConstruction)
}

// ============================================================================
// chmod
// ============================================================================

/// `chmod --preserve-root {options} {mode} {path}`
#[derive(Debug, Clone, Default)]
pub struct Chmod {
    state: BuildState,
    recursive: bool,
    verbose: bool,
    mode: Option<u32>,
    path: Option<PathBuf>,
}

impl Chmod {
    pub fn recursive(self) -> Self {
        chain(self, |b| {
            b.recursive = true;
            Ok(())
        })
    }

    pub fn verbose(self) -> Self {
        chain(self, |b| {
            b.verbose = true;
            Ok(())
        })
    }

    /// Permission bits, printed in octal. Anything beyond `0o7777` is rejected.
    pub fn mode(self, mode: u32) -> Self {
        chain(self, |b| {
            if mode > 0o7777 {
                return Err(BuildError::BadConstruction);
            }
            b.mode = Some(mode);
            Ok(())
        })
    }

    pub fn path(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| {
            check_path(path.as_ref(), BuildError::EmptyPath, BuildError::RootPreserve)?;
            b.path = Some(path.as_ref().to_path_buf());
            Ok(())
        })
    }
}

impl CommandBuilder for Chmod {
    fn state(&self) -> &BuildState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BuildState {
        &mut self.state
    }

    fn render(&self) -> Result<String, BuildError> {
        let mode = required(&self.mode)?;
        let path = required(&self.path)?;
        let opts = options(&[(self.recursive, "--recursive"), (self.verbose, "--verbose")]);
        Ok(format!("chmod --preserve-root {} {:o} {}", opts, mode, quote_path(path)))
    }
}

// ============================================================================
// chown
// ============================================================================

/// `chown --preserve-root {options} {owner} {path}`, where owner is `user:group`, `user` or
/// `:group`.
#[derive(Debug, Clone, Default)]
pub struct Chown {
    state: BuildState,
    recursive: bool,
    dereference: bool,
    user: Option<String>,
    group: Option<String>,
    path: Option<PathBuf>,
}

impl Chown {
    pub fn recursive(self) -> Self {
        chain(self, |b| {
            b.recursive = true;
            Ok(())
        })
    }

    pub fn dereference(self) -> Self {
        chain(self, |b| {
            b.dereference = true;
            Ok(())
        })
    }

    pub fn user(self, user: impl Into<String>) -> Self {
        chain(self, |b| {
            let user = user.into();
            if user.is_empty() {
                return Err(BuildError::BadConstruction);
            }
            b.user = Some(user);
            Ok(())
        })
    }

    pub fn group(self, group: impl Into<String>) -> Self {
        chain(self, |b| {
            let group = group.into();
            if group.is_empty() {
                return Err(BuildError::BadConstruction);
            }
            b.group = Some(group);
            Ok(())
        })
    }

    pub fn path(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| {
            check_path(path.as_ref(), BuildError::EmptyPath, BuildError::RootPreserve)?;
            b.path = Some(path.as_ref().to_path_buf());
            Ok(())
        })
    }
}

impl CommandBuilder for Chown {
    fn state(&self) -> &BuildState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BuildState {
        &mut self.state
    }

    fn render(&self) -> Result<String, BuildError> {
        let owner = match (&self.user, &self.group) {
            (Some(user), Some(group)) => format!("{}:{}", user, group),
            (Some(user), None) => user.clone(),
            (None, Some(group)) => format!(":{}", group),
            (None, None) => return Err(BuildError::BadConstruction),
        };
        let path = required(&self.path)?;
        let opts = options(&[(self.recursive, "--recursive"), (self.dereference, "--dereference")]);
        Ok(format!(
            "chown --preserve-root {} {} {}",
            opts,
            quote(&owner),
            quote_path(path)
        ))
    }
}

// ============================================================================
// cp / mv
// ============================================================================

/// `cp {options} {source} {destination}`
#[derive(Debug, Clone, Default)]
pub struct Copy {
    state: BuildState,
    recursive: bool,
    force: bool,
    preserve: bool,
    source: Option<PathBuf>,
    destination: Option<PathBuf>,
}

impl Copy {
    pub fn recursive(self) -> Self {
        chain(self, |b| {
            b.recursive = true;
            Ok(())
        })
    }

    pub fn force(self) -> Self {
        chain(self, |b| {
            b.force = true;
            Ok(())
        })
    }

    /// Keep mode, ownership and timestamps.
    pub fn preserve(self) -> Self {
        chain(self, |b| {
            b.preserve = true;
            Ok(())
        })
    }

    pub fn source(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| {
            check_path(path.as_ref(), BuildError::EmptySource, BuildError::RootPreserveSource)?;
            b.source = Some(path.as_ref().to_path_buf());
            Ok(())
        })
    }

    pub fn destination(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| {
            check_path(
                path.as_ref(),
                BuildError::EmptyDestination,
                BuildError::RootPreserveDestination,
            )?;
            b.destination = Some(path.as_ref().to_path_buf());
            Ok(())
        })
    }
}

impl CommandBuilder for Copy {
    fn state(&self) -> &BuildState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BuildState {
        &mut self.state
    }

    fn render(&self) -> Result<String, BuildError> {
        let source = required(&self.source)?;
        let destination = required(&self.destination)?;
        let opts = options(&[
            (self.recursive, "--recursive"),
            (self.force, "--force"),
            (self.preserve, "--preserve"),
        ]);
        Ok(format!(
            "cp {} {} {}",
            opts,
            quote_path(source),
            quote_path(destination)
        ))
    }
}

/// `mv {options} {source} {destination}`
#[derive(Debug, Clone, Default)]
pub struct Move {
    state: BuildState,
    force: bool,
    no_clobber: bool,
    source: Option<PathBuf>,
    destination: Option<PathBuf>,
}

impl Move {
    pub fn force(self) -> Self {
        chain(self, |b| {
            b.force = true;
            Ok(())
        })
    }

    pub fn no_clobber(self) -> Self {
        chain(self, |b| {
            b.no_clobber = true;
            Ok(())
        })
    }

    pub fn source(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| {
            check_path(path.as_ref(), BuildError::EmptySource, BuildError::RootPreserveSource)?;
            b.source = Some(path.as_ref().to_path_buf());
            Ok(())
        })
    }

    pub fn destination(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| {
            check_path(
                path.as_ref(),
                BuildError::EmptyDestination,
                BuildError::RootPreserveDestination,
            )?;
            b.destination = Some(path.as_ref().to_path_buf());
            Ok(())
        })
    }
}

impl CommandBuilder for Move {
    fn state(&self) -> &BuildState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BuildState {
        &mut self.state
    }

    fn render(&self) -> Result<String, BuildError> {
        let source = required(&self.source)?;
        let destination = required(&self.destination)?;
        let opts = options(&[(self.force, "--force"), (self.no_clobber, "--no-clobber")]);
        Ok(format!(
            "mv {} {} {}",
            opts,
            quote_path(source),
            quote_path(destination)
        ))
    }
}

// ============================================================================
// rm / mkdir
// ============================================================================

/// `rm --preserve-root {options} {path}`
#[derive(Debug, Clone, Default)]
pub struct Remove {
    state: BuildState,
    recursive: bool,
    force: bool,
    path: Option<PathBuf>,
}

impl Remove {
    pub fn recursive(self) -> Self {
        chain(self, |b| {
            b.recursive = true;
            Ok(())
        })
    }

    pub fn force(self) -> Self {
        chain(self, |b| {
            b.force = true;
            Ok(())
        })
    }

    pub fn path(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| {
            check_path(path.as_ref(), BuildError::EmptyPath, BuildError::RootPreserve)?;
            b.path = Some(path.as_ref().to_path_buf());
            Ok(())
        })
    }
}

impl CommandBuilder for Remove {
    fn state(&self) -> &BuildState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BuildState {
        &mut self.state
    }

    fn render(&self) -> Result<String, BuildError> {
        let path = required(&self.path)?;
        let opts = options(&[(self.recursive, "--recursive"), (self.force, "--force")]);
        Ok(format!("rm --preserve-root {} {}", opts, quote_path(path)))
    }
}

/// `mkdir {options} {path}`
#[derive(Debug, Clone, Default)]
pub struct CreateDirectory {
    state: BuildState,
    parents: bool,
    path: Option<PathBuf>,
}

impl CreateDirectory {
    /// Create missing parents, no error if the folder exists.
    pub fn parents(self) -> Self {
        chain(self, |b| {
            b.parents = true;
            Ok(())
        })
    }

    pub fn path(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| {
            check_path(path.as_ref(), BuildError::EmptyPath, BuildError::RootPreserve)?;
            b.path = Some(path.as_ref().to_path_buf());
            Ok(())
        })
    }
}

impl CommandBuilder for CreateDirectory {
    fn state(&self) -> &BuildState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BuildState {
        &mut self.state
    }

    fn render(&self) -> Result<String, BuildError> {
        let path = required(&self.path)?;
        let opts = options(&[(self.parents, "--parents")]);
        Ok(format!("mkdir {} {}", opts, quote_path(path)))
    }
}

// ============================================================================
// ln
// ============================================================================

/// Fields shared by both link builders: `target` is what the link points at, `name` is the
/// link being created.
#[derive(Debug, Clone, Default)]
struct LinkArgs {
    force: bool,
    target: Option<PathBuf>,
    name: Option<PathBuf>,
}

impl LinkArgs {
    fn set_target(&mut self, path: &Path) -> Result<(), BuildError> {
        check_path(path, BuildError::EmptySource, BuildError::RootPreserveSource)?;
        self.target = Some(path.to_path_buf());
        Ok(())
    }

    fn set_name(&mut self, path: &Path) -> Result<(), BuildError> {
        check_path(path, BuildError::EmptyDestination, BuildError::RootPreserveDestination)?;
        self.name = Some(path.to_path_buf());
        Ok(())
    }

    fn render(&self, prefix: &str) -> Result<String, BuildError> {
        let target = required(&self.target)?;
        let name = required(&self.name)?;
        let opts = options(&[(self.force, "--force")]);
        Ok(format!("{} {} {} {}", prefix, opts, quote_path(target), quote_path(name)))
    }
}

/// `ln --symbolic {options} {target} {name}`
#[derive(Debug, Clone, Default)]
pub struct CreateSymlink {
    state: BuildState,
    args: LinkArgs,
}

impl CreateSymlink {
    pub fn force(self) -> Self {
        chain(self, |b| {
            b.args.force = true;
            Ok(())
        })
    }

    pub fn target(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| b.args.set_target(path.as_ref()))
    }

    pub fn name(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| b.args.set_name(path.as_ref()))
    }
}

impl CommandBuilder for CreateSymlink {
    fn state(&self) -> &BuildState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BuildState {
        &mut self.state
    }

    fn render(&self) -> Result<String, BuildError> {
        self.args.render("ln --symbolic")
    }
}

/// `ln {options} {target} {name}`
#[derive(Debug, Clone, Default)]
pub struct CreateHardlink {
    state: BuildState,
    args: LinkArgs,
}

impl CreateHardlink {
    pub fn force(self) -> Self {
        chain(self, |b| {
            b.args.force = true;
            Ok(())
        })
    }

    pub fn target(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| b.args.set_target(path.as_ref()))
    }

    pub fn name(self, path: impl AsRef<Path>) -> Self {
        chain(self, |b| b.args.set_name(path.as_ref()))
    }
}

impl CommandBuilder for CreateHardlink {
    fn state(&self) -> &BuildState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut BuildState {
        &mut self.state
    }

    fn render(&self) -> Result<String, BuildError> {
        self.args.render("ln")
    }
}
