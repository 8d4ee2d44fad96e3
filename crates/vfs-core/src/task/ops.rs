//! Per-item operations run by the task worker.

use log::debug;
use std::ffi::CString;
use std::fs::{self, Metadata};
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use walkdir::WalkDir;

use super::helpers::{self, CopyOutcome};
use super::{FileTask, TaskError};
use crate::ignore_poison::IgnorePoison;

/// How often a running exec task polls its child for exit and abort.
const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl FileTask {
    /// Runs `op` for every source until the task stops, reporting each finished item.
    fn for_each_source(&self, mut op: impl FnMut(&Path)) {
        let sources = self.inner.sources.clone();
        for source in &sources {
            if !self.checkpoint() {
                break;
            }
            self.set_current(source);
            op(source);
            self.item_finished(source);
        }
    }

    /// Target path for `source` inside the task destination.
    fn target_for(&self, source: &Path) -> Option<PathBuf> {
        let destination = self.inner.destination.as_ref()?;
        let name = source.file_name()?;
        Some(destination.join(name))
    }

    fn missing_name(&self, source: &Path) {
        self.record_error(TaskError::new(
            self.inner.task_type.verb(),
            source,
            None,
            "source has no file name",
        ));
    }

    /// Accounts for work that won't be done, so progress still reaches the total.
    fn skip(&self, source: &Path) {
        debug!("Skipping {}", source.display());
        if self.total_known() {
            self.add_progress(helpers::tree_size(source));
        }
    }

    // ========================================================================
    // Copy
    // ========================================================================

    pub(super) fn run_copy(&self) {
        self.for_each_source(|source| match self.target_for(source) {
            Some(target) => self.copy_path(source, &target),
            None => self.missing_name(source),
        });
    }

    /// Resolves conflicts for `target`, then copies `source` onto it. Existing directories are
    /// merged without asking.
    fn copy_path(&self, source: &Path, target: &Path) {
        if self.should_stop() {
            return;
        }
        let metadata = match fs::symlink_metadata(source) {
            Ok(metadata) => metadata,
            Err(e) => {
                self.record_error(TaskError::from_io("copy", source, Some(target), &e));
                return;
            }
        };

        let target_is_dir = fs::symlink_metadata(target).is_ok_and(|m| m.is_dir());
        let target = if source == target {
            helpers::find_unique_name(target)
        } else if metadata.is_dir() && target_is_dir {
            target.to_path_buf()
        } else {
            match self.check_overwrite(target) {
                (true, resolved) => resolved,
                (false, _) => {
                    self.skip(source);
                    return;
                }
            }
        };

        self.copy_resolved(source, &target, &metadata);
    }

    fn copy_resolved(&self, source: &Path, target: &Path, metadata: &Metadata) {
        let file_type = metadata.file_type();
        if file_type.is_dir() {
            self.copy_directory(source, target, metadata);
        } else if file_type.is_symlink() {
            self.copy_symlink(source, target);
        } else if file_type.is_file() {
            self.copy_regular(source, target);
        } else {
            debug!("Skipping special file {}", source.display());
        }
    }

    fn copy_directory(&self, source: &Path, target: &Path, metadata: &Metadata) {
        // Only a real directory is merged into; links and files in the way were already
        // accepted for overwrite and get replaced
        let target_is_dir = fs::symlink_metadata(target).is_ok_and(|m| m.is_dir());
        if !target_is_dir
            && let Err(e) = remove_non_dir(target).and_then(|()| fs::create_dir(target))
        {
            self.record_error(TaskError::from_io("create folder", target, None, &e));
            return;
        }

        let children = match sorted_children(source) {
            Ok(children) => children,
            Err(e) => {
                self.record_error(TaskError::from_io("read", source, None, &e));
                return;
            }
        };

        for child in children {
            if !self.checkpoint() {
                return;
            }
            let Some(name) = child.file_name() else { continue };
            self.set_current(&child);
            self.copy_path(&child, &target.join(name));
        }

        if let Err(e) = helpers::copy_attributes(metadata, target) {
            debug!("Couldn't copy attributes to {}: {}", target.display(), e);
        }
    }

    fn copy_symlink(&self, source: &Path, target: &Path) {
        let result = fs::read_link(source).and_then(|link| {
            remove_non_dir(target)?;
            symlink(link, target)
        });
        if let Err(e) = result {
            self.record_error(TaskError::from_io("copy", source, Some(target), &e));
        }
    }

    fn copy_regular(&self, source: &Path, target: &Path) {
        let result = helpers::copy_file_chunked(source, target, |bytes| {
            self.add_progress(bytes);
            self.report_progress(source, false);
            self.checkpoint()
        });
        match result {
            Ok(CopyOutcome::Copied) => {}
            Ok(CopyOutcome::Aborted) => debug!("Copy of {} aborted, partial file removed", source.display()),
            Err(e) => self.record_error(TaskError::from_io("copy", source, Some(target), &e)),
        }
    }

    // ========================================================================
    // Move
    // ========================================================================

    pub(super) fn run_move(&self) {
        self.for_each_source(|source| match self.target_for(source) {
            Some(target) => self.move_path(source, &target),
            None => self.missing_name(source),
        });
    }

    /// Renames `source` to `target`, merging into existing directories and falling back to
    /// copy + delete across filesystems.
    fn move_path(&self, source: &Path, target: &Path) {
        if self.should_stop() {
            return;
        }
        if source == target {
            self.skip(source);
            return;
        }
        let metadata = match fs::symlink_metadata(source) {
            Ok(metadata) => metadata,
            Err(e) => {
                self.record_error(TaskError::from_io("move", source, Some(target), &e));
                return;
            }
        };

        let target_is_dir = fs::symlink_metadata(target).is_ok_and(|m| m.is_dir());
        if metadata.is_dir() && target_is_dir {
            self.merge_directory(source, target);
            return;
        }

        let target = match self.check_overwrite(target) {
            (true, resolved) => resolved,
            (false, _) => {
                self.skip(source);
                return;
            }
        };

        // rename(2) won't put a directory over a file or link
        if metadata.is_dir()
            && let Err(e) = remove_non_dir(&target)
        {
            self.record_error(TaskError::from_io("move", source, Some(target.as_path()), &e));
            return;
        }

        let size = if self.total_known() { helpers::tree_size(source) } else { 0 };
        match fs::rename(source, &target) {
            Ok(()) => self.add_progress(size),
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                debug!("{} is on another filesystem, copying instead", target.display());
                self.copy_then_delete(source, &target, &metadata);
            }
            Err(e) => self.record_error(TaskError::from_io("move", source, Some(target.as_path()), &e)),
        }
    }

    fn merge_directory(&self, source: &Path, target: &Path) {
        let children = match sorted_children(source) {
            Ok(children) => children,
            Err(e) => {
                self.record_error(TaskError::from_io("read", source, None, &e));
                return;
            }
        };
        for child in children {
            if !self.checkpoint() {
                return;
            }
            let Some(name) = child.file_name() else { continue };
            self.set_current(&child);
            self.move_path(&child, &target.join(name));
        }
        // Skipped children keep the source folder alive, which is fine
        if let Err(e) = fs::remove_dir(source) {
            debug!("Kept {} after merge: {}", source.display(), e);
        }
    }

    fn copy_then_delete(&self, source: &Path, target: &Path, metadata: &Metadata) {
        let errors_before = self.err_count();
        self.copy_resolved(source, target, metadata);
        if self.should_stop() || self.err_count() != errors_before {
            // Keep the source whenever the copy is incomplete
            return;
        }
        let removed = if metadata.is_dir() {
            fs::remove_dir_all(source)
        } else {
            fs::remove_file(source)
        };
        if let Err(e) = removed {
            self.record_error(TaskError::from_io("delete", source, None, &e));
        }
    }

    // ========================================================================
    // Link
    // ========================================================================

    pub(super) fn run_link(&self) {
        self.for_each_source(|source| {
            let Some(target) = self.target_for(source) else {
                self.missing_name(source);
                return;
            };
            let target = match self.check_overwrite(&target) {
                (true, resolved) => resolved,
                (false, _) => {
                    self.skip(source);
                    return;
                }
            };
            let link_to = std::path::absolute(source).unwrap_or_else(|_| source.to_path_buf());
            let result = remove_non_dir(&target).and_then(|()| symlink(&link_to, &target));
            match result {
                Ok(()) => {
                    if self.total_known() {
                        self.add_progress(helpers::tree_size(source));
                    }
                }
                Err(e) => self.record_error(TaskError::from_io("link", source, Some(target.as_path()), &e)),
            }
        });
    }

    // ========================================================================
    // Delete and trash
    // ========================================================================

    pub(super) fn run_delete(&self) {
        let recursive = self.inner.config.lock_ignore_poison().recursive;
        self.for_each_source(|source| {
            let metadata = match fs::symlink_metadata(source) {
                Ok(metadata) => metadata,
                Err(e) => {
                    self.record_error(TaskError::from_io("delete", source, None, &e));
                    return;
                }
            };
            if !metadata.is_dir() {
                self.delete_one(source, &metadata);
            } else if recursive {
                self.delete_tree(source);
            } else if let Err(e) = fs::remove_dir(source) {
                self.record_error(TaskError::from_io("delete", source, None, &e));
            }
        });
    }

    fn delete_tree(&self, root: &Path) {
        for entry in WalkDir::new(root).follow_links(false).contents_first(true) {
            if !self.checkpoint() {
                return;
            }
            match entry {
                Ok(entry) => match entry.metadata() {
                    Ok(metadata) => {
                        self.set_current(entry.path());
                        self.delete_one(entry.path(), &metadata);
                    }
                    Err(e) => self.record_error(TaskError::from_io("delete", entry.path(), None, &e.into())),
                },
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    self.record_error(TaskError::from_io("delete", &path, None, &e.into()));
                }
            }
        }
    }

    fn delete_one(&self, path: &Path, metadata: &Metadata) {
        let result = if metadata.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) if metadata.is_file() => self.add_progress(metadata.len()),
            Ok(()) => {}
            Err(e) => self.record_error(TaskError::from_io("delete", path, None, &e)),
        }
    }

    pub(super) fn run_trash(&self) {
        self.for_each_source(|source| {
            let size = if self.total_known() { helpers::tree_size(source) } else { 0 };
            match trash::delete(source) {
                Ok(()) => self.add_progress(size),
                Err(e) => self.record_error(TaskError::new("trash", source, None, e.to_string())),
            }
        });
    }

    // ========================================================================
    // chmod / chown
    // ========================================================================

    pub(super) fn run_chmod_chown(&self) {
        let config = self.inner.config.lock_ignore_poison().clone();
        self.for_each_source(|source| {
            if !config.recursive {
                self.change_attributes(source, &config);
                return;
            }
            for entry in WalkDir::new(source).follow_links(false) {
                if !self.checkpoint() {
                    return;
                }
                match entry {
                    Ok(entry) => {
                        self.set_current(entry.path());
                        self.change_attributes(entry.path(), &config);
                    }
                    Err(e) => {
                        let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.to_path_buf());
                        self.record_error(TaskError::from_io("chmod", &path, None, &e.into()));
                    }
                }
            }
        });
    }

    fn change_attributes(&self, path: &Path, config: &super::TaskConfig) {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                self.record_error(TaskError::from_io("chmod", path, None, &e));
                return;
            }
        };

        // Symlink permissions are meaningless on Linux; only ownership applies to the link itself
        if !config.chmod.is_empty() && !metadata.file_type().is_symlink() {
            let current = metadata.permissions().mode() & 0o7777;
            let wanted = config.chmod.apply(current);
            if wanted != current
                && let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(wanted))
            {
                self.record_error(TaskError::from_io("chmod", path, None, &e));
            }
        }

        if (config.owner.is_some() || config.group.is_some())
            && let Err(e) = lchown(path, config.owner, config.group)
        {
            self.record_error(TaskError::from_io("chown", path, None, &e));
        }

        if metadata.is_file() {
            self.add_progress(metadata.len());
        }
    }

    // ========================================================================
    // Exec
    // ========================================================================

    pub(super) fn run_exec(&self) {
        let (command, working_dir) = {
            let config = self.inner.config.lock_ignore_poison();
            (config.exec_command.clone(), config.exec_working_dir.clone())
        };
        let Some(command) = command.filter(|c| !c.trim().is_empty()) else {
            self.record_error(TaskError::new("exec", Path::new(""), None, "no command given"));
            return;
        };
        let command_path = PathBuf::from(&command);
        self.set_current(&command_path);

        let mut shell = Command::new("/bin/sh");
        shell
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(dir) = &working_dir {
            shell.current_dir(dir);
        }

        debug!("Running `{}`", command);
        let mut child = match shell.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.record_error(TaskError::from_io("exec", &command_path, working_dir.as_deref(), &e));
                return;
            }
        };
        let stdout = child.stdout.take().map(spawn_pipe_reader);
        let stderr = child.stderr.take().map(spawn_pipe_reader);

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if !self.checkpoint() {
                        debug!("Killing `{}`", command);
                        // The whole process group, so grandchildren release the pipes too
                        unsafe {
                            libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL);
                        }
                        let _ = child.wait();
                        break None;
                    }
                    std::thread::sleep(EXEC_POLL_INTERVAL);
                }
                Err(e) => {
                    self.record_error(TaskError::from_io("exec", &command_path, None, &e));
                    break None;
                }
            }
        };

        let Some(status) = status else {
            return;
        };
        for reader in [stdout, stderr].into_iter().flatten() {
            self.append_log(&reader.join().unwrap_or_default());
        }
        if !status.success() {
            let reason = match status.code() {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by a signal".to_string(),
            };
            self.record_error(TaskError::new("exec", &command_path, None, reason));
        }
        self.item_finished(&command_path);
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn sorted_children(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut children = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    children.sort();
    Ok(children)
}

/// Clears the way for a replacement. Directories are never removed implicitly.
fn remove_non_dir(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => Err(io::Error::from_raw_os_error(libc::EISDIR)),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn lchown(path: &Path, owner: Option<u32>, group: Option<u32>) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    // -1 leaves the id unchanged
    let uid = owner.unwrap_or(u32::MAX) as libc::uid_t;
    let gid = group.unwrap_or(u32::MAX) as libc::gid_t;
    let result = unsafe { libc::lchown(c_path.as_ptr(), uid, gid) };
    if result == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}
