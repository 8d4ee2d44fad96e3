//! Single-syscall stat snapshots.
//!
//! On Linux (glibc) a [`FileStat`] comes from one `statx` call, which also yields birth time
//! and the filesystem attribute flags. Elsewhere, or when the kernel lacks `statx`, it falls
//! back to `lstat` through `std::fs::symlink_metadata` and the attribute flags read false.

use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// statx attribute bits (linux/stat.h)
const ATTR_COMPRESSED: u64 = 0x0000_0004;
const ATTR_IMMUTABLE: u64 = 0x0000_0010;
const ATTR_APPEND: u64 = 0x0000_0020;
const ATTR_NODUMP: u64 = 0x0000_0040;
const ATTR_ENCRYPTED: u64 = 0x0000_0800;
const ATTR_AUTOMOUNT: u64 = 0x0000_1000;
const ATTR_MOUNT_ROOT: u64 = 0x0000_2000;
const ATTR_VERITY: u64 = 0x0010_0000;
const ATTR_DAX: u64 = 0x0020_0000;

/// Kind of filesystem object, from the mode's type bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Socket,
    Fifo,
    BlockDevice,
    CharDevice,
    Other,
}

impl FileType {
    pub fn from_mode(mode: u32) -> Self {
        match mode & libc::S_IFMT as u32 {
            m if m == libc::S_IFREG as u32 => FileType::Regular,
            m if m == libc::S_IFDIR as u32 => FileType::Directory,
            m if m == libc::S_IFLNK as u32 => FileType::Symlink,
            m if m == libc::S_IFSOCK as u32 => FileType::Socket,
            m if m == libc::S_IFIFO as u32 => FileType::Fifo,
            m if m == libc::S_IFBLK as u32 => FileType::BlockDevice,
            m if m == libc::S_IFCHR as u32 => FileType::CharDevice,
            _ => FileType::Other,
        }
    }

    fn from_std(ft: std::fs::FileType) -> Self {
        if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_dir() {
            FileType::Directory
        } else if ft.is_file() {
            FileType::Regular
        } else if ft.is_socket() {
            FileType::Socket
        } else if ft.is_fifo() {
            FileType::Fifo
        } else if ft.is_block_device() {
            FileType::BlockDevice
        } else if ft.is_char_device() {
            FileType::CharDevice
        } else {
            FileType::Other
        }
    }
}

/// Immutable snapshot of one stat call. A refresh replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    file_type: FileType,
    mode: u32,
    size: u64,
    blocks: u64,
    blksize: u64,
    nlink: u64,
    uid: u32,
    gid: u32,
    dev: u64,
    ino: u64,
    rdev: u64,
    atime: SystemTime,
    mtime: SystemTime,
    ctime: SystemTime,
    btime: Option<SystemTime>,
    attributes: u64,
}

fn to_system_time(secs: i64, nsecs: u32) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(u64::from(nsecs))
    }
}

impl FileStat {
    /// Stats `path` without following a final symlink.
    ///
    /// Returns `None` when the entry can't be stat'ed; callers read that as "entry gone".
    pub fn refresh(path: &Path) -> Option<FileStat> {
        #[cfg(all(target_os = "linux", target_env = "gnu"))]
        match statx(path) {
            Ok(stat) => return Some(stat),
            Err(e) if e.raw_os_error() == Some(libc::ENOSYS) => {}
            Err(e) => {
                if !matches!(e.raw_os_error(), Some(libc::ENOENT) | Some(libc::ENOTDIR)) {
                    log::debug!("FileStat: statx {} failed: {}", path.display(), e);
                }
                return None;
            }
        }

        match std::fs::symlink_metadata(path) {
            Ok(metadata) => Some(Self::from_metadata(&metadata)),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::debug!("FileStat: lstat {} failed: {}", path.display(), e);
                }
                None
            }
        }
    }

    /// Builds a snapshot from already-fetched metadata (no attribute flags, no extra I/O).
    pub fn from_metadata(metadata: &std::fs::Metadata) -> FileStat {
        FileStat {
            file_type: FileType::from_std(metadata.file_type()),
            mode: metadata.mode(),
            size: metadata.size(),
            blocks: metadata.blocks(),
            blksize: metadata.blksize(),
            nlink: metadata.nlink(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            dev: metadata.dev(),
            ino: metadata.ino(),
            rdev: metadata.rdev(),
            atime: to_system_time(metadata.atime(), metadata.atime_nsec() as u32),
            mtime: to_system_time(metadata.mtime(), metadata.mtime_nsec() as u32),
            ctime: to_system_time(metadata.ctime(), metadata.ctime_nsec() as u32),
            btime: metadata.created().ok(),
            attributes: 0,
        }
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes actually allocated. `st_blocks` counts 512-byte units regardless of the
    /// filesystem block size, so sparse and compressed files come out smaller than `size()`.
    pub fn size_on_disk(&self) -> u64 {
        self.blocks * 512
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Preferred I/O block size.
    pub fn blksize(&self) -> u64 {
        self.blksize
    }

    pub fn nlink(&self) -> u64 {
        self.nlink
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn rdev(&self) -> u64 {
        self.rdev
    }

    pub fn atime(&self) -> SystemTime {
        self.atime
    }

    pub fn mtime(&self) -> SystemTime {
        self.mtime
    }

    pub fn ctime(&self) -> SystemTime {
        self.ctime
    }

    /// Birth time, when the filesystem records one.
    pub fn btime(&self) -> Option<SystemTime> {
        self.btime
    }

    /// Full `st_mode`, including the type bits.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Permission bits only (rwx for owner/group/other plus setuid/setgid/sticky).
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    pub fn is_regular_file(&self) -> bool {
        self.file_type == FileType::Regular
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    pub fn is_socket(&self) -> bool {
        self.file_type == FileType::Socket
    }

    pub fn is_fifo(&self) -> bool {
        self.file_type == FileType::Fifo
    }

    pub fn is_block_device(&self) -> bool {
        self.file_type == FileType::BlockDevice
    }

    pub fn is_char_device(&self) -> bool {
        self.file_type == FileType::CharDevice
    }

    pub fn is_compressed(&self) -> bool {
        self.attributes & ATTR_COMPRESSED != 0
    }

    pub fn is_immutable(&self) -> bool {
        self.attributes & ATTR_IMMUTABLE != 0
    }

    pub fn is_append(&self) -> bool {
        self.attributes & ATTR_APPEND != 0
    }

    pub fn is_nodump(&self) -> bool {
        self.attributes & ATTR_NODUMP != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.attributes & ATTR_ENCRYPTED != 0
    }

    /// Automount trigger directory.
    pub fn is_automount(&self) -> bool {
        self.attributes & ATTR_AUTOMOUNT != 0
    }

    /// Root of a mount.
    pub fn is_mount_root(&self) -> bool {
        self.attributes & ATTR_MOUNT_ROOT != 0
    }

    /// fs-verity protected.
    pub fn is_verity(&self) -> bool {
        self.attributes & ATTR_VERITY != 0
    }

    pub fn is_dax(&self) -> bool {
        self.attributes & ATTR_DAX != 0
    }
}

/// glibc's `makedev` encoding, matching `st_dev` from `lstat`.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn make_dev(major: u32, minor: u32) -> u64 {
    let (major, minor) = (u64::from(major), u64::from(minor));
    ((major & 0xffff_f000) << 32) | ((major & 0x0000_0fff) << 8) | ((minor & 0xffff_ff00) << 12) | (minor & 0x0000_00ff)
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn statx(path: &Path) -> std::io::Result<FileStat> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from_raw_os_error(libc::EINVAL))?;
    let mut buf = MaybeUninit::<libc::statx>::zeroed();
    // SAFETY: c_path is a valid null-terminated C string and buf points to writable statx storage
    let result = unsafe {
        libc::statx(
            libc::AT_FDCWD,
            c_path.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
            libc::STATX_BASIC_STATS | libc::STATX_BTIME,
            buf.as_mut_ptr(),
        )
    };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: statx succeeded and filled the buffer
    let stx = unsafe { buf.assume_init() };

    let mode = u32::from(stx.stx_mode);
    let btime = if stx.stx_mask & libc::STATX_BTIME != 0 {
        Some(to_system_time(stx.stx_btime.tv_sec, stx.stx_btime.tv_nsec))
    } else {
        None
    };

    Ok(FileStat {
        file_type: FileType::from_mode(mode),
        mode,
        size: stx.stx_size,
        blocks: stx.stx_blocks,
        blksize: u64::from(stx.stx_blksize),
        nlink: u64::from(stx.stx_nlink),
        uid: stx.stx_uid,
        gid: stx.stx_gid,
        dev: make_dev(stx.stx_dev_major, stx.stx_dev_minor),
        ino: stx.stx_ino,
        rdev: make_dev(stx.stx_rdev_major, stx.stx_rdev_minor),
        atime: to_system_time(stx.stx_atime.tv_sec, stx.stx_atime.tv_nsec),
        mtime: to_system_time(stx.stx_mtime.tv_sec, stx.stx_mtime.tv_nsec),
        ctime: to_system_time(stx.stx_ctime.tv_sec, stx.stx_ctime.tv_nsec),
        btime,
        attributes: stx.stx_attributes & stx.stx_attributes_mask,
    })
}
