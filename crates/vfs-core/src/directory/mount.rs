//! Filesystem-type checks for mounts that deliver unreliable change notifications.

use std::path::Path;

// statfs f_type magic numbers (linux/magic.h and friends)
const NFS_SUPER_MAGIC: i64 = 0x6969;
const SMB_SUPER_MAGIC: i64 = 0x517B;
const CIFS_MAGIC_NUMBER: i64 = 0xFF53_4D42;
const SMB2_MAGIC_NUMBER: i64 = 0xFE53_4D42;
const FUSE_SUPER_MAGIC: i64 = 0x6573_5546;
const CODA_SUPER_MAGIC: i64 = 0x7375_7245;
const AFS_SUPER_MAGIC: i64 = 0x5346_414F;
const V9FS_MAGIC: i64 = 0x0102_1997;

const UNRELIABLE_FS_TYPES: &[i64] = &[
    NFS_SUPER_MAGIC,
    SMB_SUPER_MAGIC,
    CIFS_MAGIC_NUMBER,
    SMB2_MAGIC_NUMBER,
    FUSE_SUPER_MAGIC,
    CODA_SUPER_MAGIC,
    AFS_SUPER_MAGIC,
    V9FS_MAGIC,
];

/// Reads the filesystem type magic for `path`, or `None` if statfs fails.
#[cfg(target_os = "linux")]
pub fn filesystem_type(path: &Path) -> Option<i64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: statfs only writes into the zeroed struct we pass
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statfs(c_path.as_ptr(), &mut stat) } != 0 {
        return None;
    }
    // f_type's width varies by target; the magic numbers all fit in 32 bits
    #[allow(clippy::unnecessary_cast, reason = "f_type is i32 or i64 depending on target")]
    let f_type = stat.f_type as i64 & 0xFFFF_FFFF;
    Some(f_type)
}

#[cfg(not(target_os = "linux"))]
pub fn filesystem_type(_path: &Path) -> Option<i64> {
    None
}

/// True for network and FUSE mounts, where change notifications are often missing or late.
pub fn is_unreliable_filesystem(path: &Path) -> bool {
    let Some(f_type) = filesystem_type(path) else {
        return false;
    };
    let unreliable = UNRELIABLE_FS_TYPES.contains(&f_type);
    if unreliable {
        log::debug!(
            "is_unreliable_filesystem: {} is on filesystem type {:#x}",
            path.display(),
            f_type
        );
    }
    unreliable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_path_is_reliable() {
        assert!(!is_unreliable_filesystem(Path::new("/definitely/not/here")));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_reads_type_of_existing_path() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(filesystem_type(tmp.path()).is_some());
    }
}
