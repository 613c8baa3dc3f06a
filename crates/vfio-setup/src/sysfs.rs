//! Low-level sysfs access shared by the stages

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Final path component of a symlink target, or `None` if `link` is not a
/// symlink.
///
/// This is how the bound driver (`<device>/driver`) and IOMMU group
/// (`<device>/iommu_group`) are derived: both are facts read on demand, never
/// cached.
pub fn link_name(link: &Path) -> Option<String> {
    let target = std::fs::read_link(link).ok()?;
    target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
}

/// Write `payload` to an existing control file.
///
/// Control files are never created: a missing file surfaces as
/// `io::ErrorKind::NotFound`.
///
/// # Errors
///
/// Returns the I/O error from opening or writing the file.
pub fn write_control(path: &Path, payload: &str) -> io::Result<()> {
    tracing::debug!(path = %path.display(), payload, "Control write");
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(payload.as_bytes())
}

/// Permission bits (`0o777` mask) of `path`.
///
/// # Errors
///
/// Returns the I/O error from `stat`.
pub fn mode_bits(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode() & 0o777)
}

/// Whether `mode` grants read and write to owner, group and others.
pub const fn is_world_rw(mode: u32) -> bool {
    mode & 0o666 == 0o666
}
