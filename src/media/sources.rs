/// Concrete `VolumeSource` implementations.
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

use super::{VolumeHandle, VolumeSource};

/// Volumes from a Linux mount table (`/proc/self/mounts` format),
/// restricted to mount points under configured prefixes.
pub struct MountTableSource {
    table: PathBuf,
    prefixes: Vec<PathBuf>,
}

impl MountTableSource {
    pub fn new(table: impl Into<PathBuf>, prefixes: Vec<PathBuf>) -> Self {
        Self {
            table: table.into(),
            prefixes,
        }
    }

    fn parse(&self, content: &[u8]) -> BTreeSet<VolumeHandle> {
        content
            .split(|b| *b == b'\n')
            .filter_map(|line| {
                line.split(|b| b.is_ascii_whitespace())
                    .filter(|field| !field.is_empty())
                    .nth(1)
            })
            .map(unescape_mount_field)
            .filter(|mount| {
                self.prefixes
                    .iter()
                    .any(|prefix| mount.starts_with(prefix) && mount != prefix)
            })
            .map(VolumeHandle::new)
            .collect()
    }
}

impl VolumeSource for MountTableSource {
    fn name(&self) -> &str {
        "mount-table"
    }

    fn enumerate(&mut self) -> std::io::Result<BTreeSet<VolumeHandle>> {
        let content = std::fs::read(&self.table)?;
        Ok(self.parse(&content))
    }
}

/// The kernel escapes space, tab, newline and backslash in mount fields
/// as three-digit octal (`\040`). Other bytes are kept as-is, so mount
/// points that are not valid UTF-8 survive intact.
fn unescape_mount_field(bytes: &[u8]) -> PathBuf {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    PathBuf::from(OsString::from_vec(out))
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Every subdirectory of `root` is a volume, as with `/media/<user>`
/// where the desktop automounter creates one directory per stick.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl VolumeSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    fn enumerate(&mut self) -> std::io::Result<BTreeSet<VolumeHandle>> {
        let mut volumes = BTreeSet::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                volumes.insert(VolumeHandle::new(entry.path()));
            }
        }
        Ok(volumes)
    }
}
