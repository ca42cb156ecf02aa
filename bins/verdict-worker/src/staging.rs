// Staging areas: directories where files are linked into the fixed slots a
// sandboxed program reads from and writes to

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const READ_ONLY_DIR: &str = "ro";
pub const WRITABLE_DIR: &str = "rw";

/// Staging area of the submission under judgement, relative to its sandbox root
pub const PROGRAM_AREA: &str = "env";
/// Staging area of the output validator, relative to the same sandbox root
pub const VALIDATOR_AREA: &str = "valenv";

/// A staging area rooted at one directory.
///
/// Read-only slots live under `<base>/ro`, writable slots under `<base>/rw`.
/// Slot paths are stable for the lifetime of the linker, so a program can be
/// configured once and restaged per test case. Dropping the linker clears it.
#[derive(Debug)]
pub struct FileLinker {
    base: PathBuf,
}

impl FileLinker {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        for dir in [READ_ONLY_DIR, WRITABLE_DIR] {
            let path = base.join(dir);
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create staging directory {}", path.display()))?;
        }
        Ok(Self { base })
    }

    /// Path of the slot `name`
    pub fn path_for(&self, name: &str, writable: bool) -> PathBuf {
        let dir = if writable { WRITABLE_DIR } else { READ_ONLY_DIR };
        self.base.join(dir).join(name)
    }

    /// Stage `source` in the slot `name`, replacing whatever the slot held.
    ///
    /// Writable slots are hard links, so writes land in `source`. Read-only
    /// slots get a private 0444 copy and never share an inode with `source`.
    pub fn link_file(&self, source: &Path, name: &str, writable: bool) -> Result<()> {
        let target = self.path_for(name, writable);
        remove_entry(&target)
            .with_context(|| format!("Failed to clear staging slot {}", target.display()))?;

        let staged = if writable {
            fs::hard_link(source, &target)
        } else {
            fs::copy(source, &target).and_then(|_| {
                fs::set_permissions(&target, fs::Permissions::from_mode(0o444))
            })
        };
        staged.with_context(|| {
            format!("Failed to stage {} into {}", source.display(), target.display())
        })
    }

    /// Create an empty directory in the slot `name`
    pub fn create_dir(&self, name: &str, writable: bool) -> Result<PathBuf> {
        let target = self.path_for(name, writable);
        remove_entry(&target)
            .with_context(|| format!("Failed to clear staging slot {}", target.display()))?;
        fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        Ok(target)
    }

    /// Remove every staged entry. Idempotent.
    pub fn clear(&self) -> Result<()> {
        for dir in [READ_ONLY_DIR, WRITABLE_DIR] {
            let path = self.base.join(dir);
            let entries = match fs::read_dir(&path) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to list {}", path.display()))
                }
            };
            for entry in entries {
                let entry = entry.with_context(|| format!("Failed to list {}", path.display()))?;
                remove_entry(&entry.path()).with_context(|| {
                    format!("Failed to remove {}", entry.path().display())
                })?;
            }
        }
        Ok(())
    }
}

impl Drop for FileLinker {
    fn drop(&mut self) {
        if let Err(e) = self.clear() {
            warn!(base = %self.base.display(), error = %e, "Failed to clear staging area");
        }
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
