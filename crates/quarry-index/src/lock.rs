use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use fs2::FileExt as _;

use crate::error::{IndexError, Result};

/// Exclusive ownership of a store directory, held for the life of the store.
///
/// `fs2` locks are process-scoped on Unix, so a process-wide set of held paths
/// additionally rejects a second owner inside the same process.
#[derive(Debug)]
pub(crate) struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Takes the lock at `path` without blocking; fails with
    /// [`IndexError::Locked`] when someone else owns it.
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let key = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => parent
                .canonicalize()
                .map(|parent| parent.join(name))
                .unwrap_or_else(|_| path.to_path_buf()),
            _ => path.to_path_buf(),
        };

        {
            let mut held = held_locks()
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !held.insert(key.clone()) {
                return Err(IndexError::Locked {
                    path: path.to_path_buf(),
                });
            }
        }

        let locked = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .and_then(|file| file.try_lock_exclusive().map(|()| file));

        match locked {
            Ok(file) => Ok(Self { file, path: key }),
            Err(err) => {
                release(&key);
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
                {
                    Err(IndexError::Locked {
                        path: path.to_path_buf(),
                    })
                } else {
                    Err(err.into())
                }
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        release(&self.path);
    }
}

fn held_locks() -> &'static Mutex<HashSet<PathBuf>> {
    static HELD: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    HELD.get_or_init(|| Mutex::new(HashSet::new()))
}

fn release(path: &Path) {
    let mut held = held_locks()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    held.remove(path);
}
