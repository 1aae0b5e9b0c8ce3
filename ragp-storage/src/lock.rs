// ragp-storage/src/lock.rs
// Exclusive advisory lock on the storage directory

use crate::error::{StorageError, StorageResult};
use crate::LOCK_FILE;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::path::Path;

/// Held for the lifetime of the engine; a second process opening the same
/// storage directory fails fast instead of corrupting the chunk files.
pub struct DirLock {
    file: fs::File,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join(LOCK_FILE))?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::DirectoryLocked(dir.to_path_buf()))?;
        Ok(Self { file })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
