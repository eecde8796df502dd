use crate::civic::paths::StorePaths;
use crate::civic::util::{ensure_dir, now_epoch_secs};
use crate::error::IngestError;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub build_id: String,
    pub started_at_epoch_secs: u64,
}

/// Exclusive hold on a store for the length of one run. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    pub fn acquire(paths: &StorePaths) -> Result<Self> {
        ensure_dir(&paths.meta_dir)?;
        let path = paths.lock_file.clone();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if file.try_lock_exclusive().is_err() {
            return Err(IngestError::StoreLocked(path).into());
        }

        let info = LockInfo {
            pid: std::process::id(),
            build_id: env!("INGEST_BUILD_ID").to_string(),
            started_at_epoch_secs: now_epoch_secs()?,
        };
        file.set_len(0)?;
        file.write_all(serde_json::to_string(&info)?.as_bytes())?;
        file.flush()?;
        tracing::debug!(lock = %path.display(), pid = info.pid, "store lock acquired");
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
    }
}

/// Holder of the lock file, if a run left one behind or is in progress.
pub fn read_lock_info(paths: &StorePaths) -> Option<LockInfo> {
    let raw = fs::read_to_string(&paths.lock_file).ok()?;
    serde_json::from_str(raw.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestErrorCode;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_with_locked_code() {
        let tmp = tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let held = StoreLock::acquire(&paths).expect("first lock");
        assert_eq!(read_lock_info(&paths).map(|i| i.pid), Some(std::process::id()));

        let err = StoreLock::acquire(&paths).expect_err("second lock must fail");
        let typed = err.downcast_ref::<IngestError>().expect("typed error");
        assert_eq!(typed.code(), IngestErrorCode::E001Locked);

        drop(held);
        assert!(read_lock_info(&paths).is_none());
        StoreLock::acquire(&paths).expect("lock after release");
    }
}
