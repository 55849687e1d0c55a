// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

/// The process CWD is global state; one guard at a time may rebase it.
fn cwd_lock() -> Arc<Mutex<()>> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone()
}

/// Scoped change of the process working directory.
///
/// Acquires the process-wide CWD mutex, chdirs into `dir`, and restores the
/// previous directory on drop — on every exit path, including errors and
/// cancellation unwinds.  Tools that resolve relative paths run inside one
/// of these whenever the session has a `base_dir`.
pub struct CwdGuard {
    previous: PathBuf,
    _lock: OwnedMutexGuard<()>,
}

impl CwdGuard {
    pub async fn enter(dir: &Path) -> anyhow::Result<Self> {
        let lock = cwd_lock().lock_owned().await;
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(dir)?;
        Ok(Self {
            previous,
            _lock: lock,
        })
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            warn!(dir = %self.previous.display(), error = %e, "failed to restore working directory");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enters_and_restores_on_drop() {
        let before = std::env::current_dir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        {
            let _guard = CwdGuard::enter(dir.path()).await.unwrap();
            let inside = std::env::current_dir().unwrap();
            assert_eq!(inside.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
        }
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[tokio::test]
    async fn missing_directory_fails_without_changing_cwd() {
        let before = std::env::current_dir().unwrap();
        assert!(CwdGuard::enter(Path::new("/no/such/dir")).await.is_err());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }
}
