//! Flat-file remote guarded by an advisory lock.
//!
//! Every operation takes an exclusive flock on `<path>.lock` so concurrent
//! processes on the same host serialize their read-modify-write cycles. The
//! store file itself is replaced atomically (temp file + rename, mode 0600).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use envsync_core::{create_private_dir, write_private_atomic, RemoteStore};

use crate::error::RemoteError;
use crate::RemoteTransport;

pub struct FileRemote {
    path: PathBuf,
}

impl FileRemote {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(".lock");
        PathBuf::from(os)
    }

    fn with_exclusive_lock<T>(
        &self,
        f: impl FnOnce() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let lock_path = self.lock_path();
        if let Some(dir) = lock_path.parent() {
            create_private_dir(dir)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = lock_file.set_permissions(std::fs::Permissions::from_mode(0o600));
        }
        lock_file.lock_exclusive()?;
        let result = f();
        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    fn load_unlocked(&self) -> Result<RemoteStore, RemoteError> {
        match std::fs::read(&self.path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(RemoteStore::empty()),
            Err(err) => Err(err.into()),
        }
    }
}

impl RemoteTransport for FileRemote {
    fn load(&self) -> Result<RemoteStore, RemoteError> {
        self.with_exclusive_lock(|| self.load_unlocked())
    }

    fn save(&self, store: &RemoteStore, expected_revision: i64) -> Result<(), RemoteError> {
        self.with_exclusive_lock(|| {
            let current = self.load_unlocked()?;
            if current.revision != expected_revision {
                return Err(RemoteError::RevisionConflict {
                    expected: expected_revision,
                    got: current.revision,
                });
            }
            let mut next = store.clone();
            next.revision = expected_revision + 1;
            let body = serde_json::to_vec_pretty(&next)?;
            write_private_atomic(&self.path, &body)?;
            Ok(())
        })
    }

    fn describe(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}
