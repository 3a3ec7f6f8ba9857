//! Advisory file locking (spec.md §6 "locking"), out of scope beyond one
//! concrete implementation. Grounded on the pack's chronicle-rs writer
//! lock: plain `flock(2)`, blocking, no lock-file metadata since the mbox
//! itself is the lock target.

use std::fs::File;
use std::os::unix::io::AsRawFd;

use crate::errors::SyncResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

/// Advisory lock on the mbox file (spec.md §4.1 step 2: "read lock if
/// read-only or lock-reading, otherwise write lock").
pub trait FileLock {
    /// Acquire `kind`, blocking until available.
    fn lock(&self, file: &File, kind: LockKind) -> SyncResult<()>;
    /// Drop a write lock down to a read lock without ever leaving the file
    /// unlocked (spec.md §4.1 step 6: "drop to read-lock if needed").
    fn downgrade(&self, file: &File) -> SyncResult<()>;
    fn unlock(&self, file: &File) -> SyncResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnixFileLock;

impl FileLock for UnixFileLock {
    fn lock(&self, file: &File, kind: LockKind) -> SyncResult<()> {
        let op = match kind {
            LockKind::Read => libc::LOCK_SH,
            LockKind::Write => libc::LOCK_EX,
        };
        let res = unsafe { libc::flock(file.as_raw_fd(), op) };
        if res != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn downgrade(&self, file: &File) -> SyncResult<()> {
        self.lock(file, LockKind::Read)
    }

    fn unlock(&self, file: &File) -> SyncResult<()> {
        let res = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
        if res != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

/// RAII guard ensuring the lock is released on every exit path (spec.md
/// §5: "Locks are always released on every exit path").
pub struct LockGuard<'a, L: FileLock> {
    lock: &'a L,
    file: &'a File,
}

impl<'a, L: FileLock> LockGuard<'a, L> {
    pub fn acquire(lock: &'a L, file: &'a File, kind: LockKind) -> SyncResult<Self> {
        lock.lock(file, kind)?;
        Ok(Self { lock, file })
    }

    pub fn downgrade(&self) -> SyncResult<()> {
        self.lock.downgrade(self.file)
    }
}

impl<'a, L: FileLock> Drop for LockGuard<'a, L> {
    fn drop(&mut self) {
        let _ = self.lock.unlock(self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_unlock_round_trips() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = tmp.reopen().unwrap();
        let lock = UnixFileLock;
        {
            let guard = LockGuard::acquire(&lock, &file, LockKind::Write).unwrap();
            guard.downgrade().unwrap();
        }
        // Dropping the guard released the lock; acquiring again must not block.
        lock.lock(&file, LockKind::Write).unwrap();
        lock.unlock(&file).unwrap();
    }
}
