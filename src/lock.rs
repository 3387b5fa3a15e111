// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Filesystem-backed exclusive locks with contention retry.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;

use log::warn;
use thiserror::Error;

use crate::policy::RetryPolicy;

/// Fatal lock-acquisition failure. Contention is not an error; it is a
/// [`TryAcquire::Contended`] outcome and is retried.
#[derive(Debug, Error)]
pub enum LockError {
    /// The sentinel could not be opened for a reason other than sharing.
    #[error("could not get exclusive write lock on {path}: {source}")]
    Open {
        /// Sentinel path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Contention persisted past the configured attempt bound.
    #[error("gave up waiting for lock file {path} after {attempts} attempts")]
    Exhausted {
        /// Sentinel path that stayed contended.
        path: PathBuf,
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Outcome of a single non-blocking acquisition attempt.
#[derive(Debug)]
pub enum TryAcquire {
    /// The lock is held for as long as the handle stays open.
    Acquired(LockFile),
    /// Another process holds the sentinel.
    Contended,
}

/// An exclusively-held sentinel lock file.
///
/// The lock lives exactly as long as the handle; dropping the value (or
/// calling [`LockFile::release`]) closes it and releases the lock. If the
/// process dies the operating system closes the handle instead.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Best-effort append of a timestamped audit line to the sentinel.
    ///
    /// The sentinel's byte content is a human-readable trail only; nothing
    /// ever parses it back, so write failures are ignored.
    pub fn log(&mut self, message: &str) {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(&mut self.file, "{stamp} - {message}");
    }

    /// Path of the sentinel this handle owns.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock by closing the handle.
    pub fn release(self) {}
}

/// Single non-blocking acquisition attempt on `path`.
///
/// Opens the sentinel for write with read sharing allowed, creating it if
/// absent and truncating any previous audit trail. A sharing conflict with
/// another holder classifies as [`TryAcquire::Contended`]; every other
/// failure is fatal.
pub fn try_acquire(path: &Path) -> Result<TryAcquire, LockError> {
    match open_exclusive(path) {
        Ok(file) => Ok(TryAcquire::Acquired(LockFile {
            file,
            path: path.to_path_buf(),
        })),
        Err(err) if is_contention(&err) => Ok(TryAcquire::Contended),
        Err(err) => Err(LockError::Open {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

#[cfg(windows)]
fn open_exclusive(path: &Path) -> std::io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    use windows_sys::Win32::Storage::FileSystem::FILE_SHARE_READ;

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .share_mode(FILE_SHARE_READ)
        .open(path)
}

#[cfg(windows)]
fn is_contention(err: &std::io::Error) -> bool {
    use windows_sys::Win32::Foundation::ERROR_SHARING_VIOLATION;

    err.raw_os_error() == Some(ERROR_SHARING_VIOLATION as i32)
}

#[cfg(not(windows))]
fn open_exclusive(path: &Path) -> std::io::Result<File> {
    use fs2::FileExt;

    // Truncation happens after the flock succeeds so a contended attempt
    // cannot clobber the holder's audit trail.
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.try_lock_exclusive()?;
    file.set_len(0)?;
    Ok(file)
}

#[cfg(not(windows))]
fn is_contention(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
}

/// Lock acquisition with the configured contention policy.
#[derive(Debug, Clone, Copy)]
pub struct LockManager {
    retry: RetryPolicy,
}

impl LockManager {
    /// Manager applying `retry` on contention.
    #[must_use]
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Acquire `path`, waiting out contention per the retry policy.
    ///
    /// With the default unbounded policy this blocks for as long as the
    /// current holder keeps the sentinel open.
    pub fn acquire(&self, path: &Path) -> Result<LockFile, LockError> {
        let mut attempts = 0u32;
        loop {
            match try_acquire(path)? {
                TryAcquire::Acquired(lock) => return Ok(lock),
                TryAcquire::Contended => {
                    attempts = attempts.saturating_add(1);
                    if let Some(max) = self.retry.max_attempts {
                        if attempts >= max {
                            return Err(LockError::Exhausted {
                                path: path.to_path_buf(),
                                attempts,
                            });
                        }
                    }
                    warn!(
                        "lock file {} is in use by another process; waiting {} ms",
                        path.display(),
                        self.retry.interval_ms
                    );
                    thread::sleep(self.retry.interval());
                }
            }
        }
    }
}
