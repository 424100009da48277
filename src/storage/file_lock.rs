use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::core::error::{Error, Result};

/// Single engine per base directory.
#[derive(Debug)]
pub struct FileLock {
    #[allow(dead_code)]
    file: File,
}

impl FileLock {
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path)?;

        // Platform-specific locking
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let fd = file.as_raw_fd();
            unsafe {
                if libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) != 0 {
                    return Err(Error::LockContended);
                }
            }
        }

        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let fd = self.file.as_raw_fd();
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
            }
        }
    }
}
