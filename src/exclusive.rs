//! Host-wide single-instance lock.
//!
//! Unix holds an exclusive `flock` on `/var/run/<name>.pid` and writes the
//! holder's pid into it. Windows holds the named mutex `Global\mutex_<name>`.
//! The lock is released when the guard is released or dropped, and by the OS
//! when the process dies, so a stale pid file never blocks a new instance.

use crate::supervisor::error::GuardError;

/// Name the daemon binary locks under.
pub const LOCK_NAME: &str = "svc-warden";

pub struct ExclusiveGuard {
    inner: Option<platform::Lock>,
}

impl ExclusiveGuard {
    /// Fails with [`GuardError::AlreadyRunning`] when another holder exists.
    pub fn acquire(name: &str) -> Result<Self, GuardError> {
        let lock = platform::Lock::acquire(name)?;
        tracing::debug!("exclusive lock '{}' acquired", name);
        Ok(Self { inner: Some(lock) })
    }

    #[cfg(unix)]
    pub fn acquire_at(path: &std::path::Path) -> Result<Self, GuardError> {
        Ok(Self {
            inner: Some(platform::Lock::acquire_path(path)?),
        })
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_some()
    }

    /// Idempotent.
    pub fn release(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!("exclusive lock released");
        }
    }
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(unix)]
pub fn lock_path(name: &str) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("/var/run/{}.pid", name))
}

#[cfg(unix)]
mod platform {
    use super::GuardError;
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use std::fs::{File, OpenOptions};
    use std::io::{Seek, SeekFrom, Write};
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    pub struct Lock {
        // the flock lives as long as this descriptor
        _file: File,
    }

    impl Lock {
        pub fn acquire(name: &str) -> Result<Self, GuardError> {
            Self::acquire_path(&super::lock_path(name))
        }

        pub fn acquire_path(path: &Path) -> Result<Self, GuardError> {
            let resource = path.display().to_string();
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .mode(0o644)
                .open(path)
                .map_err(|e| GuardError::Acquire {
                    resource: resource.clone(),
                    reason: e.to_string(),
                })?;

            match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
                Ok(()) => {}
                Err(errno) if errno == Errno::EWOULDBLOCK || errno == Errno::EACCES => {
                    return Err(GuardError::AlreadyRunning);
                }
                Err(errno) => {
                    return Err(GuardError::Acquire {
                        resource,
                        reason: errno.desc().to_string(),
                    });
                }
            }

            if let Err(e) = write_pid(&mut file) {
                tracing::warn!("write pid to {} failed: {}", resource, e);
            }
            Ok(Self { _file: file })
        }
    }

    fn write_pid(file: &mut File) -> std::io::Result<()> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()
    }
}

#[cfg(windows)]
mod platform {
    use super::GuardError;
    use std::ffi::CString;
    use winapi::shared::winerror::{ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS};
    use winapi::um::errhandlingapi::GetLastError;
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::synchapi::CreateMutexA;
    use winapi::um::winnt::HANDLE;

    pub struct Lock {
        handle: HANDLE,
    }

    // The mutex handle is only closed, never waited on.
    unsafe impl Send for Lock {}

    impl Lock {
        pub fn acquire(name: &str) -> Result<Self, GuardError> {
            let resource = format!("Global\\mutex_{}", name);
            let c_name = CString::new(resource.clone()).map_err(|e| GuardError::Acquire {
                resource: resource.clone(),
                reason: e.to_string(),
            })?;

            unsafe {
                let handle = CreateMutexA(std::ptr::null_mut(), 0, c_name.as_ptr());
                let last_error = GetLastError();
                if handle.is_null() {
                    if last_error == ERROR_ACCESS_DENIED {
                        return Err(GuardError::AlreadyRunning);
                    }
                    return Err(GuardError::Acquire {
                        resource,
                        reason: format!("CreateMutex error {}", last_error),
                    });
                }
                if last_error == ERROR_ALREADY_EXISTS {
                    CloseHandle(handle);
                    return Err(GuardError::AlreadyRunning);
                }
                Ok(Self { handle })
            }
        }
    }

    impl Drop for Lock {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.handle);
            }
        }
    }
}
