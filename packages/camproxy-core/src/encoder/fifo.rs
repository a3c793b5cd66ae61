//! Named-pipe auxiliary audio input for the encoder.
//!
//! The encoder contract calls for "audio on an auxiliary input pipe" in
//! addition to the primary stdin video pipe; a POSIX FIFO realizes that
//! second pipe without needing a second subprocess stream.

use std::ffi::CString;
use std::io;
use std::path::{Path, PathBuf};

use crate::utils::now_millis;

/// A per-session named pipe, removed on drop.
pub struct AuxPipe {
    path: PathBuf,
}

impl AuxPipe {
    /// Creates a fresh FIFO under the system temp directory.
    pub fn create() -> io::Result<Self> {
        let path = std::env::temp_dir().join(format!("camproxy-aux-{}.aac", now_millis()));
        let c_path = CString::new(path.as_os_str().to_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "non-UTF8 temp path")
        })?)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: `c_path` is a valid, NUL-terminated C string for the
        // lifetime of this call; mkfifo does not retain the pointer.
        let result = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { path })
    }

    /// The filesystem path of the pipe, passed to the encoder as an
    /// input argument.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the write end for audio ingress to write into.
    pub async fn open_writer(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::OpenOptions::new().write(true).open(&self.path).await
    }
}

impl Drop for AuxPipe {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_makes_a_fifo_and_drop_removes_it() {
        let pipe = AuxPipe::create().unwrap();
        let path = pipe.path().to_path_buf();
        assert!(path.exists());

        let metadata = std::fs::metadata(&path).unwrap();
        use std::os::unix::fs::FileTypeExt;
        assert!(metadata.file_type().is_fifo());

        drop(pipe);
        assert!(!path.exists());
    }
}
