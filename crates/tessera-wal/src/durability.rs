//! Platform durable-sync probing
//!
//! The local block store promises that sync_to_disk puts bytes on the
//! storage medium, not merely in a volatile write cache. What that takes
//! differs per platform, so this module maps one call onto the strongest
//! primitive each OS offers.

use std::fs::File;
use std::io;

/// Push file data onto the persistent medium before returning.
///
/// - Linux: fdatasync(), data without metadata
/// - macOS/iOS: fcntl(F_FULLFSYNC), the only call that defeats the drive
///   write cache on Apple platforms
/// - Windows: FlushFileBuffers()
/// - elsewhere: File::sync_data()
///
/// May block for milliseconds under I/O pressure; callers must not hold the
/// append path lock across this call.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd comes from an open File borrowed for the whole call.
        let rc = unsafe { libc::fdatasync(fd) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd comes from an open File borrowed for the whole call.
        let rc = unsafe { libc::fcntl(fd, libc::F_FULLFSYNC) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        let handle = file.as_raw_handle();
        // SAFETY: handle comes from an open File borrowed for the whole call.
        let rc = unsafe { FlushFileBuffers(handle as *mut _) };
        if rc != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "ios",
        target_os = "windows"
    )))]
    {
        file.sync_data()
    }
}
