//! Raw descriptor helpers shared by the jobserver and the multiplexer.

use std::io;
use std::os::unix::io::RawFd;

/// Create an inheritable pipe.
pub(crate) fn pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

/// Whether the descriptor is open in this process.
pub(crate) fn fd_is_valid(fd: RawFd) -> bool {
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

/// Blocking read of exactly one byte. `Ok(None)` is end-of-stream.
pub(crate) fn read_byte(fd: RawFd) -> io::Result<Option<u8>> {
    let mut byte = 0u8;
    loop {
        let rv = unsafe { libc::read(fd, &mut byte as *mut u8 as *mut libc::c_void, 1) };
        match rv {
            1 => return Ok(Some(byte)),
            0 => return Ok(None),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }
    }
}

/// Write exactly one byte, retrying on EINTR.
pub(crate) fn write_byte(fd: RawFd, byte: u8) -> io::Result<()> {
    loop {
        let rv = unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
        if rv == 1 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Discard whatever is currently readable on the descriptor.
pub(crate) fn drain(fd: RawFd) {
    let mut buf = [0u8; 64];
    unsafe {
        libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len());
    }
}

/// Close a descriptor, ignoring errors.
pub(crate) fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}
