use std::io;
use std::mem;
use std::os::fd::RawFd;

/// Reads the peer's effective uid off a connected `AF_UNIX` stream socket
/// via `SO_PEERCRED`, the kernel-verified credential the `EXTERNAL`
/// mechanism authenticates against (as opposed to whatever uid the peer
/// merely claims in its `AUTH` line).
pub fn peer_uid(fd: RawFd) -> io::Result<u32> {
    let mut cred: libc::ucred = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&raw mut cred).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(cred.uid)
}
