//! Raw `sendmsg`/`recvmsg` wrappers for passing file descriptors as
//! ancillary data over a Unix stream socket.
//!
//! `mio::net::UnixStream` has no cmsg support, so ancillary I/O bypasses it
//! and talks to the raw fd directly; `mio::Registry` still owns readiness
//! registration for that same fd via the `mio::net::UnixStream` handle.

use std::alloc::{self, Layout};
use std::io;
use std::mem;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::ptr;

/// Upper bound on file descriptors accepted in one `recvmsg` call; bounds
/// the ancillary buffer allocated per call.
pub const MAX_FDS_PER_CALL: usize = 16;

unsafe fn alloc_cmsg_buffer(fd_count: usize) -> (*mut u8, Layout, usize) {
    let fd_bytes = mem::size_of::<RawFd>() * fd_count;
    let space = libc::CMSG_SPACE(fd_bytes as u32) as usize;
    let layout = Layout::from_size_align(space.max(1), mem::align_of::<libc::cmsghdr>())
        .expect("cmsg buffer layout");
    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        alloc::handle_alloc_error(layout);
    }
    (ptr, layout, fd_bytes)
}

/// Sends `bytes` plus ancillary `fds` (empty is fine) over `fd`.
///
/// `fds` should only be non-empty on the first call writing out a given
/// message — ancillary data rides along with whatever byte range happens to
/// be in flight in that particular syscall, so resending it on a retried
/// partial write would duplicate the descriptors on the peer's end.
pub fn send_with_fds(fd: RawFd, bytes: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    unsafe {
        let mut iov = libc::iovec { iov_base: bytes.as_ptr().cast_mut().cast(), iov_len: bytes.len() };
        let (cmsg_buf, layout, fd_bytes) = alloc_cmsg_buffer(fds.len());
        let mut msg: libc::msghdr = mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        if !fds.is_empty() {
            msg.msg_control = cmsg_buf.cast();
            msg.msg_controllen = layout.size();
            let header = libc::CMSG_FIRSTHDR(&msg);
            (*header).cmsg_level = libc::SOL_SOCKET;
            (*header).cmsg_type = libc::SCM_RIGHTS;
            (*header).cmsg_len = libc::CMSG_LEN(fd_bytes as u32) as _;
            let data = libc::CMSG_DATA(header).cast::<RawFd>();
            for (i, raw) in fds.iter().enumerate() {
                ptr::write_unaligned(data.add(i), *raw);
            }
        }
        let n = libc::sendmsg(fd, &msg, libc::MSG_NOSIGNAL);
        let result = if n < 0 { Err(io::Error::last_os_error()) } else { Ok(n as usize) };
        alloc::dealloc(cmsg_buf, layout);
        result
    }
}

/// Receives into `buf`, returning the byte count and any file descriptors
/// that rode along as `SCM_RIGHTS` ancillary data.
pub fn recv_with_fds(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, Vec<OwnedFd>)> {
    unsafe {
        let mut iov = libc::iovec { iov_base: buf.as_mut_ptr().cast(), iov_len: buf.len() };
        let (cmsg_buf, layout, _) = alloc_cmsg_buffer(MAX_FDS_PER_CALL);
        let mut msg: libc::msghdr = mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.cast();
        msg.msg_controllen = layout.size();

        let n = libc::recvmsg(fd, &mut msg, 0);
        if n < 0 {
            let err = io::Error::last_os_error();
            alloc::dealloc(cmsg_buf, layout);
            return Err(err);
        }

        let mut fds = Vec::new();
        let mut header = libc::CMSG_FIRSTHDR(&msg);
        while !header.is_null() {
            if (*header).cmsg_level == libc::SOL_SOCKET && (*header).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(header).cast::<RawFd>();
                let payload_len = (*header).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let count = payload_len / mem::size_of::<RawFd>();
                for i in 0..count {
                    let raw = ptr::read_unaligned(data.add(i));
                    fds.push(OwnedFd::from_raw_fd(raw));
                }
            }
            header = libc::CMSG_NXTHDR(&msg, header);
        }

        alloc::dealloc(cmsg_buf, layout);
        Ok((n as usize, fds))
    }
}
