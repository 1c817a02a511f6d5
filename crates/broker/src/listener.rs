use std::io;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::Path;

use mio::net::{UnixListener, UnixStream};

/// A listening socket the broker accepts connections on — either bound
/// directly to a filesystem path or adopted from a caller-supplied fd
/// (`AddListener`, or a `LISTEN_FDS` slot handed down by a launcher).
pub struct Listener {
    inner: UnixListener,
}

impl Listener {
    /// Binds a new listening socket at `path`, removing a stale socket file
    /// left over from a previous run first (mirroring how Unix-domain
    /// servers conventionally reclaim their own bind path).
    pub fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(Self { inner: UnixListener::bind(path)? })
    }

    /// Adopts an already-owned fd (stolen out of a Controller request's FD
    /// list, or handed down via socket activation) as a listening socket.
    /// The fd must already be a bound+`listen`ing `AF_UNIX` socket; this
    /// does not call `bind`/`listen` itself.
    pub fn from_owned_fd(fd: OwnedFd) -> io::Result<Self> {
        let std_listener = unsafe { StdUnixListener::from_raw_fd(fd.into_raw_fd()) };
        std_listener.set_nonblocking(true)?;
        Ok(Self { inner: UnixListener::from_std(std_listener) })
    }

    /// Adopts a raw, already-owned fd (a `LISTEN_FDS` slot) as a listening
    /// socket. Caller must guarantee `fd` is a valid, exclusively-owned
    /// `AF_UNIX` listening socket that hasn't already been claimed.
    ///
    /// # Safety
    /// `fd` must be a valid, open file descriptor not owned elsewhere.
    pub unsafe fn from_raw_fd(fd: RawFd) -> io::Result<Self> {
        Self::from_owned_fd(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    pub fn source(&mut self) -> &mut UnixListener {
        &mut self.inner
    }

    /// Accepts one pending connection, or `None` if nothing is ready yet.
    pub fn accept(&mut self) -> io::Result<Option<UnixStream>> {
        match self.inner.accept() {
            Ok((stream, _addr)) => Ok(Some(stream)),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}
