use std::io;
use std::os::fd::OwnedFd;

/// What a controller method handler is allowed to do to the broker it runs
/// inside of, injected by the caller rather than reached for directly —
/// this crate owns validation and dispatch, not the `Bus`/`Dispatcher`
/// types that actually own listening sockets.
pub trait ControllerContext {
    /// Installs `fd` as a new listening socket bound to the broker's
    /// dispatcher. `fd` is already owned (stolen out of the request
    /// message's FD list by the caller); on success the context has taken
    /// ownership of it.
    fn add_listener(&mut self, fd: OwnedFd) -> io::Result<()>;
}
