//! Single-threaded readiness dispatcher: register file sources with a
//! callback, pump wakeups, tolerate structural mutation (including
//! self-deregistration) from inside a callback.

mod dispatcher;
mod event_mask;

pub use dispatcher::Dispatcher;
pub use event_mask::EventMask;
pub use mio::{Interest, Token};

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::os::unix::net::UnixStream as StdUnixStream;
    use std::rc::Rc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn readable_fires_callback_and_update_rearms_write() {
        let (a, b) = StdUnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        let mut mio_b = mio::net::UnixStream::from_std(b);
        let fd = std::os::fd::AsRawFd::as_raw_fd(&mio_b);

        let mut dispatcher = Dispatcher::new().unwrap();
        let seen = Rc::new(RefCell::new(EventMask::default()));
        let seen_cb = seen.clone();
        let token = dispatcher
            .register(Box::new(std::mem::take(&mut mio_b)), fd, Interest::READABLE, 42, move |_d, mask| {
                *seen_cb.borrow_mut() = mask;
            })
            .unwrap();
        assert_eq!(dispatcher.tag(token), Some(42));

        std::io::Write::write_all(&mut { a }, b"x").unwrap();
        let invoked = dispatcher.run_once(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(invoked, 1);
        assert!(seen.borrow().readable);
    }

    #[test]
    fn self_deregister_during_callback_is_safe() {
        let (a, b) = StdUnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        drop(a); // peer closed, so `b` becomes both readable and hung up
        let mio_b = mio::net::UnixStream::from_std(b);
        let fd = std::os::fd::AsRawFd::as_raw_fd(&mio_b);

        let mut dispatcher = Dispatcher::new().unwrap();
        let fired = Rc::new(RefCell::new(0u32));
        let fired_cb = fired.clone();
        let token = dispatcher
            .register(Box::new(mio_b), fd, Interest::READABLE, 0, move |d, mask| {
                *fired_cb.borrow_mut() += 1;
                if mask.hangup {
                    d.deregister(d.tag(Token(0)).map(Token).unwrap_or(Token(0)));
                }
            })
            .unwrap();

        // Drive one wakeup; the callback deregisters its own token via the
        // dispatcher handle it's given. This must not panic or double-free.
        dispatcher.run_once(Some(Duration::from_millis(200))).unwrap();
        assert_eq!(*fired.borrow(), 1);
        assert!(dispatcher.tag(token).is_none());
    }

    #[test]
    fn run_stops_on_request_shutdown() {
        let (a, b) = StdUnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();
        std::io::Write::write_all(&mut { a }, b"x").unwrap();
        let mio_b = mio::net::UnixStream::from_std(b);
        let fd = std::os::fd::AsRawFd::as_raw_fd(&mio_b);

        let mut dispatcher = Dispatcher::new().unwrap();
        dispatcher
            .register(Box::new(mio_b), fd, Interest::READABLE, 0, |d, _mask| {
                d.request_shutdown();
            })
            .unwrap();

        dispatcher.run().unwrap();
    }
}
