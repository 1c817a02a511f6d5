use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use tracing::warn;

use crate::event_mask::EventMask;

type Callback = Box<dyn FnMut(&mut Dispatcher, EventMask)>;

/// One registered file source: the raw fd it wraps (kept only for logging —
/// `mio` doesn't expose it generically), the interest mask last registered,
/// an opaque tag the owner can use to recover its own identity without a
/// back-reference cycle, and the callback invoked on readiness.
///
/// The callback is stored as `Option` so `Dispatcher::run_once` can take it
/// out for the duration of the call: the callback needs `&mut Dispatcher` to
/// register new files or update/deregister existing ones (including
/// itself), which would otherwise alias the map entry it lives in.
struct DispatchFile {
    source: Box<dyn Source>,
    fd: RawFd,
    interest: Interest,
    tag: u64,
    callback: Option<Callback>,
}

/// A single-threaded readiness multiplexer over `mio::Poll`.
///
/// Ordering between callbacks within one wakeup follows `mio`'s event
/// ordering — unspecified but deterministic for identical readiness. A
/// callback may register new files, update or deregister other files, or
/// deregister itself; all of this is safe to do from inside the callback
/// because `run_once` removes only the callback (not the registration) from
/// the map before invoking it, so `self.files` stays available for
/// `update`/`deregister` to operate on.
pub struct Dispatcher {
    poll: Poll,
    events: Events,
    files: HashMap<Token, DispatchFile>,
    next_token: usize,
    iterating: Option<Token>,
    remove_iterating: bool,
    shutdown: bool,
}

impl Dispatcher {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            files: HashMap::new(),
            next_token: 0,
            iterating: None,
            remove_iterating: false,
            shutdown: false,
        })
    }

    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    /// Registers a new file source, returning the token assigned to it.
    /// `tag` is opaque to the dispatcher; callers use it to recover which of
    /// their own objects a later callback invocation concerns.
    pub fn register(
        &mut self,
        mut source: Box<dyn Source>,
        fd: RawFd,
        interest: Interest,
        tag: u64,
        callback: impl FnMut(&mut Dispatcher, EventMask) + 'static,
    ) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        source.register(self.poll.registry(), token, interest)?;
        self.files.insert(token, DispatchFile { source, fd, interest, tag, callback: Some(Box::new(callback)) });
        Ok(token)
    }

    /// Selects/deselects interest bits for an already-registered file.
    /// Level-triggered: a partial drain of write-readiness re-fires on the
    /// next wakeup as long as `Interest::WRITABLE` stays selected, since
    /// `mio`/epoll report it again rather than edge-triggering it away.
    pub fn update(&mut self, token: Token, interest: Interest) -> io::Result<()> {
        let Some(file) = self.files.get_mut(&token) else {
            warn!(?token, "dispatcher: update on unknown token");
            return Ok(());
        };
        file.source.reregister(self.poll.registry(), token, interest)?;
        file.interest = interest;
        Ok(())
    }

    /// Deregisters a file. Safe to call on the token currently being
    /// dispatched (self-deregistration): the actual removal is deferred
    /// until the enclosing callback returns, so the in-flight callback
    /// isn't dropped out from under itself.
    pub fn deregister(&mut self, token: Token) {
        if self.iterating == Some(token) {
            self.remove_iterating = true;
            return;
        }
        if let Some(mut file) = self.files.remove(&token) {
            let _ = file.source.deregister(self.poll.registry());
        }
    }

    pub fn tag(&self, token: Token) -> Option<u64> {
        self.files.get(&token).map(|f| f.tag)
    }

    pub fn fd(&self, token: Token) -> Option<RawFd> {
        self.files.get(&token).map(|f| f.fd)
    }

    pub fn interest(&self, token: Token) -> Option<Interest> {
        self.files.get(&token).map(|f| f.interest)
    }

    /// Requests that `run` stop after the current wakeup finishes
    /// processing. Has no effect on `run_once`, which always returns after
    /// one poll regardless.
    pub fn request_shutdown(&mut self) {
        self.shutdown = true;
    }

    /// Blocks until at least one registered file is ready or `timeout`
    /// elapses, then invokes each ready file's callback exactly once with
    /// the bitmask of events that fired. Returns the number of callbacks
    /// invoked.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        self.poll.poll(&mut self.events, timeout)?;

        // Copied out up front: `self.events` borrows `self.poll` for the
        // duration of the iterator, and the loop body needs `&mut self`.
        let ready: Vec<(Token, EventMask)> = self.events.iter().map(|e| (e.token(), EventMask::from(e))).collect();

        let mut invoked = 0;
        for (token, mask) in ready {
            let Some(file) = self.files.get_mut(&token) else {
                // Deregistered by an earlier callback in this same wakeup.
                continue;
            };
            let Some(mut callback) = file.callback.take() else {
                // Already being dispatched re-entrantly for this token in
                // this wakeup (shouldn't happen with mio's own dedup, but
                // tolerate it rather than panic).
                continue;
            };

            invoked += 1;
            self.iterating = Some(token);
            self.remove_iterating = false;
            callback(self, mask);
            self.iterating = None;

            if self.remove_iterating {
                if let Some(mut file) = self.files.remove(&token) {
                    let _ = file.source.deregister(self.poll.registry());
                }
            } else if let Some(file) = self.files.get_mut(&token) {
                file.callback = Some(callback);
            }
        }

        Ok(invoked)
    }

    /// Runs `run_once` with no timeout until a callback calls
    /// [`Dispatcher::request_shutdown`].
    pub fn run(&mut self) -> io::Result<()> {
        self.shutdown = false;
        while !self.shutdown {
            self.run_once(None)?;
        }
        Ok(())
    }
}
