use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

use broker_connection::{peer_uid, Connection, External};
use broker_controller::ControllerContext;
use broker_dispatch::EventMask;
use broker_socket::Socket;
use broker_utils::UserRef;
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{debug, warn};

use crate::error::Error;
use crate::listener::Listener;
use crate::policy::PolicyEngine;

/// Registers `listener` under a fresh token and arms it for read
/// readiness. A free function (rather than a `Bus` method) so it can be
/// called with disjoint borrows of `Bus`'s `listeners`/`next_token` fields
/// while a `Connection` living in a different field is borrowed elsewhere —
/// see [`BusContext`].
fn register_listener(
    registry: &Registry,
    listeners: &mut HashMap<Token, Listener>,
    next_token: &mut usize,
    mut listener: Listener,
) -> io::Result<()> {
    let token = Token(*next_token);
    *next_token += 1;
    registry.register(listener.source(), token, Interest::READABLE)?;
    listeners.insert(token, listener);
    Ok(())
}

/// The slice of `Bus` a Controller method handler is allowed to touch,
/// borrowed for the duration of a single `dispatch` call. Deliberately
/// excludes `connections` — the handler runs while the calling connection
/// is itself mutably borrowed out of that map, and `broker_controller`'s
/// `ControllerContext` seam exists precisely so this crate doesn't need a
/// second, circular handle back into `Bus` to reach it.
struct BusContext<'a> {
    registry: &'a Registry,
    listeners: &'a mut HashMap<Token, Listener>,
    next_token: &'a mut usize,
}

impl ControllerContext for BusContext<'_> {
    fn add_listener(&mut self, fd: OwnedFd) -> io::Result<()> {
        let listener = Listener::from_owned_fd(fd)?;
        register_listener(self.registry, self.listeners, self.next_token, listener)
    }
}

/// The running broker: a bare `mio::Poll` loop over the accepted listeners
/// and connections, mirroring the teacher's `ConnectionManager`/
/// `TcpConnector` pattern in `flux-network/src/tcp/connector.rs` (a
/// `Vec`/`HashMap` of `(Token, variant)` plus a `next_token` counter) rather
/// than routing through `broker_dispatch::Dispatcher`.
///
/// `broker_dispatch::Dispatcher` is a complete, independently-tested
/// component satisfying the spec's Dispatcher contract on its own terms;
/// `Bus` doesn't route Listener/Connection I/O through it because `Socket`
/// already owns its registration/reregistration against a bare `Registry`
/// directly, and `Dispatcher` would need to own the stream itself to manage
/// that — see DESIGN.md.
pub struct Bus {
    poll: Poll,
    events: Events,
    listeners: HashMap<Token, Listener>,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    users: HashMap<u32, UserRef>,
    policy: Box<dyn PolicyEngine>,
    guid: String,
}

impl Bus {
    pub fn new(policy: Box<dyn PolicyEngine>, guid: impl Into<String>) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            listeners: HashMap::new(),
            connections: HashMap::new(),
            next_token: 0,
            users: HashMap::new(),
            policy,
            guid: guid.into(),
        })
    }

    /// Registers an initial listener (a path bind, or a socket-activation
    /// fd) before the loop starts running.
    pub fn add_listener(&mut self, listener: Listener) -> io::Result<()> {
        register_listener(self.poll.registry(), &mut self.listeners, &mut self.next_token, listener)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Runs until `shutdown` is observed set, polling with a bounded
    /// timeout so the flag is checked even with no I/O activity.
    pub fn run(&mut self, shutdown: &std::sync::atomic::AtomicBool) -> Result<(), Error> {
        use std::sync::atomic::Ordering;
        while !shutdown.load(Ordering::Relaxed) {
            self.poll_once(Some(Duration::from_millis(250)))?;
        }
        Ok(())
    }

    /// Drives one readiness wakeup: accepts pending connections on ready
    /// listeners, pumps I/O on ready connections, and dispatches whatever
    /// messages that produced through the Controller.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        self.poll.poll(&mut self.events, timeout)?;

        let ready: Vec<(Token, EventMask)> = self.events.iter().map(|e| (e.token(), EventMask::from(e))).collect();

        for (token, mask) in ready {
            if self.listeners.contains_key(&token) {
                if mask.readable {
                    self.accept_pending(token);
                }
                continue;
            }
            self.service_connection(token, mask);
        }

        Ok(())
    }

    fn accept_pending(&mut self, token: Token) {
        loop {
            let stream = {
                let Some(listener) = self.listeners.get_mut(&token) else { return };
                match listener.accept() {
                    Ok(Some(stream)) => stream,
                    Ok(None) => return,
                    Err(err) => {
                        warn!(?err, "bus: accept failed");
                        return;
                    }
                }
            };
            self.register_connection(stream);
        }
    }

    fn register_connection(&mut self, mut stream: mio::net::UnixStream) {
        let raw_fd = stream.as_raw_fd();
        let uid = match peer_uid(raw_fd) {
            Ok(uid) => uid,
            Err(err) => {
                warn!(?err, "bus: failed to read peer credentials, dropping connection");
                return;
            }
        };
        if !self.policy.allow_connect(uid) {
            debug!(uid, "bus: policy denied connection");
            return;
        }

        let token = Token(self.next_token);
        self.next_token += 1;
        if let Err(err) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
            warn!(?err, "bus: failed to register accepted connection");
            return;
        }

        let user = self.users.entry(uid).or_insert_with(|| UserRef::new(uid)).ref_();
        let mechanism = Box::new(External::new_server(uid, self.guid.clone()));
        let socket = Socket::new(stream, token);
        let mut connection = Connection::new_server(socket, token, user, mechanism);
        if let Err(err) = connection.open(self.poll.registry()) {
            warn!(?err, "bus: failed to open accepted connection");
            return;
        }

        debug!(uid, ?token, "bus: accepted connection");
        self.connections.insert(token, connection);
    }

    fn service_connection(&mut self, token: Token, mask: EventMask) {
        let outcome = {
            let Some(connection) = self.connections.get_mut(&token) else { return };
            connection.dispatch(self.poll.registry(), mask)
        };

        let messages = match outcome {
            Ok(messages) => messages,
            Err(err) => {
                broker_connection::log_teardown(&err);
                self.teardown(token);
                return;
            }
        };

        let mut disconnect = false;
        if let Some(connection) = self.connections.get_mut(&token) {
            for message in messages {
                let mut ctx =
                    BusContext { registry: self.poll.registry(), listeners: &mut self.listeners, next_token: &mut self.next_token };
                if let Err(err) = broker_controller::dispatch(&mut ctx, connection, self.poll.registry(), message) {
                    warn!(%err, ?token, "bus: controller dispatch failed, disconnecting");
                    disconnect = true;
                    break;
                }
            }
        }
        if disconnect {
            self.teardown(token);
        }
    }

    fn teardown(&mut self, token: Token) {
        if let Some(mut connection) = self.connections.remove(&token) {
            connection.close(self.poll.registry());
        }
    }
}
