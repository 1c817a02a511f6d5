use std::os::fd::{AsRawFd, RawFd};

use broker_dispatch::EventMask;
use broker_socket::{DispatchOutcome, Message, Socket, SocketBuffer};
use broker_utils::UserRef;
use mio::{Registry, Token};
use tracing::{debug, warn};

use crate::error::Error;
use crate::sasl::SaslMechanism;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Auth,
    Running,
    Shutdown,
    Closed,
}

enum Role {
    Server { mechanism: Box<dyn SaslMechanism> },
    Client { mechanism: Box<dyn SaslMechanism> },
}

impl Role {
    fn mechanism_mut(&mut self) -> &mut dyn SaslMechanism {
        match self {
            Role::Server { mechanism } | Role::Client { mechanism } => mechanism.as_mut(),
        }
    }

    fn is_server(&self) -> bool {
        matches!(self, Role::Server { .. })
    }
}

/// Per-peer connection state: the authentication FSM, the socket it owns,
/// and transaction de-duplication for fan-out delivery.
///
/// `server`/`client` role is fixed at construction (mirroring
/// `connection_init_server`/`connection_init_client` in the source this is
/// grounded on); only a server-role connection strips the single leading
/// NUL byte the SASL wire grammar requires before its very first line.
pub struct Connection {
    socket: Socket,
    token: Token,
    role: Role,
    user: UserRef,
    state: State,
    authenticated: bool,
    first_line_pending_nul_strip: bool,
    transaction_id: u64,
}

impl Connection {
    pub fn new_server(socket: Socket, token: Token, user: UserRef, mechanism: Box<dyn SaslMechanism>) -> Self {
        Self {
            socket,
            token,
            role: Role::Server { mechanism },
            user,
            state: State::Init,
            authenticated: false,
            first_line_pending_nul_strip: true,
            transaction_id: 0,
        }
    }

    pub fn new_client(socket: Socket, token: Token, user: UserRef, mechanism: Box<dyn SaslMechanism>) -> Self {
        Self {
            socket,
            token,
            role: Role::Client { mechanism },
            user,
            state: State::Init,
            authenticated: false,
            first_line_pending_nul_strip: false,
            transaction_id: 0,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn user(&self) -> &UserRef {
        &self.user
    }

    pub fn raw_fd(&self) -> RawFd {
        self.socket.raw_fd()
    }

    /// Arms the connection's initial interest set and, for a client role,
    /// sends the leading NUL byte plus the first SASL request line. Moves
    /// `Init` -> `Auth`.
    pub fn open(&mut self, registry: &Registry) -> Result<(), Error> {
        debug_assert_eq!(self.state, State::Init);
        if let Role::Client { mechanism } = &mut self.role {
            let line = mechanism.client_dispatch(None)?;
            self.socket.queue(registry, SocketBuffer::new(vec![0], Vec::new()));
            if let Some(line) = line {
                self.socket.queue_line(registry, &line);
            }
        }
        self.state = State::Auth;
        Ok(())
    }

    /// Initiates a graceful half-close: stop reading, let buffered writes
    /// drain.
    pub fn shutdown(&mut self, registry: &Registry) {
        self.socket.close(registry);
        self.state = State::Shutdown;
    }

    pub fn close(&mut self, registry: &Registry) {
        self.socket.close(registry);
        self.state = State::Closed;
    }

    /// Pumps I/O and returns every fully-framed message that became
    /// available this round, in arrival order. Errors are terminal for the
    /// connection: the caller tears it down.
    pub fn dispatch(&mut self, registry: &Registry, mask: EventMask) -> Result<Vec<Message>, Error> {
        let outcome = self.socket.dispatch(registry, mask.readable, mask.writable);
        if outcome == DispatchOutcome::Reset {
            return Err(Error::Reset);
        }

        if !self.authenticated {
            self.drive_auth(registry)?;
        }

        let mut messages = Vec::new();
        if self.authenticated {
            loop {
                match self.socket.dequeue()? {
                    Some(message) => messages.push(message),
                    None => break,
                }
            }
        }
        Ok(messages)
    }

    fn drive_auth(&mut self, registry: &Registry) -> Result<(), Error> {
        while !self.authenticated {
            let Some(mut line) = self.socket.dequeue_line()? else {
                break;
            };
            if self.first_line_pending_nul_strip {
                self.first_line_pending_nul_strip = false;
                if let Some(stripped) = line.strip_prefix('\0') {
                    line = stripped.to_string();
                }
            }
            self.feed_sasl_line(registry, &line)?;
        }
        Ok(())
    }

    fn feed_sasl_line(&mut self, registry: &Registry, line: &str) -> Result<(), Error> {
        let is_server = self.role.is_server();
        let mechanism = self.role.mechanism_mut();
        let reply = if is_server {
            mechanism.server_dispatch(Some(line))?
        } else {
            mechanism.client_dispatch(Some(line))?
        };
        if let Some(reply) = reply {
            self.socket.queue_line(registry, &reply);
        }
        if mechanism.is_done() {
            self.authenticated = true;
            self.socket.enter_binary_phase();
            self.state = State::Running;
            debug!(fd = self.socket.raw_fd(), "connection authenticated");
        }
        Ok(())
    }

    /// Enqueues `message` for delivery, suppressing a duplicate delivery of
    /// the same fan-out when `transaction_id` repeats.
    ///
    /// `transaction_id == 0` always delivers. A non-zero id equal to the
    /// last seen one is a silent no-op (already delivered). A non-zero id
    /// lower than or equal to the last *distinct* one seen is a caller bug
    /// — the upper routing layer is required to hand out strictly
    /// increasing ids per fan-out — and is asserted rather than tolerated.
    ///
    /// The socket layer never drops a queued buffer outright, but arming
    /// write-interest can fail if the fd itself is gone; that failure
    /// escalates to [`Error::Reset`] rather than being swallowed, per the
    /// taxonomy's "reply-as-error never fails silently" rule.
    pub fn queue(&mut self, registry: &Registry, transaction_id: u64, message: Message) -> Result<(), Error> {
        if transaction_id != 0 {
            if transaction_id == self.transaction_id {
                return Ok(());
            }
            broker_utils::invariant!(
                transaction_id > self.transaction_id,
                "transaction id went backwards: {} <= {}",
                transaction_id,
                self.transaction_id
            );
            self.transaction_id = transaction_id;
        }
        if self.socket.queue(registry, message.into_socket_buffer()) == DispatchOutcome::Reset {
            return Err(Error::Reset);
        }
        Ok(())
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.raw_fd()
    }
}

/// Logs a socket-layer `warn` once when a connection is torn down for a
/// reason other than clean `Eof`, matching the error taxonomy's "drop
/// connection" recovery for `CONNECTION_E_RESET`.
pub fn log_teardown(err: &Error) {
    match err {
        Error::Eof => debug!("connection closed: eof"),
        other => warn!(%other, "connection reset"),
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream as StdUnixStream;
    use std::time::Duration;

    use broker_utils::UserRef;
    use mio::{Events, Interest, Poll};

    use super::*;
    use crate::sasl::External;

    const CLIENT: Token = Token(0);
    const SERVER: Token = Token(1);

    fn pump_dispatch(poll: &mut Poll, events: &mut Events, client: &mut Connection, server: &mut Connection) {
        poll.poll(events, Some(Duration::from_millis(50))).unwrap();
        let ready: Vec<(Token, EventMask)> = events
            .iter()
            .map(|e| {
                (e.token(), EventMask { readable: e.is_readable(), writable: e.is_writable(), hangup: false, error: false })
            })
            .collect();
        for (token, mask) in ready {
            let conn = if token == CLIENT { &mut *client } else { &mut *server };
            conn.dispatch(poll.registry(), mask).unwrap();
        }
    }

    #[test]
    fn server_and_client_authenticate() {
        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(16);
        let (a, b) = StdUnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();

        let mut client_mio = mio::net::UnixStream::from_std(a);
        poll.registry().register(&mut client_mio, CLIENT, Interest::READABLE).unwrap();
        let mut server_mio = mio::net::UnixStream::from_std(b);
        poll.registry().register(&mut server_mio, SERVER, Interest::READABLE).unwrap();

        let uid = unsafe { libc::getuid() };
        let client_socket = Socket::new(client_mio, CLIENT);
        let server_socket = Socket::new(server_mio, SERVER);

        let mut client =
            Connection::new_client(client_socket, CLIENT, UserRef::new(uid), Box::new(External::new_client(uid)));
        let mut server = Connection::new_server(
            server_socket,
            SERVER,
            UserRef::new(uid),
            Box::new(External::new_server(uid, "deadbeef")),
        );

        client.open(poll.registry()).unwrap();
        server.open(poll.registry()).unwrap();

        for _ in 0..200 {
            if client.authenticated() && server.authenticated() {
                break;
            }
            pump_dispatch(&mut poll, &mut events, &mut client, &mut server);
        }

        assert!(client.authenticated());
        assert!(server.authenticated());
        assert_eq!(client.state(), State::Running);
        assert_eq!(server.state(), State::Running);
    }

    #[test]
    fn duplicate_transaction_id_is_dropped() {
        let mut poll = Poll::new().unwrap();
        let (_a, b) = StdUnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        let mut server_mio = mio::net::UnixStream::from_std(b);
        poll.registry().register(&mut server_mio, SERVER, Interest::READABLE).unwrap();
        let uid = unsafe { libc::getuid() };
        let mut server = Connection::new_server(
            Socket::new(server_mio, SERVER),
            SERVER,
            UserRef::new(uid),
            Box::new(External::new_server(uid, "guid")),
        );

        let msg = |serial| Message::new(broker_variant::Endian::Little, broker_socket::msg_type::SIGNAL, serial);
        server.queue(poll.registry(), 5, msg(1)).unwrap();
        assert_eq!(server.transaction_id, 5);
        server.queue(poll.registry(), 5, msg(2)).unwrap();
        assert_eq!(server.transaction_id, 5);
        server.queue(poll.registry(), 6, msg(3)).unwrap();
        assert_eq!(server.transaction_id, 6);
    }
}
