use broker_connection::Connection;
use broker_socket::{msg_type, Message};
use broker_variant::{verify_input_signature, Endian, Reader, Token, Type, Writer};
use mio::Registry;
use tracing::{debug, warn};

use crate::context::ControllerContext;
use crate::error::Error;
use crate::methods::{self, METHODS};

pub const OBJECT_PATH: &str = "/org/bus1/Controller";
pub const INTERFACE: &str = "org.bus1.Controller";

/// Standard `org.freedesktop.DBus.Error.*` names this dispatcher replies
/// with, per §6's "Errors returned are the standard ... names" contract.
pub mod dbus_error {
    pub const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
}

/// Controller replies and error replies never allocate a real outbound
/// serial of their own — the connection the launcher opens to the broker
/// sits outside the name-registry/routing driver's serial allocation
/// (out of scope per §1) — so this uses the same sentinel the grounding
/// source does rather than inventing a counter this core doesn't own.
const REPLY_SERIAL_SENTINEL: u32 = u32::MAX;

/// Flattens a body type's tokens into its signature string, stripping the
/// enclosing struct the tree is always declared with.
fn flatten_body(tokens: &[Token]) -> String {
    tokens[1..tokens.len() - 1].iter().map(Token::signature_char).collect()
}

fn send_error(connection: &mut Connection, registry: &Registry, reply_serial: u32, name: &str) -> Result<(), Error> {
    let mut message = Message::new(Endian::NATIVE, msg_type::ERROR, REPLY_SERIAL_SENTINEL);
    message.fields.reply_serial = Some(reply_serial);
    message.fields.error_name = Some(name.to_string());
    connection.queue(registry, 0, message)?;
    Ok(())
}

/// Checks one inbound method call against the Controller's static method
/// table, in the order the wire contract requires: path, then interface,
/// then method, then signature — returning the matched method on success
/// or the specific validation `Error` that failed.
fn validate(message: &Message) -> Result<&'static methods::ControllerMethod, Error> {
    let path = message.fields.path.as_deref().unwrap_or_default();
    if path != OBJECT_PATH {
        debug!(%path, "controller: unexpected path");
        return Err(Error::UnexpectedPath);
    }

    if let Some(interface) = &message.fields.interface {
        if interface != INTERFACE {
            debug!(%interface, "controller: unexpected interface");
            return Err(Error::UnexpectedInterface);
        }
    }

    let member = message.fields.member.as_deref().unwrap_or_default();
    let method = METHODS.iter().find(|m| m.name == member).ok_or_else(|| {
        debug!(member, "controller: unexpected method");
        Error::UnexpectedMethod
    })?;

    let wire_signature = message.fields.signature.as_deref().unwrap_or_default();
    verify_input_signature(Type(method.in_tokens), wire_signature).map_err(|_| {
        debug!(wire_signature, method = method.name, "controller: unexpected signature");
        Error::UnexpectedSignature
    })?;

    Ok(method)
}

/// Validates and dispatches one inbound message against the Controller's
/// static method table, per `validate`'s order. A validation failure is
/// translated to its standard reply name and sent back to the peer via
/// [`Error::dbus_name`]; only `InvalidMessage`/`Disconnect` (no
/// `dbus_name`) propagate out for the caller to tear the connection down.
pub fn dispatch(
    ctx: &mut dyn ControllerContext,
    connection: &mut Connection,
    registry: &Registry,
    mut message: Message,
) -> Result<(), Error> {
    if message.msg_type != msg_type::METHOD_CALL {
        // Non-call traffic on this socket is silently ignored, matching
        // the grounding source's own tolerance. spec.md leaves open
        // whether this should instead surface `UNEXPECTED_MESSAGE_TYPE`;
        // resolved here in favor of the explicit documented behavior (see
        // DESIGN.md).
        return Ok(());
    }
    let serial = message.serial;

    let method = match validate(&message) {
        Ok(method) => method,
        Err(err) => match err.dbus_name() {
            Some(name) => return send_error(connection, registry, serial, name),
            None => return Err(err),
        },
    };

    handle_method(ctx, connection, registry, &mut message, method, serial)
}

fn handle_method(
    ctx: &mut dyn ControllerContext,
    connection: &mut Connection,
    registry: &Registry,
    message: &mut Message,
    method: &methods::ControllerMethod,
    serial: u32,
) -> Result<(), Error> {
    let mut reader = Reader::new(method.in_tokens, message.endian, &message.body);
    let mut writer = Writer::new(message.endian);

    // `end_read` inside each handler guarantees an over-long payload is
    // caught as `InvalidMessage` here rather than silently truncated.
    match (method.handler)(ctx, &mut reader, &mut message.fds, &mut writer) {
        Ok(()) => {
            let mut reply = Message::new(message.endian, msg_type::METHOD_RETURN, REPLY_SERIAL_SENTINEL);
            reply.fields.reply_serial = Some(serial);
            reply.fields.signature = Some(flatten_body(method.out_tokens));
            reply.body = writer.finish();
            connection.queue(registry, 0, reply)?;
            Ok(())
        }
        Err(_) => {
            warn!(method = method.name, "controller: invalid message mid-handler, disconnecting");
            Err(Error::Disconnect)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::{FromRawFd, OwnedFd};
    use std::os::unix::net::UnixStream as StdUnixStream;
    use std::time::Duration;

    use broker_connection::External;
    use broker_socket::Socket;
    use broker_utils::UserRef;
    use mio::{Events, Interest, Poll, Token};

    use super::*;

    const CLIENT: Token = Token(0);
    const SERVER: Token = Token(1);

    struct StubContext {
        added: Vec<OwnedFd>,
    }

    impl ControllerContext for StubContext {
        fn add_listener(&mut self, fd: OwnedFd) -> std::io::Result<()> {
            self.added.push(fd);
            Ok(())
        }
    }

    fn harness() -> (Poll, Events, Socket, Connection) {
        let poll = Poll::new().unwrap();
        let events = Events::with_capacity(16);
        let (a, b) = StdUnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        b.set_nonblocking(true).unwrap();

        let mut client_mio = mio::net::UnixStream::from_std(a);
        poll.registry().register(&mut client_mio, CLIENT, Interest::READABLE).unwrap();
        let mut server_mio = mio::net::UnixStream::from_std(b);
        poll.registry().register(&mut server_mio, SERVER, Interest::READABLE).unwrap();

        let mut client_socket = Socket::new(client_mio, CLIENT);
        client_socket.enter_binary_phase();

        let uid = unsafe { libc::getuid() };
        let server = Connection::new_server(
            Socket::new(server_mio, SERVER),
            SERVER,
            UserRef::new(uid),
            Box::new(External::new_server(uid, "guid")),
        );

        (poll, events, client_socket, server)
    }

    fn pump_until_reply(poll: &mut Poll, events: &mut Events, client: &mut Socket) -> Message {
        for _ in 0..200 {
            poll.poll(events, Some(Duration::from_millis(20))).unwrap();
            let ready: Vec<(Token, bool, bool)> =
                events.iter().map(|e| (e.token(), e.is_readable(), e.is_writable())).collect();
            for (token, readable, writable) in ready {
                if token == CLIENT {
                    client.dispatch(poll.registry(), readable, writable);
                }
            }
            if let Ok(Some(message)) = client.dequeue() {
                return message;
            }
        }
        panic!("no reply arrived within the polling budget");
    }

    fn call_message(path: &str, interface: Option<&str>, member: &str, signature: &str, body: Vec<u8>) -> Message {
        let mut message = Message::new(Endian::Little, msg_type::METHOD_CALL, 7);
        message.fields.path = Some(path.to_string());
        message.fields.interface = interface.map(str::to_string);
        message.fields.member = Some(member.to_string());
        message.fields.signature = Some(signature.to_string());
        message.body = body;
        message
    }

    fn dummy_fd() -> OwnedFd {
        let raw = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDONLY) };
        assert!(raw >= 0);
        unsafe { OwnedFd::from_raw_fd(raw) }
    }

    #[test]
    fn unexpected_path_is_access_denied() {
        let (mut poll, mut events, mut client, mut server) = harness();
        let mut ctx = StubContext { added: Vec::new() };
        let msg = call_message("/not/the/controller", Some(INTERFACE), "AddListener", "h", Vec::new());
        dispatch(&mut ctx, &mut server, poll.registry(), msg).unwrap();

        let reply = pump_until_reply(&mut poll, &mut events, &mut client);
        assert_eq!(reply.msg_type, msg_type::ERROR);
        assert_eq!(reply.fields.reply_serial, Some(7));
        assert_eq!(reply.fields.error_name.as_deref(), Some(dbus_error::ACCESS_DENIED));
    }

    #[test]
    fn unexpected_interface_is_unknown_interface() {
        let (mut poll, mut events, mut client, mut server) = harness();
        let mut ctx = StubContext { added: Vec::new() };
        let msg = call_message(OBJECT_PATH, Some("org.bus1.NotController"), "AddListener", "h", Vec::new());
        dispatch(&mut ctx, &mut server, poll.registry(), msg).unwrap();

        let reply = pump_until_reply(&mut poll, &mut events, &mut client);
        assert_eq!(reply.fields.error_name.as_deref(), Some(dbus_error::UNKNOWN_INTERFACE));
    }

    #[test]
    fn missing_interface_is_accepted() {
        // The interface header field is optional per the wire format; a
        // call that omits it must still reach method lookup.
        let (mut poll, mut events, mut client, mut server) = harness();
        let mut ctx = StubContext { added: Vec::new() };
        let msg = call_message(OBJECT_PATH, None, "Nonexistent", "", Vec::new());
        dispatch(&mut ctx, &mut server, poll.registry(), msg).unwrap();

        let reply = pump_until_reply(&mut poll, &mut events, &mut client);
        assert_eq!(reply.fields.error_name.as_deref(), Some(dbus_error::UNKNOWN_METHOD));
    }

    #[test]
    fn unknown_method_is_unknown_method() {
        let (mut poll, mut events, mut client, mut server) = harness();
        let mut ctx = StubContext { added: Vec::new() };
        let msg = call_message(OBJECT_PATH, Some(INTERFACE), "Nonexistent", "", Vec::new());
        dispatch(&mut ctx, &mut server, poll.registry(), msg).unwrap();

        let reply = pump_until_reply(&mut poll, &mut events, &mut client);
        assert_eq!(reply.fields.error_name.as_deref(), Some(dbus_error::UNKNOWN_METHOD));
    }

    #[test]
    fn wrong_signature_is_invalid_args() {
        let (mut poll, mut events, mut client, mut server) = harness();
        let mut ctx = StubContext { added: Vec::new() };
        let msg = call_message(OBJECT_PATH, Some(INTERFACE), "AddListener", "s", Vec::new());
        dispatch(&mut ctx, &mut server, poll.registry(), msg).unwrap();

        let reply = pump_until_reply(&mut poll, &mut events, &mut client);
        assert_eq!(reply.fields.error_name.as_deref(), Some(dbus_error::INVALID_ARGS));
    }

    #[test]
    fn non_call_message_is_silently_ignored() {
        let (poll, _events, _client, mut server) = harness();
        let mut ctx = StubContext { added: Vec::new() };
        let msg = Message::new(Endian::Little, msg_type::SIGNAL, 1);
        assert!(dispatch(&mut ctx, &mut server, poll.registry(), msg).is_ok());
        assert!(ctx.added.is_empty());
    }

    #[test]
    fn successful_add_listener_steals_the_fd_and_replies_with_unit() {
        let (mut poll, mut events, mut client, mut server) = harness();
        let mut ctx = StubContext { added: Vec::new() };

        let mut writer = Writer::new(Endian::Little);
        writer.open_struct();
        writer.write_fd_index(0);
        writer.close_struct();
        let mut msg = call_message(OBJECT_PATH, Some(INTERFACE), "AddListener", "h", writer.finish());
        msg.fds.push(dummy_fd());

        dispatch(&mut ctx, &mut server, poll.registry(), msg).unwrap();

        let reply = pump_until_reply(&mut poll, &mut events, &mut client);
        assert_eq!(reply.msg_type, msg_type::METHOD_RETURN);
        assert_eq!(reply.fields.reply_serial, Some(7));
        assert_eq!(reply.fields.signature.as_deref(), Some(""));
        assert_eq!(ctx.added.len(), 1);
    }

    #[test]
    fn out_of_range_fd_index_disconnects_without_a_reply() {
        let (poll, _events, _client, mut server) = harness();
        let mut ctx = StubContext { added: Vec::new() };

        let mut writer = Writer::new(Endian::Little);
        writer.open_struct();
        writer.write_fd_index(3);
        writer.close_struct();
        let msg = call_message(OBJECT_PATH, Some(INTERFACE), "AddListener", "h", writer.finish());

        let err = dispatch(&mut ctx, &mut server, poll.registry(), msg).unwrap_err();
        assert_eq!(err, Error::Disconnect);
    }
}
