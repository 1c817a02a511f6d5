use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use broker_utils::FdList;
use mio::{Interest, Registry, Token};
use tracing::{debug, warn};

use crate::cmsg::{recv_with_fds, send_with_fds};
use crate::error::Error;
use crate::message::{Message, Prelude, PRELUDE_LEN};

/// Maximum length of a handshake line before it is treated as a framing
/// attack and the connection is reset.
pub const MAX_LINE_LEN: usize = 16 * 1024;
/// Default ceiling on a single frame's total declared size.
pub const DEFAULT_MAX_FRAME_LEN: usize = 128 * 1024 * 1024;
/// Bytes read per `recv` call while draining the socket.
const READ_CHUNK: usize = 16 * 1024;
/// Bounds how many chunks are read in a single `dispatch` call so one very
/// chatty peer cannot starve the rest of the dispatcher's registrations.
const MAX_READ_CHUNKS_PER_DISPATCH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Line,
    Binary,
}

/// Outcome of a `dispatch` call, matching the socket layer's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Progress was made; the caller should keep this FD's interests as-is.
    Ok,
    /// The outbound queue fully drained; the caller should drop write
    /// interest until something new is queued.
    LostInterest,
    /// More inbound data is likely available but a fairness cap was hit
    /// this wakeup; the caller should expect another readiness
    /// notification.
    Preempted,
    /// The peer reset the connection (I/O error, or FDs left unclaimed at
    /// EOF).
    Reset,
    /// The peer cleanly half-closed and all buffered input has been
    /// drained.
    Eof,
}

/// A pre-serialized outbound unit: framed bytes plus the file descriptors
/// that must ride along with them.
pub struct SocketBuffer {
    bytes: Vec<u8>,
    fds: Vec<OwnedFd>,
    offset: usize,
}

impl SocketBuffer {
    pub fn new(bytes: Vec<u8>, fds: Vec<OwnedFd>) -> Self {
        Self { bytes, fds, offset: 0 }
    }

    pub fn line(text: &str) -> Self {
        Self::new(format!("{text}\r\n").into_bytes(), Vec::new())
    }
}

/// Wraps one non-blocking Unix stream socket: inbound line/binary framing,
/// an outbound queue of pre-serialized buffers, and the ancillary
/// file-descriptor FIFO that arrives alongside inbound bytes.
///
/// Registration with the dispatcher's `mio::Poll` is the caller's
/// responsibility (mirroring how the teacher's `TcpConnector` registers its
/// streams before handing them to `TcpStream`); this struct remembers its
/// own `Token` purely to reregister its own interest set.
pub struct Socket {
    stream: mio::net::UnixStream,
    token: Token,
    phase: Phase,
    inbound: Vec<u8>,
    inbound_fds: VecDeque<OwnedFd>,
    outbound: VecDeque<SocketBuffer>,
    writable_armed: bool,
    eof_seen: bool,
    max_frame_len: usize,
}

impl Socket {
    pub fn new(stream: mio::net::UnixStream, token: Token) -> Self {
        Self {
            stream,
            token,
            phase: Phase::Line,
            inbound: Vec::new(),
            inbound_fds: VecDeque::new(),
            outbound: VecDeque::new(),
            writable_armed: false,
            eof_seen: false,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    pub fn source(&mut self) -> &mut mio::net::UnixStream {
        &mut self.stream
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Switches framing from line-oriented (authentication) to the binary
    /// message protocol. Irreversible; called once the SASL exchange
    /// completes.
    pub fn enter_binary_phase(&mut self) {
        self.phase = Phase::Binary;
    }

    /// Notes file descriptors that arrived via ancillary data; paired with
    /// inbound bytes by `dequeue` once a message declares how many it
    /// consumes.
    fn absorb_ancillary_fds(&mut self, fds: Vec<OwnedFd>) {
        self.inbound_fds.extend(fds);
    }

    pub fn queue(&mut self, registry: &Registry, buffer: SocketBuffer) -> DispatchOutcome {
        self.outbound.push_back(buffer);
        self.arm_writable(registry)
    }

    pub fn queue_line(&mut self, registry: &Registry, text: &str) -> DispatchOutcome {
        self.queue(registry, SocketBuffer::line(text))
    }

    fn arm_writable(&mut self, registry: &Registry) -> DispatchOutcome {
        if !self.writable_armed {
            if let Err(err) = registry.reregister(&mut self.stream, self.token, Interest::READABLE | Interest::WRITABLE) {
                debug!(?err, "socket: arm writable");
                return DispatchOutcome::Reset;
            }
            self.writable_armed = true;
        }
        DispatchOutcome::Ok
    }

    /// Pumps I/O in response to dispatcher-reported readiness.
    pub fn dispatch(&mut self, registry: &Registry, readable: bool, writable: bool) -> DispatchOutcome {
        let mut preempted = false;

        if readable && !self.eof_seen {
            let mut chunks = 0;
            loop {
                if chunks >= MAX_READ_CHUNKS_PER_DISPATCH {
                    preempted = true;
                    break;
                }
                chunks += 1;

                let mut chunk = [0u8; READ_CHUNK];
                match recv_with_fds(self.raw_fd(), &mut chunk) {
                    Ok((0, _)) => {
                        self.eof_seen = true;
                        break;
                    }
                    Ok((n, fds)) => {
                        self.inbound.extend_from_slice(&chunk[..n]);
                        self.absorb_ancillary_fds(fds);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                    Err(err) => {
                        debug!(?err, "socket: recvmsg failed");
                        return DispatchOutcome::Reset;
                    }
                }
            }
        }

        if writable {
            match self.flush_outbound() {
                Ok(true) => {
                    if self.writable_armed {
                        if let Err(err) = registry.reregister(&mut self.stream, self.token, Interest::READABLE) {
                            debug!(?err, "socket: reregister after drain");
                            return DispatchOutcome::Reset;
                        }
                        self.writable_armed = false;
                    }
                }
                Ok(false) => {}
                Err(()) => return DispatchOutcome::Reset,
            }
        }

        if self.eof_seen && self.inbound.is_empty() {
            return if self.inbound_fds.is_empty() { DispatchOutcome::Eof } else { DispatchOutcome::Reset };
        }

        if preempted {
            return DispatchOutcome::Preempted;
        }

        if self.outbound.is_empty() && !self.writable_armed {
            DispatchOutcome::LostInterest
        } else {
            DispatchOutcome::Ok
        }
    }

    /// Drains the outbound queue as far as the kernel allows without
    /// blocking. Returns `Ok(true)` once fully drained, `Ok(false)` if work
    /// remains (blocked on `EWOULDBLOCK`), `Err(())` on a write failure.
    fn flush_outbound(&mut self) -> Result<bool, ()> {
        while let Some(front) = self.outbound.front_mut() {
            let remaining = &front.bytes[front.offset..];
            let fds: Vec<RawFd> =
                if front.offset == 0 { front.fds.iter().map(AsRawFd::as_raw_fd).collect() } else { Vec::new() };

            match send_with_fds(self.stream.as_raw_fd(), remaining, &fds) {
                Ok(0) => {
                    warn!("socket: sendmsg wrote zero bytes, disconnecting");
                    return Err(());
                }
                Ok(n) => {
                    front.offset += n;
                    if front.offset == front.bytes.len() {
                        self.outbound.pop_front();
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(err) => {
                    warn!(?err, "socket: sendmsg failed");
                    return Err(());
                }
            }
        }
        Ok(true)
    }

    /// Returns the next complete handshake line (without the trailing
    /// CRLF), `Ok(None)` if none is buffered yet, or `Err` if the peer is
    /// gone and what remains can never complete a line.
    pub fn dequeue_line(&mut self) -> Result<Option<String>, Error> {
        debug_assert_eq!(self.phase, Phase::Line);
        let Some(idx) = find_crlf(&self.inbound) else {
            if self.inbound.len() > MAX_LINE_LEN {
                return Err(Error::LineTooLong);
            }
            return self.no_more_input();
        };
        let line: Vec<u8> = self.inbound.drain(..idx + 2).collect();
        let text = String::from_utf8_lossy(&line[..line.len() - 2]).into_owned();
        Ok(Some(text))
    }

    /// Returns the next complete framed message, `Ok(None)` if not enough
    /// bytes (or FDs) have arrived yet, or `Err` if the peer is gone and
    /// what remains can never complete a frame.
    pub fn dequeue(&mut self) -> Result<Option<Message>, Error> {
        debug_assert_eq!(self.phase, Phase::Binary);
        if self.inbound.len() < PRELUDE_LEN {
            return self.no_more_input();
        }
        let prelude_bytes: [u8; PRELUDE_LEN] = self.inbound[..PRELUDE_LEN].try_into().unwrap();
        let prelude = Prelude::decode(&prelude_bytes)?;
        let frame_len = prelude.frame_len();
        if frame_len > self.max_frame_len {
            return Err(Error::FrameTooLarge);
        }
        if self.inbound.len() < frame_len {
            return self.no_more_input();
        }

        // Peek the fd count without consuming bytes yet, so an
        // under-supplied fd set leaves the frame buffered rather than
        // dropping the bytes it would need on the next dispatch.
        let header_bytes = &self.inbound[PRELUDE_LEN..PRELUDE_LEN + prelude.header_array_len as usize];
        let needed_fds = peek_unix_fds(header_bytes, prelude.endian)?;
        if self.inbound_fds.len() < needed_fds as usize {
            return self.no_more_input();
        }

        let frame: Vec<u8> = self.inbound.drain(..frame_len).collect();
        let mut fds = FdList::with_capacity(needed_fds as usize);
        for _ in 0..needed_fds {
            fds.push(self.inbound_fds.pop_front().expect("checked above"));
        }

        Ok(Some(Message::decode(&prelude, &frame, fds)?))
    }

    /// Called whenever a dequeue method finds insufficient data for a
    /// complete line/frame. If the peer already hung up, what's buffered
    /// will never grow into a complete unit — a clean `Eof` if nothing at
    /// all is left over, otherwise a truncated remainder that is `Reset`.
    /// While the peer is still open, this is simply "no data yet".
    fn no_more_input<T>(&self) -> Result<Option<T>, Error> {
        if self.eof_seen {
            return Err(if self.inbound.is_empty() && self.inbound_fds.is_empty() {
                Error::Eof
            } else {
                Error::Reset
            });
        }
        Ok(None)
    }

    pub fn close(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.stream);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Scans the header field array for the `unix-fds` entry without going
/// through the full typed `Reader` (the exact variant wrapper around it
/// doesn't matter for this peek — only the declared field count).
fn peek_unix_fds(header_bytes: &[u8], endian: broker_variant::Endian) -> Result<u32, Error> {
    use broker_variant::{Reader, Token};
    const FIELDS_ARRAY_TOKENS: &[Token] =
        &[Token::ArrayOpen, Token::StructOpen, Token::Byte, Token::Variant, Token::StructClose];
    let mut reader = Reader::new(FIELDS_ARRAY_TOKENS, endian, header_bytes);
    let mut unix_fds = 0u32;
    let entries = reader.read_array(|r| {
        r.open_struct()?;
        let code = r.read_byte()?;
        let value = r.read_variant_dynamic()?;
        r.close_struct()?;
        Ok((code, value))
    })?;
    for (code, value) in entries {
        if code == crate::message::field_code::UNIX_FDS {
            unix_fds = value.as_u32().unwrap_or(0);
        }
    }
    reader.end_read()?;
    Ok(unix_fds)
}
