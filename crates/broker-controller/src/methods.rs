use broker_utils::FdList;
use broker_variant::{Reader, Token, Writer};

use crate::context::ControllerContext;
use crate::error::Error;

pub type HandlerFn =
    for<'a> fn(&mut dyn ControllerContext, &mut Reader<'a>, &mut FdList, &mut Writer) -> Result<(), Error>;

/// One entry of the static `{name, handler, in-type, out-type}` dispatch
/// table. `in_tokens`/`out_tokens` each describe the message BODY as a
/// single outer struct (e.g. `(h)`, `()`) — the shape
/// [`broker_variant::verify_input_signature`] and the reply-header writer
/// both expect.
pub struct ControllerMethod {
    pub name: &'static str,
    pub in_tokens: &'static [Token],
    pub out_tokens: &'static [Token],
    pub handler: HandlerFn,
}

/// `(h)`: a single file-descriptor index.
const ADD_LISTENER_IN: &[Token] = &[Token::StructOpen, Token::UnixFd, Token::StructClose];
/// `()`: empty body.
const UNIT_OUT: &[Token] = &[Token::StructOpen, Token::StructClose];

fn add_listener(
    ctx: &mut dyn ControllerContext,
    reader: &mut Reader<'_>,
    fds: &mut FdList,
    writer: &mut Writer,
) -> Result<(), Error> {
    reader.open_struct()?;
    let fd_index = reader.read_fd_index()?;
    reader.close_struct()?;
    reader.end_read()?;

    // The source this is grounded on leaves out-of-range fd indices
    // unhandled ("XXX: error handling"); this implementation takes the
    // conservative reading of the taxonomy and reports it as a malformed
    // request rather than indexing a list that might not have that slot.
    let fd = fds.steal(fd_index as usize).ok_or(Error::InvalidMessage)?;
    ctx.add_listener(fd).map_err(|_| Error::InvalidMessage)?;

    writer.open_struct();
    writer.close_struct();
    Ok(())
}

/// The static method catalog. Linear scan is fine at this size; an
/// alphabetically-sorted table would allow a binary search if this grows.
pub const METHODS: &[ControllerMethod] =
    &[ControllerMethod { name: "AddListener", in_tokens: ADD_LISTENER_IN, out_tokens: UNIT_OUT, handler: add_listener }];
