//! Non-blocking Unix stream socket I/O: line/binary framing, ancillary
//! file-descriptor passing, and the outbound buffer queue.

mod cmsg;
mod error;
mod message;
mod socket;

pub use error::Error;
pub use message::{field_code, msg_type, HeaderFields, Message, Prelude, PRELUDE_LEN, PROTOCOL_VERSION};
pub use socket::{DispatchOutcome, Socket, SocketBuffer, DEFAULT_MAX_FRAME_LEN, MAX_LINE_LEN};
