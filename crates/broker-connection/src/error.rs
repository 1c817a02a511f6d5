use thiserror::Error;

/// Errors surfaced by [`crate::Connection`], matching the
/// `CONNECTION_E_*` kinds of the broker's error taxonomy.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level reset, or a SASL protocol violation (bad hex, wrong
    /// mechanism keyword, too many failed attempts) — both are terminal
    /// for the connection and map onto the same kind.
    #[error("connection reset")]
    Reset,
    /// The peer cleanly half-closed after all buffered input was drained.
    #[error("connection reached eof")]
    Eof,
    /// A message failed to parse while already authenticated; terminal for
    /// the connection (malformed peer), not just the one message.
    #[error(transparent)]
    Codec(#[from] broker_variant::Error),
}

impl From<broker_socket::Error> for Error {
    fn from(err: broker_socket::Error) -> Self {
        match err {
            broker_socket::Error::Reset => Error::Reset,
            broker_socket::Error::Eof => Error::Eof,
            broker_socket::Error::CorruptPrelude
            | broker_socket::Error::FrameTooLarge
            | broker_socket::Error::LineTooLong => Error::Reset,
            broker_socket::Error::Codec(e) => Error::Codec(e),
        }
    }
}
