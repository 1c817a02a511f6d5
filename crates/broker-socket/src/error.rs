use thiserror::Error;

/// Errors the socket layer can report. `Reset` and `Eof` are not failures in
/// the Rust sense — they are reported as `Err` so `dispatch`'s match arms
/// read the same way the rest of the crate handles recoverable-but-terminal
/// conditions, matching the taxonomy's `CONNECTION_E_RESET`/`CONNECTION_E_EOF`
/// split.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed message prelude")]
    CorruptPrelude,
    #[error("declared frame size exceeds configured ceiling")]
    FrameTooLarge,
    #[error("handshake line exceeds the 16 KiB cap")]
    LineTooLong,
    #[error(transparent)]
    Codec(#[from] broker_variant::Error),
    #[error("peer reset the connection")]
    Reset,
    #[error("peer closed the connection")]
    Eof,
}
