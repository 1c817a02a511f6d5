use thiserror::Error;

/// Errors raised while driving a [`crate::Reader`] or [`crate::Writer`]
/// against a declared type tree.
///
/// All three read-side kinds are terminal for whatever message is being
/// parsed — the caller (`broker-connection`/`broker-controller`) is
/// responsible for mapping them onto the broader error taxonomy (disconnect
/// the peer, or for a controller method, report `INVALID_MESSAGE`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The buffer ended, or contained bytes that cannot be interpreted as
    /// the declared type (e.g. non-UTF-8 string, missing NUL terminator).
    #[error("corrupt data")]
    CorruptData,
    /// A read or write tried to advance past the end of the buffer.
    #[error("out of bounds")]
    OutOfBounds,
    /// The next token read did not match what the declared type expected.
    #[error("type mismatch")]
    TypeMismatch,
    /// A received signature string did not match the declared type.
    #[error("unexpected signature")]
    UnexpectedSignature,
}
