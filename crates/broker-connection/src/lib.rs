//! Per-peer connection state machine: drives a socket through the SASL
//! authentication handshake and then the binary message phase, with
//! transaction de-duplication for fan-out delivery.

mod connection;
mod error;
mod peercred;
mod sasl;

pub use connection::{log_teardown, Connection, State};
pub use error::Error;
pub use peercred::peer_uid;
pub use sasl::{Anonymous, External, SaslLine, SaslMechanism, MAX_AUTH_ATTEMPTS};
