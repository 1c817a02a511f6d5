use thiserror::Error;

/// Errors raised validating or handling an inbound Controller method call,
/// matching the dispatch-level kinds of the broker's error taxonomy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("path is not the controller object")]
    UnexpectedPath,
    #[error("interface is not the controller interface")]
    UnexpectedInterface,
    #[error("no such controller method")]
    UnexpectedMethod,
    #[error("signature does not match the method's declared input type")]
    UnexpectedSignature,
    /// Malformed framing/parse mid-handler (including a handler's own
    /// argument validation, like an out-of-range fd index). Terminal:
    /// maps to [`Error::Disconnect`] with no reply sent.
    #[error("invalid message")]
    InvalidMessage,
    /// The connection must be torn down with no reply — either because
    /// `InvalidMessage` escalated, or because even an error reply could
    /// not be enqueued.
    #[error("disconnect")]
    Disconnect,
}

impl From<broker_variant::Error> for Error {
    fn from(_: broker_variant::Error) -> Self {
        Error::InvalidMessage
    }
}

impl From<broker_connection::Error> for Error {
    fn from(_: broker_connection::Error) -> Self {
        Error::Disconnect
    }
}

impl Error {
    /// The standard `org.freedesktop.DBus.Error.*` reply name a validation
    /// failure is reported to the peer as, or `None` for the two kinds that
    /// never get a reply and instead tear the connection down.
    pub fn dbus_name(self) -> Option<&'static str> {
        match self {
            Error::UnexpectedPath => Some(crate::dbus_error::ACCESS_DENIED),
            Error::UnexpectedInterface => Some(crate::dbus_error::UNKNOWN_INTERFACE),
            Error::UnexpectedMethod => Some(crate::dbus_error::UNKNOWN_METHOD),
            Error::UnexpectedSignature => Some(crate::dbus_error::INVALID_ARGS),
            Error::InvalidMessage | Error::Disconnect => None,
        }
    }
}
