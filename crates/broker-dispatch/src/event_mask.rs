use mio::event::Event;

/// The set of readiness bits that fired for one registered file in one
/// wakeup. Hand-rolled rather than re-exposing `mio::event::Event` directly
/// so callbacks don't need a `mio` dependency of their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventMask {
    pub readable: bool,
    pub writable: bool,
    /// The peer half-closed (or fully closed) its end.
    pub hangup: bool,
    pub error: bool,
}

impl From<&Event> for EventMask {
    fn from(event: &Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            hangup: event.is_read_closed() || event.is_write_closed(),
            error: event.is_error(),
        }
    }
}
