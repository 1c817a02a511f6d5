//! Matches inbound messages on a connection's Controller object against the
//! static method table and dispatches to handlers, replying with a typed
//! `METHOD_RETURN` or one of the standard `org.freedesktop.DBus.Error.*`
//! names.

mod context;
mod controller;
mod error;
mod methods;

pub use context::ControllerContext;
pub use controller::{dbus_error, dispatch, INTERFACE, OBJECT_PATH};
pub use error::Error;
pub use methods::{ControllerMethod, HandlerFn, METHODS};
