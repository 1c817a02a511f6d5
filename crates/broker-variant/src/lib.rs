//! Typed reader/writer for the binary variant wire format used by message
//! headers and bodies, driven by a declared [`Type`] token tree rather than
//! a runtime format-string interpreter.

mod endian;
mod error;
mod reader;
mod signature;
mod token;
mod variant;
mod writer;

pub use endian::Endian;
pub use error::Error;
pub use reader::Reader;
pub use signature::verify_input_signature;
pub use token::{Token, Type};
pub use variant::Variant;
pub use writer::Writer;
