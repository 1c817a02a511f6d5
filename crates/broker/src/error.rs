use thiserror::Error;

/// Top-level facade error: composes the lower crates' taxonomies with the
/// plain I/O failures that only show up at the accept/listen boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Connection(#[from] broker_connection::Error),
    #[error(transparent)]
    Controller(#[from] broker_controller::Error),
}
