use thiserror::Error;

/// Errors shared by every stage of the pipeline.
///
/// Only recoverable conditions live here.  Structural invariant violations
/// (destroying a referenced buffer, popping an empty hit queue) are
/// programmer bugs and panic instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad configuration: {0}")]
    Config(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    #[error("module {module}: hit length mismatch, expected {expected} words got {actual}")]
    HitLengthMismatch {
        module: u32,
        expected: u32,
        actual: u32,
    },
    #[error("buffer is still referenced")]
    StillReferenced,
    #[error("allocation of {0} bytes failed")]
    OutOfMemory(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
