use std::io;

use thiserror::Error;

/// The error type for reading cabinet files.
#[derive(Debug, Error)]
pub enum Error {
    /// The input is not a well-formed cabinet: bad signature, truncated
    /// header or tables, or inconsistent offsets and sizes.
    #[error("invalid cabinet: {0}")]
    Format(String),

    /// A data block failed its checksum, or a decompressor found an invalid
    /// symbol, offset, or length.  Other folders of the same cabinet may
    /// still be readable.
    #[error("corrupt cabinet data: {0}")]
    CorruptData(String),

    /// No file with the requested name exists in the cabinet.
    #[error("no such file in cabinet: {0:?}")]
    NotFound(String),

    /// The cabinet uses a feature this crate does not implement (Quantum
    /// compression, or data spanning multiple cabinets).
    #[error("unsupported cabinet feature: {0}")]
    UnsupportedFeature(String),

    /// An I/O error from the underlying reader or the destination sink.
    #[error(transparent)]
    Io(io::Error),
}

/// A specialized [`Result`](std::result::Result) type for cabinet
/// operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        if !error.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if error.kind() == io::ErrorKind::UnexpectedEof {
                return Error::Format("unexpected end of cabinet data".into());
            }
            return Error::Io(error);
        }
        let kind = error.kind();
        match error.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Error::Io(io::Error::new(kind, other)),
            None => Error::Io(io::Error::from(kind)),
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> io::Error {
        match error {
            Error::Io(error) => error,
            error @ (Error::Format(_) | Error::CorruptData(_)) => {
                io::Error::new(io::ErrorKind::InvalidData, error)
            }
            error @ Error::NotFound(_) => {
                io::Error::new(io::ErrorKind::NotFound, error)
            }
            error @ Error::UnsupportedFeature(_) => {
                io::Error::new(io::ErrorKind::Unsupported, error)
            }
        }
    }
}
