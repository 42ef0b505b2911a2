use std::fmt::Display;

/// EmberDB errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The key is not present in the store.
    NotFound,
    /// A record header was cut short: fewer than 8 bytes were available.
    ShortHeader,
    /// A record body ended before `key_len + value_len` bytes were available.
    ShortBody,
    /// Clean end of a segment stream, reached before any header byte.
    EndOfStream,
    /// The index references a frozen segment id that is not open.
    InvalidSegment(u64),
    /// An IO error.
    IO(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "record does not exist"),
            Error::ShortHeader => write!(f, "truncated record header"),
            Error::ShortBody => write!(f, "truncated record body"),
            Error::EndOfStream => write!(f, "end of segment stream"),
            Error::InvalidSegment(id) => write!(f, "unknown frozen segment {id}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// An EmberDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
