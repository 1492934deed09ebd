use mtc_core::UnknownVariant;
use thiserror::Error;

/// A single line could not be decoded. The stream itself stays usable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("unknown data item {key:?}")]
    UnknownDataItem { device: Option<String>, key: String },
    #[error(transparent)]
    UnknownVariant(#[from] UnknownVariant),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("time series declares {declared} samples but carries {actual}")]
    SampleCount { declared: usize, actual: usize },
    #[error("malformed entry list {0:?}")]
    Entries(String),
    #[error("unrecognized command {0:?}")]
    UnknownCommand(String),
}

/// The byte stream is no longer decodable; the connection must be dropped.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("multi-line block {marker:?} not terminated before end of stream")]
    Unterminated { marker: String },
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
}
