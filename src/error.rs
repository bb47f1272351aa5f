use thiserror::Error;

/// Failures that can escape setup-time code (the loader and the CLI) to their caller.
///
/// Per-instruction and per-trap failures never reach this type: they are reported to the
/// guest program through the architectural channel (carry flag + AL category code) instead.
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file too small to be a valid executable")]
    FileTooSmall,
    #[error("not a recognized executable signature")]
    InvalidSignature,
    #[error("relocatable header is smaller than the minimum 28 bytes")]
    HeaderTooSmall,
    #[error("flat image exceeds the maximum size of 65,280 bytes")]
    TooLargeForFlatFormat,
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
