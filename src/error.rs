use thiserror::Error;

/// Error kinds surfaced by the HN4 core.
///
/// These map directly onto the kinds named by the on-disk format and
/// recovery protocol; callers are expected to match on variants, not just
/// propagate the error as opaque.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("geometry validation failed")]
    Geometry,
    #[error("alignment requirement violated")]
    AlignmentFail,
    #[error("structure not initialized")]
    Uninitialized,
    #[error("allocation failure")]
    NoMem,
    #[error("hardware I/O error")]
    HwIo,
    #[error("media is toxic")]
    MediaToxic,
    #[error("data rot detected")]
    DataRot,
    #[error("epoch lost")]
    EpochLost,
    #[error("generation or resource exists")]
    EExist,
    #[error("no space left")]
    ENoSpc,
    #[error("gravity collapse: allocation exhausted")]
    GravityCollapse,
    #[error("tampered data detected")]
    Tampered,
    #[error("internal fault")]
    InternalFault,
}

/// Top-level error type for the HN4 core.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind}")]
pub struct Error {
    pub kind: ErrorKind,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self
    {
        Self { kind }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self
    {
        Self::new(kind)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
