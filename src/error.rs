pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid index at line {line}: {message}")]
    IndexParse { line: usize, message: String },

    #[error("fetch of {size} bytes exceeds the configured limit of {limit} bytes")]
    OversizedFetch { size: u64, limit: u64 },

    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u8),

    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("corrupt block: {0}")]
    CorruptBlock(String),

    #[error("reference fetch failed: {0}")]
    ReferenceFetch(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unexpected end of data while reading {0}")]
    Truncated(&'static str),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short stable name of the error kind, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::IndexParse { .. } => "IndexParseError",
            Error::OversizedFetch { .. } => "OversizedFetch",
            Error::UnsupportedCompression(_) => "UnsupportedCompressionMethod",
            Error::UnsupportedEncoding(_) => "UnsupportedEncoding",
            Error::CorruptBlock(_) => "CorruptBlock",
            Error::ReferenceFetch(_) => "ReferenceFetchError",
            Error::Decode(_) | Error::Truncated(_) => "DecodeError",
            Error::InvalidFormat(_) => "InvalidFormat",
            Error::NotFound(_) => "NotFound",
            Error::Io(_) | Error::Internal(_) => "InternalError",
        }
    }
}
