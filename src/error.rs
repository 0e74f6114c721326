//! Error types for multipart demultiplexing.

/// Errors that can occur while demultiplexing a multipart stream.
///
/// Construction errors (`MissingContentType`, `NotMultipart`,
/// `MissingBoundary`, `InvalidBoundary`) are reported synchronously, before
/// any chunk is accepted. Limit violations are fatal to the whole stream and
/// are reported exactly once. `MissingFilename`, `NotADirectory` and `Io`
/// only fail the specific save or drain operation that hit them.
#[derive(Debug)]
pub enum MultipartError {
    /// No Content-Type header value was supplied.
    MissingContentType,
    /// The Content-Type header does not declare `multipart/form-data`.
    NotMultipart,
    /// The Content-Type header has no `boundary` attribute.
    MissingBoundary,
    /// The boundary attribute is empty or exceeds the RFC 2046 length limit.
    InvalidBoundary,
    /// The accumulating header buffer exceeded the configured ceiling.
    BufferTooLarge {
        /// Header buffer size when the ceiling was crossed.
        size: usize,
        /// The configured maximum.
        max: usize,
    },
    /// Cumulative request size exceeded the configured maximum.
    TotalTooLarge {
        /// Total bytes seen when the limit was crossed.
        size: usize,
        /// The configured maximum.
        max: usize,
    },
    /// A file part exceeded the configured per-file size limit.
    FileTooLarge {
        /// Filename if present, otherwise the field name.
        name: String,
        /// Bytes attributed to the part when the limit was crossed.
        size: usize,
        /// The configured maximum.
        max: usize,
    },
    /// A field part exceeded the configured per-field size limit.
    FieldTooLarge {
        /// The field name.
        name: String,
        /// Bytes attributed to the part when the limit was crossed.
        size: usize,
        /// The configured maximum.
        max: usize,
    },
    /// More file parts arrived than the configured maximum.
    TooManyFiles {
        /// Number of files received, including the offending one.
        count: usize,
        /// The configured maximum.
        max: usize,
    },
    /// More field parts arrived than the configured maximum.
    TooManyFields {
        /// Number of fields received, including the offending one.
        count: usize,
        /// The configured maximum.
        max: usize,
    },
    /// The upstream source ended before the terminal boundary was seen.
    Incomplete,
    /// The upstream source yielded an error instead of a chunk.
    Payload {
        /// Description of the upstream failure.
        detail: String,
    },
    /// A file part without a filename cannot be saved.
    MissingFilename,
    /// The save target is not an existing directory.
    NotADirectory {
        /// The offending path.
        path: String,
    },
    /// I/O error while draining a part to storage.
    Io {
        /// Description of the error.
        detail: String,
    },
}

impl std::fmt::Display for MultipartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContentType => write!(f, "missing content-type header"),
            Self::NotMultipart => write!(f, "not a multipart/form-data request"),
            Self::MissingBoundary => {
                write!(f, "missing boundary attribute in multipart content-type")
            }
            Self::InvalidBoundary => write!(f, "invalid multipart boundary"),
            Self::BufferTooLarge { size, max } => {
                write!(
                    f,
                    "header buffer of {size} bytes exceeds maximum allowed of {max} bytes"
                )
            }
            Self::TotalTooLarge { size, max } => {
                write!(
                    f,
                    "total size of {size} bytes exceeds maximum allowed of {max} bytes"
                )
            }
            Self::FileTooLarge { name, size, max } => {
                write!(
                    f,
                    "file \"{name}\" of {size} bytes exceeds maximum allowed size of {max} bytes"
                )
            }
            Self::FieldTooLarge { name, size, max } => {
                write!(
                    f,
                    "field \"{name}\" of {size} bytes exceeds maximum allowed size of {max} bytes"
                )
            }
            Self::TooManyFiles { count, max } => {
                write!(
                    f,
                    "number of files received: {count}, exceeds maximum allowed: {max}"
                )
            }
            Self::TooManyFields { count, max } => {
                write!(
                    f,
                    "number of fields received: {count}, exceeds maximum allowed: {max}"
                )
            }
            Self::Incomplete => {
                write!(f, "multipart stream ended before the terminal boundary")
            }
            Self::Payload { detail } => write!(f, "payload error: {detail}"),
            Self::MissingFilename => write!(f, "cannot save file part: filename is missing"),
            Self::NotADirectory { path } => {
                write!(f, "save target \"{path}\" is not a directory")
            }
            Self::Io { detail } => write!(f, "multipart I/O error: {detail}"),
        }
    }
}

impl std::error::Error for MultipartError {}
