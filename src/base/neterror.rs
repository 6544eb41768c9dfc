use http::StatusCode;
use std::io;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Malformed input
    #[error("Bad percent-encoding in URI")]
    BadPercentEncoding,
    #[error("Encoded slash or backslash in URI")]
    EncodedSlash,
    #[error("NUL byte in URI")]
    NullByteInUri,
    #[error("URI does not start with '/'")]
    UriNotAbsolute,
    #[error("URI escapes the root")]
    UriTraversal,
    #[error("Invalid header")]
    InvalidHeader,

    // Routing
    #[error("No context mapped for request")]
    NotFound,
    #[error("Method not allowed (allow: {allow})")]
    MethodNotAllowed { allow: String },

    // Peer disconnected
    #[error("Client aborted ({kind:?}): {message}")]
    ClientAbort { kind: io::ErrorKind, message: String },

    // Illegal state
    #[error("Response already committed")]
    ResponseCommitted,
    #[error("Writer already obtained for this response")]
    WriterObtained,
    #[error("Output stream already obtained for this response")]
    OutputStreamObtained,
    #[error("Reader already obtained for this request")]
    ReaderObtained,
    #[error("Input stream already obtained for this request")]
    InputStreamObtained,
    #[error("Stream not marked or mark invalidated")]
    InvalidMark,
    #[error("Stream closed")]
    StreamClosed,
    #[error("Parameter map is locked")]
    ParametersLocked,
    #[error("Facade used after its exchange was recycled")]
    FacadeRecycled,
    #[error("Facade target is already borrowed")]
    FacadeBusy,
    #[error("Buffer size cannot change after content was written")]
    InvalidBufferSize,

    // Limits
    #[error("POST body exceeds limit of {limit} bytes")]
    PostTooLarge { limit: usize },

    // Collaborators
    #[error("Handler failed: {message}")]
    Handler { message: String },
    #[error("Transport failed: {message}")]
    Transport { message: String },
    #[error("Unsupported charset: {name}")]
    UnsupportedCharset { name: String },
    #[error("Invalid redirect location")]
    InvalidRedirect,
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl NetError {
    /// Peer-disconnected condition from a transport write failure.
    pub fn client_abort(err: &io::Error) -> Self {
        NetError::ClientAbort {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        NetError::Handler {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        NetError::Transport {
            message: message.into(),
        }
    }

    pub fn unsupported_charset(name: impl Into<String>) -> Self {
        NetError::UnsupportedCharset { name: name.into() }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        NetError::InvalidConfig {
            message: message.into(),
        }
    }

    /// True for write/flush failures caused by the remote side.
    pub fn is_client_abort(&self) -> bool {
        matches!(self, NetError::ClientAbort { .. })
    }

    /// True for request-line problems answered inline with a 400.
    pub fn is_malformed_request(&self) -> bool {
        matches!(
            self,
            NetError::BadPercentEncoding
                | NetError::EncodedSlash
                | NetError::NullByteInUri
                | NetError::UriNotAbsolute
                | NetError::UriTraversal
                | NetError::InvalidHeader
        )
    }

    /// The status the adapter answers with when this error ends an exchange.
    pub fn status_code(&self) -> StatusCode {
        match self {
            e if e.is_malformed_request() => StatusCode::BAD_REQUEST,
            NetError::NotFound => StatusCode::NOT_FOUND,
            NetError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            NetError::PostTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            NetError::UnsupportedCharset { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
