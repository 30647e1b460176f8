/// Core error type for the task coordination core.
///
/// Adapter crates should map their specific failures into this type so the
/// worker core can handle them consistently (retry later vs escalate).
///
/// Expected races are deliberately *not* errors: a lost claim is `false`, a
/// lost conditional write is `WriteOutcome::VersionMismatch`. Only genuinely
/// exceptional outcomes live here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Credential acquisition failed, including the post-401 retry.
    #[error("auth error: {0}")]
    Auth(String),

    /// Non-2xx remote response. Callers branch on `status` (429, 412).
    #[error("remote error: status {status}: {message}")]
    Remote { status: u16, message: String },

    /// Transport-level failure (timeout, connection reset, DNS).
    #[error("transport error: {0}")]
    Transport(String),

    /// A document update lost the version-token race twice in a row.
    #[error("concurrent edit: document {doc_id} changed under us twice")]
    ConcurrentEdit { doc_id: String },

    /// Downloaded content exceeded the configured ceiling.
    #[error("file too large: {size} bytes exceeds limit of {limit}")]
    FileTooLarge { size: usize, limit: usize },

    /// No source could supply the requested content.
    #[error("file resolution failed: primary: {primary}; secondary: {secondary}")]
    FileResolution { primary: String, secondary: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for HTTP 429 from a remote dependency.
    pub fn is_throttled(&self) -> bool {
        self.status() == Some(429)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
