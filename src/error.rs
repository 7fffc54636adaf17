use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("unauthorized")]
    Unauthorized,

    #[error("project blocked: {0}")]
    Blocked(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("project has {0} dependents")]
    HasDependents(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invariant violation: {0}")]
    Fatal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for failures worth retrying (store or I/O trouble), as
    /// opposed to rejections the caller must fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_) | Self::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
