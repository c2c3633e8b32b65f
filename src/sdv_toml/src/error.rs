use thiserror::Error;

#[derive(Debug, Error)]
pub enum TomlError {
    /// Lexical or structural violation. `offset` is the absolute byte offset
    /// into the source buffer.
    #[error("TOML parse error at byte {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// An edit would violate a tree invariant (duplicate key, table under a
    /// value, move across a structural boundary, ...).
    #[error("invalid TOML tree operation: {0}")]
    InvalidOperation(String),
}

impl TomlError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        TomlError::Parse {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        TomlError::InvalidOperation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TomlError>;
