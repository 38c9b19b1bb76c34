use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnoozerError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A tab without a URL can neither be stored nor re-opened.
    #[error("Tab \"{title}\" has an empty URL")]
    EmptyUrl { title: String },

    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SnoozerError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            SnoozerError::Config(_) => "CONFIG_ERROR",
            SnoozerError::EmptyUrl { .. } => "EMPTY_URL",
            SnoozerError::InvalidRule(_) => "INVALID_RULE",
            SnoozerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SnoozerError>;
