use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptlerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid script name: {name}")]
    InvalidName { name: String },

    #[error("Unsupported script language: {0}")]
    UnsupportedLanguage(String),
}

pub type Result<T> = std::result::Result<T, ScriptlerError>;
