use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("State persistence failed: {0}")]
    Persistence(String),

    #[error("State file not found: {0}")]
    StateNotFound(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Agent binary not found: {0}")]
    AgentBinaryNotFound(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Working tree is not clean in {0}")]
    DirtyWorkTree(String),

    #[error("No home directory")]
    NoHomeDir,
}

pub type Result<T> = std::result::Result<T, Error>;
