/// Shared error type used across all StateCanvas crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("scenario load: {0}")]
    ScenarioLoad(String),

    #[error("dialog state not found: {0}")]
    StateNotFound(String),

    #[error("external call {name}: {message}")]
    ExternalCall { name: String, message: String },

    #[error("context store: {0}")]
    ContextStore(String),

    #[error("execution depth limit reached at depth {0}")]
    DepthLimit(u32),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
