use thiserror::Error;
use tieralloc_core::AllocError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown scenario '{name}' (try `list`)")]
    UnknownScenario { name: String },
    #[error("invalid seed '{raw}'")]
    InvalidSeed { raw: String },
    #[error("allocator: {0}")]
    Alloc(#[from] AllocError),
}
