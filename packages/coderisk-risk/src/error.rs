use thiserror::Error;

pub type Result<T> = std::result::Result<T, RiskError>;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("graph store error: {0}")]
    Graph(#[from] coderisk_storage::StorageError),

    #[error("llm error: {0}")]
    Llm(#[from] coderisk_llm::LlmError),

    #[error("cache backend error: {0}")]
    CacheBackend(#[from] redis::RedisError),

    #[error("invalid investigation state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("unknown tool requested by model: {0}")]
    UnknownTool(String),

    #[error("investigation exceeded its {0}s deadline")]
    DeadlineExceeded(u64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RiskError {
    pub fn to_core_kind(&self) -> coderisk_core::ErrorKind {
        match self {
            RiskError::Graph(_) => coderisk_core::ErrorKind::MissingData,
            RiskError::Llm(e) => e.to_core_kind(),
            RiskError::CacheBackend(_) => coderisk_core::ErrorKind::Cache,
            RiskError::InvalidStateTransition { .. } => coderisk_core::ErrorKind::Configuration,
            RiskError::UnknownTool(_) => coderisk_core::ErrorKind::ValidationFailure,
            RiskError::DeadlineExceeded(_) => coderisk_core::ErrorKind::TransientExternal,
            RiskError::Serialization(_) => coderisk_core::ErrorKind::ValidationFailure,
            RiskError::Configuration(_) => coderisk_core::ErrorKind::Configuration,
        }
    }
}
