use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Invalid task type name: {0}")]
    InvalidTypeName(String),

    #[error("Duplicate task type in catalog: {0}")]
    DuplicateTaskType(String),

    #[error("Fleet command channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
