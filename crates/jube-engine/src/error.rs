//! Engine-level errors: `jube_core::EngineError` plus the persistence
//! and analysis failures specific to this crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Engine(#[from] jube_core::EngineError),

    #[error("xml serialize error: {0}")]
    XmlSerialize(#[from] quick_xml::SeError),

    #[error("xml deserialize error: {0}")]
    XmlDeserialize(#[from] quick_xml::DeError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("workpackage {0} not found")]
    WorkpackageNotFound(u64),

    #[error("step '{0}' not found")]
    StepNotFound(String),

    #[error("dependency cycle detected among steps: {0:?}")]
    DependencyCycle(Vec<String>),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
