//! 아카이브 계층 에러 타입

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive connection lock poisoned")]
    Poisoned,

    #[error("Archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
