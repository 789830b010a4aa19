//! Errors raised by the scaling state store.
//!
//! Each variant carries the rendered cause from redb or serde_json. Callers
//! in the engine wrap these in their own errors and only ever log them, so
//! the text names which scaling record or database step failed.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// The database file could not be created, opened or locked.
    #[error("cannot open scaling state database: {0}")]
    Open(String),

    #[error("scaling state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open scaling state table: {0}")]
    Table(String),

    #[error("reading scaling state failed: {0}")]
    Read(String),

    #[error("writing scaling state failed: {0}")]
    Write(String),

    /// A policy, history, or schedule could not be encoded as JSON.
    #[error("cannot encode scaling record: {0}")]
    Serialize(String),

    /// A stored row is not valid JSON for its table.
    #[error("stored scaling record is corrupt: {0}")]
    Deserialize(String),
}
