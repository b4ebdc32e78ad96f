//! Error taxonomy for the lifecycle engine.
//!
//! Invalid transitions are typed rejections surfaced to the caller; they are
//! never silently applied and never abort a batch loop. Storage failures
//! propagate per-operation.

use crate::model::{ExitReason, PoolStatus};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("invalid transition: {op} from {from:?}")]
    InvalidTransition {
        op: &'static str,
        from: Option<PoolStatus>,
    },

    #[error("exit reason '{reason}' is not valid from {from}")]
    InvalidExitReason { from: PoolStatus, reason: ExitReason },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(String),
}
