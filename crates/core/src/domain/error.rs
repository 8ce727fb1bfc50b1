// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid rollup status transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid rollup definition: {0}")]
    InvalidRollup(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
