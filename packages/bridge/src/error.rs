use common::codec::CodecError;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Judge '{0}' is already connected")]
    DuplicateJudge(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
