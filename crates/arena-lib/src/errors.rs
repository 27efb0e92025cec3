use arena_types::CodecError;
use ractor::SpawnErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Wire codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Database error: {0}")]
    DBInternalError(String),
    #[error("RPC client error: {0}")]
    RpcClient(#[from] jsonrpsee::core::ClientError),
    #[error("Failed to spawn actor: {0}")]
    SpawnErr(#[from] SpawnErr),
    #[error("InvalidParameter: {0}")]
    InvalidParameter(String),
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
