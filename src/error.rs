use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to validate signature")]
    InvalidSignature(#[from] rsa::signature::Error),
    #[error("failed to generate an RSA keypair")]
    KeyGeneration(#[from] rsa::Error),
    #[error("malformed PEM-encoded key")]
    InvalidPem,
    #[error("malformed base64 signature")]
    InvalidBase64,
    #[error("recipient id is empty or invalid")]
    InvalidRecipient,
    #[error("transfer is missing a signature")]
    MissingSignature,
    #[error("coin status is {0}, not active")]
    InactiveStatus(crate::coin::CoinStatus),
    #[error("coin value must be positive")]
    ZeroValue,
    #[error("coin has expired")]
    Expired,
    #[error("split amount must be strictly between 0 and the coin's value")]
    InvalidSplitAmount,
    #[error("coins must share an owner to merge")]
    OwnerMismatch,
    #[error("coin is not eligible to merge: status is {0}")]
    NotMergeable(crate::coin::CoinStatus),
    #[error("coin does not belong to this wallet")]
    NotOwner,
    #[error("no coin at index {0}")]
    NoSuchCoin(usize),
    #[error("coin {0} not found")]
    CoinNotFound(uuid::Uuid),
    #[error("invalid agent ids for this transfer")]
    InvalidAgentIds,
    #[error("unknown agent id {0}")]
    UnknownAgent(usize),
    #[error("transaction {0} exceeded its retry budget")]
    MaxRetriesExceeded(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
