pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{
    sign_block_hash, verify_block_signature, KeyPair, PrivateKey, PublicKey, Signature,
    MAX_BLOCK_SIG_SIZE, MIN_BLOCK_SIG_SIZE,
};
pub use error::BlockchainError;
pub use hash::Hash256;
pub use types::{
    Amount, BlockHeight, BlockId, NetworkType, NodeConfig, OutPoint, OutputIndex, Timestamp, TxId,
    TESTNET_EPOCH,
};

pub type Result<T> = std::result::Result<T, BlockchainError>;
