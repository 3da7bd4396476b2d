pub mod block;
pub mod builder;
pub mod chain;
pub mod db;
pub mod error;
pub mod logic;
pub mod params;
pub mod producer;
pub mod script;
pub mod state;
pub mod transaction;
pub mod utxo;

// Re-exports principais
pub use block::{calculate_merkle_root, NativeBlock, NativeBlockHeader};
pub use builder::{
    build_lock, build_split_m1, build_transfer_m1, build_unlock, LockInput, LockResult, M1Input,
    TransferResult, UnlockResult, VaultInput,
};
pub use chain::{Chain, ChainStore};
pub use db::{SettlementBatch, SettlementDb};
pub use error::{RejectionError, SettlementError, SettlementResult, DOS_MAX, DOS_PROTOCOL};
pub use logic::{process_special_txs, undo_special_txs, BlockApplyResult, SettlementOverlay};
pub use params::{ConsensusParams, MAX_FALLBACK_SLOTS};
pub use producer::{
    calculate_producer_scores, compute_block_score, expected_producer, producer_slot,
    verify_block_producer, MasternodeEntry, MasternodeList, ProducerVerification,
};
pub use state::{M1Receipt, SettlementState, TransferUndoData, UnlockUndoData, VaultEntry};
pub use transaction::{check_transaction, NativeTransaction, TxInput, TxOutput, TxType};
pub use utxo::{Utxo, UtxoSet};

// Re-exports de tipos compartilhados
pub use shared::{BlockchainError, Hash256, Result};
