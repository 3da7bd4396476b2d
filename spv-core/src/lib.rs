//! # SPV Core - Motor de Cabeçalhos da Cadeia Externa
//!
//! Este crate implementa o lado externo do núcleo de settlement Bathron:
//! a observação verificada da cadeia BTC da qual os tokens nativos são
//! mintados.
//!
//! ## Visão Geral
//!
//! Três subsistemas interligados:
//! - **Armazém de cabeçalhos** ([`store`]) - armazém append-only de
//!   cabeçalhos externos com validação de prova de trabalho, checkpoints,
//!   retargeting e seleção de melhor cadeia por trabalho acumulado
//! - **Verificador de provas merkle** ([`merkle`]) - prova de inclusão de
//!   uma transação de queima sob a raiz de um cabeçalho armazenado, com a
//!   matriz de tentativas BE/LE
//! - **Índice de claims de queima** ([`burnclaim`]) - ciclo de vida
//!   `pending → mintable → finalized` (ou `rejected` em reorg externo) que
//!   alimenta a admissão de MINT_M0BTC no lado nativo
//!
//! ## Invariante A7
//!
//! Todo cabeçalho externo cuja altura coincide com um checkpoint de
//! identidade canônica precisa ter o hash da tabela. É o que garante que o
//! nó observa *a* cadeia externa, e não um fork dela.
//!
//! ## Exemplo de Uso
//!
//! ```no_run
//! use spv_core::BtcSpvStore;
//! use shared::NetworkType;
//!
//! let store = BtcSpvStore::open("./data", NetworkType::Testnet).unwrap();
//! let (tip_hash, tip_height, tip_work) = store.tip();
//! println!("ponta externa: {tip_hash} @ {tip_height} (trabalho {tip_work})");
//! ```

pub mod burnclaim;
pub mod header;
pub mod merkle;
pub mod params;
pub mod pow;
pub mod store;

// Re-exports principais
pub use burnclaim::{
    claim_id, BurnClaim, BurnClaimStore, BurnPayload, ClaimRejection, ClaimStats, ClaimStatus,
    ObserveStatus, ObservedBurn, SpvProof, BURN_MAGIC, CONFIRMATIONS_REQUIRED,
};
pub use header::{BtcBlockHeader, BtcHeaderIndex, BtcHeaderStatus, BTC_HEADER_SIZE};
pub use merkle::{verify_merkle_proof, MAX_PROOF_DEPTH};
pub use params::{
    anchor_checkpoints, btc_network_params, identity_checkpoints, AnchorCheckpoint,
    BtcNetworkParams, IdentityCheckpoint,
};
pub use store::{BatchResult, BtcSpvStore, MAX_CACHE_SIZE};
