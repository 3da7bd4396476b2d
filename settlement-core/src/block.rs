//! Blocos da cadeia nativa (proof-of-authority)
//!
//! Sem recompensa de bloco e sem coinbase: a oferta de M0 nasce apenas de
//! queimas verificadas. O envelope de assinatura do produtor fica fora do
//! hash do bloco, de modo que o operador assina exatamente o hash.

use crate::params::ConsensusParams;
use crate::transaction::NativeTransaction;
use serde::{Deserialize, Serialize};
use shared::{BlockchainError, Hash256, Result, Timestamp};

/// Cabeçalho do bloco nativo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeBlockHeader {
    /// Versão do bloco
    pub version: u32,
    /// Hash do bloco anterior
    pub prev_hash: Hash256,
    /// Merkle root das transações
    pub merkle_root: Hash256,
    /// Timestamp do bloco (entra na derivação do slot de produtor)
    pub time: Timestamp,
    /// Altura do bloco
    pub height: u32,
}

impl NativeBlockHeader {
    /// Calcula o hash do cabeçalho (Keccak-256 da forma serializada)
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn hash(&self) -> Result<Hash256> {
        let serialized = serde_json::to_vec(self)
            .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
        Ok(Hash256::keccak256(&serialized))
    }
}

/// Bloco completo da cadeia nativa
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeBlock {
    /// Cabeçalho do bloco
    pub header: NativeBlockHeader,
    /// Assinatura ECDSA (DER) do produtor sobre o hash do bloco
    pub producer_sig: Vec<u8>,
    /// Transações no bloco (pode ser vazio: não há coinbase)
    pub txs: Vec<NativeTransaction>,
}

impl NativeBlock {
    /// Cria o bloco gênese da rede (sem transações, sem assinatura)
    ///
    /// # Errors
    ///
    /// Retorna erro se o cálculo do merkle root falhar
    pub fn genesis(params: &ConsensusParams) -> Result<Self> {
        let header = NativeBlockHeader {
            version: 1,
            prev_hash: Hash256::zero(),
            merkle_root: calculate_merkle_root(&[])?,
            time: params.genesis_time,
            height: 0,
        };
        Ok(Self {
            header,
            producer_sig: Vec::new(),
            txs: Vec::new(),
        })
    }

    /// Obter o hash do bloco
    ///
    /// # Errors
    ///
    /// Retorna erro se o cálculo do hash do cabeçalho falhar
    pub fn hash(&self) -> Result<Hash256> {
        self.header.hash()
    }

    /// Validação básica independente de contexto
    ///
    /// # Errors
    ///
    /// Retorna erro se o merkle root não corresponder às transações
    pub fn validate_basic(&self) -> Result<()> {
        let calculated = calculate_merkle_root(&self.txs)?;
        if calculated != self.header.merkle_root {
            return Err(BlockchainError::InvalidBlock(
                "Invalid merkle root".to_string(),
            ));
        }
        Ok(())
    }
}

/// Calcula a merkle root de uma lista de transações nativas.
///
/// Árvore Keccak-256 com duplicação do nó ímpar; lista vazia produz zero.
///
/// # Errors
///
/// Retorna erro se o hash de alguma transação falhar
pub fn calculate_merkle_root(txs: &[NativeTransaction]) -> Result<Hash256> {
    if txs.is_empty() {
        return Ok(Hash256::zero());
    }

    let mut hashes: Vec<Hash256> = txs
        .iter()
        .map(NativeTransaction::hash)
        .collect::<Result<Vec<_>>>()?;

    while hashes.len() > 1 {
        let mut next_level = Vec::new();

        for chunk in hashes.chunks(2) {
            let mut data = Vec::with_capacity(64);
            data.extend_from_slice(chunk[0].as_bytes());
            if chunk.len() == 2 {
                data.extend_from_slice(chunk[1].as_bytes());
            } else {
                // Nó ímpar combina consigo mesmo
                data.extend_from_slice(chunk[0].as_bytes());
            }
            next_level.push(Hash256::keccak256(&data));
        }

        hashes = next_level;
    }

    Ok(hashes[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script;
    use crate::transaction::{TxInput, TxOutput, TxType};
    use shared::{NetworkType, OutPoint};

    fn sample_tx(tag: &[u8]) -> NativeTransaction {
        NativeTransaction::new(
            1,
            TxType::Ordinary,
            vec![TxInput::new(
                OutPoint::new(Hash256::keccak256(tag), 0),
                vec![1],
                0,
            )],
            vec![TxOutput::new(100, script::destination_script(&[1u8; 20]))],
            0,
        )
    }

    #[test]
    fn test_genesis_block() {
        let params = ConsensusParams::for_network(NetworkType::Regtest);
        let genesis = NativeBlock::genesis(&params).unwrap();

        assert_eq!(genesis.header.height, 0);
        assert!(genesis.header.prev_hash.is_zero());
        assert!(genesis.txs.is_empty());
        assert!(genesis.producer_sig.is_empty());
        genesis.validate_basic().unwrap();

        // Hash determinístico
        assert_eq!(genesis.hash().unwrap(), genesis.hash().unwrap());
    }

    #[test]
    fn test_merkle_root_changes_with_txs() {
        let empty = calculate_merkle_root(&[]).unwrap();
        assert_eq!(empty, Hash256::zero());

        let single = calculate_merkle_root(&[sample_tx(b"a")]).unwrap();
        let double = calculate_merkle_root(&[sample_tx(b"a"), sample_tx(b"b")]).unwrap();
        let triple =
            calculate_merkle_root(&[sample_tx(b"a"), sample_tx(b"b"), sample_tx(b"c")]).unwrap();

        assert_ne!(single, double);
        assert_ne!(double, triple);
        assert_eq!(single, sample_tx(b"a").hash().unwrap());
    }

    #[test]
    fn test_validate_basic_detects_merkle_mismatch() {
        let params = ConsensusParams::for_network(NetworkType::Regtest);
        let mut block = NativeBlock::genesis(&params).unwrap();

        block.txs.push(sample_tx(b"a"));
        assert!(block.validate_basic().is_err());

        block.header.merkle_root = calculate_merkle_root(&block.txs).unwrap();
        block.validate_basic().unwrap();
    }
}
