//! Índice de claims de queima da cadeia externa
//!
//! Uma queima é uma transação externa pagando ao padrão OP_RETURN reservado
//! (`BATHRON1` + destino + compromisso de valor) num dos três primeiros
//! outputs. O claim entra como `pending` na observação, vira `mintable`
//! após a profundidade de confirmação fixa com prova SPV válida, `finalized`
//! quando um MINT_M0BTC nativo o consome, e `rejected` se um reorg externo
//! remover o bloco da melhor cadeia.

use crate::header::BtcHeaderIndex;
use crate::store::BtcSpvStore;
use serde::{Deserialize, Serialize};
use shared::{Amount, BlockchainError, Hash256, Result};
use tracing::{info, warn};

/// Prefixo ASCII do payload de queima
pub const BURN_MAGIC: &[u8; 8] = b"BATHRON1";

/// Tamanho total do payload: magic + destino (20B) + valor (u64 LE)
pub const BURN_PAYLOAD_SIZE: usize = 8 + 20 + 8;

/// Último índice de output varrido em busca do OP_RETURN de queima
pub const BURN_SCAN_VOUT_MAX: u32 = 2;

/// Confirmações externas exigidas para um claim virar `mintable`
pub const CONFIRMATIONS_REQUIRED: u32 = 6;

// Prefixos de chave do banco
const DB_CLAIM: u8 = b'C';
const DB_CLAIM_ID: u8 = b'I';
const DB_STATUS: u8 = b'S';
const DB_SCAN_HEIGHT: u8 = b'H';
const DB_SCAN_HASH: u8 = b'Z';

fn storage_err(e: sled::Error) -> BlockchainError {
    BlockchainError::StorageError(e.to_string())
}

fn codec_err(e: bincode::Error) -> BlockchainError {
    BlockchainError::SerializationError(e.to_string())
}

/// Estado de um claim de queima
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    Pending,
    Mintable,
    Finalized,
    Rejected,
}

impl ClaimStatus {
    /// Nome estável do status (visível via RPC)
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Mintable => "mintable",
            Self::Finalized => "finalized",
            Self::Rejected => "rejected",
        }
    }

    const fn index_byte(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Mintable => 1,
            Self::Finalized => 2,
            Self::Rejected => 3,
        }
    }
}

/// Motivo de rejeição na observação de uma queima (tag estável)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRejection {
    BadPayload,
    AmountMismatch,
    VoutOutOfRange,
    BelowMinSupported,
    HeaderNotFound,
    BadProof,
    AlreadyFinalized,
}

impl ClaimRejection {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BadPayload => "bad-burn-payload",
            Self::AmountMismatch => "bad-burn-amount-mismatch",
            Self::VoutOutOfRange => "bad-burn-vout",
            Self::BelowMinSupported => "burn-below-min-height",
            Self::HeaderNotFound => "burn-header-not-found",
            Self::BadProof => "bad-burn-proof",
            Self::AlreadyFinalized => "burn-already-finalized",
        }
    }
}

/// Resultado de `observe`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveStatus {
    /// Claim armazenado aguardando confirmações
    Pending,
    /// Claim armazenado já apto a mint
    Mintable,
    /// Queima rejeitada pelo motivo indicado
    Rejected(ClaimRejection),
}

/// Payload do OP_RETURN de queima: `BATHRON1 || destino || valor`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnPayload {
    /// Hash de 20 bytes do destinatário nativo do mint
    pub destination: [u8; 20],
    /// Valor comprometido em sats (deve igualar o valor do output queimado)
    pub amount_sats: u64,
}

impl BurnPayload {
    /// Serializa o payload para inclusão no OP_RETURN
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BURN_PAYLOAD_SIZE);
        out.extend_from_slice(BURN_MAGIC);
        out.extend_from_slice(&self.destination);
        out.extend_from_slice(&self.amount_sats.to_le_bytes());
        out
    }

    /// Decodifica um payload de queima
    ///
    /// # Errors
    ///
    /// Retorna erro se o tamanho ou o magic não conferirem
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BURN_PAYLOAD_SIZE {
            return Err(BlockchainError::InvalidTransaction(format!(
                "burn payload must be {BURN_PAYLOAD_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        if &bytes[..8] != BURN_MAGIC {
            return Err(BlockchainError::InvalidTransaction(
                "burn payload magic mismatch".to_string(),
            ));
        }

        let mut destination = [0u8; 20];
        destination.copy_from_slice(&bytes[8..28]);
        let amount_sats = u64::from_le_bytes(bytes[28..36].try_into().unwrap());

        Ok(Self {
            destination,
            amount_sats,
        })
    }
}

/// Prova SPV de inclusão de uma transação externa
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpvProof {
    pub merkle_path: Vec<Hash256>,
    pub tx_index: u32,
}

/// Queima observada na cadeia externa, pronta para validação
#[derive(Debug, Clone)]
pub struct ObservedBurn {
    pub btc_txid: Hash256,
    pub vout: u32,
    pub value_sats: Amount,
    pub payload: Vec<u8>,
    pub btc_block_height: u32,
    pub proof: SpvProof,
}

/// Registro persistido de um claim de queima
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnClaim {
    pub claim_id: Hash256,
    pub btc_txid: Hash256,
    pub btc_block_height: u32,
    pub btc_block_hash: Hash256,
    pub vout: u32,
    pub amount_sats: Amount,
    pub op_return_payload: Vec<u8>,
    pub destination: Vec<u8>,
    pub status: ClaimStatus,
    pub confirmations_at_seen: u32,
    /// Altura nativa em que o MINT consumiu o claim (se finalizado)
    pub finalized_height: Option<u32>,
}

/// Identificador derivado do claim: `keccak256(btc_txid || vout)`
#[must_use]
pub fn claim_id(btc_txid: &Hash256, vout: u32) -> Hash256 {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(btc_txid.as_bytes());
    data.extend_from_slice(&vout.to_le_bytes());
    Hash256::keccak256(&data)
}

/// Estatísticas agregadas do índice de claims
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClaimStats {
    pub pending: u64,
    pub mintable: u64,
    pub finalized: u64,
    pub rejected: u64,
    /// Total de sats já mintados via claims finalizados
    pub minted_sats: Amount,
}

fn claim_key(btc_txid: &Hash256, vout: u32) -> [u8; 37] {
    let mut key = [0u8; 37];
    key[0] = DB_CLAIM;
    key[1..33].copy_from_slice(btc_txid.as_bytes());
    key[33..].copy_from_slice(&vout.to_le_bytes());
    key
}

fn id_key(claim_id: &Hash256) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = DB_CLAIM_ID;
    key[1..].copy_from_slice(claim_id.as_bytes());
    key
}

fn status_key(status: ClaimStatus, btc_txid: &Hash256, vout: u32) -> [u8; 38] {
    let mut key = [0u8; 38];
    key[0] = DB_STATUS;
    key[1] = status.index_byte();
    key[2..34].copy_from_slice(btc_txid.as_bytes());
    key[34..].copy_from_slice(&vout.to_le_bytes());
    key
}

/// Índice persistente de claims de queima.
///
/// Único escritor: mutações exigem `&mut self`. As escritas vêm de duas
/// fontes serializadas (scanner externo e aplicação de MINT nativo) que o
/// nó não deixa sobrepor.
pub struct BurnClaimStore {
    db: sled::Db,
}

impl BurnClaimStore {
    /// Abre (ou cria) o índice em `<data_dir>/burnclaim`
    ///
    /// # Errors
    ///
    /// Retorna erro se o armazenamento não puder ser aberto
    pub fn open(data_dir: &str) -> Result<Self> {
        let path = format!("{data_dir}/burnclaim");
        let db = sled::open(&path).map_err(storage_err)?;
        Ok(Self { db })
    }

    fn write_claim(&self, claim: &BurnClaim, old_status: Option<ClaimStatus>) -> Result<()> {
        if let Some(old) = old_status {
            if old != claim.status {
                self.db
                    .remove(status_key(old, &claim.btc_txid, claim.vout))
                    .map_err(storage_err)?;
            }
        }

        let value = bincode::serialize(claim).map_err(codec_err)?;
        self.db
            .insert(claim_key(&claim.btc_txid, claim.vout), value)
            .map_err(storage_err)?;
        self.db
            .insert(
                id_key(&claim.claim_id),
                claim_key(&claim.btc_txid, claim.vout).to_vec(),
            )
            .map_err(storage_err)?;
        self.db
            .insert(
                status_key(claim.status, &claim.btc_txid, claim.vout),
                Vec::new(),
            )
            .map_err(storage_err)?;
        Ok(())
    }

    /// Busca um claim por `(btc_txid, vout)`
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn get(&self, btc_txid: &Hash256, vout: u32) -> Result<Option<BurnClaim>> {
        let Some(bytes) = self.db.get(claim_key(btc_txid, vout)).map_err(storage_err)? else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&bytes).map_err(codec_err)?))
    }

    /// Busca um claim pelo identificador derivado
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn get_by_id(&self, id: &Hash256) -> Result<Option<BurnClaim>> {
        let Some(key) = self.db.get(id_key(id)).map_err(storage_err)? else {
            return Ok(None);
        };
        let Some(bytes) = self.db.get(&key).map_err(storage_err)? else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&bytes).map_err(codec_err)?))
    }

    /// Valida uma queima observada e armazena o claim resultante.
    ///
    /// Exige payload bem formado com compromisso de valor correto, altura
    /// dentro da janela verificável, cabeçalho presente na melhor cadeia
    /// externa e prova merkle válida sob a raiz desse cabeçalho.
    ///
    /// # Errors
    ///
    /// Retorna erro somente em falha de armazenamento; rejeições de
    /// validação voltam em `ObserveStatus::Rejected`
    pub fn observe(&mut self, spv: &BtcSpvStore, burn: &ObservedBurn) -> Result<ObserveStatus> {
        if burn.vout > BURN_SCAN_VOUT_MAX {
            return Ok(ObserveStatus::Rejected(ClaimRejection::VoutOutOfRange));
        }

        let Ok(payload) = BurnPayload::decode(&burn.payload) else {
            return Ok(ObserveStatus::Rejected(ClaimRejection::BadPayload));
        };

        if burn.value_sats <= 0 || payload.amount_sats != burn.value_sats as u64 {
            return Ok(ObserveStatus::Rejected(ClaimRejection::AmountMismatch));
        }

        if burn.btc_block_height < spv.min_supported_height() {
            return Ok(ObserveStatus::Rejected(ClaimRejection::BelowMinSupported));
        }

        // Cabeçalho da melhor cadeia na altura da queima
        let Some(header) = spv.get_header_at_height(burn.btc_block_height)? else {
            return Ok(ObserveStatus::Rejected(ClaimRejection::HeaderNotFound));
        };

        if !self.verify_inclusion(spv, &header, burn) {
            return Ok(ObserveStatus::Rejected(ClaimRejection::BadProof));
        }

        let old_status = match self.get(&burn.btc_txid, burn.vout)? {
            Some(existing) if existing.status == ClaimStatus::Finalized => {
                return Ok(ObserveStatus::Rejected(ClaimRejection::AlreadyFinalized));
            }
            Some(existing) => Some(existing.status),
            None => None,
        };

        let confirmations = spv.tip_height().saturating_sub(burn.btc_block_height) + 1;
        let status = if confirmations >= CONFIRMATIONS_REQUIRED {
            ClaimStatus::Mintable
        } else {
            ClaimStatus::Pending
        };

        let claim = BurnClaim {
            claim_id: claim_id(&burn.btc_txid, burn.vout),
            btc_txid: burn.btc_txid,
            btc_block_height: burn.btc_block_height,
            btc_block_hash: header.hash,
            vout: burn.vout,
            amount_sats: burn.value_sats,
            op_return_payload: burn.payload.clone(),
            destination: payload.destination.to_vec(),
            status,
            confirmations_at_seen: confirmations,
            finalized_height: None,
        };
        self.write_claim(&claim, old_status)?;

        info!(
            txid = %burn.btc_txid,
            vout = burn.vout,
            height = burn.btc_block_height,
            sats = burn.value_sats,
            status = status.as_str(),
            "burn claim observed"
        );

        Ok(match status {
            ClaimStatus::Mintable => ObserveStatus::Mintable,
            _ => ObserveStatus::Pending,
        })
    }

    fn verify_inclusion(
        &self,
        spv: &BtcSpvStore,
        header: &BtcHeaderIndex,
        burn: &ObservedBurn,
    ) -> bool {
        if header.header.is_null() {
            return false;
        }
        spv.verify_merkle_proof(
            &burn.btc_txid,
            &header.header.merkle_root,
            &burn.proof.merkle_path,
            burn.proof.tx_index,
        )
    }

    /// Promove claims `pending` que atingiram a profundidade exigida.
    ///
    /// Retorna o número de claims promovidos.
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn promote_pending(&mut self, spv: &BtcSpvStore) -> Result<u32> {
        let mut promoted = 0;

        for mut claim in self.list_by_status(ClaimStatus::Pending)? {
            if !spv.is_in_best_chain(&claim.btc_block_hash)? {
                continue; // tratado por on_external_reorg
            }
            let confirmations = spv
                .tip_height()
                .saturating_sub(claim.btc_block_height)
                + 1;
            if confirmations >= CONFIRMATIONS_REQUIRED {
                claim.status = ClaimStatus::Mintable;
                self.write_claim(&claim, Some(ClaimStatus::Pending))?;
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    /// Reage a um reorg externo: claims cujo bloco saiu da melhor cadeia
    /// são demovidos para `rejected`.
    ///
    /// Retorna os `claim_id` demovidos.
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn on_external_reorg(
        &mut self,
        spv: &BtcSpvStore,
        old_tip: &Hash256,
        new_tip: &Hash256,
    ) -> Result<Vec<Hash256>> {
        let mut demoted = Vec::new();

        for status in [ClaimStatus::Pending, ClaimStatus::Mintable] {
            for mut claim in self.list_by_status(status)? {
                if spv.is_in_best_chain(&claim.btc_block_hash)? {
                    continue;
                }
                warn!(
                    claim = %claim.claim_id,
                    height = claim.btc_block_height,
                    "burn claim demoted by external reorg"
                );
                claim.status = ClaimStatus::Rejected;
                self.write_claim(&claim, Some(status))?;
                demoted.push(claim.claim_id);
            }
        }

        if !demoted.is_empty() {
            info!(
                count = demoted.len(),
                old_tip = %old_tip,
                new_tip = %new_tip,
                "external reorg demoted burn claims"
            );
        }

        Ok(demoted)
    }

    /// Marca um claim como consumido por um MINT_M0BTC nativo
    ///
    /// # Errors
    ///
    /// Retorna erro se o claim não existir ou não estiver `mintable`
    pub fn mark_finalized(&mut self, id: &Hash256, native_height: u32) -> Result<()> {
        let mut claim = self
            .get_by_id(id)?
            .ok_or_else(|| BlockchainError::StateNotFound(format!("claim {id}")))?;

        if claim.status != ClaimStatus::Mintable {
            return Err(BlockchainError::InvalidTransaction(format!(
                "claim {id} is {} (expected mintable)",
                claim.status.as_str()
            )));
        }

        let old = claim.status;
        claim.status = ClaimStatus::Finalized;
        claim.finalized_height = Some(native_height);
        self.write_claim(&claim, Some(old))
    }

    /// Reabre um claim finalizado (desconexão do bloco nativo que o consumiu)
    ///
    /// # Errors
    ///
    /// Retorna erro se o claim não existir ou não estiver `finalized`
    pub fn reopen_finalized(&mut self, id: &Hash256) -> Result<()> {
        let mut claim = self
            .get_by_id(id)?
            .ok_or_else(|| BlockchainError::StateNotFound(format!("claim {id}")))?;

        if claim.status != ClaimStatus::Finalized {
            return Err(BlockchainError::InvalidTransaction(format!(
                "claim {id} is {} (expected finalized)",
                claim.status.as_str()
            )));
        }

        let old = claim.status;
        claim.status = ClaimStatus::Mintable;
        claim.finalized_height = None;
        self.write_claim(&claim, Some(old))
    }

    /// Lista claims por status
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn list_by_status(&self, status: ClaimStatus) -> Result<Vec<BurnClaim>> {
        let prefix = [DB_STATUS, status.index_byte()];
        let mut claims = Vec::new();

        for entry in self.db.scan_prefix(prefix) {
            let (key, _) = entry.map_err(storage_err)?;
            let mut txid = [0u8; 32];
            txid.copy_from_slice(&key[2..34]);
            let vout = u32::from_le_bytes(key[34..38].try_into().map_err(|_| {
                BlockchainError::SerializationError("chave de status malformada".to_string())
            })?);

            if let Some(claim) = self.get(&Hash256::from_bytes(txid), vout)? {
                claims.push(claim);
            }
        }

        Ok(claims)
    }

    /// Grava o marcador de progresso do scanner externo
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn set_scan_progress(&mut self, height: u32, block_hash: &Hash256) -> Result<()> {
        self.db
            .insert([DB_SCAN_HEIGHT, 0], height.to_le_bytes().to_vec())
            .map_err(storage_err)?;
        self.db
            .insert([DB_SCAN_HASH, 0], block_hash.as_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(())
    }

    /// Lê o marcador de progresso do scanner (altura, hash)
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn scan_progress(&self) -> Result<Option<(u32, Hash256)>> {
        let Some(height_bytes) = self.db.get([DB_SCAN_HEIGHT, 0]).map_err(storage_err)? else {
            return Ok(None);
        };
        let Some(hash_bytes) = self.db.get([DB_SCAN_HASH, 0]).map_err(storage_err)? else {
            return Ok(None);
        };

        let height = u32::from_le_bytes(height_bytes.as_ref().try_into().map_err(|_| {
            BlockchainError::SerializationError("altura de scan malformada".to_string())
        })?);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hash_bytes);
        Ok(Some((height, Hash256::from_bytes(hash))))
    }

    /// Força a durabilidade das mutações aplicadas (barreira de commit)
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn sync(&self) -> Result<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    /// Estatísticas agregadas do índice
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn stats(&self) -> Result<ClaimStats> {
        let mut stats = ClaimStats::default();

        for status in [
            ClaimStatus::Pending,
            ClaimStatus::Mintable,
            ClaimStatus::Finalized,
            ClaimStatus::Rejected,
        ] {
            let claims = self.list_by_status(status)?;
            let count = claims.len() as u64;
            match status {
                ClaimStatus::Pending => stats.pending = count,
                ClaimStatus::Mintable => stats.mintable = count,
                ClaimStatus::Finalized => {
                    stats.finalized = count;
                    stats.minted_sats = claims.iter().map(|c| c.amount_sats).sum();
                }
                ClaimStatus::Rejected => stats.rejected = count,
            }
        }

        Ok(stats)
    }
}
