//! Banco de dados da camada de settlement
//!
//! Classificação de UTXOs dirigida pelo banco:
//! - `is_vault(outpoint)` / `is_m1_receipt(outpoint)` - presença nos índices
//! - `is_m0_standard(outpoint)` - definicional: ausente de ambos
//!
//! Layout de chaves (um byte de prefixo por categoria, ordenável em binário):
//! `V|outpoint → VaultEntry`, `R|outpoint → M1Receipt`,
//! `G|altura → SettlementState`, `U|txid → UnlockUndoData`,
//! `T|txid → TransferUndoData`, `B → hash do melhor bloco`,
//! `A → marcador all-committed`, `H|0`/`Z|0` → progresso do burnscan.

use crate::state::{M1Receipt, SettlementState, TransferUndoData, UnlockUndoData, VaultEntry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::{Amount, BlockchainError, Hash256, OutPoint, Result};

const DB_VAULT: u8 = b'V';
const DB_RECEIPT: u8 = b'R';
const DB_STATE: u8 = b'G';
const DB_UNLOCK_UNDO: u8 = b'U';
const DB_TRANSFER_UNDO: u8 = b'T';
const DB_BEST_BLOCK: u8 = b'B';
const DB_ALL_COMMITTED: u8 = b'A';
const DB_BURNSCAN_HEIGHT: u8 = b'H';
const DB_BURNSCAN_HASH: u8 = b'Z';

fn storage_err(e: sled::Error) -> BlockchainError {
    BlockchainError::StorageError(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| BlockchainError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| BlockchainError::SerializationError(e.to_string()))
}

fn outpoint_key(prefix: u8, outpoint: &OutPoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(37);
    key.push(prefix);
    key.extend_from_slice(&outpoint.to_key_bytes());
    key
}

fn txid_key(prefix: u8, txid: &Hash256) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = prefix;
    key[1..].copy_from_slice(txid.as_bytes());
    key
}

fn state_key(height: u32) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0] = DB_STATE;
    key[1..].copy_from_slice(&height.to_be_bytes());
    key
}

/// Lote de mutações de settlement, aplicado atomicamente por bloco.
///
/// Toda mutação dirigida por um bloco nativo passa por exatamente um lote.
#[derive(Default)]
pub struct SettlementBatch {
    batch: sled::Batch,
}

impl SettlementBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grava um vault no lote
    ///
    /// # Errors
    ///
    /// Retorna erro de serialização
    pub fn write_vault(&mut self, vault: &VaultEntry) -> Result<()> {
        self.batch
            .insert(outpoint_key(DB_VAULT, &vault.outpoint), encode(vault)?);
        Ok(())
    }

    pub fn erase_vault(&mut self, outpoint: &OutPoint) {
        self.batch.remove(outpoint_key(DB_VAULT, outpoint));
    }

    /// Grava um receipt no lote
    ///
    /// # Errors
    ///
    /// Retorna erro de serialização
    pub fn write_receipt(&mut self, receipt: &M1Receipt) -> Result<()> {
        self.batch
            .insert(outpoint_key(DB_RECEIPT, &receipt.outpoint), encode(receipt)?);
        Ok(())
    }

    pub fn erase_receipt(&mut self, outpoint: &OutPoint) {
        self.batch.remove(outpoint_key(DB_RECEIPT, outpoint));
    }

    /// Grava um snapshot de estado no lote
    ///
    /// # Errors
    ///
    /// Retorna erro de serialização
    pub fn write_state(&mut self, state: &SettlementState) -> Result<()> {
        self.batch.insert(&state_key(state.height)[..], encode(state)?);
        Ok(())
    }

    pub fn erase_state(&mut self, height: u32) {
        self.batch.remove(&state_key(height)[..]);
    }

    /// Grava dados de undo de unlock no lote
    ///
    /// # Errors
    ///
    /// Retorna erro de serialização
    pub fn write_unlock_undo(&mut self, txid: &Hash256, undo: &UnlockUndoData) -> Result<()> {
        self.batch
            .insert(&txid_key(DB_UNLOCK_UNDO, txid)[..], encode(undo)?);
        Ok(())
    }

    pub fn erase_unlock_undo(&mut self, txid: &Hash256) {
        self.batch.remove(&txid_key(DB_UNLOCK_UNDO, txid)[..]);
    }

    /// Grava dados de undo de transfer no lote
    ///
    /// # Errors
    ///
    /// Retorna erro de serialização
    pub fn write_transfer_undo(&mut self, txid: &Hash256, undo: &TransferUndoData) -> Result<()> {
        self.batch
            .insert(&txid_key(DB_TRANSFER_UNDO, txid)[..], encode(undo)?);
        Ok(())
    }

    pub fn erase_transfer_undo(&mut self, txid: &Hash256) {
        self.batch.remove(&txid_key(DB_TRANSFER_UNDO, txid)[..]);
    }

    /// Grava o hash do melhor bloco refletido pelo banco
    pub fn write_best_block(&mut self, block_hash: &Hash256) {
        self.batch
            .insert(&[DB_BEST_BLOCK][..], block_hash.as_bytes().to_vec());
    }

    fn into_inner(self) -> sled::Batch {
        self.batch
    }
}

/// Banco de settlement: índices tipados de Vault/Receipt, snapshots por
/// altura e registros de undo.
///
/// Único escritor; leitores concorrentes via embrulho externo em `RwLock`.
pub struct SettlementDb {
    db: sled::Db,
}

impl SettlementDb {
    /// Abre (ou cria) o banco em `<data_dir>/settlement`
    ///
    /// # Errors
    ///
    /// Retorna erro se o armazenamento não puder ser aberto
    pub fn open(data_dir: &str) -> Result<Self> {
        let path = format!("{data_dir}/settlement");
        let db = sled::open(&path).map_err(storage_err)?;
        Ok(Self { db })
    }

    /// Aplica um lote de mutações atomicamente
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn apply_batch(&mut self, batch: SettlementBatch) -> Result<()> {
        self.db.apply_batch(batch.into_inner()).map_err(storage_err)
    }

    /// Força a durabilidade de tudo que foi aplicado
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn sync(&self) -> Result<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ---- Vaults ----

    /// Grava um vault diretamente (fora de lote; uso em rebuild e testes)
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn write_vault(&mut self, vault: &VaultEntry) -> Result<()> {
        self.db
            .insert(outpoint_key(DB_VAULT, &vault.outpoint), encode(vault)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Lê um vault
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn read_vault(&self, outpoint: &OutPoint) -> Result<Option<VaultEntry>> {
        match self.db.get(outpoint_key(DB_VAULT, outpoint)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Verifica se um outpoint é vault
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn is_vault(&self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self
            .db
            .contains_key(outpoint_key(DB_VAULT, outpoint))
            .map_err(storage_err)?)
    }

    /// Itera sobre todos os vaults; o callback devolve `false` para parar
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento ou desserialização
    pub fn for_each_vault<F>(&self, mut func: F) -> Result<()>
    where
        F: FnMut(&VaultEntry) -> bool,
    {
        for entry in self.db.scan_prefix([DB_VAULT]) {
            let (_, value) = entry.map_err(storage_err)?;
            let vault: VaultEntry = decode(&value)?;
            if !func(&vault) {
                break;
            }
        }
        Ok(())
    }

    /// Encontra vaults que cobrem um valor de M0 (modelo ao portador).
    ///
    /// Prefere um casamento exato; senão seleciona o menor conjunto que
    /// cobre, com ordenação determinística por `(valor ASC, outpoint)`.
    ///
    /// # Errors
    ///
    /// Retorna erro se o pool de vaults não cobrir o valor
    pub fn find_vaults_for_amount(&self, amount: Amount) -> Result<Vec<VaultEntry>> {
        let mut all: Vec<VaultEntry> = Vec::new();
        self.for_each_vault(|vault| {
            all.push(vault.clone());
            true
        })?;
        all.sort_by(|a, b| (a.amount, a.outpoint).cmp(&(b.amount, b.outpoint)));

        // Casamento exato primeiro
        if let Some(exact) = all.iter().find(|v| v.amount == amount) {
            return Ok(vec![exact.clone()]);
        }

        // Menor conjunto que cobre: maiores primeiro
        let mut selected = Vec::new();
        let mut total: Amount = 0;
        for vault in all.iter().rev() {
            selected.push(vault.clone());
            total = total.saturating_add(vault.amount);
            if total >= amount {
                return Ok(selected);
            }
        }

        Err(BlockchainError::InsufficientFunds)
    }

    // ---- Receipts ----

    /// Grava um receipt diretamente (fora de lote; uso em rebuild e testes)
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn write_receipt(&mut self, receipt: &M1Receipt) -> Result<()> {
        self.db
            .insert(outpoint_key(DB_RECEIPT, &receipt.outpoint), encode(receipt)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Lê um receipt
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn read_receipt(&self, outpoint: &OutPoint) -> Result<Option<M1Receipt>> {
        match self
            .db
            .get(outpoint_key(DB_RECEIPT, outpoint))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Verifica se um outpoint é receipt M1
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn is_m1_receipt(&self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self
            .db
            .contains_key(outpoint_key(DB_RECEIPT, outpoint))
            .map_err(storage_err)?)
    }

    /// Soma de todos os receipts registrados (deve igualar `m1_supply`)
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn total_receipt_amount(&self) -> Result<Amount> {
        let mut total: Amount = 0;
        for entry in self.db.scan_prefix([DB_RECEIPT]) {
            let (_, value) = entry.map_err(storage_err)?;
            let receipt: M1Receipt = decode(&value)?;
            total = total.saturating_add(receipt.amount);
        }
        Ok(total)
    }

    /// M0 padrão é definicional: não está em nenhum índice de settlement
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn is_m0_standard(&self, outpoint: &OutPoint) -> Result<bool> {
        Ok(!self.is_vault(outpoint)? && !self.is_m1_receipt(outpoint)?)
    }

    // ---- Snapshots de estado ----

    /// Grava um snapshot diretamente
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn write_state(&mut self, state: &SettlementState) -> Result<()> {
        self.db
            .insert(&state_key(state.height)[..], encode(state)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Lê o snapshot numa altura
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn read_state_at(&self, height: u32) -> Result<Option<SettlementState>> {
        match self.db.get(state_key(height)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Lê o snapshot mais recente (maior altura gravada)
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn read_latest_state(&self) -> Result<Option<SettlementState>> {
        match self.db.scan_prefix([DB_STATE]).last() {
            Some(entry) => {
                let (_, value) = entry.map_err(storage_err)?;
                Ok(Some(decode(&value)?))
            }
            None => Ok(None),
        }
    }

    // ---- Registros de undo ----

    /// Lê o undo de um unlock
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn read_unlock_undo(&self, txid: &Hash256) -> Result<Option<UnlockUndoData>> {
        match self
            .db
            .get(txid_key(DB_UNLOCK_UNDO, txid))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Lê o undo de um transfer
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn read_transfer_undo(&self, txid: &Hash256) -> Result<Option<TransferUndoData>> {
        match self
            .db
            .get(txid_key(DB_TRANSFER_UNDO, txid))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ---- Consistência entre bancos ----

    /// Lê o hash do melhor bloco refletido pelo banco
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn read_best_block(&self) -> Result<Option<Hash256>> {
        match self.db.get([DB_BEST_BLOCK]).map_err(storage_err)? {
            Some(bytes) => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(Hash256::from_bytes(hash)))
            }
            None => Ok(None),
        }
    }

    /// Grava o marcador all-committed com semântica de fsync.
    ///
    /// Escrito DEPOIS que todos os bancos confirmaram o bloco; no próximo
    /// arranque a divergência entre marcador e ponta dispara o rebuild.
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn write_all_committed(&mut self, block_hash: &Hash256) -> Result<()> {
        self.db
            .insert([DB_ALL_COMMITTED], block_hash.as_bytes().to_vec())
            .map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    /// Lê o marcador all-committed
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn read_all_committed(&self) -> Result<Option<Hash256>> {
        match self.db.get([DB_ALL_COMMITTED]).map_err(storage_err)? {
            Some(bytes) => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(Hash256::from_bytes(hash)))
            }
            None => Ok(None),
        }
    }

    // ---- Progresso do burnscan ----

    /// Grava o progresso do scanner de queimas
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn write_burnscan_progress(&mut self, height: u32, hash: &Hash256) -> Result<()> {
        self.db
            .insert([DB_BURNSCAN_HEIGHT, 0], height.to_le_bytes().to_vec())
            .map_err(storage_err)?;
        self.db
            .insert([DB_BURNSCAN_HASH, 0], hash.as_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(())
    }

    /// Lê o progresso do scanner de queimas
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn read_burnscan_progress(&self) -> Result<Option<(u32, Hash256)>> {
        let Some(height_bytes) = self.db.get([DB_BURNSCAN_HEIGHT, 0]).map_err(storage_err)? else {
            return Ok(None);
        };
        let Some(hash_bytes) = self.db.get([DB_BURNSCAN_HASH, 0]).map_err(storage_err)? else {
            return Ok(None);
        };
        let height = u32::from_le_bytes(height_bytes.as_ref().try_into().map_err(|_| {
            BlockchainError::SerializationError("altura de burnscan malformada".to_string())
        })?);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hash_bytes);
        Ok(Some((height, Hash256::from_bytes(hash))))
    }

    /// Limpa o banco inteiro para reconstrução a partir da cadeia
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn wipe_for_rebuild(&mut self) -> Result<()> {
        self.db.clear().map_err(storage_err)?;
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}
