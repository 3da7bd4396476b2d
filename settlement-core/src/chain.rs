//! Cadeia nativa: conexão/desconexão de blocos, barreira de commit e
//! reconciliação por replay
//!
//! Para cada bloco aceito a barreira executa, nesta ordem: visão de moedas,
//! banco de settlement, índice de claims e então o marcador `A` com
//! semântica de fsync. Só depois disso a ponta do índice de blocos avança.
//! No arranque o marcador é comparado com a ponta; divergência dispara a
//! reconstrução do banco de settlement a partir da história canônica (o
//! armazém SPV e o índice de claims não são reconstruídos por esse caminho:
//! são dirigidos por entradas externas).

use crate::block::NativeBlock;
use crate::db::{SettlementBatch, SettlementDb};
use crate::error::{RejectionError, SettlementError, SettlementResult, DOS_PROTOCOL};
use crate::logic::{self, SettlementOverlay};
use crate::params::ConsensusParams;
use crate::producer::{self, MasternodeList, ProducerVerification};
use crate::state::SettlementState;
use crate::transaction;
use crate::utxo::UtxoSet;
use shared::{BlockchainError, Hash256, NetworkType, Result, Timestamp};
use spv_core::burnclaim::BurnClaimStore;
use tracing::{info, warn};

const BK_BLOCK: u8 = b'B';
const BK_TIP: u8 = b'T';
const CS_UTXO: u8 = b'U';

fn storage_err(e: sled::Error) -> BlockchainError {
    BlockchainError::StorageError(e.to_string())
}

fn codec_err(e: bincode::Error) -> BlockchainError {
    BlockchainError::SerializationError(e.to_string())
}

fn height_key(prefix: u8, height: u32) -> [u8; 5] {
    let mut key = [0u8; 5];
    key[0] = prefix;
    key[1..].copy_from_slice(&height.to_be_bytes());
    key
}

/// Armazém de blocos e da visão de moedas (`blocks/` e `chainstate/`)
pub struct ChainStore {
    blocks: sled::Db,
    state: sled::Db,
}

impl ChainStore {
    /// Abre (ou cria) os diretórios `blocks/` e `chainstate/`
    ///
    /// # Errors
    ///
    /// Retorna erro se algum armazenamento não puder ser aberto
    pub fn open(data_dir: &str) -> Result<Self> {
        let blocks = sled::open(format!("{data_dir}/blocks")).map_err(storage_err)?;
        let state = sled::open(format!("{data_dir}/chainstate")).map_err(storage_err)?;
        Ok(Self { blocks, state })
    }

    fn write_block(&mut self, block: &NativeBlock) -> Result<()> {
        let value = bincode::serialize(block).map_err(codec_err)?;
        self.blocks
            .insert(&height_key(BK_BLOCK, block.header.height)[..], value)
            .map_err(storage_err)?;
        Ok(())
    }

    fn read_block(&self, height: u32) -> Result<Option<NativeBlock>> {
        match self
            .blocks
            .get(height_key(BK_BLOCK, height))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(codec_err)?)),
            None => Ok(None),
        }
    }

    fn erase_block(&mut self, height: u32) -> Result<()> {
        self.blocks
            .remove(height_key(BK_BLOCK, height))
            .map_err(storage_err)?;
        Ok(())
    }

    fn write_tip(&mut self, height: u32, hash: &Hash256) -> Result<()> {
        let mut value = Vec::with_capacity(36);
        value.extend_from_slice(&height.to_le_bytes());
        value.extend_from_slice(hash.as_bytes());
        self.blocks.insert([BK_TIP], value).map_err(storage_err)?;
        self.blocks.flush().map_err(storage_err)?;
        Ok(())
    }

    fn read_tip(&self) -> Result<Option<(u32, Hash256)>> {
        match self.blocks.get([BK_TIP]).map_err(storage_err)? {
            Some(bytes) => {
                if bytes.len() != 36 {
                    return Err(BlockchainError::SerializationError(
                        "ponta de bloco malformada".to_string(),
                    ));
                }
                let height = u32::from_le_bytes(bytes[..4].try_into().unwrap());
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes[4..]);
                Ok(Some((height, Hash256::from_bytes(hash))))
            }
            None => Ok(None),
        }
    }

    /// Commit da visão de moedas na barreira (escrita síncrona)
    fn write_utxo_snapshot(&mut self, height: u32, utxo: &UtxoSet) -> Result<()> {
        let value = bincode::serialize(utxo).map_err(codec_err)?;
        self.state
            .insert(&height_key(CS_UTXO, height)[..], value)
            .map_err(storage_err)?;
        self.state.flush().map_err(storage_err)?;
        Ok(())
    }

    fn read_utxo_snapshot(&self, height: u32) -> Result<Option<UtxoSet>> {
        match self
            .state
            .get(height_key(CS_UTXO, height))
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(codec_err)?)),
            None => Ok(None),
        }
    }

    fn erase_utxo_snapshot(&mut self, height: u32) -> Result<()> {
        self.state
            .remove(height_key(CS_UTXO, height))
            .map_err(storage_err)?;
        Ok(())
    }
}

/// Cadeia nativa com o banco de settlement acoplado.
///
/// Único escritor: toda mutação passa por `&mut self`; o nó embrulha a
/// cadeia num `RwLock` para leitores concorrentes.
pub struct Chain {
    params: ConsensusParams,
    store: ChainStore,
    settlement: SettlementDb,
    utxo: UtxoSet,
    masternodes: MasternodeList,
    tip_height: u32,
    tip_hash: Hash256,
}

impl Chain {
    /// Abre a cadeia em `data_dir`, criando a gênese num diretório vazio
    ///
    /// # Errors
    ///
    /// Retorna erro se o armazenamento não puder ser aberto ou o estado em
    /// disco estiver ilegível
    pub fn open(data_dir: &str, network: NetworkType) -> SettlementResult<Self> {
        let params = ConsensusParams::for_network(network);
        let store = ChainStore::open(data_dir)?;
        let settlement = SettlementDb::open(data_dir)?;

        let mut chain = Self {
            params,
            store,
            settlement,
            utxo: UtxoSet::new(),
            masternodes: MasternodeList::new(),
            tip_height: 0,
            tip_hash: Hash256::zero(),
        };

        match chain.store.read_tip()? {
            Some((height, hash)) => {
                chain.tip_height = height;
                chain.tip_hash = hash;
                chain.utxo = chain
                    .store
                    .read_utxo_snapshot(height)?
                    .ok_or_else(|| {
                        BlockchainError::StateNotFound(format!("coin view @ {height}"))
                    })?;
            }
            None => chain.init_genesis()?,
        }

        info!(
            network = network.name(),
            height = chain.tip_height,
            tip = %chain.tip_hash,
            "native chain opened"
        );
        Ok(chain)
    }

    fn init_genesis(&mut self) -> SettlementResult<()> {
        let genesis = NativeBlock::genesis(&self.params)?;
        let hash = genesis.hash()?;

        self.store.write_block(&genesis)?;
        self.store.write_utxo_snapshot(0, &UtxoSet::new())?;

        let state = SettlementState::genesis(hash);
        self.settlement.write_state(&state)?;
        let mut batch = SettlementBatch::new();
        batch.write_best_block(&hash);
        self.settlement.apply_batch(batch)?;
        self.settlement.write_all_committed(&hash)?;

        self.store.write_tip(0, &hash)?;
        self.tip_height = 0;
        self.tip_hash = hash;

        info!(genesis = %hash, "settlement initialized at genesis");
        Ok(())
    }

    /// Parâmetros de consenso ativos
    #[must_use]
    pub const fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// Altura da ponta
    #[must_use]
    pub const fn tip_height(&self) -> u32 {
        self.tip_height
    }

    /// Hash da ponta
    #[must_use]
    pub const fn tip_hash(&self) -> Hash256 {
        self.tip_hash
    }

    /// Timestamp do bloco da ponta
    ///
    /// # Errors
    ///
    /// Retorna erro se o bloco da ponta estiver ausente
    pub fn tip_time(&self) -> SettlementResult<Timestamp> {
        let block = self.store.read_block(self.tip_height)?.ok_or_else(|| {
            BlockchainError::StateNotFound(format!("block @ {}", self.tip_height))
        })?;
        Ok(block.header.time)
    }

    /// Acesso de leitura ao banco de settlement
    #[must_use]
    pub const fn settlement_db(&self) -> &SettlementDb {
        &self.settlement
    }

    /// Acesso de escrita ao banco de settlement (manutenção e testes)
    pub fn settlement_db_mut(&mut self) -> &mut SettlementDb {
        &mut self.settlement
    }

    /// Visão de moedas corrente
    #[must_use]
    pub const fn utxo_set(&self) -> &UtxoSet {
        &self.utxo
    }

    /// Lista de masternodes corrente
    #[must_use]
    pub const fn masternodes(&self) -> &MasternodeList {
        &self.masternodes
    }

    /// Instala a lista determinística de masternodes (mantida pela camada
    /// de registro, externa a este núcleo)
    pub fn set_masternode_list(&mut self, list: MasternodeList) {
        self.masternodes = list;
    }

    /// Lê um bloco da história canônica
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn block_at(&self, height: u32) -> SettlementResult<Option<NativeBlock>> {
        Ok(self.store.read_block(height)?)
    }

    /// Verifica se o marcador all-committed coincide com a ponta.
    ///
    /// `false` significa que um crash interrompeu a barreira e o banco de
    /// settlement precisa ser reconstruído.
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn check_consistency(&self) -> SettlementResult<bool> {
        let marker = self.settlement.read_all_committed()?;
        Ok(marker == Some(self.tip_hash))
    }

    /// Conecta um bloco à ponta: verifica o produtor, aplica as transações
    /// e executa a barreira de commit.
    ///
    /// Devolve a verificação do produtor (com os masternodes pulados, para
    /// penalidade de PoSe).
    ///
    /// # Errors
    ///
    /// Rejeição de consenso (bloco descartado, nada é gravado) ou falha de
    /// armazenamento
    pub fn connect_block(
        &mut self,
        block: &NativeBlock,
        claims: &mut BurnClaimStore,
        now: Timestamp,
    ) -> SettlementResult<ProducerVerification> {
        let block_hash = block.hash()?;

        // Vínculo com a ponta
        if block.header.height != self.tip_height + 1 {
            return Err(RejectionError::with_detail(
                "bad-blk-height",
                DOS_PROTOCOL,
                format!(
                    "got {} expected {}",
                    block.header.height,
                    self.tip_height + 1
                ),
            )
            .into());
        }
        if block.header.prev_hash != self.tip_hash {
            return Err(RejectionError::new("bad-prevblock", DOS_PROTOCOL).into());
        }
        block
            .validate_basic()
            .map_err(|e| RejectionError::with_detail("bad-txnmrklroot", DOS_PROTOCOL, e.to_string()))?;

        // Assinatura do produtor esperado (mesma derivação de slot usada
        // pelo escalonador, aplicada ao time do próprio bloco)
        let prev_time = self.tip_time()?;
        let verification = producer::verify_block_producer(
            &self.params,
            &self.masternodes,
            &self.tip_hash,
            prev_time,
            block.header.height,
            block.header.time,
            &block_hash,
            &block.producer_sig,
            now,
        )?;

        // Pré-checagens compartilhadas de toda transação
        for tx in &block.txs {
            transaction::check_transaction(tx, &self.params)?;
        }

        // Transições de settlement sobre o overlay do bloco
        let prev_state = self
            .settlement
            .read_state_at(self.tip_height)?
            .ok_or_else(|| {
                BlockchainError::StateNotFound(format!("settlement state @ {}", self.tip_height))
            })?;

        let mut overlay = SettlementOverlay::new(&self.settlement);
        let mut working_utxo = self.utxo.clone();
        let result = logic::process_special_txs(
            &block.txs,
            block.header.height,
            block_hash,
            &prev_state,
            &mut overlay,
            &mut working_utxo,
            Some(&*claims),
            &self.params,
        )?;
        overlay.batch_mut().write_state(&result.state)?;
        overlay.batch_mut().write_best_block(&block_hash);
        let batch = overlay.into_batch();

        // Barreira de commit: visão de moedas → C4 → C3 → marcador síncrono.
        // O armazém SPV (C1) é serializado pelo próprio lock e independe do
        // processamento de blocos nativos.
        self.store
            .write_utxo_snapshot(block.header.height, &working_utxo)?;
        self.settlement.apply_batch(batch)?;
        self.settlement.sync()?;
        for id in &result.finalized_claims {
            claims.mark_finalized(id, block.header.height)?;
        }
        claims.sync()?;
        self.settlement.write_all_committed(&block_hash)?;

        // Só agora a ponta do índice de blocos avança
        self.store.write_block(block)?;
        self.store.write_tip(block.header.height, &block_hash)?;
        self.utxo = working_utxo;
        self.tip_height = block.header.height;
        self.tip_hash = block_hash;

        info!(
            height = self.tip_height,
            hash = %self.tip_hash,
            txs = block.txs.len(),
            producer = %verification.producer,
            slot = verification.producer_index,
            "block connected"
        );
        Ok(verification)
    }

    /// Desconecta o bloco da ponta (reorg): desfaz as transações em ordem
    /// reversa pelos registros de undo e restaura o snapshot anterior como
    /// estado mais recente.
    ///
    /// # Errors
    ///
    /// Retorna erro se registros de undo ou snapshots estiverem ausentes
    pub fn disconnect_block(
        &mut self,
        claims: &mut BurnClaimStore,
    ) -> SettlementResult<NativeBlock> {
        if self.tip_height == 0 {
            return Err(SettlementError::Chain(BlockchainError::InvalidBlock(
                "cannot disconnect genesis".to_string(),
            )));
        }

        let block = self.store.read_block(self.tip_height)?.ok_or_else(|| {
            BlockchainError::StateNotFound(format!("block @ {}", self.tip_height))
        })?;
        let prev_height = self.tip_height - 1;
        let prev_block = self
            .store
            .read_block(prev_height)?
            .ok_or_else(|| BlockchainError::StateNotFound(format!("block @ {prev_height}")))?;
        let prev_hash = prev_block.hash()?;

        if self.settlement.read_state_at(prev_height)?.is_none() {
            return Err(SettlementError::Chain(BlockchainError::StateNotFound(
                format!("settlement state @ {prev_height}"),
            )));
        }
        let restored_utxo = self
            .store
            .read_utxo_snapshot(prev_height)?
            .ok_or_else(|| {
                BlockchainError::StateNotFound(format!("coin view @ {prev_height}"))
            })?;

        let mut overlay = SettlementOverlay::new(&self.settlement);
        logic::undo_special_txs(&block.txs, &self.settlement, &mut overlay, claims)?;
        overlay.batch_mut().erase_state(self.tip_height);
        overlay.batch_mut().write_best_block(&prev_hash);
        let batch = overlay.into_batch();

        self.settlement.apply_batch(batch)?;
        self.settlement.sync()?;
        claims.sync()?;
        self.settlement.write_all_committed(&prev_hash)?;

        self.store.erase_block(self.tip_height)?;
        self.store.erase_utxo_snapshot(self.tip_height)?;
        self.store.write_tip(prev_height, &prev_hash)?;
        self.utxo = restored_utxo;
        self.tip_height = prev_height;
        self.tip_hash = prev_hash;

        warn!(
            height = self.tip_height + 1,
            new_tip = %self.tip_hash,
            "block disconnected"
        );
        Ok(block)
    }

    /// Reconstrói o banco de settlement a partir da história canônica:
    /// limpa tudo e reaplica as transações de cada bloco de 1 até a ponta.
    ///
    /// O índice de claims não é tocado (é dirigido por entradas externas);
    /// os MINTs replayados creditam a oferta a partir das saídas gravadas.
    ///
    /// # Errors
    ///
    /// Retorna erro se a história em disco estiver incompleta
    pub fn rebuild_from_chain(&mut self) -> SettlementResult<()> {
        warn!(
            tip = self.tip_height,
            "settlement DB drift detected; rebuilding from canonical chain"
        );

        self.settlement.wipe_for_rebuild()?;

        let genesis = self
            .store
            .read_block(0)?
            .ok_or_else(|| BlockchainError::StateNotFound("genesis block".to_string()))?;
        let genesis_hash = genesis.hash()?;
        let mut state = SettlementState::genesis(genesis_hash);
        self.settlement.write_state(&state)?;

        let mut coins = UtxoSet::new();
        let mut best = genesis_hash;

        for height in 1..=self.tip_height {
            let block = self.store.read_block(height)?.ok_or_else(|| {
                BlockchainError::StateNotFound(format!("block @ {height}"))
            })?;
            let block_hash = block.hash()?;

            let mut overlay = SettlementOverlay::new(&self.settlement);
            let result = logic::process_special_txs(
                &block.txs,
                height,
                block_hash,
                &state,
                &mut overlay,
                &mut coins,
                None,
                &self.params,
            )?;
            overlay.batch_mut().write_state(&result.state)?;
            overlay.batch_mut().write_best_block(&block_hash);
            let batch = overlay.into_batch();
            self.settlement.apply_batch(batch)?;

            state = result.state;
            best = block_hash;
        }

        if self.tip_height == 0 {
            let mut batch = SettlementBatch::new();
            batch.write_best_block(&best);
            self.settlement.apply_batch(batch)?;
        }

        self.settlement.sync()?;
        self.settlement.write_all_committed(&self.tip_hash)?;
        self.utxo = coins;

        info!(
            height = self.tip_height,
            m0_total = state.m0_total_supply,
            "settlement DB rebuilt from chain"
        );
        Ok(())
    }
}
