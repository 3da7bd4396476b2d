//! Montagem do nó: ciclo de vida explícito dos três armazéns persistentes
//!
//! Os armazéns são serviços de processo com `open`/`shutdown` explícitos;
//! as alças passam por construção em vez de globais. Disciplina de
//! escritor único: cada armazém fica atrás do próprio `RwLock` e toda
//! operação alcançável de fora toma o lock do seu armazém na entrada.

use settlement_core::{Chain, SettlementError, SettlementResult};
use shared::{NodeConfig, Result};
use spv_core::{BtcSpvStore, BurnClaimStore};
use std::sync::RwLock;
use tracing::{info, warn};

/// Nó do núcleo de settlement: SPV externo, índice de claims e cadeia nativa
pub struct Node {
    pub config: NodeConfig,
    /// Armazém de cabeçalhos externos (C1) - lock próprio, independente do
    /// processamento de blocos nativos
    pub spv: RwLock<BtcSpvStore>,
    /// Índice de claims de queima (C3)
    pub claims: RwLock<BurnClaimStore>,
    /// Cadeia nativa com o banco de settlement (C4..C8)
    pub chain: RwLock<Chain>,
}

impl Node {
    /// Abre todos os armazéns e executa a reconciliação de arranque.
    ///
    /// Se o marcador all-committed divergir da ponta do índice de blocos
    /// (crash no meio da barreira de commit), o banco de settlement é
    /// reconstruído a partir da história canônica antes do nó subir.
    ///
    /// # Errors
    ///
    /// Retorna erro se algum armazenamento não puder ser aberto ou a
    /// reconstrução falhar
    pub fn open(config: NodeConfig) -> SettlementResult<Self> {
        info!(
            network = config.network.name(),
            datadir = %config.data_dir,
            "opening settlement node"
        );

        let spv = BtcSpvStore::open(&config.data_dir, config.network)
            .map_err(SettlementError::Chain)?;
        let claims =
            BurnClaimStore::open(&config.data_dir).map_err(SettlementError::Chain)?;
        let mut chain = Chain::open(&config.data_dir, config.network)?;

        // Reconciliação de arranque (C8)
        if chain.check_consistency()? {
            info!(height = chain.tip_height(), "settlement DB consistent with chain tip");
        } else {
            warn!("all-committed marker does not match chain tip; rebuilding settlement DB");
            chain.rebuild_from_chain()?;
        }

        Ok(Self {
            config,
            spv: RwLock::new(spv),
            claims: RwLock::new(claims),
            chain: RwLock::new(chain),
        })
    }

    /// Tick do scanner externo: promove claims que atingiram a profundidade
    /// exigida e demove os removidos por reorg externo.
    ///
    /// A ordem de aquisição dos locks (claims depois do SPV, nunca durante
    /// uma aplicação de bloco nativo) mantém as duas fontes de escrita do
    /// índice de claims serializadas.
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn tick_external(&self) -> Result<(u32, usize)> {
        let spv = self.spv.read().expect("spv lock");
        let mut claims = self.claims.write().expect("claims lock");

        let (tip_hash, tip_height, _) = spv.tip();
        let demoted = claims.on_external_reorg(&spv, &tip_hash, &tip_hash)?;
        let promoted = claims.promote_pending(&spv)?;
        claims.set_scan_progress(tip_height, &tip_hash)?;

        Ok((promoted, demoted.len()))
    }

    /// Fecha os armazéns garantindo durabilidade
    ///
    /// # Errors
    ///
    /// Retorna erro se alguma escrita final falhar
    pub fn shutdown(&self) -> Result<()> {
        info!("shutting down settlement node");
        self.spv.write().expect("spv lock").shutdown()?;
        self.claims.read().expect("claims lock").sync()?;
        self.chain
            .read()
            .expect("chain lock")
            .settlement_db()
            .sync()?;
        Ok(())
    }
}
