//! Estado da camada de settlement: vaults, receipts, snapshots e undo
//!
//! Modelo M0/M1 de ativo ao portador:
//! - M0 = UTXO nativo padrão
//! - M1 = Receipt UTXO, lastreado pelo pool comunal de vaults
//! - Vault = M0 travado com script push-TRUE; gastável apenas via UNLOCK
//!   (regra de consenso, não de script)
//!
//! Invariantes globais:
//! - A5 (conservação monetária): `M0_total(N) = M0_total(N-1) + queimas(N)`
//! - A6 (lastro integral): `M0_vaulted == M1_supply` ao fim de cada bloco

use serde::{Deserialize, Serialize};
use shared::{Amount, Hash256, OutPoint};

/// M0 travado lastreando a oferta de M1.
///
/// Criado por LOCK, destruído por UNLOCK, nunca mutado entre os dois.
/// Nenhum vínculo com receipt específico: todos os vaults lastreiam todo M1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    pub outpoint: OutPoint,
    pub amount: Amount,
    pub lock_height: u32,
}

/// Receipt M1 (ativo ao portador).
///
/// Criado por LOCK, transferível via TRANSFER_M1, queimado por UNLOCK para
/// reivindicar M0 de qualquer vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct M1Receipt {
    pub outpoint: OutPoint,
    pub amount: Amount,
    pub create_height: u32,
}

/// Snapshot do estado de settlement, persistido por bloco
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SettlementState {
    pub height: u32,
    pub block_hash: Hash256,
    /// M0 em vaults ativos (lastro do M1)
    pub m0_vaulted: Amount,
    /// Receipts M1 em circulação
    pub m1_supply: Amount,
    /// Informativo: fundos blindados (escalar opaco, ortogonal ao settlement)
    pub m0_shielded: Amount,
    /// M0 total em circulação (acumulado; A5)
    pub m0_total_supply: Amount,
    /// M0 mintado neste bloco a partir de queimas verificadas
    pub burnclaims_block: Amount,
}

impl SettlementState {
    /// Estado de gênese: tudo zerado, ancorado no hash do bloco gênese
    #[must_use]
    pub fn genesis(genesis_hash: Hash256) -> Self {
        Self {
            block_hash: genesis_hash,
            ..Self::default()
        }
    }

    /// Verifica as invariantes locais do snapshot.
    ///
    /// A6: `m0_vaulted == m1_supply`; valores nunca negativos.
    #[must_use]
    pub const fn check_invariants(&self) -> bool {
        if self.m0_vaulted < 0 || self.m1_supply < 0 || self.m0_total_supply < 0 {
            return false;
        }
        self.m0_vaulted == self.m1_supply
    }

    /// A5 contra o snapshot anterior: o único caminho que cria M0 é a
    /// queima verificada
    #[must_use]
    pub const fn check_a5(&self, prev: &Self) -> bool {
        self.m0_total_supply == prev.m0_total_supply + self.burnclaims_block
    }

    /// Delta de oferta esperado neste bloco (somente queimas)
    #[must_use]
    pub const fn a5_delta(&self) -> Amount {
        self.burnclaims_block
    }
}

/// Dados de undo de um UNLOCK, suficientes para recriar os índices num reorg.
///
/// Os outpoints criados pelo próprio UNLOCK (receipt de troco, taxa M1,
/// vault de lastro da taxa) são deriváveis do txid e da ordem canônica dos
/// outputs; só o troco de vault precisa de registro explícito.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UnlockUndoData {
    /// Receipts M1 consumidos (do vin)
    pub receipts_spent: Vec<M1Receipt>,
    /// Vaults consumidos (do vin)
    pub vaults_spent: Vec<VaultEntry>,
    /// M0 liberado (vout[0])
    pub m0_released: Amount,
    /// M1 queimado líquido (`M1_in - troco - taxa`)
    pub net_m1_burned: Amount,
    /// Número de receipts de troco criados
    pub change_receipts_created: u32,
    /// Outpoint do troco de vault, se criado
    pub vault_change_outpoint: Option<OutPoint>,
}

/// Dados de undo de um TRANSFER_M1 (transferência ou split)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUndoData {
    /// Receipt original consumido
    pub original_receipt: M1Receipt,
    /// Número de saídas M1 criadas (inclui a saída de taxa)
    pub num_m1_outputs: u32,
}
