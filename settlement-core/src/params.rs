//! Parâmetros de consenso da rede nativa

use serde::{Deserialize, Serialize};
use shared::{Amount, NetworkType, Timestamp};

/// Parâmetros de consenso da cadeia nativa.
///
/// Todos os recursos são ativos desde a gênese: não existe maquinário de
/// ativação por altura.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Rede a que os parâmetros pertencem
    pub network: NetworkType,
    /// Espaçamento alvo entre blocos (segundos)
    pub target_spacing: Timestamp,
    /// Janela do produtor primário antes do primeiro fallback (segundos)
    pub leader_timeout_seconds: Timestamp,
    /// Largura de cada janela de fallback subsequente (segundos)
    pub fallback_window_seconds: Timestamp,
    /// Fase de bootstrap: até esta altura o slot é forçado a 0 e
    /// masternodes não confirmados permanecem elegíveis
    pub dmm_bootstrap_height: u32,
    /// Teto de slots de fallback (grampeado)
    pub max_fallback_slots: i64,
    /// Tolerância máxima de timestamp futuro num bloco nativo (segundos)
    pub max_future_block_time: Timestamp,
    /// Valor monetário máximo (sats)
    pub max_money: Amount,
    /// Tamanho máximo de transação serializada (bytes)
    pub max_tx_size: usize,
    /// Piso absoluto da taxa de settlement (sats)
    pub min_settlement_fee: Amount,
    /// Timestamp da gênese nativa
    pub genesis_time: Timestamp,
}

/// Teto global de slots de fallback (1 hora de janelas)
pub const MAX_FALLBACK_SLOTS: i64 = 360;

impl ConsensusParams {
    /// Parâmetros da rede indicada
    #[must_use]
    pub fn for_network(network: NetworkType) -> Self {
        match network {
            NetworkType::Mainnet => Self {
                network,
                target_spacing: 60,
                leader_timeout_seconds: 45,
                fallback_window_seconds: 15,
                dmm_bootstrap_height: 10,
                max_fallback_slots: MAX_FALLBACK_SLOTS,
                max_future_block_time: 120,
                max_money: 2_100_000_000_000_000,
                max_tx_size: 100_000,
                min_settlement_fee: 100,
                genesis_time: 1_735_689_600, // 2025-01-01
            },
            NetworkType::Testnet => Self {
                network,
                target_spacing: 60,
                leader_timeout_seconds: 45,
                fallback_window_seconds: 15,
                dmm_bootstrap_height: 250,
                max_fallback_slots: MAX_FALLBACK_SLOTS,
                max_future_block_time: 120,
                max_money: 2_100_000_000_000_000,
                max_tx_size: 100_000,
                min_settlement_fee: 100,
                genesis_time: 1_735_689_600,
            },
            NetworkType::Regtest => Self {
                network,
                target_spacing: 60,
                leader_timeout_seconds: 5,
                fallback_window_seconds: 2,
                dmm_bootstrap_height: 2,
                max_fallback_slots: MAX_FALLBACK_SLOTS,
                max_future_block_time: 120,
                max_money: 2_100_000_000_000_000,
                max_tx_size: 100_000,
                min_settlement_fee: 100,
                genesis_time: 1_735_689_600,
            },
        }
    }

    /// Piso de taxa para uma transação de settlement (modelo 0,5 sat/byte)
    #[must_use]
    pub fn min_fee(&self, tx_size: usize) -> Amount {
        self.min_settlement_fee.max((tx_size / 2) as Amount)
    }

    /// Verifica se um valor está dentro da faixa monetária válida
    #[must_use]
    pub const fn money_range(&self, value: Amount) -> bool {
        value >= 0 && value <= self.max_money
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_timing_parameters() {
        let mainnet = ConsensusParams::for_network(NetworkType::Mainnet);
        assert_eq!(mainnet.target_spacing, 60);
        assert_eq!(mainnet.leader_timeout_seconds, 45);
        assert_eq!(mainnet.fallback_window_seconds, 15);
        assert_eq!(mainnet.dmm_bootstrap_height, 10);

        let regtest = ConsensusParams::for_network(NetworkType::Regtest);
        assert_eq!(regtest.leader_timeout_seconds, 5);
        assert_eq!(regtest.dmm_bootstrap_height, 2);
    }

    #[test]
    fn test_min_fee_floor_and_size_scaling() {
        let params = ConsensusParams::for_network(NetworkType::Regtest);

        // Transações pequenas pagam o piso
        assert_eq!(params.min_fee(100), 100);
        // Transações grandes pagam 0,5 sat/byte
        assert_eq!(params.min_fee(1000), 500);
    }

    #[test]
    fn test_money_range() {
        let params = ConsensusParams::for_network(NetworkType::Mainnet);
        assert!(params.money_range(0));
        assert!(params.money_range(params.max_money));
        assert!(!params.money_range(-1));
        assert!(!params.money_range(params.max_money + 1));
    }
}
