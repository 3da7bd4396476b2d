//! Tipos compartilhados entre módulos do núcleo Bathron

use serde::{Deserialize, Serialize};

/// Alias para identificador único de transação
pub type TxId = crate::Hash256;

/// Alias para identificador único de bloco
pub type BlockId = crate::Hash256;

/// Alias para valor monetário em sats (inteiro COM sinal, modelo 1 M0 = 1 sat)
pub type Amount = i64;

/// Alias para timestamp Unix
pub type Timestamp = i64;

/// Alias para altura de bloco (nativa ou externa)
pub type BlockHeight = u32;

/// Alias para índice de saída de transação
pub type OutputIndex = u32;

/// Época do testnet - incrementada a cada reset de gênese.
///
/// Entra no último byte do magic de rede, particionando de forma limpa
/// nós de épocas antigas e novas.
pub const TESTNET_EPOCH: u8 = 2;

/// Referência a uma saída de transação (UTXO)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OutPoint {
    /// Hash da transação que contém a saída
    pub txid: TxId,
    /// Índice da saída na transação
    pub vout: OutputIndex,
}

impl OutPoint {
    /// Creates a new transaction output reference
    #[must_use]
    pub const fn new(txid: TxId, vout: OutputIndex) -> Self {
        Self { txid, vout }
    }

    /// Verifica se o outpoint é nulo (txid zero, usado como sentinela)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == 0
    }

    /// Chave binária estável `txid || vout_le` para índices em disco
    #[must_use]
    pub fn to_key_bytes(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(36);
        key.extend_from_slice(self.txid.as_bytes());
        key.extend_from_slice(&self.vout.to_le_bytes());
        key
    }
}

/// Network configurations for different environments
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    /// Main production network
    Mainnet,
    /// Test network
    #[default]
    Testnet,
    /// Regression network for testing
    Regtest,
}

impl NetworkType {
    /// Magic de 4 bytes do início de mensagem da rede nativa.
    ///
    /// O último byte do testnet incorpora `TESTNET_EPOCH`, de modo que
    /// incrementar a época desconecta nós da época anterior.
    #[must_use]
    pub const fn message_start(&self) -> [u8; 4] {
        match self {
            Self::Mainnet => [0x90, 0xc4, 0xfd, 0xe9],
            Self::Testnet => [0xfa, 0xbf, 0xb5, 0xda + TESTNET_EPOCH],
            Self::Regtest => [0xa1, 0xcf, 0x7e, 0xac],
        }
    }

    /// Nome curto da rede para logs e RPC
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }
}

/// Configurações globais do nó
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Tipo de rede
    pub network: NetworkType,
    /// Diretório de dados do nó
    pub data_dir: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Testnet,
            data_dir: "./data".to_string(),
        }
    }
}
