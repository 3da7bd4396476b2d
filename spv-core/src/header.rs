//! Cabeçalhos da cadeia externa (formato de 80 bytes estilo Bitcoin)

use serde::{Deserialize, Serialize};
use shared::{BlockchainError, Hash256, Result};

/// Tamanho do cabeçalho externo serializado
pub const BTC_HEADER_SIZE: usize = 80;

/// Cabeçalho de bloco da cadeia externa.
///
/// Formato de fio inalterado da cadeia de origem: campos inteiros em
/// little-endian, hashes em ordem interna (bytes crus).
/// `hash = double_sha256(serialize(header))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BtcBlockHeader {
    pub version: i32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BtcBlockHeader {
    /// Serializa o cabeçalho no formato de fio de 80 bytes
    #[must_use]
    pub fn serialize(&self) -> [u8; BTC_HEADER_SIZE] {
        let mut out = [0u8; BTC_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Desserializa um cabeçalho a partir dos 80 bytes de fio
    ///
    /// # Errors
    ///
    /// Retorna erro se o buffer não tiver exatamente 80 bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BTC_HEADER_SIZE {
            return Err(BlockchainError::SerializationError(format!(
                "external header must be {BTC_HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let mut prev = [0u8; 32];
        prev.copy_from_slice(&bytes[4..36]);
        let mut merkle = [0u8; 32];
        merkle.copy_from_slice(&bytes[36..68]);

        Ok(Self {
            version: i32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            prev_hash: Hash256::from_bytes(prev),
            merkle_root: Hash256::from_bytes(merkle),
            time: u32::from_le_bytes(bytes[68..72].try_into().unwrap()),
            bits: u32::from_le_bytes(bytes[72..76].try_into().unwrap()),
            nonce: u32::from_le_bytes(bytes[76..80].try_into().unwrap()),
        })
    }

    /// Hash do cabeçalho (double-SHA256 da forma serializada, ordem interna)
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        Hash256::sha256d(&self.serialize())
    }

    /// Cabeçalho "nulo" usado como placeholder em âncoras antigas sem
    /// cabeçalho completo armazenado
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.version == 0 && self.prev_hash.is_zero() && self.time == 0 && self.bits == 0
    }
}

/// Entrada do índice de cabeçalhos externos.
///
/// O trabalho acumulado é persistido como inteiro de 256 bits big-endian
/// para que a comparação binária coincida com a comparação numérica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcHeaderIndex {
    pub hash: Hash256,
    pub prev_hash: Hash256,
    pub height: u32,
    pub cum_work: [u8; 32],
    pub header: BtcBlockHeader,
}

impl BtcHeaderIndex {
    /// Trabalho acumulado como inteiro sem sinal de 256 bits
    #[must_use]
    pub fn cum_work_uint(&self) -> num_bigint::BigUint {
        num_bigint::BigUint::from_bytes_be(&self.cum_work)
    }

    /// Grava o trabalho acumulado a partir do inteiro de 256 bits
    pub fn set_cum_work(&mut self, work: &num_bigint::BigUint) {
        self.cum_work = crate::pow::work_to_bytes(work);
    }
}

/// Resultado da validação de um cabeçalho externo.
///
/// Cada variante carrega uma tag estável para que ferramentas externas
/// possam casar por padrão (ver política de erros do núcleo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BtcHeaderStatus {
    Valid,
    Duplicate,
    Orphan,
    InvalidPrevBlock,
    InvalidPow,
    InvalidTimestampFuture,
    InvalidTimestampMtp,
    InvalidRetarget,
    InvalidCheckpoint,
}

impl BtcHeaderStatus {
    /// Tag estável do status (identificador de erro voltado a ferramentas)
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Duplicate => "duplicate",
            Self::Orphan => "orphan",
            Self::InvalidPrevBlock => "bad-prevblock",
            Self::InvalidPow => "invalid-pow",
            Self::InvalidTimestampFuture => "future-timestamp",
            Self::InvalidTimestampMtp => "timestamp-below-mtp",
            Self::InvalidRetarget => "invalid-retarget",
            Self::InvalidCheckpoint => "checkpoint-mismatch",
        }
    }

    /// Cabeçalhos aceitos (novos ou já conhecidos) não penalizam o peer
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Valid | Self::Duplicate)
    }
}
