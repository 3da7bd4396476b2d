use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use std::fmt;

/// Hash de 256 bits usado para identificar blocos, transações e outros dados.
///
/// A cadeia nativa usa Keccak-256; a cadeia externa (BTC) usa double-SHA256.
/// A ordenação derivada interpreta os bytes como inteiro de 256 bits
/// big-endian, o que basta para desempate determinístico.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Creates a zeroed hash
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Verifica se o hash é todo-zeros (valor "nulo" em ponteiros de cadeia)
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Creates a hash from a 32-byte array
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the hash
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes Keccak-256 hash of the provided data
    #[must_use]
    pub fn keccak256(data: &[u8]) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Computes single SHA-256 of the provided data
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        sha2::Digest::update(&mut hasher, data);
        let result = sha2::Digest::finalize(hasher);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Self(hash)
    }

    /// Computes double SHA-256 (cadeia externa estilo Bitcoin)
    #[must_use]
    pub fn sha256d(data: &[u8]) -> Self {
        let first = Self::sha256(data);
        Self::sha256(&first.0)
    }

    /// Retorna o hash com os bytes invertidos.
    ///
    /// Conversão entre a forma interna (little-endian) e a forma de
    /// exibição (big-endian) usada por exploradores da cadeia externa.
    #[must_use]
    pub fn reversed(&self) -> Self {
        let mut out = [0u8; 32];
        for (i, byte) in self.0.iter().enumerate() {
            out[31 - i] = *byte;
        }
        Self(out)
    }

    /// Decodifica um hash a partir de string hexadecimal (64 caracteres)
    ///
    /// # Errors
    ///
    /// Retorna erro se a string não for hex válido de 32 bytes
    pub fn from_hex(hex_string: &str) -> crate::Result<Self> {
        let bytes = hex::decode(hex_string)
            .map_err(|e| crate::BlockchainError::InvalidHashEncoding(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(crate::BlockchainError::InvalidHashEncoding(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }

    /// Decodifica um hash na forma de exibição (hex big-endian, como em
    /// exploradores Bitcoin) para a forma interna
    ///
    /// # Errors
    ///
    /// Retorna erro se a string não for hex válido de 32 bytes
    pub fn from_hex_be(hex_string: &str) -> crate::Result<Self> {
        Ok(Self::from_hex(hex_string)?.reversed())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
