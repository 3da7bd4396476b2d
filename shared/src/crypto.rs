//! Módulo de Criptografia ECDSA para o núcleo Bathron
//!
//! Os blocos nativos são assinados pelo operador do masternode produtor
//! com ECDSA secp256k1 sobre o hash do bloco. As assinaturas trafegam em
//! formato DER (64..=73 bytes, variantes de tamanho aceitas).

use crate::{BlockchainError, Hash256, Result};
use secp256k1::ecdsa::Signature as EcdsaSignature;
use secp256k1::{Message, PublicKey as SecpPublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Tamanho mínimo aceito para assinatura de bloco (DER compacto)
pub const MIN_BLOCK_SIG_SIZE: usize = 64;

/// Tamanho máximo aceito para assinatura de bloco (DER com ambos inteiros longos)
pub const MAX_BLOCK_SIG_SIZE: usize = 73;

/// Chave pública do operador (secp256k1 comprimida, 33 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    key_data: Vec<u8>,
}

/// Chave privada do operador (32 bytes, zerada ao sair de escopo)
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    key_data: Vec<u8>,
}

/// Par de chaves do operador
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Assinatura ECDSA em formato DER
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    data: Vec<u8>,
}

impl PublicKey {
    /// Cria uma chave pública a partir de bytes comprimidos
    ///
    /// # Errors
    ///
    /// Retorna erro se os bytes não representarem um ponto válido da curva
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        SecpPublicKey::from_slice(&bytes)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Ok(Self { key_data: bytes })
    }

    /// Returns the raw bytes of the public key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    fn to_secp(&self) -> Result<SecpPublicKey> {
        SecpPublicKey::from_slice(&self.key_data)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))
    }
}

impl PrivateKey {
    /// Creates a `PrivateKey` from raw bytes
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid secp256k1 scalar
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        SecretKey::from_slice(&bytes)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Ok(Self { key_data: bytes })
    }

    /// Returns the raw bytes of the private key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    fn to_secp(&self) -> Result<SecretKey> {
        SecretKey::from_slice(&self.key_data)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))
    }
}

impl KeyPair {
    /// Gera um novo par de chaves de operador
    #[must_use]
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());
        Self {
            public_key: PublicKey {
                key_data: public_key.serialize().to_vec(),
            },
            private_key: PrivateKey {
                key_data: secret_key.secret_bytes().to_vec(),
            },
        }
    }
}

impl Signature {
    /// Cria uma assinatura a partir de bytes DER (sem validar a curva)
    #[must_use]
    pub const fn from_der_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns the DER-encoded signature bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Tamanho da assinatura em bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Verifica se a assinatura está vazia
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Assina o hash de um bloco com a chave do operador
///
/// # Errors
///
/// Retorna erro se a chave privada for inválida
pub fn sign_block_hash(private_key: &PrivateKey, block_hash: &Hash256) -> Result<Signature> {
    let secp = Secp256k1::new();
    let message = Message::from_digest(*block_hash.as_bytes());
    let secret = private_key.to_secp()?;
    let sig = secp.sign_ecdsa(&message, &secret);
    Ok(Signature {
        data: sig.serialize_der().to_vec(),
    })
}

/// Verifica a assinatura ECDSA de um bloco contra a chave do operador esperado.
///
/// A janela de tamanho 64..=73 é checada antes do parse DER; fora dela a
/// assinatura é rejeitada sem tocar na curva.
///
/// # Errors
///
/// Retorna erro se o tamanho estiver fora da janela, o DER for malformado
/// ou a assinatura não corresponder à chave
pub fn verify_block_signature(
    public_key: &PublicKey,
    block_hash: &Hash256,
    signature: &[u8],
) -> Result<()> {
    if signature.len() < MIN_BLOCK_SIG_SIZE || signature.len() > MAX_BLOCK_SIG_SIZE {
        return Err(BlockchainError::InvalidSignature);
    }

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*block_hash.as_bytes());
    let sig =
        EcdsaSignature::from_der(signature).map_err(|_| BlockchainError::InvalidSignature)?;
    let pubkey = public_key.to_secp()?;

    secp.verify_ecdsa(&message, &sig, &pubkey)
        .map_err(|_| BlockchainError::InvalidSignature)
}
