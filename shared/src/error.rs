use thiserror::Error;

/// Erros relacionados à blockchain
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Transação inválida: {0}")]
    InvalidTransaction(String),

    #[error("Bloco inválido: {0}")]
    InvalidBlock(String),

    #[error("Cabeçalho externo inválido: {0}")]
    InvalidHeader(String),

    #[error("Codificação de hash inválida: {0}")]
    InvalidHashEncoding(String),

    #[error("UTXO não encontrado")]
    UtxoNotFound,

    #[error("Fundos insuficientes")]
    InsufficientFunds,

    #[error("Assinatura inválida")]
    InvalidSignature,

    #[error("Invariante violada: {0}")]
    InvariantViolation(String),

    #[error("Erro criptográfico: {0}")]
    CryptographicError(String),

    #[error("Erro de serialização: {0}")]
    SerializationError(String),

    #[error("Erro de armazenamento: {0}")]
    StorageError(String),

    #[error("Estado não encontrado: {0}")]
    StateNotFound(String),
}
