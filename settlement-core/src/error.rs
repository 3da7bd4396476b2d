use shared::BlockchainError;
use thiserror::Error;

/// Pontuação DoS para quebra de protocolo branda (erro possivelmente honesto)
pub const DOS_PROTOCOL: u32 = 10;

/// Pontuação DoS máxima (mau comportamento inequívoco)
pub const DOS_MAX: u32 = 100;

/// Rejeição de consenso com tag estável e balde de pontuação DoS.
///
/// A tag (`code`) é o identificador voltado a ferramentas externas; o
/// `detail` é contexto humano para logs. Substitui o fluxo de exceções da
/// camada de validação por um tipo de resultado propagado com `?`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {detail}")]
pub struct RejectionError {
    /// Identificador estável do erro (ex.: `bad-txns-vout-negative`)
    pub code: &'static str,
    /// Pontuação DoS atribuída ao peer que enviou o dado
    pub dos_score: u32,
    /// Contexto adicional para diagnóstico
    pub detail: String,
}

impl RejectionError {
    #[must_use]
    pub fn new(code: &'static str, dos_score: u32) -> Self {
        Self {
            code,
            dos_score,
            detail: String::new(),
        }
    }

    #[must_use]
    pub fn with_detail(code: &'static str, dos_score: u32, detail: impl Into<String>) -> Self {
        Self {
            code,
            dos_score,
            detail: detail.into(),
        }
    }
}

/// Erro da camada de settlement: rejeição de consenso ou falha de
/// infraestrutura (armazenamento, serialização)
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Rejection(#[from] RejectionError),

    #[error(transparent)]
    Chain(#[from] BlockchainError),
}

impl SettlementError {
    /// Tag estável quando o erro é uma rejeição de consenso
    #[must_use]
    pub fn reject_code(&self) -> Option<&'static str> {
        match self {
            Self::Rejection(r) => Some(r.code),
            Self::Chain(_) => None,
        }
    }
}

/// Alias para resultados da camada de settlement
pub type SettlementResult<T> = std::result::Result<T, SettlementError>;
