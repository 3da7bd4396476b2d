//! Transações nativas e as pré-checagens compartilhadas de consenso

use crate::error::{RejectionError, DOS_MAX, DOS_PROTOCOL};
use crate::params::ConsensusParams;
use crate::script;
use serde::{Deserialize, Serialize};
use shared::{Amount, BlockchainError, Hash256, OutPoint, Result};
use std::collections::HashSet;

/// Versão máxima (exclusiva) de transação aceita
pub const TX_VERSION_TOOHIGH: u32 = 3;

/// Input de transação nativa
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Referência ao UTXO sendo gasto
    pub previous_output: OutPoint,
    /// Script que prova o direito de gastar o UTXO (vazio em vaults:
    /// push-TRUE não exige assinatura)
    pub script_sig: Vec<u8>,
    /// Número de sequência
    pub sequence: u32,
}

impl TxInput {
    /// Cria um novo input de transação
    #[must_use]
    pub const fn new(previous_output: OutPoint, script_sig: Vec<u8>, sequence: u32) -> Self {
        Self {
            previous_output,
            script_sig,
            sequence,
        }
    }
}

/// Output de transação nativa
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Valor em sats
    pub value: Amount,
    /// Script que define as condições para gastar este output
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    /// Cria um novo output de transação
    #[must_use]
    pub const fn new(value: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    /// Output vazio (sem valor e sem script)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

/// Tipo da transação nativa.
///
/// Enum etiquetado no lugar de despacho polimórfico: a validação despacha
/// pela etiqueta e cada variante especial carrega seu corpo tipado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    /// Transação M0 comum (sem efeito de settlement)
    Ordinary,
    /// M0 → Vault + Receipt
    Lock,
    /// Receipts + Vaults → M0 (taxa em M1)
    Unlock,
    /// Receipt → Receipts (transferência ou split; taxa em M1)
    TransferM1,
    /// Mint de M0 a partir de claims de queima verificados
    MintM0Btc {
        /// Identificadores dos claims consumidos, na ordem dos outputs
        claim_ids: Vec<Hash256>,
    },
}

impl TxType {
    /// Transações com efeito na camada de settlement
    #[must_use]
    pub const fn is_special(&self) -> bool {
        !matches!(self, Self::Ordinary)
    }

    /// Tipos autorizados a carregar outputs push-TRUE
    #[must_use]
    pub const fn allows_push_true_outputs(&self) -> bool {
        matches!(self, Self::Lock | Self::Unlock | Self::TransferM1)
    }

    /// Nome curto do tipo para logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ordinary => "ordinary",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::TransferM1 => "transfer_m1",
            Self::MintM0Btc { .. } => "mint_m0btc",
        }
    }
}

/// Transação da cadeia nativa
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeTransaction {
    /// Versão da transação
    pub version: u32,
    /// Tipo (etiqueta de despacho do settlement)
    pub tx_type: TxType,
    /// Inputs da transação
    pub inputs: Vec<TxInput>,
    /// Outputs da transação
    pub outputs: Vec<TxOutput>,
    /// Lock time (tempo mínimo para inclusão em bloco)
    pub lock_time: u32,
}

impl NativeTransaction {
    /// Cria uma nova transação
    #[must_use]
    pub const fn new(
        version: u32,
        tx_type: TxType,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        lock_time: u32,
    ) -> Self {
        Self {
            version,
            tx_type,
            inputs,
            outputs,
            lock_time,
        }
    }

    /// Calcula o hash da transação (Keccak-256 da forma serializada)
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização da transação falhar
    pub fn hash(&self) -> Result<Hash256> {
        let serialized = serde_json::to_vec(self)
            .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
        Ok(Hash256::keccak256(&serialized))
    }

    /// Tamanho serializado da transação em bytes
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn serialized_size(&self) -> Result<usize> {
        bincode::serialized_size(self)
            .map(|s| s as usize)
            .map_err(|e| BlockchainError::SerializationError(e.to_string()))
    }

    /// Valor total dos outputs
    ///
    /// # Errors
    ///
    /// Retorna erro se houver overflow no somatório
    pub fn total_output_value(&self) -> Result<Amount> {
        let mut total: Amount = 0;
        for output in &self.outputs {
            total = total.checked_add(output.value).ok_or_else(|| {
                BlockchainError::InvalidTransaction("Output value overflow".to_string())
            })?;
        }
        Ok(total)
    }
}

/// Pré-checagens compartilhadas de consenso, aplicadas a toda transação.
///
/// Cobrem versão, tamanho, faixa monetária, inputs duplicados e o
/// endurecimento de outputs push-TRUE (permitidos apenas em
/// LOCK/UNLOCK/TRANSFER_M1 - em qualquer outro tipo a presença é
/// `bad-txns-optrue-forbidden`).
///
/// # Errors
///
/// Retorna `RejectionError` com a tag estável da primeira checagem violada
pub fn check_transaction(
    tx: &NativeTransaction,
    params: &ConsensusParams,
) -> std::result::Result<(), RejectionError> {
    // Versão dentro da faixa aceita
    if tx.version < 1 || tx.version >= TX_VERSION_TOOHIGH {
        return Err(RejectionError::with_detail(
            "bad-tx-version-too-high",
            DOS_PROTOCOL,
            format!("version {} (max {})", tx.version, TX_VERSION_TOOHIGH - 1),
        ));
    }

    // Transações especiais podem dispensar inputs (MINT) mas nunca outputs
    if tx.inputs.is_empty() && !tx.tx_type.is_special() {
        return Err(RejectionError::new("bad-txns-vin-empty", DOS_PROTOCOL));
    }
    if tx.outputs.is_empty() {
        return Err(RejectionError::new("bad-txns-vout-empty", DOS_PROTOCOL));
    }

    // Limite de tamanho serializado
    let size = tx
        .serialized_size()
        .map_err(|e| RejectionError::with_detail("bad-txns-oversize", DOS_PROTOCOL, e.to_string()))?;
    if size > params.max_tx_size {
        return Err(RejectionError::with_detail(
            "bad-txns-oversize",
            DOS_PROTOCOL,
            format!("{size} > {}", params.max_tx_size),
        ));
    }

    // Faixa monetária por output e no total
    let can_have_push_true = tx.tx_type.allows_push_true_outputs();
    let mut value_out: Amount = 0;
    for output in &tx.outputs {
        if output.is_empty() {
            return Err(RejectionError::new("bad-txns-vout-empty", DOS_MAX));
        }
        if output.value < 0 {
            return Err(RejectionError::new("bad-txns-vout-negative", DOS_MAX));
        }
        if output.value > params.max_money {
            return Err(RejectionError::new("bad-txns-vout-toolarge", DOS_MAX));
        }
        value_out = match value_out.checked_add(output.value) {
            Some(v) if params.money_range(v) => v,
            _ => {
                return Err(RejectionError::new("bad-txns-txouttotal-toolarge", DOS_MAX));
            }
        };

        // Endurecimento: push-TRUE identifica vaults; fora dos tipos de
        // settlement ele confundiria a classificação dirigida pelo banco
        if !can_have_push_true && script::is_push_true(&output.script_pubkey) {
            return Err(RejectionError::with_detail(
                "bad-txns-optrue-forbidden",
                DOS_MAX,
                "OP_TRUE outputs only allowed in LOCK/UNLOCK/TRANSFER_M1",
            ));
        }
    }

    // Inputs duplicados
    let mut seen: HashSet<OutPoint> = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.previous_output) {
            return Err(RejectionError::new("bad-txns-inputs-duplicate", DOS_MAX));
        }
        if input.previous_output.is_null() {
            return Err(RejectionError::new("bad-txns-prevout-null", DOS_PROTOCOL));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::NetworkType;

    fn params() -> ConsensusParams {
        ConsensusParams::for_network(NetworkType::Regtest)
    }

    fn m0_output(value: Amount) -> TxOutput {
        TxOutput::new(value, script::destination_script(&[9u8; 20]))
    }

    fn some_input(tag: &[u8], vout: u32) -> TxInput {
        TxInput::new(OutPoint::new(Hash256::keccak256(tag), vout), vec![1], 0)
    }

    fn ordinary_tx() -> NativeTransaction {
        NativeTransaction::new(
            1,
            TxType::Ordinary,
            vec![some_input(b"in", 0)],
            vec![m0_output(1000)],
            0,
        )
    }

    #[test]
    fn test_valid_ordinary_transaction() {
        assert!(check_transaction(&ordinary_tx(), &params()).is_ok());
    }

    #[test]
    fn test_transaction_hash_is_deterministic() {
        let tx = ordinary_tx();
        assert_eq!(tx.hash().unwrap(), tx.hash().unwrap());
        assert_ne!(tx.hash().unwrap(), Hash256::zero());
    }

    #[test]
    fn test_version_bounds() {
        let mut tx = ordinary_tx();
        tx.version = 0;
        assert_eq!(
            check_transaction(&tx, &params()).unwrap_err().code,
            "bad-tx-version-too-high"
        );

        tx.version = TX_VERSION_TOOHIGH;
        assert_eq!(
            check_transaction(&tx, &params()).unwrap_err().code,
            "bad-tx-version-too-high"
        );
    }

    #[test]
    fn test_empty_inputs_and_outputs() {
        let mut tx = ordinary_tx();
        tx.inputs.clear();
        assert_eq!(
            check_transaction(&tx, &params()).unwrap_err().code,
            "bad-txns-vin-empty"
        );

        // MINT dispensa inputs
        let mint = NativeTransaction::new(
            1,
            TxType::MintM0Btc { claim_ids: vec![] },
            vec![],
            vec![m0_output(10)],
            0,
        );
        assert!(check_transaction(&mint, &params()).is_ok());

        let mut tx = ordinary_tx();
        tx.outputs.clear();
        assert_eq!(
            check_transaction(&tx, &params()).unwrap_err().code,
            "bad-txns-vout-empty"
        );
    }

    #[test]
    fn test_output_value_range() {
        let p = params();

        let mut tx = ordinary_tx();
        tx.outputs[0].value = -1;
        assert_eq!(
            check_transaction(&tx, &p).unwrap_err().code,
            "bad-txns-vout-negative"
        );

        let mut tx = ordinary_tx();
        tx.outputs[0].value = p.max_money + 1;
        assert_eq!(
            check_transaction(&tx, &p).unwrap_err().code,
            "bad-txns-vout-toolarge"
        );

        // Soma dos outputs acima do teto monetário
        let mut tx = ordinary_tx();
        tx.outputs = vec![m0_output(p.max_money), m0_output(1)];
        assert_eq!(
            check_transaction(&tx, &p).unwrap_err().code,
            "bad-txns-txouttotal-toolarge"
        );
    }

    #[test]
    fn test_push_true_hardening() {
        // Output push-TRUE numa transação comum é proibido
        let mut tx = ordinary_tx();
        tx.outputs.push(TxOutput::new(5, script::push_true_script()));
        assert_eq!(
            check_transaction(&tx, &params()).unwrap_err().code,
            "bad-txns-optrue-forbidden"
        );

        // Em LOCK o mesmo output é permitido pelas pré-checagens
        let lock = NativeTransaction::new(
            1,
            TxType::Lock,
            vec![some_input(b"in", 0)],
            vec![
                TxOutput::new(5, script::push_true_script()),
                m0_output(5),
            ],
            0,
        );
        assert!(check_transaction(&lock, &params()).is_ok());
    }

    #[test]
    fn test_duplicate_and_null_inputs() {
        let mut tx = ordinary_tx();
        tx.inputs.push(tx.inputs[0].clone());
        assert_eq!(
            check_transaction(&tx, &params()).unwrap_err().code,
            "bad-txns-inputs-duplicate"
        );

        let mut tx = ordinary_tx();
        tx.inputs[0].previous_output = OutPoint::new(Hash256::zero(), 0);
        assert_eq!(
            check_transaction(&tx, &params()).unwrap_err().code,
            "bad-txns-prevout-null"
        );
    }
}
