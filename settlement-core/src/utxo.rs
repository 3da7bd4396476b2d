//! Visão de moedas (coin view): conjunto de UTXOs da cadeia nativa

use crate::transaction::TxOutput;
use serde::{Deserialize, Serialize};
use shared::{Amount, BlockchainError, OutPoint, Result};
use std::collections::HashMap;

/// Uma saída de transação não gasta com metadados de criação
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// A saída original da transação
    pub output: TxOutput,
    /// Altura do bloco onde foi criada
    pub height: u32,
}

impl Utxo {
    /// Cria um novo UTXO
    #[must_use]
    pub const fn new(output: TxOutput, height: u32) -> Self {
        Self { output, height }
    }
}

/// Conjunto de UTXOs para controle de estado.
///
/// O núcleo de settlement consome esta visão como colaborador: a
/// classificação Vault/Receipt vive no banco de settlement, não aqui.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, Utxo>,
}

impl UtxoSet {
    /// Cria um novo conjunto vazio de UTXOs
    #[must_use]
    pub fn new() -> Self {
        Self {
            utxos: HashMap::new(),
        }
    }

    /// Adiciona um UTXO ao conjunto
    pub fn add(&mut self, outpoint: OutPoint, utxo: Utxo) {
        self.utxos.insert(outpoint, utxo);
    }

    /// Remove um UTXO do conjunto (quando é gasto)
    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.remove(outpoint)
    }

    /// Obtém um UTXO do conjunto
    #[must_use]
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    /// Verifica se um UTXO existe
    #[must_use]
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    /// Obtém o valor total de UTXOs controlados por um script específico
    #[must_use]
    pub fn balance_for_script(&self, script: &[u8]) -> Amount {
        self.utxos
            .values()
            .filter(|utxo| utxo.output.script_pubkey == script)
            .map(|utxo| utxo.output.value)
            .sum()
    }

    /// Encontra UTXOs suficientes para cobrir um valor específico.
    ///
    /// Seleção determinística: candidatos ordenados por (valor, outpoint).
    ///
    /// # Errors
    ///
    /// Retorna erro se o saldo do script não cobrir o valor
    pub fn find_utxos_for_amount(
        &self,
        script: &[u8],
        amount: Amount,
    ) -> Result<Vec<(OutPoint, Utxo)>> {
        let mut candidates: Vec<(OutPoint, Utxo)> = self
            .utxos
            .iter()
            .filter(|(_, utxo)| utxo.output.script_pubkey == script)
            .map(|(op, utxo)| (*op, utxo.clone()))
            .collect();
        candidates.sort_by(|a, b| (a.1.output.value, a.0).cmp(&(b.1.output.value, b.0)));

        let mut selected = Vec::new();
        let mut total: Amount = 0;

        for (outpoint, utxo) in candidates {
            total = total.checked_add(utxo.output.value).ok_or_else(|| {
                BlockchainError::InvalidTransaction("Overflow in UTXO selection".to_string())
            })?;
            selected.push((outpoint, utxo));

            if total >= amount {
                return Ok(selected);
            }
        }

        Err(BlockchainError::InsufficientFunds)
    }

    /// Retorna o número total de UTXOs
    #[must_use]
    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    /// Verifica se o conjunto está vazio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }
}
