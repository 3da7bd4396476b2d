//! Construtores de transações de settlement (lado carteira)
//!
//! Constroem transações na forma canônica que a lógica de transição exige.
//! Modelo de taxa M1 para UNLOCK/TRANSFER: nenhum input M0 é necessário, a
//! taxa sai do próprio M1 (resolve o impasse de quem tem 0 M0). Construção
//! tudo-ou-nada: qualquer insuficiência devolve erro sem transação parcial.

use crate::params::ConsensusParams;
use crate::script;
use crate::transaction::{NativeTransaction, TxInput, TxOutput, TxType};
use shared::{Amount, BlockchainError, OutPoint, Result};

/// Input M0 para `build_lock`
#[derive(Debug, Clone)]
pub struct LockInput {
    pub outpoint: OutPoint,
    pub amount: Amount,
    pub script_pubkey: Vec<u8>,
}

/// Resultado de `build_lock`
#[derive(Debug, Clone)]
pub struct LockResult {
    pub tx: NativeTransaction,
    pub vault_outpoint: OutPoint,
    pub receipt_outpoint: OutPoint,
    pub locked_amount: Amount,
    pub fee: Amount,
}

/// Input de receipt M1 (modelo ao portador)
#[derive(Debug, Clone, Copy)]
pub struct M1Input {
    pub outpoint: OutPoint,
    pub amount: Amount,
}

/// Input de vault - sem assinatura: push-TRUE não exige script_sig
#[derive(Debug, Clone, Copy)]
pub struct VaultInput {
    pub outpoint: OutPoint,
    pub amount: Amount,
}

/// Resultado de `build_unlock`
#[derive(Debug, Clone)]
pub struct UnlockResult {
    pub tx: NativeTransaction,
    pub unlocked_amount: Amount,
    pub m1_burned: Amount,
    pub m1_change: Amount,
    pub m1_change_outpoint: Option<OutPoint>,
    pub fee: Amount,
}

/// Resultado de `build_transfer_m1` / `build_split_m1`
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub tx: NativeTransaction,
    pub new_receipts: Vec<OutPoint>,
    pub fee: Amount,
}

fn insufficient(detail: &str) -> BlockchainError {
    BlockchainError::InvalidTransaction(format!("Fundos insuficientes: {detail}"))
}

fn tx_fee(params: &ConsensusParams, draft: &NativeTransaction) -> Result<Amount> {
    // bincode codifica valores com largura fixa: o tamanho não muda quando
    // a taxa é preenchida, então uma única medição basta
    Ok(params.min_fee(draft.serialized_size()?))
}

/// Constrói um TX_LOCK: M0 → Vault + Receipt.
///
/// `vout[0]` = vault (P, push-TRUE), `vout[1]` = receipt (P, destino),
/// `vout[2]` = troco M0 (se houver). Os inputs precisam cobrir `2P + taxa`
/// porque financiam o vault e o receipt.
///
/// # Errors
///
/// Retorna erro se o valor for inválido ou os inputs não cobrirem o total
pub fn build_lock(
    inputs: &[LockInput],
    lock_amount: Amount,
    receipt_dest: &[u8; 20],
    change_dest: &[u8; 20],
    params: &ConsensusParams,
) -> Result<LockResult> {
    if lock_amount <= 0 {
        return Err(BlockchainError::InvalidTransaction(
            "Valor de lock deve ser positivo".to_string(),
        ));
    }
    if inputs.is_empty() {
        return Err(insufficient("nenhum input M0"));
    }

    let total_in: Amount = inputs.iter().map(|i| i.amount).sum();
    let tx_inputs: Vec<TxInput> = inputs
        .iter()
        .map(|i| TxInput::new(i.outpoint, i.script_pubkey.clone(), 0))
        .collect();

    let mut outputs = vec![
        TxOutput::new(lock_amount, script::push_true_script()),
        TxOutput::new(lock_amount, script::destination_script(receipt_dest)),
        TxOutput::new(0, script::destination_script(change_dest)),
    ];

    let draft = NativeTransaction::new(1, TxType::Lock, tx_inputs.clone(), outputs.clone(), 0);
    let fee = tx_fee(params, &draft)?;

    let change = total_in - 2 * lock_amount - fee;
    if change < 0 {
        return Err(insufficient(&format!(
            "necessário {} (2x{lock_amount} + taxa {fee}), disponível {total_in}",
            2 * lock_amount + fee
        )));
    }
    if change > 0 {
        outputs[2].value = change;
    } else {
        outputs.truncate(2);
    }

    let tx = NativeTransaction::new(1, TxType::Lock, tx_inputs, outputs, 0);
    let txid = tx.hash()?;

    Ok(LockResult {
        vault_outpoint: OutPoint::new(txid, 0),
        receipt_outpoint: OutPoint::new(txid, 1),
        locked_amount: lock_amount,
        fee,
        tx,
    })
}

/// Constrói um TX_UNLOCK: Receipts + Vaults → M0 (taxa em M1).
///
/// Ordem canônica: M0 ao destino, troco de receipt (se houver), taxa M1
/// (push-TRUE), lastro da taxa (push-TRUE) e troco de vault (se houver).
/// `unlock_amount = 0` desbloqueia tudo menos a taxa.
///
/// # Errors
///
/// Retorna erro se M1 ou o pool de vaults selecionado não cobrirem o valor
pub fn build_unlock(
    m1_inputs: &[M1Input],
    vault_inputs: &[VaultInput],
    unlock_amount: Amount,
    dest: &[u8; 20],
    change_dest: &[u8; 20],
    params: &ConsensusParams,
) -> Result<UnlockResult> {
    if m1_inputs.is_empty() {
        return Err(insufficient("nenhum receipt M1"));
    }
    if vault_inputs.is_empty() {
        return Err(insufficient("nenhum vault selecionado"));
    }

    let m1_in: Amount = m1_inputs.iter().map(|i| i.amount).sum();
    let vault_in: Amount = vault_inputs.iter().map(|i| i.amount).sum();

    // Ordem canônica dos inputs: receipts assinados, depois vaults
    let mut tx_inputs: Vec<TxInput> = m1_inputs
        .iter()
        .map(|i| TxInput::new(i.outpoint, vec![0x01], 0))
        .collect();
    tx_inputs.extend(
        vault_inputs
            .iter()
            .map(|i| TxInput::new(i.outpoint, Vec::new(), 0)),
    );

    // Rascunho com o layout máximo para medir a taxa
    let draft_outputs = vec![
        TxOutput::new(0, script::destination_script(dest)),
        TxOutput::new(0, script::destination_script(change_dest)),
        TxOutput::new(0, script::push_true_script()),
        TxOutput::new(0, script::push_true_script()),
        TxOutput::new(0, script::push_true_script()),
    ];
    let draft = NativeTransaction::new(1, TxType::Unlock, tx_inputs.clone(), draft_outputs, 0);
    let fee = tx_fee(params, &draft)?;

    let amount = if unlock_amount == 0 {
        m1_in - fee
    } else {
        unlock_amount
    };
    if amount <= 0 {
        return Err(insufficient("valor de unlock não positivo após a taxa"));
    }

    let m1_change = m1_in - amount - fee;
    if m1_change < 0 {
        return Err(insufficient(&format!(
            "M1 disponível {m1_in}, necessário {} ({amount} + taxa {fee})",
            amount + fee
        )));
    }
    let vault_change = vault_in - amount - fee;
    if vault_change < 0 {
        return Err(insufficient(&format!(
            "vaults selecionados {vault_in}, necessário {}",
            amount + fee
        )));
    }

    let mut outputs = vec![TxOutput::new(amount, script::destination_script(dest))];
    if m1_change > 0 {
        outputs.push(TxOutput::new(
            m1_change,
            script::destination_script(change_dest),
        ));
    }
    outputs.push(TxOutput::new(fee, script::push_true_script()));
    outputs.push(TxOutput::new(fee, script::push_true_script()));
    if vault_change > 0 {
        outputs.push(TxOutput::new(vault_change, script::push_true_script()));
    }

    let tx = NativeTransaction::new(1, TxType::Unlock, tx_inputs, outputs, 0);
    let txid = tx.hash()?;

    Ok(UnlockResult {
        unlocked_amount: amount,
        m1_burned: amount,
        m1_change,
        m1_change_outpoint: (m1_change > 0).then(|| OutPoint::new(txid, 1)),
        fee,
        tx,
    })
}

/// Constrói um TX_TRANSFER_M1 simples: receipt → novo dono.
///
/// `vin[0]` = receipt, `vout[0]` = novo receipt (valor − taxa),
/// `vout[1]` = taxa M1 (push-TRUE).
///
/// # Errors
///
/// Retorna erro se o receipt não cobrir a taxa
pub fn build_transfer_m1(
    receipt: M1Input,
    new_dest: &[u8; 20],
    params: &ConsensusParams,
) -> Result<TransferResult> {
    let tx_inputs = vec![TxInput::new(receipt.outpoint, vec![0x01], 0)];

    let draft = NativeTransaction::new(
        1,
        TxType::TransferM1,
        tx_inputs.clone(),
        vec![
            TxOutput::new(0, script::destination_script(new_dest)),
            TxOutput::new(0, script::push_true_script()),
        ],
        0,
    );
    let fee = tx_fee(params, &draft)?;

    let amount = receipt.amount - fee;
    if amount <= 0 {
        return Err(insufficient(&format!(
            "receipt de {} não cobre a taxa {fee}",
            receipt.amount
        )));
    }

    let tx = NativeTransaction::new(
        1,
        TxType::TransferM1,
        tx_inputs,
        vec![
            TxOutput::new(amount, script::destination_script(new_dest)),
            TxOutput::new(fee, script::push_true_script()),
        ],
        0,
    );
    let txid = tx.hash()?;

    Ok(TransferResult {
        new_receipts: vec![OutPoint::new(txid, 0)],
        fee,
        tx,
    })
}

/// Constrói um TX_TRANSFER_M1 em modo split: um receipt vira vários.
///
/// Habilita desbloqueios parciais no modelo UTXO ("fazer troco").
/// Conservação estrita: `Σ destinos + taxa == receipt.amount`; a taxa é o
/// resto implícito e precisa atingir o piso.
///
/// # Errors
///
/// Retorna erro se os destinos não couberem no receipt ou a taxa implícita
/// ficar abaixo do piso
pub fn build_split_m1(
    receipt: M1Input,
    destinations: &[([u8; 20], Amount)],
    params: &ConsensusParams,
) -> Result<TransferResult> {
    if destinations.is_empty() {
        return Err(BlockchainError::InvalidTransaction(
            "Split sem destinos".to_string(),
        ));
    }
    for (_, amount) in destinations {
        if *amount <= 0 {
            return Err(BlockchainError::InvalidTransaction(
                "Destino de split com valor não positivo".to_string(),
            ));
        }
    }

    let outputs_total: Amount = destinations.iter().map(|(_, a)| a).sum();
    let fee = receipt.amount - outputs_total;
    if fee < 0 {
        return Err(insufficient(&format!(
            "destinos somam {outputs_total}, receipt tem {}",
            receipt.amount
        )));
    }

    let mut outputs: Vec<TxOutput> = destinations
        .iter()
        .map(|(dest, amount)| TxOutput::new(*amount, script::destination_script(dest)))
        .collect();
    outputs.push(TxOutput::new(fee, script::push_true_script()));

    let tx_inputs = vec![TxInput::new(receipt.outpoint, vec![0x01], 0)];
    let tx = NativeTransaction::new(1, TxType::TransferM1, tx_inputs, outputs, 0);

    let min = params.min_fee(tx.serialized_size()?);
    if fee < min {
        return Err(BlockchainError::InvalidTransaction(format!(
            "Taxa implícita {fee} abaixo do piso {min}"
        )));
    }

    let txid = tx.hash()?;
    let new_receipts = (0..destinations.len() as u32)
        .map(|vout| OutPoint::new(txid, vout))
        .collect();

    Ok(TransferResult {
        new_receipts,
        fee,
        tx,
    })
}
