//! Lógica de transição da camada de settlement
//!
//! Quatro tipos de transação especial mutam os índices tipados e os
//! escalares do snapshot. Cada tipo tem regra de ordem canônica de outputs
//! (imposta), regra de conservação (imposta) e efeito de invariante
//! (afirmado após a aplicação do bloco).
//!
//! As checagens intra-bloco enxergam o efeito das transações anteriores do
//! mesmo bloco através de um overlay em memória; todas as mutações
//! desembocam num único lote atômico por bloco.

use crate::db::{SettlementBatch, SettlementDb};
use crate::error::{RejectionError, SettlementError, SettlementResult, DOS_MAX, DOS_PROTOCOL};
use crate::params::ConsensusParams;
use crate::script;
use crate::state::{M1Receipt, SettlementState, TransferUndoData, UnlockUndoData, VaultEntry};
use crate::transaction::{NativeTransaction, TxType};
use crate::utxo::UtxoSet;
use shared::{Amount, Hash256, OutPoint, Result};
use spv_core::burnclaim::{BurnClaimStore, ClaimStatus};
use std::collections::{BTreeMap, BTreeSet};
use tracing::error;

/// Overlay de settlement de um bloco em aplicação.
///
/// Leituras consultam primeiro as mutações do próprio bloco e caem para o
/// banco; as escritas acumulam no lote atômico do bloco.
pub struct SettlementOverlay<'a> {
    db: &'a SettlementDb,
    added_vaults: BTreeMap<OutPoint, VaultEntry>,
    removed_vaults: BTreeSet<OutPoint>,
    added_receipts: BTreeMap<OutPoint, M1Receipt>,
    removed_receipts: BTreeSet<OutPoint>,
    batch: SettlementBatch,
}

impl<'a> SettlementOverlay<'a> {
    #[must_use]
    pub fn new(db: &'a SettlementDb) -> Self {
        Self {
            db,
            added_vaults: BTreeMap::new(),
            removed_vaults: BTreeSet::new(),
            added_receipts: BTreeMap::new(),
            removed_receipts: BTreeSet::new(),
            batch: SettlementBatch::new(),
        }
    }

    /// Lê um vault através do overlay
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn get_vault(&self, outpoint: &OutPoint) -> Result<Option<VaultEntry>> {
        if self.removed_vaults.contains(outpoint) {
            return Ok(None);
        }
        if let Some(vault) = self.added_vaults.get(outpoint) {
            return Ok(Some(vault.clone()));
        }
        self.db.read_vault(outpoint)
    }

    /// Lê um receipt através do overlay
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de armazenamento
    pub fn get_receipt(&self, outpoint: &OutPoint) -> Result<Option<M1Receipt>> {
        if self.removed_receipts.contains(outpoint) {
            return Ok(None);
        }
        if let Some(receipt) = self.added_receipts.get(outpoint) {
            return Ok(Some(receipt.clone()));
        }
        self.db.read_receipt(outpoint)
    }

    fn add_vault(&mut self, vault: VaultEntry) -> Result<()> {
        self.batch.write_vault(&vault)?;
        self.removed_vaults.remove(&vault.outpoint);
        self.added_vaults.insert(vault.outpoint, vault);
        Ok(())
    }

    fn remove_vault(&mut self, outpoint: &OutPoint) {
        self.batch.erase_vault(outpoint);
        self.added_vaults.remove(outpoint);
        self.removed_vaults.insert(*outpoint);
    }

    fn add_receipt(&mut self, receipt: M1Receipt) -> Result<()> {
        self.batch.write_receipt(&receipt)?;
        self.removed_receipts.remove(&receipt.outpoint);
        self.added_receipts.insert(receipt.outpoint, receipt);
        Ok(())
    }

    fn remove_receipt(&mut self, outpoint: &OutPoint) {
        self.batch.erase_receipt(outpoint);
        self.added_receipts.remove(outpoint);
        self.removed_receipts.insert(*outpoint);
    }

    /// Consome o overlay devolvendo o lote acumulado
    #[must_use]
    pub fn into_batch(self) -> SettlementBatch {
        self.batch
    }

    /// Acesso mutável ao lote (escritas de snapshot e undo)
    pub fn batch_mut(&mut self) -> &mut SettlementBatch {
        &mut self.batch
    }
}

fn reject(code: &'static str) -> SettlementError {
    RejectionError::new(code, DOS_MAX).into()
}

fn reject_detail(code: &'static str, detail: String) -> SettlementError {
    RejectionError::with_detail(code, DOS_MAX, detail).into()
}

// ---- TX_LOCK ----

/// Efeitos calculados de um LOCK válido
#[derive(Debug, Clone, Copy)]
pub struct LockEffects {
    pub locked_amount: Amount,
}

/// Valida a estrutura e a conservação de um TX_LOCK.
///
/// Forma canônica: `vout[0]` = vault (P, push-TRUE), `vout[1]` = receipt
/// (P, script de endereço), `vout[2..]` = troco M0. Os inputs financiam o
/// vault E o receipt (fator 2): o M1 é um claim recém-mintado lastreado
/// pelo M0 travado.
///
/// # Errors
///
/// Rejeição de consenso com tag estável, ou falha de armazenamento
pub fn check_lock(
    tx: &NativeTransaction,
    overlay: &SettlementOverlay,
    coins: &UtxoSet,
) -> SettlementResult<LockEffects> {
    if tx.outputs.len() < 2 {
        return Err(reject("bad-lock-output-structure"));
    }

    let vault_out = &tx.outputs[0];
    if !script::is_push_true(&vault_out.script_pubkey) {
        return Err(reject("bad-lock-vault-script"));
    }
    if vault_out.value <= 0 {
        return Err(reject("bad-lock-vault-amount"));
    }

    let receipt_out = &tx.outputs[1];
    if script::is_push_true(&receipt_out.script_pubkey) {
        return Err(reject("bad-lock-output-structure"));
    }
    if receipt_out.value != vault_out.value {
        return Err(reject_detail(
            "bad-lock-amount-mismatch",
            format!("vault {} != receipt {}", vault_out.value, receipt_out.value),
        ));
    }

    // Troco M0 nunca usa push-TRUE (só vout[0] é vault)
    for output in &tx.outputs[2..] {
        if script::is_push_true(&output.script_pubkey) {
            return Err(reject("bad-lock-output-structure"));
        }
    }

    // Inputs: somente M0 padrão, presentes na visão de moedas
    let mut total_in: Amount = 0;
    for input in &tx.inputs {
        let outpoint = &input.previous_output;
        if overlay.get_vault(outpoint)?.is_some() {
            return Err(reject("bad-lock-spends-vault"));
        }
        if overlay.get_receipt(outpoint)?.is_some() {
            return Err(reject("bad-lock-spends-receipt"));
        }
        let Some(coin) = coins.get(outpoint) else {
            return Err(reject("bad-txns-inputs-missingorspent"));
        };
        total_in = total_in
            .checked_add(coin.output.value)
            .ok_or_else(|| reject("bad-txns-inputvalues-outofrange"))?;
    }

    // Conservação: Σ inputs = 2P + troco + taxa (taxa implícita >= 0)
    let total_out = tx
        .total_output_value()
        .map_err(|_| reject("bad-txns-txouttotal-toolarge"))?;
    if total_in < total_out {
        return Err(reject_detail(
            "bad-txns-in-belowout",
            format!("in {total_in} < out {total_out}"),
        ));
    }

    Ok(LockEffects {
        locked_amount: vault_out.value,
    })
}

/// Aplica um LOCK: cria o vault e o receipt, move os escalares.
///
/// Efeito: `m0_vaulted += P`, `m1_supply += P` (A6 preservada). Os inputs
/// M0 consumidos bastam para restaurar via visão de moedas, então LOCK não
/// grava registro de undo próprio.
///
/// # Errors
///
/// Retorna erro em falha de serialização do lote
pub fn apply_lock(
    effects: LockEffects,
    txid: &Hash256,
    height: u32,
    overlay: &mut SettlementOverlay,
    state: &mut SettlementState,
) -> SettlementResult<()> {
    let amount = effects.locked_amount;
    overlay.add_vault(VaultEntry {
        outpoint: OutPoint::new(*txid, 0),
        amount,
        lock_height: height,
    })?;
    overlay.add_receipt(M1Receipt {
        outpoint: OutPoint::new(*txid, 1),
        amount,
        create_height: height,
    })?;

    state.m0_vaulted += amount;
    state.m1_supply += amount;
    Ok(())
}

/// Desfaz um LOCK num reorg: remove o vault e o receipt criados
pub fn undo_lock(txid: &Hash256, overlay: &mut SettlementOverlay) {
    overlay.remove_vault(&OutPoint::new(*txid, 0));
    overlay.remove_receipt(&OutPoint::new(*txid, 1));
}

// ---- TX_UNLOCK ----

/// Layout e efeitos calculados de um UNLOCK válido
#[derive(Debug, Clone)]
pub struct UnlockEffects {
    pub receipts_spent: Vec<M1Receipt>,
    pub vaults_spent: Vec<VaultEntry>,
    pub m0_released: Amount,
    pub receipt_change: Amount,
    pub m1_fee: Amount,
    pub vault_change: Amount,
    /// Índice canônico da saída de taxa (1 + trocos de receipt)
    pub fee_index: u32,
    pub has_vault_change: bool,
}

/// Valida a estrutura, a ordem canônica e a conservação de um TX_UNLOCK.
///
/// Forma canônica: `vout[0]` = M0 destino, `vout[1]` = troco de receipt
/// (opcional), depois taxa M1 (push-TRUE), lastro da taxa (push-TRUE, mesmo
/// valor) e troco de vault (push-TRUE, opcional). Taxa paga em M1 - nenhum
/// input M0 adicional é aceito.
///
/// # Errors
///
/// Rejeição de consenso com tag estável, ou falha de armazenamento
pub fn check_unlock(
    tx: &NativeTransaction,
    overlay: &SettlementOverlay,
    params: &ConsensusParams,
) -> SettlementResult<UnlockEffects> {
    // Inputs na ordem canônica: receipts, depois vaults, nada de M0
    let mut receipts_spent: Vec<M1Receipt> = Vec::new();
    let mut vaults_spent: Vec<VaultEntry> = Vec::new();
    for input in &tx.inputs {
        let outpoint = &input.previous_output;
        if let Some(receipt) = overlay.get_receipt(outpoint)? {
            if !vaults_spent.is_empty() {
                return Err(reject("bad-unlock-input-order"));
            }
            receipts_spent.push(receipt);
        } else if let Some(vault) = overlay.get_vault(outpoint)? {
            vaults_spent.push(vault);
        } else {
            return Err(reject("bad-unlock-input-m0"));
        }
    }
    if receipts_spent.is_empty() {
        return Err(reject("bad-unlock-no-receipts"));
    }
    if vaults_spent.is_empty() {
        return Err(reject("bad-unlock-no-vaults"));
    }

    // vout[0]: M0 liberado para o destino
    let m0_out = tx.outputs.first().ok_or_else(|| reject("bad-unlock-output-structure"))?;
    if script::is_push_true(&m0_out.script_pubkey) {
        return Err(reject("bad-unlock-m0-script"));
    }
    if m0_out.value <= 0 {
        return Err(reject("bad-unlock-m0-amount"));
    }

    // Troco de receipt opcional em vout[1]
    let mut idx = 1usize;
    let mut receipt_change: Amount = 0;
    let mut change_count = 0u32;
    if idx < tx.outputs.len() && !script::is_push_true(&tx.outputs[idx].script_pubkey) {
        receipt_change = tx.outputs[idx].value;
        change_count = 1;
        idx += 1;
    }

    // A taxa tem de estar no índice canônico: um segundo output de troco
    // deslocaria a taxa, o que é rejeitado
    if idx < tx.outputs.len() && !script::is_push_true(&tx.outputs[idx].script_pubkey) {
        return Err(reject("bad-unlock-fee-index"));
    }

    // Taxa M1 (push-TRUE, reivindicável pelo produtor do bloco)
    let fee_index = idx as u32;
    let Some(fee_out) = tx.outputs.get(idx) else {
        return Err(reject("bad-unlock-fee-missing"));
    };
    if !script::is_push_true(&fee_out.script_pubkey) {
        return Err(reject("bad-unlock-fee-script"));
    }
    let m1_fee = fee_out.value;
    let tx_size = tx
        .serialized_size()
        .map_err(|e| reject_detail("bad-txns-oversize", e.to_string()))?;
    if m1_fee < params.min_fee(tx_size) {
        return Err(reject_detail(
            "bad-unlock-fee-too-low",
            format!("fee {m1_fee} < min {}", params.min_fee(tx_size)),
        ));
    }

    // Lastro da taxa: vault recém-criado de valor idêntico (preserva A6)
    let Some(backing_out) = tx.outputs.get(idx + 1) else {
        return Err(reject("bad-unlock-fee-backing-missing"));
    };
    if !script::is_push_true(&backing_out.script_pubkey) {
        return Err(reject("bad-unlock-fee-backing-missing"));
    }
    if backing_out.value != m1_fee {
        return Err(reject("bad-unlock-fee-backing-mismatch"));
    }

    // Troco de vault opcional; nada além dele
    let mut vault_change: Amount = 0;
    let mut has_vault_change = false;
    match tx.outputs.len() - (idx + 2) {
        0 => {}
        1 => {
            let change_out = &tx.outputs[idx + 2];
            if !script::is_push_true(&change_out.script_pubkey) {
                return Err(reject("bad-unlock-output-structure"));
            }
            vault_change = change_out.value;
            has_vault_change = true;
        }
        _ => return Err(reject("bad-unlock-output-structure")),
    }

    // Conservação M1: Σ M1_in == M0_out + troco_receipt + taxa
    let m1_in: Amount = receipts_spent.iter().map(|r| r.amount).sum();
    if m1_in != m0_out.value + receipt_change + m1_fee {
        return Err(reject_detail(
            "bad-unlock-m1-conservation",
            format!(
                "m1_in {m1_in} != m0 {} + change {receipt_change} + fee {m1_fee}",
                m0_out.value
            ),
        ));
    }

    // Lastro de vault: Σ Vault_in == M0_out + taxa + troco_vault
    let vault_in: Amount = vaults_spent.iter().map(|v| v.amount).sum();
    if vault_in != m0_out.value + m1_fee + vault_change {
        return Err(reject_detail(
            "bad-unlock-vault-conservation",
            format!(
                "vault_in {vault_in} != m0 {} + fee {m1_fee} + change {vault_change}",
                m0_out.value
            ),
        ));
    }

    debug_assert_eq!(fee_index, 1 + change_count);

    Ok(UnlockEffects {
        receipts_spent,
        vaults_spent,
        m0_released: m0_out.value,
        receipt_change,
        m1_fee,
        vault_change,
        fee_index,
        has_vault_change,
    })
}

/// Aplica um UNLOCK: consome receipts e vaults, cria troco, taxa e lastro.
///
/// Efeito líquido: `m0_vaulted -= M0_out` (troco de vault e lastro da taxa
/// continuam travados), `m1_supply -= queima líquida`. A6 se mantém porque
/// a taxa transferida permanece lastreada pelo vault de lastro recém-criado.
///
/// # Errors
///
/// Retorna erro em falha de serialização do lote
pub fn apply_unlock(
    effects: &UnlockEffects,
    txid: &Hash256,
    height: u32,
    overlay: &mut SettlementOverlay,
    state: &mut SettlementState,
) -> SettlementResult<()> {
    for receipt in &effects.receipts_spent {
        overlay.remove_receipt(&receipt.outpoint);
    }
    for vault in &effects.vaults_spent {
        overlay.remove_vault(&vault.outpoint);
    }

    if effects.receipt_change > 0 {
        overlay.add_receipt(M1Receipt {
            outpoint: OutPoint::new(*txid, 1),
            amount: effects.receipt_change,
            create_height: height,
        })?;
    }

    // A taxa segue contabilizada como M1 até o produtor reivindicá-la
    overlay.add_receipt(M1Receipt {
        outpoint: OutPoint::new(*txid, effects.fee_index),
        amount: effects.m1_fee,
        create_height: height,
    })?;
    overlay.add_vault(VaultEntry {
        outpoint: OutPoint::new(*txid, effects.fee_index + 1),
        amount: effects.m1_fee,
        lock_height: height,
    })?;

    let mut vault_change_outpoint = None;
    if effects.has_vault_change {
        let outpoint = OutPoint::new(*txid, effects.fee_index + 2);
        overlay.add_vault(VaultEntry {
            outpoint,
            amount: effects.vault_change,
            lock_height: height,
        })?;
        vault_change_outpoint = Some(outpoint);
    }

    let net_m1_burned = effects.m0_released;
    state.m0_vaulted -= effects.m0_released;
    state.m1_supply -= net_m1_burned;

    let undo = UnlockUndoData {
        receipts_spent: effects.receipts_spent.clone(),
        vaults_spent: effects.vaults_spent.clone(),
        m0_released: effects.m0_released,
        net_m1_burned,
        change_receipts_created: u32::from(effects.receipt_change > 0),
        vault_change_outpoint,
    };
    overlay.batch_mut().write_unlock_undo(txid, &undo)?;
    Ok(())
}

/// Desfaz um UNLOCK num reorg a partir do registro de undo `U|txid`.
///
/// # Errors
///
/// Retorna erro se o registro de undo estiver ausente
pub fn undo_unlock(
    txid: &Hash256,
    db: &SettlementDb,
    overlay: &mut SettlementOverlay,
) -> SettlementResult<()> {
    let undo = db.read_unlock_undo(txid)?.ok_or_else(|| {
        SettlementError::Chain(shared::BlockchainError::StateNotFound(format!(
            "unlock undo {txid}"
        )))
    })?;

    // Remove as entradas criadas pelo unlock (posições canônicas)
    let fee_index = 1 + undo.change_receipts_created;
    if undo.change_receipts_created > 0 {
        overlay.remove_receipt(&OutPoint::new(*txid, 1));
    }
    overlay.remove_receipt(&OutPoint::new(*txid, fee_index));
    overlay.remove_vault(&OutPoint::new(*txid, fee_index + 1));
    if let Some(outpoint) = undo.vault_change_outpoint {
        overlay.remove_vault(&outpoint);
    }

    // Reinstala o que foi consumido
    for receipt in &undo.receipts_spent {
        overlay.add_receipt(receipt.clone())?;
    }
    for vault in &undo.vaults_spent {
        overlay.add_vault(vault.clone())?;
    }

    overlay.batch_mut().erase_unlock_undo(txid);
    Ok(())
}

// ---- TX_TRANSFER_M1 ----

/// Efeitos calculados de um TRANSFER_M1 válido
#[derive(Debug, Clone)]
pub struct TransferEffects {
    pub source_receipt: M1Receipt,
    pub m1_fee: Amount,
    /// Número de saídas M1 (recipientes + taxa)
    pub num_m1_outputs: u32,
}

/// Valida um TX_TRANSFER_M1 (transferência com 1 recipiente ou split com
/// vários; a transição é a mesma).
///
/// Forma canônica: `vin[0]` = receipt fonte (único input), `vout[0..N-1]` =
/// novos receipts, `vout[N]` = taxa M1 (push-TRUE, exatamente uma, na
/// cauda). Conservação estrita: `fonte == Σ recipientes + taxa`.
///
/// # Errors
///
/// Rejeição de consenso com tag estável, ou falha de armazenamento
pub fn check_transfer(
    tx: &NativeTransaction,
    overlay: &SettlementOverlay,
    params: &ConsensusParams,
) -> SettlementResult<TransferEffects> {
    if tx.inputs.len() != 1 {
        return Err(reject("bad-txtransfer-input-count"));
    }
    let Some(source_receipt) = overlay.get_receipt(&tx.inputs[0].previous_output)? else {
        return Err(reject("bad-txtransfer-not-receipt"));
    };

    if tx.outputs.len() < 2 {
        return Err(reject("bad-txtransfer-fee-missing"));
    }

    // Taxa exatamente na cauda; recipientes nunca usam push-TRUE
    let Some((fee_out, recipients)) = tx.outputs.split_last() else {
        return Err(reject("bad-txtransfer-fee-missing"));
    };
    if !script::is_push_true(&fee_out.script_pubkey) {
        if fee_out.script_pubkey.first() == Some(&script::OP_TRUE) {
            return Err(reject("bad-txtransfer-fee-script"));
        }
        return Err(reject("bad-txtransfer-fee-missing"));
    }
    for recipient in recipients {
        if script::is_push_true(&recipient.script_pubkey) {
            return Err(reject("bad-txtransfer-fee-index"));
        }
        if recipient.value <= 0 {
            return Err(reject("bad-txtransfer-recipient-amount"));
        }
    }

    let m1_fee = fee_out.value;
    let tx_size = tx
        .serialized_size()
        .map_err(|e| reject_detail("bad-txns-oversize", e.to_string()))?;
    if m1_fee < params.min_fee(tx_size) {
        return Err(reject_detail(
            "bad-txtransfer-fee-too-low",
            format!("fee {m1_fee} < min {}", params.min_fee(tx_size)),
        ));
    }

    // Conservação M1 estrita
    let recipients_total: Amount = recipients.iter().map(|o| o.value).sum();
    if source_receipt.amount != recipients_total + m1_fee {
        return Err(reject_detail(
            "bad-txtransfer-conservation",
            format!(
                "source {} != recipients {recipients_total} + fee {m1_fee}",
                source_receipt.amount
            ),
        ));
    }

    Ok(TransferEffects {
        source_receipt,
        m1_fee,
        num_m1_outputs: tx.outputs.len() as u32,
    })
}

/// Aplica um TRANSFER_M1: redistribui o receipt fonte.
///
/// Efeito: `m1_supply` inalterada (a saída de taxa segue sendo M1 na
/// contabilidade até o produtor reivindicá-la). A6 se mantém.
///
/// # Errors
///
/// Retorna erro em falha de serialização do lote
pub fn apply_transfer(
    effects: &TransferEffects,
    tx: &NativeTransaction,
    txid: &Hash256,
    height: u32,
    overlay: &mut SettlementOverlay,
) -> SettlementResult<()> {
    overlay.remove_receipt(&effects.source_receipt.outpoint);

    // Todas as saídas (recipientes e taxa) são receipts M1
    for (vout, output) in tx.outputs.iter().enumerate() {
        overlay.add_receipt(M1Receipt {
            outpoint: OutPoint::new(*txid, vout as u32),
            amount: output.value,
            create_height: height,
        })?;
    }

    let undo = TransferUndoData {
        original_receipt: effects.source_receipt.clone(),
        num_m1_outputs: effects.num_m1_outputs,
    };
    overlay.batch_mut().write_transfer_undo(txid, &undo)?;
    Ok(())
}

/// Desfaz um TRANSFER_M1 num reorg a partir do registro `T|txid`.
///
/// # Errors
///
/// Retorna erro se o registro de undo estiver ausente
pub fn undo_transfer(
    txid: &Hash256,
    db: &SettlementDb,
    overlay: &mut SettlementOverlay,
) -> SettlementResult<()> {
    let undo = db.read_transfer_undo(txid)?.ok_or_else(|| {
        SettlementError::Chain(shared::BlockchainError::StateNotFound(format!(
            "transfer undo {txid}"
        )))
    })?;

    for vout in 0..undo.num_m1_outputs {
        overlay.remove_receipt(&OutPoint::new(*txid, vout));
    }
    overlay.add_receipt(undo.original_receipt.clone())?;

    overlay.batch_mut().erase_transfer_undo(txid);
    Ok(())
}

// ---- TX_MINT_M0BTC ----

/// Efeitos calculados de um MINT válido
#[derive(Debug, Clone)]
pub struct MintEffects {
    pub claim_ids: Vec<Hash256>,
    pub total_minted: Amount,
}

/// Valida um TX_MINT_M0BTC contra o índice de claims.
///
/// Cada claim referenciado precisa estar `mintable` na altura do bloco pai
/// e ser referenciado no máximo uma vez na cadeia (`used_in_block` cobre
/// referências de MINTs anteriores do mesmo bloco); as saídas pagam
/// exatamente os valores comprometidos aos destinos comprometidos.
///
/// # Errors
///
/// Rejeição de consenso com tag estável, ou falha de armazenamento
pub fn check_mint(
    tx: &NativeTransaction,
    claims: &BurnClaimStore,
    used_in_block: &BTreeSet<Hash256>,
) -> SettlementResult<MintEffects> {
    let TxType::MintM0Btc { claim_ids } = &tx.tx_type else {
        return Err(reject("bad-mint-type"));
    };

    if !tx.inputs.is_empty() {
        return Err(reject("bad-mint-has-inputs"));
    }
    if claim_ids.is_empty() {
        return Err(reject("bad-mint-no-claims"));
    }

    let mut seen: BTreeSet<Hash256> = BTreeSet::new();
    for id in claim_ids {
        if !seen.insert(*id) || used_in_block.contains(id) {
            return Err(reject("bad-claim-duplicate"));
        }
    }

    if tx.outputs.len() != claim_ids.len() {
        return Err(reject("bad-mint-output-count"));
    }

    let mut total: Amount = 0;
    for (id, output) in claim_ids.iter().zip(&tx.outputs) {
        let Some(claim) = claims.get_by_id(id)? else {
            return Err(reject_detail("bad-claim-not-mintable", format!("unknown claim {id}")));
        };
        if claim.status != ClaimStatus::Mintable {
            return Err(reject_detail(
                "bad-claim-not-mintable",
                format!("claim {id} is {}", claim.status.as_str()),
            ));
        }
        if output.value != claim.amount_sats {
            return Err(reject("bad-mint-amount-mismatch"));
        }

        let dest: [u8; 20] = claim.destination.as_slice().try_into().map_err(|_| {
            RejectionError::with_detail("bad-claim-destination", DOS_PROTOCOL, format!("claim {id}"))
        })?;
        if output.script_pubkey != script::destination_script(&dest) {
            return Err(reject("bad-mint-dest-mismatch"));
        }

        total = total
            .checked_add(claim.amount_sats)
            .ok_or_else(|| reject("bad-txns-txouttotal-toolarge"))?;
    }

    Ok(MintEffects {
        claim_ids: claim_ids.clone(),
        total_minted: total,
    })
}

/// Desfaz um MINT num reorg: reabre os claims consumidos
///
/// # Errors
///
/// Retorna erro se algum claim não puder ser reaberto
pub fn undo_mint(tx: &NativeTransaction, claims: &mut BurnClaimStore) -> SettlementResult<()> {
    let TxType::MintM0Btc { claim_ids } = &tx.tx_type else {
        return Ok(());
    };
    for id in claim_ids {
        claims.reopen_finalized(id)?;
    }
    Ok(())
}

// ---- Nível de bloco ----

/// Valida uma transação M0 comum contra a visão de moedas e os índices de
/// settlement (vaults só saem via UNLOCK; receipts, via seus caminhos
/// especiais).
fn check_ordinary(
    tx: &NativeTransaction,
    overlay: &SettlementOverlay,
    coins: &UtxoSet,
) -> SettlementResult<()> {
    let mut total_in: Amount = 0;
    for input in &tx.inputs {
        let outpoint = &input.previous_output;
        if overlay.get_vault(outpoint)?.is_some() || overlay.get_receipt(outpoint)?.is_some() {
            return Err(reject("bad-txns-spends-settlement"));
        }
        let Some(coin) = coins.get(outpoint) else {
            return Err(reject("bad-txns-inputs-missingorspent"));
        };
        total_in = total_in
            .checked_add(coin.output.value)
            .ok_or_else(|| reject("bad-txns-inputvalues-outofrange"))?;
    }

    let total_out = tx
        .total_output_value()
        .map_err(|_| reject("bad-txns-txouttotal-toolarge"))?;
    if total_in < total_out {
        return Err(reject("bad-txns-in-belowout"));
    }
    Ok(())
}

/// Atualiza a visão de moedas com o efeito de uma transação: inputs saem,
/// outputs entram como `(txid, vout)`.
fn update_coin_view(
    tx: &NativeTransaction,
    txid: &Hash256,
    height: u32,
    coins: &mut UtxoSet,
) -> SettlementResult<()> {
    for input in &tx.inputs {
        if coins.remove(&input.previous_output).is_none() {
            return Err(reject("bad-txns-inputs-missingorspent"));
        }
    }
    for (vout, output) in tx.outputs.iter().enumerate() {
        coins.add(
            OutPoint::new(*txid, vout as u32),
            crate::utxo::Utxo::new(output.clone(), height),
        );
    }
    Ok(())
}

/// Resultado da aplicação das transações de um bloco
#[derive(Debug, Clone)]
pub struct BlockApplyResult {
    /// Snapshot de settlement do bloco
    pub state: SettlementState,
    /// Claims consumidos por MINTs, a finalizar no índice de claims na
    /// etapa C3 da barreira de commit
    pub finalized_claims: Vec<Hash256>,
}

/// Aplica todas as transações de um bloco, em ordem, mantendo a visão de
/// moedas, e afirma as invariantes A5/A6 do snapshot resultante. As
/// mutações de settlement ficam acumuladas no overlay; as finalizações de
/// claims são devolvidas para a barreira aplicar depois do lote de C4.
///
/// `claims = None` é o modo de replay (reconstrução a partir da cadeia): o
/// índice de claims não é reconstruído por esse caminho, então um MINT
/// credita a oferta a partir das próprias saídas já validadas na conexão
/// original.
///
/// # Errors
///
/// Rejeição de consenso (da transação ofensora ou da invariante violada),
/// ou falha de armazenamento
pub fn process_special_txs(
    txs: &[NativeTransaction],
    height: u32,
    block_hash: Hash256,
    prev_state: &SettlementState,
    overlay: &mut SettlementOverlay,
    coins: &mut UtxoSet,
    claims: Option<&BurnClaimStore>,
    params: &ConsensusParams,
) -> SettlementResult<BlockApplyResult> {
    let mut state = SettlementState {
        height,
        block_hash,
        burnclaims_block: 0,
        ..prev_state.clone()
    };
    let mut finalized_claims: Vec<Hash256> = Vec::new();
    let mut used_claims: BTreeSet<Hash256> = BTreeSet::new();

    for tx in txs {
        let txid = tx.hash().map_err(SettlementError::Chain)?;
        match &tx.tx_type {
            TxType::Ordinary => check_ordinary(tx, overlay, coins)?,
            TxType::Lock => {
                let effects = check_lock(tx, overlay, coins)?;
                apply_lock(effects, &txid, height, overlay, &mut state)?;
            }
            TxType::Unlock => {
                let effects = check_unlock(tx, overlay, params)?;
                apply_unlock(&effects, &txid, height, overlay, &mut state)?;
            }
            TxType::TransferM1 => {
                let effects = check_transfer(tx, overlay, params)?;
                apply_transfer(&effects, tx, &txid, height, overlay)?;
            }
            TxType::MintM0Btc { .. } => match claims {
                Some(claims) => {
                    let effects = check_mint(tx, claims, &used_claims)?;
                    used_claims.extend(effects.claim_ids.iter().copied());
                    finalized_claims.extend(effects.claim_ids.iter().copied());
                    state.m0_total_supply += effects.total_minted;
                    state.burnclaims_block += effects.total_minted;
                }
                None => {
                    // Replay: as saídas já passaram pela validação estrita
                    let total = tx
                        .total_output_value()
                        .map_err(|_| reject("bad-txns-txouttotal-toolarge"))?;
                    state.m0_total_supply += total;
                    state.burnclaims_block += total;
                }
            },
        }
        update_coin_view(tx, &txid, height, coins)?;
    }

    // A5: conservação monetária bloco a bloco
    if !state.check_a5(prev_state) {
        error!(
            height,
            total = state.m0_total_supply,
            prev = prev_state.m0_total_supply,
            burns = state.burnclaims_block,
            "CRITICAL: A5 monetary conservation violated"
        );
        return Err(reject("settlement-a5-violation"));
    }

    // A6: lastro integral ao fim de cada bloco
    if !state.check_invariants() {
        error!(
            height,
            vaulted = state.m0_vaulted,
            m1 = state.m1_supply,
            "CRITICAL: A6 full backing violated"
        );
        return Err(reject("settlement-a6-violation"));
    }

    Ok(BlockApplyResult {
        state,
        finalized_claims,
    })
}

/// Desfaz as transações especiais de um bloco em ordem reversa, usando os
/// registros de undo persistidos.
///
/// # Errors
///
/// Retorna erro se algum registro de undo estiver ausente ou um claim não
/// puder ser reaberto
pub fn undo_special_txs(
    txs: &[NativeTransaction],
    db: &SettlementDb,
    overlay: &mut SettlementOverlay,
    claims: &mut BurnClaimStore,
) -> SettlementResult<()> {
    for tx in txs.iter().rev() {
        let txid = tx.hash().map_err(SettlementError::Chain)?;
        match &tx.tx_type {
            TxType::Ordinary => {}
            TxType::Lock => undo_lock(&txid, overlay),
            TxType::Unlock => undo_unlock(&txid, db, overlay)?,
            TxType::TransferM1 => undo_transfer(&txid, db, overlay)?,
            TxType::MintM0Btc { .. } => undo_mint(tx, claims)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxInput, TxOutput};
    use crate::utxo::Utxo;
    use shared::NetworkType;
    use tempfile::TempDir;

    fn params() -> ConsensusParams {
        ConsensusParams::for_network(NetworkType::Regtest)
    }

    fn open_db(dir: &TempDir) -> SettlementDb {
        SettlementDb::open(dir.path().to_str().unwrap()).unwrap()
    }

    fn dest_script(tag: u8) -> Vec<u8> {
        script::destination_script(&[tag; 20])
    }

    fn input(outpoint: OutPoint) -> TxInput {
        TxInput::new(outpoint, vec![1], 0)
    }

    /// LOCK canônico: vault(P) + receipt(P) + troco
    fn lock_tx(funding: OutPoint, locked: Amount, change: Amount) -> NativeTransaction {
        NativeTransaction::new(
            1,
            TxType::Lock,
            vec![input(funding)],
            vec![
                TxOutput::new(locked, script::push_true_script()),
                TxOutput::new(locked, dest_script(2)),
                TxOutput::new(change, dest_script(1)),
            ],
            0,
        )
    }

    /// Coin view com um único M0 de financiamento
    fn funding_coins(outpoint: OutPoint, value: Amount) -> UtxoSet {
        let mut coins = UtxoSet::new();
        coins.add(outpoint, Utxo::new(TxOutput::new(value, dest_script(1)), 1));
        coins
    }

    #[test]
    fn test_lock_check_apply_undo_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let funding = OutPoint::new(Hash256::keccak256(b"fund"), 0);
        let coins = funding_coins(funding, 100_000);

        // LOCK(P=40_000, troco 59_500, taxa implícita 500)
        let tx = lock_tx(funding, 40_000, 59_500);
        let txid = tx.hash().unwrap();
        let mut state = SettlementState::default();

        let mut overlay = SettlementOverlay::new(&db);
        let effects = check_lock(&tx, &overlay, &coins).unwrap();
        assert_eq!(effects.locked_amount, 40_000);
        apply_lock(effects, &txid, 5, &mut overlay, &mut state).unwrap();
        db.apply_batch(overlay.into_batch()).unwrap();

        assert_eq!(state.m0_vaulted, 40_000);
        assert_eq!(state.m1_supply, 40_000);
        let vault = db.read_vault(&OutPoint::new(txid, 0)).unwrap().unwrap();
        assert_eq!((vault.amount, vault.lock_height), (40_000, 5));
        let receipt = db.read_receipt(&OutPoint::new(txid, 1)).unwrap().unwrap();
        assert_eq!((receipt.amount, receipt.create_height), (40_000, 5));

        // Undo restaura os índices exatamente
        let mut overlay = SettlementOverlay::new(&db);
        undo_lock(&txid, &mut overlay);
        db.apply_batch(overlay.into_batch()).unwrap();
        assert!(db.read_vault(&OutPoint::new(txid, 0)).unwrap().is_none());
        assert!(db.read_receipt(&OutPoint::new(txid, 1)).unwrap().is_none());
    }

    #[test]
    fn test_lock_rejections() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let funding = OutPoint::new(Hash256::keccak256(b"fund"), 0);
        let coins = funding_coins(funding, 100_000);

        // vault sem push-TRUE
        let mut tx = lock_tx(funding, 40_000, 59_500);
        tx.outputs[0].script_pubkey = dest_script(9);
        let overlay = SettlementOverlay::new(&db);
        assert_eq!(
            check_lock(&tx, &overlay, &coins).unwrap_err().reject_code(),
            Some("bad-lock-vault-script")
        );

        // vault e receipt com valores divergentes
        let mut tx = lock_tx(funding, 40_000, 59_500);
        tx.outputs[1].value = 39_999;
        assert_eq!(
            check_lock(&tx, &overlay, &coins).unwrap_err().reject_code(),
            Some("bad-lock-amount-mismatch")
        );

        // Inputs insuficientes para 2P + troco
        let tx = lock_tx(funding, 40_000, 60_000);
        assert_eq!(
            check_lock(&tx, &overlay, &coins).unwrap_err().reject_code(),
            Some("bad-txns-in-belowout")
        );

        // Input inexistente na visão de moedas
        let tx = lock_tx(OutPoint::new(Hash256::keccak256(b"nada"), 0), 40_000, 10_000);
        assert_eq!(
            check_lock(&tx, &overlay, &coins).unwrap_err().reject_code(),
            Some("bad-txns-inputs-missingorspent")
        );

        // LOCK não pode gastar um receipt
        db.write_receipt(&M1Receipt {
            outpoint: funding,
            amount: 10,
            create_height: 1,
        })
        .unwrap();
        let tx = lock_tx(funding, 40_000, 59_500);
        let overlay = SettlementOverlay::new(&db);
        assert_eq!(
            check_lock(&tx, &overlay, &coins).unwrap_err().reject_code(),
            Some("bad-lock-spends-receipt")
        );
    }

    /// Monta o cenário de unlock parcial: vault(40k) + receipt(40k) no banco
    fn unlock_fixture(db: &mut SettlementDb) -> (OutPoint, OutPoint) {
        let vault_op = OutPoint::new(Hash256::keccak256(b"vault"), 0);
        let receipt_op = OutPoint::new(Hash256::keccak256(b"receipt"), 1);
        db.write_vault(&VaultEntry {
            outpoint: vault_op,
            amount: 40_000,
            lock_height: 5,
        })
        .unwrap();
        db.write_receipt(&M1Receipt {
            outpoint: receipt_op,
            amount: 40_000,
            create_height: 5,
        })
        .unwrap();
        (receipt_op, vault_op)
    }

    /// UNLOCK parcial canônico: 25k liberados, taxa 1k, trocos de 14k
    fn unlock_tx(receipt_op: OutPoint, vault_op: OutPoint) -> NativeTransaction {
        NativeTransaction::new(
            1,
            TxType::Unlock,
            vec![input(receipt_op), input(vault_op)],
            vec![
                TxOutput::new(25_000, dest_script(3)),
                TxOutput::new(14_000, dest_script(2)),
                TxOutput::new(1_000, script::push_true_script()),
                TxOutput::new(1_000, script::push_true_script()),
                TxOutput::new(14_000, script::push_true_script()),
            ],
            0,
        )
    }

    #[test]
    fn test_partial_unlock_scenario() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let (receipt_op, vault_op) = unlock_fixture(&mut db);

        let mut state = SettlementState {
            m0_vaulted: 40_000,
            m1_supply: 40_000,
            ..SettlementState::default()
        };

        let tx = unlock_tx(receipt_op, vault_op);
        let txid = tx.hash().unwrap();

        let mut overlay = SettlementOverlay::new(&db);
        let effects = check_unlock(&tx, &overlay, &params()).unwrap();
        assert_eq!(effects.m0_released, 25_000);
        assert_eq!(effects.receipt_change, 14_000);
        assert_eq!(effects.m1_fee, 1_000);
        assert_eq!(effects.vault_change, 14_000);
        assert_eq!(effects.fee_index, 2);

        apply_unlock(&effects, &txid, 8, &mut overlay, &mut state).unwrap();
        db.apply_batch(overlay.into_batch()).unwrap();

        // Escalares: vaulted cai 25k; m1 cai 25k (a taxa de 1k segue M1)
        assert_eq!(state.m0_vaulted, 15_000);
        assert_eq!(state.m1_supply, 15_000);
        assert!(state.check_invariants());

        // Índices: consumidos saem, troco/taxa/lastro entram
        assert!(db.read_receipt(&receipt_op).unwrap().is_none());
        assert!(db.read_vault(&vault_op).unwrap().is_none());
        assert_eq!(
            db.read_receipt(&OutPoint::new(txid, 1)).unwrap().unwrap().amount,
            14_000
        );
        assert_eq!(
            db.read_receipt(&OutPoint::new(txid, 2)).unwrap().unwrap().amount,
            1_000
        );
        assert_eq!(
            db.read_vault(&OutPoint::new(txid, 3)).unwrap().unwrap().amount,
            1_000
        );
        assert_eq!(
            db.read_vault(&OutPoint::new(txid, 4)).unwrap().unwrap().amount,
            14_000
        );

        // A soma dos receipts continua igual à oferta M1
        assert_eq!(db.total_receipt_amount().unwrap(), state.m1_supply);

        // Undo: restaura o estado dos índices bit a bit
        let mut overlay = SettlementOverlay::new(&db);
        undo_unlock(&txid, &db, &mut overlay).unwrap();
        db.apply_batch(overlay.into_batch()).unwrap();

        assert_eq!(db.read_receipt(&receipt_op).unwrap().unwrap().amount, 40_000);
        assert_eq!(db.read_vault(&vault_op).unwrap().unwrap().amount, 40_000);
        assert!(db.read_receipt(&OutPoint::new(txid, 1)).unwrap().is_none());
        assert!(db.read_receipt(&OutPoint::new(txid, 2)).unwrap().is_none());
        assert!(db.read_vault(&OutPoint::new(txid, 3)).unwrap().is_none());
        assert!(db.read_vault(&OutPoint::new(txid, 4)).unwrap().is_none());
        assert!(db.read_unlock_undo(&txid).unwrap().is_none());
    }

    #[test]
    fn test_unlock_fee_hardening() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let (receipt_op, vault_op) = unlock_fixture(&mut db);
        let overlay = SettlementOverlay::new(&db);
        let p = params();

        // Sem nenhuma saída push-TRUE: taxa ausente
        let mut tx = unlock_tx(receipt_op, vault_op);
        tx.outputs.truncate(2);
        assert_eq!(
            check_unlock(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-unlock-fee-missing")
        );

        // Taxa abaixo do piso
        let mut tx = unlock_tx(receipt_op, vault_op);
        tx.outputs[1].value = 14_990;
        tx.outputs[2].value = 10;
        tx.outputs[3].value = 10;
        tx.outputs[4].value = 14_990;
        assert_eq!(
            check_unlock(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-unlock-fee-too-low")
        );

        // Lastro da taxa com valor divergente
        let mut tx = unlock_tx(receipt_op, vault_op);
        tx.outputs[3].value = 999;
        assert_eq!(
            check_unlock(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-unlock-fee-backing-mismatch")
        );

        // Dois trocos de receipt deslocam a taxa do índice canônico
        let mut tx = unlock_tx(receipt_op, vault_op);
        tx.outputs.insert(2, TxOutput::new(1, dest_script(7)));
        assert_eq!(
            check_unlock(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-unlock-fee-index")
        );

        // vout[0] não pode ser push-TRUE
        let mut tx = unlock_tx(receipt_op, vault_op);
        tx.outputs[0].script_pubkey = script::push_true_script();
        assert_eq!(
            check_unlock(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-unlock-m0-script")
        );

        // Conservação M1 quebrada
        let mut tx = unlock_tx(receipt_op, vault_op);
        tx.outputs[0].value = 25_001;
        assert_eq!(
            check_unlock(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-unlock-m1-conservation")
        );

        // Input M0 é proibido (taxa é em M1)
        let mut tx = unlock_tx(receipt_op, vault_op);
        tx.inputs.push(input(OutPoint::new(Hash256::keccak256(b"m0"), 0)));
        assert_eq!(
            check_unlock(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-unlock-input-m0")
        );
    }

    /// TRANSFER split canônico: 10k → {4k, 3k, 2k} + taxa 1k
    fn split_tx(source: OutPoint) -> NativeTransaction {
        NativeTransaction::new(
            1,
            TxType::TransferM1,
            vec![input(source)],
            vec![
                TxOutput::new(4_000, dest_script(4)),
                TxOutput::new(3_000, dest_script(5)),
                TxOutput::new(2_000, dest_script(6)),
                TxOutput::new(1_000, script::push_true_script()),
            ],
            0,
        )
    }

    #[test]
    fn test_transfer_split_scenario() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let source = OutPoint::new(Hash256::keccak256(b"fonte"), 0);
        db.write_receipt(&M1Receipt {
            outpoint: source,
            amount: 10_000,
            create_height: 3,
        })
        .unwrap();

        let tx = split_tx(source);
        let txid = tx.hash().unwrap();

        let mut overlay = SettlementOverlay::new(&db);
        let effects = check_transfer(&tx, &overlay, &params()).unwrap();
        assert_eq!(effects.m1_fee, 1_000);
        assert_eq!(effects.num_m1_outputs, 4);

        apply_transfer(&effects, &tx, &txid, 9, &mut overlay).unwrap();
        db.apply_batch(overlay.into_batch()).unwrap();

        // Fonte consumida; quatro novos receipts (recipientes + taxa)
        assert!(db.read_receipt(&source).unwrap().is_none());
        for (vout, expected) in [(0u32, 4_000), (1, 3_000), (2, 2_000), (3, 1_000)] {
            assert_eq!(
                db.read_receipt(&OutPoint::new(txid, vout)).unwrap().unwrap().amount,
                expected
            );
        }
        // Oferta M1 inalterada (redistribuição + taxa)
        assert_eq!(db.total_receipt_amount().unwrap(), 10_000);

        // Undo restaura a fonte e remove as saídas
        let mut overlay = SettlementOverlay::new(&db);
        undo_transfer(&txid, &db, &mut overlay).unwrap();
        db.apply_batch(overlay.into_batch()).unwrap();
        assert_eq!(db.read_receipt(&source).unwrap().unwrap().amount, 10_000);
        for vout in 0..4u32 {
            assert!(db.read_receipt(&OutPoint::new(txid, vout)).unwrap().is_none());
        }
        assert!(db.read_transfer_undo(&txid).unwrap().is_none());
    }

    #[test]
    fn test_transfer_rejections() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let source = OutPoint::new(Hash256::keccak256(b"fonte"), 0);
        db.write_receipt(&M1Receipt {
            outpoint: source,
            amount: 10_000,
            create_height: 3,
        })
        .unwrap();
        let overlay = SettlementOverlay::new(&db);
        let p = params();

        // Input que não é receipt
        let tx = split_tx(OutPoint::new(Hash256::keccak256(b"outro"), 0));
        assert_eq!(
            check_transfer(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-txtransfer-not-receipt")
        );

        // Conservação quebrada
        let mut tx = split_tx(source);
        tx.outputs[0].value = 4_001;
        assert_eq!(
            check_transfer(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-txtransfer-conservation")
        );

        // Taxa ausente na cauda
        let mut tx = split_tx(source);
        tx.outputs[3] = TxOutput::new(1_000, dest_script(8));
        assert_eq!(
            check_transfer(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-txtransfer-fee-missing")
        );

        // Recipiente com push-TRUE (taxa fora do índice canônico)
        let mut tx = split_tx(source);
        tx.outputs[1].script_pubkey = script::push_true_script();
        assert_eq!(
            check_transfer(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-txtransfer-fee-index")
        );

        // Script de taxa quase-push-TRUE
        let mut tx = split_tx(source);
        tx.outputs[3].script_pubkey = vec![script::OP_TRUE, 0x00];
        assert_eq!(
            check_transfer(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-txtransfer-fee-script")
        );

        // Mais de um input
        let mut tx = split_tx(source);
        tx.inputs.push(input(OutPoint::new(Hash256::keccak256(b"x"), 0)));
        assert_eq!(
            check_transfer(&tx, &overlay, &p).unwrap_err().reject_code(),
            Some("bad-txtransfer-input-count")
        );
    }

    #[test]
    fn test_intra_block_chaining_through_overlay() {
        // LOCK cria um receipt que um TRANSFER do MESMO bloco gasta
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let funding = OutPoint::new(Hash256::keccak256(b"fund"), 0);
        let coins = funding_coins(funding, 100_000);

        let lock = lock_tx(funding, 10_000, 79_500);
        let lock_txid = lock.hash().unwrap();
        let mut state = SettlementState::default();

        let mut overlay = SettlementOverlay::new(&db);
        let effects = check_lock(&lock, &overlay, &coins).unwrap();
        apply_lock(effects, &lock_txid, 5, &mut overlay, &mut state).unwrap();

        // O receipt (lock_txid, 1) ainda não está no banco, só no overlay
        let transfer = split_tx(OutPoint::new(lock_txid, 1));
        let effects = check_transfer(&transfer, &overlay, &params()).unwrap();
        assert_eq!(effects.source_receipt.amount, 10_000);

        let transfer_txid = transfer.hash().unwrap();
        apply_transfer(&effects, &transfer, &transfer_txid, 5, &mut overlay).unwrap();
        db.apply_batch(overlay.into_batch()).unwrap();

        assert!(db.read_receipt(&OutPoint::new(lock_txid, 1)).unwrap().is_none());
        assert_eq!(db.total_receipt_amount().unwrap(), 10_000);
        assert_eq!(state.m1_supply, 10_000);
    }

    #[test]
    fn test_mint_rejections_without_claims() {
        let dir = TempDir::new().unwrap();
        let claims_dir = TempDir::new().unwrap();
        let _db = open_db(&dir);
        let claims = BurnClaimStore::open(claims_dir.path().to_str().unwrap()).unwrap();

        let no_used = BTreeSet::new();

        // Claim desconhecido
        let tx = NativeTransaction::new(
            1,
            TxType::MintM0Btc {
                claim_ids: vec![Hash256::keccak256(b"claim")],
            },
            vec![],
            vec![TxOutput::new(40_000, dest_script(7))],
            0,
        );
        assert_eq!(
            check_mint(&tx, &claims, &no_used).unwrap_err().reject_code(),
            Some("bad-claim-not-mintable")
        );

        // Sem claims referenciados
        let mut tx2 = tx.clone();
        tx2.tx_type = TxType::MintM0Btc { claim_ids: vec![] };
        assert_eq!(
            check_mint(&tx2, &claims, &no_used).unwrap_err().reject_code(),
            Some("bad-mint-no-claims")
        );

        // MINT não tem inputs de settlement
        let mut tx3 = tx.clone();
        tx3.inputs.push(input(OutPoint::new(Hash256::keccak256(b"i"), 0)));
        assert_eq!(
            check_mint(&tx3, &claims, &no_used).unwrap_err().reject_code(),
            Some("bad-mint-has-inputs")
        );

        // Claim referenciado duas vezes
        let id = Hash256::keccak256(b"claim");
        let mut tx4 = tx.clone();
        tx4.tx_type = TxType::MintM0Btc {
            claim_ids: vec![id, id],
        };
        tx4.outputs.push(TxOutput::new(40_000, dest_script(7)));
        assert_eq!(
            check_mint(&tx4, &claims, &no_used).unwrap_err().reject_code(),
            Some("bad-claim-duplicate")
        );

        // Claim já usado por um MINT anterior do mesmo bloco
        let used: BTreeSet<Hash256> = [id].into_iter().collect();
        assert_eq!(
            check_mint(&tx, &claims, &used).unwrap_err().reject_code(),
            Some("bad-claim-duplicate")
        );
    }
}
