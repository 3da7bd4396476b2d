//! Seleção determinística de produtor de bloco
//!
//! Eleição de líder por pontuação sobre a lista de masternodes, com
//! fallback por slot de tempo. Uso simétrico: o escalonador calcula o slot
//! a partir do relógio para decidir quando assinar; o verificador calcula o
//! MESMO slot a partir do `time` do próprio bloco para escolher o assinante
//! esperado. Decisões idênticas, sem acoplamento a tempo de rede na
//! verificação.

use crate::error::{RejectionError, DOS_MAX, DOS_PROTOCOL};
use crate::params::ConsensusParams;
use serde::{Deserialize, Serialize};
use shared::{verify_block_signature, Hash256, PublicKey, Timestamp};
use std::collections::BTreeMap;

/// Entrada de masternode na lista determinística.
///
/// Estruturas compartilhadas por ponteiro na origem viram arena plana
/// indexada por `protx_hash`; referências cruzadas são IDs opacos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeEntry {
    pub protx_hash: Hash256,
    pub operator_pubkey: PublicKey,
    pub registered_height: u32,
    /// Hash de confirmação; `None` enquanto não confirmado
    pub confirmed_hash: Option<Hash256>,
    pub pose_banned: bool,
}

impl MasternodeEntry {
    /// Elegibilidade para produzir: não banido por PoSe e confirmado, OU
    /// registrado dentro da janela de bootstrap (masternodes de gênese
    /// precisam produzir antes de poderem ser confirmados)
    #[must_use]
    pub fn is_eligible(&self, bootstrap_height: u32) -> bool {
        if self.pose_banned {
            return false;
        }
        self.confirmed_hash.is_some() || self.registered_height <= bootstrap_height
    }
}

/// Arena de masternodes indexada por `protx_hash`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasternodeList {
    entries: BTreeMap<Hash256, MasternodeEntry>,
}

impl MasternodeList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insere ou substitui uma entrada
    pub fn add(&mut self, entry: MasternodeEntry) {
        self.entries.insert(entry.protx_hash, entry);
    }

    /// Remove uma entrada
    pub fn remove(&mut self, protx_hash: &Hash256) -> Option<MasternodeEntry> {
        self.entries.remove(protx_hash)
    }

    /// Busca por `protx_hash`
    #[must_use]
    pub fn get(&self, protx_hash: &Hash256) -> Option<&MasternodeEntry> {
        self.entries.get(protx_hash)
    }

    /// Marca um masternode como banido por PoSe
    pub fn set_pose_banned(&mut self, protx_hash: &Hash256, banned: bool) {
        if let Some(entry) = self.entries.get_mut(protx_hash) {
            entry.pose_banned = banned;
        }
    }

    /// Número total de entradas
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iteração em ordem de `protx_hash`
    pub fn iter(&self) -> impl Iterator<Item = &MasternodeEntry> {
        self.entries.values()
    }
}

/// Pontuação de um masternode para o próximo bloco:
/// `SHA256(prev_hash || altura LE || protx_hash)` como inteiro de 256 bits
#[must_use]
pub fn compute_block_score(prev_hash: &Hash256, height: u32, protx_hash: &Hash256) -> Hash256 {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(prev_hash.as_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(protx_hash.as_bytes());
    Hash256::sha256(&data)
}

/// Lista pontuada de produtores elegíveis para o bloco em `next_height`,
/// ordenada por `(pontuação DESC, protx_hash ASC)`. Slot 0 é o primário.
#[must_use]
pub fn calculate_producer_scores(
    prev_hash: &Hash256,
    next_height: u32,
    list: &MasternodeList,
    params: &ConsensusParams,
) -> Vec<(Hash256, MasternodeEntry)> {
    let mut scores: Vec<(Hash256, MasternodeEntry)> = list
        .iter()
        .filter(|mn| mn.is_eligible(params.dmm_bootstrap_height))
        .map(|mn| {
            (
                compute_block_score(prev_hash, next_height, &mn.protx_hash),
                mn.clone(),
            )
        })
        .collect();

    scores.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| a.1.protx_hash.cmp(&b.1.protx_hash))
    });
    scores
}

/// Deriva o slot de produtor a partir do timestamp do bloco.
///
/// Função pura sobre dados do bloco (determinismo de consenso):
/// - Bootstrap (`next_height <= dmm_bootstrap_height`): slot 0 incondicional
/// - `min_time = prev_time + target_spacing`; `dt = block_time - min_time`
/// - `dt < 0` ou dentro da janela do líder: slot 0
/// - Senão `slot = 1 + (dt - leader_timeout) / fallback_window`, grampeado
///   em `max_fallback_slots`
#[must_use]
pub fn producer_slot(
    params: &ConsensusParams,
    next_height: u32,
    prev_time: Timestamp,
    block_time: Timestamp,
) -> i64 {
    if next_height <= params.dmm_bootstrap_height {
        return 0;
    }

    let min_block_time = prev_time + params.target_spacing;
    let dt = block_time - min_block_time;

    // Blocos ligeiramente adiantados por deriva de relógio contam como primário
    if dt < 0 || dt < params.leader_timeout_seconds {
        return 0;
    }

    let extra = dt - params.leader_timeout_seconds;
    let slot = 1 + extra / params.fallback_window_seconds;
    slot.min(params.max_fallback_slots)
}

/// Produtor esperado para um bloco: `scores[slot % len]`.
///
/// Devolve também o índice efetivo do produtor na lista pontuada.
#[must_use]
pub fn expected_producer(
    params: &ConsensusParams,
    prev_hash: &Hash256,
    prev_time: Timestamp,
    next_height: u32,
    block_time: Timestamp,
    list: &MasternodeList,
) -> Option<(MasternodeEntry, usize)> {
    let scores = calculate_producer_scores(prev_hash, next_height, list, params);
    if scores.is_empty() {
        return None;
    }

    let slot = producer_slot(params, next_height, prev_time, block_time);
    let index = (slot as usize) % scores.len();
    Some((scores[index].1.clone(), index))
}

/// Resultado de uma verificação de produtor bem-sucedida
#[derive(Debug, Clone)]
pub struct ProducerVerification {
    /// `protx_hash` do produtor que assinou
    pub producer: Hash256,
    /// Índice do produtor na lista pontuada (0 = primário)
    pub producer_index: usize,
    /// Produtores pulados (`scores[0..index]`), para penalidade de PoSe
    pub skipped: Vec<Hash256>,
}

/// Verifica a assinatura do produtor de um bloco contra o produtor esperado.
///
/// O mesmo cálculo de slot do escalonador é aplicado ao `time` do bloco.
/// Timestamps mais de `max_future_block_time` no futuro são rejeitados:
/// um timestamp futuro manipularia a rotação de fallback a favor de um
/// masternode controlado pelo atacante.
///
/// # Errors
///
/// Rejeição com tag estável `bad-mn-*` e pontuação DoS
pub fn verify_block_producer(
    params: &ConsensusParams,
    list: &MasternodeList,
    prev_hash: &Hash256,
    prev_time: Timestamp,
    next_height: u32,
    block_time: Timestamp,
    block_hash: &Hash256,
    signature: &[u8],
    now: Timestamp,
) -> Result<ProducerVerification, RejectionError> {
    if block_time > now + params.max_future_block_time {
        return Err(RejectionError::with_detail(
            "bad-mn-time-future",
            DOS_PROTOCOL,
            format!(
                "block time {block_time} too far in future (now {now}, max +{})",
                params.max_future_block_time
            ),
        ));
    }

    if signature.is_empty() {
        return Err(RejectionError::new("bad-mn-sig-empty", DOS_MAX));
    }
    if signature.len() < shared::MIN_BLOCK_SIG_SIZE || signature.len() > shared::MAX_BLOCK_SIG_SIZE
    {
        return Err(RejectionError::with_detail(
            "bad-mn-sig-size",
            DOS_MAX,
            format!("sig size {}", signature.len()),
        ));
    }

    let scores = calculate_producer_scores(prev_hash, next_height, list, params);
    if scores.is_empty() {
        return Err(RejectionError::with_detail(
            "bad-mn-no-producers",
            DOS_MAX,
            "no eligible masternodes for block production",
        ));
    }

    let slot = producer_slot(params, next_height, prev_time, block_time);
    let producer_index = (slot as usize) % scores.len();
    let expected = &scores[producer_index].1;

    if verify_block_signature(&expected.operator_pubkey, block_hash, signature).is_err() {
        return Err(RejectionError::with_detail(
            "bad-mn-sig-verify",
            DOS_MAX,
            format!(
                "expected producer #{producer_index}: {}",
                expected.protx_hash
            ),
        ));
    }

    // Fallback usado: coleciona os masternodes pulados para penalidade PoSe
    let skipped = scores[..producer_index]
        .iter()
        .map(|(_, mn)| mn.protx_hash)
        .collect();

    Ok(ProducerVerification {
        producer: expected.protx_hash,
        producer_index,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{sign_block_hash, KeyPair, NetworkType};

    fn params() -> ConsensusParams {
        let mut p = ConsensusParams::for_network(NetworkType::Mainnet);
        // Bootstrap curto para os testes exercitarem o caminho pós-bootstrap
        p.dmm_bootstrap_height = 2;
        p
    }

    fn mn(tag: &[u8], keypair: &KeyPair, confirmed: bool) -> MasternodeEntry {
        MasternodeEntry {
            protx_hash: Hash256::keccak256(tag),
            operator_pubkey: keypair.public_key.clone(),
            registered_height: 100,
            confirmed_hash: confirmed.then(|| Hash256::keccak256(b"conf")),
            pose_banned: false,
        }
    }

    fn three_mns() -> (MasternodeList, Vec<KeyPair>) {
        let mut list = MasternodeList::new();
        let mut keys = Vec::new();
        for tag in [b"mn1".as_slice(), b"mn2", b"mn3"] {
            let keypair = KeyPair::generate();
            list.add(mn(tag, &keypair, true));
            keys.push(keypair);
        }
        (list, keys)
    }

    #[test]
    fn test_scores_are_deterministic_and_sorted() {
        let (list, _) = three_mns();
        let prev = Hash256::keccak256(b"prev");
        let p = params();

        let scores1 = calculate_producer_scores(&prev, 10, &list, &p);
        let scores2 = calculate_producer_scores(&prev, 10, &list, &p);
        assert_eq!(scores1.len(), 3);
        assert_eq!(
            scores1.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
            scores2.iter().map(|(s, _)| *s).collect::<Vec<_>>()
        );

        // Ordenação decrescente por pontuação
        for pair in scores1.windows(2) {
            assert!(pair[0].0 >= pair[1].0);
        }

        // Alturas distintas embaralham a lista (a pontuação muda)
        let other = calculate_producer_scores(&prev, 11, &list, &p);
        assert_ne!(
            scores1.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
            other.iter().map(|(s, _)| *s).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_eligibility_rules() {
        let p = params();
        let keypair = KeyPair::generate();

        // Banido nunca é elegível
        let mut banned = mn(b"banned", &keypair, true);
        banned.pose_banned = true;
        assert!(!banned.is_eligible(p.dmm_bootstrap_height));

        // Não confirmado fora do bootstrap é inelegível
        let unconfirmed = mn(b"unconf", &keypair, false);
        assert!(!unconfirmed.is_eligible(p.dmm_bootstrap_height));

        // Não confirmado registrado no bootstrap é elegível
        let mut bootstrap_mn = mn(b"boot", &keypair, false);
        bootstrap_mn.registered_height = 1;
        assert!(bootstrap_mn.is_eligible(p.dmm_bootstrap_height));
    }

    #[test]
    fn test_slot_derivation_boundaries() {
        let p = params();
        let prev_time = 1_000_000;
        let min_time = prev_time + p.target_spacing;

        // Bootstrap: slot 0 incondicional
        assert_eq!(producer_slot(&p, 1, prev_time, min_time + 10_000), 0);

        // Bloco adiantado (dt < 0): slot 0
        assert_eq!(producer_slot(&p, 100, prev_time, min_time - 30), 0);

        // Dentro da janela do líder: slot 0
        assert_eq!(producer_slot(&p, 100, prev_time, min_time), 0);
        assert_eq!(
            producer_slot(&p, 100, prev_time, min_time + p.leader_timeout_seconds - 1),
            0
        );

        // Virada exata para o slot 1 em dt == leader_timeout
        assert_eq!(
            producer_slot(&p, 100, prev_time, min_time + p.leader_timeout_seconds),
            1
        );

        // Slot 2 após a primeira janela de fallback
        assert_eq!(
            producer_slot(
                &p,
                100,
                prev_time,
                min_time + p.leader_timeout_seconds + p.fallback_window_seconds
            ),
            2
        );

        // Grampeado no teto
        assert_eq!(
            producer_slot(&p, 100, prev_time, min_time + 1_000_000_000),
            p.max_fallback_slots
        );
    }

    #[test]
    fn test_expected_producer_wraps_by_slot() {
        let (list, _) = three_mns();
        let p = params();
        let prev = Hash256::keccak256(b"prev");
        let prev_time = 1_000_000;
        let min_time = prev_time + p.target_spacing;

        let (primary, index) =
            expected_producer(&p, &prev, prev_time, 100, min_time, &list).unwrap();
        assert_eq!(index, 0);

        // Slot 3 com 3 masternodes volta ao primário (módulo)
        let t_slot3 = min_time + p.leader_timeout_seconds + 2 * p.fallback_window_seconds;
        let (wrapped, index) =
            expected_producer(&p, &prev, prev_time, 100, t_slot3, &list).unwrap();
        assert_eq!(index, 0);
        assert_eq!(wrapped.protx_hash, primary.protx_hash);
    }

    #[test]
    fn test_producer_fallback_scenario() {
        // Lista pontuada [M1, M2, M3]; bloco em slot 1 → produtor esperado M2;
        // assinatura de M1 é rejeitada com bad-mn-sig-verify
        let (list, keys) = three_mns();
        let p = params();
        let prev = Hash256::keccak256(b"prev");
        let prev_time = 1_000_000;
        let block_time = prev_time + p.target_spacing + p.leader_timeout_seconds + 5;
        let block_hash = Hash256::keccak256(b"bloco");
        let now = block_time;

        let scores = calculate_producer_scores(&prev, 100, &list, &p);
        let slot = producer_slot(&p, 100, prev_time, block_time);
        assert_eq!(slot, 1);
        let expected = &scores[1].1;
        let primary = &scores[0].1;

        let key_of = |mn: &MasternodeEntry| {
            keys.iter()
                .find(|k| k.public_key == mn.operator_pubkey)
                .unwrap()
        };

        // Assinatura do produtor esperado (fallback #1) passa e reporta o pulado
        let sig = sign_block_hash(&key_of(expected).private_key, &block_hash).unwrap();
        let result = verify_block_producer(
            &p, &list, &prev, prev_time, 100, block_time, &block_hash,
            sig.as_bytes(), now,
        )
        .unwrap();
        assert_eq!(result.producer, expected.protx_hash);
        assert_eq!(result.producer_index, 1);
        assert_eq!(result.skipped, vec![primary.protx_hash]);

        // Assinatura do primário neste mesmo bloco é rejeitada
        let wrong_sig = sign_block_hash(&key_of(primary).private_key, &block_hash).unwrap();
        let err = verify_block_producer(
            &p, &list, &prev, prev_time, 100, block_time, &block_hash,
            wrong_sig.as_bytes(), now,
        )
        .unwrap_err();
        assert_eq!(err.code, "bad-mn-sig-verify");
    }

    #[test]
    fn test_verify_rejections() {
        let (list, keys) = three_mns();
        let p = params();
        let prev = Hash256::keccak256(b"prev");
        let prev_time = 1_000_000;
        let block_time = prev_time + p.target_spacing;
        let block_hash = Hash256::keccak256(b"bloco");

        // Timestamp futuro demais (ataque à rotação de fallback)
        let sig = sign_block_hash(&keys[0].private_key, &block_hash).unwrap();
        let err = verify_block_producer(
            &p, &list, &prev, prev_time, 100,
            block_time + 10_000, &block_hash, sig.as_bytes(), block_time,
        )
        .unwrap_err();
        assert_eq!(err.code, "bad-mn-time-future");

        // Assinatura ausente
        let err = verify_block_producer(
            &p, &list, &prev, prev_time, 100, block_time, &block_hash, &[], block_time,
        )
        .unwrap_err();
        assert_eq!(err.code, "bad-mn-sig-empty");

        // Tamanho fora da janela DER
        let err = verify_block_producer(
            &p, &list, &prev, prev_time, 100, block_time, &block_hash,
            &[0u8; 80], block_time,
        )
        .unwrap_err();
        assert_eq!(err.code, "bad-mn-sig-size");

        // Lista vazia de produtores
        let empty = MasternodeList::new();
        let err = verify_block_producer(
            &p, &empty, &prev, prev_time, 100, block_time, &block_hash,
            sig.as_bytes(), block_time,
        )
        .unwrap_err();
        assert_eq!(err.code, "bad-mn-no-producers");
    }
}
