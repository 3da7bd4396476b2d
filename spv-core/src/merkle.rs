//! Verificação de provas de inclusão Merkle da cadeia externa
//!
//! A verificação tenta ambas as ordens de bytes: ferramentas externas
//! frequentemente emitem hashes na forma de exibição (invertida), então a
//! falha na ordem natural dispara novas tentativas com txid e/ou nós da
//! prova invertidos. A matriz de tentativas, em ordem:
//!
//! 1. txid interno + prova interna (o que um parser de merkleblock produz)
//! 2. txid invertido + prova invertida (copiado de um explorador)
//! 3. txid interno + prova invertida (txid computado, prova colada)
//!
//! Um único ramo bem-sucedido vence; uma colisão acidental com bytes
//! invertidos exigiria encontrar uma segunda pré-imagem de double-SHA256.

use shared::Hash256;

/// Profundidade máxima de prova aceita (2^30 transações por bloco)
pub const MAX_PROOF_DEPTH: usize = 30;

/// Reconstrução pura da raiz: em cada passo o nó corrente combina com o
/// irmão à esquerda ou à direita conforme a paridade do índice
fn verify_path(txid: &Hash256, merkle_root: &Hash256, proof: &[Hash256], tx_index: u32) -> bool {
    let mut current = *txid;
    let mut idx = tx_index;

    for sibling in proof {
        let mut data = [0u8; 64];
        if idx & 1 == 1 {
            // Nó corrente é filho direito: hash(irmão || corrente)
            data[..32].copy_from_slice(sibling.as_bytes());
            data[32..].copy_from_slice(current.as_bytes());
        } else {
            // Nó corrente é filho esquerdo: hash(corrente || irmão)
            data[..32].copy_from_slice(current.as_bytes());
            data[32..].copy_from_slice(sibling.as_bytes());
        }
        current = Hash256::sha256d(&data);
        idx >>= 1;
    }

    current == *merkle_root
}

/// Verifica uma prova de inclusão sob a raiz de um cabeçalho armazenado.
///
/// Limites de sanidade: profundidade máxima 30 e `tx_index < 2^prova.len()`.
#[must_use]
pub fn verify_merkle_proof(
    txid: &Hash256,
    merkle_root: &Hash256,
    proof: &[Hash256],
    tx_index: u32,
) -> bool {
    if proof.len() > MAX_PROOF_DEPTH {
        tracing::debug!(len = proof.len(), "merkle proof too long");
        return false;
    }

    if !proof.is_empty() && u64::from(tx_index) >= (1u64 << proof.len()) {
        tracing::debug!(tx_index, len = proof.len(), "tx_index out of range for proof");
        return false;
    }

    // Tentativa 1: ordem natural (interna)
    if verify_path(txid, merkle_root, proof, tx_index) {
        return true;
    }

    // Tentativa 2: txid e prova na forma de exibição
    let reversed_proof: Vec<Hash256> = proof.iter().map(Hash256::reversed).collect();
    if verify_path(&txid.reversed(), merkle_root, &reversed_proof, tx_index) {
        tracing::debug!("merkle proof accepted with reversed (display) encoding");
        return true;
    }

    // Tentativa 3: txid correto, só a prova na forma de exibição
    if verify_path(txid, merkle_root, &reversed_proof, tx_index) {
        tracing::debug!("merkle proof accepted with mixed encoding (internal txid, display proof)");
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Constrói uma árvore merkle real e devolve (raiz, prova, índice) da folha pedida
    fn build_tree(leaves: &[Hash256], target: usize) -> (Hash256, Vec<Hash256>, u32) {
        let mut level: Vec<Hash256> = leaves.to_vec();
        let mut proof = Vec::new();
        let mut idx = target;

        while level.len() > 1 {
            if level.len() % 2 == 1 {
                // Nível ímpar: o último nó duplica consigo mesmo
                level.push(*level.last().unwrap());
            }

            let sibling = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            proof.push(level[sibling]);

            let mut next = Vec::new();
            for pair in level.chunks(2) {
                let mut data = [0u8; 64];
                data[..32].copy_from_slice(pair[0].as_bytes());
                data[32..].copy_from_slice(pair[1].as_bytes());
                next.push(Hash256::sha256d(&data));
            }
            level = next;
            idx /= 2;
        }

        (level[0], proof, target as u32)
    }

    fn leaves(n: usize) -> Vec<Hash256> {
        (0..n)
            .map(|i| Hash256::sha256d(format!("tx-{i}").as_bytes()))
            .collect()
    }

    #[test]
    fn test_proof_verifies_for_every_leaf() {
        let txs = leaves(7);
        for (i, txid) in txs.iter().enumerate() {
            let (root, proof, index) = build_tree(&txs, i);
            assert!(verify_merkle_proof(txid, &root, &proof, index), "leaf {i}");
        }
    }

    #[test]
    fn test_proof_rejects_wrong_leaf() {
        let txs = leaves(4);
        let (root, proof, index) = build_tree(&txs, 1);
        let intruder = Hash256::sha256d(b"not-in-tree");
        assert!(!verify_merkle_proof(&intruder, &root, &proof, index));
    }

    #[test]
    fn test_proof_rejects_wrong_index() {
        let txs = leaves(4);
        let (root, proof, _) = build_tree(&txs, 1);
        assert!(!verify_merkle_proof(&txs[1], &root, &proof, 2));
    }

    #[test]
    fn test_single_tx_block_empty_proof() {
        let txid = Hash256::sha256d(b"unico");
        assert!(verify_merkle_proof(&txid, &txid, &[], 0));
    }

    #[test]
    fn test_display_encoding_accepted() {
        let txs = leaves(8);
        let (root, proof, index) = build_tree(&txs, 3);

        // txid e prova invertidos (como copiados de um explorador)
        let display_txid = txs[3].reversed();
        let display_proof: Vec<Hash256> = proof.iter().map(Hash256::reversed).collect();
        assert!(verify_merkle_proof(&display_txid, &root, &display_proof, index));

        // Misto: txid interno, prova invertida
        assert!(verify_merkle_proof(&txs[3], &root, &display_proof, index));
    }

    #[test]
    fn test_proof_depth_bound() {
        let txid = Hash256::sha256d(b"deep");
        let proof_30 = vec![Hash256::zero(); MAX_PROOF_DEPTH];
        let proof_31 = vec![Hash256::zero(); MAX_PROOF_DEPTH + 1];

        // Profundidade 30 entra no caminho de verificação (falha por raiz
        // errada, não por limite); 31 é rejeitada de cara
        assert!(!verify_merkle_proof(&txid, &Hash256::zero(), &proof_30, 0));
        assert!(!verify_merkle_proof(&txid, &Hash256::zero(), &proof_31, 0));

        // Na profundidade exata 30 uma árvore real ainda verifica
        let txs = leaves(2);
        let (root, proof, index) = build_tree(&txs, 0);
        assert!(proof.len() <= MAX_PROOF_DEPTH);
        assert!(verify_merkle_proof(&txs[0], &root, &proof, index));
    }

    #[test]
    fn test_index_range_bound() {
        let txs = leaves(4);
        let (root, proof, _) = build_tree(&txs, 0);
        // proof.len() == 2, então índices >= 4 são rejeitados
        assert!(!verify_merkle_proof(&txs[0], &root, &proof, 4));
    }
}
