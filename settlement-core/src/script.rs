//! Templates de script da camada de settlement
//!
//! A interpretação geral de scripts fica fora do núcleo; aqui vivem apenas
//! os dois templates que o consenso de settlement reconhece:
//!
//! - *Script de vault*: o byte único push-TRUE. Qualquer-um-pode-gastar no
//!   nível de script; a regra de consenso restringe o gasto a TX_UNLOCK.
//!   Um UTXO com esse script é vault sse registrado no banco de settlement
//!   (o banco é autoritativo).
//! - *Script de endereço*: P2PKH ordinário sobre hash de 20 bytes, usado
//!   por receipts e saídas M0 comuns.

use shared::{BlockchainError, Result};

/// Opcode push-TRUE (script de vault)
pub const OP_TRUE: u8 = 0x51;

/// Duplica o topo da pilha
pub const OP_DUP: u8 = 0x76;

/// Keccak-256 do topo da pilha
pub const OP_HASH256: u8 = 0xaa;

/// Igualdade com verify
pub const OP_EQUALVERIFY: u8 = 0x88;

/// Verificação de assinatura
pub const OP_CHECKSIG: u8 = 0xac;

/// Tamanho do hash de destinatário embutido em scripts de endereço
pub const DEST_HASH_SIZE: usize = 20;

/// Script de vault: o byte único push-TRUE
#[must_use]
pub fn push_true_script() -> Vec<u8> {
    vec![OP_TRUE]
}

/// Verifica se um script é exatamente o push-TRUE de vault
#[must_use]
pub fn is_push_true(script: &[u8]) -> bool {
    script.len() == 1 && script[0] == OP_TRUE
}

/// Script de endereço (P2PKH): `DUP HASH256 <hash20> EQUALVERIFY CHECKSIG`
#[must_use]
pub fn destination_script(dest_hash: &[u8; DEST_HASH_SIZE]) -> Vec<u8> {
    let mut script = Vec::with_capacity(3 + DEST_HASH_SIZE + 2);
    script.push(OP_DUP);
    script.push(OP_HASH256);
    script.push(DEST_HASH_SIZE as u8);
    script.extend_from_slice(dest_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Extrai o hash de destinatário de um script de endereço
///
/// # Errors
///
/// Retorna erro se o script não tiver o formato de endereço
pub fn script_destination(script: &[u8]) -> Result<[u8; DEST_HASH_SIZE]> {
    if script.len() != 3 + DEST_HASH_SIZE + 2
        || script[0] != OP_DUP
        || script[1] != OP_HASH256
        || script[2] != DEST_HASH_SIZE as u8
        || script[3 + DEST_HASH_SIZE] != OP_EQUALVERIFY
        || script[4 + DEST_HASH_SIZE] != OP_CHECKSIG
    {
        return Err(BlockchainError::InvalidTransaction(
            "script is not a destination template".to_string(),
        ));
    }

    let mut dest = [0u8; DEST_HASH_SIZE];
    dest.copy_from_slice(&script[3..3 + DEST_HASH_SIZE]);
    Ok(dest)
}
