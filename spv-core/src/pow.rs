//! Prova de trabalho da cadeia externa: alvo compacto, trabalho por bloco
//! e retargeting de dificuldade

use crate::header::BtcBlockHeader;
use num_bigint::BigUint;
use num_traits::{One, Zero};
use shared::Hash256;

/// Intervalo de retarget da cadeia externa (blocos)
pub const RETARGET_INTERVAL: u32 = 2016;

/// Timespan alvo de um período de retarget (2016 blocos de 600s)
pub const TARGET_TIMESPAN: i64 = 2016 * 600;

/// Decodifica o campo `bits` compacto para o alvo de 256 bits.
///
/// Retorna `(target, negative, overflow)` seguindo a semântica do formato
/// compacto da cadeia de origem: expoente no byte alto, mantissa de 23 bits
/// e bit de sinal em 0x00800000.
#[must_use]
pub fn decode_compact(bits: u32) -> (BigUint, bool, bool) {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    let negative = (bits & 0x0080_0000) != 0 && mantissa != 0;

    let target = if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    };

    let overflow = mantissa != 0
        && (exponent > 34
            || (mantissa > 0xff && exponent > 33)
            || (mantissa > 0xffff && exponent > 32));

    (target, negative, overflow)
}

/// Codifica um alvo de 256 bits de volta para a forma compacta
#[must_use]
pub fn encode_compact(target: &BigUint) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = target.to_bytes_be().len();

    let mut compact: u32 = if size <= 3 {
        let mut value: u32 = 0;
        for byte in target.to_bytes_be() {
            value = (value << 8) | u32::from(byte);
        }
        value << (8 * (3 - size))
    } else {
        let shifted = target >> (8 * (size - 3));
        shifted.to_u32_digits().first().copied().unwrap_or(0)
    };

    // Se o bit de sinal ficaria ligado, desloca a mantissa um byte
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | ((size as u32) << 24)
}

/// Trabalho de um único bloco: `2^256 / (target + 1)`.
///
/// Retorna zero para alvos inválidos (negativos, nulos ou com overflow).
#[must_use]
pub fn block_work(bits: u32) -> BigUint {
    let (target, negative, overflow) = decode_compact(bits);
    if negative || overflow || target.is_zero() {
        return BigUint::zero();
    }

    // (~target / (target + 1)) + 1 em aritmética de 256 bits
    let max = (BigUint::one() << 256u32) - BigUint::one();
    ((max - &target) / (&target + BigUint::one())) + BigUint::one()
}

/// Serializa um trabalho acumulado como 32 bytes big-endian
#[must_use]
pub fn work_to_bytes(work: &BigUint) -> [u8; 32] {
    let bytes = work.to_bytes_be();
    let mut out = [0u8; 32];
    let start = 32usize.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(32)..]);
    out
}

/// Verifica a prova de trabalho de um cabeçalho contra o limite da rede.
///
/// O hash é interpretado como inteiro little-endian (convenção da cadeia
/// de origem) e deve ser menor ou igual ao alvo decodificado de `bits`.
#[must_use]
pub fn check_proof_of_work(header: &BtcBlockHeader, pow_limit: &BigUint) -> bool {
    let (target, negative, overflow) = decode_compact(header.bits);

    if negative || overflow || target.is_zero() || &target > pow_limit {
        return false;
    }

    hash_to_uint(&header.hash()) <= target
}

/// Interpreta um hash como inteiro de 256 bits (bytes em ordem interna LE)
#[must_use]
pub fn hash_to_uint(hash: &Hash256) -> BigUint {
    BigUint::from_bytes_le(hash.as_bytes())
}

/// Calcula os `bits` esperados no limite de retarget.
///
/// `actual = prev.time - first_of_period.time`, grampeado em
/// `[timespan/4, timespan*4]`; o novo alvo é limitado por `pow_limit`.
#[must_use]
pub fn expected_retarget_bits(
    prev_bits: u32,
    first_time: u32,
    prev_time: u32,
    pow_limit: &BigUint,
) -> u32 {
    let mut actual = i64::from(prev_time) - i64::from(first_time);
    actual = actual.clamp(TARGET_TIMESPAN / 4, TARGET_TIMESPAN * 4);

    let (prev_target, _, _) = decode_compact(prev_bits);
    let mut new_target =
        prev_target * BigUint::from(actual as u64) / BigUint::from(TARGET_TIMESPAN as u64);

    if &new_target > pow_limit {
        new_target = pow_limit.clone();
    }

    encode_compact(&new_target)
}
