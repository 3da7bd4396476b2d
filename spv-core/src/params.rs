//! Parâmetros da cadeia externa observada e tabelas de checkpoints
//!
//! Duas classes de checkpoint convivem aqui:
//! - *Âncoras* `(altura, hash, trabalho acumulado)` - permitem inicializar
//!   um nó novo sem reprocessar desde a gênese externa; a âncora mais alta
//!   vira a raiz da cadeia no primeiro init.
//! - *Checkpoints de identidade canônica* `(altura, hash)` - fixados nos
//!   limites de halving; um cabeçalho nessas alturas com hash divergente é
//!   rejeitado (invariante A7).

use crate::header::BtcBlockHeader;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use shared::{Hash256, NetworkType};

/// Altura da âncora Signet com cabeçalho completo embutido
pub const SIGNET_ANCHOR_HEIGHT: u32 = 286_000;

/// Parâmetros da cadeia externa para uma rede
#[derive(Debug, Clone)]
pub struct BtcNetworkParams {
    /// Magic de rede da cadeia externa
    pub magic: u32,
    /// Porta P2P padrão da cadeia externa
    pub default_port: u16,
    /// Hash do bloco gênese externo
    pub genesis_hash: Hash256,
    /// Limite de prova de trabalho (alvo máximo)
    pub pow_limit: BigUint,
}

/// Checkpoint âncora: bootstrapping de nós novos
#[derive(Debug, Clone)]
pub struct AnchorCheckpoint {
    pub height: u32,
    pub hash: Hash256,
    pub cum_work: [u8; 32],
}

/// Checkpoint de identidade canônica (limite de halving, invariante A7)
#[derive(Debug, Clone, Copy)]
pub struct IdentityCheckpoint {
    pub height: u32,
    pub hash: Hash256,
}

fn display_hash(hex: &str) -> Hash256 {
    Hash256::from_hex_be(hex).expect("constante de checkpoint válida")
}

fn work_bytes(hex: &str) -> [u8; 32] {
    let bytes = hex::decode(hex).expect("constante de trabalho válida");
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out
}

static MAINNET_PARAMS: Lazy<BtcNetworkParams> = Lazy::new(|| BtcNetworkParams {
    magic: 0xD9B4_BEF9,
    default_port: 8333,
    genesis_hash: display_hash("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"),
    pow_limit: BigUint::from_bytes_be(
        &hex::decode("00000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
            .expect("powLimit mainnet"),
    ),
});

static SIGNET_PARAMS: Lazy<BtcNetworkParams> = Lazy::new(|| BtcNetworkParams {
    magic: 0x0A03_CF40,
    default_port: 38333,
    genesis_hash: display_hash("00000008819873e925422c1ff0f99f7cc9bbb232af63a077a480a3633bee1ef6"),
    pow_limit: BigUint::from_bytes_be(
        &hex::decode("00000377ae000000000000000000000000000000000000000000000000000000")
            .expect("powLimit signet"),
    ),
});

static REGTEST_PARAMS: Lazy<BtcNetworkParams> = Lazy::new(|| BtcNetworkParams {
    magic: 0xDAB5_BFFA,
    default_port: 18444,
    genesis_hash: display_hash("0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"),
    pow_limit: BigUint::from_bytes_be(
        &hex::decode("7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
            .expect("powLimit regtest"),
    ),
});

static MAINNET_ANCHORS: Lazy<Vec<AnchorCheckpoint>> = Lazy::new(|| {
    vec![
        AnchorCheckpoint {
            height: 800_000,
            hash: display_hash(
                "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054",
            ),
            cum_work: work_bytes(
                "0000000000000000000000000000000000000000576594be759cea81fc0e5428",
            ),
        },
        // Halving de 2024
        AnchorCheckpoint {
            height: 840_000,
            hash: display_hash(
                "0000000000000000000320283a032748cef8227873ff4872689bf23f1cda83a5",
            ),
            cum_work: work_bytes(
                "0000000000000000000000000000000000000000634ce635e3ca168c6e40c980",
            ),
        },
    ]
});

static SIGNET_ANCHORS: Lazy<Vec<AnchorCheckpoint>> = Lazy::new(|| {
    vec![
        AnchorCheckpoint {
            height: 200_000,
            hash: display_hash(
                "0000007d60f5ffc47975418ac8331c0ea52cf551730ef7ead7ff9082a536f13c",
            ),
            cum_work: work_bytes(
                "0000000000000000000000000000000000000000000000000000024389c5fcd1",
            ),
        },
        AnchorCheckpoint {
            height: 280_000,
            hash: display_hash(
                "00000007cf38f0abf5564dde6a748fbd09d4c29f755405ae936d6b9b13d5db3c",
            ),
            cum_work: work_bytes(
                "000000000000000000000000000000000000000000000000000008d0d4c63c66",
            ),
        },
        // Âncora anterior à primeira queima, para que todas as queimas
        // sejam descobertas dinamicamente
        AnchorCheckpoint {
            height: SIGNET_ANCHOR_HEIGHT,
            hash: display_hash(
                "0000000732c0c78558a50be0774d99188f65ee374e10ff9816deaf42df9f7780",
            ),
            cum_work: work_bytes(
                "000000000000000000000000000000000000000000000000000009f3cf1f88dc",
            ),
        },
    ]
});

static MAINNET_IDENTITY: Lazy<Vec<IdentityCheckpoint>> = Lazy::new(|| {
    vec![
        // Primeiro halving (nov 2012)
        IdentityCheckpoint {
            height: 210_000,
            hash: display_hash(
                "000000000000048b95347e83192f69cf0366076336c639f9b7228e9ba171342e",
            ),
        },
        // Segundo halving (jul 2016)
        IdentityCheckpoint {
            height: 420_000,
            hash: display_hash(
                "000000000000000002cce816c0ab2c5c269cb081896b7dcb34b8422d6b74ffa1",
            ),
        },
        // Terceiro halving (mai 2020)
        IdentityCheckpoint {
            height: 630_000,
            hash: display_hash(
                "0000000000000000000f2adce67e49b0b6bdeb9de8b7c3d7e93b21e7fc1e819d",
            ),
        },
        // Quarto halving (abr 2024)
        IdentityCheckpoint {
            height: 840_000,
            hash: display_hash(
                "0000000000000000000320283a032748cef8227873ff4872689bf23f1cda83a5",
            ),
        },
    ]
});

static SIGNET_IDENTITY: Lazy<Vec<IdentityCheckpoint>> = Lazy::new(|| {
    vec![IdentityCheckpoint {
        height: 200_000,
        hash: display_hash("0000007d60f5ffc47975418ac8331c0ea52cf551730ef7ead7ff9082a536f13c"),
    }]
});

// Regtest ancora na própria gênese externa (trabalho zero), o que permite
// exercitar o pipeline completo com dificuldade mínima
static REGTEST_ANCHORS: Lazy<Vec<AnchorCheckpoint>> = Lazy::new(|| {
    vec![AnchorCheckpoint {
        height: 0,
        hash: REGTEST_PARAMS.genesis_hash,
        cum_work: [0u8; 32],
    }]
});

static REGTEST_IDENTITY: Lazy<Vec<IdentityCheckpoint>> = Lazy::new(Vec::new);

/// Parâmetros da cadeia externa observada pela rede nativa.
///
/// O testnet observa a Signet; o regtest observa uma cadeia externa de
/// regressão com limite de PoW frouxo.
#[must_use]
pub fn btc_network_params(network: NetworkType) -> &'static BtcNetworkParams {
    match network {
        NetworkType::Mainnet => &MAINNET_PARAMS,
        NetworkType::Testnet => &SIGNET_PARAMS,
        NetworkType::Regtest => &REGTEST_PARAMS,
    }
}

/// Tabela de âncoras da rede
#[must_use]
pub fn anchor_checkpoints(network: NetworkType) -> &'static [AnchorCheckpoint] {
    match network {
        NetworkType::Mainnet => &MAINNET_ANCHORS,
        NetworkType::Testnet => &SIGNET_ANCHORS,
        NetworkType::Regtest => &REGTEST_ANCHORS,
    }
}

/// Tabela de checkpoints de identidade canônica (A7) da rede
#[must_use]
pub fn identity_checkpoints(network: NetworkType) -> &'static [IdentityCheckpoint] {
    match network {
        NetworkType::Mainnet => &MAINNET_IDENTITY,
        NetworkType::Testnet => &SIGNET_IDENTITY,
        NetworkType::Regtest => &REGTEST_IDENTITY,
    }
}

/// Cabeçalho completo da âncora Signet na altura 286000.
///
/// Embutido para que nós novos possam validar a cadeia a partir daqui sem
/// baixar o histórico anterior.
#[must_use]
pub fn signet_anchor_header() -> BtcBlockHeader {
    BtcBlockHeader {
        version: 0x2000_0000,
        prev_hash: display_hash("00000009dbc0a60881fe55e6439cf024b5c66be84d5618e7a50e3531a762dbb4"),
        merkle_root: display_hash(
            "74311cdbb23e2e3c8b7a8c913794df3b83b5c58d12eee67d5aab37abfb40d4f3",
        ),
        time: 1_767_211_537,
        bits: 0x1d14_20d7,
        nonce: 192_971_798,
    }
}
