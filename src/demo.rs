//! Demonstração ponta a ponta do ciclo de settlement em regtest
//!
//! Percorre o fluxo completo num diretório temporário: queima externa
//! verificada por SPV → MINT de M0 → LOCK (vault + receipt) → SPLIT do
//! receipt → UNLOCK parcial, imprimindo o estado a cada bloco.

use settlement_core::{
    build_lock, build_split_m1, build_unlock, builder::LockInput, builder::M1Input,
    builder::VaultInput, calculate_merkle_root, Chain, MasternodeEntry, MasternodeList,
    NativeBlock, NativeBlockHeader, NativeTransaction, SettlementState,
};
use shared::{sign_block_hash, Hash256, KeyPair, NetworkType, Result};
use spv_core::burnclaim::{BurnPayload, ObservedBurn, SpvProof};
use spv_core::{btc_network_params, pow, BtcBlockHeader, BtcSpvStore, BurnClaimStore};
use tracing::info;

const BURN_SATS: i64 = 100_000;
const DEST: [u8; 20] = [7u8; 20];

fn mine_external_header(prev: Hash256, time: u32, merkle_root: Hash256) -> BtcBlockHeader {
    let mut header = BtcBlockHeader {
        version: 0x2000_0000,
        prev_hash: prev,
        merkle_root,
        time,
        bits: 0x207f_ffff,
        nonce: 0,
    };
    let limit = &btc_network_params(NetworkType::Regtest).pow_limit;
    while !pow::check_proof_of_work(&header, limit) {
        header.nonce += 1;
    }
    header
}

fn print_state(label: &str, state: &SettlementState) {
    info!(
        "📊 {label}: altura={} m0_total={} m0_vaulted={} m1_supply={} queimas_bloco={}",
        state.height,
        state.m0_total_supply,
        state.m0_vaulted,
        state.m1_supply,
        state.burnclaims_block
    );
}

struct DemoChain {
    chain: Chain,
    claims: BurnClaimStore,
    keypair: KeyPair,
}

impl DemoChain {
    fn connect(&mut self, txs: Vec<NativeTransaction>) -> Result<()> {
        let height = self.chain.tip_height() + 1;
        let time = self.chain.params().genesis_time
            + i64::from(height) * self.chain.params().target_spacing;
        let header = NativeBlockHeader {
            version: 1,
            prev_hash: self.chain.tip_hash(),
            merkle_root: calculate_merkle_root(&txs)?,
            time,
            height,
        };
        let hash = header.hash()?;
        let sig = sign_block_hash(&self.keypair.private_key, &hash)?;
        let block = NativeBlock {
            header,
            producer_sig: sig.as_bytes().to_vec(),
            txs,
        };

        self.chain
            .connect_block(&block, &mut self.claims, time)
            .map_err(|e| shared::BlockchainError::InvalidBlock(e.to_string()))?;
        Ok(())
    }

    fn state(&self) -> Result<SettlementState> {
        Ok(self
            .chain
            .settlement_db()
            .read_latest_state()?
            .unwrap_or_default())
    }
}

/// Executa a demonstração completa
///
/// # Errors
///
/// Retorna erro se alguma etapa do fluxo falhar
pub fn run() -> Result<()> {
    info!("🚀 Demo do núcleo de settlement Bathron (regtest)");

    let dir = std::env::temp_dir().join(format!("bathron-demo-{}", std::process::id()));
    let data_dir = dir.to_string_lossy().to_string();

    // 1. Cadeia externa: bloco com a queima + profundidade de confirmação
    let mut spv = BtcSpvStore::open(&data_dir, NetworkType::Regtest)?;
    let mut claims = BurnClaimStore::open(&data_dir)?;

    let base_time = chrono::Utc::now().timestamp() as u32 - 100_000;
    let burn_txid = Hash256::sha256d(b"demo-burn");
    let sibling = Hash256::sha256d(b"demo-other");
    let mut pair = [0u8; 64];
    pair[..32].copy_from_slice(burn_txid.as_bytes());
    pair[32..].copy_from_slice(sibling.as_bytes());
    let root = Hash256::sha256d(&pair);

    let burn_block = mine_external_header(spv.tip_hash(), base_time, root);
    spv.add_header(&burn_block)?;
    let mut prev = burn_block.hash();
    for i in 1..=spv_core::CONFIRMATIONS_REQUIRED {
        let filler =
            mine_external_header(prev, base_time + i * 600, Hash256::sha256d(&i.to_le_bytes()));
        spv.add_header(&filler)?;
        prev = filler.hash();
    }
    info!("⛓️  Cadeia externa na altura {}", spv.tip_height());

    // 2. Observa a queima com prova SPV
    let payload = BurnPayload {
        destination: DEST,
        amount_sats: BURN_SATS as u64,
    };
    let status = claims.observe(
        &spv,
        &ObservedBurn {
            btc_txid: burn_txid,
            vout: 0,
            value_sats: BURN_SATS,
            payload: payload.encode(),
            btc_block_height: 1,
            proof: SpvProof {
                merkle_path: vec![sibling],
                tx_index: 0,
            },
        },
    )?;
    info!("🔥 Queima de {BURN_SATS} sats observada: {status:?}");

    // 3. Cadeia nativa com um masternode produtor
    let mut chain = Chain::open(&data_dir, NetworkType::Regtest)
        .map_err(|e| shared::BlockchainError::InvalidBlock(e.to_string()))?;
    let keypair = KeyPair::generate();
    let mut list = MasternodeList::new();
    list.add(MasternodeEntry {
        protx_hash: Hash256::keccak256(b"demo-mn"),
        operator_pubkey: keypair.public_key.clone(),
        registered_height: 0,
        confirmed_hash: Some(Hash256::keccak256(b"conf")),
        pose_banned: false,
    });
    chain.set_masternode_list(list);

    let mut demo = DemoChain {
        chain,
        claims,
        keypair,
    };

    // 4. MINT: a oferta nasce da queima verificada (A5)
    let mint = NativeTransaction::new(
        1,
        settlement_core::TxType::MintM0Btc {
            claim_ids: vec![spv_core::claim_id(&burn_txid, 0)],
        },
        vec![],
        vec![settlement_core::TxOutput::new(
            BURN_SATS,
            settlement_core::script::destination_script(&DEST),
        )],
        0,
    );
    let mint_txid = mint.hash()?;
    demo.connect(vec![mint])?;
    print_state("após MINT", &demo.state()?);

    // 5. LOCK: 40k viram vault + receipt
    let lock = build_lock(
        &[LockInput {
            outpoint: shared::OutPoint::new(mint_txid, 0),
            amount: BURN_SATS,
            script_pubkey: settlement_core::script::destination_script(&DEST),
        }],
        40_000,
        &DEST,
        &DEST,
        demo.chain.params(),
    )?;
    demo.connect(vec![lock.tx.clone()])?;
    print_state("após LOCK", &demo.state()?);

    // 6. SPLIT: o receipt de 40k vira {25k, 14k} + taxa
    let split = build_split_m1(
        M1Input {
            outpoint: lock.receipt_outpoint,
            amount: 40_000,
        },
        &[(DEST, 25_000), (DEST, 14_000)],
        demo.chain.params(),
    )?;
    demo.connect(vec![split.tx.clone()])?;
    print_state("após SPLIT", &demo.state()?);

    // 7. UNLOCK parcial: queima o receipt de 25k contra o pool de vaults
    let vaults = demo
        .chain
        .settlement_db()
        .find_vaults_for_amount(25_000 + 1_000)?;
    let unlock = build_unlock(
        &[M1Input {
            outpoint: split.new_receipts[0],
            amount: 25_000,
        }],
        &vaults
            .iter()
            .map(|v| VaultInput {
                outpoint: v.outpoint,
                amount: v.amount,
            })
            .collect::<Vec<_>>(),
        0,
        &DEST,
        &DEST,
        demo.chain.params(),
    )?;
    demo.connect(vec![unlock.tx.clone()])?;
    print_state("após UNLOCK", &demo.state()?);

    let final_state = demo.state()?;
    info!(
        "✅ Demo concluída: A6 {} (vaulted {} == m1 {})",
        if final_state.check_invariants() { "ok" } else { "VIOLADA" },
        final_state.m0_vaulted,
        final_state.m1_supply
    );

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
