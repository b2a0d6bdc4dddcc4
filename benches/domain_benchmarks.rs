use criterion::{Criterion, black_box, criterion_group, criterion_main};
use wallet_jobs::domain::abi::{self, Token};
use wallet_jobs::domain::contracts::wallet_factory;
use wallet_jobs::domain::{Address, Signature, TransactionSigner, U256};
use wallet_jobs::infra::LocalSigner;
use wallet_jobs::infra::blockchain::LegacyTransaction;

fn bench_abi_encoding(c: &mut Criterion) {
    let owner = Address([0x11; 20]);
    let modules = vec![Address([0x0e; 20]), Address([0x0f; 20]), Address([0x10; 20])];

    c.bench_function("encode_create_counterfactual_wallet", |b| {
        b.iter(|| {
            wallet_factory::create_counterfactual_wallet(
                black_box(owner),
                black_box(&modules),
                "",
                U256::from_u64(42),
            )
        })
    });

    c.bench_function("encode_transfer_call", |b| {
        b.iter(|| {
            abi::encode_call(
                black_box("transfer(address,uint256)"),
                &[Token::Address(owner), Token::Uint(U256::from_u64(1_000_000))],
            )
        })
    });
}

fn sample_transaction() -> LegacyTransaction {
    LegacyTransaction {
        nonce: 17,
        gas_price: U256::from_u64(1_000_000_000),
        gas_limit: 700_000,
        to: Address([0xfa; 20]),
        value: U256::from_u64(0),
        data: wallet_factory::create_counterfactual_wallet(
            Address([0x11; 20]),
            &[Address([0x0e; 20])],
            "",
            U256::from_u64(7),
        ),
        chain_id: 122,
    }
}

fn bench_transaction_signing(c: &mut Criterion) {
    let tx = sample_transaction();
    let signer = LocalSigner::random();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    c.bench_function("legacy_tx_signing_hash", |b| {
        b.iter(|| black_box(&tx).signing_hash())
    });

    c.bench_function("legacy_tx_sign_and_encode", |b| {
        b.iter(|| {
            let digest = black_box(&tx).signing_hash();
            let signature = runtime
                .block_on(signer.sign_digest(&digest))
                .expect("signature");
            tx.encode_signed(&signature)
        })
    });

    let signature = Signature {
        r: [0x42; 32],
        s: [0x24; 32],
        recovery_id: 1,
    };
    c.bench_function("legacy_tx_encode_signed", |b| {
        b.iter(|| black_box(&tx).encode_signed(black_box(&signature)))
    });
}

criterion_group!(benches, bench_abi_encoding, bench_transaction_signing);
criterion_main!(benches);
