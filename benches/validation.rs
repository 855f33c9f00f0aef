use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use witnessed_coin::agent::Agent;
use witnessed_coin::coin::Coin;
use witnessed_coin::crypto;
use witnessed_coin::wallet::Wallet;

fn bench_keypair_generation(c: &mut Criterion) {
    c.bench_function("crypto/generate_keypair (RSA-2048)", |b| {
        b.iter(|| black_box(crypto::generate_keypair().unwrap()))
    });
}

fn bench_sign_and_verify(c: &mut Criterion) {
    let (private_key, public_key) = crypto::generate_keypair().unwrap();
    let message = "coin-id-owner-recipient-1700000000";

    let mut group = c.benchmark_group("crypto/sign_verify");
    group.bench_function("sign", |b| {
        b.iter(|| black_box(private_key.sign_str(message)))
    });

    let signature = private_key.sign_str(message);
    group.bench_function("verify", |b| {
        b.iter(|| black_box(public_key.verify_str(message, &signature)))
    });
    group.finish();
}

/// Witness validation is the protocol's hot path: every confirmed transfer
/// runs `required_witnesses` of these sequentially, so its cost caps
/// network-wide throughput.
fn bench_witness_validation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let sender = Wallet::generate().unwrap();
    let recipient = Wallet::generate().unwrap();
    let witness_wallet = Wallet::generate().unwrap();

    let mut group = c.benchmark_group("agent/validate");
    for coin_count in [1usize, 10, 100] {
        let mut sender = sender.clone();
        for _ in 0..coin_count {
            let coin = Coin::new(sender.id().to_string(), 1, 0).unwrap();
            sender.add_coin(coin, 0).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("wallet_size", coin_count), &coin_count, |b, _| {
            b.iter_batched(
                || {
                    let mut sender = sender.clone();
                    let mut witness = Agent::new(0, witness_wallet.clone(), None);
                    witness.register_public_key(sender.id().to_string(), sender.public_key().clone());
                    witness.register_public_key(
                        recipient.id().to_string(),
                        recipient.public_key().clone(),
                    );
                    let intent = sender
                        .transfer_coin(0, recipient.id(), 1_000)
                        .expect("wallet seeded with at least one coin");
                    (witness, intent)
                },
                |(mut witness, intent)| black_box(rt.block_on(witness.validate(&intent, 1_000))),
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_keypair_generation,
    bench_sign_and_verify,
    bench_witness_validation,
);
criterion_main!(benches);
