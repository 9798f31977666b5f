use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use threshold_election::{
    encrypt, encrypt_with_proof, DecryptingTrustee, Decryptor, ElGamalKeyPair, ElectionConfig,
    GroupContext, Guardian, KeyCeremony,
};

const P: &str = "866058c7c2583f3ed87236ff6b5f73f46d0d05b80d9dc481fb71c97b2f9a7673";
const Q: &str = "43302c63e12c1f9f6c391b7fb5afb9fa368682dc06cee240fdb8e4bd97cd3b39";

fn context() -> GroupContext {
    GroupContext::from_hex(P, Q, "4")
        .unwrap()
        .with_discrete_log_bound(1_000)
}

fn guardians(ctx: &GroupContext, config: &ElectionConfig) -> Vec<Guardian> {
    (1..=config.guardians)
        .map(|x| {
            let mut g = Guardian::new(format!("guardian-{}", x), x, config).unwrap();
            g.generate_keys(ctx).unwrap();
            g
        })
        .collect()
}

fn bench_encryption(c: &mut Criterion) {
    let ctx = context();
    let pair = ElGamalKeyPair::random(&ctx).unwrap();
    let mut group = c.benchmark_group("encryption");
    group.bench_function("encrypt", |b| {
        b.iter(|| encrypt(&ctx, 1, pair.public_key()).unwrap())
    });
    group.bench_function("encrypt_with_proof", |b| {
        b.iter(|| encrypt_with_proof(&ctx, 1, pair.public_key()).unwrap())
    });
    group.finish();
}

fn bench_ceremony(c: &mut Criterion) {
    let ctx = context();
    let mut group = c.benchmark_group("key_ceremony");
    group.sample_size(10);
    for &(n, k) in &[(3, 2), (5, 3), (7, 4)] {
        let config = ElectionConfig::new(n, k).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(format!("{}of{}", k, n)), &config, |b, config| {
            b.iter(|| {
                let participants = guardians(&ctx, config);
                KeyCeremony::new(&ctx, config.clone(), participants)
                    .unwrap()
                    .run()
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_threshold_decryption(c: &mut Criterion) {
    let ctx = context();
    let mut group = c.benchmark_group("threshold_decryption");
    group.sample_size(10);
    let config = ElectionConfig::new(5, 3).unwrap();
    let outcome = KeyCeremony::new(&ctx, config.clone(), guardians(&ctx, &config))
        .unwrap()
        .run()
        .unwrap();
    let (ciphertext, _) = encrypt(&ctx, 42, &outcome.joint_public_key).unwrap();
    let decryptor = Decryptor::new(&ctx, config, outcome.public_keys.clone()).unwrap();

    for present in [3, 4, 5] {
        let trustees: Vec<&dyn DecryptingTrustee> = outcome
            .participants
            .iter()
            .take(present)
            .map(|g| g as &dyn DecryptingTrustee)
            .collect();
        group.bench_with_input(BenchmarkId::new("present", present), &trustees, |b, trustees| {
            b.iter(|| {
                decryptor
                    .decrypt_ciphertext("bench", &ciphertext, trustees)
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_encryption,
    bench_ceremony,
    bench_threshold_decryption
);
criterion_main!(benches);
