// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the RMAP handshake and link redemption.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tatou_core::config::TatouConfig;
use tatou_core::types::VersionIndex;
use tatou_rmap::{LinkValidator, RmapClient, RmapEngine};
use tatou_security::{Keyring, LinkSigningKey};
use tatou_store::VersionStore;

fn setup() -> (Arc<RmapEngine>, RmapClient, Arc<VersionStore>) {
    let mut keyring = Keyring::new();
    let key = keyring.generate("bench").expect("key");
    let store = Arc::new(VersionStore::open_in_memory().expect("open store"));
    let engine = RmapEngine::new(
        &TatouConfig::default(),
        keyring,
        store.clone(),
        LinkSigningKey::generate().expect("signing key"),
    )
    .expect("engine");
    (Arc::new(engine), RmapClient::new("bench", key), store)
}

/// initiate + client checks + get_link, ending in a signed token.
fn bench_full_handshake(c: &mut Criterion) {
    let (engine, mut client, store) = setup();
    let doc = store.create_document(&[0x11u8; 4096]).expect("create");

    c.bench_function("handshake to link", |b| {
        b.iter(|| {
            let nonce = client.begin().expect("nonce");
            let challenge = engine.initiate("bench", &nonce).expect("initiate");
            client
                .verify_challenge(engine.server_id(), &challenge)
                .expect("commitment");
            let proof = client.proof(&challenge).expect("proof");
            let link = engine
                .get_link(challenge.session_id, &proof, doc, VersionIndex::ORIGINAL)
                .expect("link");
            black_box(link);
        });
    });
}

/// Token verification, ledger insert and a 4 KiB read.
fn bench_redeem(c: &mut Criterion) {
    let (engine, mut client, store) = setup();
    let doc = store.create_document(&[0x22u8; 4096]).expect("create");
    let validator =
        LinkValidator::open_in_memory(engine.verifying_key(), store.clone()).expect("ledger");

    c.bench_function("redeem (4 KiB)", |b| {
        b.iter_batched(
            || {
                let nonce = client.begin().expect("nonce");
                let challenge = engine.initiate("bench", &nonce).expect("initiate");
                let proof = client.proof(&challenge).expect("proof");
                engine
                    .get_link(challenge.session_id, &proof, doc, VersionIndex::ORIGINAL)
                    .expect("link")
                    .token
            },
            |token| black_box(validator.redeem(&token).expect("redeem")),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_full_handshake, bench_redeem);
criterion_main!(benches);
