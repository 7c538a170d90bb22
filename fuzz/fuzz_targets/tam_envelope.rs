#![no_main]

use std::sync::{Arc, OnceLock};

use chrono::{TimeZone, Utc};
use ed25519_dalek::SigningKey;
use libfuzzer_sys::fuzz_target;
use ztxp_core::{Broker, BrokerResponse, EmbeddedRules, LocalKeyVerifier};

struct Harness {
    runtime: tokio::runtime::Runtime,
    broker: Broker,
}

fn harness() -> &'static Harness {
    static HARNESS: OnceLock<Harness> = OnceLock::new();
    HARNESS.get_or_init(|| {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        Harness {
            runtime: tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap(),
            broker: Broker::new(
                Arc::new(LocalKeyVerifier::from_verifying_key(key.verifying_key())),
                Arc::new(EmbeddedRules::default()),
            ),
        }
    })
}

fuzz_target!(|data: &[u8]| {
    let h = harness();
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let outcome = h.runtime.block_on(h.broker.evaluate_at(now, data));

    // Arbitrary bytes never carry a valid signature.
    let rejection = outcome.expect_err("unsigned input was accepted");
    let response = BrokerResponse::from_outcome(Err(rejection), now);
    assert_ne!(response.status, 200);
    assert!(!response.body.is_allow());
    assert_eq!(response.body.expires_in(), 0);
});
