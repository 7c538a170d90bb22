#![no_main]

use libfuzzer_sys::fuzz_target;
use ztxp_core::DecisionRecord;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = serde_json::from_slice::<DecisionRecord>(data) {
        assert_eq!(record.is_allow(), record.expires_in() > 0);

        let encoded = serde_json::to_vec(&record).unwrap();
        let decoded: DecisionRecord = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.decision(), record.decision());
        assert_eq!(decoded.expires_in(), record.expires_in());
    }
});
