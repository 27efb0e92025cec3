#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic; round-tripping a
    // successful decode must be stable.
    if let Ok(proof) = arena_types::decode::<arena_types::StateProof>(data) {
        let encoded = arena_types::encode(&proof);
        let again: arena_types::StateProof =
            arena_types::decode(&encoded).expect("re-encoded proof decodes");
        assert_eq!(again, proof);
    }
});
