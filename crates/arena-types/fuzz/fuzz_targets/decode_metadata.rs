#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = arena_types::decode::<arena_types::ChannelMetadata>(data);
});
