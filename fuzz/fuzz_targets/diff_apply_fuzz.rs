#![no_main]
use libfuzzer_sys::fuzz_target;
use chunkpatch::engine::{self, DiffOptions};
use chunkpatch::hash::config::ChunkerConfig;
use chunkpatch::patch::codec;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    // Small chunks so short inputs still produce several of them.
    let min = 1 + (data[0] as usize % 32);
    let target = min + 1 + (data[1] as usize % 64);
    let Ok(chunker) = ChunkerConfig::custom(min, target, target * 4) else {
        return;
    };
    let split = 2 + (data[2] as usize % (data.len() - 2));
    let old = &data[2..split];
    let new = &data[split..];

    let opts = DiffOptions {
        chunker,
        coalesce: data[3] & 1 == 0,
    };
    let script = engine::diff(old, new, None, &opts).unwrap();
    let wire = codec::encode_to_vec(&script).unwrap();
    let decoded = codec::decode_slice(&wire).unwrap();
    assert_eq!(decoded, script);

    let mut buf = old.to_vec();
    engine::apply(&decoded, &mut buf).unwrap();
    assert_eq!(buf, new);
});
