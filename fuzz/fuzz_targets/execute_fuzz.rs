#![no_main]
use libfuzzer_sys::fuzz_target;
use chunkpatch::exec::{MemoryStorage, execute};
use chunkpatch::patch::codec;
use chunkpatch::patch::instruction::Instruction;

const MAX_REACH: u64 = 1 << 20;

fuzz_target!(|data: &[u8]| {
    let Ok(script) = codec::decode_slice(data) else {
        return;
    };

    // Keep zero-extension by far-off updates within reason.
    let reasonable = script.iter().all(|inst| match inst {
        Instruction::Update { offset, .. } => *offset < MAX_REACH,
        _ => true,
    });
    if !reasonable {
        return;
    }

    // Arbitrary scripts may fail, but never panic.
    let mut storage = MemoryStorage::new()
        .with_file("a", b"fuzz seed content".to_vec())
        .unwrap();
    let _ = execute(&script, &mut storage, Some("a"));
});
