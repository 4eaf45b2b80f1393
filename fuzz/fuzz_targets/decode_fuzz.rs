#![no_main]
use libfuzzer_sys::fuzz_target;
use chunkpatch::patch::codec;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic, only return errors.
    let Ok(script) = codec::decode_slice(data) else {
        return;
    };

    // Whatever decodes must re-encode to the same bytes.
    let wire = codec::encode_to_vec(&script).unwrap();
    assert_eq!(wire, data);
});
