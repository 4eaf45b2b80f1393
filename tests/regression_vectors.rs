use chunkpatch::engine::{self, DiffOptions};
use chunkpatch::exec::replay;
use chunkpatch::patch::codec;

#[derive(Debug)]
struct Vector {
    name: String,
    canonical: bool,
    old: Vec<u8>,
    patch: Vec<u8>,
    new: Vec<u8>,
}

fn hex_to_bytes(s: &str) -> Vec<u8> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }
    assert!(
        s.len().is_multiple_of(2),
        "hex string must have even length"
    );
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

fn load_vectors() -> Vec<Vector> {
    let manifest = include_str!("vectors/manifest.tsv");
    manifest
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .map(|line| {
            let parts: Vec<_> = line.split('|').collect();
            assert_eq!(parts.len(), 5, "invalid vector row: {line}");
            Vector {
                name: parts[0].to_string(),
                canonical: parts[1] == "1",
                old: hex_to_bytes(parts[2]),
                patch: hex_to_bytes(parts[3]),
                new: hex_to_bytes(parts[4]),
            }
        })
        .collect()
}

#[test]
fn vector_database_is_non_empty() {
    let vectors = load_vectors();
    assert!(!vectors.is_empty());
    assert!(vectors.iter().any(|v| v.canonical));
}

#[test]
fn decode_and_replay_all_vectors() {
    for v in load_vectors() {
        let script = codec::decode_slice(&v.patch).unwrap_or_else(|e| panic!("vector {}: {e}", v.name));
        let out = replay(&script, v.old.clone()).unwrap_or_else(|e| panic!("vector {}: {e}", v.name));
        assert_eq!(out, v.new, "vector {}", v.name);
    }
}

#[test]
fn wire_bytes_are_stable() {
    for v in load_vectors() {
        let script = codec::decode_slice(&v.patch).unwrap();
        let wire = codec::encode_to_vec(&script).unwrap();
        assert_eq!(wire, v.patch, "vector {}", v.name);
    }
}

#[test]
fn generator_reproduces_canonical_vectors() {
    for v in load_vectors().into_iter().filter(|v| v.canonical) {
        let script = engine::diff(&v.old, &v.new, None, &DiffOptions::default()).unwrap();
        let wire = codec::encode_to_vec(&script).unwrap();
        assert_eq!(wire, v.patch, "vector {}", v.name);
    }
}

#[test]
fn generator_roundtrips_all_vectors() {
    for v in load_vectors() {
        let script = engine::diff(&v.old, &v.new, None, &DiffOptions::default()).unwrap();
        let out = replay(&script, v.old.clone()).unwrap();
        assert_eq!(out, v.new, "vector {}", v.name);
    }
}
