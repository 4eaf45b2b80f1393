//! Chunkpatch: content-defined binary patches in Rust.
//!
//! Two versions of some content are split into chunks at content-defined
//! boundaries, the chunks are aligned by digest, and the differences become a
//! replayable script of insert/delete/update instructions that may span
//! several named files.
//!
//! The crate provides:
//! - Chunking (`hash`, `chunk`)
//! - Instruction generation and the binary wire format (`patch`)
//! - Script execution against files or memory (`exec`)
//! - High-level in-memory APIs (`engine`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use chunkpatch::engine::{self, DiffOptions};
//! use chunkpatch::patch::codec;
//!
//! let old = b"hello old world";
//! let new = b"hello new world";
//!
//! let script = engine::diff(old, new, None, &DiffOptions::default()).unwrap();
//! let wire = codec::encode_to_vec(&script).unwrap();
//!
//! let decoded = codec::decode_slice(&wire).unwrap();
//! let mut buf = old.to_vec();
//! engine::apply(&decoded, &mut buf).unwrap();
//! assert_eq!(buf, new);
//! ```

pub mod chunk;
pub mod engine;
pub mod exec;
pub mod hash;
pub mod io;
pub mod patch;

#[cfg(feature = "cli")]
pub mod cli;
