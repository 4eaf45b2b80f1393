// Patch scripts: instructions, their wire codec, and how they are produced.
//
// - Instruction set and opcodes (`instruction`)
// - Binary serialization of instruction lists (`codec`)
// - Chunk-tree alignment and instruction emission (`generator`)
// - Script coalescing and no-op removal (`pipeline`)

pub mod codec;
pub mod generator;
pub mod instruction;
pub mod pipeline;

pub use codec::{CodecError, InstructionReader, decode_slice, encode_to_vec, read_instructions, write_instructions};
pub use generator::{GenerateError, generate_instructions, generate_uncoalesced, removal_script};
pub use instruction::{Instruction, Opcode, ScriptSummary};
