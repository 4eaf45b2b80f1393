// Binary instruction codec.
//
// Each instruction is `opcode: u8` followed by its operands.  Integers are
// fixed-width little-endian; payloads and paths carry a `u32` length prefix.
//
//   INSERT   01  offset:u64  len:u32  payload[len]
//   DELETE   02  offset:u64  count:u32
//   UPDATE   03  offset:u64  len:u32  payload[len]
//   SETFILE  04  len:u32  path[len]   (UTF-8)
//   DELFILE  05  len:u32  path[len]   (UTF-8)
//
// A script is the plain concatenation of its instructions; end of input at an
// instruction boundary ends the script.  Any other end of input, an unknown
// opcode, or a non-UTF-8 path is fatal and reported with its byte offset.

use std::io::{self, Read, Write};

use thiserror::Error;

use super::instruction::{Instruction, Opcode};

/// Reads of untrusted length prefixes never pre-allocate more than this.
const MAX_PREALLOC: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown opcode {opcode:#04x} at byte {offset}")]
    UnknownOpcode { offset: u64, opcode: u8 },
    #[error("truncated {field} at byte {offset}")]
    Truncated { offset: u64, field: &'static str },
    #[error("path at byte {offset} is not valid UTF-8")]
    InvalidPath { offset: u64 },
    #[error("{field} of {len} bytes does not fit a u32 length prefix")]
    PayloadTooLarge { field: &'static str, len: usize },
    #[error("I/O error at byte {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },
}

impl CodecError {
    /// Byte offset of the failure, when it happened while decoding.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::UnknownOpcode { offset, .. }
            | Self::Truncated { offset, .. }
            | Self::InvalidPath { offset }
            | Self::Io { offset, .. } => Some(*offset),
            Self::PayloadTooLarge { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Exact encoded size of one instruction.
pub fn encoded_len(inst: &Instruction) -> usize {
    1 + match inst {
        Instruction::Insert { payload, .. } | Instruction::Update { payload, .. } => {
            8 + 4 + payload.len()
        }
        Instruction::Delete { .. } => 8 + 4,
        Instruction::SetFile { path } | Instruction::DeleteFile { path } => 4 + path.len(),
    }
}

fn length_prefix(field: &'static str, len: usize) -> Result<[u8; 4], CodecError> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| CodecError::PayloadTooLarge { field, len })
}

/// Encode one instruction.
pub fn write_instruction<W: Write>(w: &mut W, inst: &Instruction) -> Result<(), CodecError> {
    let io_err = |source| CodecError::Io { offset: 0, source };
    let opcode = [inst.opcode() as u8];
    match inst {
        Instruction::Insert { offset, payload } | Instruction::Update { offset, payload } => {
            let len = length_prefix("payload", payload.len())?;
            w.write_all(&opcode).map_err(io_err)?;
            w.write_all(&offset.to_le_bytes()).map_err(io_err)?;
            w.write_all(&len).map_err(io_err)?;
            w.write_all(payload).map_err(io_err)?;
        }
        Instruction::Delete { offset, count } => {
            w.write_all(&opcode).map_err(io_err)?;
            w.write_all(&offset.to_le_bytes()).map_err(io_err)?;
            w.write_all(&count.to_le_bytes()).map_err(io_err)?;
        }
        Instruction::SetFile { path } | Instruction::DeleteFile { path } => {
            let len = length_prefix("path", path.len())?;
            w.write_all(&opcode).map_err(io_err)?;
            w.write_all(&len).map_err(io_err)?;
            w.write_all(path.as_bytes()).map_err(io_err)?;
        }
    }
    Ok(())
}

/// Encode a whole script. An empty list writes nothing.
///
/// I/O errors carry the byte offset of the instruction being written.
pub fn write_instructions<W: Write>(w: &mut W, list: &[Instruction]) -> Result<(), CodecError> {
    let mut pos = 0u64;
    for inst in list {
        write_instruction(w, inst).map_err(|e| match e {
            CodecError::Io { source, .. } => CodecError::Io {
                offset: pos,
                source,
            },
            other => other,
        })?;
        pos += encoded_len(inst) as u64;
    }
    Ok(())
}

/// Encode a script into a fresh buffer.
pub fn encode_to_vec(list: &[Instruction]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(list.iter().map(encoded_len).sum());
    write_instructions(&mut out, list)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Streaming decoder yielding one instruction at a time.
///
/// After the first error the iterator is fused and yields `None`.
pub struct InstructionReader<R: Read> {
    inner: R,
    pos: u64,
    done: bool,
}

impl<R: Read> InstructionReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pos: 0,
            done: false,
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the opcode byte, or `None` on clean end of input.
    fn read_opcode(&mut self) -> Result<Option<u8>, CodecError> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.pos += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(CodecError::Io {
                        offset: self.pos,
                        source,
                    });
                }
            }
        }
    }

    fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        let mut buf = [0u8; N];
        match self.inner.read_exact(&mut buf) {
            Ok(()) => {
                self.pos += N as u64;
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CodecError::Truncated {
                offset: self.pos,
                field,
            }),
            Err(source) => Err(CodecError::Io {
                offset: self.pos,
                source,
            }),
        }
    }

    fn read_u64(&mut self, field: &'static str) -> Result<u64, CodecError> {
        self.read_array::<8>(field).map(u64::from_le_bytes)
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        self.read_array::<4>(field).map(u32::from_le_bytes)
    }

    /// Read a `u32`-prefixed byte string without trusting the prefix for
    /// allocation.
    fn read_bytes(&mut self, field: &'static str) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32(field)? as usize;
        let start = self.pos;
        let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC));
        let got = (&mut self.inner)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|source| CodecError::Io {
                offset: start,
                source,
            })?;
        if got < len {
            return Err(CodecError::Truncated {
                offset: start,
                field,
            });
        }
        self.pos += len as u64;
        Ok(buf)
    }

    fn read_path(&mut self) -> Result<String, CodecError> {
        // The length prefix is 4 bytes; the path text starts right after it.
        let offset = self.pos + 4;
        let bytes = self.read_bytes("path")?;
        String::from_utf8(bytes).map_err(|_| CodecError::InvalidPath { offset })
    }

    fn read_next(&mut self) -> Result<Option<Instruction>, CodecError> {
        let start = self.pos;
        let Some(raw) = self.read_opcode()? else {
            return Ok(None);
        };
        let opcode = Opcode::try_from(raw).map_err(|opcode| CodecError::UnknownOpcode {
            offset: start,
            opcode,
        })?;
        let inst = match opcode {
            Opcode::Insert => Instruction::Insert {
                offset: self.read_u64("offset")?,
                payload: self.read_bytes("payload")?,
            },
            Opcode::Delete => Instruction::Delete {
                offset: self.read_u64("offset")?,
                count: self.read_u32("count")?,
            },
            Opcode::Update => Instruction::Update {
                offset: self.read_u64("offset")?,
                payload: self.read_bytes("payload")?,
            },
            Opcode::SetFile => Instruction::SetFile {
                path: self.read_path()?,
            },
            Opcode::DelFile => Instruction::DeleteFile {
                path: self.read_path()?,
            },
        };
        Ok(Some(inst))
    }
}

impl<R: Read> Iterator for InstructionReader<R> {
    type Item = Result<Instruction, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(inst)) => Some(Ok(inst)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode a whole script. Fails without returning any instruction if any
/// part of the input is malformed.
pub fn read_instructions<R: Read>(reader: R) -> Result<Vec<Instruction>, CodecError> {
    InstructionReader::new(reader).collect()
}

/// Decode a script held in memory.
pub fn decode_slice(data: &[u8]) -> Result<Vec<Instruction>, CodecError> {
    read_instructions(data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
