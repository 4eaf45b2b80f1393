// Patch instructions.
//
// A patch script is an ordered list of these.  Content offsets are always
// relative to the active stream as it stands when the instruction runs, so
// every earlier instruction's length change is already reflected in them.

use std::fmt;

/// Wire opcodes. Values are part of the format and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Insert = 0x01,
    Delete = 0x02,
    Update = 0x03,
    SetFile = 0x04,
    DelFile = 0x05,
}

impl Opcode {
    pub const ALL: [Opcode; 5] = [
        Opcode::Insert,
        Opcode::Delete,
        Opcode::Update,
        Opcode::SetFile,
        Opcode::DelFile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Insert => "INSERT",
            Opcode::Delete => "DELETE",
            Opcode::Update => "UPDATE",
            Opcode::SetFile => "SETFILE",
            Opcode::DelFile => "DELFILE",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Opcode::Insert),
            0x02 => Ok(Opcode::Delete),
            0x03 => Ok(Opcode::Update),
            0x04 => Ok(Opcode::SetFile),
            0x05 => Ok(Opcode::DelFile),
            other => Err(other),
        }
    }
}

/// A single edit operation.
#[derive(Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Insert `payload` at `offset`, shifting later bytes forward.
    Insert { offset: u64, payload: Vec<u8> },
    /// Remove `count` bytes starting at `offset` (clamped to end of stream).
    Delete { offset: u64, count: u32 },
    /// Overwrite bytes starting at `offset`, extending the stream if needed.
    Update { offset: u64, payload: Vec<u8> },
    /// Make `path` the active file, creating it if absent.
    SetFile { path: String },
    /// Remove `path` from storage.
    DeleteFile { path: String },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Insert { .. } => Opcode::Insert,
            Instruction::Delete { .. } => Opcode::Delete,
            Instruction::Update { .. } => Opcode::Update,
            Instruction::SetFile { .. } => Opcode::SetFile,
            Instruction::DeleteFile { .. } => Opcode::DelFile,
        }
    }

    /// True for instructions that edit the active stream.
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            Instruction::Insert { .. } | Instruction::Delete { .. } | Instruction::Update { .. }
        )
    }
}

impl fmt::Debug for Instruction {
    // Payloads are summarised by length so large scripts stay readable.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Insert { offset, payload } => {
                write!(f, "Insert {{ offset: {offset}, len: {} }}", payload.len())
            }
            Instruction::Delete { offset, count } => {
                write!(f, "Delete {{ offset: {offset}, count: {count} }}")
            }
            Instruction::Update { offset, payload } => {
                write!(f, "Update {{ offset: {offset}, len: {} }}", payload.len())
            }
            Instruction::SetFile { path } => write!(f, "SetFile {{ path: {path:?} }}"),
            Instruction::DeleteFile { path } => write!(f, "DeleteFile {{ path: {path:?} }}"),
        }
    }
}

/// Summary counts for a script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptSummary {
    pub inserts: usize,
    pub deletes: usize,
    pub updates: usize,
    pub files: usize,
    pub removals: usize,
    /// Literal bytes carried by Insert and Update payloads.
    pub literal_bytes: u64,
    /// Bytes removed by Delete instructions (before clamping).
    pub deleted_bytes: u64,
}

impl ScriptSummary {
    pub fn of(instructions: &[Instruction]) -> Self {
        let mut s = Self::default();
        for inst in instructions {
            match inst {
                Instruction::Insert { payload, .. } => {
                    s.inserts += 1;
                    s.literal_bytes += payload.len() as u64;
                }
                Instruction::Delete { count, .. } => {
                    s.deletes += 1;
                    s.deleted_bytes += *count as u64;
                }
                Instruction::Update { payload, .. } => {
                    s.updates += 1;
                    s.literal_bytes += payload.len() as u64;
                }
                Instruction::SetFile { .. } => s.files += 1,
                Instruction::DeleteFile { .. } => s.removals += 1,
            }
        }
        s
    }
}
