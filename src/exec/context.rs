// Script execution.
//
// An `ExecutionContext` walks an instruction list against a `Storage`,
// keeping at most one stream open: the active file.  `SetFile` swaps it,
// `DeleteFile` may drop it, and content instructions edit it in place.
// Execution stops at the first failing instruction; earlier edits stay
// applied.

use std::io;

use thiserror::Error;

use super::splice::{self, SpliceStream};
use super::storage::{MemoryStorage, Storage, normalize_path};
use crate::patch::instruction::{Instruction, Opcode};

/// Storage key `replay` runs its buffer under.
pub const REPLAY_PATH: &str = "buffer";

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("content instruction with no active file")]
    NoActiveFile,
    #[error("path {path:?} rejected: {reason}")]
    PathRejected { path: String, reason: &'static str },
    #[error("offset {offset} is past the end of the stream (length {len})")]
    OffsetOutOfRange { offset: u64, len: u64 },
    #[error("file {path:?} does not exist")]
    MissingFile { path: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("instruction {index} ({}) failed: {source}", .opcode.name())]
    Instruction {
        index: usize,
        opcode: Opcode,
        #[source]
        source: Box<ExecError>,
    },
}

impl ExecError {
    fn at(self, index: usize, opcode: Opcode) -> Self {
        ExecError::Instruction {
            index,
            opcode,
            source: Box::new(self),
        }
    }

    /// Index of the failing instruction, if the error came from one.
    pub fn index(&self) -> Option<usize> {
        match self {
            ExecError::Instruction { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// The underlying error with any instruction wrapper removed.
    pub fn root(&self) -> &ExecError {
        match self {
            ExecError::Instruction { source, .. } => source.root(),
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

struct Active<T> {
    path: String,
    stream: T,
}

/// Mutable execution state over a storage backend.
///
/// Call [`finish`](Self::finish) when done so the active stream is handed
/// back to storage.
pub struct ExecutionContext<'s, S: Storage> {
    storage: &'s mut S,
    active: Option<Active<S::Stream>>,
    applied: usize,
}

impl<'s, S: Storage> ExecutionContext<'s, S> {
    pub fn new(storage: &'s mut S) -> Self {
        Self {
            storage,
            active: None,
            applied: 0,
        }
    }

    /// Normalized path of the active file.
    pub fn active_path(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.path.as_str())
    }

    /// Instructions applied successfully so far.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Apply one instruction.
    pub fn apply(&mut self, inst: &Instruction) -> Result<(), ExecError> {
        log::trace!("apply {inst:?}");
        match inst {
            Instruction::SetFile { path } => self.set_file(path)?,
            Instruction::DeleteFile { path } => self.delete_file(path)?,
            Instruction::Insert { offset, payload } => {
                let s = self.stream()?;
                let len = s.stream_len()?;
                if *offset > len {
                    return Err(ExecError::OffsetOutOfRange {
                        offset: *offset,
                        len,
                    });
                }
                splice::insert(s, *offset, payload)?;
            }
            Instruction::Delete { offset, count } => {
                let s = self.stream()?;
                let removed = splice::delete(s, *offset, *count as u64)?;
                if removed < *count as u64 {
                    log::trace!("delete at {offset} clamped from {count} to {removed} bytes");
                }
            }
            Instruction::Update { offset, payload } => {
                splice::update(self.stream()?, *offset, payload)?;
            }
        }
        self.applied += 1;
        Ok(())
    }

    /// Make `path` the active file, closing the previous one.
    pub fn set_file(&mut self, path: &str) -> Result<(), ExecError> {
        let key = normalize_path(path)?;
        if self.active_path() == Some(key.as_str()) {
            return Ok(());
        }
        self.close_active()?;
        let stream = self.storage.open(&key)?;
        self.active = Some(Active { path: key, stream });
        Ok(())
    }

    fn delete_file(&mut self, path: &str) -> Result<(), ExecError> {
        let key = normalize_path(path)?;
        if self.active_path() == Some(key.as_str()) {
            self.close_active()?;
        }
        self.storage.remove(&key)
    }

    fn stream(&mut self) -> Result<&mut S::Stream, ExecError> {
        match self.active.as_mut() {
            Some(a) => Ok(&mut a.stream),
            None => Err(ExecError::NoActiveFile),
        }
    }

    fn close_active(&mut self) -> Result<(), ExecError> {
        match self.active.take() {
            Some(a) => self.storage.close(&a.path, a.stream),
            None => Ok(()),
        }
    }

    /// Hand the active stream back to storage.
    pub fn finish(mut self) -> Result<(), ExecError> {
        self.close_active()
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Execute `list` against `storage`.
///
/// `default` names the file content instructions edit before the first
/// `SetFile`. Errors carry the index of the failing instruction; the active
/// stream is still handed back to storage, and the first error wins.
pub fn execute<S: Storage>(
    list: &[Instruction],
    storage: &mut S,
    default: Option<&str>,
) -> Result<(), ExecError> {
    let mut ctx = ExecutionContext::new(storage);
    let result = run(&mut ctx, list, default);
    let applied = ctx.applied();
    let closed = ctx.finish();
    result?;
    closed?;
    log::debug!("executed {applied} instructions");
    Ok(())
}

fn run<S: Storage>(
    ctx: &mut ExecutionContext<'_, S>,
    list: &[Instruction],
    default: Option<&str>,
) -> Result<(), ExecError> {
    if let Some(path) = default {
        ctx.set_file(path)?;
    }
    for (index, inst) in list.iter().enumerate() {
        ctx.apply(inst).map_err(|e| e.at(index, inst.opcode()))?;
    }
    Ok(())
}

/// Run `list` against an in-memory copy of `buffer` and return the result.
///
/// The buffer is the default file, stored as [`REPLAY_PATH`]. A script that
/// deletes it yields an empty buffer.
pub fn replay(list: &[Instruction], buffer: Vec<u8>) -> Result<Vec<u8>, ExecError> {
    let mut storage = MemoryStorage::new();
    storage.insert(REPLAY_PATH, buffer)?;
    execute(list, &mut storage, Some(REPLAY_PATH))?;
    Ok(storage.take(REPLAY_PATH).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(offset: u64, payload: &[u8]) -> Instruction {
        Instruction::Insert {
            offset,
            payload: payload.to_vec(),
        }
    }

    fn update(offset: u64, payload: &[u8]) -> Instruction {
        Instruction::Update {
            offset,
            payload: payload.to_vec(),
        }
    }

    fn delete(offset: u64, count: u32) -> Instruction {
        Instruction::Delete { offset, count }
    }

    fn set(path: &str) -> Instruction {
        Instruction::SetFile { path: path.into() }
    }

    #[test]
    fn replay_applies_in_order() {
        let script = vec![insert(5, b" there"), update(0, b"H"), delete(11, 100)];
        let out = replay(&script, b"hello world".to_vec()).unwrap();
        assert_eq!(out, b"Hello there");
    }

    #[test]
    fn clamped_delete_truncates() {
        let out = replay(&[delete(2, 1_000)], b"abcdef".to_vec()).unwrap();
        assert_eq!(out, b"ab");
        let out = replay(&[delete(100, 5)], b"abc".to_vec()).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn empty_script_is_identity() {
        assert_eq!(replay(&[], b"same".to_vec()).unwrap(), b"same");
    }

    #[test]
    fn multi_file_script() {
        let mut st = MemoryStorage::new().with_file("a", b"alpha".to_vec()).unwrap();
        let script = vec![
            set("a"),
            update(0, b"A"),
            set("dir/b"),
            insert(0, b"bravo"),
            set("a"),
            insert(5, b"!"),
        ];
        execute(&script, &mut st, None).unwrap();
        assert_eq!(st.get("a"), Some(&b"Alpha!"[..]));
        assert_eq!(st.get("dir/b"), Some(&b"bravo"[..]));
    }

    #[test]
    fn content_without_active_file_fails() {
        let mut st = MemoryStorage::new();
        let err = execute(&[insert(0, b"x")], &mut st, None).unwrap_err();
        assert_eq!(err.index(), Some(0));
        assert!(matches!(err.root(), ExecError::NoActiveFile));
    }

    #[test]
    fn delete_active_file_returns_to_no_active() {
        let mut st = MemoryStorage::new().with_file("a", b"data".to_vec()).unwrap();
        let script = vec![
            set("a"),
            Instruction::DeleteFile { path: "./a".into() },
            update(0, b"x"),
        ];
        let err = execute(&script, &mut st, None).unwrap_err();
        assert_eq!(err.index(), Some(2));
        assert!(matches!(err.root(), ExecError::NoActiveFile));
        assert!(!st.contains("a"));
    }

    #[test]
    fn delete_missing_file_fails() {
        let mut st = MemoryStorage::new();
        let err = execute(
            &[Instruction::DeleteFile { path: "nope".into() }],
            &mut st,
            None,
        )
        .unwrap_err();
        assert!(matches!(err.root(), ExecError::MissingFile { .. }));
    }

    #[test]
    fn insert_past_end_fails() {
        let err = replay(&[insert(4, b"x")], b"abc".to_vec()).unwrap_err();
        assert!(matches!(
            err.root(),
            ExecError::OffsetOutOfRange { offset: 4, len: 3 }
        ));
    }

    #[test]
    fn rejected_path_fails_with_index() {
        let mut st = MemoryStorage::new();
        let err = execute(&[set("ok"), set("../escape")], &mut st, None).unwrap_err();
        assert_eq!(err.index(), Some(1));
        assert!(matches!(err.root(), ExecError::PathRejected { .. }));
    }

    #[test]
    fn earlier_edits_survive_failure() {
        let mut st = MemoryStorage::new().with_file("a", b"abc".to_vec()).unwrap();
        let script = vec![update(0, b"X"), insert(99, b"y")];
        assert!(execute(&script, &mut st, Some("a")).is_err());
        assert_eq!(st.get("a"), Some(&b"Xbc"[..]));
    }

    #[test]
    fn setfile_creates_empty_file() {
        let mut st = MemoryStorage::new();
        execute(&[set("fresh.bin")], &mut st, None).unwrap();
        assert_eq!(st.get("fresh.bin"), Some(&b""[..]));
    }

    #[test]
    fn dir_storage_execution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let mut st = crate::exec::storage::DirStorage::new(dir.path());
        let script = vec![
            set("a.txt"),
            insert(5, b" world"),
            set("sub/new.txt"),
            insert(0, b"created"),
        ];
        execute(&script, &mut st, None).unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"hello world");
        assert_eq!(
            std::fs::read(dir.path().join("sub/new.txt")).unwrap(),
            b"created"
        );
    }
}
