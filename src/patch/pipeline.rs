// Script optimization pipeline.
//
// Tightens a generated script without changing what it does:
//   - Coalesce INSERTs whose payloads land back to back
//   - Coalesce DELETEs at the same offset
//   - Coalesce UPDATEs over contiguous ranges
//   - Drop repeated SETFILEs naming the already-active file
//   - Remove zero-length edits that cannot fail
//
// Files are tracked by their normalized path, the same key the executor
// uses.  A path that does not normalize never matches anything, so its
// instruction is kept and fails at run time as it would have.

use super::instruction::Instruction;
use crate::exec::normalize_path;

const MAX_SPAN: usize = u32::MAX as usize;

/// Optimize an instruction list.
///
/// Replaying the result against any storage yields the same files as
/// replaying the input, and fails exactly when the input fails.
pub fn coalesce(instructions: Vec<Instruction>) -> Vec<Instruction> {
    if instructions.is_empty() {
        return instructions;
    }

    let before = instructions.len();
    let mut result: Vec<Instruction> = Vec::with_capacity(before);
    // Normalized path of the file the script itself has selected.
    let mut active: Option<String> = None;

    for inst in instructions {
        match &inst {
            Instruction::SetFile { path } => {
                let key = normalize_path(path).ok();
                if key.is_some() && key == active {
                    continue;
                }
                active = key;
            }
            Instruction::DeleteFile { path } => {
                if let Ok(key) = normalize_path(path)
                    && active.as_deref() == Some(key.as_str())
                {
                    active = None;
                }
            }
            _ if active.is_some() && is_noop_edit(&inst) => continue,
            _ => {}
        }

        let inst = match result.last_mut() {
            Some(last) => match try_merge(last, inst) {
                None => continue,
                Some(rest) => rest,
            },
            None => inst,
        };
        result.push(inst);
    }

    if result.len() != before {
        log::trace!("coalesced {before} instructions into {}", result.len());
    }
    result
}

/// Zero-length edits that succeed on any open stream. An empty INSERT past
/// the end still fails, so only one at offset 0 qualifies.
fn is_noop_edit(inst: &Instruction) -> bool {
    match inst {
        Instruction::Insert { offset, payload } => payload.is_empty() && *offset == 0,
        Instruction::Delete { count, .. } => *count == 0,
        _ => false,
    }
}

/// Try to fold `next` into `last`. Returns `None` when merged, or hands
/// `next` back untouched.
fn try_merge(last: &mut Instruction, next: Instruction) -> Option<Instruction> {
    match (last, next) {
        // Back-to-back inserts: the second lands right after the first.
        (
            Instruction::Insert {
                offset: o1,
                payload: p1,
            },
            Instruction::Insert {
                offset: o2,
                payload: p2,
            },
        ) if o2 == *o1 + p1.len() as u64 && p1.len() + p2.len() <= MAX_SPAN => {
            p1.extend_from_slice(&p2);
            None
        }

        // Insert at the same offset: the second goes in front of the first.
        (
            Instruction::Insert {
                offset: o1,
                payload: p1,
            },
            Instruction::Insert {
                offset: o2,
                payload: mut p2,
            },
        ) if o2 == *o1 && p1.len() + p2.len() <= MAX_SPAN => {
            p2.extend_from_slice(p1);
            *p1 = p2;
            None
        }

        // Deletes at the same offset remove consecutive spans.
        (
            Instruction::Delete {
                offset: o1,
                count: c1,
            },
            Instruction::Delete {
                offset: o2,
                count: c2,
            },
        ) if o2 == *o1 && c1.checked_add(c2).is_some() => {
            *c1 += c2;
            None
        }

        // Contiguous overwrites.
        (
            Instruction::Update {
                offset: o1,
                payload: p1,
            },
            Instruction::Update {
                offset: o2,
                payload: p2,
            },
        ) if o2 == *o1 + p1.len() as u64 && p1.len() + p2.len() <= MAX_SPAN => {
            p1.extend_from_slice(&p2);
            None
        }

        (_, next) => Some(next),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
