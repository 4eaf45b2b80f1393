// Instruction generator.
//
// Aligns the new chunk tree against the old one and emits the edits that
// turn old into new.
//
// Alignment picks the largest set of (new, old) chunk pairs with equal
// digests whose order agrees in both streams: a longest increasing
// subsequence over candidate old indices, visited per new chunk in
// descending order (Hunt-Szymanski), so each old chunk is used at most once.
// Matched chunks are retained and cost nothing.
//
// Before aligning, the common leading and trailing bytes of the two streams
// are set aside; only chunks lying wholly between them take part.  An
// append or a truncation therefore always comes out as a single edit at the
// old end, however self-similar the content.
//
// Emission walks the gaps between matched chunks left to right.  A cursor
// holds the length of the new-stream prefix that is already final, which is
// exactly where the next edit lands in the partially patched stream.  Each
// gap is trimmed of its common prefix and suffix bytes and then becomes an
// UPDATE over the overlapping part plus an INSERT or DELETE of the excess.

use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;

use thiserror::Error;

use super::instruction::Instruction;
use super::pipeline;
use crate::chunk::tree::{AlignmentError, Chunk, ChunkTree};

/// Old chunks considered per new chunk when a digest repeats.
pub const MAX_CANDIDATES: usize = 32;

const MAX_SPAN: u64 = u32::MAX as u64;

/// Block size for the shared prefix and suffix scans.
const SCAN_BLOCK: u64 = 64 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("{which} chunk tree does not cover its stream: {source}")]
    Alignment {
        which: &'static str,
        #[source]
        source: AlignmentError,
    },
    #[error("I/O error reading the {which} stream: {source}")]
    Io {
        which: &'static str,
        #[source]
        source: io::Error,
    },
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

/// A retained chunk: `new_index` in the new tree reuses `old_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMatch {
    pub new_index: usize,
    pub old_index: usize,
}

struct ChainNode {
    m: ChunkMatch,
    prev: Option<usize>,
}

/// Order-preserving chunk matches, ascending in both trees.
pub fn align(old: &ChunkTree, new: &ChunkTree) -> Vec<ChunkMatch> {
    align_within(old, new, 0..old.covered_len(), 0..new.covered_len())
}

fn within(chunk: &Chunk, span: &Range<u64>) -> bool {
    chunk.start_offset >= span.start && chunk.end_offset() <= span.end
}

/// [`align`] restricted to chunks lying wholly inside the given byte spans.
fn align_within(old: &ChunkTree, new: &ChunkTree, old_span: Range<u64>, new_span: Range<u64>) -> Vec<ChunkMatch> {
    if old.is_empty() || new.is_empty() {
        return Vec::new();
    }

    let index = old.digest_index();
    let old_chunks = old.chunks();
    let mut nodes: Vec<ChainNode> = Vec::new();
    // tails[k]: node ending the best chain of length k + 1 (smallest old index).
    let mut tails: Vec<usize> = Vec::new();

    for (new_index, chunk) in new.chunks().iter().enumerate() {
        if !within(chunk, &new_span) {
            continue;
        }
        let Some(cands) = index.get(&chunk.digest) else {
            continue;
        };

        // Candidates nearest the new chunk's offset.
        let p = cands.partition_point(|&oi| old_chunks[oi].start_offset < chunk.start_offset);
        let start = p
            .saturating_sub(MAX_CANDIDATES / 2)
            .min(cands.len().saturating_sub(MAX_CANDIDATES));
        let end = (start + MAX_CANDIDATES).min(cands.len());

        for &old_index in cands[start..end].iter().rev() {
            if !within(&old_chunks[old_index], &old_span) {
                continue;
            }
            let k = tails.partition_point(|&n| nodes[n].m.old_index < old_index);
            // An equal tail already ends at this old chunk; keep the earlier match.
            if k < tails.len() && nodes[tails[k]].m.old_index == old_index {
                continue;
            }
            let prev = k.checked_sub(1).map(|j| tails[j]);
            nodes.push(ChainNode {
                m: ChunkMatch {
                    new_index,
                    old_index,
                },
                prev,
            });
            let id = nodes.len() - 1;
            if k == tails.len() {
                tails.push(id);
            } else {
                tails[k] = id;
            }
        }
    }

    let mut matches = Vec::with_capacity(tails.len());
    let mut cur = tails.last().copied();
    while let Some(id) = cur {
        matches.push(nodes[id].m);
        cur = nodes[id].prev;
    }
    matches.reverse();
    matches
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

struct Emitter<'a, O, N> {
    old: &'a mut O,
    new: &'a mut N,
    cursor: u64,
    out: Vec<Instruction>,
}

impl<O: Read + Seek, N: Read + Seek> Emitter<'_, O, N> {
    /// Emit edits replacing old `[o_start, o_end)` with new `[n_start, n_end)`
    /// at the cursor, then advance the cursor past the new bytes.
    fn gap(&mut self, o_start: u64, o_end: u64, n_start: u64, n_end: u64) -> Result<(), GenerateError> {
        let old_len = o_end - o_start;
        let new_len = n_end - n_start;

        if old_len == 0 && new_len > 0 {
            let bytes = read_range(self.new, n_start, new_len).map_err(new_io)?;
            self.insert(self.cursor, &bytes);
        } else if new_len == 0 && old_len > 0 {
            self.delete(self.cursor, old_len);
        } else if old_len > 0 {
            let o = read_range(self.old, o_start, old_len).map_err(old_io)?;
            let n = read_range(self.new, n_start, new_len).map_err(new_io)?;

            let prefix = common_prefix(&o, &n);
            let suffix = common_suffix(&o[prefix..], &n[prefix..]);
            let o_mid = &o[prefix..o.len() - suffix];
            let n_mid = &n[prefix..n.len() - suffix];

            let at = self.cursor + prefix as u64;
            let overlap = o_mid.len().min(n_mid.len());
            if overlap > 0 {
                self.update(at, &n_mid[..overlap]);
            }
            let at = at + overlap as u64;
            if n_mid.len() > overlap {
                self.insert(at, &n_mid[overlap..]);
            } else if o_mid.len() > overlap {
                self.delete(at, (o_mid.len() - overlap) as u64);
            }
        }

        self.cursor += new_len;
        Ok(())
    }

    fn insert(&mut self, offset: u64, bytes: &[u8]) {
        for (i, piece) in bytes.chunks(MAX_SPAN as usize).enumerate() {
            self.out.push(Instruction::Insert {
                offset: offset + i as u64 * MAX_SPAN,
                payload: piece.to_vec(),
            });
        }
    }

    fn update(&mut self, offset: u64, bytes: &[u8]) {
        for (i, piece) in bytes.chunks(MAX_SPAN as usize).enumerate() {
            self.out.push(Instruction::Update {
                offset: offset + i as u64 * MAX_SPAN,
                payload: piece.to_vec(),
            });
        }
    }

    fn delete(&mut self, offset: u64, mut count: u64) {
        while count > 0 {
            let n = count.min(MAX_SPAN);
            self.out.push(Instruction::Delete {
                offset,
                count: n as u32,
            });
            count -= n;
        }
    }
}

fn old_io(source: io::Error) -> GenerateError {
    GenerateError::Io { which: "old", source }
}

fn new_io(source: io::Error) -> GenerateError {
    GenerateError::Io { which: "new", source }
}

fn read_range<R: Read + Seek>(stream: &mut R, start: u64, len: u64) -> io::Result<Vec<u8>> {
    let len = usize::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "range exceeds address space"))?;
    stream.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

fn stream_len<R: Seek>(stream: &mut R) -> io::Result<u64> {
    stream.seek(SeekFrom::End(0))
}

/// Length of the run both streams start with, at most `limit`.
fn shared_prefix<O, N>(old: &mut O, new: &mut N, limit: u64) -> Result<u64, GenerateError>
where
    O: Read + Seek,
    N: Read + Seek,
{
    let mut done = 0u64;
    while done < limit {
        let n = (limit - done).min(SCAN_BLOCK);
        let a = read_range(old, done, n).map_err(old_io)?;
        let b = read_range(new, done, n).map_err(new_io)?;
        let same = common_prefix(&a, &b);
        done += same as u64;
        if same < a.len() {
            break;
        }
    }
    Ok(done)
}

/// Length of the run both streams end with, at most `limit`.
fn shared_suffix<O, N>(old: &mut O, new: &mut N, old_len: u64, new_len: u64, limit: u64) -> Result<u64, GenerateError>
where
    O: Read + Seek,
    N: Read + Seek,
{
    let mut done = 0u64;
    while done < limit {
        let n = (limit - done).min(SCAN_BLOCK);
        let a = read_range(old, old_len - done - n, n).map_err(old_io)?;
        let b = read_range(new, new_len - done - n, n).map_err(new_io)?;
        let same = common_suffix(&a, &b);
        done += same as u64;
        if same < a.len() {
            break;
        }
    }
    Ok(done)
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Generate the script turning `old_stream` into `new_stream`.
///
/// `target_path` names the file the script edits when it is not the
/// caller's current default context; a leading `SetFile` is then emitted
/// whenever the script edits anything or the old version is empty (the file
/// may not exist yet). With `None` the script edits the default context.
///
/// Replaying the result against an unmodified copy of `old_stream` yields
/// `new_stream` byte for byte.
pub fn generate_instructions<O, N>(
    old_tree: &ChunkTree,
    new_tree: &ChunkTree,
    old_stream: &mut O,
    new_stream: &mut N,
    target_path: Option<&str>,
) -> Result<Vec<Instruction>, GenerateError>
where
    O: Read + Seek,
    N: Read + Seek,
{
    generate(old_tree, new_tree, old_stream, new_stream, target_path, true)
}

/// Like [`generate_instructions`] but skips the coalescing pass.
pub fn generate_uncoalesced<O, N>(
    old_tree: &ChunkTree,
    new_tree: &ChunkTree,
    old_stream: &mut O,
    new_stream: &mut N,
    target_path: Option<&str>,
) -> Result<Vec<Instruction>, GenerateError>
where
    O: Read + Seek,
    N: Read + Seek,
{
    generate(old_tree, new_tree, old_stream, new_stream, target_path, false)
}

fn generate<O, N>(
    old_tree: &ChunkTree,
    new_tree: &ChunkTree,
    old_stream: &mut O,
    new_stream: &mut N,
    target_path: Option<&str>,
    coalesce: bool,
) -> Result<Vec<Instruction>, GenerateError>
where
    O: Read + Seek,
    N: Read + Seek,
{
    let old_len = stream_len(old_stream).map_err(old_io)?;
    let new_len = stream_len(new_stream).map_err(new_io)?;
    old_tree
        .verify(old_len)
        .map_err(|source| GenerateError::Alignment { which: "old", source })?;
    new_tree
        .verify(new_len)
        .map_err(|source| GenerateError::Alignment { which: "new", source })?;

    let prefix = shared_prefix(old_stream, new_stream, old_len.min(new_len))?;
    let suffix = shared_suffix(
        old_stream,
        new_stream,
        old_len,
        new_len,
        old_len.min(new_len) - prefix,
    )?;
    let old_end = old_len - suffix;
    let new_end = new_len - suffix;

    let matches = align_within(old_tree, new_tree, prefix..old_end, prefix..new_end);
    let old_chunks = old_tree.chunks();
    let new_chunks = new_tree.chunks();

    let mut em = Emitter {
        old: old_stream,
        new: new_stream,
        cursor: prefix,
        out: Vec::new(),
    };
    let mut old_pos = prefix;
    let mut new_pos = prefix;

    for m in &matches {
        let oc = &old_chunks[m.old_index];
        let nc = &new_chunks[m.new_index];
        em.gap(old_pos, oc.start_offset, new_pos, nc.start_offset)?;
        em.cursor += nc.length as u64;
        old_pos = oc.end_offset();
        new_pos = nc.end_offset();
    }
    em.gap(old_pos, old_end, new_pos, new_end)?;
    em.cursor += suffix;
    debug_assert_eq!(em.cursor, new_len);

    let mut script = if coalesce {
        pipeline::coalesce(em.out)
    } else {
        em.out
    };
    if let Some(path) = target_path
        && (!script.is_empty() || old_tree.is_empty())
    {
        script.insert(
            0,
            Instruction::SetFile {
                path: path.to_string(),
            },
        );
    }

    log::debug!(
        "generated {} instructions: {} of {} new chunks retained ({} -> {} bytes)",
        script.len(),
        matches.len(),
        new_chunks.len(),
        old_len,
        new_len
    );
    Ok(script)
}

/// Script removing `path` entirely.
pub fn removal_script(path: &str) -> Vec<Instruction> {
    vec![Instruction::DeleteFile {
        path: path.to_string(),
    }]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
