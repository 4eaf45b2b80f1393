// File-level helpers for creating and applying patches.
//
// Provides `diff_files()`, `apply_patch()` and `apply_file_atomic()`, which
// wrap chunking, generation, the codec and the executor with buffered file
// I/O.  SHA-256 checksums of the versions involved are reported in the stats.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::chunk::{ChunkError, ChunkTree, Chunker};
use crate::engine::DiffOptions;
use crate::exec::{self, DirStorage, ExecError};
use crate::patch::codec::{self, CodecError};
use crate::patch::generator::{self, GenerateError};
use crate::patch::instruction::{Instruction, ScriptSummary};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `diff_files()`.
#[derive(Debug, Clone)]
pub struct DiffStats {
    /// Old file size in bytes.
    pub old_size: u64,
    /// New file size in bytes.
    pub new_size: u64,
    /// Chunks in the old and new versions.
    pub old_chunks: usize,
    pub new_chunks: usize,
    /// Instructions in the written script.
    pub instructions: usize,
    /// Literal bytes carried by the script.
    pub literal_bytes: u64,
    /// Encoded patch size in bytes.
    pub patch_size: u64,
    pub old_sha256: [u8; 32],
    pub new_sha256: [u8; 32],
}

/// Statistics returned by `apply_patch()` and `apply_file_atomic()`.
#[derive(Debug, Clone)]
pub struct ApplyStats {
    /// Patch file size in bytes.
    pub patch_size: u64,
    /// Instructions executed.
    pub instructions: usize,
    pub summary: ScriptSummary,
    /// Size of the patched file (single-target application only).
    pub output_size: Option<u64>,
    /// SHA-256 of the patched file (single-target application only).
    pub output_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file-level operations.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("chunking failed: {0}")]
    Chunk(#[from] ChunkError),
    #[error("generation failed: {0}")]
    Generate(#[from] GenerateError),
    #[error("invalid patch: {0}")]
    Codec(#[from] CodecError),
    #[error("patch failed: {0}")]
    Exec(#[from] ExecError),
    #[error("patch edits both {first:?} and {second:?}; expected a single target")]
    MultipleTargets { first: String, second: String },
    #[error("patch removes {0:?}; cannot apply to a single target")]
    RemovesFile(String),
}

// ---------------------------------------------------------------------------
// Buffer size and hashing
// ---------------------------------------------------------------------------

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

/// SHA-256 of everything `reader` yields.
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

pub fn sha256_file(path: &Path) -> io::Result<[u8; 32]> {
    sha256_reader(File::open(path)?)
}

/// Lowercase hex rendering of a digest.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// diff_files
// ---------------------------------------------------------------------------

fn chunk_file(chunker: &Chunker, path: &Path) -> Result<ChunkTree, ChunkError> {
    let mut reader = BufReader::with_capacity(BUF_SIZE, File::open(path)?);
    chunker.chunk(&mut reader)
}

#[cfg(feature = "parallel")]
fn chunk_files(chunker: &Chunker, old: &Path, new: &Path) -> Result<(ChunkTree, ChunkTree), ChunkError> {
    let (old_tree, new_tree) = rayon::join(|| chunk_file(chunker, old), || chunk_file(chunker, new));
    Ok((old_tree?, new_tree?))
}

#[cfg(not(feature = "parallel"))]
fn chunk_files(chunker: &Chunker, old: &Path, new: &Path) -> Result<(ChunkTree, ChunkTree), ChunkError> {
    Ok((chunk_file(chunker, old)?, chunk_file(chunker, new)?))
}

/// Write the patch turning `old_path` into `new_path` to `patch_path`.
///
/// With `label`, the script starts by selecting that file, so it can be
/// applied to a directory tree; without it, the script edits whatever
/// default file it is applied to. Both inputs are streamed; only gap bytes
/// are held in memory.
pub fn diff_files(
    old_path: &Path,
    new_path: &Path,
    patch_path: &Path,
    label: Option<&str>,
    opts: &DiffOptions,
) -> Result<DiffStats, IoError> {
    let chunker = Chunker::new(opts.chunker)?;
    let (old_tree, new_tree) = chunk_files(&chunker, old_path, new_path)?;

    let mut old_reader = BufReader::with_capacity(BUF_SIZE, File::open(old_path)?);
    let mut new_reader = BufReader::with_capacity(BUF_SIZE, File::open(new_path)?);
    let script = if opts.coalesce {
        generator::generate_instructions(&old_tree, &new_tree, &mut old_reader, &mut new_reader, label)?
    } else {
        generator::generate_uncoalesced(&old_tree, &new_tree, &mut old_reader, &mut new_reader, label)?
    };

    let patch_file = File::create(patch_path)?;
    let mut writer = BufWriter::with_capacity(BUF_SIZE, patch_file);
    codec::write_instructions(&mut writer, &script)?;
    let patch_size = writer
        .into_inner()
        .map_err(|e| e.into_error())?
        .metadata()?
        .len();

    let summary = ScriptSummary::of(&script);
    let stats = DiffStats {
        old_size: old_tree.covered_len(),
        new_size: new_tree.covered_len(),
        old_chunks: old_tree.len(),
        new_chunks: new_tree.len(),
        instructions: script.len(),
        literal_bytes: summary.literal_bytes,
        patch_size,
        old_sha256: sha256_file(old_path)?,
        new_sha256: sha256_file(new_path)?,
    };
    log::info!(
        "wrote {} ({} instructions, {} bytes) for {} -> {}",
        patch_path.display(),
        stats.instructions,
        stats.patch_size,
        old_path.display(),
        new_path.display()
    );
    Ok(stats)
}

// ---------------------------------------------------------------------------
// apply_patch
// ---------------------------------------------------------------------------

/// Read and decode a patch file. Returns the script and the file size.
pub fn read_patch(patch_path: &Path) -> Result<(Vec<Instruction>, u64), IoError> {
    let file = File::open(patch_path)?;
    let patch_size = file.metadata()?.len();
    let script = codec::read_instructions(BufReader::with_capacity(BUF_SIZE, file))?;
    Ok((script, patch_size))
}

/// Apply a patch to the files under `root`.
///
/// `default` names the file edited before the script's first `SetFile`.
/// Edits are made in place; on error, instructions before the failing one
/// remain applied.
pub fn apply_patch(patch_path: &Path, root: &Path, default: Option<&str>) -> Result<ApplyStats, IoError> {
    let (script, patch_size) = read_patch(patch_path)?;
    let mut storage = DirStorage::new(root);
    exec::execute(&script, &mut storage, default)?;

    log::info!(
        "applied {} ({} instructions) under {}",
        patch_path.display(),
        script.len(),
        root.display()
    );
    Ok(ApplyStats {
        patch_size,
        instructions: script.len(),
        summary: ScriptSummary::of(&script),
        output_size: None,
        output_sha256: None,
    })
}

// ---------------------------------------------------------------------------
// apply_file_atomic
// ---------------------------------------------------------------------------

/// Uniquely named staging file next to a target. Removed on drop unless
/// committed.
struct ScratchFile {
    path: PathBuf,
    name: String,
    committed: bool,
}

static NEXT_SCRATCH_ID: AtomicUsize = AtomicUsize::new(0);

impl ScratchFile {
    fn create(dir: &Path, target_name: &str) -> io::Result<(Self, File)> {
        loop {
            let unique = NEXT_SCRATCH_ID.fetch_add(1, Ordering::Relaxed);
            let name = format!(".{target_name}.chunkpatch-{}-{unique}", process::id());
            let path = dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok((
                        Self {
                            path,
                            name,
                            committed: false,
                        },
                        file,
                    ));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn commit(mut self, target: &Path) -> io::Result<()> {
        fs::rename(&self.path, target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Fill `scratch` with the current contents of `target`, which may be
/// missing.
fn seed_scratch(target: &Path, scratch: &mut File) -> io::Result<()> {
    let mut src = match File::open(target) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    scratch.set_permissions(src.metadata()?.permissions())?;
    io::copy(&mut src, scratch)?;
    Ok(())
}

/// Apply a single-target patch to `target_path` all or nothing.
///
/// The script runs against a uniquely named scratch copy next to the
/// target, which then replaces it by rename; on any failure the scratch
/// file is removed and the target is untouched. A missing target is
/// treated as empty. Scripts that select more than one file or remove one
/// are rejected before anything is touched.
pub fn apply_file_atomic(patch_path: &Path, target_path: &Path) -> Result<ApplyStats, IoError> {
    let (script, patch_size) = read_patch(patch_path)?;
    let content = single_target_content(&script)?;

    let dir = match target_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = target_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no UTF-8 file name"))?;

    let (scratch, mut file) = ScratchFile::create(&dir, name)?;
    seed_scratch(target_path, &mut file)?;
    drop(file);

    let mut storage = DirStorage::new(&dir);
    exec::execute(&content, &mut storage, Some(&scratch.name))?;
    let output_size = fs::metadata(&scratch.path)?.len();
    let output_sha256 = sha256_file(&scratch.path)?;
    scratch.commit(target_path)?;

    log::info!(
        "patched {} ({} instructions, {} bytes)",
        target_path.display(),
        content.len(),
        output_size
    );
    Ok(ApplyStats {
        patch_size,
        instructions: script.len(),
        summary: ScriptSummary::of(&script),
        output_size: Some(output_size),
        output_sha256: Some(output_sha256),
    })
}

/// Content instructions of a script that edits at most one file.
fn single_target_content(script: &[Instruction]) -> Result<Vec<Instruction>, IoError> {
    let mut selected: Option<(&str, String)> = None;
    let mut content = Vec::with_capacity(script.len());
    for inst in script {
        match inst {
            Instruction::SetFile { path } => {
                let key = exec::normalize_path(path)?;
                match &selected {
                    Some((first, first_key)) if *first_key != key => {
                        return Err(IoError::MultipleTargets {
                            first: first.to_string(),
                            second: path.clone(),
                        });
                    }
                    Some(_) => {}
                    None => selected = Some((path.as_str(), key)),
                }
            }
            Instruction::DeleteFile { path } => return Err(IoError::RemovesFile(path.clone())),
            other => content.push(other.clone()),
        }
    }
    Ok(content)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, data).unwrap();
        path
    }

    fn assert_no_scratch_left(dir: &TempDir) {
        for entry in fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name();
            let name = name.to_string_lossy();
            let ours = format!(".chunkpatch-{}-", process::id());
            assert!(!name.contains(&ours), "scratch file left behind: {name}");
        }
    }

    fn sample(size: usize, seed: u32) -> Vec<u8> {
        (0..size as u32)
            .map(|i| (i.wrapping_add(seed).wrapping_mul(2654435761) >> 11) as u8)
            .collect()
    }

    #[test]
    fn diff_apply_atomic_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let old_data = b"The quick brown fox jumps over the lazy dog. 1234567890";
        let new_data = b"The quick brown cat sits on the lazy mat. 1234567890!!!";
        let old_path = write(&dir, "old.bin", old_data);
        let new_path = write(&dir, "new.bin", new_data);
        let patch_path = dir.path().join("patch.cpt");

        let stats = diff_files(&old_path, &new_path, &patch_path, None, &DiffOptions::default()).unwrap();
        assert_eq!(stats.old_size, old_data.len() as u64);
        assert_eq!(stats.new_size, new_data.len() as u64);
        assert!(stats.patch_size > 0);
        assert_eq!(stats.new_sha256, sha256_reader(&new_data[..]).unwrap());

        let target = write(&dir, "target.bin", old_data);
        let applied = apply_file_atomic(&patch_path, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), new_data);
        assert_eq!(applied.output_sha256, Some(stats.new_sha256));
        assert_no_scratch_left(&dir);
    }

    #[test]
    fn identical_files_give_empty_patch() {
        let dir = tempfile::tempdir().unwrap();
        let data = sample(10_000, 1);
        let a = write(&dir, "a", &data);
        let b = write(&dir, "b", &data);
        let patch = dir.path().join("p");
        let stats = diff_files(&a, &b, &patch, None, &DiffOptions::default()).unwrap();
        assert_eq!(stats.instructions, 0);
        assert_eq!(stats.patch_size, 0);
        assert_eq!(stats.old_sha256, stats.new_sha256);
    }

    #[test]
    fn labelled_patch_applies_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let old_data = sample(50_000, 2);
        let mut new_data = old_data.clone();
        new_data.splice(25_000..25_010, b"replacement text".iter().copied());
        let old_path = write(&dir, "old.bin", &old_data);
        let new_path = write(&dir, "new.bin", &new_data);
        let patch_path = dir.path().join("patch.cpt");

        diff_files(
            &old_path,
            &new_path,
            &patch_path,
            Some("tree/data.bin"),
            &DiffOptions::default(),
        )
        .unwrap();

        write(&dir, "root/tree/data.bin", &old_data);
        let stats = apply_patch(&patch_path, &dir.path().join("root"), None).unwrap();
        assert_eq!(stats.summary.files, 1);
        assert_eq!(fs::read(dir.path().join("root/tree/data.bin")).unwrap(), new_data);
    }

    #[test]
    fn unlabelled_patch_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let old_path = write(&dir, "old.txt", b"version one");
        let new_path = write(&dir, "new.txt", b"version two!");
        let patch_path = dir.path().join("patch.cpt");
        diff_files(&old_path, &new_path, &patch_path, None, &DiffOptions::default()).unwrap();

        apply_patch(&patch_path, dir.path(), Some("old.txt")).unwrap();
        assert_eq!(fs::read(&old_path).unwrap(), b"version two!");
    }

    #[test]
    fn atomic_apply_creates_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let old_path = write(&dir, "empty", b"");
        let new_path = write(&dir, "full", b"fresh contents");
        let patch_path = dir.path().join("patch.cpt");
        diff_files(&old_path, &new_path, &patch_path, None, &DiffOptions::default()).unwrap();

        let target = dir.path().join("created.txt");
        apply_file_atomic(&patch_path, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"fresh contents");
    }

    #[test]
    fn atomic_apply_leaves_target_untouched_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![
            Instruction::Update {
                offset: 0,
                payload: b"X".to_vec(),
            },
            Instruction::Insert {
                offset: 1_000,
                payload: b"y".to_vec(),
            },
        ];
        let patch_path = write(&dir, "bad.cpt", &codec::encode_to_vec(&script).unwrap());
        let target = write(&dir, "t.txt", b"short");

        let err = apply_file_atomic(&patch_path, &target).unwrap_err();
        assert!(matches!(err, IoError::Exec(_)));
        assert_eq!(fs::read(&target).unwrap(), b"short");
        assert_no_scratch_left(&dir);
    }

    #[test]
    fn atomic_apply_rejects_multi_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![
            Instruction::SetFile { path: "a".into() },
            Instruction::SetFile { path: "b".into() },
        ];
        let patch_path = write(&dir, "multi.cpt", &codec::encode_to_vec(&script).unwrap());
        let target = write(&dir, "t", b"x");
        assert!(matches!(
            apply_file_atomic(&patch_path, &target),
            Err(IoError::MultipleTargets { .. })
        ));

        let script = generator::removal_script("t");
        let patch_path = write(&dir, "rm.cpt", &codec::encode_to_vec(&script).unwrap());
        assert!(matches!(
            apply_file_atomic(&patch_path, &target),
            Err(IoError::RemovesFile(_))
        ));
        assert_eq!(fs::read(&target).unwrap(), b"x");
    }

    #[test]
    fn atomic_apply_leaves_foreign_scratch_names_alone() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![Instruction::Update {
            offset: 0,
            payload: b"T".to_vec(),
        }];
        let patch_path = write(&dir, "p.cpt", &codec::encode_to_vec(&script).unwrap());
        let target = write(&dir, "t.txt", b"text");
        let bystander = write(&dir, ".t.txt.chunkpatch-tmp", b"someone else's file");

        apply_file_atomic(&patch_path, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"Text");
        assert_eq!(fs::read(&bystander).unwrap(), b"someone else's file");
        assert_no_scratch_left(&dir);
    }

    #[test]
    fn atomic_apply_accepts_equivalent_setfile_paths() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![
            Instruction::SetFile { path: "a".into() },
            Instruction::Insert {
                offset: 0,
                payload: b"x".to_vec(),
            },
            Instruction::SetFile { path: "./a".into() },
            Instruction::Insert {
                offset: 1,
                payload: b"y".to_vec(),
            },
        ];
        let patch_path = write(&dir, "p.cpt", &codec::encode_to_vec(&script).unwrap());
        let target = write(&dir, "t", b"");
        apply_file_atomic(&patch_path, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"xy");
    }

    #[test]
    fn corrupt_patch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let patch_path = write(&dir, "corrupt.cpt", &[0x01, 0x00, 0x00]);
        let target = write(&dir, "t", b"data");
        assert!(matches!(
            apply_patch(&patch_path, dir.path(), Some("t")),
            Err(IoError::Codec(_))
        ));
        assert_eq!(fs::read(&target).unwrap(), b"data");
    }

    #[test]
    fn large_file_with_scattered_edits() {
        let dir = tempfile::tempdir().unwrap();
        let old_data: Vec<u8> = sample(1 << 20, 3);
        let mut new_data = old_data.clone();
        for i in (0..new_data.len()).step_by(64 * 1024) {
            new_data[i] = new_data[i].wrapping_add(1);
        }
        let old_path = write(&dir, "large_old.bin", &old_data);
        let new_path = write(&dir, "large_new.bin", &new_data);
        let patch_path = dir.path().join("large.cpt");

        let stats = diff_files(&old_path, &new_path, &patch_path, None, &DiffOptions::default()).unwrap();
        assert!(
            stats.patch_size < stats.new_size / 4,
            "patch ({}) should be much smaller than the new file ({})",
            stats.patch_size,
            stats.new_size
        );

        apply_file_atomic(&patch_path, &old_path).unwrap();
        assert_eq!(fs::read(&old_path).unwrap(), new_data);
    }
}
