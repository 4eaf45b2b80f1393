// Named-stream storage backends.
//
// Patch scripts address files by relative, `/`-separated paths.  Every
// backend runs them through `normalize_path` first, and `DirStorage` also
// refuses to follow symbolic links, so a script can never reach outside the
// storage root.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use super::context::ExecError;
use super::splice::SpliceStream;

/// Where the executor opens, returns and removes named streams.
pub trait Storage {
    type Stream: SpliceStream;

    /// Open `path` for editing, creating it (and any parent directories)
    /// when absent.
    fn open(&mut self, path: &str) -> Result<Self::Stream, ExecError>;

    /// Hand an opened stream back once editing is done.
    fn close(&mut self, path: &str, stream: Self::Stream) -> Result<(), ExecError>;

    /// Remove `path`. Removing a file that does not exist is an error.
    fn remove(&mut self, path: &str) -> Result<(), ExecError>;
}

// ---------------------------------------------------------------------------
// Path policy
// ---------------------------------------------------------------------------

/// Validate a script path and return its canonical `a/b/c` form.
///
/// Accepted: non-empty relative paths made of normal components; `.`
/// components are dropped. Rejected: absolute paths, roots, drive
/// prefixes, `..`, and paths with nothing left after normalization.
pub fn normalize_path(path: &str) -> Result<String, ExecError> {
    let reject = |reason: &'static str| ExecError::PathRejected {
        path: path.to_string(),
        reason,
    };

    if path.is_empty() {
        return Err(reject("empty path"));
    }
    if path.contains('\0') {
        return Err(reject("contains NUL"));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(name) => match name.to_str() {
                Some(s) => parts.push(s),
                None => return Err(reject("not valid UTF-8")),
            },
            Component::CurDir => {}
            Component::ParentDir => return Err(reject("parent directory component")),
            Component::RootDir | Component::Prefix(_) => return Err(reject("absolute path")),
        }
    }
    if parts.is_empty() {
        return Err(reject("no file name"));
    }
    Ok(parts.join("/"))
}

// ---------------------------------------------------------------------------
// DirStorage
// ---------------------------------------------------------------------------

/// Files under a root directory.
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of a script path. Purely lexical; see
    /// [`DirStorage::contained`] for the checked walk used by `open` and
    /// `remove`.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ExecError> {
        Ok(self.root.join(normalize_path(path)?))
    }

    /// Walk a script path below the root one component at a time, refusing
    /// symbolic links at every level so nothing outside the root is reached.
    /// Missing directories are created when `create` is set; otherwise a
    /// missing directory means the file is missing.
    pub fn contained(&self, path: &str, create: bool) -> Result<PathBuf, ExecError> {
        let rel = normalize_path(path)?;
        if create {
            fs::create_dir_all(&self.root)?;
        }

        let mut full = self.root.clone();
        let mut parts = rel.split('/').peekable();
        while let Some(part) = parts.next() {
            full.push(part);
            let is_dir = parts.peek().is_some();
            match fs::symlink_metadata(&full) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(ExecError::PathRejected {
                        path: path.to_string(),
                        reason: "crosses a symbolic link",
                    });
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if !is_dir {
                        break;
                    }
                    if !create {
                        return Err(ExecError::MissingFile {
                            path: path.to_string(),
                        });
                    }
                    match fs::create_dir(&full) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(full)
    }
}

impl Storage for DirStorage {
    type Stream = File;

    fn open(&mut self, path: &str) -> Result<File, ExecError> {
        let full = self.contained(path, true)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&full)?;
        log::trace!("opened {}", full.display());
        Ok(file)
    }

    fn close(&mut self, _path: &str, stream: File) -> Result<(), ExecError> {
        stream.sync_data()?;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), ExecError> {
        let full = self.contained(path, false)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ExecError::MissingFile {
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// Named in-memory buffers, keyed by normalized path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStorage {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<Self, ExecError> {
        self.insert(path, data)?;
        Ok(self)
    }

    /// Store `data` under `path`, replacing any previous contents.
    pub fn insert(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<(), ExecError> {
        self.files.insert(normalize_path(path)?, data.into());
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        let key = normalize_path(path).ok()?;
        self.files.get(&key).map(Vec::as_slice)
    }

    pub fn take(&mut self, path: &str) -> Option<Vec<u8>> {
        let key = normalize_path(path).ok()?;
        self.files.remove(&key)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn into_files(self) -> BTreeMap<String, Vec<u8>> {
        self.files
    }
}

impl Storage for MemoryStorage {
    type Stream = Cursor<Vec<u8>>;

    fn open(&mut self, path: &str) -> Result<Self::Stream, ExecError> {
        let key = normalize_path(path)?;
        Ok(Cursor::new(self.files.remove(&key).unwrap_or_default()))
    }

    fn close(&mut self, path: &str, stream: Self::Stream) -> Result<(), ExecError> {
        let key = normalize_path(path)?;
        self.files.insert(key, stream.into_inner());
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), ExecError> {
        let key = normalize_path(path)?;
        match self.files.remove(&key) {
            Some(_) => Ok(()),
            None => Err(ExecError::MissingFile {
                path: path.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_relative_paths() {
        assert_eq!(normalize_path("a.txt").unwrap(), "a.txt");
        assert_eq!(normalize_path("dir/sub/b.bin").unwrap(), "dir/sub/b.bin");
        assert_eq!(normalize_path("./dir/./c").unwrap(), "dir/c");
        assert_eq!(normalize_path("dir//c").unwrap(), "dir/c");
    }

    #[test]
    fn normalize_rejects_escapes() {
        for bad in ["", ".", "..", "../x", "a/../../x", "/etc/passwd", "a\0b"] {
            assert!(
                matches!(normalize_path(bad), Err(ExecError::PathRejected { .. })),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn memory_open_creates_and_close_stores() {
        let mut st = MemoryStorage::new();
        let mut s = st.open("new.bin").unwrap();
        assert!(!st.contains("new.bin"));
        s.set_stream_len(3).unwrap();
        st.close("new.bin", s).unwrap();
        assert_eq!(st.get("new.bin"), Some(&[0u8, 0, 0][..]));
    }

    #[test]
    fn memory_remove_missing_is_error() {
        let mut st = MemoryStorage::new().with_file("a", b"x".to_vec()).unwrap();
        st.remove("./a").unwrap();
        assert!(matches!(st.remove("a"), Err(ExecError::MissingFile { .. })));
    }

    #[test]
    fn dir_storage_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DirStorage::new(dir.path());
        let f = st.open("deep/nested/file.txt").unwrap();
        st.close("deep/nested/file.txt", f).unwrap();
        assert!(dir.path().join("deep/nested/file.txt").is_file());

        st.remove("deep/nested/file.txt").unwrap();
        assert!(matches!(
            st.remove("deep/nested/file.txt"),
            Err(ExecError::MissingFile { .. })
        ));
    }

    #[test]
    fn dir_storage_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DirStorage::new(dir.path().join("root"));
        assert!(matches!(st.open("../outside"), Err(ExecError::PathRejected { .. })));
        assert!(!dir.path().join("outside").exists());
    }

    #[test]
    fn dir_storage_remove_under_missing_dir_is_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DirStorage::new(dir.path());
        assert!(matches!(st.remove("no/such/file"), Err(ExecError::MissingFile { .. })));
        assert!(!dir.path().join("no").exists());
    }

    #[cfg(unix)]
    #[test]
    fn dir_storage_refuses_symlinked_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink("../outside", root.join("link")).unwrap();

        let mut st = DirStorage::new(&root);
        assert!(matches!(
            st.open("link/escaped.txt"),
            Err(ExecError::PathRejected { .. })
        ));
        assert!(matches!(
            st.open("link/new/deeper.txt"),
            Err(ExecError::PathRejected { .. })
        ));
        assert!(!outside.join("escaped.txt").exists());
        assert!(!outside.join("new").exists());
    }

    #[cfg(unix)]
    #[test]
    fn dir_storage_refuses_symlinked_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let victim = dir.path().join("victim.txt");
        fs::write(&victim, b"keep").unwrap();
        std::os::unix::fs::symlink(&victim, root.join("alias.txt")).unwrap();

        let mut st = DirStorage::new(&root);
        assert!(matches!(st.open("alias.txt"), Err(ExecError::PathRejected { .. })));
        assert!(matches!(st.remove("alias.txt"), Err(ExecError::PathRejected { .. })));
        assert_eq!(fs::read(&victim).unwrap(), b"keep");
        assert!(root.join("alias.txt").symlink_metadata().is_ok());
    }
}
