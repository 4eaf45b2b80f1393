// Patch execution.
//
// - In-place insert/delete/update on seekable streams (`splice`)
// - Named-stream backends (directory, in-memory) and path policy (`storage`)
// - Execution state machine, `execute` and `replay` (`context`)

pub mod context;
pub mod splice;
pub mod storage;

pub use context::{ExecError, ExecutionContext, REPLAY_PATH, execute, replay};
pub use splice::SpliceStream;
pub use storage::{DirStorage, MemoryStorage, Storage, normalize_path};
