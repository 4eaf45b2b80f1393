// Checksums and chunker tuning.
//
// - Rolling window checksum and boundary predicate (`rolling`)
// - Chunker profiles (`config`)

pub mod config;
pub mod rolling;

pub use config::{ChunkerConfig, ConfigError, config_for_level};
pub use rolling::RollingChecksum;
