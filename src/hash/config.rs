// Chunker profiles.
//
// Each profile bounds the chunk sizes produced by the content-defined
// chunker and fixes the width of the rolling checksum window.

use thiserror::Error;

/// Default rolling window width.
pub const DEFAULT_WINDOW: usize = 48;

/// Largest chunk length representable in a `Chunk`.
pub const MAX_CHUNK_LIMIT: usize = u32::MAX as usize;

/// Chunker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Name for display purposes.
    pub name: &'static str,
    /// Rolling checksum window width.
    pub window: usize,
    /// No boundary is declared before a chunk reaches this length.
    pub min_size: usize,
    /// Expected chunk length; the boundary predicate fires about once per
    /// `target_size` bytes.
    pub target_size: usize,
    /// A chunk is cut unconditionally at this length.
    pub max_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("minimum chunk size must be non-zero")]
    ZeroMinimum,
    #[error("target chunk size {0} must be at least 2")]
    TargetTooSmall(usize),
    #[error("chunk sizes must satisfy min <= target <= max (got {min}, {target}, {max})")]
    Unordered {
        min: usize,
        target: usize,
        max: usize,
    },
    #[error("maximum chunk size {0} exceeds u32::MAX")]
    MaxTooLarge(usize),
}

impl ChunkerConfig {
    /// Build a validated custom profile.
    pub fn custom(min_size: usize, target_size: usize, max_size: usize) -> Result<Self, ConfigError> {
        let cfg = Self {
            name: "custom",
            window: DEFAULT_WINDOW,
            min_size,
            target_size,
            max_size,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the size ordering and limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_size == 0 {
            return Err(ConfigError::ZeroMinimum);
        }
        if self.target_size < 2 {
            return Err(ConfigError::TargetTooSmall(self.target_size));
        }
        if self.min_size > self.target_size || self.target_size > self.max_size {
            return Err(ConfigError::Unordered {
                min: self.min_size,
                target: self.target_size,
                max: self.max_size,
            });
        }
        if self.max_size > MAX_CHUNK_LIMIT {
            return Err(ConfigError::MaxTooLarge(self.max_size));
        }
        Ok(())
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        DEFAULT
    }
}

/// Levels mapping to profiles.
///
/// - Levels 0-3: coarse (fewer, larger chunks; fastest alignment)
/// - Levels 4-6: default
/// - Levels 7-9: fine (smaller chunks; tighter scripts)
pub fn config_for_level(level: u32) -> ChunkerConfig {
    match level {
        0..=3 => COARSE,
        4..=6 => DEFAULT,
        _ => FINE,
    }
}

// ---------------------------------------------------------------------------
// Profile definitions
// ---------------------------------------------------------------------------

pub const FINE: ChunkerConfig = ChunkerConfig {
    name: "fine",
    window: DEFAULT_WINDOW,
    min_size: 256,
    target_size: 1024,
    max_size: 8 * 1024,
};

pub const DEFAULT: ChunkerConfig = ChunkerConfig {
    name: "default",
    window: DEFAULT_WINDOW,
    min_size: 1024,
    target_size: 4 * 1024,
    max_size: 32 * 1024,
};

pub const COARSE: ChunkerConfig = ChunkerConfig {
    name: "coarse",
    window: DEFAULT_WINDOW,
    min_size: 8 * 1024,
    target_size: 32 * 1024,
    max_size: 256 * 1024,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_profiles_validate() {
        for p in [FINE, DEFAULT, COARSE] {
            assert_eq!(p.validate(), Ok(()), "profile {} invalid", p.name);
        }
    }

    #[test]
    fn level_mapping() {
        assert_eq!(config_for_level(0).name, "coarse");
        assert_eq!(config_for_level(3).name, "coarse");
        assert_eq!(config_for_level(4).name, "default");
        assert_eq!(config_for_level(6).name, "default");
        assert_eq!(config_for_level(7).name, "fine");
        assert_eq!(config_for_level(9).name, "fine");
    }

    #[test]
    fn custom_rejects_bad_orderings() {
        assert_eq!(ChunkerConfig::custom(0, 8, 16), Err(ConfigError::ZeroMinimum));
        assert_eq!(
            ChunkerConfig::custom(1, 1, 16),
            Err(ConfigError::TargetTooSmall(1))
        );
        assert!(matches!(
            ChunkerConfig::custom(32, 16, 64),
            Err(ConfigError::Unordered { .. })
        ));
        assert!(ChunkerConfig::custom(4, 16, 64).is_ok());
    }
}
