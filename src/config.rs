//! Tunables for bundle writes, loadable from a JSON file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bundle::DEFAULT_CHUNK_SIZE;
use crate::codec::DEFAULT_COMPRESSION_LEVEL;
use crate::error::{Error, Result};

/// Default upper bound for a bundle receiving replaced files.
pub const DEFAULT_BUNDLE_SIZE_CAP: usize = 300_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub compression_level:    i32,
    /// Chunk size for bundles created by this crate. Existing bundles keep
    /// their own.
    pub chunk_size:           i32,
    pub bundle_size_cap:      usize,
    /// Append replaced files to the bundle that already holds them instead
    /// of the smallest one.
    pub keep_original_bundle: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            compression_level:    DEFAULT_COMPRESSION_LEVEL,
            chunk_size:           DEFAULT_CHUNK_SIZE,
            bundle_size_cap:      DEFAULT_BUNDLE_SIZE_CAP,
            keep_original_bundle: false,
        }
    }
}

impl StoreOptions {
    pub fn from_json(text: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(text)
            .map_err(|e| Error::ArgumentInvalid(format!("options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size <= 0 {
            return Err(Error::ArgumentInvalid(format!("chunk_size {}", self.chunk_size)));
        }
        if self.bundle_size_cap == 0 {
            return Err(Error::ArgumentInvalid("bundle_size_cap must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let o = StoreOptions::from_json(r#"{ "keep_original_bundle": true }"#).unwrap();
        assert!(o.keep_original_bundle);
        assert_eq!(o.compression_level, 4);
        assert_eq!(o.chunk_size, 262_144);
        assert_eq!(o.bundle_size_cap, 300_000_000);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(matches!(
            StoreOptions::from_json(r#"{ "chunk_size": 0 }"#),
            Err(Error::ArgumentInvalid(_))
        ));
    }
}
