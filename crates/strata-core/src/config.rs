//! Allocation configuration for tensor creation.

use serde::{Deserialize, Serialize};

use crate::error::TensorError;
use crate::Result;

/// Default storage alignment: one cache line, enough for AVX-512 loads.
pub const DEFAULT_ALIGNMENT: usize = 64;

/// Controls how tensor storage is allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorConfig {
    /// Byte alignment of every storage allocation. Must be a power of two.
    /// The effective alignment is never below the dtype's natural alignment.
    pub alignment: usize,

    /// Upper bound on a single allocation in bytes. Requests above it fail
    /// with `OutOfMemory` without touching the platform allocator.
    pub max_alloc_bytes: Option<usize>,
}

impl Default for TensorConfig {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            max_alloc_bytes: None,
        }
    }
}

impl TensorConfig {
    /// Align only to each dtype's natural alignment.
    pub fn packed() -> Self {
        Self {
            alignment: 1,
            max_alloc_bytes: None,
        }
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_max_alloc_bytes(mut self, limit: usize) -> Self {
        self.max_alloc_bytes = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() {
            return Err(TensorError::InvalidAlignment(self.alignment));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = TensorConfig::default();
        assert_eq!(c.alignment, 64);
        assert_eq!(c.max_alloc_bytes, None);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_validate_alignment() {
        assert!(TensorConfig::packed().validate().is_ok());
        assert_eq!(
            TensorConfig::default().with_alignment(48).validate(),
            Err(TensorError::InvalidAlignment(48))
        );
        assert!(TensorConfig::default().with_alignment(0).validate().is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let c: TensorConfig = serde_json::from_str(r#"{"max_alloc_bytes": 4096}"#).unwrap();
        assert_eq!(c.alignment, DEFAULT_ALIGNMENT);
        assert_eq!(c.max_alloc_bytes, Some(4096));

        let c: TensorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c, TensorConfig::default());
    }
}
