//! Configuration for the axial attention layers.

use serde::{Deserialize, Serialize};

/// Configuration shared by the temporal and spatial axial attention layers.
///
/// `is_causal` only affects the temporal layer; attention over the spatial
/// plane has no inherent order and is always bidirectional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxialAttentionConfig {
    /// Model dimension (channel width of the input volume)
    pub dim: usize,
    /// Number of attention heads
    #[serde(default = "default_heads")]
    pub heads: usize,
    /// Width of each attention head
    #[serde(default = "default_dim_head")]
    pub dim_head: usize,
    /// Causal masking along the time axis (temporal layer only)
    #[serde(default = "default_true")]
    pub is_causal: bool,
    /// Build the additive sinusoidal positional encoder when no rotary
    /// embedding is supplied. Disabling this leaves the layer with no
    /// positional signal at all.
    #[serde(default = "default_true")]
    pub use_absolute_pos: bool,
}

fn default_heads() -> usize {
    4
}

fn default_dim_head() -> usize {
    32
}

fn default_true() -> bool {
    true
}

impl AxialAttentionConfig {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            heads: default_heads(),
            dim_head: default_dim_head(),
            is_causal: true,
            use_absolute_pos: true,
        }
    }

    pub fn with_heads(mut self, heads: usize) -> Self {
        self.heads = heads;
        self
    }

    pub fn with_dim_head(mut self, dim_head: usize) -> Self {
        self.dim_head = dim_head;
        self
    }

    pub fn with_causal(mut self, is_causal: bool) -> Self {
        self.is_causal = is_causal;
        self
    }

    pub fn without_absolute_pos(mut self) -> Self {
        self.use_absolute_pos = false;
        self
    }

    /// Total projected width of each of Q, K and V.
    pub fn inner_dim(&self) -> usize {
        self.heads * self.dim_head
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // The sinusoidal tables split dim into cos/sin halves.
        if self.dim == 0 || self.dim % 2 != 0 {
            return Err(ConfigError::InvalidDim(self.dim));
        }
        if self.heads == 0 {
            return Err(ConfigError::InvalidHeads(self.heads));
        }
        if self.dim_head == 0 || self.dim_head % 2 != 0 {
            return Err(ConfigError::InvalidDimHead(self.dim_head));
        }
        Ok(())
    }
}

impl Default for AxialAttentionConfig {
    fn default() -> Self {
        Self::new(128)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("dim must be a positive even number, got {0}")]
    InvalidDim(usize),
    #[error("heads must be a positive count, got {0}")]
    InvalidHeads(usize),
    #[error("dim_head must be a positive even number, got {0}")]
    InvalidDimHead(usize),
    #[error("rotary embedding dim must be even and at least 2, got {0}")]
    InvalidRotaryDim(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AxialAttentionConfig::new(64);
        assert_eq!(config.heads, 4);
        assert_eq!(config.dim_head, 32);
        assert!(config.is_causal);
        assert!(config.use_absolute_pos);
        assert_eq!(config.inner_dim(), 128);
    }

    #[test]
    fn test_serde_defaults() {
        let config: AxialAttentionConfig = serde_json::from_str(r#"{"dim": 64}"#).unwrap();
        assert_eq!(config.dim, 64);
        assert_eq!(config.heads, 4);
        assert_eq!(config.dim_head, 32);
        assert!(config.is_causal);
        assert!(config.use_absolute_pos);
    }

    #[test]
    fn test_validate() {
        assert!(AxialAttentionConfig::new(64).validate().is_ok());
        assert!(AxialAttentionConfig::new(0).validate().is_err());
        assert!(AxialAttentionConfig::new(63).validate().is_err());
        assert!(
            AxialAttentionConfig::new(64)
                .with_heads(0)
                .validate()
                .is_err()
        );
        assert!(
            AxialAttentionConfig::new(64)
                .with_dim_head(31)
                .validate()
                .is_err()
        );
    }
}
