//! Input shape validation for the attention layers.

use candle_core::{Result, Tensor};

/// Raised before any computation when an input volume does not match the
/// layer's expected geometry.
#[derive(Debug, thiserror::Error)]
pub enum ShapeMismatch {
    #[error("expected a (batch, time, height, width, dim) tensor, got shape {shape:?}")]
    Rank { shape: Vec<usize> },
    #[error("input channel dim {got} does not match layer dim {expected}")]
    Channels { got: usize, expected: usize },
    #[error("inner dim {inner} does not split evenly into {heads} heads")]
    HeadSplit { inner: usize, heads: usize },
}

/// Validate a (B, T, H, W, D) volume against the layer dim and return its
/// dimensions.
pub(crate) fn check_volume(
    x: &Tensor,
    dim: usize,
) -> Result<(usize, usize, usize, usize, usize)> {
    if x.rank() != 5 {
        return Err(candle_core::Error::wrap(ShapeMismatch::Rank {
            shape: x.dims().to_vec(),
        }));
    }
    let (b, t, h, w, d) = x.dims5()?;
    if d != dim {
        return Err(candle_core::Error::wrap(ShapeMismatch::Channels {
            got: d,
            expected: dim,
        }));
    }
    Ok((b, t, h, w, d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_check_volume_accepts_rank_5() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::zeros((2, 4, 3, 3, 32), DType::F32, &device)?;
        assert_eq!(check_volume(&x, 32)?, (2, 4, 3, 3, 32));
        Ok(())
    }

    #[test]
    fn test_check_volume_rejects_bad_rank_and_dim() -> Result<()> {
        let device = Device::Cpu;
        let rank4 = Tensor::zeros((2, 4, 3, 32), DType::F32, &device)?;
        assert!(check_volume(&rank4, 32).is_err());

        let bad_dim = Tensor::zeros((2, 4, 3, 3, 16), DType::F32, &device)?;
        assert!(check_volume(&bad_dim, 32).is_err());
        Ok(())
    }
}
