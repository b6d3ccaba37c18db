//! Rotary position embeddings for the axial attention layers.
//!
//! One `RotaryEmbedding` instance can serve both attention layers: the
//! temporal layer reads the 1-D frequency table, the spatial layer reads the
//! 2-axis table. The tables are angle tensors; rotation happens in
//! [`apply_rotary_emb`] by rotating consecutive element pairs of Q and K.

use candle_core::{D, DType, Device, Result, Tensor};

use crate::config::ConfigError;
use crate::grid::meshgrid_ij;

/// Frequency tables for rotary position encoding of a single head width.
///
/// Constructed once and shared read-only across attention layers; the
/// accessors are pure functions of the requested sequence lengths.
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    dim: usize,
    theta: f64,
}

impl RotaryEmbedding {
    /// `dim` is the per-head width the rotation targets, `theta` the base
    /// frequency (10000.0 is the usual choice).
    pub fn new(dim: usize, theta: f64) -> Result<Self> {
        if dim < 2 || dim % 2 != 0 {
            return Err(candle_core::Error::wrap(ConfigError::InvalidRotaryDim(dim)));
        }
        Ok(Self { dim, theta })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn inv_freq(&self, count: usize, axis_dim: usize, device: &Device) -> Result<Tensor> {
        let inv_freq: Vec<f32> = (0..count)
            .map(|i| 1.0 / (self.theta as f32).powf((2 * i) as f32 / axis_dim as f32))
            .collect();
        Tensor::from_vec(inv_freq, count, device)
    }

    /// Angle table for a 1-D sequence: (len, dim / 2).
    pub fn freqs(&self, len: usize, device: &Device) -> Result<Tensor> {
        let inv_freq = self.inv_freq(self.dim / 2, self.dim, device)?;
        let positions = Tensor::arange(0u32, len as u32, device)?.to_dtype(DType::F32)?;
        positions
            .unsqueeze(1)?
            .broadcast_mul(&inv_freq.unsqueeze(0)?)
    }

    /// Angle table for a 2-D (H, W) grid: (h, w, 2 * (dim / 4)).
    ///
    /// Each spatial axis receives dim / 4 frequencies, spaced as if the
    /// axis owned half the head width; row angles come first, then column
    /// angles. Lanes beyond the table pass through [`apply_rotary_emb`]
    /// unrotated.
    pub fn axial_freqs(&self, h: usize, w: usize, device: &Device) -> Result<Tensor> {
        let per_axis = self.dim / 4;
        if per_axis == 0 {
            candle_core::bail!(
                "axial rotary embedding needs dim >= 4, got {}",
                self.dim
            )
        }
        let inv_freq = self
            .inv_freq(per_axis, self.dim / 2, device)?
            .reshape((1, 1, per_axis))?;

        let rows = Tensor::arange(0u32, h as u32, device)?.to_dtype(DType::F32)?;
        let cols = Tensor::arange(0u32, w as u32, device)?.to_dtype(DType::F32)?;
        let (row_grid, col_grid) = meshgrid_ij(&rows, &cols)?;

        let row_freqs = row_grid.unsqueeze(D::Minus1)?.broadcast_mul(&inv_freq)?;
        let col_freqs = col_grid.unsqueeze(D::Minus1)?.broadcast_mul(&inv_freq)?;
        Tensor::cat(&[row_freqs, col_freqs], D::Minus1)
    }
}

/// Rotate consecutive element pairs of `x` by the angles in `freqs`.
///
/// `freqs` has any leading shape that broadcasts against the trailing axes
/// of `x` (e.g. (T, f) against (B, heads, T, head_dim), or (H, W, f)
/// against (B, heads, H, W, head_dim)). Each angle covers one element pair;
/// lanes beyond `2 * f` are passed through unchanged.
pub fn apply_rotary_emb(x: &Tensor, freqs: &Tensor) -> Result<Tensor> {
    let head_dim = x.dim(D::Minus1)?;
    let n_freqs = freqs.dim(D::Minus1)?;
    let rot_dim = 2 * n_freqs;
    if rot_dim > head_dim {
        candle_core::bail!(
            "rotary table covers {rot_dim} lanes but the head width is only {head_dim}"
        )
    }

    let cos = repeat_interleave_2(&freqs.cos()?)?.to_dtype(x.dtype())?;
    let sin = repeat_interleave_2(&freqs.sin()?)?.to_dtype(x.dtype())?;

    let x_rot = x.narrow(D::Minus1, 0, rot_dim)?;
    let mut pair_shape = x_rot.dims().to_vec();
    pair_shape.pop();
    pair_shape.push(n_freqs);
    pair_shape.push(2);
    let pairs = x_rot.reshape(pair_shape)?;

    let x1 = pairs.narrow(D::Minus1, 0, 1)?.squeeze(D::Minus1)?;
    let x2 = pairs.narrow(D::Minus1, 1, 1)?.squeeze(D::Minus1)?;
    let rotated = Tensor::stack(&[x2.neg()?, x1], D::Minus1)?.flatten_from(D::Minus2)?;

    let out = x_rot
        .broadcast_mul(&cos)?
        .add(&rotated.broadcast_mul(&sin)?)?;

    if rot_dim < head_dim {
        let x_pass = x.narrow(D::Minus1, rot_dim, head_dim - rot_dim)?;
        Tensor::cat(&[out, x_pass], D::Minus1)
    } else {
        Ok(out)
    }
}

/// Repeat the last axis elementwise by 2: [a, b, c] -> [a, a, b, b, c, c].
fn repeat_interleave_2(x: &Tensor) -> Result<Tensor> {
    let x = x.unsqueeze(D::Minus1)?;
    let x = Tensor::cat(&[x.clone(), x], D::Minus1)?;
    x.flatten_from(D::Minus2)
}
