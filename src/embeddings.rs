//! Absolute positional encoders for the axial attention layers.
//!
//! The temporal layer adds a per-frame embedding built from a sinusoidal
//! timestep table; the spatial layer adds a per-cell embedding built from a
//! 2D sinusoidal grid. Both tables are passed through the same small MLP
//! before being added to the input volume.

use candle_core::{D, DType, Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear};

/// Sinusoidal features for an index tensor of any shape.
///
/// Output shape is the input shape with a trailing `dim` axis appended.
/// Frequencies are log-spaced over `dim / 2` channels; cosine channels come
/// first, then sine. Odd `dim` is zero-padded on the last channel.
pub fn sinusoidal_embedding(positions: &Tensor, dim: usize) -> Result<Tensor> {
    let device = positions.device();
    let half_dim = dim / 2;
    let mut out_shape = positions.dims().to_vec();
    out_shape.push(dim);

    let positions = positions.flatten_all()?.to_dtype(DType::F32)?;
    let exponent = Tensor::arange(0u32, half_dim as u32, device)?
        .to_dtype(DType::F32)?
        .affine(1.0 / half_dim as f64, 0.0)?
        .affine(-(10000.0f64.ln()), 0.0)?
        .exp()?;

    let emb = positions
        .unsqueeze(1)?
        .broadcast_mul(&exponent.unsqueeze(0)?)?;
    let mut emb = Tensor::cat(&[emb.cos()?, emb.sin()?], D::Minus1)?;

    if 2 * half_dim < dim {
        let n = positions.dims1()?;
        let pad = Tensor::zeros((n, dim - 2 * half_dim), DType::F32, device)?;
        emb = Tensor::cat(&[emb, pad], D::Minus1)?;
    }
    emb.reshape(out_shape)
}

/// Sinusoidal table over a 1-D frame-index sequence.
#[derive(Debug, Clone)]
pub struct Timesteps {
    dim: usize,
}

impl Timesteps {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// `timesteps` is a 1-D index tensor; output is (len, dim).
    pub fn forward(&self, timesteps: &Tensor) -> Result<Tensor> {
        sinusoidal_embedding(timesteps, self.dim)
    }
}

/// Sinusoidal table over a 2-D (H, W) index grid.
///
/// Half of the channels embed the row index, half the column index.
#[derive(Debug, Clone)]
pub struct Positions2d {
    dim: usize,
}

impl Positions2d {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// `rows` and `cols` are (H, W) coordinate grids; output is (H, W, dim).
    pub fn forward(&self, rows: &Tensor, cols: &Tensor) -> Result<Tensor> {
        let half = self.dim / 2;
        let row_emb = sinusoidal_embedding(rows, half)?;
        let col_emb = sinusoidal_embedding(cols, half)?;
        Tensor::cat(&[row_emb, col_emb], D::Minus1)
    }
}

/// Two-layer SiLU MLP applied to a sinusoidal table.
pub struct TimestepEmbedding {
    linear_1: Linear,
    linear_2: Linear,
}

impl TimestepEmbedding {
    pub fn new(
        vb: VarBuilder,
        in_channels: usize,
        time_embed_dim: usize,
        out_dim: usize,
    ) -> Result<Self> {
        let linear_1 = linear(in_channels, time_embed_dim, vb.pp("linear_1"))?;
        let linear_2 = linear(time_embed_dim, out_dim, vb.pp("linear_2"))?;
        Ok(Self { linear_1, linear_2 })
    }

    pub fn forward(&self, emb: &Tensor) -> Result<Tensor> {
        let hidden = self.linear_1.forward(emb)?.silu()?;
        self.linear_2.forward(&hidden)
    }
}
