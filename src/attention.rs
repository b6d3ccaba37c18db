//! Axial attention over spatio-temporal volumes.
//!
//! Both layers take a (batch, time, height, width, dim) volume and apply
//! multi-head self-attention along exactly one axis: time (optionally
//! causal) or the flattened spatial plane (never causal). The axes not
//! being attended over are folded into the batch dimension, so every
//! (batch, height, width) column and every (batch, time) frame forms an
//! independent attention group.
//!
//! Positional information is fixed at construction: either an additive
//! sinusoidal encoder applied before the QKV projection, or a shared
//! rotary embedding applied to Q and K after it. Supplying a rotary
//! embedding wins; the absolute encoder is never built alongside it.

use std::sync::Arc;

use candle_core::{D, Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder, linear, linear_no_bias};
use tracing::debug;

use crate::config::AxialAttentionConfig;
use crate::embeddings::{Positions2d, TimestepEmbedding, Timesteps};
use crate::error::{ShapeMismatch, check_volume};
use crate::grid::meshgrid_ij;
use crate::rope::{RotaryEmbedding, apply_rotary_emb};
use crate::sdpa::attend;

// ===========================================================================
// Positional encoders
// ===========================================================================

/// Positional signal for the time axis, selected once at construction.
enum TimePositionalEncoder {
    Absolute {
        steps: Timesteps,
        proj: TimestepEmbedding,
    },
    Rotary(Arc<RotaryEmbedding>),
    None,
}

/// Positional signal for the spatial plane, selected once at construction.
enum SpacePositionalEncoder {
    Absolute {
        grid: Positions2d,
        proj: TimestepEmbedding,
    },
    Rotary(Arc<RotaryEmbedding>),
    None,
}

fn check_head_split(inner_dim: usize, heads: usize) -> Result<()> {
    if heads == 0 || inner_dim % heads != 0 {
        return Err(candle_core::Error::wrap(ShapeMismatch::HeadSplit {
            inner: inner_dim,
            heads,
        }));
    }
    Ok(())
}

// ===========================================================================
// TemporalAxialAttention
// ===========================================================================

/// Multi-head self-attention across the time axis, computed independently
/// for every (batch, height, width) location.
pub struct TemporalAxialAttention {
    to_qkv: Linear,
    to_out: Linear,
    pos: TimePositionalEncoder,
    dim: usize,
    heads: usize,
    head_dim: usize,
    inner_dim: usize,
    scale: f64,
    is_causal: bool,
}

impl TemporalAxialAttention {
    pub fn new(
        vb: VarBuilder,
        config: &AxialAttentionConfig,
        rotary_emb: Option<Arc<RotaryEmbedding>>,
    ) -> Result<Self> {
        config.validate().map_err(candle_core::Error::wrap)?;
        let inner_dim = config.inner_dim();
        check_head_split(inner_dim, config.heads)?;

        let to_qkv = linear_no_bias(config.dim, inner_dim * 3, vb.pp("to_qkv"))?;
        let to_out = linear(inner_dim, config.dim, vb.pp("to_out"))?;

        // Rotary wins; the absolute encoder is never built alongside it.
        let pos = match rotary_emb {
            Some(rope) => TimePositionalEncoder::Rotary(rope),
            None if config.use_absolute_pos => TimePositionalEncoder::Absolute {
                steps: Timesteps::new(config.dim),
                proj: TimestepEmbedding::new(
                    vb.pp("time_pos_embedding"),
                    config.dim,
                    config.dim * 4,
                    config.dim,
                )?,
            },
            None => TimePositionalEncoder::None,
        };

        debug!(
            dim = config.dim,
            heads = config.heads,
            head_dim = config.dim_head,
            is_causal = config.is_causal,
            "temporal axial attention"
        );

        Ok(Self {
            to_qkv,
            to_out,
            pos,
            dim: config.dim,
            heads: config.heads,
            head_dim: config.dim_head,
            inner_dim,
            scale: (config.dim_head as f64).powf(-0.5),
            is_causal: config.is_causal,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t, h, w, d) = check_volume(x, self.dim)?;
        let in_dtype = x.dtype();

        let x = match &self.pos {
            TimePositionalEncoder::Absolute { steps, proj } => {
                let positions = Tensor::arange(0u32, t as u32, x.device())?;
                let emb = steps.forward(&positions)?.to_dtype(in_dtype)?;
                let emb = proj.forward(&emb)?; // (T, D)
                x.broadcast_add(&emb.reshape((1, t, 1, 1, d))?)?
            }
            _ => x.clone(),
        };

        let qkv = self.to_qkv.forward(&x.reshape((b, t * h * w, d))?)?;
        let q = qkv.narrow(D::Minus1, 0, self.inner_dim)?;
        let k = qkv.narrow(D::Minus1, self.inner_dim, self.inner_dim)?;
        let v = qkv.narrow(D::Minus1, 2 * self.inner_dim, self.inner_dim)?;

        // (B, T*H*W, heads*hd) -> (B*H*W, heads, T, hd)
        let merge = |qkv_part: &Tensor| -> Result<Tensor> {
            qkv_part
                .reshape((b, t, h, w, self.heads, self.head_dim))?
                .permute((0, 2, 3, 4, 1, 5))?
                .reshape((b * h * w, self.heads, t, self.head_dim))
        };
        let mut q = merge(&q)?;
        let mut k = merge(&k)?;
        let v = merge(&v)?;

        if let TimePositionalEncoder::Rotary(rope) = &self.pos {
            let freqs = rope.freqs(t, x.device())?;
            q = apply_rotary_emb(&q, &freqs)?;
            k = apply_rotary_emb(&k, &freqs)?;
        }

        let out = attend(
            &q.contiguous()?,
            &k.contiguous()?,
            &v.contiguous()?,
            self.is_causal,
            self.scale,
        )?;
        let out = out.to_dtype(in_dtype)?;

        // (B*H*W, heads, T, hd) -> (B, T, H, W, heads*hd)
        let out = out
            .reshape((b, h, w, self.heads, t, self.head_dim))?
            .permute((0, 4, 1, 2, 3, 5))?
            .reshape((b, t * h * w, self.inner_dim))?;

        self.to_out.forward(&out)?.reshape((b, t, h, w, self.dim))
    }
}

// ===========================================================================
// SpatialAxialAttention
// ===========================================================================

/// Multi-head self-attention across the flattened (height, width) plane,
/// computed independently for every (batch, time) frame. Spatial positions
/// have no inherent order, so attention is always bidirectional.
pub struct SpatialAxialAttention {
    to_qkv: Linear,
    to_out: Linear,
    pos: SpacePositionalEncoder,
    dim: usize,
    heads: usize,
    head_dim: usize,
    inner_dim: usize,
    scale: f64,
}

impl SpatialAxialAttention {
    pub fn new(
        vb: VarBuilder,
        config: &AxialAttentionConfig,
        rotary_emb: Option<Arc<RotaryEmbedding>>,
    ) -> Result<Self> {
        config.validate().map_err(candle_core::Error::wrap)?;
        let inner_dim = config.inner_dim();
        check_head_split(inner_dim, config.heads)?;

        let to_qkv = linear_no_bias(config.dim, inner_dim * 3, vb.pp("to_qkv"))?;
        let to_out = linear(inner_dim, config.dim, vb.pp("to_out"))?;

        let pos = match rotary_emb {
            Some(rope) => SpacePositionalEncoder::Rotary(rope),
            None if config.use_absolute_pos => SpacePositionalEncoder::Absolute {
                grid: Positions2d::new(config.dim),
                proj: TimestepEmbedding::new(
                    vb.pp("space_pos_embedding"),
                    config.dim,
                    config.dim * 4,
                    config.dim,
                )?,
            },
            None => SpacePositionalEncoder::None,
        };

        debug!(
            dim = config.dim,
            heads = config.heads,
            head_dim = config.dim_head,
            "spatial axial attention"
        );

        Ok(Self {
            to_qkv,
            to_out,
            pos,
            dim: config.dim,
            heads: config.heads,
            head_dim: config.dim_head,
            inner_dim,
            scale: (config.dim_head as f64).powf(-0.5),
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t, h, w, d) = check_volume(x, self.dim)?;
        let in_dtype = x.dtype();

        let x = match &self.pos {
            SpacePositionalEncoder::Absolute { grid, proj } => {
                let rows = Tensor::arange(0u32, h as u32, x.device())?;
                let cols = Tensor::arange(0u32, w as u32, x.device())?;
                let (row_grid, col_grid) = meshgrid_ij(&rows, &cols)?;
                let emb = grid.forward(&row_grid, &col_grid)?.to_dtype(in_dtype)?;
                let emb = proj.forward(&emb)?; // (H, W, D)
                x.broadcast_add(&emb.reshape((1, 1, h, w, d))?)?
            }
            _ => x.clone(),
        };

        let qkv = self.to_qkv.forward(&x.reshape((b, t * h * w, d))?)?;
        let q = qkv.narrow(D::Minus1, 0, self.inner_dim)?;
        let k = qkv.narrow(D::Minus1, self.inner_dim, self.inner_dim)?;
        let v = qkv.narrow(D::Minus1, 2 * self.inner_dim, self.inner_dim)?;

        // (B, T*H*W, heads*hd) -> (B*T, heads, H, W, hd); the rotary table
        // is applied on the unflattened grid before the attention call.
        let merge = |qkv_part: &Tensor| -> Result<Tensor> {
            qkv_part
                .reshape((b, t, h, w, self.heads, self.head_dim))?
                .permute((0, 1, 4, 2, 3, 5))?
                .reshape((b * t, self.heads, h, w, self.head_dim))
        };
        let mut q = merge(&q)?;
        let mut k = merge(&k)?;
        let v = merge(&v)?;

        if let SpacePositionalEncoder::Rotary(rope) = &self.pos {
            let freqs = rope.axial_freqs(h, w, x.device())?;
            q = apply_rotary_emb(&q, &freqs)?;
            k = apply_rotary_emb(&k, &freqs)?;
        }

        let q = q.reshape((b * t, self.heads, h * w, self.head_dim))?;
        let k = k.reshape((b * t, self.heads, h * w, self.head_dim))?;
        let v = v.reshape((b * t, self.heads, h * w, self.head_dim))?;

        let out = attend(
            &q.contiguous()?,
            &k.contiguous()?,
            &v.contiguous()?,
            false,
            self.scale,
        )?;
        let out = out.to_dtype(in_dtype)?;

        // (B*T, heads, H*W, hd) -> (B, T, H, W, heads*hd)
        let out = out
            .reshape((b, t, self.heads, h, w, self.head_dim))?
            .permute((0, 1, 3, 4, 2, 5))?
            .reshape((b, t * h * w, self.inner_dim))?;

        self.to_out.forward(&out)?.reshape((b, t, h, w, self.dim))
    }
}
