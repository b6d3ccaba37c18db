//! Scaled dot-product attention with per-device dispatch.
//!
//! Provides a single `attend` entry point used by both axial attention
//! layers:
//! - CUDA: Flash Attention (when compiled with the flash-attn feature),
//!   which takes the causal flag natively
//! - Metal: fused SDPA kernel via candle_nn::ops::sdpa (non-causal only;
//!   causal calls fall back to the basic path)
//! - CPU: basic matmul/softmax attention

use candle_core::{D, DType, Device, Result, Tensor};

#[cfg(feature = "flash-attn")]
fn flash_attn(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    softmax_scale: f32,
    causal: bool,
) -> Result<Tensor> {
    candle_flash_attn::flash_attn(q, k, v, softmax_scale, causal)
}

#[cfg(not(feature = "flash-attn"))]
fn flash_attn(_: &Tensor, _: &Tensor, _: &Tensor, _: f32, _: bool) -> Result<Tensor> {
    candle_core::bail!("flash-attn feature not enabled, compile with '--features flash-attn'")
}

/// Additive causal mask over a sequence: 0 at or below the diagonal,
/// negative infinity above it.
pub fn causal_mask(seq_len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j > i { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Tensor::from_vec(mask, (seq_len, seq_len), device)?.to_dtype(dtype)
}

/// Scaled dot-product attention over (batch, heads, seq, head_dim) inputs.
///
/// With `causal` set, each position attends only to itself and earlier
/// positions. The output has the query's shape and dtype; the CPU path may
/// widen half floats to f32 internally.
pub fn attend(q: &Tensor, k: &Tensor, v: &Tensor, causal: bool, scale: f64) -> Result<Tensor> {
    match q.device() {
        Device::Cuda(_) => attend_cuda(q, k, v, causal, scale),
        Device::Metal(_) => attend_metal(q, k, v, causal, scale),
        Device::Cpu => attend_basic(q, k, v, causal, scale),
    }
}

#[allow(unused_variables)]
fn attend_cuda(q: &Tensor, k: &Tensor, v: &Tensor, causal: bool, scale: f64) -> Result<Tensor> {
    #[cfg(feature = "flash-attn")]
    {
        // Flash-attn expects (batch, seq_len, num_heads, head_dim)
        let q = q.transpose(1, 2)?;
        let k = k.transpose(1, 2)?;
        let v = v.transpose(1, 2)?;

        let out = flash_attn(&q, &k, &v, scale as f32, causal)?;
        out.transpose(1, 2)
    }

    #[cfg(not(feature = "flash-attn"))]
    {
        attend_basic(q, k, v, causal, scale)
    }
}

fn attend_metal(q: &Tensor, k: &Tensor, v: &Tensor, causal: bool, scale: f64) -> Result<Tensor> {
    // The fused kernel has no mask path.
    if causal {
        return attend_basic(q, k, v, causal, scale);
    }
    candle_nn::ops::sdpa(q, k, v, None, false, scale as f32, 1.0)
}

fn attend_basic(q: &Tensor, k: &Tensor, v: &Tensor, causal: bool, scale: f64) -> Result<Tensor> {
    let in_dtype = q.dtype();
    let widen = matches!(in_dtype, DType::F16 | DType::BF16);
    let (q, k, v) = if widen {
        (
            q.to_dtype(DType::F32)?,
            k.to_dtype(DType::F32)?,
            v.to_dtype(DType::F32)?,
        )
    } else {
        (q.clone(), k.clone(), v.clone())
    };

    let key_t = k.transpose(D::Minus2, D::Minus1)?.contiguous()?;
    let mut attn_weights = (q.matmul(&key_t)? * scale)?;

    if causal {
        let seq_len = q.dim(D::Minus2)?;
        let mask = causal_mask(seq_len, attn_weights.dtype(), q.device())?;
        attn_weights = attn_weights.broadcast_add(&mask)?;
    }

    let attn_probs = candle_nn::ops::softmax_last_dim(&attn_weights)?;
    let out = attn_probs.matmul(&v)?;
    if widen { out.to_dtype(in_dtype) } else { Ok(out) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attend_shape() -> Result<()> {
        let device = Device::Cpu;
        let (batch, heads, seq_len, head_dim) = (2, 4, 8, 32);

        let q = Tensor::randn(0f32, 1.0, (batch, heads, seq_len, head_dim), &device)?;
        let k = Tensor::randn(0f32, 1.0, (batch, heads, seq_len, head_dim), &device)?;
        let v = Tensor::randn(0f32, 1.0, (batch, heads, seq_len, head_dim), &device)?;

        let scale = 1.0 / (head_dim as f64).sqrt();
        let out = attend(&q, &k, &v, false, scale)?;
        assert_eq!(out.dims(), &[batch, heads, seq_len, head_dim]);
        Ok(())
    }

    #[test]
    fn test_causal_first_position_copies_first_value() -> Result<()> {
        // Under causal masking position 0 can only attend to itself, so its
        // output is exactly v[0].
        let device = Device::Cpu;
        let (batch, heads, seq_len, head_dim) = (1, 2, 4, 8);

        let q = Tensor::randn(0f32, 1.0, (batch, heads, seq_len, head_dim), &device)?;
        let k = Tensor::randn(0f32, 1.0, (batch, heads, seq_len, head_dim), &device)?;
        let v = Tensor::randn(0f32, 1.0, (batch, heads, seq_len, head_dim), &device)?;

        let scale = 1.0 / (head_dim as f64).sqrt();
        let out = attend(&q, &k, &v, true, scale)?;

        let got = out.narrow(2, 0, 1)?.flatten_all()?.to_vec1::<f32>()?;
        let want = v.narrow(2, 0, 1)?.flatten_all()?.to_vec1::<f32>()?;
        for (g, w) in got.iter().zip(want.iter()) {
            assert!((g - w).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_causal_mask_values() -> Result<()> {
        let device = Device::Cpu;
        let mask = causal_mask(3, DType::F32, &device)?;
        let vals = mask.to_vec2::<f32>()?;
        assert_eq!(vals[0][0], 0.0);
        assert_eq!(vals[1][1], 0.0);
        assert_eq!(vals[2][0], 0.0);
        assert!(vals[0][1].is_infinite() && vals[0][1] < 0.0);
        assert!(vals[1][2].is_infinite() && vals[1][2] < 0.0);
        Ok(())
    }

    #[test]
    fn test_half_precision_round_trip() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (1, 2, 4, 8), &device)?.to_dtype(DType::F16)?;
        let k = Tensor::randn(0f32, 1.0, (1, 2, 4, 8), &device)?.to_dtype(DType::F16)?;
        let v = Tensor::randn(0f32, 1.0, (1, 2, 4, 8), &device)?.to_dtype(DType::F16)?;

        let out = attend(&q, &k, &v, true, 1.0 / 8f64.sqrt())?;
        assert_eq!(out.dtype(), DType::F16);
        Ok(())
    }
}
