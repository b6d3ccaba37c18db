//! Axial attention blocks for spatio-temporal diffusion models.
//!
//! This crate provides the two attention layers used inside a video
//! denoising network: [`TemporalAxialAttention`] attends across frames
//! independently for every spatial location (causal by default), and
//! [`SpatialAxialAttention`] attends across the flattened height/width
//! plane independently for every frame. Positional information is injected
//! either additively (sinusoidal tables plus a learned projection) or
//! multiplicatively (a shared [`RotaryEmbedding`]), chosen once at
//! construction.

pub mod attention;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod grid;
pub mod rope;
pub mod sdpa;

pub use attention::{SpatialAxialAttention, TemporalAxialAttention};
pub use config::{AxialAttentionConfig, ConfigError};
pub use error::ShapeMismatch;
pub use rope::RotaryEmbedding;
