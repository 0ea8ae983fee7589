//! Compute kernels for the dilconv provider engine.
//!
//! Kernels work on raw `f32` slices in one fixed physical layout each; the
//! operators in the root crate pick the kernel, check descriptors and hand
//! over the buffers' storage.
//!
//! # Parallel execution
//!
//! With the `parallel` feature (default), kernels split work across the
//! current rayon pool once the problem exceeds [`threading::MINTHREADLENGTH`].

pub mod conv;
pub mod norm;
pub mod threading;

pub use conv::{conv_channel_last, conv_planar, ConvGeometry};
pub use norm::{batch_norm_in_place, channel_stats, normalize_in_place, ChannelMoments};

/// Output-channel count from which the channel-last kernel's inner loop
/// fills a full vector register.
pub const LANE_WIDTH: usize = 8;
