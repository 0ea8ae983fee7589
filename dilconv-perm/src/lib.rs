//! Layout conversion ("reorder") between descriptors of the same tensor.
//!
//! A reorder is a lossless permutation of memory: every element keeps its
//! logical index and its exact bit pattern. The crate sits between
//! `dilconv-view` (descriptors and buffers) and `dilconv-kernel` (compute).
//!
//! # Dependency graph
//!
//! ```text
//! dilconv-view -> dilconv-perm -> dilconv-kernel -> dilconv
//! ```

pub mod copy;
pub mod fuse;
pub mod order;

pub use copy::{permute_into, reorder, reorder_into};
pub use fuse::merge_axes;
pub use order::compute_order;

/// Minimum element count before the outermost axis is split across threads.
pub const MIN_PARALLEL_LEN: usize = 1 << 15;

/// Edge length of the square tiles used for transposing copies.
pub const TRANSPOSE_TILE: usize = 16;
