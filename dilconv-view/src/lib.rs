//! Tensor descriptors and owned buffers for the dilconv provider engine.
//!
//! This crate is the bottom of the workspace dependency graph:
//!
//! ```text
//! dilconv-view -> dilconv-perm -> dilconv-kernel -> dilconv
//! ```
//!
//! - [`TensorDescriptor`]: shape + element type + [`LayoutTag`], no data
//! - [`Buffer`]: owned `f32` storage addressed through one descriptor
//! - [`ConvError`]: the error taxonomy shared by every crate in the workspace

pub mod buffer;
pub mod desc;

pub use buffer::Buffer;
pub use desc::{dense_strides, row_major_strides, DataType, LayoutTag, TensorDescriptor};

/// Errors raised while describing, reordering or executing tensor operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvError {
    /// A dimension is zero or the dims have the wrong rank for the layout.
    #[error("invalid dims {dims:?}: every extent must be positive")]
    InvalidDims { dims: Vec<usize> },

    /// Only 32-bit float is supported.
    #[error("unsupported data type {0:?}")]
    UnsupportedDataType(DataType),

    /// Normalization epsilon must be finite and strictly positive.
    #[error("invalid epsilon {0}: must be finite and > 0")]
    InvalidEpsilon(f32),

    /// Normalization over an empty batch/spatial extent.
    #[error("empty reduction: N*H*W must be > 0")]
    EmptyReduction,

    /// The input does not cover the dilated receptive field.
    #[error("undersized input on axis {axis}: need {required}, got {actual}")]
    UndersizedInput {
        axis: &'static str,
        required: usize,
        actual: usize,
    },

    /// Array ranks do not match.
    #[error("rank mismatch: {0} vs {1}")]
    RankMismatch(usize, usize),

    /// Array shapes are incompatible for the operation.
    #[error("shape mismatch: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// Storage length does not match the descriptor.
    #[error("buffer length mismatch: descriptor needs {expected}, got {actual}")]
    BufferLength { expected: usize, actual: usize },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A buffer was handed to an operator with a layout the plan was not built for.
    #[error("layout mismatch for {operand}: plan expects {expected}, got {actual}")]
    LayoutMismatch {
        operand: &'static str,
        expected: String,
        actual: String,
    },

    /// A descriptor still tagged `Any` was used where memory must be addressed.
    #[error("unresolved layout: descriptor {0} has no physical layout yet")]
    UnresolvedLayout(String),

    /// No kernel variant supports the requested layouts.
    #[error("unsupported layout for {operand}: {tag:?}")]
    UnsupportedLayout {
        operand: &'static str,
        tag: LayoutTag,
    },

    /// Integer overflow while computing an element count.
    #[error("element count overflow for dims {0:?}")]
    SizeOverflow(Vec<usize>),

    /// The engine's worker pool could not be created.
    #[error("thread pool: {0}")]
    ThreadPool(String),
}

impl ConvError {
    /// Whether the error is a caller precondition violation rather than an
    /// internal layout-resolution defect.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            ConvError::LayoutMismatch { .. }
                | ConvError::UnresolvedLayout(_)
                | ConvError::UnsupportedLayout { .. }
                | ConvError::ThreadPool(_)
        )
    }
}

/// Result type for dilconv operations.
pub type Result<T> = std::result::Result<T, ConvError>;
