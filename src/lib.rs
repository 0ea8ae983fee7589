//! Provider engine for dilated 2-D convolution and batch normalization,
//! cross-validated against an independent tiled pipeline.
//!
//! # Core Types
//!
//! - [`TensorDescriptor`] / [`Buffer`]: shape + layout, and owned `f32` storage
//! - [`ExecutionContext`]: engine (worker pool) plus an in-order [`Stream`]
//! - [`LayoutNegotiator`]: compares caller layouts with a plan's, reorders when they differ
//!
//! # Operators
//!
//! Each operator follows the same lifecycle: an abstract descriptor whose
//! layouts may be left as [`LayoutTag::Any`], a primitive descriptor (the
//! built plan, every layout resolved) and an executable primitive.
//!
//! - [`ConvDesc`] -> [`ConvPrimitiveDesc`] -> [`ConvPrimitive`]
//! - [`BatchNormDesc`] -> [`BatchNormPrimitiveDesc`] -> [`BatchNormPrimitive`]
//!
//! The [`provider`] functions wrap the whole lifecycle for caller-side buffers.
//!
//! # Measuring
//!
//! - [`BenchmarkHarness`]: warm-up, timed blocks, best sample mean
//! - [`EquivalenceChecker`]: element-wise `|a - b| < tolerance` in logical order
//! - [`Scenario`]: random inputs, both implementations, one [`Report`]
//!
//! # Example
//!
//! ```rust
//! use dilconv::{provider, BenchmarkHarness, Buffer, ConvConfig, ExecutionContext, LayoutTag};
//!
//! let config = ConvConfig::square(1, 1, 1, 3, 3, 1, 0);
//! let [src_desc, weights_desc, dst_desc] = config.canonical_descs().unwrap();
//! let src = Buffer::from_vec(&src_desc, vec![1.0; 9]).unwrap();
//! let weights = Buffer::from_vec(&weights_desc, vec![2.0]).unwrap();
//! let mut dst = Buffer::zeros(&dst_desc).unwrap();
//!
//! let ctx = ExecutionContext::new(Some(1)).unwrap();
//! provider::dilated_conv(&ctx, &BenchmarkHarness::default(), config, &src, &weights, &mut dst).unwrap();
//! assert!(dst.data().iter().all(|&v| v == 2.0));
//! assert_eq!(dst.desc().tag(), LayoutTag::Nhwc);
//! ```

pub mod bench;
pub mod bnorm;
pub mod check;
pub mod conv;
pub mod engine;
pub mod fast;
pub mod negotiate;
pub mod provider;
pub mod report;
pub mod scenario;

pub use bench::{BenchmarkHarness, Timing};
pub use bnorm::{BatchNormDesc, BatchNormPrimitive, BatchNormPrimitiveDesc, BatchNormStats, BnConfig};
pub use check::{Equivalence, EquivalenceChecker, Mismatch, DEFAULT_TOLERANCE};
pub use conv::{ConvArgs, ConvConfig, ConvDesc, ConvPrimitive, ConvPrimitiveDesc, ConvVariant};
pub use engine::{Engine, EngineKind, ExecutionContext, Stream};
pub use fast::{AlternatePipeline, TiledPipeline};
pub use negotiate::{LayoutNegotiator, LayoutPreference, Negotiation, OpKind, OperandPlan, OutputBinding, Role};
pub use report::{ImplResult, Report, Verdict};
pub use scenario::{random_input, Scenario, ScenarioKind};

pub use dilconv_perm::{reorder, reorder_into};
pub use dilconv_view::{Buffer, ConvError, DataType, LayoutTag, Result, TensorDescriptor};
