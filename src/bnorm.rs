//! Forward batch normalization with statistics computed from the batch.
//!
//! Affine parameters are fixed at identity, so the output is
//! `(x - mean[c]) / sqrt(var[c] + epsilon)`. Execution is in place.

use dilconv_kernel::batch_norm_in_place;
use dilconv_view::{Buffer, ConvError, LayoutTag, Result, TensorDescriptor};
use serde::{Deserialize, Serialize};

use crate::conv::expect_layout;
use crate::engine::ExecutionContext;
use crate::negotiate::{LayoutPreference, OpKind, Role};

/// Normalization problem size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BnConfig {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
    pub epsilon: f32,
}

impl BnConfig {
    /// Logical `(N, C, H, W)`.
    pub fn dims(&self) -> [usize; 4] {
        [self.n, self.c, self.h, self.w]
    }

    pub fn validate(&self) -> Result<()> {
        if self.c == 0 {
            return Err(ConvError::InvalidDims {
                dims: self.dims().to_vec(),
            });
        }
        if self.n * self.h * self.w == 0 {
            return Err(ConvError::EmptyReduction);
        }
        check_epsilon(self.epsilon)
    }
}

fn check_epsilon(epsilon: f32) -> Result<()> {
    if epsilon.is_finite() && epsilon > 0.0 {
        Ok(())
    } else {
        Err(ConvError::InvalidEpsilon(epsilon))
    }
}

/// Abstract normalization over a 4-D activation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormDesc {
    src: TensorDescriptor,
    epsilon: f32,
}

impl BatchNormDesc {
    /// `src` may be concrete (normalize in the caller's layout) or `Any`.
    pub fn new(src: &TensorDescriptor, epsilon: f32) -> Result<Self> {
        src.dtype().ensure_supported()?;
        if src.rank() != 4 {
            return Err(ConvError::RankMismatch(src.rank(), 4));
        }
        check_epsilon(epsilon)?;
        Ok(Self {
            src: src.clone(),
            epsilon,
        })
    }

    pub fn from_config(config: &BnConfig) -> Result<Self> {
        config.validate()?;
        Self::new(&TensorDescriptor::any(&config.dims())?, config.epsilon)
    }

    pub fn src(&self) -> &TensorDescriptor {
        &self.src
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }
}

/// Built normalization plan.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormPrimitiveDesc {
    src: TensorDescriptor,
    stats: TensorDescriptor,
    epsilon: f32,
}

impl BatchNormPrimitiveDesc {
    /// An unconstrained src resolves to `nchw`.
    pub fn new(desc: &BatchNormDesc) -> Result<Self> {
        let src = if desc.src.is_resolved() {
            desc.src.clone()
        } else {
            desc.src.with_tag(LayoutTag::Nchw)?
        };
        let stats = TensorDescriptor::f32(&[src.dims()[1]], LayoutTag::X)?;
        log::debug!("batch norm plan: src {src}, epsilon {}", desc.epsilon);
        Ok(Self {
            src,
            stats,
            epsilon: desc.epsilon,
        })
    }

    pub fn src_desc(&self) -> &TensorDescriptor {
        &self.src
    }

    /// Descriptor of the per-channel mean and variance outputs.
    pub fn stats_desc(&self) -> &TensorDescriptor {
        &self.stats
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }
}

impl LayoutPreference for BatchNormPrimitiveDesc {
    fn kind(&self) -> OpKind {
        OpKind::BatchNorm
    }

    fn preferred(&self, role: Role) -> Option<&TensorDescriptor> {
        match role {
            Role::Src | Role::Dst => Some(&self.src),
            Role::Mean | Role::Variance => Some(&self.stats),
            Role::Weights => None,
        }
    }
}

/// Per-channel statistics produced by one normalization.
#[derive(Debug, Clone)]
pub struct BatchNormStats {
    pub mean: Buffer,
    pub variance: Buffer,
}

/// Executable normalization.
#[derive(Debug, Clone)]
pub struct BatchNormPrimitive {
    pd: BatchNormPrimitiveDesc,
}

impl BatchNormPrimitive {
    pub fn new(pd: BatchNormPrimitiveDesc) -> Self {
        Self { pd }
    }

    pub fn desc(&self) -> &BatchNormPrimitiveDesc {
        &self.pd
    }

    /// Normalize `data` in place on `ctx`'s stream.
    pub fn execute(&self, ctx: &ExecutionContext, data: &mut Buffer) -> Result<BatchNormStats> {
        expect_layout("src", data.desc(), &self.pd.src)?;
        let dims = data.dims().to_vec();
        let strides = data.strides().to_vec();
        let epsilon = self.pd.epsilon;
        let values = data.data_mut();
        let moments = ctx.execute(|| batch_norm_in_place(values, &dims, &strides, epsilon))?;

        let mean = moments.mean.iter().map(|&m| m as f32).collect();
        let variance = moments.variance.iter().map(|&v| v as f32).collect();
        Ok(BatchNormStats {
            mean: Buffer::from_vec(&self.pd.stats, mean)?,
            variance: Buffer::from_vec(&self.pd.stats, variance)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_any_resolves_to_nchw() {
        let desc = BatchNormDesc::new(&TensorDescriptor::any(&[2, 3, 4, 4]).unwrap(), 1e-5).unwrap();
        let pd = BatchNormPrimitiveDesc::new(&desc).unwrap();
        assert_eq!(pd.src_desc().tag(), LayoutTag::Nchw);
        assert_eq!(pd.stats_desc().dims(), &[3]);
    }

    #[test]
    fn test_concrete_src_kept() {
        let nhwc = TensorDescriptor::f32(&[2, 3, 4, 4], LayoutTag::Nhwc).unwrap();
        let pd = BatchNormPrimitiveDesc::new(&BatchNormDesc::new(&nhwc, 1e-5).unwrap()).unwrap();
        assert_eq!(pd.src_desc(), &nhwc);
        assert_eq!(pd.preferred(Role::Dst), Some(&nhwc));
    }

    #[test]
    fn test_config_validation() {
        let cfg = BnConfig {
            n: 1,
            c: 2,
            h: 2,
            w: 2,
            epsilon: 0.0,
        };
        assert_eq!(cfg.validate().unwrap_err(), ConvError::InvalidEpsilon(0.0));
        let ok = BnConfig { epsilon: 1e-5, ..cfg };
        let desc = BatchNormDesc::from_config(&ok).unwrap();
        assert!(!desc.src().is_resolved());
        assert_eq!(desc.src().dims(), &[1, 2, 2, 2]);
        let cfg = BnConfig { c: 0, ..ok };
        assert!(matches!(cfg.validate(), Err(ConvError::InvalidDims { .. })));
    }

    #[test]
    fn test_execute_returns_stats() {
        let desc = TensorDescriptor::f32(&[1, 2, 1, 2], LayoutTag::Nhwc).unwrap();
        // channel 0: [1, 3], channel 1: [5, 5]
        let mut data = Buffer::from_logical(&desc, &[1.0, 3.0, 5.0, 5.0]).unwrap();
        let pd = BatchNormPrimitiveDesc::new(&BatchNormDesc::new(&desc, 1e-9).unwrap()).unwrap();
        let ctx = ExecutionContext::new(Some(1)).unwrap();
        let stats = BatchNormPrimitive::new(pd).execute(&ctx, &mut data).unwrap();

        assert_eq!(stats.mean.data(), &[2.0, 5.0]);
        assert_eq!(stats.variance.data(), &[1.0, 0.0]);
        assert_abs_diff_eq!(data.get(&[0, 0, 0, 0]), -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(data.get(&[0, 0, 0, 1]), 1.0, epsilon = 1e-6);
        assert_eq!(data.get(&[0, 1, 0, 0]), 0.0);
        assert_eq!(ctx.stream().submitted(), 1);
    }
}
