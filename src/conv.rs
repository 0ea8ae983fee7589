//! Dilated 2-D convolution operator: descriptor, plan and primitive.
//!
//! ```text
//! out[n, co, h, w] = sum_{ci, kh, kw} weights[co, ci, kh, kw]
//!                    * src[n, ci, h + kh*(dh+1), w + kw*(dw+1)]
//! ```
//!
//! No padding, unit stride. A dilation of 0 is the ordinary convolution.

use dilconv_kernel::{conv_channel_last, conv_planar, ConvGeometry, LANE_WIDTH};
use dilconv_view::{Buffer, ConvError, LayoutTag, Result, TensorDescriptor};
use serde::{Deserialize, Serialize};

use crate::engine::ExecutionContext;
use crate::negotiate::{LayoutPreference, OpKind, Role};

/// Convolution problem size. `w`/`h` are the *output* spatial extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvConfig {
    pub n: usize,
    pub ci: usize,
    pub co: usize,
    pub w: usize,
    pub h: usize,
    pub kw: usize,
    pub kh: usize,
    pub dw: usize,
    pub dh: usize,
}

impl ConvConfig {
    /// Square kernel with the same dilation on both axes.
    pub fn square(n: usize, ci: usize, co: usize, w: usize, h: usize, k: usize, dilation: usize) -> Self {
        Self {
            n,
            ci,
            co,
            w,
            h,
            kw: k,
            kh: k,
            dw: dilation,
            dh: dilation,
        }
    }

    /// Positive extents, and a receptive field and element counts that fit
    /// in `usize`.
    pub fn validate(&self) -> Result<()> {
        let extents = [self.n, self.ci, self.co, self.h, self.w, self.kh, self.kw];
        if extents.iter().any(|&d| d == 0) {
            return Err(ConvError::InvalidDims {
                dims: extents.to_vec(),
            });
        }
        let in_h = receptive_extent(self.h, self.kh, self.dh);
        let in_w = receptive_extent(self.w, self.kw, self.dw);
        let (Some(in_h), Some(in_w)) = (in_h, in_w) else {
            return Err(ConvError::InvalidConfig(format!(
                "receptive field of a {}x{} kernel with dilation {}x{} overflows usize",
                self.kh, self.kw, self.dh, self.dw
            )));
        };
        for dims in [
            [self.n, self.ci, in_h, in_w],
            self.weights_dims(),
            self.dst_dims(),
        ] {
            dims.iter()
                .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                .ok_or_else(|| ConvError::SizeOverflow(dims.to_vec()))?;
        }
        Ok(())
    }

    /// Required input width: `w + (kw - 1) * (dw + 1)`.
    ///
    /// Saturates on overflow; [`ConvConfig::validate`] rejects such configs.
    pub fn in_w(&self) -> usize {
        receptive_extent(self.w, self.kw, self.dw).unwrap_or(usize::MAX)
    }

    /// Required input height: `h + (kh - 1) * (dh + 1)`.
    ///
    /// Saturates on overflow; [`ConvConfig::validate`] rejects such configs.
    pub fn in_h(&self) -> usize {
        receptive_extent(self.h, self.kh, self.dh).unwrap_or(usize::MAX)
    }

    /// Logical `(N, CI, IH, IW)`.
    pub fn src_dims(&self) -> [usize; 4] {
        [self.n, self.ci, self.in_h(), self.in_w()]
    }

    /// Logical `(CO, CI, KH, KW)`.
    pub fn weights_dims(&self) -> [usize; 4] {
        [self.co, self.ci, self.kh, self.kw]
    }

    /// Logical `(N, CO, H, W)`.
    pub fn dst_dims(&self) -> [usize; 4] {
        [self.n, self.co, self.h, self.w]
    }

    /// Floating-point operations per forward pass: `2*N*CO*H*W*CI*KH*KW`.
    pub fn flops(&self) -> f64 {
        2.0 * (self.n * self.co * self.h * self.w) as f64 * (self.ci * self.kh * self.kw) as f64
    }

    pub fn geometry(&self) -> ConvGeometry {
        ConvGeometry {
            n: self.n,
            ci: self.ci,
            co: self.co,
            h: self.h,
            w: self.w,
            kh: self.kh,
            kw: self.kw,
            dh: self.dh,
            dw: self.dw,
        }
    }

    /// Caller-side layouts used by the benchmark scenarios: src `nhwc`,
    /// weights `ihwo`, dst `nhwc`.
    pub fn canonical_descs(&self) -> Result<[TensorDescriptor; 3]> {
        self.validate()?;
        Ok([
            TensorDescriptor::f32(&self.src_dims(), LayoutTag::Nhwc)?,
            TensorDescriptor::f32(&self.weights_dims(), LayoutTag::Ihwo)?,
            TensorDescriptor::f32(&self.dst_dims(), LayoutTag::Nhwc)?,
        ])
    }
}

/// `out + (k - 1) * (dilation + 1)`, `None` on overflow.
fn receptive_extent(out: usize, k: usize, dilation: usize) -> Option<usize> {
    match k.saturating_sub(1) {
        0 => Some(out),
        gaps => dilation.checked_add(1)?.checked_mul(gaps)?.checked_add(out),
    }
}

/// Abstract convolution: config plus one descriptor per operand.
///
/// Descriptors default to [`LayoutTag::Any`]; a concrete tag pins that
/// operand's layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvDesc {
    config: ConvConfig,
    src: TensorDescriptor,
    weights: TensorDescriptor,
    dst: TensorDescriptor,
}

impl ConvDesc {
    /// Every operand left to the operator.
    pub fn new(config: ConvConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            src: TensorDescriptor::any(&config.src_dims())?,
            weights: TensorDescriptor::any(&config.weights_dims())?,
            dst: TensorDescriptor::any(&config.dst_dims())?,
        })
    }

    /// Build from caller descriptors, checking them against `config`.
    ///
    /// The src extent must cover the dilated receptive field exactly:
    /// smaller is [`ConvError::UndersizedInput`], larger is
    /// [`ConvError::ShapeMismatch`].
    pub fn from_descs(
        config: ConvConfig,
        src: &TensorDescriptor,
        weights: &TensorDescriptor,
        dst: &TensorDescriptor,
    ) -> Result<Self> {
        config.validate()?;
        for desc in [src, weights, dst] {
            desc.dtype().ensure_supported()?;
            if desc.rank() != 4 {
                return Err(ConvError::RankMismatch(desc.rank(), 4));
            }
        }
        let required = config.src_dims();
        let actual = src.dims();
        for (axis, name) in [(2, "H"), (3, "W")] {
            if actual[axis] < required[axis] {
                return Err(ConvError::UndersizedInput {
                    axis: name,
                    required: required[axis],
                    actual: actual[axis],
                });
            }
        }
        if actual != required {
            return Err(ConvError::ShapeMismatch(actual.to_vec(), required.to_vec()));
        }
        if weights.dims() != config.weights_dims() {
            return Err(ConvError::ShapeMismatch(
                weights.dims().to_vec(),
                config.weights_dims().to_vec(),
            ));
        }
        if dst.dims() != config.dst_dims() {
            return Err(ConvError::ShapeMismatch(
                dst.dims().to_vec(),
                config.dst_dims().to_vec(),
            ));
        }
        Ok(Self {
            config,
            src: src.clone(),
            weights: weights.clone(),
            dst: dst.clone(),
        })
    }

    /// Pin one operand to `tag`.
    pub fn with_tag(mut self, role: Role, tag: LayoutTag) -> Result<Self> {
        match role {
            Role::Src => self.src = self.src.with_tag(tag)?,
            Role::Weights => self.weights = self.weights.with_tag(tag)?,
            Role::Dst => self.dst = self.dst.with_tag(tag)?,
            Role::Mean | Role::Variance => {
                return Err(ConvError::InvalidConfig(format!(
                    "convolution has no {role} operand"
                )))
            }
        }
        Ok(self)
    }

    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    pub fn src(&self) -> &TensorDescriptor {
        &self.src
    }

    pub fn weights(&self) -> &TensorDescriptor {
        &self.weights
    }

    pub fn dst(&self) -> &TensorDescriptor {
        &self.dst
    }
}

/// Kernel family a plan resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvVariant {
    /// src `nhwc`, weights `hwio`, dst `nhwc`.
    ChannelLast,
    /// src `nchw`, weights `oihw`, dst `nchw`.
    Planar,
}

impl ConvVariant {
    /// `[src, weights, dst]` tags.
    pub fn tags(self) -> [LayoutTag; 3] {
        match self {
            ConvVariant::ChannelLast => [LayoutTag::Nhwc, LayoutTag::Hwio, LayoutTag::Nhwc],
            ConvVariant::Planar => [LayoutTag::Nchw, LayoutTag::Oihw, LayoutTag::Nchw],
        }
    }

    /// Variants in order of preference for `config`.
    fn ranked(config: &ConvConfig) -> [ConvVariant; 2] {
        if config.co >= LANE_WIDTH {
            [ConvVariant::ChannelLast, ConvVariant::Planar]
        } else {
            [ConvVariant::Planar, ConvVariant::ChannelLast]
        }
    }
}

/// Built plan: every operand layout is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvPrimitiveDesc {
    config: ConvConfig,
    variant: ConvVariant,
    src: TensorDescriptor,
    weights: TensorDescriptor,
    dst: TensorDescriptor,
}

impl ConvPrimitiveDesc {
    /// Resolve `desc` to a kernel variant.
    ///
    /// Unpinned operands take the variant's layouts. With pins, the first
    /// variant agreeing with every pin wins.
    pub fn new(desc: &ConvDesc) -> Result<Self> {
        let operands = [
            (Role::Src, &desc.src),
            (Role::Weights, &desc.weights),
            (Role::Dst, &desc.dst),
        ];
        let mut first_conflict = None;
        'variants: for variant in ConvVariant::ranked(&desc.config) {
            let tags = variant.tags();
            let mut resolved = [desc.src.clone(), desc.weights.clone(), desc.dst.clone()];
            for (i, &(role, pinned)) in operands.iter().enumerate() {
                let want = pinned.with_tag(tags[i])?;
                if pinned.is_resolved() && pinned != &want {
                    first_conflict.get_or_insert((role.name(), pinned.tag()));
                    continue 'variants;
                }
                resolved[i] = want;
            }
            let [src, weights, dst] = resolved;
            log::debug!("conv plan {variant:?}: src {src}, weights {weights}, dst {dst}");
            return Ok(Self {
                config: desc.config,
                variant,
                src,
                weights,
                dst,
            });
        }
        let (operand, tag) = first_conflict.unwrap_or(("src", desc.src.tag()));
        Err(ConvError::UnsupportedLayout { operand, tag })
    }

    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    pub fn variant(&self) -> ConvVariant {
        self.variant
    }

    pub fn src_desc(&self) -> &TensorDescriptor {
        &self.src
    }

    pub fn weights_desc(&self) -> &TensorDescriptor {
        &self.weights
    }

    pub fn dst_desc(&self) -> &TensorDescriptor {
        &self.dst
    }
}

impl LayoutPreference for ConvPrimitiveDesc {
    fn kind(&self) -> OpKind {
        OpKind::Convolution
    }

    fn preferred(&self, role: Role) -> Option<&TensorDescriptor> {
        match role {
            Role::Src => Some(&self.src),
            Role::Weights => Some(&self.weights),
            Role::Dst => Some(&self.dst),
            Role::Mean | Role::Variance => None,
        }
    }
}

/// Buffers for one convolution call, already in the plan's layouts.
#[derive(Debug)]
pub struct ConvArgs<'a> {
    pub src: &'a Buffer,
    pub weights: &'a Buffer,
    pub dst: &'a mut Buffer,
}

/// Executable convolution.
#[derive(Debug, Clone)]
pub struct ConvPrimitive {
    pd: ConvPrimitiveDesc,
}

impl ConvPrimitive {
    pub fn new(pd: ConvPrimitiveDesc) -> Self {
        Self { pd }
    }

    pub fn desc(&self) -> &ConvPrimitiveDesc {
        &self.pd
    }

    /// Run the kernel on `ctx`'s stream.
    ///
    /// Each buffer must carry exactly the plan's descriptor for its operand.
    pub fn execute(&self, ctx: &ExecutionContext, args: ConvArgs<'_>) -> Result<()> {
        expect_layout("src", args.src.desc(), &self.pd.src)?;
        expect_layout("weights", args.weights.desc(), &self.pd.weights)?;
        expect_layout("dst", args.dst.desc(), &self.pd.dst)?;

        let g = self.pd.config.geometry();
        let (src, weights) = (args.src.data(), args.weights.data());
        let dst = args.dst.data_mut();
        match self.pd.variant {
            ConvVariant::ChannelLast => ctx.execute(|| conv_channel_last(src, weights, dst, &g)),
            ConvVariant::Planar => ctx.execute(|| conv_planar(src, weights, dst, &g)),
        }
    }
}

pub(crate) fn expect_layout(
    operand: &'static str,
    actual: &TensorDescriptor,
    expected: &TensorDescriptor,
) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ConvError::LayoutMismatch {
            operand,
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(co: usize, dilation: usize) -> ConvConfig {
        ConvConfig::square(1, 2, co, 4, 3, 3, dilation)
    }

    #[test]
    fn test_receptive_field_grows_with_dilation() {
        let base = config(4, 0);
        let dilated = config(4, 5);
        assert_eq!(base.in_w(), 4 + 2);
        assert_eq!(dilated.in_w() - base.in_w(), (3 - 1) * 5);
        assert_eq!(dilated.in_h() - base.in_h(), (3 - 1) * 5);
        assert_eq!(base.flops(), 2.0 * (4 * 4 * 3) as f64 * (2 * 9) as f64);
    }

    #[test]
    fn test_dilation_overflow_rejected() {
        let cfg = ConvConfig::square(1, 1, 1, 2, 1, 2, usize::MAX);
        assert!(matches!(cfg.validate(), Err(ConvError::InvalidConfig(_))));
        assert!(cfg.canonical_descs().is_err());
        assert!(ConvDesc::new(cfg).is_err());
        assert_eq!(cfg.in_w(), usize::MAX);

        // fits on its own, but the element count does not
        let wide = ConvConfig::square(usize::MAX / 2, 4, 1, 2, 1, 1, 0);
        assert!(matches!(wide.validate(), Err(ConvError::SizeOverflow(_))));

        // a kernel of one tap never reads the dilation
        assert!(ConvConfig::square(1, 1, 1, 2, 1, 1, usize::MAX).validate().is_ok());
    }

    #[test]
    fn test_variant_follows_output_width() {
        let wide = ConvPrimitiveDesc::new(&ConvDesc::new(config(LANE_WIDTH, 0)).unwrap()).unwrap();
        assert_eq!(wide.variant(), ConvVariant::ChannelLast);
        assert_eq!(wide.src_desc().tag(), LayoutTag::Nhwc);
        assert_eq!(wide.weights_desc().tag(), LayoutTag::Hwio);

        let narrow = ConvPrimitiveDesc::new(&ConvDesc::new(config(3, 0)).unwrap()).unwrap();
        assert_eq!(narrow.variant(), ConvVariant::Planar);
        assert_eq!(narrow.dst_desc().tag(), LayoutTag::Nchw);
    }

    #[test]
    fn test_pinned_tag_selects_compatible_variant() {
        let desc = ConvDesc::new(config(16, 0))
            .unwrap()
            .with_tag(Role::Weights, LayoutTag::Oihw)
            .unwrap();
        let pd = ConvPrimitiveDesc::new(&desc).unwrap();
        assert_eq!(pd.variant(), ConvVariant::Planar);
    }

    #[test]
    fn test_conflicting_pins_unsupported() {
        let desc = ConvDesc::new(config(16, 0))
            .unwrap()
            .with_tag(Role::Src, LayoutTag::Nhwc)
            .unwrap()
            .with_tag(Role::Weights, LayoutTag::Oihw)
            .unwrap();
        let err = ConvPrimitiveDesc::new(&desc).unwrap_err();
        assert!(matches!(err, ConvError::UnsupportedLayout { .. }));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_from_descs_checks_input_extent() {
        let cfg = config(4, 2);
        let [src, weights, dst] = cfg.canonical_descs().unwrap();
        assert!(ConvDesc::from_descs(cfg, &src, &weights, &dst).is_ok());

        let mut small = cfg.src_dims();
        small[3] -= 1;
        let small = TensorDescriptor::f32(&small, LayoutTag::Nhwc).unwrap();
        assert_eq!(
            ConvDesc::from_descs(cfg, &small, &weights, &dst).unwrap_err(),
            ConvError::UndersizedInput {
                axis: "W",
                required: cfg.in_w(),
                actual: cfg.in_w() - 1,
            }
        );

        let mut large = cfg.src_dims();
        large[2] += 1;
        let large = TensorDescriptor::f32(&large, LayoutTag::Nhwc).unwrap();
        assert!(matches!(
            ConvDesc::from_descs(cfg, &large, &weights, &dst),
            Err(ConvError::ShapeMismatch(..))
        ));
    }

    #[test]
    fn test_execute_rejects_wrong_layout() {
        let cfg = config(8, 0);
        let pd = ConvPrimitiveDesc::new(&ConvDesc::new(cfg).unwrap()).unwrap();
        let prim = ConvPrimitive::new(pd.clone());
        let ctx = ExecutionContext::new(Some(1)).unwrap();
        let src = Buffer::zeros(&pd.src_desc().with_tag(LayoutTag::Nchw).unwrap()).unwrap();
        let weights = Buffer::zeros(pd.weights_desc()).unwrap();
        let mut dst = Buffer::zeros(pd.dst_desc()).unwrap();
        let err = prim
            .execute(
                &ctx,
                ConvArgs {
                    src: &src,
                    weights: &weights,
                    dst: &mut dst,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ConvError::LayoutMismatch { operand: "src", .. }));
        assert_eq!(ctx.stream().submitted(), 0);
    }
}
