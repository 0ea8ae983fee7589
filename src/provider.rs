//! End-to-end provider calls on caller-side buffers.
//!
//! Each wrapper builds the operator plan from unconstrained descriptors,
//! negotiates layouts against the caller's buffers, reorders inputs outside
//! the timed region, times only the primitive and reorders the result back.

use dilconv_view::{Buffer, Result};

use crate::bench::{BenchmarkHarness, Timing};
use crate::bnorm::{BatchNormDesc, BatchNormPrimitive, BatchNormPrimitiveDesc, BatchNormStats};
use crate::conv::{ConvArgs, ConvConfig, ConvDesc, ConvPrimitive, ConvPrimitiveDesc, ConvVariant};
use crate::engine::ExecutionContext;
use crate::negotiate::{LayoutNegotiator, Negotiation, Role};

/// Outcome of [`dilated_conv`].
#[derive(Debug, Clone)]
pub struct ConvRun {
    pub variant: ConvVariant,
    pub negotiation: Negotiation,
    pub timing: Timing,
}

/// Outcome of [`batch_norm`].
#[derive(Debug, Clone)]
pub struct BnRun {
    pub negotiation: Negotiation,
    pub timing: Timing,
    pub stats: BatchNormStats,
}

/// Outcome of [`conv_bn`]: both operators timed separately.
#[derive(Debug, Clone)]
pub struct FusedRun {
    pub conv: ConvRun,
    pub bnorm: BnRun,
}

impl FusedRun {
    /// Sum of the two operator timings.
    pub fn timing(&self) -> Timing {
        self.conv.timing + self.bnorm.timing
    }
}

fn conv_plan(config: ConvConfig, src: &Buffer, weights: &Buffer, dst: &Buffer) -> Result<(ConvPrimitiveDesc, Negotiation)> {
    let checked = ConvDesc::from_descs(config, src.desc(), weights.desc(), dst.desc())?;
    let pd = ConvPrimitiveDesc::new(&ConvDesc::new(*checked.config())?)?;
    let negotiation = LayoutNegotiator::negotiate(
        &pd,
        &[
            (Role::Src, src.desc()),
            (Role::Weights, weights.desc()),
            (Role::Dst, dst.desc()),
        ],
    )?;
    Ok((pd, negotiation))
}

/// Convolve `src` with `weights` into `dst`, all in the caller's layouts.
pub fn dilated_conv(
    ctx: &ExecutionContext,
    harness: &BenchmarkHarness,
    config: ConvConfig,
    src: &Buffer,
    weights: &Buffer,
    dst: &mut Buffer,
) -> Result<ConvRun> {
    let (pd, negotiation) = conv_plan(config, src, weights, dst)?;
    let src_e = LayoutNegotiator::bind_input(src, pd.src_desc())?;
    let weights_e = LayoutNegotiator::bind_input(weights, pd.weights_desc())?;
    let mut out = LayoutNegotiator::bind_output(dst, pd.dst_desc())?;

    let variant = pd.variant();
    let prim = ConvPrimitive::new(pd);
    let timing = harness.time_on(ctx, || {
        prim.execute(
            ctx,
            ConvArgs {
                src: &src_e,
                weights: &weights_e,
                dst: out.buffer_mut(),
            },
        )
    })?;
    ctx.wait();
    out.finish()?;
    log::debug!("provider conv {variant:?}: {:.3}ms", timing.millis());
    Ok(ConvRun {
        variant,
        negotiation,
        timing,
    })
}

/// Normalize `data` in place in its own layout; no reorder is involved.
///
/// Timing runs on a scratch copy so repeated runs never compound; the
/// result comes from one further untimed execution on `data`.
pub fn batch_norm(
    ctx: &ExecutionContext,
    harness: &BenchmarkHarness,
    epsilon: f32,
    data: &mut Buffer,
) -> Result<BnRun> {
    let pd = BatchNormPrimitiveDesc::new(&BatchNormDesc::new(data.desc(), epsilon)?)?;
    let negotiation = LayoutNegotiator::negotiate(&pd, &[(Role::Src, data.desc())])?;
    let prim = BatchNormPrimitive::new(pd);

    let timing = {
        let mut scratch = data.clone();
        harness.time_on(ctx, || prim.execute(ctx, &mut scratch).map(drop))?
    };
    let stats = prim.execute(ctx, data)?;
    ctx.wait();
    log::debug!("provider batch norm: {:.3}ms", timing.millis());
    Ok(BnRun {
        negotiation,
        timing,
        stats,
    })
}

/// Convolution followed by normalization of its output.
///
/// The intermediate stays in the engine's layout: normalization runs in
/// place on the convolution's destination and only the final result is
/// reordered into `dst`.
pub fn conv_bn(
    ctx: &ExecutionContext,
    harness: &BenchmarkHarness,
    config: ConvConfig,
    epsilon: f32,
    src: &Buffer,
    weights: &Buffer,
    dst: &mut Buffer,
) -> Result<FusedRun> {
    let (pd, conv_negotiation) = conv_plan(config, src, weights, dst)?;
    let bn_pd = BatchNormPrimitiveDesc::new(&BatchNormDesc::new(pd.dst_desc(), epsilon)?)?;
    let bn_negotiation = LayoutNegotiator::negotiate(&bn_pd, &[(Role::Src, pd.dst_desc())])?;

    let src_e = LayoutNegotiator::bind_input(src, pd.src_desc())?;
    let weights_e = LayoutNegotiator::bind_input(weights, pd.weights_desc())?;
    let mut out = LayoutNegotiator::bind_output(dst, pd.dst_desc())?;

    let variant = pd.variant();
    let conv = ConvPrimitive::new(pd);
    let conv_timing = harness.time_on(ctx, || {
        conv.execute(
            ctx,
            ConvArgs {
                src: &src_e,
                weights: &weights_e,
                dst: out.buffer_mut(),
            },
        )
    })?;

    let bnorm = BatchNormPrimitive::new(bn_pd);
    let bn_timing = {
        let mut scratch = out.buffer().clone();
        harness.time_on(ctx, || bnorm.execute(ctx, &mut scratch).map(drop))?
    };
    let stats = bnorm.execute(ctx, out.buffer_mut())?;
    ctx.wait();
    out.finish()?;
    log::debug!(
        "provider conv+bnorm {variant:?}: {:.3}ms + {:.3}ms",
        conv_timing.millis(),
        bn_timing.millis()
    );
    Ok(FusedRun {
        conv: ConvRun {
            variant,
            negotiation: conv_negotiation,
            timing: conv_timing,
        },
        bnorm: BnRun {
            negotiation: bn_negotiation,
            timing: bn_timing,
            stats,
        },
    })
}
