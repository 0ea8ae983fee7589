//! Direct dilated convolution kernels, one per supported layout family.
//!
//! Both kernels compute, for every output `(n, co, h, w)`:
//!
//! ```text
//! out = sum_{ci, kh, kw} weights[co, ci, kh, kw] * src[n, ci, h + kh*(dh+1), w + kw*(dw+1)]
//! ```
//!
//! with no padding and unit stride. Accumulation is `f32`.

use crate::threading::for_each_chunk_mut;
use dilconv_view::{ConvError, Result};

/// Problem shape as seen by the kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub n: usize,
    pub ci: usize,
    pub co: usize,
    pub h: usize,
    pub w: usize,
    pub kh: usize,
    pub kw: usize,
    pub dh: usize,
    pub dw: usize,
}

impl ConvGeometry {
    /// Input height covering the dilated receptive field, `None` on overflow.
    pub fn checked_in_h(&self) -> Option<usize> {
        span(self.h, self.kh, self.dh)
    }

    /// Input width covering the dilated receptive field, `None` on overflow.
    pub fn checked_in_w(&self) -> Option<usize> {
        span(self.w, self.kw, self.dw)
    }

    /// Saturating [`ConvGeometry::checked_in_h`].
    #[inline]
    pub fn in_h(&self) -> usize {
        self.checked_in_h().unwrap_or(usize::MAX)
    }

    /// Saturating [`ConvGeometry::checked_in_w`].
    #[inline]
    pub fn in_w(&self) -> usize {
        self.checked_in_w().unwrap_or(usize::MAX)
    }

    pub fn src_len(&self) -> usize {
        product(&[self.n, self.ci, self.in_h(), self.in_w()])
    }

    pub fn weights_len(&self) -> usize {
        product(&[self.co, self.ci, self.kh, self.kw])
    }

    pub fn dst_len(&self) -> usize {
        product(&[self.n, self.co, self.h, self.w])
    }

    /// Multiply-adds per forward pass (saturating; only a work estimate).
    pub fn macs(&self) -> usize {
        product(&[self.dst_len(), self.ci, self.kh, self.kw])
    }

    fn check(&self, src: &[f32], weights: &[f32], dst: &[f32]) -> Result<()> {
        let extents = [
            self.n, self.ci, self.co, self.h, self.w, self.kh, self.kw,
        ];
        if extents.iter().any(|&d| d == 0) {
            return Err(ConvError::InvalidDims {
                dims: extents.to_vec(),
            });
        }
        let (Some(in_h), Some(in_w)) = (self.checked_in_h(), self.checked_in_w()) else {
            return Err(ConvError::InvalidConfig(format!(
                "dilation {}x{} overflows the receptive field",
                self.dh, self.dw
            )));
        };
        let src_dims = [self.n, self.ci, in_h, in_w];
        if src_dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .is_none()
        {
            return Err(ConvError::SizeOverflow(src_dims.to_vec()));
        }
        for (expected, actual) in [
            (self.src_len(), src.len()),
            (self.weights_len(), weights.len()),
            (self.dst_len(), dst.len()),
        ] {
            if expected != actual {
                return Err(ConvError::BufferLength { expected, actual });
            }
        }
        Ok(())
    }
}

fn span(out: usize, k: usize, dilation: usize) -> Option<usize> {
    match k.saturating_sub(1) {
        0 => Some(out),
        gaps => dilation.checked_add(1)?.checked_mul(gaps)?.checked_add(out),
    }
}

fn product(dims: &[usize]) -> usize {
    dims.iter().fold(1usize, |acc, &d| acc.saturating_mul(d))
}

/// Channel-last kernel: src `nhwc`, weights `hwio`, dst `nhwc`.
///
/// One output row `(n, h)` per task; the innermost loop runs over output
/// channels, which are contiguous in both the weights and the destination.
pub fn conv_channel_last(
    src: &[f32],
    weights: &[f32],
    dst: &mut [f32],
    g: &ConvGeometry,
) -> Result<()> {
    g.check(src, weights, dst)?;
    let (ci, co) = (g.ci, g.co);
    let (in_h, in_w) = (g.in_h(), g.in_w());
    let row_len = g.w * co;

    for_each_chunk_mut(dst, row_len, g.macs(), |r, row| {
        let (n, oh) = (r / g.h, r % g.h);
        row.fill(0.0);
        for kh in 0..g.kh {
            let iy = oh + kh * (g.dh + 1);
            let src_row = &src[(n * in_h + iy) * in_w * ci..][..in_w * ci];
            for kw in 0..g.kw {
                let tap = &weights[(kh * g.kw + kw) * ci * co..][..ci * co];
                let x_off = kw * (g.dw + 1);
                for (ow, acc) in row.chunks_exact_mut(co).enumerate() {
                    let pixel = &src_row[(ow + x_off) * ci..][..ci];
                    for (&a, wrow) in pixel.iter().zip(tap.chunks_exact(co)) {
                        for (o, &wv) in acc.iter_mut().zip(wrow) {
                            *o += a * wv;
                        }
                    }
                }
            }
        }
    });
    Ok(())
}

/// Planar kernel: src `nchw`, weights `oihw`, dst `nchw`.
///
/// One output plane `(n, co)` per task; the innermost loop runs along the
/// output width.
pub fn conv_planar(src: &[f32], weights: &[f32], dst: &mut [f32], g: &ConvGeometry) -> Result<()> {
    g.check(src, weights, dst)?;
    let (in_h, in_w) = (g.in_h(), g.in_w());
    let plane_len = g.h * g.w;

    for_each_chunk_mut(dst, plane_len, g.macs(), |p, plane| {
        let (n, co) = (p / g.co, p % g.co);
        plane.fill(0.0);
        for c in 0..g.ci {
            let src_plane = &src[(n * g.ci + c) * in_h * in_w..][..in_h * in_w];
            let taps = &weights[(co * g.ci + c) * g.kh * g.kw..][..g.kh * g.kw];
            for kh in 0..g.kh {
                for kw in 0..g.kw {
                    let wv = taps[kh * g.kw + kw];
                    let x_off = kw * (g.dw + 1);
                    for (oh, drow) in plane.chunks_exact_mut(g.w).enumerate() {
                        let iy = oh + kh * (g.dh + 1);
                        let srow = &src_plane[iy * in_w + x_off..][..g.w];
                        for (o, &s) in drow.iter_mut().zip(srow) {
                            *o += wv * s;
                        }
                    }
                }
            }
        }
    });
    Ok(())
}
