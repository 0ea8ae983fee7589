//! Per-channel normalization over `(N, H, W)` for 4-D activations.
//!
//! Statistics are accumulated in `f64` with two passes (mean, then squared
//! deviations), so a channel whose values are all equal has variance exactly
//! zero and normalizes to exactly zero.

use crate::threading::{fold_chunks, for_each_chunk_mut, map_indices};
use dilconv_view::{dense_strides, row_major_strides, ConvError, Result};

/// Biased per-channel mean and variance.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMoments {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

impl ChannelMoments {
    pub fn channels(&self) -> usize {
        self.mean.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    /// `nhwc`: each pixel is a contiguous run of `C` values.
    ChannelLast,
    /// `nchw`: each `(n, c)` plane is a contiguous run of `H*W` values.
    ChannelFirst,
    Strided,
}

struct Geometry {
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    strides: [usize; 4],
    walk: Walk,
}

impl Geometry {
    fn new(data: &[f32], dims: &[usize], strides: &[isize]) -> Result<Self> {
        if dims.len() != 4 {
            return Err(ConvError::RankMismatch(4, dims.len()));
        }
        if strides.len() != 4 {
            return Err(ConvError::RankMismatch(4, strides.len()));
        }
        let (n, c, h, w) = (dims[0], dims[1], dims[2], dims[3]);
        if c == 0 {
            return Err(ConvError::InvalidDims {
                dims: dims.to_vec(),
            });
        }
        if n * h * w == 0 {
            return Err(ConvError::EmptyReduction);
        }
        let expected = n * c * h * w;
        if data.len() != expected {
            return Err(ConvError::BufferLength {
                expected,
                actual: data.len(),
            });
        }
        let mut s = [0usize; 4];
        for (dst, &src) in s.iter_mut().zip(strides) {
            *dst = usize::try_from(src).map_err(|_| {
                ConvError::InvalidConfig(format!("negative stride in {strides:?}"))
            })?;
        }
        let walk = if strides == dense_strides(dims, &[0, 2, 3, 1]).as_slice() {
            Walk::ChannelLast
        } else if strides == row_major_strides(dims).as_slice() {
            Walk::ChannelFirst
        } else {
            Walk::Strided
        };
        Ok(Self {
            n,
            c,
            h,
            w,
            strides: s,
            walk,
        })
    }

    #[inline]
    fn count(&self) -> usize {
        self.n * self.h * self.w
    }

    /// Visit the storage offset of every element of channel `ch`.
    fn for_each_offset(&self, ch: usize, mut f: impl FnMut(usize)) {
        let [sn, sc, sh, sw] = self.strides;
        for n in 0..self.n {
            for h in 0..self.h {
                let base = n * sn + ch * sc + h * sh;
                for w in 0..self.w {
                    f(base + w * sw);
                }
            }
        }
    }
}

fn check_epsilon(epsilon: f32) -> Result<()> {
    if epsilon.is_finite() && epsilon > 0.0 {
        Ok(())
    } else {
        Err(ConvError::InvalidEpsilon(epsilon))
    }
}

fn add_into(mut acc: Vec<f64>, other: Vec<f64>) -> Vec<f64> {
    for (a, b) in acc.iter_mut().zip(other) {
        *a += b;
    }
    acc
}

/// Per-channel mean and biased variance of a 4-D `(N, C, H, W)` tensor.
///
/// `strides` are the element strides of the logical axes.
pub fn channel_stats(data: &[f32], dims: &[usize], strides: &[isize]) -> Result<ChannelMoments> {
    let g = Geometry::new(data, dims, strides)?;
    let count = g.count() as f64;
    let c = g.c;

    match g.walk {
        Walk::ChannelLast => {
            let row = g.w * c;
            let sums = fold_chunks(
                data,
                row,
                || vec![0.0f64; c],
                |mut acc, chunk| {
                    for px in chunk.chunks_exact(c) {
                        for (a, &x) in acc.iter_mut().zip(px) {
                            *a += x as f64;
                        }
                    }
                    acc
                },
                add_into,
            );
            let mean: Vec<f64> = sums.into_iter().map(|s| s / count).collect();
            let squares = fold_chunks(
                data,
                row,
                || vec![0.0f64; c],
                |mut acc, chunk| {
                    for px in chunk.chunks_exact(c) {
                        for ((a, &x), &m) in acc.iter_mut().zip(px).zip(&mean) {
                            let d = x as f64 - m;
                            *a += d * d;
                        }
                    }
                    acc
                },
                add_into,
            );
            let variance = squares.into_iter().map(|s| s / count).collect();
            Ok(ChannelMoments { mean, variance })
        }
        Walk::ChannelFirst | Walk::Strided => {
            let plane = g.h * g.w;
            let per_channel = map_indices(c, data.len(), |ch| {
                if g.walk == Walk::ChannelFirst {
                    let planes = || {
                        (0..g.n).map(move |n| &data[(n * c + ch) * plane..][..plane])
                    };
                    let sum: f64 = planes().flatten().map(|&x| x as f64).sum();
                    let mean = sum / count;
                    let sq: f64 = planes()
                        .flatten()
                        .map(|&x| {
                            let d = x as f64 - mean;
                            d * d
                        })
                        .sum();
                    (mean, sq / count)
                } else {
                    let mut sum = 0.0f64;
                    g.for_each_offset(ch, |o| sum += data[o] as f64);
                    let mean = sum / count;
                    let mut sq = 0.0f64;
                    g.for_each_offset(ch, |o| {
                        let d = data[o] as f64 - mean;
                        sq += d * d;
                    });
                    (mean, sq / count)
                }
            });
            let (mean, variance) = per_channel.into_iter().unzip();
            Ok(ChannelMoments { mean, variance })
        }
    }
}

/// Apply `(x - mean) / sqrt(var + epsilon)` in place using precomputed moments.
pub fn normalize_in_place(
    data: &mut [f32],
    dims: &[usize],
    strides: &[isize],
    moments: &ChannelMoments,
    epsilon: f32,
) -> Result<()> {
    check_epsilon(epsilon)?;
    let g = Geometry::new(data, dims, strides)?;
    if moments.channels() != g.c {
        return Err(ConvError::ShapeMismatch(
            vec![g.c],
            vec![moments.channels()],
        ));
    }
    let eps = epsilon as f64;
    let inv_std: Vec<f64> = moments
        .variance
        .iter()
        .map(|&v| 1.0 / (v + eps).sqrt())
        .collect();
    let mean = &moments.mean;
    let c = g.c;
    let work = data.len();

    match g.walk {
        Walk::ChannelLast => {
            for_each_chunk_mut(data, g.w * c, work, |_, row| {
                for px in row.chunks_exact_mut(c) {
                    for ((x, &m), &s) in px.iter_mut().zip(mean).zip(&inv_std) {
                        *x = ((*x as f64 - m) * s) as f32;
                    }
                }
            });
        }
        Walk::ChannelFirst => {
            for_each_chunk_mut(data, g.h * g.w, work, |p, plane| {
                let ch = p % c;
                let (m, s) = (mean[ch], inv_std[ch]);
                for x in plane.iter_mut() {
                    *x = ((*x as f64 - m) * s) as f32;
                }
            });
        }
        Walk::Strided => {
            for ch in 0..c {
                let (m, s) = (mean[ch], inv_std[ch]);
                g.for_each_offset(ch, |o| {
                    data[o] = ((data[o] as f64 - m) * s) as f32;
                });
            }
        }
    }
    Ok(())
}

/// Compute channel statistics and normalize `data` in place.
///
/// Returns the moments used, so callers can expose them as outputs.
pub fn batch_norm_in_place(
    data: &mut [f32],
    dims: &[usize],
    strides: &[isize],
    epsilon: f32,
) -> Result<ChannelMoments> {
    check_epsilon(epsilon)?;
    let moments = channel_stats(data, dims, strides)?;
    normalize_in_place(data, dims, strides, &moments, epsilon)?;
    Ok(moments)
}
