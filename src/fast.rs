//! The alternate ("fast") pipeline the provider engine is validated against.
//!
//! Callers only see a black-box `(src, weights) -> dst` call plus its own
//! timing, through [`AlternatePipeline`]. [`TiledPipeline`] is the bundled
//! implementation: it works directly on the caller-side layouts (`nhwc`
//! activations, `ihwo` weights), blocks the output into register tiles and
//! can fuse the normalization into the same call.

use std::sync::Arc;

use dilconv_view::{Buffer, ConvError, Result, TensorDescriptor};
use rayon::prelude::*;

use crate::bench::{BenchmarkHarness, Timing};
use crate::conv::{expect_layout, ConvConfig};

/// Output pixels per register tile.
const TILE_W: usize = 8;
/// Output channels per register tile.
const TILE_CO: usize = 16;

/// Independent implementation of the convolution (optionally fused with
/// normalization) on the caller-side layouts.
pub trait AlternatePipeline {
    fn name(&self) -> &str;

    fn config(&self) -> &ConvConfig;

    /// Compute `dst` from `src` and `weights`.
    fn run(&self, src: &Buffer, weights: &Buffer, dst: &mut Buffer) -> Result<()>;

    /// Time [`AlternatePipeline::run`]; `dst` holds the last run's output.
    fn benchmark(
        &self,
        harness: &BenchmarkHarness,
        src: &Buffer,
        weights: &Buffer,
        dst: &mut Buffer,
    ) -> Result<Timing> {
        harness.time(|| self.run(src, weights, &mut *dst), || {})
    }
}

/// Register-tiled direct convolution with an optional fused normalization.
#[derive(Debug, Clone)]
pub struct TiledPipeline {
    config: ConvConfig,
    epsilon: Option<f32>,
    descs: [TensorDescriptor; 3],
    pool: Arc<rayon::ThreadPool>,
}

impl TiledPipeline {
    /// `epsilon = Some(_)` appends per-channel normalization to every run.
    pub fn new(config: ConvConfig, epsilon: Option<f32>, threads: Option<usize>) -> Result<Self> {
        let descs = config.canonical_descs()?;
        if let Some(eps) = epsilon {
            if !(eps.is_finite() && eps > 0.0) {
                return Err(ConvError::InvalidEpsilon(eps));
            }
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or(0))
            .thread_name(|i| format!("dilconv-tiled-{i}"))
            .build()
            .map_err(|e| ConvError::ThreadPool(e.to_string()))?;
        Ok(Self {
            config,
            epsilon,
            descs,
            pool: Arc::new(pool),
        })
    }

    pub fn epsilon(&self) -> Option<f32> {
        self.epsilon
    }

    fn convolve(&self, src: &[f32], weights: &[f32], dst: &mut [f32]) {
        let c = &self.config;
        let (in_h, in_w) = (c.in_h(), c.in_w());
        let (ci, co) = (c.ci, c.co);
        dst.par_chunks_mut(c.w * co)
            .enumerate()
            .for_each(|(r, row)| {
                let (n, oh) = (r / c.h, r % c.h);
                let mut acc = [[0.0f32; TILE_CO]; TILE_W];
                for ow0 in (0..c.w).step_by(TILE_W) {
                    let tw = TILE_W.min(c.w - ow0);
                    for co0 in (0..co).step_by(TILE_CO) {
                        let tc = TILE_CO.min(co - co0);
                        for lane in acc.iter_mut().take(tw) {
                            lane[..tc].fill(0.0);
                        }
                        for kh in 0..c.kh {
                            let iy = oh + kh * (c.dh + 1);
                            let src_row = (n * in_h + iy) * in_w;
                            for kw in 0..c.kw {
                                let ix0 = ow0 + kw * (c.dw + 1);
                                for i in 0..ci {
                                    let wbase = ((i * c.kh + kh) * c.kw + kw) * co + co0;
                                    let wrow = &weights[wbase..wbase + tc];
                                    for (t, lane) in acc.iter_mut().take(tw).enumerate() {
                                        let s = src[(src_row + ix0 + t) * ci + i];
                                        for (a, &wv) in lane[..tc].iter_mut().zip(wrow) {
                                            *a += s * wv;
                                        }
                                    }
                                }
                            }
                        }
                        for (t, lane) in acc.iter().take(tw).enumerate() {
                            let o = (ow0 + t) * co + co0;
                            row[o..o + tc].copy_from_slice(&lane[..tc]);
                        }
                    }
                }
            });
    }

    /// Single-pass `sum`/`sum of squares` statistics, then normalize.
    fn normalize(&self, data: &mut [f32], epsilon: f32) {
        let co = self.config.co;
        let count = (self.config.n * self.config.h * self.config.w) as f64;
        let (sum, sum_sq) = data
            .par_chunks(co * self.config.w)
            .fold(
                || (vec![0.0f64; co], vec![0.0f64; co]),
                |(mut s, mut q), row| {
                    for px in row.chunks_exact(co) {
                        for ((a, b), &x) in s.iter_mut().zip(q.iter_mut()).zip(px) {
                            let x = x as f64;
                            *a += x;
                            *b += x * x;
                        }
                    }
                    (s, q)
                },
            )
            .reduce(
                || (vec![0.0f64; co], vec![0.0f64; co]),
                |(mut s, mut q), (s2, q2)| {
                    s.iter_mut().zip(s2).for_each(|(a, b)| *a += b);
                    q.iter_mut().zip(q2).for_each(|(a, b)| *a += b);
                    (s, q)
                },
            );
        let eps = epsilon as f64;
        let (mean, scale): (Vec<f64>, Vec<f64>) = sum
            .iter()
            .zip(&sum_sq)
            .map(|(&s, &q)| {
                let mean = s / count;
                let var = (q / count - mean * mean).max(0.0);
                (mean, 1.0 / (var + eps).sqrt())
            })
            .unzip();
        data.par_chunks_mut(co).for_each(|px| {
            for ((x, &m), &k) in px.iter_mut().zip(&mean).zip(&scale) {
                *x = ((*x as f64 - m) * k) as f32;
            }
        });
    }
}

impl AlternatePipeline for TiledPipeline {
    fn name(&self) -> &str {
        "tiled"
    }

    fn config(&self) -> &ConvConfig {
        &self.config
    }

    fn run(&self, src: &Buffer, weights: &Buffer, dst: &mut Buffer) -> Result<()> {
        let [src_desc, weights_desc, dst_desc] = &self.descs;
        expect_layout("src", src.desc(), src_desc)?;
        expect_layout("weights", weights.desc(), weights_desc)?;
        expect_layout("dst", dst.desc(), dst_desc)?;
        let out = dst.data_mut();
        self.pool.install(|| {
            self.convolve(src.data(), weights.data(), out);
            if let Some(eps) = self.epsilon {
                self.normalize(out, eps);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_tap_scales_input() {
        let cfg = ConvConfig::square(1, 1, 1, 3, 3, 1, 0);
        let pipe = TiledPipeline::new(cfg, None, Some(1)).unwrap();
        let [s, w, d] = cfg.canonical_descs().unwrap();
        let src = Buffer::from_vec(&s, vec![1.0; 9]).unwrap();
        let weights = Buffer::from_vec(&w, vec![2.0]).unwrap();
        let mut dst = Buffer::zeros(&d).unwrap();
        pipe.run(&src, &weights, &mut dst).unwrap();
        assert!(dst.data().iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_tiles_cover_ragged_edges() {
        // W and CO not multiples of the tile sizes
        let cfg = ConvConfig::square(1, 2, TILE_CO + 3, TILE_W + 2, 2, 2, 1);
        let pipe = TiledPipeline::new(cfg, None, Some(2)).unwrap();
        let [s, w, d] = cfg.canonical_descs().unwrap();
        let src = Buffer::from_fn(&s, |i| ((i[1] + i[2] * 3 + i[3]) % 5) as f32).unwrap();
        let weights = Buffer::from_fn(&w, |i| (i[0] % 3) as f32 - 1.0).unwrap();
        let mut dst = Buffer::zeros(&d).unwrap();
        pipe.run(&src, &weights, &mut dst).unwrap();
        for o in [0, TILE_CO, TILE_CO + 2] {
            for x in [0, TILE_W, TILE_W + 1] {
                let mut want = 0.0f32;
                for i in 0..2 {
                    for kh in 0..2 {
                        for kw in 0..2 {
                            want += weights.get(&[o, i, kh, kw]) * src.get(&[0, i, 1 + kh * 2, x + kw * 2]);
                        }
                    }
                }
                assert_eq!(dst.get(&[0, o, 1, x]), want);
            }
        }
    }

    #[test]
    fn test_rejects_non_canonical_layout() {
        let cfg = ConvConfig::square(1, 2, 2, 2, 2, 1, 0);
        let pipe = TiledPipeline::new(cfg, Some(1e-5), Some(1)).unwrap();
        let [s, w, d] = cfg.canonical_descs().unwrap();
        let src = Buffer::zeros(&s.with_tag(dilconv_view::LayoutTag::Nchw).unwrap()).unwrap();
        let weights = Buffer::zeros(&w).unwrap();
        let mut dst = Buffer::zeros(&d).unwrap();
        assert!(matches!(
            pipe.run(&src, &weights, &mut dst),
            Err(ConvError::LayoutMismatch { operand: "src", .. })
        ));
    }
}
