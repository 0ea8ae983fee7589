//! Direct-loop references over logical indices, independent of any layout.

#![allow(dead_code)]

use dilconv::{Buffer, ConvConfig, LayoutTag, TensorDescriptor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `out[n, co, h, w]` as a logical `(N, CO, H, W)` row-major vector.
pub fn conv_reference(config: &ConvConfig, src: &Buffer, weights: &Buffer) -> Vec<f64> {
    let c = config;
    let mut out = vec![0.0f64; c.n * c.co * c.h * c.w];
    for n in 0..c.n {
        for co in 0..c.co {
            for h in 0..c.h {
                for w in 0..c.w {
                    let mut acc = 0.0f64;
                    for ci in 0..c.ci {
                        for kh in 0..c.kh {
                            for kw in 0..c.kw {
                                let x = src.get(&[n, ci, h + kh * (c.dh + 1), w + kw * (c.dw + 1)]);
                                acc += weights.get(&[co, ci, kh, kw]) as f64 * x as f64;
                            }
                        }
                    }
                    out[((n * c.co + co) * c.h + h) * c.w + w] = acc;
                }
            }
        }
    }
    out
}

/// Per-channel normalization of a logical `(N, C, H, W)` vector.
pub fn bnorm_reference(dims: [usize; 4], data: &[f64], epsilon: f64) -> Vec<f64> {
    let [n, c, h, w] = dims;
    let count = (n * h * w) as f64;
    let at = |b: usize, ch: usize, y: usize, x: usize| ((b * c + ch) * h + y) * w + x;
    let mut out = vec![0.0; data.len()];
    for ch in 0..c {
        let mut sum = 0.0;
        for b in 0..n {
            for y in 0..h {
                for x in 0..w {
                    sum += data[at(b, ch, y, x)];
                }
            }
        }
        let mean = sum / count;
        let mut sq = 0.0;
        for b in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let d = data[at(b, ch, y, x)] - mean;
                    sq += d * d;
                }
            }
        }
        let inv = 1.0 / (sq / count + epsilon).sqrt();
        for b in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let i = at(b, ch, y, x);
                    out[i] = (data[i] - mean) * inv;
                }
            }
        }
    }
    out
}

/// Seeded buffer of multiples of 1/256 in `[0, 1)`.
pub fn random_buffer(dims: &[usize], tag: LayoutTag, seed: u64) -> Buffer {
    let desc = TensorDescriptor::f32(dims, tag).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    Buffer::from_fn(&desc, |_| rng.gen_range(0..256u32) as f32 / 256.0).unwrap()
}

/// Caller-side buffers for `config`: random src and weights, zeroed dst.
pub fn canonical_inputs(config: &ConvConfig, seed: u64) -> (Buffer, Buffer, Buffer) {
    let [s, w, d] = config.canonical_descs().unwrap();
    let src = random_buffer(s.dims(), s.tag(), seed);
    let weights = random_buffer(w.dims(), w.tag(), seed.wrapping_add(1));
    (src, weights, Buffer::zeros(&d).unwrap())
}

pub fn assert_close(got: &[f32], want: &[f64], tol: f64) {
    assert_eq!(got.len(), want.len());
    for (i, (&g, &w)) in got.iter().zip(want).enumerate() {
        assert!(
            (g as f64 - w).abs() < tol,
            "element {i}: got {g}, want {w}"
        );
    }
}
