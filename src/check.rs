//! Element-wise equivalence of two buffers within an absolute tolerance.

use dilconv_view::{Buffer, ConvError, Result};
use serde::Serialize;

/// Absolute tolerance used by the benchmark scenarios.
pub const DEFAULT_TOLERANCE: f32 = 0.001;

/// Compares buffers in logical index order, independent of their layouts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquivalenceChecker {
    tolerance: f32,
}

impl Default for EquivalenceChecker {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl EquivalenceChecker {
    pub fn new(tolerance: f32) -> Result<Self> {
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(ConvError::InvalidConfig(format!(
                "tolerance must be finite and > 0, got {tolerance}"
            )));
        }
        Ok(Self { tolerance })
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// `|a - b| < tolerance`, or the two values are bit-identical.
    #[inline]
    pub fn elements_equal(&self, a: f32, b: f32) -> bool {
        a.to_bits() == b.to_bits() || (a - b).abs() < self.tolerance
    }

    /// Full comparison report.
    pub fn check(&self, a: &Buffer, b: &Buffer) -> Result<Equivalence> {
        if a.dims() != b.dims() {
            return Err(ConvError::ShapeMismatch(a.dims().to_vec(), b.dims().to_vec()));
        }
        let mut report = Equivalence {
            tolerance: self.tolerance,
            compared: 0,
            mismatches: 0,
            max_abs_diff: 0.0,
            first_mismatch: None,
        };
        a.for_each_logical(|idx, va| {
            let vb = b.get(idx);
            report.compared += 1;
            if va.to_bits() == vb.to_bits() {
                return;
            }
            let diff = (va - vb).abs();
            if diff.is_nan() {
                report.max_abs_diff = f32::NAN;
            } else if !report.max_abs_diff.is_nan() {
                report.max_abs_diff = report.max_abs_diff.max(diff);
            }
            if !self.elements_equal(va, vb) {
                report.mismatches += 1;
                if report.first_mismatch.is_none() {
                    report.first_mismatch = Some(Mismatch {
                        index: idx.to_vec(),
                        left: va,
                        right: vb,
                    });
                }
            }
        });
        if report.mismatches > 0 {
            log::debug!(
                "{} of {} elements differ by >= {}; max diff {}",
                report.mismatches,
                report.compared,
                self.tolerance,
                report.max_abs_diff
            );
        }
        Ok(report)
    }

    /// Whether every element pair is within tolerance.
    pub fn equal(&self, a: &Buffer, b: &Buffer) -> Result<bool> {
        Ok(self.check(a, b)?.is_equal())
    }
}

/// First element pair outside tolerance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub index: Vec<usize>,
    pub left: f32,
    pub right: f32,
}

/// Result of [`EquivalenceChecker::check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Equivalence {
    pub tolerance: f32,
    pub compared: usize,
    pub mismatches: usize,
    pub max_abs_diff: f32,
    pub first_mismatch: Option<Mismatch>,
}

impl Equivalence {
    pub fn is_equal(&self) -> bool {
        self.mismatches == 0
    }
}
