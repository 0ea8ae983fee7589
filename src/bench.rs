//! Wall-clock benchmarking with warm-up and per-block stream synchronization.

use std::ops::Add;
use std::time::{Duration, Instant};

use dilconv_view::{ConvError, Result};
use serde::{Deserialize, Serialize};

use crate::engine::ExecutionContext;

/// How many times to run an operation and how to summarize it.
///
/// The operation runs `max(warmup_runs, 1)` times untimed, then `samples`
/// blocks of `timed_runs` back-to-back runs, each block under one timer with
/// a single synchronization at its end. The reported time is the smallest
/// per-run mean over the blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkHarness {
    pub warmup_runs: usize,
    pub timed_runs: usize,
    pub samples: usize,
}

impl Default for BenchmarkHarness {
    fn default() -> Self {
        Self {
            warmup_runs: 1,
            timed_runs: 1,
            samples: 1,
        }
    }
}

impl BenchmarkHarness {
    pub fn new(warmup_runs: usize, timed_runs: usize, samples: usize) -> Result<Self> {
        if timed_runs == 0 || samples == 0 {
            return Err(ConvError::InvalidConfig(format!(
                "benchmark needs at least one timed run and one sample, got {timed_runs} x {samples}"
            )));
        }
        Ok(Self {
            warmup_runs,
            timed_runs,
            samples,
        })
    }

    /// Time `op`, calling `sync` once after every timed block.
    ///
    /// The first error from `op` aborts the measurement.
    pub fn time<E, F, S>(&self, mut op: F, mut sync: S) -> std::result::Result<Timing, E>
    where
        F: FnMut() -> std::result::Result<(), E>,
        S: FnMut(),
    {
        for _ in 0..self.warmup_runs.max(1) {
            op()?;
        }
        sync();

        let runs = self.timed_runs.max(1);
        let mut best = Duration::MAX;
        for _ in 0..self.samples.max(1) {
            let start = Instant::now();
            for _ in 0..runs {
                op()?;
            }
            sync();
            let mean = per_run(start.elapsed(), runs);
            best = best.min(mean);
        }
        Ok(Timing {
            best,
            runs,
            samples: self.samples.max(1),
        })
    }

    /// Time `op` on `ctx`, draining its stream after every block.
    pub fn time_on<F>(&self, ctx: &ExecutionContext, op: F) -> Result<Timing>
    where
        F: FnMut() -> Result<()>,
    {
        self.time(op, || {
            ctx.wait();
        })
    }
}

/// Mean duration of one of `runs` runs that together took `total`.
fn per_run(total: Duration, runs: usize) -> Duration {
    total.div_f64(runs as f64)
}

/// Summary of one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Best per-run mean over all samples.
    pub best: Duration,
    pub runs: usize,
    pub samples: usize,
}

impl Timing {
    pub fn seconds(&self) -> f64 {
        self.best.as_secs_f64()
    }

    pub fn millis(&self) -> f64 {
        self.seconds() * 1e3
    }

    /// Throughput for an operation of `flops` floating-point operations.
    ///
    /// Zero when the measured time is zero.
    pub fn gflops(&self, flops: f64) -> f64 {
        let secs = self.seconds();
        if secs > 0.0 {
            flops / secs / 1e9
        } else {
            0.0
        }
    }
}

/// Sequential composition: times add, run counts keep the smaller side.
impl Add for Timing {
    type Output = Timing;

    fn add(self, rhs: Timing) -> Timing {
        Timing {
            best: self.best + rhs.best,
            runs: self.runs.min(rhs.runs),
            samples: self.samples.min(rhs.samples),
        }
    }
}
