//! Benchmark scenarios: random inputs, both implementations, one report.

use dilconv_view::{Buffer, ConvError, Result, TensorDescriptor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::bench::BenchmarkHarness;
use crate::check::{EquivalenceChecker, DEFAULT_TOLERANCE};
use crate::conv::ConvConfig;
use crate::engine::ExecutionContext;
use crate::fast::{AlternatePipeline, TiledPipeline};
use crate::provider::{conv_bn, dilated_conv};
use crate::report::{ImplResult, Report, Verdict};

/// Epsilon of the fused scenario.
pub const FUSED_EPSILON: f32 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioKind {
    /// Plain convolution, best of 10 blocks of 10 runs.
    Conv,
    /// Heavily dilated convolution, a single timed run.
    Dilated,
    /// Dilated convolution followed by normalization.
    Fused,
}

/// Everything needed to reproduce one comparison run.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub kind: ScenarioKind,
    pub config: ConvConfig,
    /// `Some` adds normalization after the convolution.
    pub epsilon: Option<f32>,
    pub harness: BenchmarkHarness,
    pub tolerance: f32,
    pub seed: Option<u64>,
    pub threads: Option<usize>,
}

impl Scenario {
    pub fn new(kind: ScenarioKind) -> Self {
        let conv = |dilation| ConvConfig::square(5, 128, 128, 100, 80, 3, dilation);
        let (config, epsilon, harness) = match kind {
            ScenarioKind::Conv => (
                conv(0),
                None,
                BenchmarkHarness {
                    warmup_runs: 1,
                    timed_runs: 10,
                    samples: 10,
                },
            ),
            ScenarioKind::Dilated => (conv(31), None, BenchmarkHarness::default()),
            ScenarioKind::Fused => (conv(31), Some(FUSED_EPSILON), BenchmarkHarness::default()),
        };
        Self {
            kind,
            config,
            epsilon,
            harness,
            tolerance: DEFAULT_TOLERANCE,
            seed: None,
            threads: None,
        }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Run the provider engine and a [`TiledPipeline`] on the same random
    /// inputs and compare.
    pub fn run(&self) -> Result<Report> {
        let fast = TiledPipeline::new(self.config, self.epsilon, self.threads)?;
        self.run_with(&fast)
    }

    /// Same as [`Scenario::run`] with `fast` as the checked implementation.
    ///
    /// `fast` must be built for this scenario's config, and must normalize
    /// its output when the scenario has an epsilon.
    pub fn run_with<P: AlternatePipeline + ?Sized>(&self, fast: &P) -> Result<Report> {
        if fast.config() != &self.config {
            return Err(ConvError::InvalidConfig(format!(
                "{} pipeline built for {:?}, scenario uses {:?}",
                fast.name(),
                fast.config(),
                self.config
            )));
        }
        let checker = EquivalenceChecker::new(self.tolerance)?;
        let [src_desc, weights_desc, dst_desc] = self.config.canonical_descs()?;
        let mut rng = self.rng();
        let src = random_input(&src_desc, &mut rng)?;
        let weights = random_input(&weights_desc, &mut rng)?;
        log::info!(
            "{:?}: src {src_desc}, weights {weights_desc}, dst {dst_desc}",
            self.kind
        );

        let mut fast_out = Buffer::zeros(&dst_desc)?;
        let fast_timing = fast.benchmark(&self.harness, &src, &weights, &mut fast_out)?;

        let ctx = ExecutionContext::new(self.threads)?;
        let mut provider_out = Buffer::zeros(&dst_desc)?;
        let (provider_timing, plan) = match self.epsilon {
            Some(eps) => {
                let run = conv_bn(
                    &ctx,
                    &self.harness,
                    self.config,
                    eps,
                    &src,
                    &weights,
                    &mut provider_out,
                )?;
                (run.timing(), run.conv.variant)
            }
            None => {
                let run = dilated_conv(
                    &ctx,
                    &self.harness,
                    self.config,
                    &src,
                    &weights,
                    &mut provider_out,
                )?;
                (run.timing, run.variant)
            }
        };

        let equivalence = checker.check(&provider_out, &fast_out)?;
        let verdict = if equivalence.is_equal() {
            Verdict::Ok
        } else {
            Verdict::Fail
        };
        let flops = self.epsilon.is_none().then(|| self.config.flops());
        Ok(Report {
            scenario: self.kind,
            config: self.config,
            epsilon: self.epsilon,
            seed: self.seed,
            threads: ctx.engine().num_threads(),
            plan,
            checked: fast.name().to_string(),
            results: vec![
                ImplResult::new(fast.name(), &fast_timing, flops),
                ImplResult::new("provider", &provider_timing, flops),
            ],
            verdict,
            equivalence,
        })
    }
}

/// Uniform values in `[0, 1)` quantized to multiples of `1/256`.
pub fn random_input<R: Rng + ?Sized>(desc: &TensorDescriptor, rng: &mut R) -> Result<Buffer> {
    let data = (0..desc.len())
        .map(|_| rng.gen_range(0..256u32) as f32 / 256.0)
        .collect();
    Buffer::from_vec(desc, data)
}
