use dilconv::{
    AlternatePipeline, Buffer, ConvConfig, Result, Scenario, ScenarioKind, TiledPipeline, Verdict,
};

/// Tiled pipeline whose output is off by `shift` at one memory position.
struct Shifted {
    inner: TiledPipeline,
    at: usize,
    shift: f32,
}

impl AlternatePipeline for Shifted {
    fn name(&self) -> &str {
        "shifted"
    }

    fn config(&self) -> &ConvConfig {
        self.inner.config()
    }

    fn run(&self, src: &Buffer, weights: &Buffer, dst: &mut Buffer) -> Result<()> {
        self.inner.run(src, weights, dst)?;
        dst.data_mut()[self.at] += self.shift;
        Ok(())
    }
}


fn small(kind: ScenarioKind, dilation: usize) -> Scenario {
    let mut scenario = Scenario::new(kind);
    scenario.config = ConvConfig::square(2, 8, 16, 12, 6, 3, dilation);
    scenario.seed = Some(2024);
    scenario.threads = Some(2);
    scenario
}

#[test]
fn test_conv_scenario_passes() {
    let mut scenario = small(ScenarioKind::Conv, 0);
    scenario.harness.samples = 2;
    scenario.harness.timed_runs = 2;
    let report = scenario.run().unwrap();
    assert_eq!(report.verdict, Verdict::Ok);
    assert!(report.results.iter().all(|r| r.gflops.is_some() && r.ms >= 0.0));
    assert_eq!(report.equivalence.compared, 2 * 16 * 12 * 6);
}

#[test]
fn test_dilated_scenario_passes() {
    let report = small(ScenarioKind::Dilated, 5).run().unwrap();
    assert!(report.passed());
    assert_eq!(report.config.in_w(), 12 + 2 * 6);
}

#[test]
fn test_fused_scenario_passes_without_gflops() {
    let report = small(ScenarioKind::Fused, 3).run().unwrap();
    assert!(report.passed(), "{:?}", report.equivalence);
    assert!(report.results.iter().all(|r| r.gflops.is_none()));
    assert_eq!(report.epsilon, Some(1e-9));
}

#[test]
fn test_same_seed_same_verdict_and_diff() {
    let a = small(ScenarioKind::Dilated, 2).run().unwrap();
    let b = small(ScenarioKind::Dilated, 2).run().unwrap();
    assert_eq!(a.verdict, b.verdict);
    assert_eq!(a.equivalence.max_abs_diff, b.equivalence.max_abs_diff);
}

#[test]
fn test_invalid_tolerance_is_an_error() {
    let mut scenario = small(ScenarioKind::Conv, 0);
    scenario.tolerance = -1.0;
    assert!(scenario.run().is_err());
}

#[test]
fn test_diverging_pipeline_fails_the_check() {
    let scenario = small(ScenarioKind::Dilated, 1);
    let shifted = Shifted {
        inner: TiledPipeline::new(scenario.config, None, Some(2)).unwrap(),
        at: 17,
        shift: 0.5,
    };
    let report = scenario.run_with(&shifted).unwrap();
    assert_eq!(report.verdict, Verdict::Fail);
    assert!(!report.passed());
    assert_eq!(report.verdict.exit_status(), 1);
    assert_eq!(report.equivalence.mismatches, 1);
    assert!(report.equivalence.max_abs_diff > 0.49);
    assert!(report.equivalence.first_mismatch.is_some());
    assert_eq!(report.checked, "shifted");

    let mut text = Vec::new();
    report.write_text(&mut text).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.starts_with("shifted results - FAIL\n"));
    assert!(text.contains("provider: "));
    assert!(!text.contains("Success!"));
}

#[test]
fn test_shift_below_tolerance_still_passes() {
    let scenario = small(ScenarioKind::Conv, 0);
    let shifted = Shifted {
        inner: TiledPipeline::new(scenario.config, None, Some(2)).unwrap(),
        at: 0,
        shift: 1.0 / 4096.0,
    };
    let report = scenario.run_with(&shifted).unwrap();
    assert!(report.passed());
    assert_eq!(report.verdict.exit_status(), 0);
}
