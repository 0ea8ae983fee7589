//! Run report: text for terminals, JSON for tooling.

use std::fmt;
use std::io::{self, Write};

use serde::Serialize;

use crate::bench::Timing;
use crate::check::Equivalence;
use crate::conv::{ConvConfig, ConvVariant};
use crate::scenario::ScenarioKind;

/// Outcome of the equivalence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Ok,
    Fail,
}

impl Verdict {
    /// Process exit status: 0 on `Ok`, 1 on `Fail`.
    pub fn exit_status(self) -> u8 {
        match self {
            Verdict::Ok => 0,
            Verdict::Fail => 1,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Ok => "OK",
            Verdict::Fail => "FAIL",
        })
    }
}

/// Timing of one implementation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImplResult {
    pub name: String,
    pub ms: f64,
    /// Omitted for fused runs, whose operation count is not the convolution's.
    pub gflops: Option<f64>,
}

impl ImplResult {
    pub fn new(name: impl Into<String>, timing: &Timing, flops: Option<f64>) -> Self {
        Self {
            name: name.into(),
            ms: timing.millis(),
            gflops: flops.map(|f| timing.gflops(f)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub scenario: ScenarioKind,
    pub config: ConvConfig,
    pub epsilon: Option<f32>,
    pub seed: Option<u64>,
    pub threads: usize,
    pub plan: ConvVariant,
    /// Name of the implementation validated against the provider engine.
    pub checked: String,
    pub results: Vec<ImplResult>,
    pub verdict: Verdict,
    pub equivalence: Equivalence,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Ok
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary.
    pub fn write_text<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{} results - {}", self.checked, self.verdict)?;
        if !self.passed() {
            let eq = &self.equivalence;
            writeln!(
                out,
                "{} of {} elements differ by >= {} (max abs diff {})",
                eq.mismatches, eq.compared, eq.tolerance, eq.max_abs_diff
            )?;
            if let Some(m) = &eq.first_mismatch {
                writeln!(out, "first mismatch at {:?}: {} vs {}", m.index, m.left, m.right)?;
            }
        }
        for r in &self.results {
            match r.gflops {
                Some(g) => writeln!(out, "{}: {:.6}ms, {:.6} GFLOP/s", r.name, r.ms, g)?,
                None => writeln!(out, "{}: {:.6}ms", r.name, r.ms)?,
            }
        }
        if self.passed() {
            writeln!(out)?;
            writeln!(out, "Success!")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report(mismatches: usize) -> Report {
        let timing = Timing {
            best: Duration::from_millis(2),
            runs: 1,
            samples: 1,
        };
        Report {
            scenario: ScenarioKind::Conv,
            config: ConvConfig::square(1, 1, 1, 2, 2, 1, 0),
            epsilon: None,
            seed: Some(7),
            threads: 1,
            plan: ConvVariant::Planar,
            checked: "tiled".into(),
            results: vec![
                ImplResult::new("tiled", &timing, Some(4e6)),
                ImplResult::new("provider", &timing, None),
            ],
            verdict: if mismatches == 0 { Verdict::Ok } else { Verdict::Fail },
            equivalence: Equivalence {
                tolerance: 0.001,
                compared: 4,
                mismatches,
                max_abs_diff: 0.0,
                first_mismatch: None,
            },
        }
    }

    #[test]
    fn test_text_pass() {
        let mut out = Vec::new();
        report(0).write_text(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "tiled results - OK\n\
             tiled: 2.000000ms, 2.000000 GFLOP/s\n\
             provider: 2.000000ms\n\
             \n\
             Success!\n"
        );
    }

    #[test]
    fn test_text_fail_keeps_timings_drops_success() {
        let mut out = Vec::new();
        report(3).write_text(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("tiled results - FAIL\n"));
        assert!(text.contains("3 of 4 elements differ"));
        assert!(text.contains("tiled: 2.000000ms, 2.000000 GFLOP/s\n"));
        assert!(text.ends_with("provider: 2.000000ms\n"));
        assert!(!text.contains("Success!"));
    }

    #[test]
    fn test_json_fields() {
        let value: serde_json::Value = serde_json::from_str(&report(0).to_json().unwrap()).unwrap();
        assert_eq!(value["verdict"], "OK");
        assert_eq!(value["scenario"], "conv");
        assert_eq!(value["plan"], "planar");
        assert_eq!(value["config"]["ci"], 1);
        assert!(value["results"][1]["gflops"].is_null());
    }
}
