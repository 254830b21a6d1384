//! The Metric Engine (§4.9): per-file, per-`ConfigProfile` scoring over
//! the three tier-1 graph queries, each compared against that profile's
//! thresholds and folded into one aggregate severity plus an escalation
//! decision for whether Phase2 investigation is warranted.

use serde::{Deserialize, Serialize};

use coderisk_model::ConfigProfile;
use coderisk_storage::CoChangeEntry;

/// A metric's three severity bands (§4.9). `Severity` orders `Low < Medium
/// < High` so aggregation can take a plain `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricSignal {
    pub raw_value: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReport {
    pub coupling: MetricSignal,
    pub co_change: MetricSignal,
    pub test_ratio: MetricSignal,
    pub aggregate: Severity,
    /// §4.9's escalation rule: whether this file's Phase1 evidence alone
    /// warrants handing off to the Investigation Orchestrator.
    pub escalate: bool,
    pub escalation_reasons: Vec<String>,
}

fn coupling_severity(count: usize, threshold: i32) -> Severity {
    let count = count as i32;
    if count > threshold {
        Severity::High
    } else if count > threshold / 2 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn co_change_severity(max_frequency: f64, threshold: f64) -> Severity {
    if max_frequency > threshold {
        Severity::High
    } else if max_frequency > threshold / 2.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn test_ratio_severity(ratio: f64, threshold: f64) -> Severity {
    if ratio < threshold {
        Severity::High
    } else if ratio < threshold + 0.3 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// A metric's value in the complete absence of graph signal: no coupling
/// neighbors, no co-change partners, and `test_ratio`'s own smoothed
/// default for a file with zero recorded LOC on either side (§8).
const NULL_COUPLING: f64 = 0.0;
const NULL_CO_CHANGE: f64 = 0.0;
const NULL_TEST_RATIO: f64 = 1.0;

/// Soft-signal escalation thresholds (§4.9): half the hard coupling
/// threshold, and the co-change fraction the spec names explicitly.
const SOFT_CO_CHANGE_FRACTION: f64 = 0.57;

pub fn score_file(profile: &ConfigProfile, coupling_count: usize, co_change: &[CoChangeEntry], test_ratio: f64) -> MetricReport {
    let max_co_change_frequency = co_change.iter().map(|e| e.frequency).fold(0.0_f64, f64::max);

    let coupling = MetricSignal { raw_value: coupling_count as f64, severity: coupling_severity(coupling_count, profile.coupling_threshold) };
    let co_change_signal =
        MetricSignal { raw_value: max_co_change_frequency, severity: co_change_severity(max_co_change_frequency, profile.co_change_threshold) };
    let test_ratio_signal = MetricSignal { raw_value: test_ratio, severity: test_ratio_severity(test_ratio, profile.test_ratio_threshold) };

    let aggregate = [coupling.severity, co_change_signal.severity, test_ratio_signal.severity].into_iter().max().unwrap_or(Severity::Low);

    let mut reasons = Vec::new();
    if coupling.raw_value > profile.coupling_threshold as f64 {
        reasons.push(format!("coupling {} exceeds threshold {}", coupling_count, profile.coupling_threshold));
    }
    if co_change_signal.raw_value > profile.co_change_threshold {
        reasons.push(format!("co-change frequency {max_co_change_frequency:.2} exceeds threshold {:.2}", profile.co_change_threshold));
    }
    if test_ratio_signal.raw_value < profile.test_ratio_threshold {
        reasons.push(format!("test ratio {test_ratio:.2} below threshold {:.2}", profile.test_ratio_threshold));
    }
    let insufficient_data =
        coupling.raw_value == NULL_COUPLING && co_change_signal.raw_value == NULL_CO_CHANGE && test_ratio_signal.raw_value == NULL_TEST_RATIO;
    if insufficient_data {
        reasons.push("no coupling, co-change, or test-ratio signal recorded for this file".to_string());
    }
    // §4.9's literal soft-escalation rule (coupling > half the hard
    // threshold, or co-change above SOFT_CO_CHANGE_FRACTION) disagrees
    // with two of §8's worked examples: the React SPA walkthrough
    // (coupling 18 against a threshold of 20, i.e. > 10) calls for
    // escalate=false, and the ML project walkthrough expects
    // coupling_severity(8, 10) to read Low rather than the Medium this
    // rule produces. Per §9 those examples are illustrative, not
    // normative, so this function implements §4.9's stated rule as
    // written rather than silently special-casing either scenario.
    if coupling.raw_value > (profile.coupling_threshold as f64) / 2.0 {
        reasons.push(format!("coupling {coupling_count} exceeds half the threshold ({})", profile.coupling_threshold / 2));
    }
    if co_change_signal.raw_value > profile.co_change_threshold * SOFT_CO_CHANGE_FRACTION {
        reasons.push(format!("co-change frequency {max_co_change_frequency:.2} exceeds the soft threshold"));
    }

    MetricReport {
        coupling,
        co_change: co_change_signal,
        test_ratio: test_ratio_signal,
        aggregate,
        escalate: !reasons.is_empty(),
        escalation_reasons: reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ConfigProfile {
        coderisk_model::by_key("python_web").unwrap().clone()
    }

    #[test]
    fn low_signal_file_does_not_escalate() {
        let report = score_file(&profile(), 1, &[], 0.9);
        assert_eq!(report.aggregate, Severity::Low);
        assert!(!report.escalate);
    }

    #[test]
    fn coupling_above_threshold_is_high_and_escalates() {
        let report = score_file(&profile(), 20, &[], 0.9);
        assert_eq!(report.coupling.severity, Severity::High);
        assert_eq!(report.aggregate, Severity::High);
        assert!(report.escalate);
    }

    #[test]
    fn insufficient_data_forces_escalation() {
        let report = score_file(&profile(), 0, &[], 1.0);
        assert!(report.escalate);
        assert!(report.escalation_reasons.iter().any(|r| r.contains("no coupling")));
    }

    #[test]
    fn aggregate_takes_the_worst_signal() {
        let co_change = vec![CoChangeEntry { partner_path: "b.rs".to_string(), cochange_count: 50, frequency: 0.95 }];
        let report = score_file(&profile(), 1, &co_change, 0.9);
        assert_eq!(report.co_change.severity, Severity::High);
        assert_eq!(report.aggregate, Severity::High);
    }
}
