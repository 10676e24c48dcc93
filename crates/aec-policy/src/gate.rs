// gate.rs — The deployment gate decision function.
//
// `evaluate_with_trace` is the single implementation; `evaluate` discards
// the trace. Both are pure: the same input and config always produce the
// same decision.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use aec_lifecycle::ImpactLevel;

use crate::config::GateConfig;

/// Outcome of testing a patch, as seen by the gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub tests_passed: bool,
    /// Warnings raised by the safety validator.
    #[serde(default)]
    pub safety_warnings: Vec<String>,
}

/// Everything the gate looks at.
#[derive(Debug, Clone)]
pub struct GateInput {
    pub impact: ImpactLevel,
    pub affected_features: Vec<String>,
    pub now: DateTime<Utc>,
    /// `None` when the patch has not been tested yet.
    pub validation: Option<ValidationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Deploy now without a human.
    Autonomous,
    /// Deployable without a human, but not before `until`.
    Deferred { until: DateTime<Utc>, reason: String },
    ManualReview { reason: String },
}

impl GateDecision {
    pub fn is_autonomous(&self) -> bool {
        matches!(self, GateDecision::Autonomous)
    }

    pub fn label(&self) -> &'static str {
        match self {
            GateDecision::Autonomous => "autonomous",
            GateDecision::Deferred { .. } => "deferred",
            GateDecision::ManualReview { .. } => "manual_review",
        }
    }

    pub fn reason(&self) -> String {
        match self {
            GateDecision::Autonomous => "eligible for autonomous deployment".to_string(),
            GateDecision::Deferred { reason, .. } | GateDecision::ManualReview { reason } => {
                reason.clone()
            }
        }
    }
}

/// One rule the gate checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateStep {
    pub check: String,
    pub outcome: String,
    pub terminal: bool,
}

/// The decision plus every rule inspected on the way to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateTrace {
    pub decision: GateDecision,
    pub steps: Vec<GateStep>,
}

pub struct DeploymentGate {
    config: GateConfig,
}

impl DeploymentGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn evaluate(&self, input: &GateInput) -> GateDecision {
        self.evaluate_with_trace(input).decision
    }

    pub fn evaluate_with_trace(&self, input: &GateInput) -> GateTrace {
        let mut steps = Vec::new();

        // Rule 1: critical impact
        if input.impact == ImpactLevel::Critical {
            return finish(
                steps,
                "impact_critical",
                GateDecision::ManualReview {
                    reason: "critical impact requires manual review".to_string(),
                },
            );
        }
        pass(&mut steps, "impact_critical", format!("impact is {}", input.impact));

        // Rule 2: sensitive features
        if let Some((feature, keyword)) = self.sensitive_match(&input.affected_features) {
            return finish(
                steps,
                "sensitive_feature",
                GateDecision::ManualReview {
                    reason: format!(
                        "affected feature '{}' matches sensitive keyword '{}'",
                        feature, keyword
                    ),
                },
            );
        }
        pass(
            &mut steps,
            "sensitive_feature",
            format!("{} feature(s) checked", input.affected_features.len()),
        );

        // Rule 3: high impact
        if input.impact == ImpactLevel::High {
            return finish(
                steps,
                "impact_high",
                GateDecision::ManualReview {
                    reason: "high impact requires manual review".to_string(),
                },
            );
        }
        pass(&mut steps, "impact_high", "passed".to_string());

        // Rule 4: validation
        match &input.validation {
            Some(v) if !v.tests_passed => {
                return finish(
                    steps,
                    "validation",
                    GateDecision::ManualReview {
                        reason: "tests did not pass".to_string(),
                    },
                )
            }
            Some(v) if !v.safety_warnings.is_empty() => {
                return finish(
                    steps,
                    "validation",
                    GateDecision::ManualReview {
                        reason: format!(
                            "patch carries {} safety warning(s): {}",
                            v.safety_warnings.len(),
                            v.safety_warnings.join("; ")
                        ),
                    },
                )
            }
            Some(_) => pass(&mut steps, "validation", "tests passed, no warnings".to_string()),
            None => pass(&mut steps, "validation", "not yet validated".to_string()),
        }

        // Rule 5: peak hours
        if self.in_peak_window(input.now) {
            let until = self.next_off_peak(input.now);
            return finish(
                steps,
                "peak_hours",
                GateDecision::Deferred {
                    until,
                    reason: format!(
                        "inside peak hours {:02}:00-{:02}:00; deferred until {}",
                        self.config.peak_start_hour,
                        self.config.peak_end_hour,
                        until.to_rfc3339()
                    ),
                },
            );
        }
        pass(&mut steps, "peak_hours", "off-peak".to_string());

        GateTrace {
            decision: GateDecision::Autonomous,
            steps,
        }
    }

    fn sensitive_match(&self, features: &[String]) -> Option<(String, String)> {
        features.iter().find_map(|feature| {
            let lower = feature.to_lowercase();
            self.config
                .sensitive_keywords
                .iter()
                .find(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
                .map(|k| (feature.clone(), k.clone()))
        })
    }

    fn local(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.naive_utc() + Duration::minutes(self.config.utc_offset_minutes as i64)
    }

    pub fn in_peak_window(&self, now: DateTime<Utc>) -> bool {
        let (start, end) = (self.config.peak_start_hour, self.config.peak_end_hour);
        let hour = self.local(now).hour();
        match start.cmp(&end) {
            std::cmp::Ordering::Less => hour >= start && hour < end,
            std::cmp::Ordering::Greater => hour >= start || hour < end,
            std::cmp::Ordering::Equal => false,
        }
    }

    /// The next moment the peak window ends, in UTC.
    pub fn next_off_peak(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = self.local(now);
        let Some(mut candidate) = local.date().and_hms_opt(self.config.peak_end_hour, 0, 0) else {
            tracing::warn!(
                hour = self.config.peak_end_hour,
                "invalid peak end hour; not deferring"
            );
            return now;
        };
        if candidate <= local {
            candidate += Duration::days(1);
        }
        let utc = candidate - Duration::minutes(self.config.utc_offset_minutes as i64);
        Utc.from_utc_datetime(&utc)
    }
}

fn pass(steps: &mut Vec<GateStep>, check: &str, outcome: String) {
    steps.push(GateStep {
        check: check.to_string(),
        outcome,
        terminal: false,
    });
}

fn finish(mut steps: Vec<GateStep>, check: &str, decision: GateDecision) -> GateTrace {
    steps.push(GateStep {
        check: check.to_string(),
        outcome: format!("{}: {}", decision.label(), decision.reason()),
        terminal: true,
    });
    tracing::debug!(check, decision = decision.label(), "gate decided");
    GateTrace { decision, steps }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 30, 0).unwrap()
    }

    fn input(impact: ImpactLevel, features: &[&str], now: DateTime<Utc>) -> GateInput {
        GateInput {
            impact,
            affected_features: features.iter().map(|s| s.to_string()).collect(),
            now,
            validation: None,
        }
    }

    fn gate() -> DeploymentGate {
        DeploymentGate::new(GateConfig::default())
    }

    #[test]
    fn critical_is_manual_at_any_time() {
        for hour in 0..24 {
            let decision = gate().evaluate(&input(ImpactLevel::Critical, &[], at(hour)));
            assert!(matches!(decision, GateDecision::ManualReview { .. }), "hour {}", hour);
        }
    }

    #[test]
    fn low_off_peak_is_autonomous() {
        let decision = gate().evaluate(&input(ImpactLevel::Low, &[], at(23)));
        assert_eq!(decision, GateDecision::Autonomous);
    }

    #[test]
    fn low_in_peak_is_deferred_until_window_end() {
        let decision = gate().evaluate(&input(ImpactLevel::Low, &[], at(10)));
        match decision {
            GateDecision::Deferred { until, .. } => {
                assert_eq!(until, Utc.with_ymd_and_hms(2026, 3, 10, 20, 0, 0).unwrap());
            }
            other => panic!("expected deferred, got {:?}", other),
        }
    }

    #[test]
    fn sensitive_feature_beats_low_impact() {
        let decision = gate().evaluate(&input(ImpactLevel::Low, &["Patient Triage Queue"], at(23)));
        match decision {
            GateDecision::ManualReview { reason } => assert!(reason.contains("triage")),
            other => panic!("expected manual review, got {:?}", other),
        }
    }

    #[test]
    fn high_is_manual_regardless_of_time() {
        for hour in [3, 12, 22] {
            let decision = gate().evaluate(&input(ImpactLevel::High, &["billing"], at(hour)));
            assert_eq!(
                decision,
                GateDecision::ManualReview {
                    reason: "high impact requires manual review".to_string()
                }
            );
        }
    }

    #[test]
    fn failed_tests_or_warnings_force_review() {
        let mut request = input(ImpactLevel::Medium, &[], at(23));
        request.validation = Some(ValidationResult {
            tests_passed: false,
            safety_warnings: Vec::new(),
        });
        assert!(matches!(gate().evaluate(&request), GateDecision::ManualReview { .. }));

        request.validation = Some(ValidationResult {
            tests_passed: true,
            safety_warnings: vec!["'package.json' is a critical file".to_string()],
        });
        match gate().evaluate(&request) {
            GateDecision::ManualReview { reason } => assert!(reason.contains("package.json")),
            other => panic!("expected manual review, got {:?}", other),
        }

        request.validation = Some(ValidationResult {
            tests_passed: true,
            safety_warnings: Vec::new(),
        });
        assert!(gate().evaluate(&request).is_autonomous());
    }

    #[test]
    fn wrapping_window_defers_to_next_morning() {
        let gate = DeploymentGate::new(GateConfig {
            peak_start_hour: 22,
            peak_end_hour: 6,
            ..GateConfig::default()
        });
        assert!(gate.in_peak_window(at(23)));
        assert!(gate.in_peak_window(at(2)));
        assert!(!gate.in_peak_window(at(12)));
        assert_eq!(
            gate.next_off_peak(at(23)),
            Utc.with_ymd_and_hms(2026, 3, 11, 6, 0, 0).unwrap()
        );
        assert_eq!(
            gate.next_off_peak(at(2)),
            Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn utc_offset_shifts_the_window() {
        // UTC-5: 14:30 UTC is 09:30 local, inside 08-20.
        let gate = DeploymentGate::new(GateConfig {
            utc_offset_minutes: -300,
            ..GateConfig::default()
        });
        assert!(gate.in_peak_window(at(14)));
        assert!(!gate.in_peak_window(at(12)));
        // 20:00 local is 01:00 UTC the next day.
        assert_eq!(
            gate.next_off_peak(at(14)),
            Utc.with_ymd_and_hms(2026, 3, 11, 1, 0, 0).unwrap()
        );
    }

    #[test]
    fn equal_hours_disable_the_window() {
        let gate = DeploymentGate::new(GateConfig {
            peak_start_hour: 9,
            peak_end_hour: 9,
            ..GateConfig::default()
        });
        assert!(gate.evaluate(&input(ImpactLevel::Low, &[], at(9))).is_autonomous());
    }

    #[test]
    fn trace_records_every_rule_until_the_decision() {
        let trace = gate().evaluate_with_trace(&input(ImpactLevel::Medium, &["reports"], at(23)));
        assert_eq!(trace.decision, GateDecision::Autonomous);
        let checks: Vec<&str> = trace.steps.iter().map(|s| s.check.as_str()).collect();
        assert_eq!(
            checks,
            vec!["impact_critical", "sensitive_feature", "impact_high", "validation", "peak_hours"]
        );
        assert!(trace.steps.iter().all(|s| !s.terminal));

        let trace = gate().evaluate_with_trace(&input(ImpactLevel::Critical, &[], at(23)));
        assert_eq!(trace.steps.len(), 1);
        assert!(trace.steps[0].terminal);
    }

    #[test]
    fn same_input_same_decision() {
        let request = input(ImpactLevel::Medium, &["reports"], at(11));
        assert_eq!(gate().evaluate(&request), gate().evaluate(&request));
    }

    #[test]
    fn decision_serializes_with_tag() {
        let json = serde_json::to_string(&GateDecision::ManualReview {
            reason: "x".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"decision\":\"manual_review\""));
    }
}
