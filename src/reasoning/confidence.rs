//! Confidence scoring for a finished reasoning run

use crate::models::StopReason;

const FINAL_VALIDATION_PENALTY: f32 = 0.3;
const VALIDATION_ROUND_PENALTY: f32 = 0.05;
const VALIDATION_ROUND_CAP: f32 = 0.2;
const TOOL_FAILURE_WEIGHT: f32 = 0.3;
const BUDGET_EXHAUSTED_PENALTY: f32 = 0.25;
const PENDING_CONFIRMATION_PENALTY: f32 = 0.1;
const TIMEOUT_PENALTY: f32 = 0.1;
const TIMEOUT_CAP: f32 = 0.3;

/// Everything the score depends on
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceSignals {
    /// Outcome of the last validation before answering; `true` if none ran
    pub final_validation_passed: bool,
    pub failed_validation_rounds: u32,
    pub tool_calls: usize,
    pub failed_tool_calls: usize,
    pub timed_out_steps: u32,
    pub stop_reason: Option<StopReason>,
}

/// 1.0 for a natural stop with clean validation and no tool failures,
/// lower for anything else. Always within [0, 1].
pub fn score(signals: &ConfidenceSignals) -> f32 {
    let mut confidence = 1.0f32;

    if !signals.final_validation_passed {
        confidence -= FINAL_VALIDATION_PENALTY;
    }

    confidence -=
        (signals.failed_validation_rounds as f32 * VALIDATION_ROUND_PENALTY).min(VALIDATION_ROUND_CAP);

    if signals.tool_calls > 0 {
        let failure_rate = signals.failed_tool_calls.min(signals.tool_calls) as f32
            / signals.tool_calls as f32;
        confidence -= TOOL_FAILURE_WEIGHT * failure_rate;
    }

    confidence -= (signals.timed_out_steps as f32 * TIMEOUT_PENALTY).min(TIMEOUT_CAP);

    match signals.stop_reason {
        Some(StopReason::BudgetExhausted) => confidence -= BUDGET_EXHAUSTED_PENALTY,
        Some(StopReason::PendingConfirmation) => confidence -= PENDING_CONFIRMATION_PENALTY,
        Some(StopReason::Sufficient) | None => {}
    }

    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean() -> ConfidenceSignals {
        ConfidenceSignals {
            final_validation_passed: true,
            stop_reason: Some(StopReason::Sufficient),
            ..Default::default()
        }
    }

    #[test]
    fn test_natural_clean_run_is_fully_confident() {
        assert_eq!(score(&clean()), 1.0);
    }

    #[test]
    fn test_tool_failures_lower_confidence() {
        let with_failure = ConfidenceSignals {
            tool_calls: 2,
            failed_tool_calls: 1,
            ..clean()
        };
        assert!(score(&with_failure) < score(&clean()));
    }

    #[test]
    fn test_budget_and_validation_penalties() {
        let exhausted = ConfidenceSignals {
            stop_reason: Some(StopReason::BudgetExhausted),
            ..clean()
        };
        let invalid = ConfidenceSignals {
            final_validation_passed: false,
            failed_validation_rounds: 1,
            ..clean()
        };
        assert!(score(&exhausted) < 1.0);
        assert!(score(&invalid) < score(&exhausted));
    }

    #[test]
    fn test_always_clamped() {
        let worst = ConfidenceSignals {
            final_validation_passed: false,
            failed_validation_rounds: 100,
            tool_calls: 10,
            failed_tool_calls: 50,
            timed_out_steps: 100,
            stop_reason: Some(StopReason::BudgetExhausted),
        };
        let s = score(&worst);
        assert!((0.0..=1.0).contains(&s));
        assert_eq!(s, 0.0);
    }
}
