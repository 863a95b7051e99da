//! Fix strategy selection for the per-task repair loop.
//!
//! Strategies escalate by attempt number: targeted patches first, then
//! deep analysis, full regeneration, simplification, and finally research.
//! The analyzer can forbid codes it has already seen fail; selection never
//! returns a forbidden code.

use crate::core::types::{FixOutcome, StrategyCode, VerificationResult};

const TABLE_ORDER: [StrategyCode; 5] = [
    StrategyCode::A,
    StrategyCode::B,
    StrategyCode::C,
    StrategyCode::D,
    StrategyCode::E,
];

/// The strategy scheduled for an attempt number (1-indexed).
///
/// Attempts 1–3 → A, 4–5 → B, 6 → C, 7 → D, 8 → E. Attempts past the
/// table (guided-fix rounds) stay at E.
pub fn scheduled_strategy(attempt: u32) -> StrategyCode {
    match attempt {
        0..=3 => StrategyCode::A,
        4..=5 => StrategyCode::B,
        6 => StrategyCode::C,
        7 => StrategyCode::D,
        _ => StrategyCode::E,
    }
}

/// Select the strategy for an attempt, honoring the analyzer's forbid list.
///
/// When the scheduled code is forbidden, selection advances through the
/// table order (wrapping) to the next permitted code. Returns `None` only
/// when every code is forbidden.
pub fn select_strategy(attempt: u32, forbidden: &[StrategyCode]) -> Option<StrategyCode> {
    let scheduled = scheduled_strategy(attempt);
    if !forbidden.contains(&scheduled) {
        return Some(scheduled);
    }
    let start = TABLE_ORDER
        .iter()
        .position(|c| *c == scheduled)
        .expect("scheduled code is in table");
    (1..TABLE_ORDER.len())
        .map(|offset| TABLE_ORDER[(start + offset) % TABLE_ORDER.len()])
        .find(|code| !forbidden.contains(code))
}

/// Classify what a fix attempt did to the verifier outcome.
pub fn classify_outcome(
    previous_summary: &str,
    result: &VerificationResult,
) -> FixOutcome {
    if result.passed {
        return FixOutcome::Fixed;
    }
    if result.failure_summary() == previous_summary {
        FixOutcome::Unchanged
    } else {
        FixOutcome::Regressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Check;

    #[test]
    fn schedule_follows_attempt_bands() {
        assert_eq!(scheduled_strategy(1), StrategyCode::A);
        assert_eq!(scheduled_strategy(3), StrategyCode::A);
        assert_eq!(scheduled_strategy(4), StrategyCode::B);
        assert_eq!(scheduled_strategy(5), StrategyCode::B);
        assert_eq!(scheduled_strategy(6), StrategyCode::C);
        assert_eq!(scheduled_strategy(7), StrategyCode::D);
        assert_eq!(scheduled_strategy(8), StrategyCode::E);
        assert_eq!(scheduled_strategy(11), StrategyCode::E);
    }

    #[test]
    fn forbidden_code_advances_in_table_order() {
        assert_eq!(
            select_strategy(1, &[StrategyCode::A]),
            Some(StrategyCode::B)
        );
        assert_eq!(
            select_strategy(6, &[StrategyCode::C, StrategyCode::D]),
            Some(StrategyCode::E)
        );
        // Wraps past the end of the table.
        assert_eq!(
            select_strategy(8, &[StrategyCode::E]),
            Some(StrategyCode::A)
        );
    }

    #[test]
    fn all_forbidden_yields_none() {
        assert_eq!(select_strategy(2, &TABLE_ORDER), None);
    }

    #[test]
    fn selection_never_returns_forbidden_code() {
        for attempt in 1..=10 {
            for forbidden in [
                vec![StrategyCode::A],
                vec![StrategyCode::A, StrategyCode::B],
                vec![StrategyCode::E, StrategyCode::C],
            ] {
                if let Some(code) = select_strategy(attempt, &forbidden) {
                    assert!(!forbidden.contains(&code), "attempt {attempt}");
                }
            }
        }
    }

    #[test]
    fn outcome_classification() {
        let failing = VerificationResult {
            passed: false,
            checks: vec![Check {
                name: "python-syntax".to_string(),
                passed: false,
                detail: "bad indent".to_string(),
            }],
            structured_errors: Vec::new(),
        };
        let summary = failing.failure_summary();

        assert_eq!(
            classify_outcome(&summary, &VerificationResult::pass()),
            FixOutcome::Fixed
        );
        assert_eq!(classify_outcome(&summary, &failing), FixOutcome::Unchanged);

        let different = VerificationResult {
            passed: false,
            checks: vec![Check {
                name: "python-syntax".to_string(),
                passed: false,
                detail: "name error".to_string(),
            }],
            structured_errors: Vec::new(),
        };
        assert_eq!(
            classify_outcome(&summary, &different),
            FixOutcome::Regressed
        );
    }
}
