//! Keyword classification of requests into (complexity, size).
//!
//! Phase A scores three disjoint signal sets over the prompt; phase B (an
//! LLM call made by the engine when a model is available) produces one of
//! the nine `{heavy,medium,simple}/{small,medium,large}` labels. Fusion
//! takes the higher signal per axis, erring toward more resources, and
//! folds in the workspace file count on the size axis.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::core::types::{Complexity, SizeClass};

/// A fused classification for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub complexity: Complexity,
    pub size: SizeClass,
}

impl Classification {
    pub fn label(self) -> String {
        format!("{}/{}", self.complexity.as_str(), self.size.as_str())
    }
}

/// App-clone shapes: "like tinder", "uber for X", "a spotify".
static CLONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:like|a|an)\s+(?:tinder|uber|spotify|airbnb|netflix|instagram|twitter|amazon)\b|\b(?:tinder|uber|spotify|airbnb|netflix|instagram)\s+for\s+\w+",
    )
    .expect("clone regex")
});

/// Tie-break toward building: these multiply matched weights by 1.5.
static BUILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:build|create|scaffold)\b|\bmake\s+(?:me|a|an)\b").expect("build regex")
});

const HEAVY_TOKENS: [&str; 9] = [
    "social network",
    "marketplace",
    "dating app",
    "matching system",
    "recommendation engine",
    "booking",
    "saas",
    "fintech",
    "e-commerce",
];

const MEDIUM_TOKENS: [&str; 9] = [
    "web app",
    "mobile app",
    "game",
    "analytics",
    "profile",
    "search",
    "forum",
    "dashboard",
    "blog",
];

const SIMPLE_TOKENS: [&str; 6] = [
    "simple",
    "basic",
    "calculator",
    "todo",
    "landing page",
    "script",
];

const BUILD_MULTIPLIER: f32 = 1.5;

/// Raw keyword scores for one prompt.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SignalScores {
    pub heavy: f32,
    pub medium: f32,
    pub simple: f32,
    pub build_intent: bool,
}

impl SignalScores {
    pub fn is_empty(&self) -> bool {
        self.heavy == 0.0 && self.medium == 0.0 && self.simple == 0.0
    }
}

/// Score the three disjoint signal sets over a lowercased prompt.
pub fn score_signals(prompt: &str) -> SignalScores {
    let lower = prompt.to_lowercase();
    let mut scores = SignalScores {
        build_intent: BUILD_RE.is_match(&lower),
        ..SignalScores::default()
    };

    scores.heavy += CLONE_RE.find_iter(&lower).count() as f32;
    scores.heavy += count_tokens(&lower, &HEAVY_TOKENS);
    scores.medium += count_tokens(&lower, &MEDIUM_TOKENS);
    scores.simple += count_tokens(&lower, &SIMPLE_TOKENS);

    if scores.build_intent {
        scores.heavy *= BUILD_MULTIPLIER;
        scores.medium *= BUILD_MULTIPLIER;
        scores.simple *= BUILD_MULTIPLIER;
    }
    scores
}

fn count_tokens(lower: &str, tokens: &[&str]) -> f32 {
    tokens.iter().filter(|t| lower.contains(*t)).count() as f32
}

/// Phase A: keyword classification. `None` when the prompt has no signals.
pub fn phase_a(prompt: &str) -> Option<Classification> {
    let scores = score_signals(prompt);
    if scores.is_empty() {
        return None;
    }
    // Ties go to the heavier class: over-provisioning is recoverable,
    // under-provisioning is not.
    let complexity = if scores.heavy >= scores.medium && scores.heavy >= scores.simple {
        Complexity::Heavy
    } else if scores.medium >= scores.simple {
        Complexity::Medium
    } else {
        Complexity::Simple
    };
    let size = match complexity {
        Complexity::Heavy => SizeClass::Large,
        Complexity::Medium => SizeClass::Medium,
        Complexity::Simple => SizeClass::Small,
    };
    Some(Classification { complexity, size })
}

/// Map workspace file count onto the size axis.
pub fn workspace_size(file_count: usize) -> SizeClass {
    match file_count {
        0..=3 => SizeClass::Small,
        4..=10 => SizeClass::Medium,
        _ => SizeClass::Large,
    }
}

/// Parse a phase-B label out of model output. Accepts any of the nine
/// `complexity/size` labels anywhere in the text; first hit wins.
pub fn parse_label(text: &str) -> Option<Classification> {
    static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(heavy|medium|simple)\s*/\s*(small|medium|large)\b")
            .expect("label regex")
    });
    let caps = LABEL_RE.captures(text)?;
    let complexity = match caps[1].to_lowercase().as_str() {
        "heavy" => Complexity::Heavy,
        "simple" => Complexity::Simple,
        _ => Complexity::Medium,
    };
    let size = match caps[2].to_lowercase().as_str() {
        "small" => SizeClass::Small,
        "large" => SizeClass::Large,
        _ => SizeClass::Medium,
    };
    Some(Classification { complexity, size })
}

/// Fuse phase A, an optional phase-B label, and the workspace file count.
///
/// The higher signal wins per axis. With no signals at all the default is
/// `medium/medium`, never `simple/small`.
pub fn fuse(
    prompt: &str,
    phase_b: Option<Classification>,
    workspace_file_count: usize,
) -> Classification {
    let a = phase_a(prompt);
    if a.is_none() && phase_b.is_none() {
        debug!("no classification signals, defaulting to medium/medium");
        return Classification {
            complexity: Complexity::Medium,
            size: SizeClass::Medium,
        };
    }

    let complexity = [a.map(|c| c.complexity), phase_b.map(|c| c.complexity)]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(Complexity::Medium);
    let size = [
        a.map(|c| c.size),
        phase_b.map(|c| c.size),
        Some(workspace_size(workspace_file_count)),
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or(SizeClass::Medium);

    let fused = Classification { complexity, size };
    debug!(label = %fused.label(), "classified request");
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tinder_clone_prompt_is_heavy_large() {
        let fused = fuse("build a tinder for linkedin", None, 0);
        assert_eq!(fused.complexity, Complexity::Heavy);
        assert_eq!(fused.size, SizeClass::Large);
    }

    #[test]
    fn empty_prompt_empty_workspace_defaults_to_medium() {
        let fused = fuse("", None, 0);
        assert_eq!(fused.complexity, Complexity::Medium);
        assert_eq!(fused.size, SizeClass::Medium);
    }

    #[test]
    fn simple_signal_yields_simple_small() {
        let fused = fuse("a simple calculator", None, 0);
        assert_eq!(fused.complexity, Complexity::Simple);
        assert_eq!(fused.size, SizeClass::Small);
    }

    #[test]
    fn build_intent_multiplies_scores() {
        let plain = score_signals("a web app with search");
        let built = score_signals("build a web app with search");
        assert!(built.medium > plain.medium);
        assert!(built.build_intent);
    }

    #[test]
    fn workspace_count_raises_size_only() {
        let fused = fuse("a simple todo", None, 12);
        assert_eq!(fused.complexity, Complexity::Simple);
        assert_eq!(fused.size, SizeClass::Large);
    }

    #[test]
    fn workspace_bucket_boundaries() {
        assert_eq!(workspace_size(0), SizeClass::Small);
        assert_eq!(workspace_size(3), SizeClass::Small);
        assert_eq!(workspace_size(4), SizeClass::Medium);
        assert_eq!(workspace_size(10), SizeClass::Medium);
        assert_eq!(workspace_size(11), SizeClass::Large);
    }

    #[test]
    fn phase_b_raises_but_never_lowers() {
        let b = Classification {
            complexity: Complexity::Heavy,
            size: SizeClass::Small,
        };
        let fused = fuse("a web app", Some(b), 0);
        assert_eq!(fused.complexity, Complexity::Heavy);
        // Phase A said medium size; the higher axis value wins.
        assert_eq!(fused.size, SizeClass::Medium);
    }

    #[test]
    fn label_parses_from_surrounding_text() {
        let parsed = parse_label("Classification: heavy/large because ...").expect("label");
        assert_eq!(parsed.complexity, Complexity::Heavy);
        assert_eq!(parsed.size, SizeClass::Large);
        assert!(parse_label("no label here").is_none());
    }

    #[test]
    fn marketplace_domain_token_scores_heavy() {
        let fused = fuse("create a marketplace for vintage bikes", None, 0);
        assert_eq!(fused.complexity, Complexity::Heavy);
        assert_eq!(fused.size, SizeClass::Large);
    }
}
