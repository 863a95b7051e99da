//! Model registry and routing.
//!
//! A static registry describes every model the engine knows how to use.
//! Routing maps (role, complexity, size) to an ordered preference list and
//! resolves it against the server's installed-model list, degrading one
//! complexity tier at a time, then one size tier, before falling back to
//! same-category and finally general models.
//!
//! Matching is exact on the full model name including the quantization
//! tag: `foo:70b` never resolves against an installed `foo:14b`.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::types::{Complexity, Role, SizeClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelCategory {
    Coding,
    Reasoning,
    Agentic,
    Summarizer,
    Embedding,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Small,
    Medium,
    Large,
}

/// Stable identity of one model the engine can route to. Defined at
/// startup from the static registry; never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub category: ModelCategory,
    pub tier: ModelTier,
    /// Higher wins within a category when falling back.
    pub priority: i32,
    /// Emits `<think>…</think>` spans that must be stripped.
    pub supports_reasoning_trace: bool,
    /// Declared default context window, scaled by project size at call time.
    pub context_window: u32,
}

fn spec(
    name: &str,
    category: ModelCategory,
    tier: ModelTier,
    priority: i32,
    supports_reasoning_trace: bool,
    context_window: u32,
) -> ModelSpec {
    ModelSpec {
        name: name.to_string(),
        category,
        tier,
        priority,
        supports_reasoning_trace,
        context_window,
    }
}

static REGISTRY: LazyLock<Vec<ModelSpec>> = LazyLock::new(|| {
    use ModelCategory::*;
    use ModelTier::*;
    vec![
        // Coding
        spec("qwen2.5-coder:3b", Coding, Small, 10, false, 8_192),
        spec("qwen2.5-coder:7b", Coding, Medium, 20, false, 16_384),
        spec("qwen2.5-coder:14b", Coding, Medium, 30, false, 16_384),
        spec("qwen2.5-coder:32b", Coding, Large, 40, false, 16_384),
        // Reasoning
        spec("deepseek-r1:7b", Reasoning, Small, 10, true, 16_384),
        spec("deepseek-r1:14b", Reasoning, Medium, 20, true, 16_384),
        spec("deepseek-r1:32b", Reasoning, Large, 30, true, 16_384),
        // Agentic
        spec("qwen2.5:7b", Agentic, Small, 10, false, 16_384),
        spec("qwen2.5:14b", Agentic, Medium, 20, false, 16_384),
        // Summarizer
        spec("llama3.2:3b", Summarizer, Small, 10, false, 8_192),
        // Embedding
        spec("all-minilm", Embedding, Small, 10, false, 512),
        spec("nomic-embed-text", Embedding, Small, 20, false, 2_048),
        // General
        spec("llama3.2:3b", General, Small, 10, false, 8_192),
        spec("llama3.1:8b", General, Medium, 20, false, 16_384),
    ]
});

/// Fixed preference order for the classifier's phase-B call: smallest
/// usable chat models first.
const FASTEST_PREFERENCE: [&str; 5] = [
    "llama3.2:3b",
    "qwen2.5:7b",
    "llama3.1:8b",
    "qwen2.5-coder:7b",
    "qwen2.5-coder:14b",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("no installed model can serve role '{role}'")]
    ModelUnavailable { role: String },
}

impl Role {
    pub fn category(self) -> ModelCategory {
        match self {
            Role::Planner | Role::Analyzer => ModelCategory::Reasoning,
            Role::Coder | Role::Reviewer => ModelCategory::Coding,
            Role::Agentic => ModelCategory::Agentic,
            Role::Chat => ModelCategory::General,
        }
    }
}

/// Resolves roles to concrete installed models.
#[derive(Debug, Clone, Default)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    pub fn registry(&self) -> &'static [ModelSpec] {
        &REGISTRY
    }

    /// Resolve a role to an installed model for this classification.
    ///
    /// Walks the preference table, degrading complexity then size; falls
    /// back to the highest-priority installed model of the role's
    /// category, then to any general model.
    pub fn resolve(
        &self,
        role: Role,
        complexity: Complexity,
        size: SizeClass,
        installed: &[String],
    ) -> Result<&ModelSpec, RouteError> {
        let mut size_step = Some(size);
        while let Some(s) = size_step {
            let mut complexity_step = Some(complexity);
            while let Some(c) = complexity_step {
                for name in preferred_models(role, c, s) {
                    if let Some(found) = self.installed_spec(name, installed) {
                        debug!(role = role.as_str(), model = %found.name, "route resolved");
                        return Ok(found);
                    }
                }
                complexity_step = c.degrade();
            }
            size_step = s.degrade();
        }

        if let Some(found) = self.best_of_category(role.category(), installed) {
            debug!(role = role.as_str(), model = %found.name, "category fallback");
            return Ok(found);
        }
        if let Some(found) = self.best_of_category(ModelCategory::General, installed) {
            debug!(role = role.as_str(), model = %found.name, "general fallback");
            return Ok(found);
        }
        Err(RouteError::ModelUnavailable {
            role: role.as_str().to_string(),
        })
    }

    /// The preferred-but-missing models for an interactive pull offer.
    pub fn missing_preferred(
        &self,
        role: Role,
        complexity: Complexity,
        size: SizeClass,
        installed: &[String],
    ) -> Vec<String> {
        preferred_models(role, complexity, size)
            .iter()
            .filter(|name| !installed.iter().any(|i| i == *name))
            .map(|name| name.to_string())
            .collect()
    }

    /// Fastest installed chat model, for the classifier's phase-B call.
    pub fn fastest_available(&self, installed: &[String]) -> Option<&ModelSpec> {
        FASTEST_PREFERENCE
            .iter()
            .find_map(|name| self.installed_spec(name, installed))
    }

    /// Highest-priority installed embedding model, if any.
    pub fn embedding_model(&self, installed: &[String]) -> Option<&ModelSpec> {
        self.best_of_category(ModelCategory::Embedding, installed)
    }

    fn installed_spec(&self, name: &str, installed: &[String]) -> Option<&ModelSpec> {
        if !installed.iter().any(|i| i == name) {
            return None;
        }
        REGISTRY.iter().find(|m| m.name == name)
    }

    fn best_of_category(
        &self,
        category: ModelCategory,
        installed: &[String],
    ) -> Option<&ModelSpec> {
        REGISTRY
            .iter()
            .filter(|m| m.category == category)
            .filter(|m| installed.iter().any(|i| *i == m.name))
            .max_by_key(|m| m.priority)
    }
}

/// The two-level preference table: (complexity, size) → per-role models.
fn preferred_models(role: Role, complexity: Complexity, size: SizeClass) -> &'static [&'static str] {
    use Complexity::*;
    use SizeClass::*;
    match role.category() {
        ModelCategory::Coding => match (complexity, size) {
            (Heavy, Large) => &["qwen2.5-coder:32b", "qwen2.5-coder:14b"],
            (Heavy, _) | (Complexity::Medium, Large) => &["qwen2.5-coder:14b", "qwen2.5-coder:7b"],
            (Complexity::Medium, _) => &["qwen2.5-coder:14b", "qwen2.5-coder:7b"],
            (Simple, Small) => &["qwen2.5-coder:7b", "qwen2.5-coder:3b"],
            (Simple, _) => &["qwen2.5-coder:7b"],
        },
        ModelCategory::Reasoning => match (complexity, size) {
            (Heavy, Large) => &["deepseek-r1:32b", "deepseek-r1:14b"],
            (Heavy, _) | (Complexity::Medium, Large) => &["deepseek-r1:14b", "deepseek-r1:7b"],
            (Complexity::Medium, _) => &["deepseek-r1:14b", "deepseek-r1:7b"],
            (Simple, _) => &["deepseek-r1:7b"],
        },
        ModelCategory::Agentic => match complexity {
            Heavy => &["qwen2.5:14b", "qwen2.5:7b"],
            Complexity::Medium => &["qwen2.5:14b", "qwen2.5:7b"],
            Simple => &["qwen2.5:7b"],
        },
        ModelCategory::Summarizer => &["llama3.2:3b"],
        ModelCategory::Embedding => &["nomic-embed-text", "all-minilm"],
        ModelCategory::General => match size {
            Large | SizeClass::Medium => &["llama3.1:8b", "llama3.2:3b"],
            Small => &["llama3.2:3b", "llama3.1:8b"],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolves_top_preference_when_installed() {
        let router = Router::new();
        let spec = router
            .resolve(
                Role::Coder,
                Complexity::Heavy,
                SizeClass::Large,
                &installed(&["qwen2.5-coder:32b", "qwen2.5-coder:14b"]),
            )
            .expect("resolve");
        assert_eq!(spec.name, "qwen2.5-coder:32b");
    }

    #[test]
    fn degrades_complexity_before_size() {
        let router = Router::new();
        let spec = router
            .resolve(
                Role::Coder,
                Complexity::Heavy,
                SizeClass::Large,
                &installed(&["qwen2.5-coder:14b"]),
            )
            .expect("resolve");
        assert_eq!(spec.name, "qwen2.5-coder:14b");
    }

    #[test]
    fn quantization_tags_never_cross_match() {
        let router = Router::new();
        // Only the 7b coder is installed; a request preferring 32b must
        // land on the literal 7b entry, not a fuzzy prefix match.
        let spec = router
            .resolve(
                Role::Coder,
                Complexity::Heavy,
                SizeClass::Large,
                &installed(&["qwen2.5-coder:7b"]),
            )
            .expect("resolve");
        assert_eq!(spec.name, "qwen2.5-coder:7b");
    }

    #[test]
    fn falls_back_to_category_then_general() {
        let router = Router::new();
        // No reasoning model installed: planner falls through to general.
        let spec = router
            .resolve(
                Role::Planner,
                Complexity::Medium,
                SizeClass::Medium,
                &installed(&["llama3.1:8b"]),
            )
            .expect("resolve");
        assert_eq!(spec.category, ModelCategory::General);
        assert_eq!(spec.name, "llama3.1:8b");
    }

    #[test]
    fn nothing_installed_is_model_unavailable() {
        let router = Router::new();
        let err = router
            .resolve(Role::Coder, Complexity::Simple, SizeClass::Small, &[])
            .expect_err("unavailable");
        assert_eq!(
            err,
            RouteError::ModelUnavailable {
                role: "coder".to_string()
            }
        );
    }

    #[test]
    fn fastest_available_follows_fixed_preference() {
        let router = Router::new();
        let spec = router
            .fastest_available(&installed(&["qwen2.5-coder:14b", "llama3.1:8b"]))
            .expect("fastest");
        assert_eq!(spec.name, "llama3.1:8b");
        assert!(router.fastest_available(&[]).is_none());
    }

    #[test]
    fn embedding_model_prefers_higher_priority() {
        let router = Router::new();
        let spec = router
            .embedding_model(&installed(&["all-minilm", "nomic-embed-text"]))
            .expect("embedding");
        assert_eq!(spec.name, "nomic-embed-text");
    }

    #[test]
    fn missing_preferred_lists_pull_candidates() {
        let router = Router::new();
        let missing = router.missing_preferred(
            Role::Coder,
            Complexity::Heavy,
            SizeClass::Large,
            &installed(&["qwen2.5-coder:14b"]),
        );
        assert_eq!(missing, vec!["qwen2.5-coder:32b".to_string()]);
    }

    #[test]
    fn reasoning_models_carry_trace_flag() {
        let router = Router::new();
        let spec = router
            .resolve(
                Role::Analyzer,
                Complexity::Medium,
                SizeClass::Medium,
                &installed(&["deepseek-r1:14b"]),
            )
            .expect("resolve");
        assert!(spec.supports_reasoning_trace);
    }
}
