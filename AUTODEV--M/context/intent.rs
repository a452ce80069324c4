use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of work a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentCategory {
    /// Build something that does not exist yet.
    Create,
    /// Make existing work better.
    Improve,
    /// Repair a defect.
    Fix,
    /// Make existing work faster or cheaper.
    Optimize,
    /// Investigate before committing to work.
    Explore,
    /// Default housekeeping when nothing else matches.
    Maintain,
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Improve => "improve",
            Self::Fix => "fix",
            Self::Optimize => "optimize",
            Self::Explore => "explore",
            Self::Maintain => "maintain",
        };
        f.write_str(label)
    }
}

/// How quickly a request demands attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    /// No time pressure.
    Low,
    /// Normal queue position.
    Medium,
    /// Ahead of routine work.
    High,
    /// Drop everything.
    Critical,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Breadth of the change a request implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestScope {
    /// One capability.
    Feature,
    /// The whole deliverable.
    Project,
    /// Structural foundations.
    Architecture,
    /// Speed and resource behavior.
    Performance,
}

impl fmt::Display for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Feature => "feature",
            Self::Project => "project",
            Self::Architecture => "architecture",
            Self::Performance => "performance",
        };
        f.write_str(label)
    }
}

/// Structured reading of one free-text request; immutable once classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Work category.
    pub category: IntentCategory,
    /// Domain tag, `general` when nothing matched.
    pub domain: String,
    /// Attention tier.
    pub urgency: Urgency,
    /// Change breadth.
    pub scope: RequestScope,
    /// Up to ten case-folded tokens longer than three characters, in request order.
    pub keywords: Vec<String>,
}

// Category rules are checked in this order; the first hit wins. Fix sits
// ahead of the rest so defect reports never reclassify as new work.
const CATEGORY_RULES: &[(IntentCategory, &[&str])] = &[
    (
        IntentCategory::Fix,
        &["fix", "bug", "error", "issue", "problem", "broken"],
    ),
    (
        IntentCategory::Optimize,
        &["optimize", "performance", "speed", "efficient", "fast"],
    ),
    (
        IntentCategory::Improve,
        &["improve", "enhance", "better", "upgrade", "refactor"],
    ),
    (
        IntentCategory::Explore,
        &["explore", "research", "investigate", "analyze", "study"],
    ),
    (
        IntentCategory::Create,
        &["build", "create", "new", "develop", "make"],
    ),
];

const CRITICAL_URGENCY: &[&str] = &["urgent", "asap", "immediately", "critical", "emergency"];
const HIGH_URGENCY: &[&str] = &["soon", "important", "priority", "needed"];

// Domain tags match whole tokens; short tags like `ui` and `ai` would
// otherwise hit inside words such as `build` and `maintain`.
const DOMAIN_TAGS: &[&str] = &[
    "web", "mobile", "api", "database", "ui", "backend", "frontend", "ai", "ml",
];

const ARCHITECTURE_SCOPE: &[&str] = &["architecture", "system", "infrastructure"];
const PERFORMANCE_SCOPE: &[&str] = &["performance", "speed", "memory"];
const PROJECT_SCOPE: &[&str] = &["project", "application", "entire"];

const KEYWORD_MIN_CHARS: usize = 3;
const KEYWORD_LIMIT: usize = 10;

/// Ordered keyword-rule classifier; any input resolves to a default intent.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntentClassifier;

impl IntentClassifier {
    /// Stateless classifier handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Reads one free-text request into an [`Intent`].
    #[must_use]
    pub fn classify(&self, request: &str) -> Intent {
        let folded = request.to_lowercase();
        Intent {
            category: category_of(&folded),
            domain: domain_of(&folded),
            urgency: urgency_of(&folded),
            scope: scope_of(&folded),
            keywords: keywords_of(&folded),
        }
    }
}

fn category_of(folded: &str) -> IntentCategory {
    CATEGORY_RULES
        .iter()
        .find(|(_, words)| contains_any(folded, words))
        .map_or(IntentCategory::Maintain, |(category, _)| *category)
}

fn urgency_of(folded: &str) -> Urgency {
    if contains_any(folded, CRITICAL_URGENCY) {
        Urgency::Critical
    } else if contains_any(folded, HIGH_URGENCY) {
        Urgency::High
    } else {
        Urgency::Medium
    }
}

fn domain_of(folded: &str) -> String {
    let tokens: Vec<&str> = folded
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .collect();
    DOMAIN_TAGS
        .iter()
        .find(|tag| tokens.iter().any(|token| token == *tag))
        .map_or_else(|| "general".to_owned(), |tag| (*tag).to_owned())
}

fn scope_of(folded: &str) -> RequestScope {
    if contains_any(folded, ARCHITECTURE_SCOPE) {
        RequestScope::Architecture
    } else if contains_any(folded, PERFORMANCE_SCOPE) {
        RequestScope::Performance
    } else if contains_any(folded, PROJECT_SCOPE) {
        RequestScope::Project
    } else {
        RequestScope::Feature
    }
}

fn keywords_of(folded: &str) -> Vec<String> {
    folded
        .split_whitespace()
        .filter(|token| token.chars().count() > KEYWORD_MIN_CHARS)
        .take(KEYWORD_LIMIT)
        .map(str::to_owned)
        .collect()
}

fn contains_any(folded: &str, words: &[&str]) -> bool {
    words.iter().any(|word| folded.contains(word))
}
