// src/enrich/policy.rs
//! Error-page fingerprints checked against translated text.
//!
//! Rules are evaluated in order; the first match wins. Patterns are
//! case-insensitive regexes and cover both the source and target language,
//! because a scraped interstitial may survive translation untouched.

use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub name: String,
    pattern: Regex,
}

impl PolicyRule {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            name: name.into(),
            pattern,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

const DEFAULT_RULES: &[(&str, &str)] = &[
    (
        "loading-error",
        r"error (?:while )?loading (?:this |the )?(?:page|content|post|article)|failed to load (?:this |the )?(?:page|content|post)|ошибка (?:при )?загрузке (?:страницы|контента|статьи)",
    ),
    (
        "refresh-notice",
        r"please refresh the page|try refreshing the page|обновите страницу",
    ),
    (
        "auth-wall",
        r"you (?:are|were) not authori[sz]ed to (?:view|access|see)|(?:sign|log) in to (?:continue|keep reading|read (?:this|the full))|войдите,? чтобы (?:продолжить|прочитать|читать)|авторизуйтесь,? чтобы",
    ),
    (
        "paywall",
        r"subscribe to (?:continue|keep) reading|this post is for paid subscribers|подпишитесь,? чтобы (?:продолжить|читать)",
    ),
    (
        "bot-check",
        r"enable javascript and cookies|verify you are (?:a )?human|включите javascript",
    ),
];

#[derive(Debug, Clone)]
pub struct ContentPolicy {
    rules: Vec<PolicyRule>,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .map(|(name, pat)| PolicyRule::new(*name, pat).expect("default policy regex"))
            .collect();
        Self { rules }
    }
}

impl ContentPolicy {
    /// Defaults followed by operator-supplied patterns (`custom-1`, `custom-2`, ...).
    pub fn with_extra_patterns(extra: &[String]) -> Result<Self, regex::Error> {
        let mut policy = Self::default();
        for (i, pat) in extra.iter().filter(|p| !p.trim().is_empty()).enumerate() {
            policy.push(PolicyRule::new(format!("custom-{}", i + 1), pat.trim())?);
        }
        Ok(policy)
    }

    pub fn push(&mut self, rule: PolicyRule) {
        self.rules.push(rule);
    }

    pub fn check(&self, text: &str) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| r.is_match(text))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
