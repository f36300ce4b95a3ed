//! Regex search/replace rules for outgoing and incoming lines
//!
//! Rules are configured as text, one `"search","replace"` pair per line. A
//! literal `\n` between two rules separates them too. A replacement may
//! contain `\n` to turn one line into several.

use super::{PipelineStage, StageContext, Upstream};
use printlink_core::{keys, PipelineError};
use regex::Regex;
use std::collections::VecDeque;

/// Compiled rules, applied in order
#[derive(Debug, Clone, Default)]
pub struct RegexRules {
    rules: Vec<(Regex, String)>,
}

impl RegexRules {
    /// Parse and compile rule text
    pub fn parse(text: &str) -> Result<Self, PipelineError> {
        let normalized = text.replace("\"\\n\"", "\"\n\"");
        let mut rules = Vec::new();
        for rule in normalized.lines().map(str::trim).filter(|r| !r.is_empty()) {
            let (search, replace) = split_rule(rule).ok_or_else(|| PipelineError::InvalidRegexRule {
                rule: rule.to_string(),
                reason: "expected \"search\",\"replace\"".to_string(),
            })?;
            let regex = Regex::new(search).map_err(|e| PipelineError::InvalidRegexRule {
                rule: rule.to_string(),
                reason: e.to_string(),
            })?;
            rules.push((regex, replace.replace("\\n", "\n")));
        }
        Ok(Self { rules })
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule, returning the resulting lines
    pub fn apply(&self, line: &str) -> Vec<String> {
        if self.rules.is_empty() {
            return vec![line.to_string()];
        }
        let mut text = line.to_string();
        for (regex, replacement) in &self.rules {
            text = regex.replace_all(&text, replacement.as_str()).into_owned();
        }
        text.split('\n').map(|l| l.trim().to_string()).collect()
    }
}

fn split_rule(rule: &str) -> Option<(&str, &str)> {
    let inner = rule.strip_prefix('"')?.strip_suffix('"')?;
    let separator = inner.find("\",")?;
    let search = &inner[..separator];
    let replace = inner[separator + 2..].trim_start().strip_prefix('"')?;
    Some((search, replace))
}

/// Rules recompiled only when their configuration text changes
#[derive(Debug, Default)]
pub struct RuleCache {
    config: Option<String>,
    rules: RegexRules,
}

impl RuleCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules for the given configuration text
    pub fn rules(&mut self, config: &str) -> &RegexRules {
        if self.config.as_deref() != Some(config) {
            self.rules = match RegexRules::parse(config) {
                Ok(rules) => rules,
                Err(e) => {
                    tracing::warn!("Ignoring regex rules: {}", e);
                    RegexRules::default()
                }
            };
            self.config = Some(config.to_string());
        }
        &self.rules
    }
}

/// Applies the write regex rules to the final text
#[derive(Debug, Default)]
pub struct WriteRegexStage {
    cache: RuleCache,
    pending: VecDeque<String>,
}

impl WriteRegexStage {
    /// Create a stage with no rules compiled yet
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineStage for WriteRegexStage {
    fn name(&self) -> &'static str {
        "write_regex"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        if let Some(line) = self.pending.pop_front() {
            return Some(line);
        }
        let line = upstream.next_line(ctx)?;
        if line.is_empty() {
            return Some(line);
        }
        let config = ctx.settings.get_string(keys::WRITE_REGEX);
        let mut lines = self.cache.rules(&config).apply(&line).into_iter();
        let first = lines.next().unwrap_or_default();
        self.pending.extend(lines);
        Some(first)
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_apply() {
        let rules = RegexRules::parse("\"^G28\",\"G28 X0 Y0\"\n\"M106 S255\",\"M106 S200\"").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.apply("G28"), vec!["G28 X0 Y0"]);
        assert_eq!(rules.apply("M106 S255"), vec!["M106 S200"]);
        assert_eq!(rules.apply("G1 X1"), vec!["G1 X1"]);
    }

    #[test]
    fn test_literal_newline_separators_and_multi_line_replacement() {
        let rules = RegexRules::parse(r#""^M84","M104 S0\nM84"\n"^G4 P(\d+)","G4 S1""#).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.apply("M84"), vec!["M104 S0", "M84"]);
        assert_eq!(rules.apply("G4 P500"), vec!["G4 S1"]);
    }

    #[test]
    fn test_capture_groups() {
        let rules = RegexRules::parse(r#""^T(\d)","M6 T$1""#).unwrap();
        assert_eq!(rules.apply("T1"), vec!["M6 T1"]);
    }

    #[test]
    fn test_invalid_rules() {
        assert!(matches!(
            RegexRules::parse("\"(\",\"x\""),
            Err(PipelineError::InvalidRegexRule { .. })
        ));
        assert!(RegexRules::parse("G28").is_err());
        assert!(RegexRules::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_cache_recompiles_on_change() {
        let mut cache = RuleCache::new();
        assert_eq!(cache.rules("\"a\",\"b\"").apply("a"), vec!["b"]);
        assert_eq!(cache.rules("\"a\",\"c\"").apply("a"), vec!["c"]);
        assert_eq!(cache.rules("(bad").apply("a"), vec!["a"]);
    }
}
