//! Mutation rules and their predicates
//!
//! A [`Rule`] is the compiled, immutable form of a [`RuleConfig`]: regular
//! expressions are built once when the configuration is applied, so matching a
//! request never compiles anything.

use crate::codec::CodecOp;
use crate::error::{MutatorError, MutatorResult, PatternTarget};
use crate::random::{RandomType, RandomValueGenerator};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a rule's pattern is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    /// Exact, case-sensitive parameter name
    #[default]
    Literal,
    /// Regular expression that must match the whole parameter name
    Regex,
    /// Names a `{$name$}` placeholder; never matches parameters
    Substitute,
}

/// What gets inserted into a matched value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationMode {
    #[default]
    Random,
    String,
}

/// Where the insertion goes relative to the existing value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Position {
    Prefix,
    #[default]
    Suffix,
}

/// Optional restriction of a rule to certain request paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathFilterConfig {
    pub enabled: bool,
    pub pattern: String,
    pub is_regex: bool,
}

/// Plain description of a rule, as written in a settings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub pattern: String,
    pub pattern_type: PatternType,
    pub path_filter: PathFilterConfig,
    pub mutation_mode: MutationMode,
    pub random_type: RandomType,
    /// Values of zero or less are treated as one
    pub length: i32,
    pub literal_text: Option<String>,
    pub position: Position,
    pub decode_chain: Vec<CodecOp>,
    pub encode_chain: Vec<CodecOp>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            pattern_type: PatternType::Literal,
            path_filter: PathFilterConfig::default(),
            mutation_mode: MutationMode::Random,
            random_type: RandomType::Alphanumeric,
            length: 4,
            literal_text: None,
            position: Position::Suffix,
            decode_chain: Vec::new(),
            encode_chain: Vec::new(),
        }
    }
}

impl RuleConfig {
    /// Rule matching a parameter name exactly
    pub fn literal(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            ..Self::default()
        }
    }

    /// Rule matching parameter names against a regular expression
    pub fn regex(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            pattern_type: PatternType::Regex,
            ..Self::default()
        }
    }

    /// Rule resolving the `{$name$}` placeholder
    pub fn substitute(name: &str) -> Self {
        Self {
            pattern: name.to_string(),
            pattern_type: PatternType::Substitute,
            ..Self::default()
        }
    }

    /// Insert fixed text instead of a random value
    pub fn with_text(mut self, text: &str) -> Self {
        self.mutation_mode = MutationMode::String;
        self.literal_text = Some(text.to_string());
        self
    }

    /// Insert a random value of the given type and length
    pub fn with_random(mut self, random_type: RandomType, length: i32) -> Self {
        self.mutation_mode = MutationMode::Random;
        self.random_type = random_type;
        self.length = length;
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn with_path_filter(mut self, pattern: &str, is_regex: bool) -> Self {
        self.path_filter = PathFilterConfig {
            enabled: true,
            pattern: pattern.to_string(),
            is_regex,
        };
        self
    }

    pub fn with_decode_chain(mut self, ops: Vec<CodecOp>) -> Self {
        self.decode_chain = ops;
        self
    }

    pub fn with_encode_chain(mut self, ops: Vec<CodecOp>) -> Self {
        self.encode_chain = ops;
        self
    }
}

/// A compiled mutation rule
#[derive(Debug, Clone)]
pub struct Rule {
    config: RuleConfig,
    param_regex: Option<Regex>,
    path_regex: Option<Regex>,
}

impl Rule {
    /// Compile a rule, building its regular expressions
    pub fn compile(config: RuleConfig) -> MutatorResult<Self> {
        let param_regex = if config.pattern_type == PatternType::Regex && !config.pattern.is_empty() {
            Some(full_match(&config.pattern, PatternTarget::Parameter)?)
        } else {
            None
        };

        let filter = &config.path_filter;
        let path_regex = if filter.enabled && filter.is_regex && !filter.pattern.is_empty() {
            Some(full_match(&filter.pattern, PatternTarget::Path)?)
        } else {
            None
        };

        Ok(Self {
            config,
            param_regex,
            path_regex,
        })
    }

    /// Check whether this rule applies to a request path.
    ///
    /// Logic:
    /// 1. Filtering disabled: always applies.
    /// 2. Filtering enabled with an empty pattern: never applies.
    /// 3. Otherwise the whole path must match the regex, or equal the literal.
    pub fn matches_path(&self, path: &str) -> bool {
        let filter = &self.config.path_filter;
        if !filter.enabled {
            return true;
        }
        if filter.pattern.is_empty() {
            return false;
        }
        if filter.is_regex {
            return self.path_regex.as_ref().map_or(false, |re| re.is_match(path));
        }
        path == filter.pattern
    }

    /// Check whether this rule targets a parameter by name.
    /// SUBSTITUTE rules never match here.
    pub fn matches(&self, name: &str) -> bool {
        match self.config.pattern_type {
            PatternType::Literal => name == self.config.pattern,
            PatternType::Regex => self.param_regex.as_ref().map_or(false, |re| re.is_match(name)),
            PatternType::Substitute => false,
        }
    }

    /// Check whether this SUBSTITUTE rule resolves a placeholder.
    ///
    /// `name` is the text between `{$` and `$}`, `token` the whole
    /// placeholder as it appeared. The stored pattern may be written as the
    /// bare name, the braced name, or the token itself.
    pub fn matches_placeholder(&self, name: &str, token: &str) -> bool {
        if self.config.pattern_type != PatternType::Substitute {
            return false;
        }
        let pattern = self.config.pattern.as_str();
        pattern == name || pattern == crate::placeholder::placeholder_token(name) || pattern == token
    }

    /// The text this rule inserts: literal text for STRING mode, a fresh
    /// random value for RANDOM mode.
    pub fn insert_value(&self) -> String {
        match self.config.mutation_mode {
            MutationMode::String => self.config.literal_text.clone().unwrap_or_default(),
            MutationMode::Random => {
                RandomValueGenerator::random_string(self.config.random_type, self.config.length)
            }
        }
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    pub fn pattern(&self) -> &str {
        &self.config.pattern
    }

    pub fn pattern_type(&self) -> PatternType {
        self.config.pattern_type
    }

    pub fn position(&self) -> Position {
        self.config.position
    }

    pub fn decode_chain(&self) -> &[CodecOp] {
        &self.config.decode_chain
    }

    pub fn encode_chain(&self) -> &[CodecOp] {
        &self.config.encode_chain
    }

    pub fn is_substitute(&self) -> bool {
        self.config.pattern_type == PatternType::Substitute
    }
}

fn full_match(pattern: &str, target: PatternTarget) -> MutatorResult<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| MutatorError::InvalidPattern {
        target,
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Ordered, immutable collection of rules.
///
/// SUBSTITUTE rules are kept together at the front; every other rule keeps
/// its declaration order, which decides how matching rules stack.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        let (mut ordered, rest): (Vec<Rule>, Vec<Rule>) =
            rules.into_iter().partition(Rule::is_substitute);
        ordered.extend(rest);
        Self { rules: ordered }
    }

    /// Compile a list of rule descriptions
    pub fn compile(configs: &[RuleConfig]) -> MutatorResult<Self> {
        let rules = configs
            .iter()
            .cloned()
            .map(Rule::compile)
            .collect::<MutatorResult<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Rules that apply to parameters, in stacking order
    pub fn mutation_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| !r.is_substitute())
    }

    /// Rules that resolve placeholders
    pub fn substitute_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.is_substitute())
    }

    pub fn has_substitute_rules(&self) -> bool {
        self.rules.iter().any(Rule::is_substitute)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(config: RuleConfig) -> Rule {
        Rule::compile(config).unwrap()
    }

    #[test]
    fn test_path_filter_disabled_matches_everything() {
        let r = rule(RuleConfig::literal("id"));
        assert!(r.matches_path("/"));
        assert!(r.matches_path("/api/users?id=1"));
        assert!(r.matches_path(""));
    }

    #[test]
    fn test_path_filter_empty_pattern_denies() {
        let mut config = RuleConfig::literal("id");
        config.path_filter.enabled = true;
        let r = rule(config.clone());
        assert!(!r.matches_path("/"));
        assert!(!r.matches_path(""));

        config.path_filter.is_regex = true;
        let r = rule(config);
        assert!(!r.matches_path("/anything"));
    }

    #[test]
    fn test_path_filter_regex_is_full_match() {
        let r = rule(RuleConfig::literal("id").with_path_filter("/api/.*", true));
        assert!(r.matches_path("/api/users"));
        assert!(!r.matches_path("/v1/api/users"));

        let r = rule(RuleConfig::literal("id").with_path_filter("/api", true));
        assert!(!r.matches_path("/api/users"));
    }

    #[test]
    fn test_path_filter_literal_is_exact() {
        let r = rule(RuleConfig::literal("id").with_path_filter("/login", false));
        assert!(r.matches_path("/login"));
        assert!(!r.matches_path("/login?x=1"));
        assert!(!r.matches_path("/LOGIN"));
    }

    #[test]
    fn test_literal_param_match_is_case_sensitive() {
        let r = rule(RuleConfig::literal("token"));
        assert!(r.matches("token"));
        assert!(!r.matches("Token"));
        assert!(!r.matches("token2"));
    }

    #[test]
    fn test_regex_param_match_is_full_match() {
        let r = rule(RuleConfig::regex("id[0-9]+"));
        assert!(r.matches("id12"));
        assert!(!r.matches("xid12"));
        assert!(!r.matches("id12x"));

        let r = rule(RuleConfig::regex("a|b"));
        assert!(r.matches("a"));
        assert!(!r.matches("ab"));
    }

    #[test]
    fn test_empty_regex_never_matches() {
        let r = rule(RuleConfig::regex(""));
        assert!(!r.matches(""));
        assert!(!r.matches("x"));
    }

    #[test]
    fn test_substitute_never_matches_params() {
        let r = rule(RuleConfig::substitute("tok"));
        assert!(!r.matches("tok"));
        assert!(r.matches_placeholder("tok", "{$tok$}"));
    }

    #[test]
    fn test_placeholder_pattern_forms() {
        assert!(rule(RuleConfig::substitute("tok")).matches_placeholder("tok", "{$tok$}"));
        assert!(rule(RuleConfig::substitute("{$tok$}")).matches_placeholder("tok", "{$tok$}"));
        assert!(!rule(RuleConfig::substitute("other")).matches_placeholder("tok", "{$tok$}"));
        assert!(!rule(RuleConfig::literal("tok")).matches_placeholder("tok", "{$tok$}"));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let err = Rule::compile(RuleConfig::regex("(")).unwrap_err();
        assert!(matches!(err, MutatorError::InvalidPattern { target: PatternTarget::Parameter, .. }));

        let err = Rule::compile(RuleConfig::literal("id").with_path_filter("[", true)).unwrap_err();
        assert!(matches!(err, MutatorError::InvalidPattern { target: PatternTarget::Path, .. }));
    }

    #[test]
    fn test_insert_value() {
        assert_eq!(rule(RuleConfig::literal("a").with_text("XSS")).insert_value(), "XSS");

        let mut config = RuleConfig::literal("a");
        config.mutation_mode = MutationMode::String;
        assert_eq!(rule(config).insert_value(), "");

        let value = rule(RuleConfig::literal("a").with_random(RandomType::Numeric, 5)).insert_value();
        assert_eq!(value.len(), 5);
    }

    #[test]
    fn test_rule_set_keeps_substitute_rules_first() {
        let set = RuleSet::compile(&[
            RuleConfig::literal("a"),
            RuleConfig::substitute("s1"),
            RuleConfig::regex("b.*"),
            RuleConfig::substitute("s2"),
        ])
        .unwrap();

        let patterns: Vec<&str> = set.iter().map(Rule::pattern).collect();
        assert_eq!(patterns, vec!["s1", "s2", "a", "b.*"]);
        assert_eq!(set.mutation_rules().count(), 2);
        assert_eq!(set.substitute_rules().count(), 2);
        assert!(set.has_substitute_rules());
    }

    #[test]
    fn test_rule_config_deserializes_with_defaults() {
        let config: RuleConfig = serde_json::from_str(
            r#"{"pattern":"q","pattern_type":"REGEX","position":"PREFIX","encode_chain":["URL_ENCODE"]}"#,
        )
        .unwrap();
        assert_eq!(config.pattern_type, PatternType::Regex);
        assert_eq!(config.position, Position::Prefix);
        assert_eq!(config.mutation_mode, MutationMode::Random);
        assert_eq!(config.length, 4);
        assert_eq!(config.encode_chain, vec![CodecOp::UrlEncode]);
        assert!(!config.path_filter.enabled);
    }
}
