//! `{$name$}` placeholder substitution
//!
//! Runs over the fully serialized request after parameter mutation. Each
//! placeholder is resolved by the first SUBSTITUTE rule whose path filter
//! accepts the request path and whose pattern names the placeholder. A value
//! is computed once per name and reused for every later occurrence in the
//! same request.

use crate::codec::{CodecChain, CodecOp};
use crate::rule::{Rule, RuleSet};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

const PLACEHOLDER_PATTERN: &str = r"\{\$([^}]+)\$\}";

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern is a valid regex"))
}

/// The placeholder text for a name: `{$name$}`
pub fn placeholder_token(name: &str) -> String {
    format!("{{${}$}}", name)
}

/// Whether the text contains anything shaped like a placeholder
pub fn has_placeholders(text: &str) -> bool {
    placeholder_regex().is_match(text)
}

/// Result of one substitution pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    /// Text with every resolved placeholder replaced
    pub text: String,
    /// Number of placeholder occurrences replaced
    pub replacements: usize,
    /// Names that no rule resolved, in first-seen order
    pub unresolved: Vec<String>,
    /// Verbose-level notes produced while resolving
    pub diagnostics: Vec<String>,
}

/// Per-request placeholder resolver and value cache
pub struct PlaceholderSubstitutor<'a> {
    rules: &'a RuleSet,
    path: &'a str,
    cache: BTreeMap<String, String>,
}

impl<'a> PlaceholderSubstitutor<'a> {
    pub fn new(rules: &'a RuleSet, path: &'a str) -> Self {
        Self {
            rules,
            path,
            cache: BTreeMap::new(),
        }
    }

    /// Values computed so far, keyed by placeholder name
    pub fn cache(&self) -> &BTreeMap<String, String> {
        &self.cache
    }

    /// Replace every resolvable placeholder in `text`, left to right.
    /// Unresolved placeholders are left as they are.
    pub fn substitute(&mut self, text: &str) -> Substitution {
        let mut result = Substitution::default();
        let mut out = String::with_capacity(text.len());
        let mut copied = 0;

        for captures in placeholder_regex().captures_iter(text) {
            let (Some(token), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };

            match self.resolve(name.as_str(), token.as_str(), &mut result.diagnostics) {
                Some(value) => {
                    out.push_str(&text[copied..token.start()]);
                    out.push_str(&value);
                    copied = token.end();
                    result.replacements += 1;
                }
                None => {
                    let name = name.as_str().to_string();
                    if !result.unresolved.contains(&name) {
                        result.diagnostics.push(self.unresolved_note(&name));
                        result.unresolved.push(name);
                    }
                }
            }
        }

        out.push_str(&text[copied..]);
        result.text = out;
        result
    }

    /// Replace placeholders using only values already in the cache.
    /// Returns `None` when nothing was replaced.
    pub fn replace_cached(&self, text: &str) -> Option<String> {
        let mut replaced = false;
        let out = placeholder_regex().replace_all(text, |captures: &regex::Captures<'_>| {
            match self.cache.get(&captures[1]) {
                Some(value) => {
                    replaced = true;
                    value.clone()
                }
                None => captures[0].to_string(),
            }
        });
        replaced.then(|| out.into_owned())
    }

    fn resolve(&mut self, name: &str, token: &str, diagnostics: &mut Vec<String>) -> Option<String> {
        if let Some(value) = self.cache.get(name) {
            return Some(value.clone());
        }

        let rule = self.find_rule(name, token)?;
        let value = CodecChain::apply_encode_with(&rule.insert_value(), rule.encode_chain(), |op: CodecOp, e| {
            diagnostics.push(format!("Encode step {:?} failed for placeholder {}: {}", op, token, e));
        });

        if value.contains(['\r', '\n']) {
            debug!("Placeholder {} resolved to a value containing CR/LF", token);
            diagnostics.push(format!(
                "Replacement for {} contains CR/LF characters and may break request framing",
                token
            ));
        }

        self.cache.insert(name.to_string(), value.clone());
        Some(value)
    }

    fn find_rule(&self, name: &str, token: &str) -> Option<&'a Rule> {
        let rules: &'a RuleSet = self.rules;
        rules
            .substitute_rules()
            .find(|rule| rule.matches_path(self.path) && rule.matches_placeholder(name, token))
    }

    fn unresolved_note(&self, name: &str) -> String {
        let available: Vec<&str> = self
            .rules
            .substitute_rules()
            .filter(|rule| rule.matches_path(self.path))
            .map(Rule::pattern)
            .collect();
        format!(
            "No SUBSTITUTE rule for placeholder {} on this path; available patterns: [{}]",
            placeholder_token(name),
            available.join(", ")
        )
    }
}
