//! Per-parameter rule application
//!
//! Every parameter is run through the mutation rules in declaration order.
//! Matching rules stack: each one sees the value produced by the previous one.

use crate::codec::{CodecChain, CodecOp};
use crate::error::MutatorError;
use crate::request::{HttpRequest, Parameter};
use crate::rule::{Position, Rule, RuleSet};
use std::collections::BTreeMap;

/// Output of one engine run
#[derive(Debug, Clone)]
pub struct EngineResult {
    /// The request with changed parameter values written back
    pub request: HttpRequest,
    /// Final value of every parameter, keyed by name
    pub all_params: BTreeMap<String, String>,
    /// Parameters whose value differs from the original, keyed by name
    pub changed_params: BTreeMap<String, String>,
}

impl EngineResult {
    pub fn is_changed(&self) -> bool {
        !self.changed_params.is_empty()
    }
}

/// A codec step that failed while a rule was applied
#[derive(Debug)]
pub struct RuleFailure<'a> {
    pub rule: &'a Rule,
    pub parameter: &'a str,
    pub op: CodecOp,
    pub error: &'a MutatorError,
}

pub struct MutationEngine;

impl MutationEngine {
    /// Apply the mutation rules of `rules` to every parameter of `request`.
    ///
    /// SUBSTITUTE rules, rules whose path filter rejects the request path and
    /// rules whose pattern does not match the parameter name are skipped.
    /// Codec failures are passed to `on_failure`; the value is kept for that
    /// step and processing continues.
    pub fn mutate<F>(rules: &RuleSet, request: &HttpRequest, mut on_failure: F) -> EngineResult
    where
        F: FnMut(RuleFailure<'_>),
    {
        let path = request.path();
        let applicable: Vec<&Rule> = rules.mutation_rules().filter(|rule| rule.matches_path(path)).collect();

        let mut all_params = BTreeMap::new();
        let mut changed_params = BTreeMap::new();
        let mut rewritten: Vec<Parameter> = Vec::new();
        let mut any_changed = false;

        for param in request.parameters() {
            let mut transformed = param.value.clone();
            let mut mutated = false;

            for rule in applicable.iter().copied().filter(|rule| rule.matches(&param.name)) {
                let mut report = |op: CodecOp, error: &MutatorError| {
                    on_failure(RuleFailure {
                        rule,
                        parameter: &param.name,
                        op,
                        error,
                    })
                };

                let decoded = CodecChain::apply_decode_with(&transformed, rule.decode_chain(), &mut report);
                let insert = rule.insert_value();
                let combined = match rule.position() {
                    Position::Prefix => insert + &decoded,
                    Position::Suffix => decoded + &insert,
                };
                transformed = CodecChain::apply_encode_with(&combined, rule.encode_chain(), &mut report);
                mutated = true;
            }

            let final_value = if mutated { transformed } else { param.value.clone() };
            all_params.insert(param.name.clone(), final_value.clone());

            if mutated && final_value != param.value {
                changed_params.insert(param.name.clone(), final_value.clone());
                rewritten.push(param.with_value(&final_value));
                any_changed = true;
            } else {
                rewritten.push(param);
            }
        }

        let request = if any_changed {
            request.with_rewritten_parameters(&rewritten)
        } else {
            request.clone()
        };

        EngineResult {
            request,
            all_params,
            changed_params,
        }
    }
}

/// Convenience wrapper for callers that do not care about codec failures
pub fn mutate_parameters(rules: &RuleSet, request: &HttpRequest) -> EngineResult {
    MutationEngine::mutate(rules, request, |_| {})
}
