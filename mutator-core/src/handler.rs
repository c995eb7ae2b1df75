//! Per-request entry point
//!
//! [`ParamMutator`] ties the pieces together for one request: parameter
//! mutation, placeholder substitution over the serialized message,
//! `Content-Length` repair, reparse with fallback, and activity logging.

use crate::config::{ConfigHandle, MutatorConfig, MutatorSettings};
use crate::engine::{EngineResult, MutationEngine};
use crate::error::{MutatorResult, ReassemblyError};
use crate::log::{BoundedLog, LogLevel};
use crate::placeholder::{has_placeholders, PlaceholderSubstitutor};
use crate::reassembly::{repair_content_length, RequestReassembler};
use crate::request::HttpRequest;
use crate::rule::RuleSet;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to placeholder substitution for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstitutionStatus {
    /// No SUBSTITUTE rules, no placeholders, or nothing resolved
    Skipped,
    /// Placeholders were replaced and the message reparsed
    Applied { replacements: usize },
    /// The rewritten message could not be reparsed; the request carries only
    /// parameter mutations
    FellBack { error: ReassemblyError },
}

/// Result of running the pipeline on one request
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub request: HttpRequest,
    pub all_params: BTreeMap<String, String>,
    pub changed_params: BTreeMap<String, String>,
    pub substitution: SubstitutionStatus,
}

impl MutationOutcome {
    fn untouched(request: &HttpRequest) -> Self {
        Self {
            request: request.clone(),
            all_params: BTreeMap::new(),
            changed_params: BTreeMap::new(),
            substitution: SubstitutionStatus::Skipped,
        }
    }

    /// Whether the returned request differs from the one passed in
    pub fn is_modified(&self) -> bool {
        !self.changed_params.is_empty() || matches!(self.substitution, SubstitutionStatus::Applied { .. })
    }
}

/// Request mutator with its configuration and activity log
#[derive(Debug, Clone)]
pub struct ParamMutator {
    config: Arc<ConfigHandle>,
    log: Arc<BoundedLog>,
}

impl ParamMutator {
    pub fn new(config: Arc<ConfigHandle>, log: Arc<BoundedLog>) -> Self {
        Self { config, log }
    }

    /// Build a mutator with its own configuration handle and log
    pub fn from_settings(settings: &MutatorSettings) -> MutatorResult<Self> {
        let config = MutatorConfig::from_settings(settings)?;
        Ok(Self::new(
            Arc::new(ConfigHandle::new(config)),
            Arc::new(BoundedLog::new(settings.log.clone())),
        ))
    }

    pub fn config(&self) -> &Arc<ConfigHandle> {
        &self.config
    }

    pub fn log(&self) -> &Arc<BoundedLog> {
        &self.log
    }

    /// Run the pipeline on one request.
    ///
    /// The configuration snapshot is read once and used for the whole run.
    /// The request is never dropped: every failure degrades to the most
    /// complete mutated request available.
    pub fn handle_request(&self, request: &HttpRequest) -> MutationOutcome {
        let config = self.config.load();
        if !config.enabled {
            return MutationOutcome::untouched(request);
        }

        let origin = request.origin();
        let path = request.path();

        let EngineResult {
            request: mutated,
            all_params,
            changed_params,
        } = MutationEngine::mutate(&config.rules, request, |failure| {
            self.note(
                &origin,
                path,
                &format!(
                    "Exception mutating param {} with rule '{}': {:?} failed: {}",
                    failure.parameter,
                    failure.rule.pattern(),
                    failure.op,
                    failure.error
                ),
            );
        });

        let (request, substitution) = self.substitute(&config.rules, mutated, &origin, path);

        self.log_activity(&origin, path, &all_params, &changed_params);
        debug!(
            "{}{}: {} params, {} changed, substitution {:?}",
            origin,
            path,
            all_params.len(),
            changed_params.len(),
            substitution
        );

        MutationOutcome {
            request,
            all_params,
            changed_params,
            substitution,
        }
    }

    fn substitute(
        &self,
        rules: &RuleSet,
        mutated: HttpRequest,
        origin: &str,
        path: &str,
    ) -> (HttpRequest, SubstitutionStatus) {
        if !rules.has_substitute_rules() {
            return (mutated, SubstitutionStatus::Skipped);
        }

        let raw = mutated.to_raw();
        if !has_placeholders(&raw) {
            return (mutated, SubstitutionStatus::Skipped);
        }

        let mut substitutor = PlaceholderSubstitutor::new(rules, path);
        let result = substitutor.substitute(&raw);
        for diagnostic in &result.diagnostics {
            self.note(origin, path, diagnostic);
        }
        if result.replacements == 0 {
            return (mutated, SubstitutionStatus::Skipped);
        }

        let repaired = repair_content_length(&result.text, mutated.body().len());
        match RequestReassembler::reassemble(&mutated, &repaired) {
            Ok(rebuilt) => {
                let rebuilt = RequestReassembler::resubstitute_parameters(&rebuilt, &substitutor).unwrap_or(rebuilt);
                (
                    rebuilt,
                    SubstitutionStatus::Applied {
                        replacements: result.replacements,
                    },
                )
            }
            Err(error) => {
                warn!("Discarding placeholder substitution for {}{}: {}", origin, path, error);
                self.note(
                    origin,
                    path,
                    &format!("Reassembly failed, keeping parameter-only mutation: {}", error),
                );
                (mutated, SubstitutionStatus::FellBack { error })
            }
        }
    }

    /// FULL logs every final parameter value, INFO only changed ones (and
    /// nothing when none changed), OFF nothing.
    fn log_activity(
        &self,
        origin: &str,
        path: &str,
        all_params: &BTreeMap<String, String>,
        changed_params: &BTreeMap<String, String>,
    ) {
        match self.log.min_level() {
            LogLevel::Full => {
                self.log.log_json(LogLevel::Full, origin, path, all_params);
            }
            LogLevel::Info => {
                if !changed_params.is_empty() {
                    self.log.log_json(LogLevel::Info, origin, path, changed_params);
                }
            }
            LogLevel::Off => {}
        }
    }

    fn note(&self, origin: &str, path: &str, message: &str) {
        self.log.log(LogLevel::Full, origin, path, message);
    }
}
