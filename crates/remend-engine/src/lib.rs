//! The recovery executor: one call per broken artifact, running the circuit
//! breaker gate, classification, context analysis, the transformation
//! strategies in priority order, and finally the LLM fallback, with a
//! stage-by-stage ledger of what happened.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::time::Instant;

use remend_analysis::{analyze_artifact_context, classify_error};
use remend_core::{
    RecoveryRequest, RecoveryResult, RecoveryStage, StageStatus, StrategyTag, clamp_confidence,
    validate_code,
};
use remend_guard::{CircuitBreaker, CircuitSnapshot, RetryLoopMonitor};
use remend_llm::{FixService, LlmFixRequest, ProviderSelection, user_facing_failure};
use remend_strategies::{TransformStrategy, ordered_strategies};

/// Floor below which a transformation's output is not trusted.
pub const MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub min_confidence: f64,
    pub llm_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: MIN_CONFIDENCE,
            llm_enabled: false,
        }
    }
}

/// Partial update applied over the current config; `None` keeps a field.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfigPatch {
    pub min_confidence: Option<f64>,
    pub llm_enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    pub circuit: CircuitSnapshot,
}

pub struct RecoveryEngine {
    breaker: CircuitBreaker,
    monitor: RetryLoopMonitor,
    strategies: Vec<Box<dyn TransformStrategy>>,
    fixer: Option<Box<dyn FixService + Send + Sync>>,
    selection: ProviderSelection,
    config: Mutex<EngineConfig>,
    /// Latest attempt id per artifact; older attempts finishing late are
    /// flagged as superseded so the caller discards their output.
    attempts: Mutex<HashMap<String, String>>,
}

impl RecoveryEngine {
    pub fn new(config: EngineConfig, breaker: CircuitBreaker, monitor: RetryLoopMonitor) -> Self {
        Self {
            breaker,
            monitor,
            strategies: ordered_strategies(),
            fixer: None,
            selection: ProviderSelection::Auto,
            config: Mutex::new(config),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fix_service(
        mut self,
        fixer: Box<dyn FixService + Send + Sync>,
        selection: ProviderSelection,
    ) -> Self {
        self.fixer = Some(fixer);
        self.selection = selection;
        self
    }

    /// Replaces the built-in strategy chain. Order is preserved as given.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn TransformStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn update_config(&self, patch: EngineConfigPatch) {
        let mut config = self.config.lock().expect("config lock poisoned");
        if let Some(min_confidence) = patch.min_confidence {
            config.min_confidence = clamp_confidence(min_confidence);
        }
        if let Some(llm_enabled) = patch.llm_enabled {
            config.llm_enabled = llm_enabled;
        }
    }

    pub fn get_recovery_stats(&self, artifact_id: &str) -> RecoveryStats {
        RecoveryStats {
            circuit: self.breaker.snapshot(artifact_id),
        }
    }

    pub fn reset_circuit_breaker(&self, artifact_id: &str) {
        self.breaker.reset_circuit(artifact_id);
    }

    pub fn retry_monitor(&self) -> &RetryLoopMonitor {
        &self.monitor
    }

    pub fn execute_recovery(&self, request: &RecoveryRequest) -> RecoveryResult {
        let started = Instant::now();
        let config = *self.config.lock().expect("config lock poisoned");
        self.register_attempt(request);

        let mut stages: Vec<RecoveryStage> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        // Circuit Breaker Check
        let stage_started = Instant::now();
        let (allowed, gate_state) = self.breaker.allow_recovery_attempt(&request.artifact_id);
        stages.push(finish_stage(
            RecoveryStage::new("Circuit Breaker Check"),
            StageStatus::Completed,
            stage_started,
            Some(gate_state.as_str().to_string()),
            None,
        ));
        if !allowed {
            errors.push("circuit breaker active; wait for the cooldown or reset it".to_string());
            return self.finish(
                request,
                started,
                RecoveryOutcome {
                    success: false,
                    strategy: StrategyTag::CircuitBreakerBlocked,
                    confidence: 0.0,
                    final_code: None,
                    record: None,
                },
                stages,
                errors,
            );
        }

        // Intent Classification
        let stage_started = Instant::now();
        let classification = classify_error(&request.error_message, &request.artifact_code);
        stages.push(finish_stage(
            RecoveryStage::new("Intent Classification"),
            StageStatus::Completed,
            stage_started,
            Some(format!(
                "{} (confidence {:.2})",
                classification.error_type, classification.confidence
            )),
            None,
        ));
        if !classification.can_resolve {
            errors.push(format!(
                "{} is not automatically resolvable",
                classification.error_type
            ));
            if let Some(reasoning) = &classification.reasoning {
                errors.push(reasoning.clone());
            }
            return self.finish(
                request,
                started,
                RecoveryOutcome {
                    success: false,
                    strategy: StrategyTag::ClassificationFailed,
                    confidence: classification.confidence,
                    final_code: None,
                    record: None,
                },
                stages,
                errors,
            );
        }

        // Context Analysis
        let stage_started = Instant::now();
        let context = analyze_artifact_context(
            &request.message_content,
            &request.artifact_code,
            &request.artifact_id,
        );
        stages.push(finish_stage(
            RecoveryStage::new("Context Analysis"),
            StageStatus::Completed,
            stage_started,
            Some(format!(
                "{} blocks (css: {}, json: {})",
                context.blocks.len(),
                context.has_relevant_css,
                context.has_relevant_json
            )),
            None,
        ));

        // Strategy Execution, one stage per strategy attempted.
        for strategy in &self.strategies {
            let kind = strategy.kind();
            let stage_started = Instant::now();
            let stage = RecoveryStage::new(format!("Strategy: {kind}"));

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                strategy.apply(&request.artifact_code, &context)
            }));

            let result = match outcome {
                Err(panic) => {
                    let message = panic_message(panic);
                    errors.push(format!("{kind} panicked: {message}"));
                    stages.push(finish_stage(
                        stage,
                        StageStatus::Failed,
                        stage_started,
                        None,
                        Some(message),
                    ));
                    return self.finish(
                        request,
                        started,
                        RecoveryOutcome {
                            success: false,
                            strategy: StrategyTag::ExecutionError,
                            confidence: 0.0,
                            final_code: None,
                            record: Some(false),
                        },
                        stages,
                        errors,
                    );
                }
                Ok(Err(err)) => {
                    errors.push(format!("{kind} failed unexpectedly: {err}"));
                    stages.push(finish_stage(
                        stage,
                        StageStatus::Failed,
                        stage_started,
                        None,
                        Some(err.to_string()),
                    ));
                    return self.finish(
                        request,
                        started,
                        RecoveryOutcome {
                            success: false,
                            strategy: StrategyTag::ExecutionError,
                            confidence: 0.0,
                            final_code: None,
                            record: Some(false),
                        },
                        stages,
                        errors,
                    );
                }
                Ok(Ok(result)) => result,
            };

            if result.success && result.confidence >= config.min_confidence {
                // Never hand back code that does not scan.
                let report = validate_code(&result.transformed_code);
                if !report.is_valid {
                    errors.push(format!("{kind} produced invalid output"));
                    errors.extend(report.errors);
                    stages.push(finish_stage(
                        stage,
                        StageStatus::Failed,
                        stage_started,
                        None,
                        Some("output failed syntax validation".to_string()),
                    ));
                    continue;
                }

                stages.push(finish_stage(
                    stage,
                    StageStatus::Completed,
                    stage_started,
                    Some(format!(
                        "{} changes, confidence {:.2}",
                        result.applied_changes.len(),
                        result.confidence
                    )),
                    None,
                ));
                return self.finish(
                    request,
                    started,
                    RecoveryOutcome {
                        success: true,
                        strategy: StrategyTag::Transform(kind),
                        confidence: result.confidence,
                        final_code: Some(result.transformed_code),
                        record: Some(true),
                    },
                    stages,
                    errors,
                );
            }

            // Low-confidence successes and precondition misses both fall
            // through to the next strategy.
            let attempted = !result.applied_changes.is_empty() || !result.validation_errors.is_empty();
            let status = if attempted { StageStatus::Failed } else { StageStatus::Skipped };
            if let Some(message) = &result.error_message {
                if attempted {
                    errors.push(format!("{kind}: {message}"));
                }
            }
            if result.success && result.confidence < config.min_confidence {
                errors.push(format!(
                    "{kind}: confidence {:.2} below the {:.2} floor",
                    result.confidence, config.min_confidence
                ));
            }
            stages.push(finish_stage(
                stage,
                status,
                stage_started,
                None,
                result.error_message,
            ));
        }

        // LLM Fallback
        let stage_started = Instant::now();
        let stage = RecoveryStage::new("LLM Fallback");
        match (&self.fixer, config.llm_enabled) {
            (Some(fixer), true) => {
                let fix_request = LlmFixRequest {
                    artifact_code: request.artifact_code.clone(),
                    error_message: request.error_message.clone(),
                    error_type: classification.error_type,
                    artifact_id: request.artifact_id.clone(),
                };
                match fixer.fix(self.selection, &fix_request, None) {
                    Ok(response) if response.confidence >= config.min_confidence => {
                        stages.push(finish_stage(
                            stage,
                            StageStatus::Completed,
                            stage_started,
                            Some(format!("confidence {:.2}", response.confidence)),
                            None,
                        ));
                        return self.finish(
                            request,
                            started,
                            RecoveryOutcome {
                                success: true,
                                strategy: StrategyTag::LlmFix(classification.error_type),
                                confidence: response.confidence,
                                final_code: Some(response.fixed_code),
                                record: Some(true),
                            },
                            stages,
                            errors,
                        );
                    }
                    Ok(response) => {
                        errors.push(format!(
                            "LLM fix confidence {:.2} below the {:.2} floor",
                            response.confidence, config.min_confidence
                        ));
                        stages.push(finish_stage(
                            stage,
                            StageStatus::Failed,
                            stage_started,
                            None,
                            Some("fix below confidence floor".to_string()),
                        ));
                    }
                    Err(err) => {
                        errors.push(user_facing_failure(&err.to_string()));
                        stages.push(finish_stage(
                            stage,
                            StageStatus::Failed,
                            stage_started,
                            None,
                            Some(err.to_string()),
                        ));
                    }
                }
            }
            _ => {
                stages.push(finish_stage(
                    stage,
                    StageStatus::Skipped,
                    stage_started,
                    Some("LLM fallback disabled".to_string()),
                    None,
                ));
            }
        }

        errors.push("all strategies exhausted".to_string());
        self.finish(
            request,
            started,
            RecoveryOutcome {
                success: false,
                strategy: StrategyTag::AllStrategiesFailed,
                confidence: 0.0,
                final_code: None,
                record: Some(false),
            },
            stages,
            errors,
        )
    }

    fn register_attempt(&self, request: &RecoveryRequest) {
        self.attempts
            .lock()
            .expect("attempt lock poisoned")
            .insert(request.artifact_id.clone(), request.attempt_id.clone());
    }

    fn is_superseded(&self, request: &RecoveryRequest) -> bool {
        self.attempts
            .lock()
            .expect("attempt lock poisoned")
            .get(&request.artifact_id)
            .is_some_and(|attempt| attempt != &request.attempt_id)
    }

    /// Records the outcome in the breaker, reads the final circuit state, and
    /// assembles the result. Superseded attempts still count toward the
    /// circuit ledger (every real attempt did happen); only the returned code
    /// is marked for discard.
    fn finish(
        &self,
        request: &RecoveryRequest,
        started: Instant,
        outcome: RecoveryOutcome,
        stages: Vec<RecoveryStage>,
        mut errors: Vec<String>,
    ) -> RecoveryResult {
        match outcome.record {
            Some(true) => {
                self.breaker.record_success(&request.artifact_id);
            }
            Some(false) => {
                self.breaker.record_failure(&request.artifact_id);
            }
            None => {}
        }

        let superseded = self.is_superseded(request);
        if superseded {
            errors.push("attempt superseded by a newer request for this artifact".to_string());
        }

        RecoveryResult {
            success: outcome.success && !superseded,
            strategy: outcome.strategy,
            confidence: clamp_confidence(outcome.confidence),
            final_code: if superseded { None } else { outcome.final_code },
            circuit_state: self.breaker.snapshot(&request.artifact_id).state,
            stages,
            errors,
            superseded,
            elapsed: started.elapsed(),
        }
    }
}

struct RecoveryOutcome {
    success: bool,
    strategy: StrategyTag,
    confidence: f64,
    final_code: Option<String>,
    /// `Some(true)` records a success, `Some(false)` a failure, `None` leaves
    /// the circuit untouched (gate blocks and unresolvable classifications).
    record: Option<bool>,
}

fn finish_stage(
    mut stage: RecoveryStage,
    status: StageStatus,
    started: Instant,
    detail: Option<String>,
    error: Option<String>,
) -> RecoveryStage {
    stage.status = status;
    stage.elapsed = Some(started.elapsed());
    stage.detail = detail;
    stage.error = error;
    stage
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
