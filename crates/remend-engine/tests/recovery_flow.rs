use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use anyhow::{Result, anyhow};
use remend_core::{
    ArtifactContext, CircuitState, RecoveryRequest, ResolutionResult, StageStatus, StrategyKind,
};
use remend_engine::{EngineConfig, EngineConfigPatch, RecoveryEngine};
use remend_guard::{CircuitBreaker, CircuitBreakerConfig, RetryLoopMonitor, RetryMonitorConfig};
use remend_llm::{
    FixService, LlmFixRequest, LlmFixResponse, Provider, ProviderDescriptor, ProviderSelection,
};
use remend_strategies::TransformStrategy;

fn engine() -> RecoveryEngine {
    RecoveryEngine::new(
        EngineConfig::default(),
        CircuitBreaker::new(CircuitBreakerConfig::default()),
        RetryLoopMonitor::new(RetryMonitorConfig::default()),
    )
}

fn request(artifact_id: &str, code: &str, error: &str, message: &str, attempt: &str) -> RecoveryRequest {
    RecoveryRequest {
        artifact_id: artifact_id.to_string(),
        artifact_code: code.to_string(),
        error_message: error.to_string(),
        message_content: message.to_string(),
        language: "jsx".to_string(),
        attempt_id: attempt.to_string(),
    }
}

#[test]
fn css_module_import_becomes_a_style_object() {
    let code = concat!(
        "import styles from \"./Button.module.css\";\n",
        "export default function Button() {\n",
        "  return <button className={styles.primary}>Go</button>;\n",
        "}\n",
    );
    let message = "Here is the styling:\n```css\n.primary { background-color: blue; font-size: 16px; }\n```";
    let result = engine().execute_recovery(&request(
        "artifact-css",
        code,
        "Cannot resolve module './Button.module.css'",
        message,
        "a1",
    ));

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.strategy.to_string(), "CSS_MODULE_CONVERSION");
    assert!(result.confidence > 0.8);
    let fixed = result.final_code.expect("final code must exist");
    assert!(fixed.contains("const styles = {"));
    assert!(fixed.contains("backgroundColor: 'blue'"));
    assert!(fixed.contains("fontSize: '16px'"));
    assert!(!fixed.contains(".module.css"));
    assert_eq!(result.circuit_state, CircuitState::Closed);
    assert!(!result.superseded);
}

#[test]
fn json_import_is_inlined_as_a_constant() {
    let code = concat!(
        "import config from \"./config.json\";\n",
        "export default () => <div>{config.apiUrl}</div>;\n",
    );
    let message = "```json\n{\"apiUrl\":\"https://api.example.com\",\"timeout\":5000}\n```";
    let result = engine().execute_recovery(&request(
        "artifact-json",
        code,
        "Cannot find module './config.json'",
        message,
        "a1",
    ));

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.strategy.to_string(), "JSON_DATA_INLINING");
    let fixed = result.final_code.expect("final code must exist");
    assert!(fixed.contains("const config = {"));
    assert!(fixed.contains("apiUrl: \"https://api.example.com\""));
    assert!(fixed.contains("timeout: 5000"));
}

#[test]
fn unmatched_relative_import_is_removed() {
    let code = concat!(
        "import unknown from \"./missing.js\";\n",
        "export default () => <div>hello</div>;\n",
    );
    let result = engine().execute_recovery(&request(
        "artifact-import",
        code,
        "Cannot resolve './missing.js'",
        "no code blocks in this message",
        "a1",
    ));

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.strategy.to_string(), "IMPORT_REMOVAL");
    let fixed = result.final_code.expect("final code must exist");
    assert!(!fixed.contains("missing.js"));
    assert!(fixed.contains("export default"));
}

#[test]
fn syntax_errors_short_circuit_before_any_strategy() {
    let result = engine().execute_recovery(&request(
        "artifact-syntax",
        "export default () => <div>hi</div>;",
        "Unexpected token '}' at line 10",
        "```css\n.a { color: red; }\n```",
        "a1",
    ));

    assert!(!result.success);
    assert_eq!(result.strategy.to_string(), "CLASSIFICATION_FAILED");
    let names: Vec<&str> = result.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Circuit Breaker Check", "Intent Classification"]);
    // An unresolvable classification is not an attempt failure.
    assert_eq!(result.circuit_state, CircuitState::Closed);
}

#[test]
fn repeated_failures_open_the_circuit_and_block_the_next_attempt() {
    let engine = engine();
    // Resolvable classification, but nothing for any strategy to do.
    let failing = request(
        "artifact-flaky",
        "export default () => <div>hi</div>;",
        "Cannot resolve './gone'",
        "no blocks",
        "a",
    );

    for i in 0..3 {
        let result = engine.execute_recovery(&failing);
        assert!(!result.success);
        assert_eq!(result.strategy.to_string(), "ALL_STRATEGIES_FAILED");
        assert_eq!(
            engine.get_recovery_stats("artifact-flaky").circuit.consecutive_failures,
            i + 1
        );
    }
    assert_eq!(
        engine.get_recovery_stats("artifact-flaky").circuit.state,
        CircuitState::Open
    );

    let blocked = engine.execute_recovery(&failing);
    assert!(!blocked.success);
    assert_eq!(blocked.strategy.to_string(), "CIRCUIT_BREAKER_BLOCKED");
    assert_eq!(blocked.circuit_state, CircuitState::Open);
    assert_eq!(blocked.stages.len(), 1);

    engine.reset_circuit_breaker("artifact-flaky");
    let after_reset = engine.execute_recovery(&failing);
    assert_ne!(after_reset.strategy.to_string(), "CIRCUIT_BREAKER_BLOCKED");
}

#[test]
fn five_concurrent_failures_are_all_counted() {
    // Threshold above 5 keeps the gate open for every call, so the count
    // itself is what is under test.
    let engine = Arc::new(RecoveryEngine::new(
        EngineConfig::default(),
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 10,
            ..CircuitBreakerConfig::default()
        }),
        RetryLoopMonitor::new(RetryMonitorConfig::default()),
    ));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine.execute_recovery(&request(
                    "artifact-shared",
                    "export default () => <div>hi</div>;",
                    "Cannot resolve './gone'",
                    "no blocks",
                    &format!("attempt-{i}"),
                ))
            })
        })
        .collect();
    for handle in handles {
        let result = handle.join().expect("thread should finish");
        assert!(!result.success);
    }

    assert_eq!(
        engine.get_recovery_stats("artifact-shared").circuit.consecutive_failures,
        5
    );
}

struct SlowThenFailingFixer {
    first: AtomicBool,
    started: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl FixService for SlowThenFailingFixer {
    fn candidate_chain(&self, _selection: ProviderSelection) -> Vec<ProviderDescriptor> {
        vec![ProviderDescriptor {
            provider: Provider::Ollama,
            model: "m".to_string(),
        }]
    }

    fn fix(
        &self,
        _selection: ProviderSelection,
        _req: &LlmFixRequest,
        _model_override: Option<&str>,
    ) -> Result<LlmFixResponse> {
        if self.first.swap(false, Ordering::SeqCst) {
            self.started
                .lock()
                .expect("lock must work")
                .send(())
                .expect("send must work");
            self.release
                .lock()
                .expect("lock must work")
                .recv()
                .expect("recv must work");
            return Ok(LlmFixResponse {
                fixed_code: "const fixed = true;".to_string(),
                confidence: 0.9,
                provider: Provider::Ollama,
                model: "m".to_string(),
                cache_hit: false,
            });
        }
        Err(anyhow!("no provider available"))
    }
}

#[test]
fn a_newer_attempt_supersedes_a_slow_in_flight_one() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let fixer = SlowThenFailingFixer {
        first: AtomicBool::new(true),
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    };

    let engine = Arc::new(
        RecoveryEngine::new(
            EngineConfig {
                llm_enabled: true,
                ..EngineConfig::default()
            },
            CircuitBreaker::new(CircuitBreakerConfig::default()),
            RetryLoopMonitor::new(RetryMonitorConfig::default()),
        )
        .with_fix_service(Box::new(fixer), ProviderSelection::Auto)
        .with_strategies(Vec::new()),
    );

    let slow_engine = Arc::clone(&engine);
    let slow = thread::spawn(move || {
        slow_engine.execute_recovery(&request(
            "artifact-race",
            "export default () => <div>old</div>;",
            "Cannot resolve './gone'",
            "no blocks",
            "attempt-1",
        ))
    });

    // Wait until attempt-1 is parked inside the LLM call, then land a newer
    // attempt for the same artifact.
    started_rx.recv().expect("first attempt should reach the fixer");
    let newer = engine.execute_recovery(&request(
        "artifact-race",
        "export default () => <div>new</div>;",
        "Cannot resolve './gone'",
        "no blocks",
        "attempt-2",
    ));
    assert!(!newer.superseded);

    release_tx.send(()).expect("send must work");
    let stale = slow.join().expect("thread should finish");
    assert!(stale.superseded);
    assert!(!stale.success);
    assert_eq!(stale.final_code, None);
    assert!(stale.errors.iter().any(|e| e.contains("superseded")));
}

#[test]
fn llm_fallback_fixes_what_no_strategy_could() {
    struct ConfidentFixer;
    impl FixService for ConfidentFixer {
        fn candidate_chain(&self, _selection: ProviderSelection) -> Vec<ProviderDescriptor> {
            Vec::new()
        }
        fn fix(
            &self,
            _selection: ProviderSelection,
            _req: &LlmFixRequest,
            _model_override: Option<&str>,
        ) -> Result<LlmFixResponse> {
            Ok(LlmFixResponse {
                fixed_code: "export default () => <div>fixed</div>;".to_string(),
                confidence: 0.85,
                provider: Provider::OpenAiCompatible,
                model: "gpt".to_string(),
                cache_hit: false,
            })
        }
    }

    let engine = RecoveryEngine::new(
        EngineConfig {
            llm_enabled: true,
            ..EngineConfig::default()
        },
        CircuitBreaker::new(CircuitBreakerConfig::default()),
        RetryLoopMonitor::new(RetryMonitorConfig::default()),
    )
    .with_fix_service(Box::new(ConfidentFixer), ProviderSelection::Auto);

    let result = engine.execute_recovery(&request(
        "artifact-llm",
        "export default () => <div>hi</div>;",
        "Cannot resolve './gone'",
        "no blocks",
        "a1",
    ));

    assert!(result.success);
    assert_eq!(result.strategy.to_string(), "LLM_IMPORT_ERROR-fix");
    assert_eq!(result.circuit_state, CircuitState::Closed);
    let llm_stage = result
        .stages
        .iter()
        .find(|s| s.name == "LLM Fallback")
        .expect("llm stage must exist");
    assert_eq!(llm_stage.status, StageStatus::Completed);
}

#[test]
fn a_panicking_strategy_is_downgraded_to_execution_error() {
    struct Panicker;
    impl TransformStrategy for Panicker {
        fn kind(&self) -> StrategyKind {
            StrategyKind::ImportRemoval
        }
        fn apply(&self, _code: &str, _context: &ArtifactContext) -> Result<ResolutionResult> {
            panic!("parser blew up");
        }
    }

    let engine = engine().with_strategies(vec![Box::new(Panicker)]);
    let result = engine.execute_recovery(&request(
        "artifact-panic",
        "export default () => <div>hi</div>;",
        "Cannot resolve './gone'",
        "no blocks",
        "a1",
    ));

    assert!(!result.success);
    assert_eq!(result.strategy.to_string(), "EXECUTION_ERROR");
    assert!(result.errors.iter().any(|e| e.contains("parser blew up")));
    assert_eq!(
        engine.get_recovery_stats("artifact-panic").circuit.consecutive_failures,
        1
    );
}

#[test]
fn raising_the_confidence_floor_rejects_weak_transformations() {
    let engine = engine();
    engine.update_config(EngineConfigPatch {
        min_confidence: Some(0.99),
        ..EngineConfigPatch::default()
    });

    let code = "import unknown from \"./missing.js\";\nexport default () => <div>hi</div>;\n";
    let result = engine.execute_recovery(&request(
        "artifact-floor",
        code,
        "Cannot resolve './missing.js'",
        "no blocks",
        "a1",
    ));

    assert!(!result.success);
    assert_eq!(result.strategy.to_string(), "ALL_STRATEGIES_FAILED");
    assert!(result.errors.iter().any(|e| e.contains("below the")));
}

#[test]
fn successful_results_always_carry_valid_code() {
    let code = concat!(
        "import styles from \"./A.module.css\";\n",
        "export default () => <div className={styles.a}>x</div>;\n",
    );
    let message = "```css\n.a { color: red; }\n```";
    let result = engine().execute_recovery(&request("artifact-valid", code, "Cannot resolve './A.module.css'", message, "a1"));

    assert!(result.success);
    let fixed = result.final_code.expect("final code must exist");
    assert!(!fixed.is_empty());
    assert!(remend_core::validate_code(&fixed).is_valid);
    assert!((0.0..=1.0).contains(&result.confidence));
}
