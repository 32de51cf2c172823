use serde::Serialize;
use std::fmt;
use std::time::Duration;

mod validation;

pub use validation::{SyntaxReport, validate_code};

/// Every confidence score in the engine passes through here before it is
/// stored or returned, keeping the [0, 1] invariant in one place.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    CssModule,
    Import,
    Bundling,
    Syntax,
    Network,
    Dependency,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CssModule => "CSS_MODULE_ERROR",
            Self::Import => "IMPORT_ERROR",
            Self::Bundling => "BUNDLING_ERROR",
            Self::Syntax => "SYNTAX_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::Dependency => "DEPENDENCY_ERROR",
        }
    }

    /// Syntax and network failures can never be fixed by rewriting imports,
    /// so they are unresolvable by definition.
    pub fn resolvable(self) -> bool {
        !matches!(self, Self::Syntax | Self::Network)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    CssModuleConversion,
    DirectCssInjection,
    JsonDataInlining,
    ImportRemoval,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CssModuleConversion => "CSS_MODULE_CONVERSION",
            Self::DirectCssInjection => "DIRECT_CSS_INJECTION",
            Self::JsonDataInlining => "JSON_DATA_INLINING",
            Self::ImportRemoval => "IMPORT_REMOVAL",
        }
    }

    /// Higher runs first. IMPORT_REMOVAL is the catch-all and always runs last.
    pub fn priority(self) -> u32 {
        match self {
            Self::CssModuleConversion => 100,
            Self::DirectCssInjection => 90,
            Self::JsonDataInlining => 80,
            Self::ImportRemoval => 10,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StrategyKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub error_type: ErrorType,
    pub confidence: f64,
    pub can_resolve: bool,
    pub suggested_strategy: Option<StrategyKind>,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    /// Language tag from the opening fence, lowercased; `None` for bare fences.
    pub language: Option<String>,
    pub content: String,
}

impl CodeBlock {
    pub fn language_tag(&self) -> Option<&str> {
        self.language.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactContext {
    pub blocks: Vec<CodeBlock>,
    pub has_relevant_css: bool,
    pub has_relevant_json: bool,
    pub has_import_statements: bool,
    pub target_artifact_name: String,
}

impl ArtifactContext {
    pub fn empty(target_artifact_name: impl Into<String>) -> Self {
        Self {
            blocks: Vec::new(),
            has_relevant_css: false,
            has_relevant_json: false,
            has_import_statements: false,
            target_artifact_name: target_artifact_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedChange {
    pub kind: String,
    pub original_text: String,
    pub new_text: String,
    pub line_number: usize,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    pub success: bool,
    /// Empty when `success` is false.
    pub transformed_code: String,
    pub confidence: f64,
    pub strategy: StrategyKind,
    pub applied_changes: Vec<AppliedChange>,
    pub error_message: Option<String>,
    pub validation_errors: Vec<String>,
    pub elapsed: Duration,
}

impl ResolutionResult {
    /// The strategy's precondition was not met; the executor tries the next one.
    pub fn not_applicable(strategy: StrategyKind, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            transformed_code: String::new(),
            confidence: 0.0,
            strategy,
            applied_changes: Vec::new(),
            error_message: Some(reason.into()),
            validation_errors: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn failed(
        strategy: StrategyKind,
        reason: impl Into<String>,
        validation_errors: Vec<String>,
    ) -> Self {
        Self {
            validation_errors,
            ..Self::not_applicable(strategy, reason)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStage {
    pub name: String,
    pub status: StageStatus,
    pub elapsed: Option<Duration>,
    pub error: Option<String>,
    pub detail: Option<String>,
}

impl RecoveryStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Pending,
            elapsed: None,
            error: None,
            detail: None,
        }
    }
}

/// The fixed outcome vocabulary reported to the UI. Everything the engine
/// returns names one of these, so callers can render category-appropriate
/// guidance without parsing free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyTag {
    Transform(StrategyKind),
    LlmFix(ErrorType),
    CircuitBreakerBlocked,
    ClassificationFailed,
    AllStrategiesFailed,
    ExecutionError,
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transform(kind) => f.write_str(kind.as_str()),
            Self::LlmFix(error_type) => write!(f, "LLM_{}-fix", error_type.as_str()),
            Self::CircuitBreakerBlocked => f.write_str("CIRCUIT_BREAKER_BLOCKED"),
            Self::ClassificationFailed => f.write_str("CLASSIFICATION_FAILED"),
            Self::AllStrategiesFailed => f.write_str("ALL_STRATEGIES_FAILED"),
            Self::ExecutionError => f.write_str("EXECUTION_ERROR"),
        }
    }
}

impl Serialize for StrategyTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl Serialize for CircuitState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub artifact_id: String,
    pub artifact_code: String,
    pub error_message: String,
    pub message_content: String,
    pub language: String,
    pub attempt_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub strategy: StrategyTag,
    pub confidence: f64,
    /// Present and syntax-valid whenever `success` is true.
    pub final_code: Option<String>,
    pub circuit_state: CircuitState,
    pub stages: Vec<RecoveryStage>,
    pub errors: Vec<String>,
    /// A newer attempt for the same artifact arrived while this one ran; the
    /// caller must discard this result instead of applying it.
    pub superseded: bool,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn syntax_and_network_are_unresolvable() {
        assert!(!ErrorType::Syntax.resolvable());
        assert!(!ErrorType::Network.resolvable());
        assert!(ErrorType::CssModule.resolvable());
        assert!(ErrorType::Import.resolvable());
        assert!(ErrorType::Bundling.resolvable());
        assert!(ErrorType::Dependency.resolvable());
    }

    #[test]
    fn strategy_priority_order_is_fixed() {
        assert!(StrategyKind::CssModuleConversion.priority() > StrategyKind::DirectCssInjection.priority());
        assert!(StrategyKind::DirectCssInjection.priority() > StrategyKind::JsonDataInlining.priority());
        assert!(StrategyKind::JsonDataInlining.priority() > StrategyKind::ImportRemoval.priority());
    }

    #[test]
    fn strategy_tags_render_the_fixed_vocabulary() {
        assert_eq!(
            StrategyTag::Transform(StrategyKind::CssModuleConversion).to_string(),
            "CSS_MODULE_CONVERSION"
        );
        assert_eq!(
            StrategyTag::LlmFix(ErrorType::CssModule).to_string(),
            "LLM_CSS_MODULE_ERROR-fix"
        );
        assert_eq!(StrategyTag::CircuitBreakerBlocked.to_string(), "CIRCUIT_BREAKER_BLOCKED");
        assert_eq!(StrategyTag::ClassificationFailed.to_string(), "CLASSIFICATION_FAILED");
        assert_eq!(StrategyTag::AllStrategiesFailed.to_string(), "ALL_STRATEGIES_FAILED");
        assert_eq!(StrategyTag::ExecutionError.to_string(), "EXECUTION_ERROR");
    }

    #[test]
    fn enums_serialize_as_vocabulary_strings() {
        assert_eq!(
            serde_json::to_string(&ErrorType::CssModule).expect("serialize should work"),
            "\"CSS_MODULE_ERROR\""
        );
        assert_eq!(
            serde_json::to_string(&StrategyKind::JsonDataInlining).expect("serialize should work"),
            "\"JSON_DATA_INLINING\""
        );
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).expect("serialize should work"),
            "\"HALF_OPEN\""
        );
    }

    #[test]
    fn strategy_tag_serializes_as_vocabulary_string() {
        let json = serde_json::to_string(&StrategyTag::Transform(StrategyKind::ImportRemoval))
            .expect("serialize should work");
        assert_eq!(json, "\"IMPORT_REMOVAL\"");
    }

    #[test]
    fn not_applicable_result_carries_no_code() {
        let result = ResolutionResult::not_applicable(StrategyKind::JsonDataInlining, "no json imports");
        assert!(!result.success);
        assert!(result.transformed_code.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.error_message.as_deref(), Some("no json imports"));
    }
}
