use anyhow::Result;
use remend_core::{ArtifactContext, ResolutionResult, StrategyKind};

mod css;
mod imports;
mod json;

pub use css::{CssModuleConversion, DirectCssInjection};
pub use imports::{
    ImportRemoval, ImportStatement, binding_is_referenced, member_references, scan_imports,
};
pub use json::JsonDataInlining;

/// A deterministic code rewrite attempted before any LLM round trip.
///
/// `apply` returns `Ok` with `success: false` when the strategy's
/// precondition is unmet or the rewrite came out invalid; `Err` is reserved
/// for faults the executor should report as execution errors.
pub trait TransformStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn apply(&self, artifact_code: &str, context: &ArtifactContext) -> Result<ResolutionResult>;
}

/// All built-in strategies, highest priority first.
pub fn ordered_strategies() -> Vec<Box<dyn TransformStrategy>> {
    let mut strategies: Vec<Box<dyn TransformStrategy>> = vec![
        Box::new(ImportRemoval),
        Box::new(JsonDataInlining),
        Box::new(DirectCssInjection),
        Box::new(CssModuleConversion),
    ];
    strategies.sort_by_key(|strategy| std::cmp::Reverse(strategy.kind().priority()));
    strategies
}
