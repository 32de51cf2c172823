use remend_core::{ArtifactContext, Classification, ErrorType, StrategyKind, clamp_confidence};

/// Recovery UI is only offered above this resolution confidence.
pub const RECOVERY_UI_THRESHOLD: f64 = 0.7;

/// Maps a raw bundler/renderer error message to an error category. Rules are
/// checked top-down and the first match wins; confidences are assigned per
/// rule, not derived from the message text.
pub fn classify_error(error_message: &str, artifact_code: &str) -> Classification {
    let msg = error_message.to_ascii_lowercase();
    let unresolved = mentions_unresolved_module(&msg);

    if unresolved && msg.contains(".module.css") {
        return resolved(
            ErrorType::CssModule,
            0.95,
            Some(StrategyKind::CssModuleConversion),
            "unresolved CSS module import",
        );
    }

    if unresolved && msg.contains(".css") {
        return resolved(
            ErrorType::CssModule,
            0.9,
            Some(StrategyKind::DirectCssInjection),
            "unresolved plain CSS import",
        );
    }

    if unresolved && msg.contains(".json") {
        return resolved(
            ErrorType::Import,
            0.9,
            Some(StrategyKind::JsonDataInlining),
            "unresolved JSON import",
        );
    }

    if msg.contains("unexpected token")
        || msg.contains("syntax error")
        || msg.contains("parse error")
        || msg.contains("unexpected end of input")
    {
        return unresolvable(ErrorType::Syntax, 0.9, "syntax failure in the artifact itself");
    }

    if msg.contains("network")
        || msg.contains("fetch failed")
        || msg.contains("failed to fetch")
        || msg.contains("dns")
        || msg.contains("econnrefused")
        || msg.contains("etimedout")
        || msg.contains("socket hang up")
    {
        return unresolvable(ErrorType::Network, 0.85, "transport failure, nothing to rewrite");
    }

    if msg.contains("bundling") || msg.contains("failed to resolve dependencies") || msg.contains("sandpack") {
        return resolved(ErrorType::Bundling, 0.8, None, "bundler-level dependency failure");
    }

    if unresolved {
        // The message names no extension; let the artifact's own imports break
        // the tie before falling back to plain removal.
        if artifact_has_import_with(artifact_code, ".module.css") {
            return resolved(
                ErrorType::CssModule,
                0.85,
                Some(StrategyKind::CssModuleConversion),
                "unresolved module; artifact imports a CSS module",
            );
        }
        if artifact_has_import_with(artifact_code, ".json") {
            return resolved(
                ErrorType::Import,
                0.85,
                Some(StrategyKind::JsonDataInlining),
                "unresolved module; artifact imports a JSON file",
            );
        }
        return resolved(
            ErrorType::Import,
            0.85,
            Some(StrategyKind::ImportRemoval),
            "unresolved module import",
        );
    }

    if msg.contains("dependency") {
        return resolved(ErrorType::Dependency, 0.7, None, "generic dependency failure");
    }

    resolved(
        ErrorType::Dependency,
        0.3,
        None,
        "no rule matched; low-confidence fallback",
    )
}

fn mentions_unresolved_module(msg: &str) -> bool {
    msg.contains("cannot resolve")
        || msg.contains("could not resolve")
        || msg.contains("module not found")
        || msg.contains("cannot find module")
        || msg.contains("failed to resolve import")
}

fn artifact_has_import_with(artifact_code: &str, needle: &str) -> bool {
    artifact_code
        .lines()
        .map(str::trim_start)
        .any(|line| line.starts_with("import") && line.contains(needle))
}

fn resolved(
    error_type: ErrorType,
    confidence: f64,
    suggested_strategy: Option<StrategyKind>,
    reasoning: &str,
) -> Classification {
    Classification {
        error_type,
        confidence: clamp_confidence(confidence),
        can_resolve: true,
        suggested_strategy,
        reasoning: Some(reasoning.to_string()),
    }
}

fn unresolvable(error_type: ErrorType, confidence: f64, reasoning: &str) -> Classification {
    Classification {
        error_type,
        confidence: clamp_confidence(confidence),
        can_resolve: false,
        suggested_strategy: None,
        reasoning: Some(reasoning.to_string()),
    }
}

/// Combines classification confidence with what the surrounding message
/// actually offers. More available evidence never lowers the score; a missing
/// block of the expected kind hard-caps it below 0.5.
pub fn calculate_resolution_confidence(
    classification: &Classification,
    context: &ArtifactContext,
) -> f64 {
    // CSS/JSON strategies need their specific block kind; every other
    // category needs at least one block to work from.
    let block_available = match classification.suggested_strategy {
        Some(StrategyKind::CssModuleConversion) | Some(StrategyKind::DirectCssInjection) => {
            context.has_relevant_css
        }
        Some(StrategyKind::JsonDataInlining) => context.has_relevant_json,
        Some(StrategyKind::ImportRemoval) | None => !context.blocks.is_empty(),
    };

    if !block_available {
        return clamp_confidence(classification.confidence.min(0.45));
    }

    clamp_confidence((classification.confidence + 0.15).min(0.95))
}

pub fn should_show_recovery_ui(classification: &Classification) -> bool {
    classification.can_resolve && classification.confidence > RECOVERY_UI_THRESHOLD
}
