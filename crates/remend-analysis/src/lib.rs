mod classify;
mod context;

pub use classify::{
    RECOVERY_UI_THRESHOLD, calculate_resolution_confidence, classify_error, should_show_recovery_ui,
};
pub use context::{
    analyze_artifact_context, extract_code_blocks, has_import_statements, looks_like_css,
    looks_like_json,
};
