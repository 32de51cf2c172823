use remend_core::ErrorType;

use crate::LlmFixRequest;

/// Builds the fix prompt both providers send. Keep [`crate::PROMPT_VERSION`]
/// in sync with any wording change here.
pub fn build_fix_prompt(req: &LlmFixRequest) -> String {
    format!(
        "You repair broken generated UI code. Return only the corrected source file, no prose.\n\
         Error category: {}\n\
         Guidance: {}\n\
         Reported error:\n{}\n\
         SOURCE START\n{}\nSOURCE END",
        req.error_type.as_str(),
        category_guidance(req.error_type),
        req.error_message,
        req.artifact_code
    )
}

fn category_guidance(error_type: ErrorType) -> &'static str {
    match error_type {
        ErrorType::CssModule => {
            "Replace CSS module imports with inline style objects; keep class usage working."
        }
        ErrorType::Import => {
            "Remove or inline imports of files that do not exist; keep the component self-contained."
        }
        ErrorType::Bundling => {
            "Restrict the file to dependencies the sandbox can resolve; prefer plain React."
        }
        ErrorType::Syntax => "Fix the syntax error with the smallest possible edit.",
        ErrorType::Network => "Remove the dependency on unreachable network resources.",
        ErrorType::Dependency => {
            "Make the file self-contained; drop packages that cannot be installed."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_the_category_and_wraps_the_source() {
        let req = LlmFixRequest {
            artifact_code: "import x from './x.json';".to_string(),
            error_message: "Cannot find module './x.json'".to_string(),
            error_type: ErrorType::Import,
            artifact_id: "a".to_string(),
        };
        let prompt = build_fix_prompt(&req);
        assert!(prompt.contains("IMPORT_ERROR"));
        assert!(prompt.contains("SOURCE START\nimport x from './x.json';\nSOURCE END"));
        assert!(prompt.contains("Cannot find module"));
    }

    #[test]
    fn every_category_has_guidance() {
        for error_type in [
            ErrorType::CssModule,
            ErrorType::Import,
            ErrorType::Bundling,
            ErrorType::Syntax,
            ErrorType::Network,
            ErrorType::Dependency,
        ] {
            assert!(!category_guidance(error_type).is_empty());
        }
    }
}
