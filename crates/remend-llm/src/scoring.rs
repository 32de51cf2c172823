use remend_core::{clamp_confidence, validate_code};

/// Heuristic confidence for an LLM-produced fix. Syntax validity carries the
/// bulk of the score; removing the failing token and staying close to the
/// original length add the rest.
pub fn score_fix_confidence(original: &str, fixed: &str, error_message: &str) -> f64 {
    let mut score = 0.0;

    if validate_code(fixed).is_valid {
        score += 0.5;
    }

    if let Some(token) = extract_failing_token(error_message) {
        if original.contains(&token) && !fixed.contains(&token) {
            score += 0.25;
        }
    }

    let (short, long) = if original.len() <= fixed.len() {
        (original.len(), fixed.len())
    } else {
        (fixed.len(), original.len())
    };
    if long > 0 {
        score += 0.25 * (short as f64 / long as f64);
    }

    clamp_confidence(score)
}

/// The quoted path or module name an error complains about, when present.
/// Only tokens that look like file paths or module specifiers qualify.
pub fn extract_failing_token(error_message: &str) -> Option<String> {
    let mut chars = error_message.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\'' && ch != '"' {
            continue;
        }
        let mut token = String::new();
        let mut closed = false;
        for inner in chars.by_ref() {
            if inner == ch {
                closed = true;
                break;
            }
            token.push(inner);
        }
        if closed && !token.is_empty() && (token.contains('.') || token.contains('/')) {
            return Some(token);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_token_is_the_quoted_specifier() {
        assert_eq!(
            extract_failing_token("Cannot resolve './Button.module.css'"),
            Some("./Button.module.css".to_string())
        );
        assert_eq!(
            extract_failing_token("Cannot find module \"lodash/merge\""),
            Some("lodash/merge".to_string())
        );
    }

    #[test]
    fn plain_quoted_words_do_not_qualify() {
        assert_eq!(extract_failing_token("Unexpected token '}'"), None);
        assert_eq!(extract_failing_token("no quotes at all"), None);
    }

    #[test]
    fn valid_fix_that_removes_the_token_scores_high() {
        let original = "import styles from './A.module.css';\nconst x = styles.a;";
        let fixed = "const styles = { a: 'x' };\nconst x = styles.a;";
        let score = score_fix_confidence(original, fixed, "Cannot resolve './A.module.css'");
        assert!(score > 0.85, "got {score}");
    }

    #[test]
    fn invalid_fix_scores_low() {
        let score = score_fix_confidence("const x = 1;", "const x = {;", "Unexpected token");
        assert!(score < 0.5, "got {score}");
    }

    #[test]
    fn score_is_always_in_the_unit_interval() {
        let score = score_fix_confidence("", "", "");
        assert!((0.0..=1.0).contains(&score));
    }
}
