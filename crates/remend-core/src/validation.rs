//! Structural syntax check for recovered code.
//!
//! This is deliberately not a JavaScript parser. A successful recovery only
//! has to be structurally sound — balanced delimiters, terminated strings and
//! comments — before it is handed back to the caller; the real bundler is the
//! authority on everything else.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl SyntaxReport {
    fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    LineComment,
    BlockComment,
    Str(char),
    Template,
}

pub fn validate_code(code: &str) -> SyntaxReport {
    if code.trim().is_empty() {
        return SyntaxReport::invalid(vec!["code is empty".to_string()]);
    }

    let mut errors = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut state = ScanState::Normal;
    let mut line = 1usize;
    let mut string_start_line = 0usize;
    let mut prev: Option<char> = None;
    let mut chars = code.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\n' {
            line += 1;
        }

        match state {
            ScanState::Normal => match ch {
                '/' => match chars.peek() {
                    Some('/') => {
                        chars.next();
                        state = ScanState::LineComment;
                    }
                    Some('*') => {
                        chars.next();
                        string_start_line = line;
                        state = ScanState::BlockComment;
                    }
                    _ => {}
                },
                // A quote directly after a word character is prose in JSX
                // text ("Don't"), not a string delimiter.
                '\'' if prev.is_some_and(|p| p.is_ascii_alphanumeric()) => {}
                '\'' | '"' => {
                    string_start_line = line;
                    state = ScanState::Str(ch);
                }
                '`' => {
                    string_start_line = line;
                    state = ScanState::Template;
                }
                '{' | '(' | '[' => stack.push((ch, line)),
                '}' | ')' | ']' => {
                    let expected = match ch {
                        '}' => '{',
                        ')' => '(',
                        _ => '[',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_line)) => {
                            errors.push(format!(
                                "mismatched '{ch}' on line {line}; expected close for '{open}' opened on line {open_line}"
                            ));
                        }
                        None => {
                            errors.push(format!("unexpected '{ch}' on line {line}"));
                        }
                    }
                }
                _ => {}
            },
            ScanState::LineComment => {
                if ch == '\n' {
                    state = ScanState::Normal;
                }
            }
            ScanState::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = ScanState::Normal;
                }
            }
            ScanState::Str(quote) => match ch {
                '\\' => {
                    chars.next();
                }
                '\n' => {
                    errors.push(format!("unterminated string starting on line {string_start_line}"));
                    state = ScanState::Normal;
                }
                _ if ch == quote => state = ScanState::Normal,
                _ => {}
            },
            ScanState::Template => match ch {
                '\\' => {
                    chars.next();
                }
                '`' => state = ScanState::Normal,
                _ => {}
            },
        }

        prev = Some(ch);
    }

    match state {
        ScanState::Str(_) => {
            errors.push(format!("unterminated string starting on line {string_start_line}"));
        }
        ScanState::Template => {
            errors.push(format!(
                "unterminated template literal starting on line {string_start_line}"
            ));
        }
        ScanState::BlockComment => {
            errors.push(format!("unterminated block comment starting on line {string_start_line}"));
        }
        ScanState::Normal | ScanState::LineComment => {}
    }

    for (open, open_line) in stack {
        errors.push(format!("unclosed '{open}' opened on line {open_line}"));
    }

    if errors.is_empty() {
        SyntaxReport::ok()
    } else {
        SyntaxReport::invalid(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::validate_code;

    #[test]
    fn balanced_code_is_valid() {
        let report = validate_code("const x = { a: [1, 2], b: (3) };\nexport default x;");
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn empty_code_is_invalid() {
        let report = validate_code("   \n ");
        assert!(!report.is_valid);
    }

    #[test]
    fn unclosed_brace_is_reported_with_line() {
        let report = validate_code("function f() {\n  return 1;\n");
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("line 1"), "got {:?}", report.errors);
    }

    #[test]
    fn unterminated_string_is_reported() {
        let report = validate_code("const s = 'abc;\nconst t = 1;");
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("unterminated string"));
    }

    #[test]
    fn braces_inside_strings_and_comments_are_ignored() {
        let code = "const s = \"{ not a brace\";\n// also { not } one\n/* nor { this */\nconst t = {};";
        let report = validate_code(code);
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn template_literals_swallow_braces() {
        let report = validate_code("const css = `body { color: red; }`;");
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn jsx_text_apostrophes_are_not_string_delimiters() {
        let report = validate_code("const el = <div>Don't click this</div>;");
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn escaped_quotes_do_not_close_strings() {
        let report = validate_code("const s = 'it\\'s fine';");
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn mismatched_close_is_reported() {
        let report = validate_code("const a = [1, 2};");
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("mismatched"));
    }
}
