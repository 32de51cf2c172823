use std::time::Instant;

use anyhow::Result;
use remend_analysis::looks_like_json;
use remend_core::{
    AppliedChange, ArtifactContext, ResolutionResult, StrategyKind, clamp_confidence,
    validate_code,
};
use serde_json::Value;

use crate::TransformStrategy;
use crate::imports::{ImportStatement, scan_imports};

/// Makes chat-grade JSON parseable: strips `//` and `/* */` comments and
/// trailing commas, leaving string contents untouched.
pub(crate) fn normalize_near_json(input: &str) -> String {
    let mut no_comments = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;
    while let Some(ch) = chars.next() {
        if in_string {
            no_comments.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                no_comments.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|c| *c != '\n') {
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            _ => no_comments.push(ch),
        }
    }

    let text: Vec<char> = no_comments.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &ch) in text.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let next = text[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Renders a parsed value as a JS literal. Object keys that are valid JS
/// identifiers are left unquoted, the way a person would write the constant.
pub(crate) fn json_to_js(value: &Value) -> String {
    render(value, 0)
}

fn render(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(_) => value.to_string(),
        Value::Array(items) => {
            if items.is_empty() {
                return "[]".to_string();
            }
            let pad = "  ".repeat(indent + 1);
            let close = "  ".repeat(indent);
            let body = items
                .iter()
                .map(|item| format!("{pad}{}", render(item, indent + 1)))
                .collect::<Vec<_>>()
                .join(",\n");
            format!("[\n{body}\n{close}]")
        }
        Value::Object(map) => {
            if map.is_empty() {
                return "{}".to_string();
            }
            let pad = "  ".repeat(indent + 1);
            let close = "  ".repeat(indent);
            let body = map
                .iter()
                .map(|(key, item)| format!("{pad}{}: {}", js_object_key(key), render(item, indent + 1)))
                .collect::<Vec<_>>()
                .join(",\n");
            format!("{{\n{body}\n{close}}}")
        }
    }
}

fn js_object_key(key: &str) -> String {
    let ident = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if ident {
        key.to_string()
    } else {
        Value::String(key.to_string()).to_string()
    }
}

/// Replaces `*.json` imports with `const <binding> = <literal>;` built from
/// the JSON blocks found in the message, paired up in document order.
pub struct JsonDataInlining;

impl TransformStrategy for JsonDataInlining {
    fn kind(&self) -> StrategyKind {
        StrategyKind::JsonDataInlining
    }

    fn apply(&self, artifact_code: &str, context: &ArtifactContext) -> Result<ResolutionResult> {
        let started = Instant::now();
        let json_imports: Vec<ImportStatement> = scan_imports(artifact_code)
            .into_iter()
            .filter(ImportStatement::is_json)
            .collect();
        if json_imports.is_empty() {
            return Ok(ResolutionResult::not_applicable(
                self.kind(),
                "artifact has no JSON imports",
            ));
        }

        let json_blocks: Vec<&str> = context
            .blocks
            .iter()
            .filter(|block| looks_like_json(block))
            .map(|block| block.content.as_str())
            .collect();
        if json_blocks.is_empty() {
            return Ok(ResolutionResult::not_applicable(
                self.kind(),
                "message context carries no JSON blocks",
            ));
        }

        let mut notes = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        for block in &json_blocks {
            match serde_json::from_str::<Value>(&normalize_near_json(block)) {
                Ok(value) => values.push(value),
                Err(err) => notes.push(format!("JSON block did not parse: {err}")),
            }
        }
        if values.is_empty() {
            return Ok(ResolutionResult::failed(
                self.kind(),
                "no JSON block in the message parsed cleanly",
                notes,
            ));
        }

        let mut applied_changes = Vec::new();
        let mut replacements: Vec<(usize, String)> = Vec::new();
        let total = json_imports.len();
        let mut resolved = 0usize;
        for import in &json_imports {
            let Some(binding) = &import.binding else {
                notes.push(format!(
                    "import of '{}' introduces no binding; left as-is",
                    import.path
                ));
                continue;
            };
            let Some(value) = values.get(resolved) else {
                notes.push(format!(
                    "no JSON block left to pair with import of '{}'",
                    import.path
                ));
                continue;
            };
            let constant = format!("const {binding} = {};", json_to_js(value));
            applied_changes.push(AppliedChange {
                kind: "json-data-inlining".to_string(),
                original_text: import.raw.clone(),
                new_text: constant.clone(),
                line_number: import.line_index + 1,
                description: format!("inlined '{}' as a literal constant", import.path),
            });
            replacements.push((import.line_index, constant));
            resolved += 1;
        }

        if resolved == 0 {
            return Ok(ResolutionResult::failed(
                self.kind(),
                "no JSON import could be paired with message data",
                notes,
            ));
        }

        let transformed: String = artifact_code
            .lines()
            .enumerate()
            .map(|(index, line)| {
                replacements
                    .iter()
                    .find(|(replaced, _)| *replaced == index)
                    .map(|(_, text)| text.as_str())
                    .unwrap_or(line)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let report = validate_code(&transformed);
        if !report.is_valid {
            return Ok(ResolutionResult::failed(
                self.kind(),
                "JSON inlining produced syntactically invalid output",
                report.errors,
            ));
        }

        Ok(ResolutionResult {
            success: true,
            transformed_code: transformed,
            confidence: clamp_confidence(0.6 + 0.3 * resolved as f64 / total as f64),
            strategy: self.kind(),
            applied_changes,
            error_message: None,
            validation_errors: notes,
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remend_analysis::analyze_artifact_context;

    #[test]
    fn normalization_strips_comments_and_trailing_commas() {
        let near = "{\n  // endpoint\n  \"url\": \"https://x\", /* note */\n  \"items\": [1, 2,],\n}";
        let value: Value =
            serde_json::from_str(&normalize_near_json(near)).expect("parse should work");
        assert_eq!(value["url"], "https://x");
        assert_eq!(value["items"], serde_json::json!([1, 2]));
    }

    #[test]
    fn normalization_leaves_string_contents_alone() {
        let near = "{\"url\": \"http://host//path\", \"note\": \"a, b,\"}";
        let value: Value =
            serde_json::from_str(&normalize_near_json(near)).expect("parse should work");
        assert_eq!(value["url"], "http://host//path");
        assert_eq!(value["note"], "a, b,");
    }

    #[test]
    fn js_rendering_unquotes_identifier_keys() {
        let value = serde_json::json!({
            "apiUrl": "https://api.example.com",
            "retry-count": 3,
            "nested": { "flag": true, "nothing": null },
            "list": [1, "two"]
        });
        let js = json_to_js(&value);
        assert!(js.contains("apiUrl: \"https://api.example.com\""));
        assert!(js.contains("\"retry-count\": 3"));
        assert!(js.contains("flag: true"));
        assert!(js.contains("nothing: null"));
        assert!(js.contains("\"two\""));
        assert!(!js.contains("\"apiUrl\""));
    }

    #[test]
    fn js_rendering_keeps_numbers_exact() {
        let value = serde_json::json!({ "timeout": 5000, "ratio": 0.25, "big": 9007199254740991i64 });
        let js = json_to_js(&value);
        assert!(js.contains("timeout: 5000"));
        assert!(js.contains("ratio: 0.25"));
        assert!(js.contains("big: 9007199254740991"));
    }

    #[test]
    fn inlines_a_json_import_as_a_constant() {
        let code = concat!(
            "import config from './config.json';\n",
            "export default function App() { return <div>{config.apiUrl}</div>; }\n",
        );
        let message =
            "```json\n{\n  \"apiUrl\": \"https://api.example.com\",\n  \"timeout\": 5000\n}\n```";
        let context = analyze_artifact_context(message, code, "app");

        let result = JsonDataInlining
            .apply(code, &context)
            .expect("apply should work");
        assert!(result.success, "errors: {:?}", result.validation_errors);
        assert!(result.transformed_code.contains("const config = {"));
        assert!(result.transformed_code.contains("apiUrl: \"https://api.example.com\""));
        assert!(result.transformed_code.contains("timeout: 5000"));
        assert!(!result.transformed_code.contains("./config.json"));
        assert!(result.confidence > 0.85);
    }

    #[test]
    fn unparsable_blocks_fail_with_a_note() {
        let code = "import data from './data.json';\n";
        let message = "```json\n{not json at all\n```";
        let context = analyze_artifact_context(message, code, "a");
        let result = JsonDataInlining
            .apply(code, &context)
            .expect("apply should work");
        assert!(!result.success);
        assert!(result.validation_errors.iter().any(|n| n.contains("did not parse")));
    }

    #[test]
    fn no_json_blocks_means_not_applicable() {
        let code = "import data from './data.json';\n";
        let context = analyze_artifact_context("just prose", code, "a");
        let result = JsonDataInlining
            .apply(code, &context)
            .expect("apply should work");
        assert!(!result.success);
        assert!(result.validation_errors.is_empty());
    }
}
