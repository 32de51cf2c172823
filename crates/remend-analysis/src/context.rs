use remend_core::{ArtifactContext, CodeBlock};

/// Pull every fenced code region out of a chat message, in document order.
/// Malformed fences are never dropped: a fence left open at end of input
/// still yields a block with whatever content followed it.
pub fn extract_code_blocks(message: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(Option<String>, Vec<&str>)> = None;

    for line in message.lines() {
        let trimmed = line.trim();
        match current.as_mut() {
            None => {
                if let Some(rest) = trimmed.strip_prefix("```") {
                    let tag = rest
                        .split_whitespace()
                        .next()
                        .map(|t| t.to_ascii_lowercase());
                    current = Some((tag, Vec::new()));
                }
            }
            Some((_, lines)) => {
                if trimmed == "```" {
                    let (tag, lines) = current.take().expect("fence state must exist");
                    blocks.push(CodeBlock {
                        language: tag,
                        content: lines.join("\n"),
                    });
                } else {
                    lines.push(line);
                }
            }
        }
    }

    if let Some((tag, lines)) = current {
        blocks.push(CodeBlock {
            language: tag,
            content: lines.join("\n"),
        });
    }

    blocks
}

pub fn looks_like_css(block: &CodeBlock) -> bool {
    if let Some(tag) = block.language_tag() {
        return matches!(tag, "css" | "scss" | "less");
    }
    let head = block.content.trim_start();
    (head.starts_with('.') || head.starts_with('#') || head.starts_with('@'))
        && block.content.contains('{')
}

pub fn looks_like_json(block: &CodeBlock) -> bool {
    if let Some(tag) = block.language_tag() {
        return matches!(tag, "json" | "jsonc" | "json5");
    }
    let trimmed = block.content.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

pub fn has_import_statements(code: &str) -> bool {
    code.lines()
        .any(|line| line.trim_start().starts_with("import"))
}

pub fn analyze_artifact_context(
    message_content: &str,
    artifact_code: &str,
    artifact_name: &str,
) -> ArtifactContext {
    let blocks = extract_code_blocks(message_content);
    let has_relevant_css = blocks.iter().any(looks_like_css);
    let has_relevant_json = blocks.iter().any(looks_like_json);

    ArtifactContext {
        has_relevant_css,
        has_relevant_json,
        has_import_statements: has_import_statements(artifact_code),
        target_artifact_name: artifact_name.to_string(),
        blocks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_blocks_in_document_order() {
        let message = "intro\n```css\n.a { color: red; }\n```\ntext\n```json\n{\"k\": 1}\n```\n";
        let blocks = extract_code_blocks(message);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language.as_deref(), Some("css"));
        assert_eq!(blocks[0].content, ".a { color: red; }");
        assert_eq!(blocks[1].language.as_deref(), Some("json"));
    }

    #[test]
    fn unlabeled_fence_has_no_language() {
        let blocks = extract_code_blocks("```\nplain text\n```");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, None);
        assert_eq!(blocks[0].content, "plain text");
    }

    #[test]
    fn fence_info_string_keeps_only_first_token() {
        let blocks = extract_code_blocks("```tsx title=App.tsx\nconst x = 1;\n```");
        assert_eq!(blocks[0].language.as_deref(), Some("tsx"));
    }

    #[test]
    fn unclosed_fence_is_not_dropped() {
        let blocks = extract_code_blocks("```css\n.a { color: red; }");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, ".a { color: red; }");
    }

    #[test]
    fn empty_message_yields_empty_list() {
        assert!(extract_code_blocks("").is_empty());
        assert!(extract_code_blocks("no fences here").is_empty());
    }

    #[test]
    fn duplicate_language_blocks_are_all_kept() {
        let message = "```css\n.a {}\n```\n```css\n.b {}\n```";
        let blocks = extract_code_blocks(message);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn css_sniffing_covers_tagged_and_untagged_blocks() {
        let tagged = CodeBlock {
            language: Some("css".to_string()),
            content: "whatever".to_string(),
        };
        assert!(looks_like_css(&tagged));

        let untagged = CodeBlock {
            language: None,
            content: ".btn { color: red; }".to_string(),
        };
        assert!(looks_like_css(&untagged));

        let not_css = CodeBlock {
            language: None,
            content: "const a = 1;".to_string(),
        };
        assert!(!looks_like_css(&not_css));
    }

    #[test]
    fn json_sniffing_accepts_untagged_object_blocks() {
        let block = CodeBlock {
            language: None,
            content: "{\"a\": 1}".to_string(),
        };
        assert!(looks_like_json(&block));

        let jsx = CodeBlock {
            language: Some("jsx".to_string()),
            content: "{\"a\": 1}".to_string(),
        };
        assert!(!looks_like_json(&jsx));
    }

    #[test]
    fn context_flags_reflect_blocks_and_artifact_code() {
        let message = "```css\n.a { color: red; }\n```";
        let code = "import styles from \"./A.module.css\";\nexport default () => null;";
        let ctx = analyze_artifact_context(message, code, "artifact-1");

        assert!(ctx.has_relevant_css);
        assert!(!ctx.has_relevant_json);
        assert!(ctx.has_import_statements);
        assert_eq!(ctx.target_artifact_name, "artifact-1");
        assert_eq!(ctx.blocks.len(), 1);
    }

    #[test]
    fn empty_context_has_no_flags_set() {
        let ctx = analyze_artifact_context("", "const x = 1;", "a");
        assert!(ctx.blocks.is_empty());
        assert!(!ctx.has_relevant_css);
        assert!(!ctx.has_relevant_json);
        assert!(!ctx.has_import_statements);
    }
}
