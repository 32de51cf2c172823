use std::collections::BTreeSet;
use std::time::Instant;

use anyhow::Result;
use remend_analysis::looks_like_css;
use remend_core::{
    AppliedChange, ArtifactContext, ResolutionResult, StrategyKind, clamp_confidence,
    validate_code,
};

use crate::TransformStrategy;
use crate::imports::{ImportStatement, member_references, scan_imports};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CssRule {
    pub selector: String,
    pub declarations: Vec<(String, String)>,
}

/// Outcome of the tolerant CSS scan. Fragments that cannot be interpreted are
/// noted and skipped rather than failing the whole block.
#[derive(Debug, Default)]
pub(crate) struct ParsedCss {
    pub rules: Vec<CssRule>,
    /// At-rules carried through verbatim; they have no style-object encoding.
    pub preserved_at_rules: Vec<String>,
    pub notes: Vec<String>,
}

pub(crate) fn parse_css(source: &str) -> ParsedCss {
    let text: Vec<char> = strip_comments(source).chars().collect();
    let mut parsed = ParsedCss::default();
    let mut i = 0;

    while i < text.len() {
        while i < text.len() && text[i].is_whitespace() {
            i += 1;
        }
        if i >= text.len() {
            break;
        }

        if text[i] == '@' {
            let (end, note) = at_rule_end(&text, i);
            let body: String = text[i..end].iter().collect();
            parsed.preserved_at_rules.push(body.trim().to_string());
            if let Some(note) = note {
                parsed.notes.push(note);
            }
            i = end;
            continue;
        }

        let selector_start = i;
        while i < text.len() && text[i] != '{' && text[i] != '}' {
            i += 1;
        }
        if i >= text.len() {
            parsed
                .notes
                .push("trailing tokens without a block were skipped".to_string());
            break;
        }
        if text[i] == '}' {
            parsed.notes.push("stray '}' skipped".to_string());
            i += 1;
            continue;
        }

        let selector: String = text[selector_start..i].iter().collect();
        let selector = selector.trim().to_string();
        i += 1;

        let body_start = i;
        let mut depth = 1usize;
        let mut nested = false;
        while i < text.len() && depth > 0 {
            match text[i] {
                '{' => {
                    depth += 1;
                    nested = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
            i += 1;
        }
        let body_end = if depth == 0 {
            i - 1
        } else {
            parsed.notes.push(format!("unterminated block for '{selector}'"));
            i
        };

        if nested {
            parsed
                .notes
                .push(format!("nested block inside rule '{selector}' skipped"));
            continue;
        }
        if selector.is_empty() {
            parsed.notes.push("rule with empty selector skipped".to_string());
            continue;
        }

        let body: String = text[body_start..body_end].iter().collect();
        let mut declarations = Vec::new();
        for declaration in body.split(';') {
            let declaration = declaration.trim();
            if declaration.is_empty() {
                continue;
            }
            match declaration.split_once(':') {
                Some((property, value)) if !property.trim().is_empty() && !value.trim().is_empty() => {
                    declarations.push((property.trim().to_string(), value.trim().to_string()));
                }
                _ => parsed.notes.push(format!(
                    "malformed declaration '{declaration}' in '{selector}' skipped"
                )),
            }
        }
        parsed.rules.push(CssRule { selector, declarations });
    }

    parsed
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = '\0';
            for inner in chars.by_ref() {
                if prev == '*' && inner == '/' {
                    break;
                }
                prev = inner;
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// End index of the at-rule starting at `start`: past the closing `;` for
/// statement forms, past the matching `}` for block forms.
fn at_rule_end(text: &[char], start: usize) -> (usize, Option<String>) {
    let mut i = start;
    while i < text.len() && text[i] != '{' && text[i] != ';' {
        i += 1;
    }
    if i >= text.len() {
        return (i, Some("unterminated at-rule preserved as-is".to_string()));
    }
    if text[i] == ';' {
        return (i + 1, None);
    }
    let mut depth = 0usize;
    while i < text.len() {
        match text[i] {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return (i + 1, None);
                }
            }
            _ => {}
        }
        i += 1;
    }
    (i, Some("unterminated at-rule preserved as-is".to_string()))
}

/// `.primary-button` -> `primary-button`; anything beyond a single class
/// selector (descendants, pseudo-classes, element selectors) yields `None`.
fn simple_class(selector: &str) -> Option<&str> {
    let name = selector.strip_prefix('.')?;
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    ok.then_some(name)
}

pub(crate) fn kebab_to_camel(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut upper_next = false;
    for ch in input.chars() {
        if ch == '-' {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn quote_single(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Class name to style-object entries, in first-seen order. A class defined
/// twice merges; a property defined twice keeps the later value, matching the
/// cascade the stylesheet would have applied.
fn merge_class_rules(blocks: &[&ParsedCss], notes: &mut Vec<String>) -> Vec<(String, Vec<(String, String)>)> {
    let mut classes: Vec<(String, Vec<(String, String)>)> = Vec::new();
    for parsed in blocks {
        for rule in &parsed.rules {
            for selector in rule.selector.split(',') {
                let selector = selector.trim();
                let Some(class) = simple_class(selector) else {
                    notes.push(format!(
                        "selector '{selector}' is not a single class and was skipped"
                    ));
                    continue;
                };
                let index = match classes.iter().position(|(name, _)| name == class) {
                    Some(index) => index,
                    None => {
                        classes.push((class.to_string(), Vec::new()));
                        classes.len() - 1
                    }
                };
                let entry = &mut classes[index];
                for (property, value) in &rule.declarations {
                    match entry.1.iter_mut().find(|(p, _)| p == property) {
                        Some(existing) => existing.1 = value.clone(),
                        None => entry.1.push((property.clone(), value.clone())),
                    }
                }
            }
        }
    }
    classes
}

fn object_key(name: &str) -> String {
    let ident = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if ident { name.to_string() } else { quote_single(name) }
}

fn build_style_object(
    binding: &str,
    classes: &[(String, Vec<(String, String)>)],
    refs: &BTreeSet<String>,
) -> String {
    let mut out = format!("const {binding} = {{\n");
    for (class, declarations) in classes {
        // Keys follow the camelCase convention unless the artifact reaches
        // for the raw kebab name via bracket access.
        let key = if refs.contains(class) {
            class.clone()
        } else if class.contains('-') {
            kebab_to_camel(class)
        } else {
            class.clone()
        };
        out.push_str(&format!("  {}: {{\n", object_key(&key)));
        for (property, value) in declarations {
            out.push_str(&format!(
                "    {}: {},\n",
                object_key(&kebab_to_camel(property)),
                quote_single(value)
            ));
        }
        out.push_str("  },\n");
    }
    out.push_str("};");
    out
}

fn class_matches_refs(class: &str, refs: &BTreeSet<String>) -> bool {
    refs.contains(class) || refs.contains(kebab_to_camel(class).as_str())
}

/// Highest-priority strategy: replaces each `*.module.css` import with a
/// plain style object reconstructed from the CSS blocks in the message.
pub struct CssModuleConversion;

impl TransformStrategy for CssModuleConversion {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CssModuleConversion
    }

    fn apply(&self, artifact_code: &str, context: &ArtifactContext) -> Result<ResolutionResult> {
        let started = Instant::now();
        let module_imports: Vec<ImportStatement> = scan_imports(artifact_code)
            .into_iter()
            .filter(ImportStatement::is_css_module)
            .collect();
        if module_imports.is_empty() {
            return Ok(ResolutionResult::not_applicable(
                self.kind(),
                "artifact has no CSS module imports",
            ));
        }

        let parsed_blocks: Vec<ParsedCss> = context
            .blocks
            .iter()
            .filter(|block| looks_like_css(block))
            .map(|block| parse_css(&block.content))
            .collect();
        if parsed_blocks.is_empty() {
            return Ok(ResolutionResult::not_applicable(
                self.kind(),
                "message context carries no CSS blocks",
            ));
        }

        let mut notes: Vec<String> = parsed_blocks
            .iter()
            .flat_map(|parsed| parsed.notes.iter().cloned())
            .collect();
        let mut applied_changes = Vec::new();
        let mut replacements: Vec<(usize, String)> = Vec::new();
        let total = module_imports.len();
        let mut resolved = 0usize;

        for import in &module_imports {
            let Some(binding) = &import.binding else {
                notes.push(format!(
                    "import of '{}' introduces no binding; left as-is",
                    import.path
                ));
                continue;
            };
            let refs = member_references(artifact_code, binding);

            // Prefer blocks that define a referenced class; when nothing
            // matches (or nothing is referenced yet), take every block.
            let matching: Vec<&ParsedCss> = parsed_blocks
                .iter()
                .filter(|parsed| {
                    parsed.rules.iter().any(|rule| {
                        rule.selector
                            .split(',')
                            .filter_map(|s| simple_class(s.trim()))
                            .any(|class| class_matches_refs(class, &refs))
                    })
                })
                .collect();
            let chosen: Vec<&ParsedCss> = if refs.is_empty() || matching.is_empty() {
                parsed_blocks.iter().collect()
            } else {
                matching
            };

            let classes = merge_class_rules(&chosen, &mut notes);
            if classes.is_empty() {
                notes.push(format!(
                    "no class rules found in the message for '{}'",
                    import.path
                ));
                continue;
            }

            let object = build_style_object(binding, &classes, &refs);
            applied_changes.push(AppliedChange {
                kind: "css-module-conversion".to_string(),
                original_text: import.raw.clone(),
                new_text: object.clone(),
                line_number: import.line_index + 1,
                description: format!(
                    "replaced import of '{}' with a style object of {} classes",
                    import.path,
                    classes.len()
                ),
            });
            replacements.push((import.line_index, object));
            resolved += 1;
        }

        if resolved == 0 {
            return Ok(ResolutionResult::failed(
                self.kind(),
                "no CSS module import could be matched to message CSS",
                notes,
            ));
        }

        for at_rule in parsed_blocks
            .iter()
            .flat_map(|parsed| parsed.preserved_at_rules.iter())
        {
            applied_changes.push(AppliedChange {
                kind: "css-at-rule-preserved".to_string(),
                original_text: at_rule.clone(),
                new_text: String::new(),
                line_number: 0,
                description: "at-rule has no style-object encoding and was left out".to_string(),
            });
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
                "CSS module conversion produced syntactically invalid output",
                report.errors,
            ));
        }

        Ok(ResolutionResult {
            success: true,
            transformed_code: transformed,
            confidence: clamp_confidence(0.6 + 0.35 * resolved as f64 / total as f64),
            strategy: self.kind(),
            applied_changes,
            error_message: None,
            validation_errors: notes,
            elapsed: started.elapsed(),
        })
    }
}

/// Replaces plain `.css` imports with a runtime `<style>` injection carrying
/// the message's CSS verbatim, at-rules included.
pub struct DirectCssInjection;

impl TransformStrategy for DirectCssInjection {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectCssInjection
    }

    fn apply(&self, artifact_code: &str, context: &ArtifactContext) -> Result<ResolutionResult> {
        let started = Instant::now();
        let plain_imports: Vec<ImportStatement> = scan_imports(artifact_code)
            .into_iter()
            .filter(ImportStatement::is_plain_css)
            .collect();
        if plain_imports.is_empty() {
            return Ok(ResolutionResult::not_applicable(
                self.kind(),
                "artifact has no plain CSS imports",
            ));
        }

        let css_text: Vec<&str> = context
            .blocks
            .iter()
            .filter(|block| looks_like_css(block))
            .map(|block| block.content.as_str())
            .collect();
        if css_text.is_empty() {
            return Ok(ResolutionResult::not_applicable(
                self.kind(),
                "message context carries no CSS blocks",
            ));
        }

        let snippet = injection_snippet(&css_text.join("\n\n"));
        let mut applied_changes = Vec::new();
        let mut transformed_lines: Vec<&str> = artifact_code.lines().collect();
        let mut replaced_lines: Vec<(usize, &str)> = Vec::new();
        for (position, import) in plain_imports.iter().enumerate() {
            // The first import becomes the injection; duplicates just go away.
            let new_text = if position == 0 { snippet.as_str() } else { "" };
            replaced_lines.push((import.line_index, new_text));
            applied_changes.push(AppliedChange {
                kind: "direct-css-injection".to_string(),
                original_text: import.raw.clone(),
                new_text: new_text.to_string(),
                line_number: import.line_index + 1,
                description: if position == 0 {
                    format!("replaced import of '{}' with a <style> injection", import.path)
                } else {
                    format!("removed duplicate CSS import of '{}'", import.path)
                },
            });
        }
        for (index, text) in replaced_lines {
            transformed_lines[index] = text;
        }
        let transformed = transformed_lines.join("\n");

        let report = validate_code(&transformed);
        if !report.is_valid {
            return Ok(ResolutionResult::failed(
                self.kind(),
                "CSS injection produced syntactically invalid output",
                report.errors,
            ));
        }

        Ok(ResolutionResult {
            success: true,
            transformed_code: transformed,
            confidence: clamp_confidence(0.75),
            strategy: self.kind(),
            applied_changes,
            error_message: None,
            validation_errors: Vec::new(),
            elapsed: started.elapsed(),
        })
    }
}

fn injection_snippet(css: &str) -> String {
    let mut escaped = String::with_capacity(css.len());
    let mut chars = css.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '`' => escaped.push_str("\\`"),
            '$' if chars.peek() == Some(&'{') => escaped.push_str("\\$"),
            _ => escaped.push(ch),
        }
    }
    let mut out = String::new();
    out.push_str(&format!("const __injectedCss = `{escaped}`;\n"));
    out.push_str("if (typeof document !== 'undefined' && !document.getElementById('injected-artifact-css')) {\n");
    out.push_str("  const styleEl = document.createElement('style');\n");
    out.push_str("  styleEl.id = 'injected-artifact-css';\n");
    out.push_str("  styleEl.textContent = __injectedCss;\n");
    out.push_str("  document.head.appendChild(styleEl);\n");
    out.push_str("}");
    out
}
