use std::collections::BTreeSet;
use std::time::Instant;

use anyhow::Result;
use remend_core::{
    AppliedChange, ArtifactContext, ResolutionResult, StrategyKind, clamp_confidence,
    validate_code,
};

use crate::TransformStrategy;

/// One single-line `import` statement as found in artifact source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    /// Zero-based line index into the artifact.
    pub line_index: usize,
    /// The full source line, untrimmed.
    pub raw: String,
    /// Default or namespace binding, if the import introduces one.
    pub binding: Option<String>,
    /// The quoted module specifier.
    pub path: String,
}

impl ImportStatement {
    pub fn is_css_module(&self) -> bool {
        self.path.ends_with(".module.css")
            || self.path.ends_with(".module.scss")
            || self.path.ends_with(".module.less")
    }

    pub fn is_plain_css(&self) -> bool {
        !self.is_css_module()
            && (self.path.ends_with(".css")
                || self.path.ends_with(".scss")
                || self.path.ends_with(".less"))
    }

    pub fn is_json(&self) -> bool {
        self.path.ends_with(".json")
    }

    pub fn is_relative(&self) -> bool {
        self.path.starts_with("./") || self.path.starts_with("../")
    }
}

/// Finds every single-line import in the artifact. Multi-line imports are
/// rare in generated artifacts and are left untouched rather than guessed at.
pub fn scan_imports(code: &str) -> Vec<ImportStatement> {
    code.lines()
        .enumerate()
        .filter_map(|(line_index, line)| parse_import_line(line_index, line))
        .collect()
}

fn parse_import_line(line_index: usize, line: &str) -> Option<ImportStatement> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix("import")?;
    if !rest.starts_with(char::is_whitespace) && !rest.starts_with('"') && !rest.starts_with('\'') {
        // Identifier that merely begins with "import", e.g. `importantFn()`.
        return None;
    }
    let path = quoted_specifier(rest)?;
    Some(ImportStatement {
        line_index,
        raw: line.to_string(),
        binding: default_binding(rest.trim_start()),
        path,
    })
}

/// Extracts the module specifier, the last quoted string on the line.
fn quoted_specifier(rest: &str) -> Option<String> {
    let mut found: Option<String> = None;
    let mut chars = rest.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '"' || ch == '\'' {
            let mut literal = String::new();
            for inner in chars.by_ref() {
                if inner == ch {
                    found = Some(std::mem::take(&mut literal));
                    break;
                }
                literal.push(inner);
            }
        }
    }
    found.filter(|p| !p.is_empty())
}

/// The binding a default or namespace import introduces. Named-only and
/// side-effect imports introduce none.
fn default_binding(rest: &str) -> Option<String> {
    if rest.starts_with('"') || rest.starts_with('\'') || rest.starts_with('{') {
        return None;
    }
    let rest = match rest.strip_prefix('*') {
        Some(after_star) => after_star.trim_start().strip_prefix("as")?.trim_start(),
        None => rest,
    };
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
        .collect();
    if name.is_empty() { None } else { Some(name) }
}

/// Collects the member names accessed on `binding` via dot or bracket
/// notation, e.g. `styles.primary` and `styles['primary-button']`.
pub fn member_references(code: &str, binding: &str) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    let bytes = code.as_bytes();
    let mut start = 0;
    while let Some(pos) = code[start..].find(binding) {
        let at = start + pos;
        start = at + binding.len();
        if at > 0 && is_ident_byte(bytes[at - 1]) {
            continue;
        }
        let tail = &code[at + binding.len()..];
        if let Some(after_dot) = tail.strip_prefix('.') {
            let name: String = after_dot
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
                .collect();
            if !name.is_empty() {
                refs.insert(name);
            }
        } else if let Some(after_bracket) = tail.strip_prefix('[') {
            let inner = after_bracket.trim_start();
            if let Some(quote) = inner.chars().next().filter(|c| *c == '"' || *c == '\'') {
                if let Some(end) = inner[1..].find(quote) {
                    refs.insert(inner[1..1 + end].to_string());
                }
            }
        }
    }
    refs
}

/// Whether `binding` appears as a standalone identifier anywhere in `code`.
pub fn binding_is_referenced(code: &str, binding: &str) -> bool {
    let bytes = code.as_bytes();
    let mut start = 0;
    while let Some(pos) = code[start..].find(binding) {
        let at = start + pos;
        start = at + binding.len();
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        let after = at + binding.len();
        let after_ok = after >= bytes.len() || !is_ident_byte(bytes[after]);
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Last-resort strategy: strips unresolved relative imports outright. Bare
/// package imports are left alone since the renderer fetches those itself.
pub struct ImportRemoval;

impl TransformStrategy for ImportRemoval {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ImportRemoval
    }

    fn apply(&self, artifact_code: &str, _context: &ArtifactContext) -> Result<ResolutionResult> {
        let started = Instant::now();
        let removable: Vec<ImportStatement> = scan_imports(artifact_code)
            .into_iter()
            .filter(ImportStatement::is_relative)
            .collect();
        if removable.is_empty() {
            return Ok(ResolutionResult::not_applicable(
                self.kind(),
                "artifact has no relative imports to remove",
            ));
        }

        let removed_lines: BTreeSet<usize> =
            removable.iter().map(|import| import.line_index).collect();
        let transformed: String = artifact_code
            .lines()
            .enumerate()
            .filter(|(index, _)| !removed_lines.contains(index))
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n");

        let mut applied_changes = Vec::new();
        let mut validation_errors = Vec::new();
        for import in &removable {
            applied_changes.push(AppliedChange {
                kind: "import-removal".to_string(),
                original_text: import.raw.clone(),
                new_text: String::new(),
                line_number: import.line_index + 1,
                description: format!("removed unresolved import of '{}'", import.path),
            });
            if let Some(binding) = &import.binding {
                if binding_is_referenced(&transformed, binding) {
                    validation_errors.push(format!(
                        "removed binding '{binding}' is still referenced; rendering may fail at runtime"
                    ));
                }
            }
        }

        let report = validate_code(&transformed);
        if !report.is_valid {
            return Ok(ResolutionResult::failed(
                self.kind(),
                "import removal produced syntactically invalid output",
                report.errors,
            ));
        }

        Ok(ResolutionResult {
            success: true,
            transformed_code: transformed,
            confidence: clamp_confidence(0.5),
            strategy: self.kind(),
            applied_changes,
            error_message: None,
            validation_errors,
            elapsed: started.elapsed(),
        })
    }
}
