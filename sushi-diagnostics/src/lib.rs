// Diagnostic system for the Sushi compiler
// Accumulates compile errors (CE), warnings (CW) and runtime-error templates (RE)
// with spans, colors, and suggestions

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod codes;
pub use codes::*;

/// Source code location (line, column, file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl Span {
    pub fn new(file: impl Into<String>, line: usize, column: usize, length: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            length,
        }
    }

    /// Span for nodes synthesized by the compiler itself (predefined enums,
    /// monomorphized bodies, the main wrapper).
    pub fn synthetic() -> Self {
        Self {
            file: "<builtin>".to_string(),
            line: 0,
            column: 0,
            length: 0,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.line == 0
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::synthetic()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// CE — fatal to codegen
    Error,
    /// CW — never blocks compilation
    Warning,
    Note,
    Help,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "{}", "error".red().bold()),
            Severity::Warning => write!(f, "{}", "warning".yellow().bold()),
            Severity::Note => write!(f, "{}", "note".cyan().bold()),
            Severity::Help => write!(f, "{}", "help".green().bold()),
        }
    }
}

/// A single rendered diagnostic
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, code: &'static str, message: String, span: Span) -> Self {
        Self {
            severity,
            code,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn error(code: &'static str, message: String, span: Span) -> Self {
        Self::new(Severity::Error, code, message, span)
    }

    pub fn warning(code: &'static str, message: String, span: Span) -> Self {
        Self::new(Severity::Warning, code, message, span)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Compact one-line rendering: `file:line:col: error[CE2002]: message`.
    /// This is the format the driver writes to stderr.
    pub fn render_line(&self) -> String {
        format!(
            "{}:{}:{}: {}[{}]: {}",
            self.span.file, self.span.line, self.span.column, self.severity, self.code, self.message
        )
    }

    /// Rich rendering with a source snippet and caret underline.
    pub fn render(&self, source: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{}[{}]: {}\n",
            self.severity,
            self.code,
            self.message.bold()
        ));
        out.push_str(&format!(
            " {} {}:{}:{}\n",
            "-->".cyan().bold(),
            self.span.file,
            self.span.line,
            self.span.column
        ));

        if let Some(snippet) = self.source_snippet(source) {
            out.push_str(&snippet);
        }

        for note in &self.notes {
            out.push_str(&format!(" {} {}\n", "=".cyan().bold(), note.cyan()));
        }
        if let Some(help) = &self.help {
            out.push_str(&format!(" {} {}\n", "help:".green().bold(), help));
        }
        out
    }

    fn source_snippet(&self, source: &str) -> Option<String> {
        let lines: Vec<&str> = source.lines().collect();
        if self.span.line == 0 || self.span.line > lines.len() {
            return None;
        }
        let line = lines[self.span.line - 1];
        let width = self.span.line.to_string().len().max(2);

        let mut snippet = String::new();
        snippet.push_str(&format!(
            " {} {} {}\n",
            format!("{:>w$}", self.span.line, w = width).cyan().bold(),
            "|".cyan().bold(),
            line
        ));
        let padding = " ".repeat(width + 3 + self.span.column.saturating_sub(1));
        let underline = "^".repeat(self.span.length.max(1));
        snippet.push_str(&format!(
            " {}{}{}\n",
            " ".repeat(width + 1),
            padding,
            underline.red().bold()
        ));
        Some(snippet)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.render_line())
    }
}

/// Shared reporter: a filename plus an accumulated, sortable list of
/// diagnostics. Every semantic pass appends and keeps traversing so a single
/// run surfaces as many errors as possible.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    filename: String,
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
    warning_count: usize,
}

impl DiagnosticEngine {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn emit(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
            _ => {}
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn emit_error(&mut self, code: &'static str, message: String, span: Span) {
        self.emit(Diagnostic::error(code, message, span));
    }

    pub fn emit_warning(&mut self, code: &'static str, message: String, span: Span) {
        self.emit(Diagnostic::warning(code, message, span));
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// True if a diagnostic with the given code was emitted. Test helper.
    pub fn has_code(&self, code: &str) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }

    /// Diagnostics in source order (line, then column). Codegen is only
    /// entered when this list contains no errors.
    pub fn sorted(&self) -> Vec<&Diagnostic> {
        let mut sorted: Vec<&Diagnostic> = self.diagnostics.iter().collect();
        sorted.sort_by_key(|d| (d.span.line, d.span.column));
        sorted
    }

    /// Write all diagnostics to stderr in line:col format, sorted.
    pub fn print_all(&self) {
        for diag in self.sorted() {
            eprintln!("{}", diag.render_line());
        }
    }

    pub fn print_summary(&self) {
        if self.error_count > 0 {
            eprintln!(
                "{}: {} error{} emitted",
                "error".red().bold(),
                self.error_count,
                if self.error_count == 1 { "" } else { "s" }
            );
        }
        if self.warning_count > 0 {
            eprintln!(
                "{}: {} warning{} emitted",
                "warning".yellow().bold(),
                self.warning_count,
                if self.warning_count == 1 { "" } else { "s" }
            );
        }
    }

    /// Driver exit code: 2 on any error, 1 on success with warnings, 0 clean.
    pub fn exit_code(&self) -> i32 {
        if self.error_count > 0 {
            2
        } else if self.warning_count > 0 {
            1
        } else {
            0
        }
    }
}

/// Fuzzy matching for "did you mean?" suggestions
pub mod fuzzy {
    use strsim::jaro_winkler;

    /// Up to `max_suggestions` candidate names with similarity above threshold.
    pub fn find_similar_names(
        target: &str,
        candidates: &[String],
        threshold: f64,
        max_suggestions: usize,
    ) -> Vec<String> {
        let mut scored: Vec<(String, f64)> = candidates
            .iter()
            .map(|candidate| (candidate.clone(), jaro_winkler(target, candidate)))
            .filter(|(_, score)| *score > threshold)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(max_suggestions)
            .map(|(name, _)| name)
            .collect()
    }

    /// Default-tuned suggestion list for identifier typos.
    pub fn suggest(target: &str, candidates: &[String]) -> Vec<String> {
        find_similar_names(target, candidates, 0.7, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_line_format() {
        let diag = Diagnostic::error(
            codes::CE2002,
            "assignment type mismatch: expected `i32`, found `string`".to_string(),
            Span::new("main.sushi", 4, 9, 6),
        );
        let line = diag.render_line();
        assert!(line.starts_with("main.sushi:4:9:"));
        assert!(line.contains("CE2002"));
    }

    #[test]
    fn engine_counts_and_exit_codes() {
        let mut engine = DiagnosticEngine::new("t.sushi");
        assert_eq!(engine.exit_code(), 0);

        engine.emit_warning(codes::CW2001, "unused Result".to_string(), Span::synthetic());
        assert_eq!(engine.exit_code(), 1);
        assert!(!engine.has_errors());

        engine.emit_error(codes::CE2008, "undefined name `x`".to_string(), Span::synthetic());
        assert_eq!(engine.exit_code(), 2);
        assert!(engine.has_errors());
        assert_eq!(engine.error_count(), 1);
        assert_eq!(engine.warning_count(), 1);
    }

    #[test]
    fn diagnostics_sort_by_position() {
        let mut engine = DiagnosticEngine::new("t.sushi");
        engine.emit_error(codes::CE2005, "non-bool condition".to_string(), Span::new("t.sushi", 9, 3, 1));
        engine.emit_error(codes::CE2008, "undefined name".to_string(), Span::new("t.sushi", 2, 7, 1));
        let sorted = engine.sorted();
        assert_eq!(sorted[0].code, codes::CE2008);
        assert_eq!(sorted[1].code, codes::CE2005);
    }

    #[test]
    fn fuzzy_suggestions() {
        let candidates = vec![
            "total".to_string(),
            "tally".to_string(),
            "unrelated".to_string(),
        ];
        let suggestions = fuzzy::suggest("totl", &candidates);
        assert_eq!(suggestions.first().map(String::as_str), Some("total"));
    }
}
