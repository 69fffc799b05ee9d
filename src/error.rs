// Jvmgen Error Handling Module
// Compiler-internal faults and source-level diagnostics with spans

use colored::*;
use std::fmt;
use thiserror::Error;

/// Represents a position in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }
}

/// Represents a span in the source code (start to end position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn single(line: usize, column: usize, offset: usize) -> Self {
        let pos = Position::new(line, column, offset);
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Span covering a whole line, used by synthesized nodes
    pub fn line(line: usize) -> Self {
        Self::single(line, 1, 0)
    }
}

/// A source-diagnosable error, reported with the position of the offending
/// node. Jumps with nowhere to go are the only kind emission produces.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
    pub file: String,
    source_lines: Vec<String>,
}

impl Diagnostic {
    pub fn syntax_error(message: impl Into<String>, span: Span, file: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span,
            file: file.into(),
            source_lines: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source_lines = source.lines().map(String::from).collect();
        self
    }

    /// Format the diagnostic for a terminal, with colours and a caret under the span
    pub fn format(&self) -> String {
        let mut output = String::new();

        let header = format!(
            "{}: {} at {}:{}:{}",
            "SyntaxError".red().bold(),
            self.message.white().bold(),
            self.file,
            self.span.start.line,
            self.span.start.column
        );
        output.push_str(&header);
        output.push('\n');

        // Source context (line before, error line, line after)
        if !self.source_lines.is_empty() {
            let error_line = self.span.start.line;
            let start_line = if error_line > 1 { error_line - 1 } else { 1 };
            let end_line = (error_line + 1).min(self.source_lines.len());

            output.push('\n');

            for line_num in start_line..=end_line {
                let Some(line_content) = self.source_lines.get(line_num - 1) else {
                    continue;
                };
                let line_num_str = format!("{:>4} |", line_num);

                if line_num == error_line {
                    output.push_str(&format!("{} {}\n", line_num_str.red(), line_content));

                    let spaces = " ".repeat(6 + self.span.start.column);
                    let caret_len = if self.span.end.column > self.span.start.column {
                        self.span.end.column - self.span.start.column + 1
                    } else {
                        1
                    };
                    let carets = "^".repeat(caret_len);
                    output.push_str(&format!("{}{}\n", spaces, carets.red().bold()));
                } else {
                    output.push_str(&format!("{} {}\n", line_num_str.dimmed(), line_content));
                }
            }
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyntaxError: {} at {}:{}:{}",
            self.message, self.file, self.span.start.line, self.span.start.column
        )
    }
}

impl std::error::Error for Diagnostic {}

/// Compiler-internal faults. These indicate a broken contract with an earlier
/// phase or an unsupported construct, and abandon the current compile unit.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Fault {
    #[error("Missing method {receiver}.{name}({})", args.join(", "))]
    MissingMethod {
        receiver: String,
        name: String,
        args: Vec<String>,
    },

    #[error("Expected boolean, found {found}")]
    NonBooleanPredicate { found: String },

    #[error("{0}")]
    IncompatibleCast(String),

    #[error("{jump} outside of {target}")]
    NoJumpTarget {
        jump: &'static str,
        target: &'static str,
    },

    #[error("Unsupported node: {0}")]
    Unsupported(&'static str),

    #[error("Incomplete type {0}")]
    IncompleteType(String),

    #[error("Unknown type {0}")]
    UnknownType(String),

    #[error("Bad type name {0}")]
    BadTypeName(String),

    #[error("Internal compiler error: {0}")]
    Internal(String),
}

/// Result type used throughout emission
pub type EmitResult<T> = Result<T, Fault>;

/// Outcome of compiling one unit
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Fault(#[from] Fault),

    #[error("Compilation failed due to {} previous error(s)", .0.len())]
    Failed(Vec<Diagnostic>),
}

impl CompileError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Failed(diagnostics) => diagnostics,
            CompileError::Fault(_) => &[],
        }
    }

    /// Terminal report of the failure. With the unit's source text each
    /// diagnostic shows the offending line and a caret under it.
    pub fn render(&self, source: Option<&str>) -> String {
        match self {
            CompileError::Fault(fault) => format!("{}\n", fault),
            CompileError::Failed(diagnostics) => {
                let mut output = String::new();
                for diagnostic in diagnostics {
                    let text = match source {
                        Some(source) => diagnostic.clone().with_source(source).format(),
                        None => diagnostic.format(),
                    };
                    output.push_str(&text);
                }
                output.push_str(&format!("{}\n", self));
                output
            }
        }
    }
}

/// Failures of the reference VM. Java exceptions that nothing catches end
/// up as `Uncaught`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VmError {
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("No method {owner}.{name}{descriptor}")]
    NoSuchMethod {
        owner: String,
        name: String,
        descriptor: String,
    },

    #[error("No field {owner}.{name}")]
    NoSuchField { owner: String, name: String },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Operand stack underflow in {0}")]
    StackUnderflow(String),

    #[error("Execution fell off the end of {0}")]
    FellOffEnd(String),

    #[error("Call depth exceeded")]
    StackOverflow,

    #[error("Exception in thread \"main\" {class}: {message}")]
    Uncaught { class: String, message: String },
}

pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_method_message_names_everything() {
        let fault = Fault::MissingMethod {
            receiver: "java.lang.String".into(),
            name: "frob".into(),
            args: vec!["int".into(), "boolean".into()],
        };
        assert_eq!(
            fault.to_string(),
            "Missing method java.lang.String.frob(int, boolean)"
        );
    }

    #[test]
    fn test_diagnostic_display_has_position() {
        let diag = Diagnostic::syntax_error("break outside of loop", Span::single(3, 5, 20), "a.mirah");
        assert_eq!(diag.to_string(), "SyntaxError: break outside of loop at a.mirah:3:5");
    }

    #[test]
    fn test_format_points_at_column() {
        colored::control::set_override(false);
        let diag = Diagnostic::syntax_error("redo outside of loop", Span::single(2, 3, 0), "t.mirah")
            .with_source("a = 1\n  redo\nb = 2");
        let text = diag.format();
        assert!(text.contains("   2 |   redo"));
        assert!(text.contains("         ^"));
    }

    #[test]
    fn test_render_lists_every_diagnostic_then_the_count() {
        colored::control::set_override(false);
        let error = CompileError::Failed(vec![
            Diagnostic::syntax_error("break outside of loop", Span::single(1, 1, 0), "t.mirah"),
            Diagnostic::syntax_error("next outside of loop", Span::single(3, 1, 0), "t.mirah"),
        ]);
        let text = error.render(Some("break\nx = 1\nnext"));
        assert_eq!(
            text,
            "SyntaxError: break outside of loop at t.mirah:1:1\n\n   1 | break\n       ^\n   2 | x = 1\n\
             SyntaxError: next outside of loop at t.mirah:3:1\n\n   2 | x = 1\n   3 | next\n       ^\n\
             Compilation failed due to 2 previous error(s)\n"
        );
    }

    #[test]
    fn test_render_fault_is_its_message() {
        let error = CompileError::from(Fault::Unsupported("Regex"));
        assert_eq!(error.render(None), "Unsupported node: Regex\n");
    }
}
