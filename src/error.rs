use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source position of a token or node, both 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Byte offset of this position inside `source`, clamped to its length.
    fn offset_in(&self, source: &str) -> usize {
        let mut offset = 0;
        for (index, line) in source.split_inclusive('\n').enumerate() {
            if index + 1 == self.line {
                let column = self.column.saturating_sub(1);
                let within: usize = line.chars().take(column).map(char::len_utf8).sum();
                return offset + within;
            }
            offset += line.len();
        }
        source.len()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("Syntax Error at line {line}, column {column}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl SyntaxError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            line: span.line,
            column: span.column,
            message: message.into(),
            help: None,
        }
    }

    pub fn with_help(span: Span, message: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            help: Some(help.into()),
            ..Self::new(span, message)
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("duplicate definition of {what} '{name}'")]
    DuplicateDefinition {
        what: &'static str,
        name: String,
        span: Span,
    },
    #[error("unknown type '{name}'")]
    UnknownType { name: String, span: Span },
    #[error("unresolved forward reference to function '{name}'")]
    UnresolvedForward { name: String, span: Span },
    #[error("forward declaration mismatch for '{name}': {detail}")]
    ForwardMismatch {
        name: String,
        detail: String,
        span: Span,
    },
    #[error("struct '{name}' contains itself by value")]
    RecursiveStruct { name: String, span: Span },
    #[error("type '{ty}' holds {slots} values, more than the limit of {limit}")]
    TooLarge {
        ty: String,
        slots: usize,
        limit: usize,
        span: Span,
    },
}

impl LoadError {
    pub fn span(&self) -> Span {
        match self {
            LoadError::DuplicateDefinition { span, .. }
            | LoadError::UnknownType { span, .. }
            | LoadError::UnresolvedForward { span, .. }
            | LoadError::ForwardMismatch { span, .. }
            | LoadError::RecursiveStruct { span, .. }
            | LoadError::TooLarge { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("undefined variable")]
    UndefinedVariable,
    #[error("division by zero")]
    DivisionByZero,
    #[error("type mismatch")]
    TypeMismatch,
    #[error("invalid member access")]
    InvalidMemberAccess,
    #[error("unknown field")]
    UnknownField,
    #[error("invalid pointer")]
    InvalidPointer,
    #[error("double free")]
    DoubleFree,
    #[error("use after destroy")]
    UseAfterDestroy,
    #[error("null pointer")]
    NullPointer,
    #[error("dangling pointer")]
    DanglingPointer,
    #[error("not addressable")]
    NotAddressable,
    #[error("redeclaration")]
    Redeclaration,
    #[error("assignment to constant")]
    AssignToConstant,
    #[error("arity mismatch")]
    ArityMismatch,
    #[error("index out of bounds")]
    IndexOutOfBounds,
    #[error("missing return")]
    MissingReturn,
    #[error("stack overflow")]
    StackOverflow,
    #[error("no entry point")]
    NoEntryPoint,
    #[error("output failure")]
    Output,
}

/// A fatal execution error. Position and function are filled in as the
/// error unwinds through the statement that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub span: Option<Span>,
    pub function: Option<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            function: None,
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span.get_or_insert(span);
        self
    }

    pub fn in_function(mut self, name: &str) -> Self {
        if self.function.is_none() {
            self.function = Some(name.to_string());
        }
        self
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::TypeMismatch, message)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Runtime Error: {}: {}", self.kind, self.message)?;
        match (&self.span, &self.function) {
            (Some(span), Some(function)) => write!(f, " ({}, in function '{}')", span, function),
            (Some(span), None) => write!(f, " ({})", span),
            (None, Some(function)) => write!(f, " (in function '{}')", function),
            (None, None) => Ok(()),
        }
    }
}

impl std::error::Error for RuntimeError {}

#[derive(Debug, thiserror::Error)]
pub enum SclError {
    #[error("cannot access '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed interchange file '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{} syntax error(s) found", .0.len())]
    Syntax(Vec<SyntaxError>),
    #[error("Load Error: {0}")]
    Load(#[from] LoadError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl SclError {
    /// Render the error to stderr. With source text the error is drawn as a
    /// labelled ariadne report, otherwise as plain lines.
    pub fn report(&self, source: Option<&str>, filename: Option<&str>) {
        let Some(source) = source else {
            self.report_plain();
            return;
        };
        let filename = filename.unwrap_or("<input>");

        match self {
            SclError::Syntax(errors) => {
                for error in errors {
                    emit(
                        source,
                        filename,
                        "Syntax Error",
                        Color::Yellow,
                        error.span(),
                        &error.message,
                        error.help.as_deref(),
                    );
                }
            }
            SclError::Load(error) => emit(
                source,
                filename,
                "Load Error",
                Color::Red,
                error.span(),
                &error.to_string(),
                None,
            ),
            SclError::Runtime(error) => match error.span {
                Some(span) => {
                    let message = format!("{}: {}", error.kind, error.message);
                    let note = error
                        .function
                        .as_ref()
                        .map(|function| format!("raised in function '{}'", function));
                    emit(
                        source,
                        filename,
                        "Runtime Error",
                        Color::Magenta,
                        span,
                        &message,
                        note.as_deref(),
                    );
                }
                None => eprintln!("{}", error),
            },
            _ => self.report_plain(),
        }
    }

    fn report_plain(&self) {
        match self {
            SclError::Syntax(errors) => {
                for error in errors {
                    eprintln!("{}", error);
                }
            }
            other => eprintln!("{}", other),
        }
    }
}

fn emit(
    source: &str,
    filename: &str,
    kind_str: &str,
    color: Color,
    span: Span,
    message: &str,
    help: Option<&str>,
) {
    let start = span.offset_in(source);
    let end = (start + 1).min(source.len()).max(start);

    let mut report_builder = Report::build(ReportKind::Error, filename, start)
        .with_message(format!("{}: {}", kind_str.fg(color), message))
        .with_label(
            Label::new((filename, start..end))
                .with_message(message)
                .with_color(color),
        );

    if let Some(help_text) = help {
        report_builder = report_builder.with_note(format!("{}: {}", "help".fg(Color::Cyan), help_text));
    }

    if let Err(error) = report_builder
        .finish()
        .eprint((filename, Source::from(source)))
    {
        eprintln!("{}: {} ({})", kind_str, message, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_uses_interchange_format() {
        let error = SyntaxError::new(Span::new(3, 7), "Expected 'endfun'");
        assert_eq!(
            error.to_string(),
            "Syntax Error at line 3, column 7: Expected 'endfun'"
        );
    }

    #[test]
    fn span_offset_counts_lines_and_columns() {
        let source = "ab\ncde\nf";
        assert_eq!(Span::new(1, 1).offset_in(source), 0);
        assert_eq!(Span::new(2, 2).offset_in(source), 4);
        assert_eq!(Span::new(3, 1).offset_in(source), 7);
        assert_eq!(Span::new(9, 1).offset_in(source), source.len());
    }

    #[test]
    fn runtime_error_keeps_innermost_context() {
        let error = RuntimeError::new(RuntimeErrorKind::DoubleFree, "slot @1 already destroyed")
            .at(Span::new(4, 5))
            .in_function("cleanup")
            .at(Span::new(10, 1))
            .in_function("main");
        assert_eq!(error.span, Some(Span::new(4, 5)));
        assert_eq!(error.function.as_deref(), Some("cleanup"));
        assert_eq!(
            error.to_string(),
            "Runtime Error: double free: slot @1 already destroyed (line 4, column 5, in function 'cleanup')"
        );
    }
}
