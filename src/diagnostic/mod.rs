pub mod ansi;
pub mod json;

use crate::ast::Span;
use crate::compiler::CompileError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::value::ValueError;
use crate::vm::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable identifier such as `P001`; rendered as `error[P001]`.
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for the stage errors ----

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = Span::new(e.position, e.position + e.snippet.len().max(1));
        let mut d = Diagnostic::error(format!("unexpected input '{}'", e.snippet))
            .with_code("L001")
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        Diagnostic::error(&e.message).with_code("P001").with_span(e.span, "here")
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let code = match e {
            CompileError::BreakOutsideLoop { .. } => "C001",
            CompileError::ContinueOutsideLoop { .. } => "C002",
            CompileError::DuplicateParameter { .. } => "C003",
            CompileError::BuiltinArity { .. } => "C004",
        };
        let mut d = Diagnostic::error(e.to_string()).with_code(code);
        if let Some(span) = e.span() {
            d = d.with_span(span, "here");
        }
        if let CompileError::BreakOutsideLoop { .. } | CompileError::ContinueOutsideLoop { .. } = e {
            d = d.with_note("loop control does not cross function boundaries");
        }
        d
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        let code = match e {
            RuntimeError::UndefinedVariable { .. } => "R001",
            RuntimeError::UndefinedFunction { .. } => "R002",
            RuntimeError::ArityMismatch { .. } => "R003",
            RuntimeError::Uninitialized(_) => "R004",
            RuntimeError::AddressOutOfBounds { .. } => "R005",
            RuntimeError::MemoryExhausted { .. } => "R006",
            RuntimeError::StackOverflow { .. } => "R007",
            RuntimeError::ReturnOutsideFunction => "R008",
            RuntimeError::UnterminatedFunction { .. } => "R009",
            RuntimeError::InvalidEntry { .. } => "R010",
            RuntimeError::InvalidJump { .. } => "R011",
            RuntimeError::StrayLoopControl(_) => "R012",
            RuntimeError::Value(_) => "R013",
            RuntimeError::Io(_) => "R014",
            RuntimeError::BuiltinArity { .. } => "R015",
        };
        let d = Diagnostic::error(e.to_string()).with_code(code);
        match e {
            RuntimeError::UndefinedFunction { .. } => {
                d.with_note("functions must be declared before they are called")
            }
            RuntimeError::StackOverflow { .. } => d.with_suggestion("raise the limit with --max-depth"),
            RuntimeError::MemoryExhausted { .. } => d.with_suggestion("raise the limit with --memory"),
            RuntimeError::Value(ValueError::UnsupportedOperands { .. }) => {
                d.with_note("strings that do not hold an integer support only +, == and !=")
            }
            RuntimeError::Value(ValueError::InvalidInt(_)) => {
                d.with_suggestion("int() accepts an optionally signed decimal integer")
            }
            _ => d,
        }
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Lex(e) => e.into(),
            crate::Error::Parse(e) => e.into(),
            crate::Error::Compile(e) => e.into(),
            crate::Error::Runtime(e) => e.into(),
            crate::Error::Emit(_) => Diagnostic::error(e.to_string()).with_code("E001"),
        }
    }
}
