//! Structured error records surfaced to the embedding host.
//!
//! Compile-time and runtime failures are disjoint taxonomies: `Diagnostic`
//! is produced while turning source into bytecode, `RuntimeError` while the
//! VM is stepping. Hosts render both (speech bubbles, editor jumps), so the
//! records are serializable and carry 1-based source lines.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::token::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    SyntaxError,
    NameError,
    AttributeError,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::SyntaxError => write!(f, "SyntaxError"),
            DiagnosticKind::NameError => write!(f, "NameError"),
            DiagnosticKind::AttributeError => write!(f, "AttributeError"),
        }
    }
}

/// A fatal compile error. No bytecode is produced once one is recorded.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{kind}: {message} (line {line})")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub line: u32,
    pub column: Option<u32>,
}

impl Diagnostic {
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: DiagnosticKind::SyntaxError,
            message: message.into(),
            line: span.line,
            column: Some(span.column),
        }
    }

    pub fn name_error(message: impl Into<String>, line: u32) -> Self {
        Self {
            kind: DiagnosticKind::NameError,
            message: message.into(),
            line,
            column: None,
        }
    }

    pub fn attribute_error(message: impl Into<String>, line: u32) -> Self {
        Self {
            kind: DiagnosticKind::AttributeError,
            message: message.into(),
            line,
            column: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuntimeErrorKind {
    NameError,
    AttributeError,
    TypeError,
    IndexError,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeErrorKind::NameError => write!(f, "NameError"),
            RuntimeErrorKind::AttributeError => write!(f, "AttributeError"),
            RuntimeErrorKind::TypeError => write!(f, "TypeError"),
            RuntimeErrorKind::IndexError => write!(f, "IndexError"),
        }
    }
}

/// A fatal runtime fault. The VM halts on the first one; user code cannot
/// catch it.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{kind}: {message} (line {line})")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub line: u32,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
        }
    }
}
