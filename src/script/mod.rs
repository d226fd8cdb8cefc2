//! The script language executed by the reload runtime.
//!
//! Source files are lexed and parsed into an AST ([`ast`]), executed by a
//! tree-walking evaluator ([`interp`]) against a reference-counted module
//! scope ([`env`]). One source file on disk corresponds to one
//! [`unit::ScriptUnit`], which owns the compiled form and the results of its
//! most recent execution.

pub mod ast;
pub mod env;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod unit;
pub mod value;

pub use env::{Scope, ScopeRef};
pub use interp::{Interp, ScriptError};
pub use unit::ScriptUnit;
pub use value::Value;

/// Source failed to lex or parse. Carries the position of the offending
/// token so the log line can point at the right place in the file.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} at line {line}, column {column}")]
pub struct CompileError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}
