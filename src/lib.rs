// SCL Language Processor Library
//
// Scanner, error-recovering parser and tree-walking interpreter for SCL, a
// small C-like teaching language with structs, pointers and a simulated heap.

// Public modules
pub mod ast;
pub mod environment;
pub mod error;
mod evaluator;
mod executor;
pub mod interpreter;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod runner;
pub mod value;

// Re-export commonly used items
pub use ast::{Expr, Program, Stmt, TypeTag};
pub use error::{LoadError, RuntimeError, RuntimeErrorKind, SclError, Span, SyntaxError};
pub use interpreter::{ControlSignal, ExternalCall, Interpreter, InterpreterConfig};
pub use lexer::{Lexer, Token, TokenKind};
pub use loader::{load, Registries};
pub use parser::{ParseOutput, Parser};
pub use value::{Address, Value};

// Re-export main functions
pub use runner::run_source;
