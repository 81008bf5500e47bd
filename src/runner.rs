use crate::ast::Program;
use crate::error::SclError;
use crate::interpreter::{Interpreter, InterpreterConfig};
use crate::lexer::{self, Token};
use crate::loader;
use crate::parser::{self, ParseOutput};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Shape of the token interchange file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenFile {
    pub tokens: Vec<Token>,
}

pub fn read_source(path: &Path) -> Result<String, SclError> {
    fs::read_to_string(path).map_err(|source| SclError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SclError> {
    let text = read_source(path)?;
    serde_json::from_str(&text).map_err(|source| SclError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Write `value` as pretty JSON to `path`, or to `out` when no path is given.
pub fn write_json<T: Serialize>(value: &T, path: Option<&Path>, out: impl Write) -> Result<(), SclError> {
    let target = path.map_or_else(|| "<stdout>".to_string(), |path| path.display().to_string());
    let json = serde_json::to_string_pretty(value).map_err(|source| SclError::Json {
        path: target.clone(),
        source,
    })?;

    let io_error = |source| SclError::Io {
        path: target.clone(),
        source,
    };
    match path {
        Some(path) => fs::write(path, json + "\n").map_err(io_error),
        None => {
            let mut out = out;
            writeln!(out, "{}", json).map_err(io_error)
        }
    }
}

/// Scan stage.
pub fn scan_source(source: &str) -> TokenFile {
    TokenFile {
        tokens: lexer::scan(source),
    }
}

/// Parse stage. Syntax errors are part of the output, not a failure.
pub fn parse_tokens(tokens: TokenFile) -> ParseOutput {
    parser::parse(tokens.tokens)
}

/// Execute stage: load the registries and run `main`, writing program output
/// to `out`. Returns the program's exit code.
pub fn execute_program<W: Write>(
    program: Program,
    out: W,
    config: InterpreterConfig,
) -> Result<i64, SclError> {
    let registries = loader::load(program)?;
    let mut interpreter = Interpreter::new(&registries, out, config);
    let code = interpreter.run()?;

    let external = interpreter.external_calls();
    if !external.is_empty() {
        tracing::info!(count = external.len(), "external calls were simulated");
    }
    Ok(code)
}

/// Execute a parsed AST file, refusing when it records syntax errors.
pub fn execute_parsed<W: Write>(
    parsed: ParseOutput,
    out: W,
    config: InterpreterConfig,
) -> Result<i64, SclError> {
    let program = parsed.into_result().map_err(SclError::Syntax)?;
    execute_program(program, out, config)
}

/// All stages in memory.
pub fn run_source<W: Write>(source: &str, out: W, config: InterpreterConfig) -> Result<i64, SclError> {
    let parsed = parse_tokens(scan_source(source));
    execute_parsed(parsed, out, config)
}
