use crate::ast::{FunctionDef, Stmt, TypeTag};
use crate::environment::{Binding, Environment};
use crate::error::{RuntimeError, RuntimeErrorKind, Span};
use crate::loader::Registries;
use crate::value::Value;
use std::io::Write;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Grow the host stack when less than this remains before a call.
const RED_ZONE: usize = 256 * 1024;

/// Size of each stack segment added on growth.
const STACK_GROWTH: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Deepest allowed chain of active invocations, `main` included.
    pub max_call_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Outcome of executing a statement. Internally `exit` unwinds as
/// `Interrupt::Exit`; `Exit` here is only produced by [`Interpreter::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSignal {
    Normal,
    Return(Option<Value>),
    Exit(i64),
}

/// A call to a function with no definition. These are simulated rather
/// than treated as errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalCall {
    pub name: String,
    pub args: Vec<Value>,
    pub span: Span,
}

/// Non-local exits that unwind through expression evaluation. `exit` always
/// travels this way, so it passes through calls nested in expressions.
#[derive(Debug)]
pub(crate) enum Interrupt {
    Exit(i64),
    Error(RuntimeError),
}

impl Interrupt {
    pub(crate) fn at(self, span: Span) -> Self {
        match self {
            Interrupt::Error(error) => Interrupt::Error(error.at(span)),
            exit => exit,
        }
    }

    fn in_function(self, name: &str) -> Self {
        match self {
            Interrupt::Error(error) => Interrupt::Error(error.in_function(name)),
            exit => exit,
        }
    }
}

impl From<RuntimeError> for Interrupt {
    fn from(error: RuntimeError) -> Self {
        Interrupt::Error(error)
    }
}

pub(crate) type Exec<T> = Result<T, Interrupt>;

pub struct Interpreter<'a, W: Write> {
    pub(crate) registries: &'a Registries,
    pub(crate) env: Environment,
    pub(crate) out: W,
    config: InterpreterConfig,
    external_calls: Vec<ExternalCall>,
}

impl<'a, W: Write> Interpreter<'a, W> {
    pub fn new(registries: &'a Registries, out: W, config: InterpreterConfig) -> Self {
        Self {
            registries,
            env: Environment::new(),
            out,
            config,
            external_calls: Vec::new(),
        }
    }

    /// Initialise globals and run `main`. Returns the exit code: the one
    /// given to `exit`, otherwise 0.
    pub fn run(&mut self) -> Result<i64, RuntimeError> {
        let outcome = self.run_program();
        self.flush()?;

        match outcome {
            Ok(()) => Ok(0),
            Err(Interrupt::Exit(code)) => {
                tracing::debug!(code, "program exited");
                Ok(code)
            }
            Err(Interrupt::Error(error)) => Err(error),
        }
    }

    fn run_program(&mut self) -> Exec<()> {
        self.init_globals()?;

        let registries = self.registries;
        let main = registries.function("main").ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::NoEntryPoint,
                "no function named 'main' is defined",
            )
        })?;

        if !main.params.is_empty() {
            return Err(RuntimeError::new(
                RuntimeErrorKind::ArityMismatch,
                format!("'main' must take no parameters, it declares {}", main.params.len()),
            )
            .at(main.span)
            .into());
        }

        tracing::debug!("entering main");
        self.enter(main, Vec::new())?;
        Ok(())
    }

    fn init_globals(&mut self) -> Exec<()> {
        let registries = self.registries;
        for global in &registries.globals {
            let value = match &global.init {
                Some(init) => {
                    let value = self.evaluate(init).map_err(|interrupt| interrupt.at(global.span))?;
                    coerce(value, &global.ty, &global.name).map_err(|error| error.at(global.span))?
                }
                None => Value::default_for(&global.ty, &registries.structs),
            };

            self.env
                .declare_global(
                    &global.name,
                    Binding {
                        ty: global.ty.clone(),
                        value,
                        constant: global.constant,
                    },
                )
                .map_err(|error| error.at(global.span))?;
        }
        Ok(())
    }

    /// Execute one statement in the current frame.
    pub fn execute(&mut self, stmt: &Stmt) -> Result<ControlSignal, RuntimeError> {
        match self.exec(stmt) {
            Ok(signal) => Ok(signal),
            Err(Interrupt::Exit(code)) => Ok(ControlSignal::Exit(code)),
            Err(Interrupt::Error(error)) => Err(error),
        }
    }

    /// Calls that were simulated because no definition exists.
    pub fn external_calls(&self) -> &[ExternalCall] {
        &self.external_calls
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Call `name` with already evaluated arguments. Returns the value given
    /// to `return`, or `None` for void functions.
    pub(crate) fn invoke(&mut self, name: &str, args: Vec<Value>, span: Span) -> Exec<Option<Value>> {
        let registries = self.registries;
        let Some(def) = registries.function(name) else {
            tracing::info!(function = name, args = args.len(), "simulated external call");
            self.external_calls.push(ExternalCall {
                name: name.to_string(),
                args,
                span,
            });
            return Ok(Some(Value::Integer(0)));
        };

        if args.len() != def.params.len() {
            return Err(RuntimeError::new(
                RuntimeErrorKind::ArityMismatch,
                format!(
                    "'{}' expects {} argument(s), got {}",
                    name,
                    def.params.len(),
                    args.len()
                ),
            )
            .into());
        }

        if self.env.depth() >= self.config.max_call_depth {
            return Err(RuntimeError::new(
                RuntimeErrorKind::StackOverflow,
                format!(
                    "call to '{}' exceeds the maximum call depth of {}",
                    name, self.config.max_call_depth
                ),
            )
            .into());
        }

        let returned = stacker::maybe_grow(RED_ZONE, STACK_GROWTH, || self.enter(def, args))?;

        match (&def.return_type, returned) {
            (Some(ty), Some(value)) => Ok(Some(coerce(value, ty, name)?)),
            (Some(_), None) => Err(RuntimeError::new(
                RuntimeErrorKind::MissingReturn,
                format!("'{}' finished without returning a value", name),
            )
            .in_function(name)
            .into()),
            (None, Some(_)) => Err(RuntimeError::type_mismatch(format!(
                "void function '{}' cannot return a value",
                name
            ))
            .in_function(name)
            .into()),
            (None, None) => Ok(None),
        }
    }

    /// Push a frame for `def`, bind parameters and locals, run the body and
    /// pop the frame again whatever the outcome.
    fn enter(&mut self, def: &FunctionDef, args: Vec<Value>) -> Exec<Option<Value>> {
        let frame = self.env.push_frame(&def.name);
        tracing::debug!(function = %def.name, frame, depth = self.env.depth(), "call");

        let result = self.bind_and_run(def, args);

        self.env.pop_frame();
        tracing::debug!(function = %def.name, frame, "return");

        result.map_err(|interrupt| interrupt.in_function(&def.name))
    }

    fn bind_and_run(&mut self, def: &FunctionDef, args: Vec<Value>) -> Exec<Option<Value>> {
        for (param, arg) in def.params.iter().zip(args) {
            let value = coerce(arg, &param.ty, &param.name).map_err(|error| error.at(param.span))?;
            self.env.declare(
                &param.name,
                Binding {
                    ty: param.ty.clone(),
                    value,
                    constant: false,
                },
            )?;
        }

        for local in &def.locals {
            let value = Value::default_for(&local.ty, &self.registries.structs);
            self.env
                .declare(
                    &local.name,
                    Binding {
                        ty: local.ty.clone(),
                        value,
                        constant: false,
                    },
                )
                .map_err(|error| error.at(local.span))?;
        }

        match self.exec_block(&def.body)? {
            ControlSignal::Return(value) => Ok(value),
            ControlSignal::Normal => Ok(None),
            // Blocks report exit as Err(Interrupt::Exit); kept for completeness.
            ControlSignal::Exit(code) => Err(Interrupt::Exit(code)),
        }
    }

    pub(crate) fn flush(&mut self) -> Result<(), RuntimeError> {
        self.out
            .flush()
            .map_err(|error| RuntimeError::new(RuntimeErrorKind::Output, error.to_string()))
    }
}

/// Convert `value` for a slot of type `ty`, named `what` in the message.
pub(crate) fn coerce(value: Value, ty: &TypeTag, what: &str) -> Result<Value, RuntimeError> {
    let found = value.type_name();
    value.coerce_to(ty).ok_or_else(|| {
        RuntimeError::type_mismatch(format!("'{}' expects {}, found {}", what, ty, found))
    })
}
