use crate::ast::{Expr, Stmt, TypeTag};
use crate::environment::Binding;
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::interpreter::{ControlSignal, Exec, Interpreter, Interrupt};
use crate::value::{Address, Value};
use std::io::Write;

impl<'a, W: Write> Interpreter<'a, W> {
    /// Run statements in order, stopping at the first non-normal signal.
    pub(crate) fn exec_block(&mut self, statements: &[Stmt]) -> Exec<ControlSignal> {
        for statement in statements {
            let signal = self.exec(statement)?;
            if signal != ControlSignal::Normal {
                return Ok(signal);
            }
        }
        Ok(ControlSignal::Normal)
    }

    pub(crate) fn exec(&mut self, stmt: &Stmt) -> Exec<ControlSignal> {
        tracing::trace!(statement = stmt.name(), line = stmt.span().line, "execute");
        self.exec_inner(stmt).map_err(|interrupt| interrupt.at(stmt.span()))
    }

    fn exec_inner(&mut self, stmt: &Stmt) -> Exec<ControlSignal> {
        match stmt {
            Stmt::VarDecl { name, ty, .. } => {
                let value = Value::default_for(ty, &self.registries.structs);
                self.env.declare(
                    name,
                    Binding {
                        ty: ty.clone(),
                        value,
                        constant: false,
                    },
                )?;
                Ok(ControlSignal::Normal)
            }
            Stmt::Display { values, .. } => {
                let mut parts = Vec::with_capacity(values.len());
                for value in values {
                    parts.push(self.evaluate(value)?.to_string());
                }
                writeln!(self.out, "{}", parts.join(" ")).map_err(|error| {
                    RuntimeError::new(RuntimeErrorKind::Output, error.to_string())
                })?;
                Ok(ControlSignal::Normal)
            }
            Stmt::Set { target, value, .. } => {
                let value = self.evaluate(value)?;
                let place = self.place(target)?;
                self.env
                    .write_place(&place, value, &self.registries.structs)
                    .map_err(|error| error.at(target.span()))?;
                Ok(ControlSignal::Normal)
            }
            Stmt::Call { name, args, span } => {
                let args = self.evaluate_args(args)?;
                self.invoke(name, args, *span)?;
                Ok(ControlSignal::Normal)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.condition(condition)? {
                    self.exec_block(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_block(else_branch)
                } else {
                    Ok(ControlSignal::Normal)
                }
            }
            Stmt::For {
                initializer,
                condition,
                step,
                body,
                ..
            } => {
                self.exec(initializer)?;
                while self.condition(condition)? {
                    let signal = self.exec_block(body)?;
                    if signal != ControlSignal::Normal {
                        return Ok(signal);
                    }
                    self.exec(step)?;
                }
                Ok(ControlSignal::Normal)
            }
            Stmt::While { condition, body, .. } => {
                while self.condition(condition)? {
                    let signal = self.exec_block(body)?;
                    if signal != ControlSignal::Normal {
                        return Ok(signal);
                    }
                }
                Ok(ControlSignal::Normal)
            }
            Stmt::Create { target, .. } => {
                let place = self.place(target)?;
                let registries = self.registries;
                let structs = &registries.structs;
                let pointee = match self.env.place_type(&place, structs)? {
                    TypeTag::Pointer { pointee } => *pointee,
                    other => {
                        return Err(RuntimeError::type_mismatch(format!(
                            "create needs a pointer target, found {}",
                            other
                        ))
                        .into())
                    }
                };

                let contents = Value::default_for(&pointee, structs);
                let address = self.env.heap.allocate(pointee, contents);
                tracing::debug!(address, "heap slot created");
                self.env
                    .write_place(&place, Value::Address(Address::Heap(address)), structs)?;
                Ok(ControlSignal::Normal)
            }
            Stmt::Destroy { pointer, .. } => {
                match self.evaluate(pointer)? {
                    Value::Address(Address::Heap(address)) => {
                        self.env.heap.free(address)?;
                        tracing::debug!(address, "heap slot destroyed");
                    }
                    Value::Address(Address::Null) => {
                        return Err(invalid_pointer("cannot destroy a null pointer"))
                    }
                    Value::Address(Address::Local { name, .. }) => {
                        return Err(invalid_pointer(&format!(
                            "'{}' lives on the stack and cannot be destroyed",
                            name
                        )))
                    }
                    other => {
                        return Err(invalid_pointer(&format!(
                            "destroy needs a pointer, found {}",
                            other.type_name()
                        )))
                    }
                }
                Ok(ControlSignal::Normal)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => Some(self.evaluate(expr)?),
                    None => None,
                };
                Ok(ControlSignal::Return(value))
            }
            Stmt::Exit { code, .. } => {
                let code = match code {
                    Some(expr) => self.exit_code(expr)?,
                    None => 0,
                };
                Err(Interrupt::Exit(code))
            }
        }
    }

    fn condition(&mut self, condition: &Expr) -> Exec<bool> {
        match self.evaluate(condition)? {
            Value::Boolean(b) => Ok(b),
            other => Err(RuntimeError::type_mismatch(format!(
                "condition must be boolean, found {}",
                other.type_name()
            ))
            .at(condition.span())
            .into()),
        }
    }

    fn exit_code(&mut self, expr: &Expr) -> Exec<i64> {
        match self.evaluate(expr)? {
            Value::Integer(code) => Ok(code),
            other => Err(RuntimeError::type_mismatch(format!(
                "exit code must be integer, found {}",
                other.type_name()
            ))
            .into()),
        }
    }
}

fn invalid_pointer(message: &str) -> Interrupt {
    RuntimeError::new(RuntimeErrorKind::InvalidPointer, message).into()
}
