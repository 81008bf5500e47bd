use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::environment::Place;
use crate::error::{RuntimeError, RuntimeErrorKind, Span};
use crate::interpreter::{Exec, Interpreter, Interrupt};
use crate::value::{Address, Value};
use std::io::Write;

impl<'a, W: Write> Interpreter<'a, W> {
    pub(crate) fn evaluate(&mut self, expr: &Expr) -> Exec<Value> {
        self.evaluate_inner(expr).map_err(|interrupt| interrupt.at(expr.span()))
    }

    fn evaluate_inner(&mut self, expr: &Expr) -> Exec<Value> {
        match expr {
            Expr::Literal { value, .. } => Ok(match value {
                Literal::Int(n) => Value::Integer(*n),
                Literal::Double(n) => Value::Double(*n),
                Literal::String(s) => Value::Text(s.clone()),
                Literal::Bool(b) => Value::Boolean(*b),
                Literal::Null => Value::Address(Address::Null),
            }),
            Expr::Identifier { name, .. } => self
                .env
                .lookup(name)
                .map(|binding| binding.value.clone())
                .ok_or_else(|| undefined(name).into()),
            Expr::Binary {
                left,
                operator: operator @ (BinaryOp::And | BinaryOp::Or),
                right,
                span,
            } => {
                let left_val = expect_boolean(self.evaluate(left)?, *operator, *span)?;

                // Short-circuit
                match (operator, left_val) {
                    (BinaryOp::And, false) => Ok(Value::Boolean(false)),
                    (BinaryOp::Or, true) => Ok(Value::Boolean(true)),
                    _ => {
                        let right_val = expect_boolean(self.evaluate(right)?, *operator, *span)?;
                        Ok(Value::Boolean(right_val))
                    }
                }
            }
            Expr::Binary {
                left,
                operator,
                right,
                ..
            } => {
                let left_val = self.evaluate(left)?;
                let right_val = self.evaluate(right)?;
                Ok(evaluate_binary_op(*operator, left_val, right_val)?)
            }
            Expr::Unary {
                operator, operand, ..
            } => {
                let operand_val = self.evaluate(operand)?;
                Ok(evaluate_unary_op(*operator, operand_val)?)
            }
            Expr::AddressOf { operand, .. } => self.address_of(operand),
            Expr::MemberAccess { .. } | Expr::Deref { .. } => {
                let place = self.place(expr)?;
                Ok(self.env.read_place(&place)?)
            }
            Expr::FieldAccess { base, field, .. } => {
                if expr.is_place() {
                    let place = self.place(expr)?;
                    return Ok(self.env.read_place(&place)?);
                }
                match self.evaluate(base)? {
                    Value::Struct(instance) => instance.get(field).cloned().ok_or_else(|| {
                        RuntimeError::new(
                            RuntimeErrorKind::UnknownField,
                            format!("struct '{}' has no field '{}'", instance.name, field),
                        )
                        .into()
                    }),
                    other => Err(RuntimeError::new(
                        RuntimeErrorKind::InvalidMemberAccess,
                        format!("cannot access field '{}' on {}", field, other.type_name()),
                    )
                    .into()),
                }
            }
            Expr::Index { base, index, .. } => {
                if expr.is_place() {
                    let place = self.place(expr)?;
                    return Ok(self.env.read_place(&place)?);
                }
                let base_val = self.evaluate(base)?;
                let position = self.index_value(index)?;
                match base_val {
                    Value::Array(items) => {
                        let length = items.len();
                        items.into_iter().nth(position).ok_or_else(|| {
                            RuntimeError::new(
                                RuntimeErrorKind::IndexOutOfBounds,
                                format!("index {} is outside an array of length {}", position, length),
                            )
                            .into()
                        })
                    }
                    other => Err(RuntimeError::type_mismatch(format!(
                        "cannot index into {}",
                        other.type_name()
                    ))
                    .into()),
                }
            }
            Expr::Call { name, args, .. } => {
                let args = self.evaluate_args(args)?;
                match self.invoke(name, args, expr.span())? {
                    Some(value) => Ok(value),
                    None => Err(RuntimeError::type_mismatch(format!(
                        "void function '{}' used as a value",
                        name
                    ))
                    .into()),
                }
            }
        }
    }

    pub(crate) fn evaluate_args(&mut self, args: &[Expr]) -> Exec<Vec<Value>> {
        args.iter().map(|arg| self.evaluate(arg)).collect()
    }

    /// Resolve an expression to the storage location it denotes.
    pub(crate) fn place(&mut self, expr: &Expr) -> Exec<Place> {
        match expr {
            Expr::Identifier { name, .. } => self
                .env
                .resolve(name)
                .map(|frame| Place::variable(frame, name.clone()))
                .ok_or_else(|| undefined(name).into()),
            Expr::MemberAccess { base, field, span } => match self.evaluate(base)? {
                Value::Address(address) => Ok(Place::pointee(&address)
                    .map_err(|error| error.at(*span))?
                    .field(field.clone())),
                other => Err(RuntimeError::new(
                    RuntimeErrorKind::InvalidMemberAccess,
                    format!("'->{}' needs a pointer, found {}", field, other.type_name()),
                )
                .at(*span)
                .into()),
            },
            Expr::FieldAccess { base, field, .. } => Ok(self.place(base)?.field(field.clone())),
            Expr::Index { base, index, .. } => {
                let place = self.place(base)?;
                let position = self.index_value(index)?;
                Ok(place.index(position))
            }
            Expr::Deref { operand, span } => match self.evaluate(operand)? {
                Value::Address(address) => Ok(Place::pointee(&address).map_err(|error| error.at(*span))?),
                other => Err(RuntimeError::type_mismatch(format!(
                    "cannot dereference {}",
                    other.type_name()
                ))
                .at(*span)
                .into()),
            },
            other => Err(RuntimeError::new(
                RuntimeErrorKind::NotAddressable,
                "expression does not denote a storage location",
            )
            .at(other.span())
            .into()),
        }
    }

    fn address_of(&mut self, operand: &Expr) -> Exec<Value> {
        match operand {
            Expr::Identifier { name, .. } => {
                let frame = self.env.resolve(name).ok_or_else(|| undefined(name))?;
                Ok(Value::Address(Address::Local {
                    frame,
                    name: name.clone(),
                }))
            }
            // `&p^` is the pointer held in `p`
            Expr::Deref { operand: inner, .. } => match self.evaluate(inner)? {
                address @ Value::Address(_) => Ok(address),
                other => Err(RuntimeError::type_mismatch(format!(
                    "cannot dereference {}",
                    other.type_name()
                ))
                .into()),
            },
            _ => Err(RuntimeError::new(
                RuntimeErrorKind::NotAddressable,
                "'&' applies to variables and dereferenced pointers only",
            )
            .into()),
        }
    }

    fn index_value(&mut self, index: &Expr) -> Exec<usize> {
        match self.evaluate(index)? {
            Value::Integer(n) => usize::try_from(n).map_err(|_| {
                Interrupt::Error(
                    RuntimeError::new(
                        RuntimeErrorKind::IndexOutOfBounds,
                        format!("index {} is negative", n),
                    )
                    .at(index.span()),
                )
            }),
            other => Err(RuntimeError::type_mismatch(format!(
                "array index must be integer, found {}",
                other.type_name()
            ))
            .at(index.span())
            .into()),
        }
    }
}

fn undefined(name: &str) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::UndefinedVariable,
        format!("'{}' is not defined", name),
    )
}

fn expect_boolean(value: Value, operator: BinaryOp, span: Span) -> Result<bool, RuntimeError> {
    match value {
        Value::Boolean(b) => Ok(b),
        other => Err(RuntimeError::type_mismatch(format!(
            "'{}' needs boolean operands, found {}",
            operator.symbol(),
            other.type_name()
        ))
        .at(span)),
    }
}

pub(crate) fn evaluate_binary_op(
    operator: BinaryOp,
    left: Value,
    right: Value,
) -> Result<Value, RuntimeError> {
    match operator {
        BinaryOp::Add => match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l.wrapping_add(r))),
            (Value::Text(l), Value::Text(r)) => Ok(Value::Text(l + &r)),
            (l, r) => arithmetic(operator, l, r, |a, b| a + b),
        },
        BinaryOp::Subtract => match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l.wrapping_sub(r))),
            (l, r) => arithmetic(operator, l, r, |a, b| a - b),
        },
        BinaryOp::Multiply => match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l.wrapping_mul(r))),
            (l, r) => arithmetic(operator, l, r, |a, b| a * b),
        },
        BinaryOp::Divide => match (left, right) {
            (_, Value::Integer(0)) => Err(division_by_zero()),
            (_, Value::Double(r)) if r == 0.0 => Err(division_by_zero()),
            // Truncates toward zero
            (Value::Integer(l), Value::Integer(r)) => Ok(Value::Integer(l.wrapping_div(r))),
            (l, r) => arithmetic(operator, l, r, |a, b| a / b),
        },
        BinaryOp::Equal => Ok(Value::Boolean(is_equal(operator, &left, &right)?)),
        BinaryOp::NotEqual => Ok(Value::Boolean(!is_equal(operator, &left, &right)?)),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = match (&left, &right) {
                (Value::Text(l), Value::Text(r)) => Some(l.cmp(r)),
                (l, r) => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(operand_mismatch(operator, &left, &right)),
                },
            };

            let result = ordering.map_or(false, |ordering| match operator {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessEqual => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            });
            Ok(Value::Boolean(result))
        }
        BinaryOp::And | BinaryOp::Or => match (left, right) {
            (Value::Boolean(l), Value::Boolean(r)) => Ok(Value::Boolean(if operator == BinaryOp::And {
                l && r
            } else {
                l || r
            })),
            (l, r) => Err(operand_mismatch(operator, &l, &r)),
        },
    }
}

/// Mixed or double arithmetic, promoted to double.
fn arithmetic(
    operator: BinaryOp,
    left: Value,
    right: Value,
    op: fn(f64, f64) -> f64,
) -> Result<Value, RuntimeError> {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => Ok(Value::Double(op(l, r))),
        _ => Err(operand_mismatch(operator, &left, &right)),
    }
}

fn is_equal(operator: BinaryOp, left: &Value, right: &Value) -> Result<bool, RuntimeError> {
    match (left, right) {
        (Value::Integer(l), Value::Integer(r)) => Ok(l == r),
        (l, r) if l.is_numeric() && r.is_numeric() => Ok(l.as_f64() == r.as_f64()),
        (Value::Text(l), Value::Text(r)) => Ok(l == r),
        (Value::Boolean(l), Value::Boolean(r)) => Ok(l == r),
        (Value::Address(l), Value::Address(r)) => Ok(l == r),
        (Value::Struct(l), Value::Struct(r)) => Ok(l == r),
        (Value::Array(l), Value::Array(r)) => Ok(l == r),
        (l, r) => Err(operand_mismatch(operator, l, r)),
    }
}

fn evaluate_unary_op(operator: UnaryOp, operand: Value) -> Result<Value, RuntimeError> {
    match (operator, operand) {
        (UnaryOp::Negate, Value::Integer(n)) => Ok(Value::Integer(n.wrapping_neg())),
        (UnaryOp::Negate, Value::Double(n)) => Ok(Value::Double(-n)),
        (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        (UnaryOp::Negate, other) => Err(RuntimeError::type_mismatch(format!(
            "cannot negate {}",
            other.type_name()
        ))),
        (UnaryOp::Not, other) => Err(RuntimeError::type_mismatch(format!(
            "'not' needs a boolean, found {}",
            other.type_name()
        ))),
    }
}

fn operand_mismatch(operator: BinaryOp, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::type_mismatch(format!(
        "cannot apply '{}' to {} and {}",
        operator.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn division_by_zero() -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::DivisionByZero, "divisor is zero")
}
