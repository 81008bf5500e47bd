use crate::ast::{StructDef, TypeTag};
use std::collections::HashMap;
use std::fmt;

/// Where a pointer value points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Null,
    /// A slot in the simulated heap.
    Heap(usize),
    /// A variable living in a scope frame, taken with `&name`.
    Local { frame: usize, name: String },
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Null => write!(f, "null"),
            Address::Heap(address) => write!(f, "@{}", address),
            Address::Local { frame, name } => write!(f, "&{}#{}", name, frame),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructInstance {
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<(String, Value)>,
}

impl StructInstance {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Double(f64),
    Text(String),
    Boolean(bool),
    Address(Address),
    Struct(StructInstance),
    Array(Vec<Value>),
}

impl Value {
    /// The zero value of a declared type. Struct fields are filled
    /// recursively in declaration order.
    pub fn default_for(ty: &TypeTag, structs: &HashMap<String, StructDef>) -> Value {
        match ty {
            TypeTag::Integer => Value::Integer(0),
            TypeTag::Double => Value::Double(0.0),
            TypeTag::Text => Value::Text(String::new()),
            TypeTag::Boolean => Value::Boolean(false),
            TypeTag::Pointer { .. } => Value::Address(Address::Null),
            TypeTag::Array { element, length } => {
                Value::Array(vec![Value::default_for(element, structs); *length])
            }
            TypeTag::Struct { name } => Value::Struct(StructInstance {
                name: name.clone(),
                fields: structs
                    .get(name)
                    .map(|def| {
                        def.fields
                            .iter()
                            .map(|field| (field.name.clone(), Value::default_for(&field.ty, structs)))
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Boolean(_) => "boolean",
            Value::Address(_) => "pointer",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Double(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Double(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether this value may be stored in a slot of the given type as-is.
    pub fn conforms_to(&self, ty: &TypeTag) -> bool {
        match (self, ty) {
            (Value::Integer(_), TypeTag::Integer)
            | (Value::Double(_), TypeTag::Double)
            | (Value::Text(_), TypeTag::Text)
            | (Value::Boolean(_), TypeTag::Boolean)
            | (Value::Address(_), TypeTag::Pointer { .. }) => true,
            (Value::Struct(instance), TypeTag::Struct { name }) => &instance.name == name,
            (Value::Array(items), TypeTag::Array { element, length }) => {
                items.len() == *length && items.iter().all(|item| item.conforms_to(element))
            }
            _ => false,
        }
    }

    /// Convert for storage into a slot of type `ty`. Integers widen to
    /// doubles and doubles truncate to integers; anything else must already
    /// conform.
    pub fn coerce_to(self, ty: &TypeTag) -> Option<Value> {
        match (self, ty) {
            (Value::Integer(n), TypeTag::Double) => Some(Value::Double(n as f64)),
            (Value::Double(n), TypeTag::Integer) => Some(Value::Integer(n.trunc() as i64)),
            (value, ty) if value.conforms_to(ty) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Double(n) => {
                // Always show at least one decimal place for doubles
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Text(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Address(address) => write!(f, "{}", address),
            Value::Struct(instance) => {
                write!(f, "{} {{", instance.name)?;
                for (i, (name, value)) in instance.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match value {
                        Value::Text(s) => write!(f, "{}: \"{}\"", name, s)?,
                        other => write!(f, "{}: {}", name, other)?,
                    }
                }
                write!(f, "}}")
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
