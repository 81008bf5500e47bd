use crate::error::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root of a parsed SCL translation unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub imports: Vec<String>,
    pub forwards: Vec<ForwardDecl>,
    pub structs: Vec<StructDef>,
    /// Symbols, constants and global variables, in declaration order.
    pub globals: Vec<GlobalDecl>,
    pub functions: Vec<FunctionDef>,
}

/// A named, typed slot: struct field, parameter or local variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub ty: TypeTag,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Declaration>,
    pub span: Span,
}

impl StructDef {
    pub fn field(&self, name: &str) -> Option<&Declaration> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardDecl {
    pub name: String,
    pub return_type: Option<TypeTag>,
    pub params: Vec<Declaration>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: TypeTag,
    pub init: Option<Expr>,
    pub constant: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub return_type: Option<TypeTag>,
    pub params: Vec<Declaration>,
    pub locals: Vec<Declaration>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TypeTag {
    Integer,
    Double,
    Text,
    Boolean,
    Struct { name: String },
    Pointer { pointee: Box<TypeTag> },
    Array { element: Box<TypeTag>, length: usize },
}

impl TypeTag {
    pub fn pointer_to(pointee: TypeTag) -> Self {
        TypeTag::Pointer {
            pointee: Box::new(pointee),
        }
    }

    pub fn array_of(element: TypeTag, length: usize) -> Self {
        TypeTag::Array {
            element: Box::new(element),
            length,
        }
    }

    /// The struct name this type ultimately refers to, if any.
    pub fn struct_name(&self) -> Option<&str> {
        match self {
            TypeTag::Struct { name } => Some(name),
            TypeTag::Pointer { pointee } => pointee.struct_name(),
            TypeTag::Array { element, .. } => element.struct_name(),
            _ => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeTag::Integer => write!(f, "integer"),
            TypeTag::Double => write!(f, "double"),
            TypeTag::Text => write!(f, "char"),
            TypeTag::Boolean => write!(f, "boolean"),
            TypeTag::Struct { name } => write!(f, "{}", name),
            TypeTag::Pointer { pointee } => write!(f, "pointer of type {}", pointee),
            TypeTag::Array { element, length } => write!(f, "array[{}] of type {}", length, element),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Stmt {
    Display {
        values: Vec<Expr>,
        span: Span,
    },
    Set {
        target: Expr,
        value: Expr,
        span: Span,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
        span: Span,
    },
    For {
        initializer: Box<Stmt>,
        condition: Expr,
        step: Box<Stmt>,
        body: Vec<Stmt>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    Create {
        target: Expr,
        span: Span,
    },
    Destroy {
        pointer: Expr,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Exit {
        code: Option<Expr>,
        span: Span,
    },
    VarDecl {
        name: String,
        ty: TypeTag,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Display { span, .. }
            | Stmt::Set { span, .. }
            | Stmt::Call { span, .. }
            | Stmt::If { span, .. }
            | Stmt::For { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Create { span, .. }
            | Stmt::Destroy { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Exit { span, .. }
            | Stmt::VarDecl { span, .. } => *span,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stmt::Display { .. } => "display",
            Stmt::Set { .. } => "set",
            Stmt::Call { .. } => "call",
            Stmt::If { .. } => "if",
            Stmt::For { .. } => "for",
            Stmt::While { .. } => "while",
            Stmt::Create { .. } => "create",
            Stmt::Destroy { .. } => "destroy",
            Stmt::Return { .. } => "return",
            Stmt::Exit { .. } => "exit",
            Stmt::VarDecl { .. } => "define",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    Literal {
        value: Literal,
        span: Span,
    },
    Identifier {
        name: String,
        span: Span,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    AddressOf {
        operand: Box<Expr>,
        span: Span,
    },
    /// `base->field`, through a pointer.
    MemberAccess {
        base: Box<Expr>,
        field: String,
        span: Span,
    },
    /// `base.field`, on a struct value.
    FieldAccess {
        base: Box<Expr>,
        field: String,
        span: Span,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    /// Postfix `^`.
    Deref {
        operand: Box<Expr>,
        span: Span,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::AddressOf { span, .. }
            | Expr::MemberAccess { span, .. }
            | Expr::FieldAccess { span, .. }
            | Expr::Index { span, .. }
            | Expr::Deref { span, .. }
            | Expr::Call { span, .. } => *span,
        }
    }

    /// Whether the expression denotes a storage location that `set`,
    /// `create` or `increment` may write to.
    pub fn is_place(&self) -> bool {
        match self {
            Expr::Identifier { .. } | Expr::MemberAccess { .. } | Expr::Deref { .. } => true,
            Expr::FieldAccess { base, .. } | Expr::Index { base, .. } => base.is_place(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Literal {
    Int(i64),
    Double(f64),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
}
