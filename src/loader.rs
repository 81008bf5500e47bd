use crate::ast::{Declaration, FunctionDef, GlobalDecl, Program, Stmt, StructDef, TypeTag};
use crate::error::{LoadError, Span};
use std::collections::{HashMap, HashSet};

/// Most values a single variable or heap slot may hold. Storage is
/// default-initialised eagerly, so larger types are refused at load time.
pub const MAX_VALUE_SLOTS: usize = 1 << 20;

/// Struct and function tables plus the global declarations, built once by
/// [`load`] and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub structs: HashMap<String, StructDef>,
    pub functions: HashMap<String, FunctionDef>,
    /// Symbols, constants and variables in declaration order.
    pub globals: Vec<GlobalDecl>,
    pub imports: Vec<String>,
}

impl Registries {
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }
}

/// Build the registries, stopping at the first inconsistency.
pub fn load(program: Program) -> Result<Registries, LoadError> {
    let Program {
        imports,
        forwards,
        structs: struct_defs,
        globals,
        functions: function_defs,
    } = program;

    let mut structs = HashMap::new();
    for def in struct_defs {
        check_unique(&def.fields, "field")?;
        if structs.contains_key(&def.name) {
            return Err(duplicate("struct", &def.name, def.span));
        }
        structs.insert(def.name.clone(), def);
    }

    for def in structs.values() {
        for field in &def.fields {
            check_known(&field.ty, &structs, field.span)?;
        }
        check_not_recursive(def, &structs)?;
    }

    for def in structs.values() {
        for field in &def.fields {
            check_size(&field.ty, &structs, field.span)?;
        }
    }

    let mut global_names = HashSet::new();
    for global in &globals {
        if !global_names.insert(global.name.as_str()) {
            return Err(duplicate("global", &global.name, global.span));
        }
        check_type(&global.ty, &structs, global.span)?;
    }

    let mut functions = HashMap::new();
    for def in function_defs {
        let variables: Vec<Declaration> = def.params.iter().chain(&def.locals).cloned().collect();
        check_unique(&variables, "variable")?;
        for variable in &variables {
            check_type(&variable.ty, &structs, variable.span)?;
        }
        if let Some(return_type) = &def.return_type {
            check_type(return_type, &structs, def.span)?;
        }
        check_body(&def.body, &structs)?;
        if functions.contains_key(&def.name) {
            return Err(duplicate("function", &def.name, def.span));
        }
        functions.insert(def.name.clone(), def);
    }

    let mut forward_names = HashSet::new();
    for forward in &forwards {
        if !forward_names.insert(forward.name.as_str()) {
            return Err(duplicate("forward declaration", &forward.name, forward.span));
        }
        let Some(def) = functions.get(&forward.name) else {
            return Err(LoadError::UnresolvedForward {
                name: forward.name.clone(),
                span: forward.span,
            });
        };
        if def.params.len() != forward.params.len() {
            return Err(LoadError::ForwardMismatch {
                name: forward.name.clone(),
                detail: format!(
                    "declared with {} parameter(s), implemented with {}",
                    forward.params.len(),
                    def.params.len()
                ),
                span: def.span,
            });
        }
        if def.return_type != forward.return_type {
            return Err(LoadError::ForwardMismatch {
                name: forward.name.clone(),
                detail: format!(
                    "declared to return {}, implemented to return {}",
                    describe_return(&forward.return_type),
                    describe_return(&def.return_type)
                ),
                span: def.span,
            });
        }
    }

    tracing::info!(
        structs = structs.len(),
        functions = functions.len(),
        globals = globals.len(),
        forwards = forwards.len(),
        "program loaded"
    );

    Ok(Registries {
        structs,
        functions,
        globals,
        imports,
    })
}

fn duplicate(what: &'static str, name: &str, span: Span) -> LoadError {
    LoadError::DuplicateDefinition {
        what,
        name: name.to_string(),
        span,
    }
}

fn check_unique(declarations: &[Declaration], what: &'static str) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    for declaration in declarations {
        if !seen.insert(declaration.name.as_str()) {
            return Err(duplicate(what, &declaration.name, declaration.span));
        }
    }
    Ok(())
}

fn check_type(ty: &TypeTag, structs: &HashMap<String, StructDef>, span: Span) -> Result<(), LoadError> {
    check_known(ty, structs, span)?;
    check_size(ty, structs, span)
}

fn check_known(ty: &TypeTag, structs: &HashMap<String, StructDef>, span: Span) -> Result<(), LoadError> {
    match ty.struct_name() {
        Some(name) if !structs.contains_key(name) => Err(LoadError::UnknownType {
            name: name.to_string(),
            span,
        }),
        _ => Ok(()),
    }
}

/// Every pointee is checked too, since `create` allocates one.
fn check_size(ty: &TypeTag, structs: &HashMap<String, StructDef>, span: Span) -> Result<(), LoadError> {
    let slots = value_slots(ty, structs);
    if slots > MAX_VALUE_SLOTS {
        return Err(LoadError::TooLarge {
            ty: ty.to_string(),
            slots,
            limit: MAX_VALUE_SLOTS,
            span,
        });
    }

    match ty {
        TypeTag::Pointer { pointee } => check_size(pointee, structs, span),
        TypeTag::Array { element, .. } => check_size(element, structs, span),
        _ => Ok(()),
    }
}

/// Values held by one instance of `ty`. Pointers count as one.
fn value_slots(ty: &TypeTag, structs: &HashMap<String, StructDef>) -> usize {
    match ty {
        TypeTag::Array { element, length } => length.saturating_mul(value_slots(element, structs)),
        TypeTag::Struct { name } => structs.get(name).map_or(1, |def| {
            def.fields
                .iter()
                .fold(0, |total: usize, field| total.saturating_add(value_slots(&field.ty, structs)))
        }),
        _ => 1,
    }
}

/// `define` statements may appear anywhere in a body, including nested blocks.
fn check_body(body: &[Stmt], structs: &HashMap<String, StructDef>) -> Result<(), LoadError> {
    for stmt in body {
        match stmt {
            Stmt::VarDecl { ty, span, .. } => check_type(ty, structs, *span)?,
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                check_body(then_branch, structs)?;
                if let Some(else_branch) = else_branch {
                    check_body(else_branch, structs)?;
                }
            }
            Stmt::For { body, .. } | Stmt::While { body, .. } => check_body(body, structs)?,
            _ => {}
        }
    }
    Ok(())
}

/// A struct may point to itself but not contain itself, directly or through
/// other structs and arrays.
fn check_not_recursive(def: &StructDef, structs: &HashMap<String, StructDef>) -> Result<(), LoadError> {
    let mut pending: Vec<&TypeTag> = def.fields.iter().map(|field| &field.ty).collect();
    let mut visited = HashSet::new();

    while let Some(ty) = pending.pop() {
        match ty {
            TypeTag::Struct { name } if name == &def.name => {
                return Err(LoadError::RecursiveStruct {
                    name: def.name.clone(),
                    span: def.span,
                })
            }
            TypeTag::Struct { name } => {
                if visited.insert(name.as_str()) {
                    if let Some(inner) = structs.get(name) {
                        pending.extend(inner.fields.iter().map(|field| &field.ty));
                    }
                }
            }
            TypeTag::Array { element, .. } => pending.push(element),
            _ => {}
        }
    }

    Ok(())
}

fn describe_return(ty: &Option<TypeTag>) -> String {
    ty.as_ref().map_or_else(|| "void".to_string(), TypeTag::to_string)
}
