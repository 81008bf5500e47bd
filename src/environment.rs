use crate::ast::{StructDef, TypeTag};
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::value::{Address, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Frame id of the implicit global frame.
pub const GLOBAL_FRAME: usize = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub ty: TypeTag,
    pub value: Value,
    pub constant: bool,
}

/// Variables of one function invocation.
#[derive(Debug, Clone)]
pub struct ScopeFrame {
    pub id: usize,
    pub function: String,
    bindings: HashMap<String, Binding>,
}

impl ScopeFrame {
    pub fn new(id: usize, function: impl Into<String>) -> Self {
        Self {
            id,
            function: function.into(),
            bindings: HashMap::new(),
        }
    }

    pub fn declare(&mut self, name: &str, binding: Binding) -> Result<(), RuntimeError> {
        match self.bindings.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RuntimeError::new(
                RuntimeErrorKind::Redeclaration,
                format!("'{}' is already declared in this scope", name),
            )),
            Entry::Vacant(slot) => {
                slot.insert(binding);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeapSlot {
    pub address: usize,
    pub freed: bool,
    pub ty: TypeTag,
    pub contents: Value,
}

/// Simulated heap. Addresses start at 1 and are never reused; destroyed
/// slots stay behind with `freed` set so stale pointers can be diagnosed.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    slots: Vec<HeapSlot>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, ty: TypeTag, contents: Value) -> usize {
        let address = self.slots.len() + 1;
        self.slots.push(HeapSlot {
            address,
            freed: false,
            ty,
            contents,
        });
        address
    }

    pub fn free(&mut self, address: usize) -> Result<(), RuntimeError> {
        let slot = self.slot_mut(address)?;
        if slot.freed {
            return Err(RuntimeError::new(
                RuntimeErrorKind::DoubleFree,
                format!("slot @{} was already destroyed", address),
            ));
        }
        slot.freed = true;
        Ok(())
    }

    /// A live slot; destroyed slots are reported as use after destroy.
    pub fn get(&self, address: usize) -> Result<&HeapSlot, RuntimeError> {
        let slot = address
            .checked_sub(1)
            .and_then(|index| self.slots.get(index))
            .ok_or_else(|| unknown_address(address))?;
        if slot.freed {
            return Err(use_after_destroy(address));
        }
        Ok(slot)
    }

    pub fn get_mut(&mut self, address: usize) -> Result<&mut HeapSlot, RuntimeError> {
        let slot = self.slot_mut(address)?;
        if slot.freed {
            return Err(use_after_destroy(address));
        }
        Ok(slot)
    }

    /// Any slot ever allocated, freed or not.
    pub fn slot(&self, address: usize) -> Option<&HeapSlot> {
        address.checked_sub(1).and_then(|index| self.slots.get(index))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.freed).count()
    }

    fn slot_mut(&mut self, address: usize) -> Result<&mut HeapSlot, RuntimeError> {
        address
            .checked_sub(1)
            .and_then(|index| self.slots.get_mut(index))
            .ok_or_else(|| unknown_address(address))
    }
}

fn unknown_address(address: usize) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::InvalidPointer,
        format!("@{} is not a heap address", address),
    )
}

fn use_after_destroy(address: usize) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::UseAfterDestroy,
        format!("slot @{} has been destroyed", address),
    )
}

/// Where a place starts: a named variable in some frame, or a heap slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Root {
    Frame { frame: usize, name: String },
    Heap(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Field(String),
    Index(usize),
}

/// A resolved storage location: a root followed by field and element steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub root: Root,
    pub path: Vec<Step>,
}

impl Place {
    pub fn variable(frame: usize, name: impl Into<String>) -> Self {
        Self {
            root: Root::Frame {
                frame,
                name: name.into(),
            },
            path: Vec::new(),
        }
    }

    pub fn heap(address: usize) -> Self {
        Self {
            root: Root::Heap(address),
            path: Vec::new(),
        }
    }

    /// The place a pointer value refers to.
    pub fn pointee(address: &Address) -> Result<Self, RuntimeError> {
        match address {
            Address::Null => Err(RuntimeError::new(
                RuntimeErrorKind::NullPointer,
                "dereferenced a null pointer",
            )),
            Address::Heap(address) => Ok(Self::heap(*address)),
            Address::Local { frame, name } => Ok(Self::variable(*frame, name.clone())),
        }
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.path.push(Step::Field(name.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.path.push(Step::Index(index));
        self
    }
}

/// The call stack, global frame and heap of one run.
#[derive(Debug)]
pub struct Environment {
    globals: ScopeFrame,
    stack: Vec<ScopeFrame>,
    next_frame_id: usize,
    pub heap: Heap,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            globals: ScopeFrame::new(GLOBAL_FRAME, "<global>"),
            stack: Vec::new(),
            next_frame_id: GLOBAL_FRAME + 1,
            heap: Heap::new(),
        }
    }

    /// Push a fresh frame and return its id. Ids are never reused, so a
    /// pointer into a popped frame stays detectably dangling.
    pub fn push_frame(&mut self, function: &str) -> usize {
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        self.stack.push(ScopeFrame::new(id, function));
        id
    }

    pub fn pop_frame(&mut self) -> Option<ScopeFrame> {
        self.stack.pop()
    }

    /// Number of active invocation frames, not counting the global frame.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn current(&self) -> &ScopeFrame {
        self.stack.last().unwrap_or(&self.globals)
    }

    pub fn declare(&mut self, name: &str, binding: Binding) -> Result<(), RuntimeError> {
        match self.stack.last_mut() {
            Some(frame) => frame.declare(name, binding),
            None => self.globals.declare(name, binding),
        }
    }

    pub fn declare_global(&mut self, name: &str, binding: Binding) -> Result<(), RuntimeError> {
        self.globals.declare(name, binding)
    }

    /// Frame id holding `name`: the current frame first, then globals.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        let current = self.current();
        if current.contains(name) {
            Some(current.id)
        } else if self.globals.contains(name) {
            Some(GLOBAL_FRAME)
        } else {
            None
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.current()
            .get(name)
            .or_else(|| self.globals.get(name))
    }

    pub fn frame(&self, id: usize) -> Option<&ScopeFrame> {
        if id == GLOBAL_FRAME {
            Some(&self.globals)
        } else {
            self.stack.iter().rev().find(|frame| frame.id == id)
        }
    }

    fn frame_mut(&mut self, id: usize) -> Option<&mut ScopeFrame> {
        if id == GLOBAL_FRAME {
            Some(&mut self.globals)
        } else {
            self.stack.iter_mut().rev().find(|frame| frame.id == id)
        }
    }

    pub fn read_place(&self, place: &Place) -> Result<Value, RuntimeError> {
        let root = match &place.root {
            Root::Frame { frame, name } => &self.frame_binding(*frame, name)?.value,
            Root::Heap(address) => &self.heap.get(*address)?.contents,
        };
        walk(root, &place.path).cloned()
    }

    /// Declared type of a place, derived from the root's type and the
    /// struct definitions along the path.
    pub fn place_type(
        &self,
        place: &Place,
        structs: &HashMap<String, StructDef>,
    ) -> Result<TypeTag, RuntimeError> {
        let mut ty = match &place.root {
            Root::Frame { frame, name } => self.frame_binding(*frame, name)?.ty.clone(),
            Root::Heap(address) => self.heap.get(*address)?.ty.clone(),
        };

        for step in &place.path {
            ty = match (step, ty) {
                (Step::Field(field), TypeTag::Struct { name }) => structs
                    .get(&name)
                    .and_then(|def| def.field(field))
                    .map(|declaration| declaration.ty.clone())
                    .ok_or_else(|| unknown_field(&name, field))?,
                (Step::Index(_), TypeTag::Array { element, .. }) => *element,
                (Step::Field(field), other) => return Err(not_a_struct(field, &other.to_string())),
                (Step::Index(_), other) => return Err(not_an_array(&other.to_string())),
            };
        }

        Ok(ty)
    }

    /// Store `value` into `place`, converting it to the place's declared type.
    pub fn write_place(
        &mut self,
        place: &Place,
        value: Value,
        structs: &HashMap<String, StructDef>,
    ) -> Result<(), RuntimeError> {
        let ty = self.place_type(place, structs)?;
        let found = value.type_name();
        let value = value.coerce_to(&ty).ok_or_else(|| {
            RuntimeError::type_mismatch(format!("cannot store {} into a {} slot", found, ty))
        })?;

        let root = match &place.root {
            Root::Frame { frame, name } => {
                let frame_id = *frame;
                let frame = self
                    .frame_mut(frame_id)
                    .ok_or_else(|| dangling(name, frame_id))?;
                let binding = frame
                    .bindings
                    .get_mut(name)
                    .ok_or_else(|| dangling(name, frame_id))?;
                if binding.constant {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::AssignToConstant,
                        format!("'{}' is a constant", name),
                    ));
                }
                &mut binding.value
            }
            Root::Heap(address) => &mut self.heap.get_mut(*address)?.contents,
        };

        *walk_mut(root, &place.path)? = value;
        Ok(())
    }

    fn frame_binding(&self, frame_id: usize, name: &str) -> Result<&Binding, RuntimeError> {
        let frame = self.frame(frame_id).ok_or_else(|| dangling(name, frame_id))?;
        frame.get(name).ok_or_else(|| {
            if frame_id == self.current().id || frame_id == GLOBAL_FRAME {
                RuntimeError::new(
                    RuntimeErrorKind::UndefinedVariable,
                    format!("'{}' is not defined", name),
                )
            } else {
                dangling(name, frame_id)
            }
        })
    }
}

fn walk<'v>(mut value: &'v Value, path: &[Step]) -> Result<&'v Value, RuntimeError> {
    for step in path {
        value = match (step, value) {
            (Step::Field(field), Value::Struct(instance)) => instance
                .get(field)
                .ok_or_else(|| unknown_field(&instance.name, field))?,
            (Step::Index(index), Value::Array(items)) => items
                .get(*index)
                .ok_or_else(|| out_of_bounds(*index, items.len()))?,
            (Step::Field(field), other) => return Err(not_a_struct(field, other.type_name())),
            (Step::Index(_), other) => return Err(not_an_array(other.type_name())),
        };
    }
    Ok(value)
}

fn walk_mut<'v>(mut value: &'v mut Value, path: &[Step]) -> Result<&'v mut Value, RuntimeError> {
    for step in path {
        value = match (step, value) {
            (Step::Field(field), Value::Struct(instance)) => {
                let name = instance.name.clone();
                instance
                    .get_mut(field)
                    .ok_or_else(|| unknown_field(&name, field))?
            }
            (Step::Index(index), Value::Array(items)) => {
                let length = items.len();
                items
                    .get_mut(*index)
                    .ok_or_else(|| out_of_bounds(*index, length))?
            }
            (Step::Field(field), other) => return Err(not_a_struct(field, other.type_name())),
            (Step::Index(_), other) => return Err(not_an_array(other.type_name())),
        };
    }
    Ok(value)
}

fn dangling(name: &str, frame: usize) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::DanglingPointer,
        format!("'{}' lived in frame #{} which has returned", name, frame),
    )
}

fn unknown_field(struct_name: &str, field: &str) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::UnknownField,
        format!("struct '{}' has no field '{}'", struct_name, field),
    )
}

fn not_a_struct(field: &str, found: &str) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::InvalidMemberAccess,
        format!("cannot access field '{}' on {}", field, found),
    )
}

fn not_an_array(found: &str) -> RuntimeError {
    RuntimeError::type_mismatch(format!("cannot index into {}", found))
}

fn out_of_bounds(index: usize, length: usize) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::IndexOutOfBounds,
        format!("index {} is outside an array of length {}", index, length),
    )
}
