//! Runtime value types

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::super::env::Scope;
use super::super::errors::ErrorInfo;
use super::super::stdlib::StdlibFunc;
use super::ast::{Ast, NodeId};
use crate::scheduler::JobHandle;
use crate::sync::{Barrier, Semaphore};
use crate::tag::TagRef;

pub type ListRef = Rc<RefCell<Vec<Val>>>;
pub type ObjRef = Rc<Object>;

/// Runtime value type
#[derive(Clone)]
pub enum Val {
    /// Result of statements that produce nothing
    Void,
    Nil,
    Bool(bool),
    Num(f64),
    Str(String),
    List(ListRef),
    Object(ObjRef),
    Code(Rc<Closure>),
    NativeFunc(StdlibFunc),
    Tag(TagRef),
    Semaphore(Rc<Semaphore>),
    Barrier(Rc<Barrier>),
    Job(JobHandle),
    /// Error value with code and message
    Error(ErrorInfo),
}

impl Val {
    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Void | Val::Nil => false,
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0,
            _ => true,
        }
    }

    pub fn list(items: Vec<Val>) -> Val {
        Val::List(Rc::new(RefCell::new(items)))
    }

    /// Name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Void => "void",
            Val::Nil => "nil",
            Val::Bool(_) => "Bool",
            Val::Num(_) => "Float",
            Val::Str(_) => "String",
            Val::List(_) => "List",
            Val::Object(_) => "Object",
            Val::Code(_) => "Code",
            Val::NativeFunc(_) => "Primitive",
            Val::Tag(_) => "Tag",
            Val::Semaphore(_) => "Semaphore",
            Val::Barrier(_) => "Barrier",
            Val::Job(_) => "Job",
            Val::Error(_) => "Error",
        }
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Void, Val::Void) | (Val::Nil, Val::Nil) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Num(a), Val::Num(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::List(a), Val::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Val::Object(a), Val::Object(b)) => Rc::ptr_eq(a, b),
            (Val::Code(a), Val::Code(b)) => Rc::ptr_eq(a, b),
            (Val::NativeFunc(a), Val::NativeFunc(b)) => a == b,
            (Val::Tag(a), Val::Tag(b)) => Rc::ptr_eq(a, b),
            (Val::Semaphore(a), Val::Semaphore(b)) => Rc::ptr_eq(a, b),
            (Val::Barrier(a), Val::Barrier(b)) => Rc::ptr_eq(a, b),
            (Val::Job(a), Val::Job(b)) => a.id() == b.id(),
            (Val::Error(a), Val::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Void => write!(f, "void"),
            Val::Nil => write!(f, "nil"),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Val::Num(n) => write!(f, "{}", n),
            Val::Str(s) => write!(f, "{}", s),
            Val::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Val::Object(obj) => write!(f, "{}", obj.type_name()),
            Val::Code(c) => write!(f, "function({})", c.params().join(", ")),
            Val::NativeFunc(func) => write!(f, "primitive {:?}", func),
            Val::Tag(tag) => write!(f, "Tag<{}>", tag.name()),
            Val::Semaphore(s) => write!(f, "Semaphore<{}>", s.value()),
            Val::Barrier(_) => write!(f, "Barrier"),
            Val::Job(job) => write!(f, "Job<{}>", job.name()),
            Val::Error(e) => write!(f, "{}: {}", e.code, e.message),
        }
    }
}

impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Str(s) => write!(f, "{:?}", s),
            Val::Job(job) => write!(f, "Job({})", job.id()),
            other => write!(f, "{}", other),
        }
    }
}

/* ===================== Objects ===================== */

/// Prototype-based object: own slots plus an ordered list of prototypes
#[derive(Default)]
pub struct Object {
    slots: RefCell<HashMap<String, Val>>,
    protos: RefCell<Vec<ObjRef>>,
}

impl Object {
    pub fn new() -> ObjRef {
        Rc::new(Object::default())
    }

    /// Fresh object inheriting from `proto`
    pub fn derive(proto: &ObjRef) -> ObjRef {
        let obj = Object::default();
        obj.protos.borrow_mut().push(proto.clone());
        Rc::new(obj)
    }

    pub fn own_slot(&self, name: &str) -> Option<Val> {
        self.slots.borrow().get(name).cloned()
    }

    pub fn has_own_slot(&self, name: &str) -> bool {
        self.slots.borrow().contains_key(name)
    }

    pub fn set_slot(&self, name: impl Into<String>, value: Val) {
        self.slots.borrow_mut().insert(name.into(), value);
    }

    /// Slot lookup: own slots first, then prototypes depth-first
    pub fn lookup(&self, name: &str) -> Option<Val> {
        if let Some(v) = self.own_slot(name) {
            return Some(v);
        }
        self.protos.borrow().iter().find_map(|p| p.lookup(name))
    }

    /// Update the slot wherever it is found along the prototype chain
    pub fn update_slot(&self, name: &str, value: Val) -> bool {
        if self.has_own_slot(name) {
            self.set_slot(name, value);
            return true;
        }
        self.protos
            .borrow()
            .iter()
            .any(|p| p.update_slot(name, value.clone()))
    }

    pub fn protos(&self) -> Vec<ObjRef> {
        self.protos.borrow().clone()
    }

    /// True if `name` is the `type` of this object or of one of its prototypes
    pub fn is_a(&self, name: &str) -> bool {
        if matches!(self.own_slot("type"), Some(Val::Str(t)) if t == name) {
            return true;
        }
        self.protos.borrow().iter().any(|p| p.is_a(name))
    }

    pub fn type_name(&self) -> String {
        match self.lookup("type") {
            Some(Val::Str(t)) => t,
            _ => "Object".to_string(),
        }
    }
}

/* ===================== Closures ===================== */

/// A function value: the `Function` node plus its defining scope
pub struct Closure {
    pub ast: Rc<Ast>,
    pub node: NodeId,
    pub env: Rc<Scope>,
}

impl Closure {
    pub fn params(&self) -> Vec<String> {
        match self.ast.kind(self.node) {
            super::ast::NodeKind::Function { params, .. } => params.clone(),
            _ => vec![],
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("node", &self.node)
            .field("params", &self.params())
            .finish()
    }
}
