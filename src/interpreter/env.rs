//! Lexical scopes
//!
//! Scopes are shared: closures capture them and sibling jobs spawned by
//! `,`/`&` evaluate in the scope of their spawner.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::types::Val;

#[derive(Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Val>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn root() -> Rc<Scope> {
        Rc::new(Scope::default())
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Val> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Bind `name` in this scope, shadowing outer bindings
    pub fn declare(&self, name: impl Into<String>, value: Val) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    /// Rebind the nearest existing `name`. Returns false if it is unbound.
    pub fn assign(&self, name: &str, value: Val) -> bool {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            *slot = value;
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.vars.borrow().keys().cloned().collect();
        names.sort();
        write!(f, "Scope{:?}", names)
    }
}
