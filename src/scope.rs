//! Lexical scopes: a function table and a variable table per level, linked
//! to an enclosing scope.
//!
//! Lookups walk the parent chain; definitions always land in the scope they
//! are made in.  Function bodies run in a fresh scope whose parent is the
//! scope the function was defined in.

use crate::ast::FunctionDef;
use crate::value::Value;
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug, Default)]
pub struct Scope {
    functions: HashMap<String, Rc<FunctionDef>>,
    variables: HashMap<String, Value>,
    parent: Option<ScopeRef>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_ref() -> ScopeRef {
        Rc::new(RefCell::new(Scope::new()))
    }

    pub fn with_parent(parent: ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            functions: HashMap::new(),
            variables: HashMap::new(),
            parent: Some(parent),
        }))
    }

    pub fn parent(&self) -> Option<ScopeRef> {
        self.parent.clone()
    }

    /// Register a function in this scope.  The first definition of a name
    /// wins; returns `false` when the name was already taken here.
    pub fn add_function(&mut self, def: Rc<FunctionDef>) -> bool {
        if self.functions.contains_key(&def.name) {
            debug!("Function '{}' already defined, keeping the first", def.name);
            return false;
        }

        debug!("Registering function '{}'", def.name);
        self.functions.insert(def.name.clone(), def);
        true
    }

    /// Define or overwrite a variable in this scope (never a parent's).
    pub fn set_variable<S: Into<String>>(&mut self, name: S, value: Value) {
        self.variables.insert(name.into(), value);
    }

    /// Look a variable up here, then in each enclosing scope.
    pub fn get_variable(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.variables.get(name) {
            Some(value.clone())
        } else if let Some(parent) = &self.parent {
            parent.borrow().get_variable(name)
        } else {
            None
        }
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.get_variable(name).is_some()
    }

    /// Look a function up here, then in each enclosing scope.
    pub fn get_function(&self, name: &str) -> Option<Rc<FunctionDef>> {
        if let Some(def) = self.functions.get(name) {
            Some(Rc::clone(def))
        } else if let Some(parent) = &self.parent {
            parent.borrow().get_function(name)
        } else {
            None
        }
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.get_function(name).is_some()
    }

    pub fn local_function(&self, name: &str) -> Option<Rc<FunctionDef>> {
        self.functions.get(name).cloned()
    }

    pub fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Resolve `name` through the chain starting at `scope`, returning the
/// definition together with the scope that owns it.
pub fn lookup_function(scope: &ScopeRef, name: &str) -> Option<(Rc<FunctionDef>, ScopeRef)> {
    let mut current: ScopeRef = Rc::clone(scope);

    loop {
        let next: Option<ScopeRef> = {
            let borrowed = current.borrow();
            if let Some(def) = borrowed.local_function(name) {
                return Some((def, Rc::clone(&current)));
            }
            borrowed.parent()
        };

        current = next?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ast;

    fn def(name: &str, line: usize) -> Rc<FunctionDef> {
        Rc::new(FunctionDef {
            name: name.to_string(),
            params: vec![],
            rest: None,
            body: Ast::Compound(vec![]),
            line,
        })
    }

    #[test]
    fn variables_resolve_through_parents() {
        let global = Scope::new_ref();
        global.borrow_mut().set_variable("x", Value::Number(1.0));

        let inner = Scope::with_parent(Rc::clone(&global));
        inner.borrow_mut().set_variable("y", Value::Number(2.0));

        assert!(inner.borrow().has_variable("x"));
        assert!(!global.borrow().has_variable("y"));
    }

    #[test]
    fn set_variable_shadows_instead_of_writing_through() {
        let global = Scope::new_ref();
        global.borrow_mut().set_variable("x", Value::Number(1.0));

        let inner = Scope::with_parent(Rc::clone(&global));
        inner.borrow_mut().set_variable("x", Value::Number(5.0));

        assert_eq!(
            global.borrow().get_variable("x").and_then(|v| v.as_number()),
            Some(1.0)
        );
        assert_eq!(
            inner.borrow().get_variable("x").and_then(|v| v.as_number()),
            Some(5.0)
        );
    }

    #[test]
    fn first_function_definition_wins() {
        let global = Scope::new_ref();
        assert!(global.borrow_mut().add_function(def("f", 1)));
        assert!(!global.borrow_mut().add_function(def("f", 7)));

        let inner = Scope::with_parent(Rc::clone(&global));
        let (found, owner) = lookup_function(&inner, "f").expect("f resolves");
        assert_eq!(found.line, 1);
        assert!(Rc::ptr_eq(&owner, &global));
        assert_eq!(inner.borrow().get_function("f").map(|d| d.line), Some(1));
        assert!(inner.borrow().local_function("f").is_none());
    }
}
