//! Runtime values produced by evaluation.
//!
//! Scalars are stored inline.  Strings, arrays, objects, functions and
//! errors are shared through `Rc`: cloning a [`Value`] takes a reference,
//! dropping it releases one, and the last release frees the payload and
//! (for containers) every element.
//!
//! Containers may be shared but never hold themselves: a store into a
//! container goes through [`Value::detached_from`], which copies the stored
//! value when it already reaches that container.  Values therefore stay
//! acyclic, and printing, JSON conversion and drops all terminate.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Number};

use crate::ast::FunctionDef;
use crate::scope::Scope;

/// Ordered `key → value` map with unique keys.
#[derive(Debug, Clone, Default)]
pub struct Object {
    entries: Vec<(String, Value)>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or overwrite, keeping the original position of an existing key.
    pub fn set<K: Into<String>>(&mut self, key: K, value: Value) {
        let key: String = key.into();

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A user function captured as a value, with the scope it was defined in.
///
/// The scope link is weak: scopes store function values, and a strong link
/// back would keep both alive forever.
#[derive(Debug)]
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub scope: Weak<RefCell<Scope>>,
}

/// Error payload carried by `Value::Error`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub message: String,
    pub code: i32,
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    Str(Rc<str>),
    Boolean(bool),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<Object>>),
    Function(Rc<Closure>),
    Error(Rc<ErrorValue>),
}

impl Value {
    // ───────────────────────────── constructors ────────────────────────────

    pub fn string<S: AsRef<str>>(s: S) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(object: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(object)))
    }

    pub fn error<S: Into<String>>(message: S, code: i32) -> Self {
        Value::Error(Rc::new(ErrorValue {
            message: message.into(),
            code,
        }))
    }

    pub fn function(def: Rc<FunctionDef>, scope: &Rc<RefCell<Scope>>) -> Self {
        Value::Function(Rc::new(Closure {
            def,
            scope: Rc::downgrade(scope),
        }))
    }

    // ───────────────────────────── inspection ──────────────────────────────

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Error(_) => "error",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numbers, strings, booleans and null: values no script can mutate.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Number(_) | Value::Str(_) | Value::Boolean(_)
        )
    }

    /// Number of live references to a shared payload; `None` for scalars,
    /// which are copied rather than shared.
    pub fn ref_count(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(Rc::strong_count(s)),
            Value::Array(a) => Some(Rc::strong_count(a)),
            Value::Object(o) => Some(Rc::strong_count(o)),
            Value::Function(f) => Some(Rc::strong_count(f)),
            Value::Error(e) => Some(Rc::strong_count(e)),
            _ => None,
        }
    }

    /// null, false, 0, NaN, empty string/array/object and errors are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.borrow().is_empty(),
            Value::Object(o) => !o.borrow().is_empty(),
            Value::Error(_) => false,
            Value::Function(_) => true,
        }
    }

    /// Numeric view used by arithmetic: booleans are 0/1, null is 0, and
    /// strings convert when they hold a complete numeral.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => Some(0.0),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Equality: same type and same content for scalars, same identity for
    /// arrays, objects, functions and errors.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Ordering for relational operators.  Same-type numbers, strings and
    /// booleans compare directly; mixed scalars compare numerically.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(std::cmp::Ordering::Equal),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => {
                let a: f64 = self.to_number()?;
                let b: f64 = other.to_number()?;
                a.partial_cmp(&b)
            }
        }
    }

    // ───────────────────────────── containment ─────────────────────────────

    /// Is `container` this very array/object, or nested anywhere inside it?
    pub fn reaches(&self, container: &Value) -> bool {
        match (self, container) {
            (Value::Array(a), Value::Array(b)) if Rc::ptr_eq(a, b) => true,
            (Value::Object(a), Value::Object(b)) if Rc::ptr_eq(a, b) => true,
            (Value::Array(items), _) => items.borrow().iter().any(|v| v.reaches(container)),
            (Value::Object(object), _) => object.borrow().iter().any(|(_, v)| v.reaches(container)),
            _ => false,
        }
    }

    /// A fresh copy of every nested array and object.  Other payloads stay
    /// shared.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Array(items) => Value::array(items.borrow().iter().map(Value::deep_copy).collect()),
            Value::Object(object) => {
                let mut copy: Object = Object::new();
                for (k, v) in object.borrow().iter() {
                    copy.set(k, v.deep_copy());
                }
                Value::object(copy)
            }
            other => other.clone(),
        }
    }

    /// The value to store inside `container`: `self`, or a deep copy when
    /// storing `self` as is would make `container` contain itself.
    pub fn detached_from(self, container: &Value) -> Value {
        if matches!(container, Value::Array(_) | Value::Object(_)) && self.reaches(container) {
            self.deep_copy()
        } else {
            self
        }
    }

    // ───────────────────────────── JSON bridge ─────────────────────────────

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    serde_json::Value::Number(Number::from(*n as i64))
                } else {
                    Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Array(items) => {
                serde_json::Value::Array(items.borrow().iter().map(Value::to_json).collect())
            }
            Value::Object(object) => {
                let mut map: Map<String, serde_json::Value> = Map::new();
                for (k, v) in object.borrow().iter() {
                    map.insert(k.to_string(), v.to_json());
                }
                serde_json::Value::Object(map)
            }
            Value::Function(f) => serde_json::Value::String(format!("[function {}]", f.def.name)),
            Value::Error(e) => serde_json::Value::String(format!("[error: {}]", e.message)),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::string(s),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let mut object: Object = Object::new();
                for (k, v) in map {
                    object.set(k.as_str(), Value::from_json(v));
                }
                Value::object(object)
            }
        }
    }
}

/// Render a number the way scripts print it: integral values without a
/// fraction, everything else with up to six significant digits.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }

    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    if n.fract() == 0.0 && n.abs() < 1e15 {
        let mut buf: itoa::Buffer = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }

    let exponent: i32 = n.abs().log10().floor() as i32;

    if !(-5..15).contains(&exponent) {
        let formatted: String = format!("{:.5e}", n);
        let (mantissa, exp) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        return format!("{}e{}", trim_fraction(mantissa), exp);
    }

    let decimals: usize = (5 - exponent).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, n)).to_string()
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),

            Value::Number(n) => write!(f, "{}", format_number(*n)),

            Value::Str(s) => write!(f, "{}", s),

            Value::Boolean(b) => write!(f, "{}", b),

            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }

            Value::Object(object) => {
                write!(f, "{{")?;
                for (i, (k, v)) in object.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }

            Value::Function(_) => write!(f, "[function]"),

            Value::Error(e) => write!(f, "[error: {}]", e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_render_compactly() {
        assert_eq!(format_number(100000.0), "100000");
        assert_eq!(format_number(0.0025), "0.0025");
        assert_eq!(format_number(3.14159265), "3.14159");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(format_number(1.0 / 0.0), "inf");
    }

    #[test]
    fn object_set_keeps_keys_unique_and_ordered() {
        let mut object = Object::new();
        object.set("b", Value::Number(1.0));
        object.set("a", Value::Number(2.0));
        object.set("b", Value::Number(3.0));

        let keys: Vec<&str> = object.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(object.get("b").and_then(Value::as_number), Some(3.0));
    }

    #[test]
    fn storing_a_container_into_itself_copies_it() {
        let list = Value::array(vec![Value::Number(1.0)]);
        let outer = Value::array(vec![list.clone()]);

        assert!(list.reaches(&list));
        assert!(outer.reaches(&list));
        assert!(!list.reaches(&outer));

        let stored = outer.clone().detached_from(&list);
        assert!(!stored.equals(&outer));
        assert!(!stored.reaches(&list));
        assert_eq!(stored.to_string(), "[[1]]");

        // unrelated values are stored by reference
        let other = Value::array(Vec::new());
        assert!(other.clone().detached_from(&list).equals(&other));
    }
}
