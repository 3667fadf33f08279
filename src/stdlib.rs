//! Builtin function registry.
//!
//! The parser asks the registry whether a name is a builtin (it biases call
//! detection and argument parsing); the evaluator hands it evaluated
//! arguments.  Builtins never raise: misuse produces a `Value::Error`.

use crate::value::Value;
use log::debug;
use std::collections::HashMap;
use std::io::Write;

/// Registry of host functions callable from scripts.
pub trait Stdlib {
    fn contains(&self, name: &str) -> bool;

    fn call(&self, name: &str, args: &[Value], out: &mut dyn Write) -> Value;
}

pub type NativeFn = fn(&[Value], &mut dyn Write) -> Value;

/// Error code carried by builtin failures.
pub const BUILTIN_ERROR: i32 = 1;

/// The default registry.
pub struct Builtins {
    functions: HashMap<&'static str, NativeFn>,
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new()
    }
}

impl Builtins {
    pub fn new() -> Self {
        let mut functions: HashMap<&'static str, NativeFn> = HashMap::new();

        functions.insert("print", print);
        functions.insert("len", len);
        functions.insert("upper", upper);
        functions.insert("lower", lower);
        functions.insert("trim", trim);
        functions.insert("split", split);
        functions.insert("join", join);
        functions.insert("contains", contains);
        functions.insert("replace", replace);
        functions.insert("abs", |a, _| math1(a, "abs", f64::abs));
        functions.insert("floor", |a, _| math1(a, "floor", f64::floor));
        functions.insert("ceil", |a, _| math1(a, "ceil", f64::ceil));
        functions.insert("round", |a, _| math1(a, "round", f64::round));
        functions.insert("sqrt", |a, _| math1(a, "sqrt", f64::sqrt));
        functions.insert("pow", pow);
        functions.insert("min", |a, _| fold_numbers(a, "min", f64::min));
        functions.insert("max", |a, _| fold_numbers(a, "max", f64::max));
        functions.insert("toString", to_string);
        functions.insert("toNumber", to_number);
        functions.insert("typeOf", type_of);
        functions.insert("push", push);
        functions.insert("pop", pop);
        functions.insert("keys", keys);
        functions.insert("jsonParse", json_parse);
        functions.insert("jsonStringify", json_stringify);
        functions.insert("now", now);

        Self { functions }
    }

    /// Add or replace a builtin.
    pub fn register(&mut self, name: &'static str, function: NativeFn) {
        self.functions.insert(name, function);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Stdlib for Builtins {
    fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn call(&self, name: &str, args: &[Value], out: &mut dyn Write) -> Value {
        debug!("Calling builtin '{}' with {} argument(s)", name, args.len());

        match self.functions.get(name) {
            Some(function) => function(args, out),
            None => Value::error(format!("Unknown builtin: {}", name), BUILTIN_ERROR),
        }
    }
}

// ───────────────────────────── helpers ───────────────────────────────────

fn fail<S: Into<String>>(message: S) -> Value {
    Value::error(message, BUILTIN_ERROR)
}

fn expect_args(args: &[Value], count: usize, name: &str) -> Option<Value> {
    if args.len() < count {
        Some(fail(format!(
            "{} expects {} argument(s), got {}",
            name,
            count,
            args.len()
        )))
    } else {
        None
    }
}

fn string_arg<'v>(args: &'v [Value], index: usize, name: &str) -> Result<&'v str, Value> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| fail(format!("{} expects a string argument", name)))
}

fn number_arg(args: &[Value], index: usize, name: &str) -> Result<f64, Value> {
    args.get(index)
        .and_then(Value::to_number)
        .ok_or_else(|| fail(format!("{} expects a number argument", name)))
}

// ───────────────────────────── io ────────────────────────────────────────

fn print(args: &[Value], out: &mut dyn Write) -> Value {
    let line: String = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    match writeln!(out, "{}", line) {
        Ok(()) => Value::Null,
        Err(e) => fail(format!("print failed: {}", e)),
    }
}

fn now(_args: &[Value], _out: &mut dyn Write) -> Value {
    Value::Number(chrono::Utc::now().timestamp_millis() as f64)
}

// ───────────────────────────── strings ───────────────────────────────────

fn len(args: &[Value], _out: &mut dyn Write) -> Value {
    if let Some(err) = expect_args(args, 1, "len") {
        return err;
    }

    match &args[0] {
        Value::Str(s) => Value::Number(s.chars().count() as f64),
        Value::Array(items) => Value::Number(items.borrow().len() as f64),
        Value::Object(object) => Value::Number(object.borrow().len() as f64),
        other => fail(format!("len: unsupported type {}", other.type_name())),
    }
}

fn upper(args: &[Value], _out: &mut dyn Write) -> Value {
    match string_arg(args, 0, "upper") {
        Ok(s) => Value::string(s.to_uppercase()),
        Err(e) => e,
    }
}

fn lower(args: &[Value], _out: &mut dyn Write) -> Value {
    match string_arg(args, 0, "lower") {
        Ok(s) => Value::string(s.to_lowercase()),
        Err(e) => e,
    }
}

fn trim(args: &[Value], _out: &mut dyn Write) -> Value {
    match string_arg(args, 0, "trim") {
        Ok(s) => Value::string(s.trim()),
        Err(e) => e,
    }
}

fn split(args: &[Value], _out: &mut dyn Write) -> Value {
    let text: &str = match string_arg(args, 0, "split") {
        Ok(s) => s,
        Err(e) => return e,
    };
    let separator: &str = args.get(1).and_then(Value::as_str).unwrap_or(" ");

    let parts: Vec<Value> = if separator.is_empty() {
        text.chars().map(|c| Value::string(c.to_string())).collect()
    } else {
        text.split(separator).map(Value::string).collect()
    };

    Value::array(parts)
}

fn join(args: &[Value], _out: &mut dyn Write) -> Value {
    let Some(Value::Array(items)) = args.first() else {
        return fail("join expects an array");
    };
    let separator: &str = args.get(1).and_then(Value::as_str).unwrap_or(",");

    let joined: String = items
        .borrow()
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(separator);

    Value::string(joined)
}

fn contains(args: &[Value], _out: &mut dyn Write) -> Value {
    if let Some(err) = expect_args(args, 2, "contains") {
        return err;
    }

    match (&args[0], &args[1]) {
        (Value::Str(haystack), Value::Str(needle)) => {
            Value::Boolean(haystack.contains(&**needle))
        }
        (Value::Array(items), needle) => {
            Value::Boolean(items.borrow().iter().any(|v| v.equals(needle)))
        }
        (Value::Object(object), Value::Str(key)) => {
            Value::Boolean(object.borrow().contains_key(&**key))
        }
        (other, _) => fail(format!("contains: unsupported type {}", other.type_name())),
    }
}

fn replace(args: &[Value], _out: &mut dyn Write) -> Value {
    let (text, from, to) = match (
        string_arg(args, 0, "replace"),
        string_arg(args, 1, "replace"),
        string_arg(args, 2, "replace"),
    ) {
        (Ok(t), Ok(f), Ok(r)) => (t, f, r),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e,
    };

    Value::string(text.replace(from, to))
}

// ───────────────────────────── math ──────────────────────────────────────

fn math1(args: &[Value], name: &str, op: fn(f64) -> f64) -> Value {
    match number_arg(args, 0, name) {
        Ok(n) => Value::Number(op(n)),
        Err(e) => e,
    }
}

fn pow(args: &[Value], _out: &mut dyn Write) -> Value {
    match (number_arg(args, 0, "pow"), number_arg(args, 1, "pow")) {
        (Ok(base), Ok(exp)) => Value::Number(base.powf(exp)),
        (Err(e), _) | (_, Err(e)) => e,
    }
}

/// `min`/`max` over the arguments, or over a single array argument.
fn fold_numbers(args: &[Value], name: &str, op: fn(f64, f64) -> f64) -> Value {
    let values: Vec<Value> = match args {
        [Value::Array(items)] => items.borrow().clone(),
        _ => args.to_vec(),
    };

    let mut acc: Option<f64> = None;
    for value in &values {
        let Some(n) = value.to_number() else {
            return fail(format!("{} expects numbers", name));
        };
        acc = Some(acc.map_or(n, |a| op(a, n)));
    }

    match acc {
        Some(n) => Value::Number(n),
        None => fail(format!("{} expects at least one number", name)),
    }
}

// ───────────────────────────── conversion ────────────────────────────────

fn to_string(args: &[Value], _out: &mut dyn Write) -> Value {
    match args.first() {
        Some(v) => Value::string(v.to_string()),
        None => fail("toString expects 1 argument"),
    }
}

fn to_number(args: &[Value], _out: &mut dyn Write) -> Value {
    match args.first().map(|v| (v, v.to_number())) {
        Some((_, Some(n))) => Value::Number(n),
        Some((v, None)) => fail(format!("Cannot convert {} to number", v)),
        None => fail("toNumber expects 1 argument"),
    }
}

fn type_of(args: &[Value], _out: &mut dyn Write) -> Value {
    match args.first() {
        Some(v) => Value::string(v.type_name()),
        None => fail("typeOf expects 1 argument"),
    }
}

// ───────────────────────────── collections ───────────────────────────────

/// Appends in place and returns the array itself.
fn push(args: &[Value], _out: &mut dyn Write) -> Value {
    let Some(Value::Array(items)) = args.first() else {
        return fail("push expects an array");
    };

    let pushed: Vec<Value> = args[1..]
        .iter()
        .map(|v| v.clone().detached_from(&args[0]))
        .collect();

    items.borrow_mut().extend(pushed);
    args[0].clone()
}

fn pop(args: &[Value], _out: &mut dyn Write) -> Value {
    let Some(Value::Array(items)) = args.first() else {
        return fail("pop expects an array");
    };

    let popped: Option<Value> = items.borrow_mut().pop();
    popped.unwrap_or(Value::Null)
}

fn keys(args: &[Value], _out: &mut dyn Write) -> Value {
    let Some(Value::Object(object)) = args.first() else {
        return fail("keys expects an object");
    };

    let keys: Vec<Value> = object.borrow().keys().map(Value::string).collect();
    Value::array(keys)
}

// ───────────────────────────── json ──────────────────────────────────────

fn json_parse(args: &[Value], _out: &mut dyn Write) -> Value {
    let text: &str = match string_arg(args, 0, "jsonParse") {
        Ok(s) => s,
        Err(e) => return e,
    };

    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(json) => Value::from_json(&json),
        Err(e) => fail(format!("Invalid JSON: {}", e)),
    }
}

fn json_stringify(args: &[Value], _out: &mut dyn Write) -> Value {
    match args.first() {
        Some(v) => Value::string(v.to_json().to_string()),
        None => fail("jsonStringify expects 1 argument"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Value {
        let mut sink: Vec<u8> = Vec::new();
        Builtins::new().call(name, args, &mut sink)
    }

    #[test]
    fn print_joins_arguments_with_spaces() {
        let mut sink: Vec<u8> = Vec::new();
        Builtins::new().call(
            "print",
            &[Value::string("a"), Value::Number(1.0)],
            &mut sink,
        );

        assert_eq!(String::from_utf8(sink).unwrap(), "a 1\n");
    }

    #[test]
    fn misuse_returns_error_values() {
        assert!(matches!(call("upper", &[Value::Number(1.0)]), Value::Error(_)));
        assert!(matches!(call("len", &[]), Value::Error(_)));
    }

    #[test]
    fn min_accepts_an_array() {
        let arr = Value::array(vec![Value::Number(3.0), Value::Number(-1.0)]);
        assert_eq!(call("min", &[arr]).as_number(), Some(-1.0));
    }
}
