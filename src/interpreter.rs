//! Tree-walking evaluator for Zen.
//!
//! Every node evaluates to an [`Outcome`]: `Ok(value)` for ordinary
//! completion, or a [`Signal`] for non-local control flow (`break`,
//! `continue`, `return`, a raised exception, or a self tail call).  Loops
//! consume `Break`/`Continue`, function calls consume `Return`/`TailCall`,
//! and `try` consumes `Raised`.  Whatever reaches the top becomes the result
//! of [`Interpreter::interpret`].
//!
//! The evaluator only reads the tree, so a retained [`Program`] may be
//! evaluated any number of times.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::mem;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use crate::ast::{Ast, BinaryOp, ClassDef, ExportItem, FunctionDef, UnaryOp};
use crate::config::Config;
use crate::error::{Result, ZenError};
use crate::module::{FsModuleLoader, ModuleLoader};
use crate::parser::{Parser, Program};
use crate::scope::{lookup_function, Scope, ScopeRef};
use crate::stack::ensure_sufficient_stack;
use crate::stdlib::{Builtins, Stdlib};
use crate::store::{JsonStore, KeyPathStore};
use crate::value::{format_number, Object, Value};

/// Error code carried by error values created for runtime failures.
pub const RUNTIME_ERROR_CODE: i32 = 2;

/// Largest array a `..` range or an index assignment may produce.
const MAX_ARRAY_LEN: f64 = 10_000_000.0;

/// The active exception: what was thrown, its message and where.
#[derive(Debug, Clone)]
pub struct Exception {
    pub value: Value,
    pub message: String,
    pub line: usize,

    /// Names of the functions that were executing, innermost last.
    pub trace: Vec<String>,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if self.line > 0 {
            write!(f, " (line {})", self.line)?;
        }
        Ok(())
    }
}

/// Non-local exits threaded through evaluation.
#[derive(Error, Debug)]
pub enum Signal {
    #[error("'break' outside of a loop")]
    Break,

    #[error("'continue' outside of a loop")]
    Continue,

    #[error("Return signal with value: {0}")]
    Return(Value),

    #[error("{0}")]
    Raised(Exception),

    /// `return f ...` where `f` is the running function: rerun the current
    /// frame with new arguments.
    #[error("Tail call with {} argument(s)", .0.len())]
    TailCall(Vec<Value>),
}

/// Result of evaluating one node.
pub type Outcome = std::result::Result<Value, Signal>;

/// One active user-function invocation.
#[derive(Debug)]
pub struct CallFrame {
    pub function: Rc<FunctionDef>,
    pub args: Vec<Value>,
    pub started: Instant,
    pub depth: usize,
    pub line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionStats {
    pub calls: u64,
    pub total: Duration,
    pub hot: bool,
}

/// Counters collected while evaluating.  None of them affect results.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub functions: HashMap<String, FunctionStats>,
    pub fold_hits: u64,
    pub fold_misses: u64,
    pub tail_calls: u64,
    pub eliminated: u64,
}

impl Profile {
    /// Names of functions that crossed the hot threshold, sorted.
    pub fn hot_functions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .functions
            .iter()
            .filter(|(_, stats)| stats.hot)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<(&String, &FunctionStats)> = self.functions.iter().collect();
        entries.sort_by(|a, b| b.1.calls.cmp(&a.1.calls).then_with(|| a.0.cmp(b.0)));

        writeln!(f, "{:<24} {:>10} {:>12}", "function", "calls", "total ms")?;
        for (name, stats) in entries {
            writeln!(
                f,
                "{:<24} {:>10} {:>12.3}{}",
                name,
                stats.calls,
                stats.total.as_secs_f64() * 1000.0,
                if stats.hot { "  (hot)" } else { "" }
            )?;
        }

        writeln!(
            f,
            "folding: {} hit(s), {} miss(es); tail calls: {}; eliminated: {}",
            self.fold_hits, self.fold_misses, self.tail_calls, self.eliminated
        )
    }
}

/// An evaluated module: its exported object and the scope its closures
/// refer to.
struct LoadedModule {
    exports: Value,
    _scope: ScopeRef,
}

pub struct Interpreter {
    config: Config,
    scope: ScopeRef,
    frames: Vec<CallFrame>,
    exception: Option<Exception>,
    profile: Profile,
    fold_cache: HashMap<String, Value>,
    stdlib: Box<dyn Stdlib>,
    loader: Box<dyn ModuleLoader>,
    store: Box<dyn KeyPathStore>,
    modules: HashMap<String, LoadedModule>,

    /// Modules whose bodies are being evaluated, outermost first.
    loading: Vec<String>,
    exports: Vec<(String, String)>,
    out: Box<dyn Write>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Interpreter {
    /// An interpreter with the default builtins, a filesystem module loader
    /// and a JSON key-path store rooted at the working directory.
    pub fn new(config: Config) -> Self {
        info!("Initializing Interpreter with {:?}", config);

        Self {
            config,
            scope: Scope::new_ref(),
            frames: Vec::new(),
            exception: None,
            profile: Profile::default(),
            fold_cache: HashMap::new(),
            stdlib: Box::new(Builtins::new()),
            loader: Box::new(FsModuleLoader::default()),
            store: Box::new(JsonStore::default()),
            modules: HashMap::new(),
            loading: Vec::new(),
            exports: Vec::new(),
            out: Box::new(io::stdout()),
        }
    }

    pub fn with_stdlib(mut self, stdlib: Box<dyn Stdlib>) -> Self {
        self.stdlib = stdlib;
        self
    }

    pub fn with_loader(mut self, loader: Box<dyn ModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_store(mut self, store: Box<dyn KeyPathStore>) -> Self {
        self.store = store;
        self
    }

    /// Redirect everything scripts print.
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    // ───────────────────────── accessors ──────────────────────────

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scope(&self) -> &ScopeRef {
        &self.scope
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.scope.borrow().get_variable(name)
    }

    /// The active exception, if the last evaluation raised one.
    pub fn exception(&self) -> Option<&Exception> {
        self.exception.as_ref()
    }

    pub fn clear_exception(&mut self) {
        self.exception = None;
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Replace the global scope with an empty one.
    pub fn reset_scope(&mut self) {
        debug!("Resetting global scope");
        self.scope = Scope::new_ref();
    }

    // ───────────────────────── entry points ───────────────────────

    /// Parse `source` against the current scope, so function definitions are
    /// visible to later lines (REPL).
    pub fn parse(&self, source: &str) -> Program {
        Parser::new(source, Rc::clone(&self.scope), &*self.stdlib).parse()
    }

    /// Parse and evaluate.  The first syntax error aborts before evaluation.
    pub fn run(&mut self, source: &str) -> Result<Value> {
        let program: Program = self.parse(source);

        if let Some(error) = program.errors.into_iter().next() {
            return Err(error);
        }

        self.interpret_node(&program.body)
    }

    /// Evaluate a parsed program.
    pub fn interpret(&mut self, program: &Program) -> Result<Value> {
        self.interpret_node(&program.body)
    }

    /// Evaluate any node as a top-level unit; uncaught exceptions become
    /// [`ZenError::Runtime`].
    pub fn interpret_node(&mut self, node: &Ast) -> Result<Value> {
        debug!("Interpreting {} node(s)", node.node_count());

        let outcome: Outcome = self.evaluate(node);
        self.frames.clear();
        let _ = self.out.flush();

        match outcome {
            Ok(value) | Err(Signal::Return(value)) => {
                info!("Interpretation completed: {}", value);
                Ok(value)
            }
            Err(Signal::Raised(exception)) => {
                Err(ZenError::runtime(exception.line, exception.message))
            }
            Err(signal @ (Signal::Break | Signal::Continue | Signal::TailCall(_))) => {
                warn!("Ignoring stray signal at top level: {}", signal);
                Ok(Value::Null)
            }
        }
    }

    // ───────────────────────── dispatch ───────────────────────────

    pub fn evaluate(&mut self, node: &Ast) -> Outcome {
        ensure_sufficient_stack(|| self.evaluate_node(node))
    }

    fn evaluate_node(&mut self, node: &Ast) -> Outcome {
        match node {
            Ast::Compound(statements) => self.evaluate_compound(statements),

            Ast::Noop | Ast::Null | Ast::Undecidable => Ok(Value::Null),
            Ast::Number(n) => Ok(Value::Number(*n)),
            Ast::Str(s) => Ok(Value::string(s)),
            Ast::Boolean(b) => Ok(Value::Boolean(*b)),

            Ast::Array(items) => {
                let values: Vec<Value> = self.evaluate_list(items)?;
                Ok(Value::array(values))
            }

            Ast::Object(pairs) => {
                let mut object: Object = Object::new();
                for (key, value) in pairs {
                    let value: Value = self.evaluate(value)?;
                    object.set(key.as_str(), value);
                }
                Ok(Value::object(object))
            }

            Ast::Spread(inner) => self.evaluate(inner),

            Ast::Variable { name, line } => self.evaluate_variable(name, *line),

            Ast::VariableDefinition { name, value, .. } => {
                let value: Value = self.evaluate(value)?;
                debug!("set {} = {}", name, value);
                self.scope.borrow_mut().set_variable(name.as_str(), value.clone());
                Ok(value)
            }

            Ast::Assignment {
                target,
                value,
                line,
            } => self.evaluate_assignment(target, value, *line),

            Ast::FunctionDefinition(def) => {
                self.scope.borrow_mut().add_function(Rc::clone(def));
                Ok(Value::Null)
            }

            Ast::FunctionCall { name, args, line } => self.call_named(name, args, *line),

            Ast::MethodCall {
                object,
                method,
                args,
                line,
            } => {
                let receiver: Value = self.evaluate(object)?;
                let args: Vec<Value> = self.evaluate_list(args)?;
                self.call_method(receiver, method, args, *line)
            }

            Ast::PropertyAccess {
                object,
                property,
                line,
            } => {
                let object: Value = self.evaluate(object)?;
                self.get_property(&object, property, *line)
            }

            Ast::IndexAccess {
                object,
                index,
                line,
            } => {
                let object: Value = self.evaluate(object)?;
                let index: Value = self.evaluate(index)?;
                self.index_value(&object, &index, *line)
            }

            Ast::Binary {
                op,
                left,
                right,
                line,
            } => self.evaluate_binary(node, *op, left, right, *line),

            Ast::Unary { op, operand, line } => {
                let value: Value = self.evaluate(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOp::Negate => match value.to_number() {
                        Some(n) => Ok(Value::Number(-n)),
                        None => Err(self.raise(
                            *line,
                            format!("Operand of '-' must be a number, got {}", value.type_name()),
                        )),
                    },
                }
            }

            Ast::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(then_expr)
                } else {
                    self.evaluate(else_expr)
                }
            }

            Ast::If {
                branches,
                else_branch,
            } => {
                for (condition, body) in branches {
                    if self.evaluate(condition)?.is_truthy() {
                        return self.evaluate(body);
                    }
                }

                match else_branch {
                    Some(body) => self.evaluate(body),
                    None => Ok(Value::Null),
                }
            }

            Ast::While { condition, body } => self.evaluate_while(condition, body),

            Ast::For {
                iterator,
                iterable,
                body,
            } => self.evaluate_for(iterator, iterable, body),

            Ast::Return(value) => self.evaluate_return(value.as_deref()),
            Ast::Break => Err(Signal::Break),
            Ast::Continue => Err(Signal::Continue),

            Ast::ClassDefinition(class) => self.define_class(class),

            Ast::New {
                class_name,
                args,
                line,
            } => {
                let args: Vec<Value> = self.evaluate_list(args)?;
                self.instantiate(class_name, args, *line)
            }

            Ast::Import { path, names, line } => self.evaluate_import(path, names, *line),

            Ast::Export(item) => self.evaluate_export(item),

            Ast::TryCatch {
                try_block,
                catch_var,
                catch_block,
            } => match self.evaluate(try_block) {
                Err(Signal::Raised(exception)) => {
                    debug!("Caught exception: {}", exception);
                    self.exception = None;

                    if let Some(name) = catch_var {
                        self.scope
                            .borrow_mut()
                            .set_variable(name.as_str(), exception.value);
                    }

                    self.evaluate(catch_block)
                }
                other => other,
            },

            Ast::Throw { value, line } => {
                let value: Value = self.evaluate(value)?;
                let message: String = match &value {
                    Value::Error(error) => error.message.clone(),
                    other => other.to_string(),
                };
                Err(self.raise_value(*line, value, message))
            }

            Ast::FileGet { target, path, line } => {
                let file: String = self.file_name(target)?;
                self.store_get(&file, path, *line)
            }

            Ast::FilePut {
                target,
                path,
                value,
                line,
            } => {
                let file: String = self.file_name(target)?;
                let value: Value = match &**value {
                    Ast::FileReference { file, path } => self.store_get(file, path, *line)?,
                    other => self.evaluate(other)?,
                };

                if let Err(e) = self.store.put(&file, path, &value) {
                    return Err(self.raise(*line, e.to_string()));
                }

                Ok(value)
            }

            Ast::FileReference { file, path } => self.store_get(file, path, 0),
        }
    }

    // ───────────────────────── statements ─────────────────────────

    fn evaluate_compound(&mut self, statements: &[Ast]) -> Outcome {
        let dce: bool = self.config.dead_code_elimination;

        // Nothing after an unconditional jump can run
        let end: usize = if dce {
            statements
                .iter()
                .position(|s| {
                    matches!(
                        s,
                        Ast::Return(_) | Ast::Break | Ast::Continue | Ast::Throw { .. }
                    )
                })
                .map_or(statements.len(), |i| i + 1)
        } else {
            statements.len()
        };
        self.profile.eliminated += (statements.len() - end) as u64;

        let mut last: Value = Value::Null;
        for (i, statement) in statements[..end].iter().enumerate() {
            if dce && statement.is_literal() && i + 1 < end {
                self.profile.eliminated += 1;
                continue;
            }

            last = self.evaluate(statement)?;
        }

        Ok(last)
    }

    fn evaluate_while(&mut self, condition: &Ast, body: &Ast) -> Outcome {
        let limit: Option<u64> = self.config.max_loop_iterations;
        let mut iterations: u64 = 0;

        while self.evaluate(condition)?.is_truthy() {
            iterations += 1;
            if let Some(limit) = limit {
                if iterations > limit {
                    return Err(self.raise(0, format!("Loop iteration limit exceeded ({})", limit)));
                }
            }

            match self.evaluate(body) {
                Ok(_) | Err(Signal::Continue) => {}
                Err(Signal::Break) => break,
                Err(signal) => return Err(signal),
            }
        }

        debug!("while loop finished after {} iteration(s)", iterations);
        Ok(Value::Null)
    }

    fn evaluate_for(&mut self, iterator: &str, iterable: &Ast, body: &Ast) -> Outcome {
        let iterable: Value = self.evaluate(iterable)?;

        let items: Vec<Value> = match &iterable {
            Value::Array(items) => items.borrow().clone(),
            Value::Object(object) => object
                .borrow()
                .keys()
                .filter(|k| !k.starts_with("__"))
                .map(Value::string)
                .collect(),
            Value::Str(s) => s.chars().map(|c| Value::string(c.to_string())).collect(),
            Value::Null => Vec::new(),
            other => {
                let message: String = format!("Cannot iterate over {}", other.type_name());
                return Err(self.raise(0, message));
            }
        };

        for item in items {
            self.scope.borrow_mut().set_variable(iterator, item);

            match self.evaluate(body) {
                Ok(_) | Err(Signal::Continue) => {}
                Err(Signal::Break) => break,
                Err(signal) => return Err(signal),
            }
        }

        Ok(Value::Null)
    }

    fn evaluate_return(&mut self, value: Option<&Ast>) -> Outcome {
        let Some(expression) = value else {
            return Err(Signal::Return(Value::Null));
        };

        if self.config.tail_calls {
            if let Ast::FunctionCall { name, args, line } = expression {
                if let Some(def) = self.self_call_target(name) {
                    let args: Vec<Value> = self.evaluate_list(args)?;
                    // raised here so an enclosing `try` in this body sees it
                    self.check_arity(&def, args.len(), *line)?;
                    return Err(Signal::TailCall(args));
                }
            }
        }

        let value: Value = self.evaluate(expression)?;
        Err(Signal::Return(value))
    }

    /// The innermost frame's function, when `name` resolves to it.
    fn self_call_target(&self, name: &str) -> Option<Rc<FunctionDef>> {
        let frame: &CallFrame = self.frames.last()?;

        if self.stdlib.contains(name) {
            return None;
        }

        let (def, _) = lookup_function(&self.scope, name)?;
        Rc::ptr_eq(&def, &frame.function).then_some(def)
    }

    fn evaluate_assignment(&mut self, target: &Ast, value: &Ast, line: usize) -> Outcome {
        let value: Value = self.evaluate(value)?;

        match target {
            Ast::PropertyAccess {
                object, property, ..
            } => {
                let object: Value = self.evaluate(object)?;
                let stored: Value = value.clone().detached_from(&object);

                match &object {
                    Value::Object(o) => {
                        o.borrow_mut().set(property.as_str(), stored);
                    }
                    Value::Array(items) => {
                        let Ok(index) = property.parse::<f64>() else {
                            let message: String =
                                format!("Cannot set property '{}' on array", property);
                            return Err(self.raise(line, message));
                        };
                        let written = store_index(&mut items.borrow_mut(), index, stored);
                        if let Err(message) = written {
                            return Err(self.raise(line, message));
                        }
                    }
                    other => {
                        let message: String = format!(
                            "Cannot set property '{}' on {}",
                            property,
                            other.type_name()
                        );
                        return Err(self.raise(line, message));
                    }
                }
            }

            Ast::IndexAccess { object, index, .. } => {
                let object: Value = self.evaluate(object)?;
                let index: Value = self.evaluate(index)?;
                let stored: Value = value.clone().detached_from(&object);

                match (&object, &index) {
                    (Value::Array(items), Value::Number(n)) => {
                        let written = store_index(&mut items.borrow_mut(), *n, stored);
                        if let Err(message) = written {
                            return Err(self.raise(line, message));
                        }
                    }
                    (Value::Object(o), key) => {
                        o.borrow_mut().set(key.to_string(), stored);
                    }
                    (other, index) => {
                        let message: String = format!(
                            "Cannot assign to index {} of {}",
                            index,
                            other.type_name()
                        );
                        return Err(self.raise(line, message));
                    }
                }
            }

            Ast::Variable { name, .. } => {
                self.scope.borrow_mut().set_variable(name.as_str(), value.clone());
            }

            _ => return Err(self.raise(line, "Invalid assignment target")),
        }

        Ok(value)
    }

    // ───────────────────────── expressions ────────────────────────

    /// Evaluate a list of expressions, splicing `...array` spreads.
    fn evaluate_list(&mut self, items: &[Ast]) -> std::result::Result<Vec<Value>, Signal> {
        let mut values: Vec<Value> = Vec::with_capacity(items.len());

        for item in items {
            match item {
                Ast::Spread(inner) => match self.evaluate(inner)? {
                    Value::Array(spread) => values.extend(spread.borrow().iter().cloned()),
                    other => values.push(other),
                },
                other => values.push(self.evaluate(other)?),
            }
        }

        Ok(values)
    }

    fn evaluate_variable(&mut self, name: &str, line: usize) -> Outcome {
        let found: Option<Value> = self.scope.borrow().get_variable(name);
        if let Some(value) = found {
            return Ok(value);
        }

        // A bare function name evaluates to a function value
        if let Some((def, owner)) = lookup_function(&self.scope, name) {
            return Ok(Value::function(def, &owner));
        }

        Err(self.raise(line, format!("Undefined variable: {}", name)))
    }

    fn evaluate_binary(
        &mut self,
        node: &Ast,
        op: BinaryOp,
        left: &Ast,
        right: &Ast,
        line: usize,
    ) -> Outcome {
        match op {
            BinaryOp::And => {
                let l: Value = self.evaluate(left)?;
                if !l.is_truthy() && !l.is_null() {
                    return Ok(l);
                }
                let r: Value = self.evaluate(right)?;
                return Ok(if l.is_null() || r.is_null() { Value::Null } else { r });
            }
            BinaryOp::Or => {
                let l: Value = self.evaluate(left)?;
                if l.is_truthy() {
                    return Ok(l);
                }
                let r: Value = self.evaluate(right)?;
                return Ok(if l.is_null() || r.is_null() { Value::Null } else { r });
            }
            _ => {}
        }

        let foldable: bool = self.config.constant_folding && left.is_literal() && right.is_literal();
        let key: Option<String> = foldable.then(|| format!("{:?}", node));

        if let Some(key) = &key {
            if let Some(cached) = self.fold_cache.get(key) {
                self.profile.fold_hits += 1;
                return Ok(cached.clone());
            }
            self.profile.fold_misses += 1;
        }

        let l: Value = self.evaluate(left)?;
        let r: Value = self.evaluate(right)?;
        let result: Value = self.binary_op(op, &l, &r, line)?;

        // containers are mutable, so each evaluation must build a fresh one
        if let Some(key) = key {
            if result.is_scalar() {
                self.fold_cache.insert(key, result.clone());
            }
        }

        Ok(result)
    }

    fn binary_op(&mut self, op: BinaryOp, l: &Value, r: &Value, line: usize) -> Outcome {
        let result: Value = match op {
            BinaryOp::Add => match (l, r) {
                (Value::Str(_), _) | (_, Value::Str(_)) => Value::string(format!("{}{}", l, r)),
                (Value::Array(a), Value::Array(b)) => {
                    let mut joined: Vec<Value> = a.borrow().clone();
                    joined.extend(b.borrow().iter().cloned());
                    Value::array(joined)
                }
                _ => Value::Number(self.numeric_operand(op, l, line)? + self.numeric_operand(op, r, line)?),
            },

            BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => {
                let a: f64 = self.numeric_operand(op, l, line)?;
                let b: f64 = self.numeric_operand(op, r, line)?;

                Value::Number(match op {
                    BinaryOp::Subtract => a - b,
                    BinaryOp::Multiply => a * b,
                    BinaryOp::Divide => a / b,
                    _ => a % b,
                })
            }

            BinaryOp::Equal => Value::Boolean(l.equals(r)),
            BinaryOp::NotEqual => Value::Boolean(!l.equals(r)),

            BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessEqual | BinaryOp::GreaterEqual => {
                let Some(ordering) = l.compare(r) else {
                    let message: String = format!(
                        "Cannot compare {} and {} with '{}'",
                        l.type_name(),
                        r.type_name(),
                        op.symbol()
                    );
                    return Err(self.raise(line, message));
                };

                Value::Boolean(match op {
                    BinaryOp::Less => ordering.is_lt(),
                    BinaryOp::Greater => ordering.is_gt(),
                    BinaryOp::LessEqual => ordering.is_le(),
                    _ => ordering.is_ge(),
                })
            }

            BinaryOp::Range => {
                let start: f64 = self.numeric_operand(op, l, line)?.trunc();
                let end: f64 = self.numeric_operand(op, r, line)?.trunc();

                if (end - start).abs() >= MAX_ARRAY_LEN {
                    return Err(self.raise(line, format!("Range {}..{} is too large", start, end)));
                }

                let (start, end) = (start as i64, end as i64);
                let items: Vec<Value> = if start <= end {
                    (start..=end).map(|n| Value::Number(n as f64)).collect()
                } else {
                    (end..=start).rev().map(|n| Value::Number(n as f64)).collect()
                };
                Value::array(items)
            }

            // non-short-circuit forms; `evaluate_binary` normally handles these
            BinaryOp::And if l.is_null() || r.is_null() => Value::Null,
            BinaryOp::And => if l.is_truthy() { r.clone() } else { l.clone() },
            BinaryOp::Or if l.is_truthy() => l.clone(),
            BinaryOp::Or if l.is_null() || r.is_null() => Value::Null,
            BinaryOp::Or => r.clone(),
        };

        Ok(result)
    }

    fn numeric_operand(&mut self, op: BinaryOp, value: &Value, line: usize) -> std::result::Result<f64, Signal> {
        match value.to_number() {
            Some(n) => Ok(n),
            None => {
                let message: String = format!(
                    "Operands of '{}' must be numbers, got {}",
                    op.symbol(),
                    value.type_name()
                );
                Err(self.raise(line, message))
            }
        }
    }

    fn get_property(&mut self, object: &Value, property: &str, line: usize) -> Outcome {
        debug!("Reading property '{}' of {}", property, object.type_name());

        let value: Value = match object {
            Value::Array(items) => {
                let items = items.borrow();
                if property == "length" {
                    Value::Number(items.len() as f64)
                } else {
                    property
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or_default()
                }
            }

            Value::Str(s) if property == "length" => Value::Number(s.chars().count() as f64),

            Value::Object(o) => {
                let class: Option<Value> = o.borrow().get("__class__").cloned();
                let method: Option<Value> = class.and_then(|c| find_method(&c, property));

                match method {
                    Some(method) => method,
                    None => o.borrow().get(property).cloned().unwrap_or_default(),
                }
            }

            Value::Error(e) => match property {
                "message" => Value::string(&e.message),
                "code" => Value::Number(e.code as f64),
                _ => Value::Null,
            },

            Value::Null => {
                let message: String = format!("Cannot read property '{}' of null", property);
                return Err(self.raise(line, message));
            }

            _ => Value::Null,
        };

        Ok(value)
    }

    fn index_value(&mut self, object: &Value, index: &Value, line: usize) -> Outcome {
        let value: Value = match (object, index) {
            (Value::Array(items), Value::Number(n)) => {
                let items = items.borrow();
                let i: f64 = if *n < 0.0 { items.len() as f64 + n } else { *n };
                if i < 0.0 || i.fract() != 0.0 {
                    Value::Null
                } else {
                    items.get(i as usize).cloned().unwrap_or_default()
                }
            }

            (Value::Str(s), Value::Number(n)) if *n >= 0.0 => s
                .chars()
                .nth(*n as usize)
                .map(|c| Value::string(c.to_string()))
                .unwrap_or_default(),

            (Value::Object(o), key) => o
                .borrow()
                .get(&key.to_string())
                .cloned()
                .unwrap_or_default(),

            (other, index) => {
                let message: String = format!(
                    "Cannot index {} with {}",
                    other.type_name(),
                    index.type_name()
                );
                return Err(self.raise(line, message));
            }
        };

        Ok(value)
    }

    // ───────────────────────── calls ──────────────────────────────

    /// `name args...`: a variable shadowing the name (zero arguments), a
    /// builtin, a user function, or a variable holding a function.
    fn call_named(&mut self, name: &str, args: &[Ast], line: usize) -> Outcome {
        let variable: Option<Value> = self.scope.borrow().get_variable(name);

        if args.is_empty() {
            if let Some(value) = &variable {
                if !matches!(value, Value::Function(_)) {
                    return Ok(value.clone());
                }
            }
        }

        if self.stdlib.contains(name) {
            let values: Vec<Value> = self.evaluate_list(args)?;
            debug!("Calling builtin '{}' with {} argument(s)", name, values.len());
            return Ok(self.stdlib.call(name, &values, &mut *self.out));
        }

        if let Some((def, owner)) = lookup_function(&self.scope, name) {
            let values: Vec<Value> = self.evaluate_list(args)?;
            return self.invoke_callable(&def, Some(owner), values, None, line);
        }

        if let Some(Value::Function(closure)) = variable {
            let values: Vec<Value> = self.evaluate_list(args)?;
            return self.invoke_callable(&closure.def, closure.scope.upgrade(), values, None, line);
        }

        Err(self.raise(line, format!("Undefined function or variable: {}", name)))
    }

    /// Invoke a user function.  Parameters are bound in a fresh scope whose
    /// parent is the defining scope, or the caller's when that is gone.
    fn invoke_callable(
        &mut self,
        def: &Rc<FunctionDef>,
        defining: Option<ScopeRef>,
        args: Vec<Value>,
        receiver: Option<Value>,
        line: usize,
    ) -> Outcome {
        self.check_arity(def, args.len(), line)?;

        if self.frames.len() >= self.config.max_call_depth {
            let message: String = format!(
                "Stack overflow: maximum call depth {} exceeded in '{}'",
                self.config.max_call_depth, def.name
            );
            return Err(self.raise(line, message));
        }

        self.record_call(&def.name);
        debug!("Calling '{}' with {} argument(s)", def.name, args.len());

        let parent: ScopeRef = defining.unwrap_or_else(|| Rc::clone(&self.scope));
        let started: Instant = Instant::now();
        self.frames.push(CallFrame {
            function: Rc::clone(def),
            args: args.clone(),
            started,
            depth: self.frames.len() + 1,
            line,
        });

        let mut args: Vec<Value> = args;
        let result: Outcome = loop {
            let call_scope: ScopeRef = Scope::with_parent(Rc::clone(&parent));
            {
                let mut scope = call_scope.borrow_mut();
                let mut values = args.into_iter();

                for param in &def.params {
                    scope.set_variable(param.as_str(), values.next().unwrap_or_default());
                }
                if let Some(rest) = &def.rest {
                    scope.set_variable(rest.as_str(), Value::array(values.collect()));
                }
                if let Some(receiver) = &receiver {
                    scope.set_variable("self", receiver.clone());
                }
            }

            let saved: ScopeRef = mem::replace(&mut self.scope, call_scope);
            let outcome: Outcome = self.evaluate(&def.body);
            self.scope = saved;

            match outcome {
                // the last statement's value is the implicit result
                Ok(value) | Err(Signal::Return(value)) => break Ok(value),
                Err(Signal::TailCall(next)) => {
                    self.profile.tail_calls += 1;
                    if let Some(frame) = self.frames.last_mut() {
                        frame.args = next.clone();
                    }
                    args = next;
                }
                Err(Signal::Break | Signal::Continue) => break Ok(Value::Null),
                Err(raised) => break Err(raised),
            }
        };

        self.frames.pop();

        if self.config.profiling {
            if let Some(stats) = self.profile.functions.get_mut(&def.name) {
                stats.total += started.elapsed();
            }
        }

        result
    }

    fn check_arity(&mut self, def: &FunctionDef, given: usize, line: usize) -> std::result::Result<(), Signal> {
        let expected: usize = def.arity();
        let ok: bool = if def.rest.is_some() {
            given >= expected
        } else {
            given == expected
        };

        if ok {
            return Ok(());
        }

        let message: String = format!(
            "Argument count mismatch: '{}' expects {}{} argument(s), got {}",
            def.name,
            if def.rest.is_some() { "at least " } else { "" },
            expected,
            given
        );
        Err(self.raise(line, message))
    }

    fn record_call(&mut self, name: &str) {
        if !self.config.profiling {
            return;
        }

        let threshold: u64 = self.config.hot_threshold;
        let stats: &mut FunctionStats = self.profile.functions.entry(name.to_string()).or_default();
        stats.calls += 1;

        if !stats.hot && stats.calls >= threshold {
            stats.hot = true;
            info!("Function '{}' is hot after {} calls", name, stats.calls);
        }
    }

    fn call_method(&mut self, receiver: Value, method: &str, args: Vec<Value>, line: usize) -> Outcome {
        debug!("Calling method '{}' on {}", method, receiver.type_name());

        if let Value::Object(object) = &receiver {
            let own: Option<Value> = object.borrow().get(method).cloned();
            let class: Option<Value> = object.borrow().get("__class__").cloned();
            let callable: Option<Value> = class
                .and_then(|c| find_method(&c, method))
                .or_else(|| own.clone().filter(|v| matches!(v, Value::Function(_))));

            if let Some(Value::Function(closure)) = callable {
                let this: Value = receiver.clone();
                return self.invoke_callable(&closure.def, closure.scope.upgrade(), args, Some(this), line);
            }

            if let Some(value) = own {
                if args.is_empty() {
                    return Ok(value);
                }
            }
        }

        // `list.push 4` → `push list 4`
        if self.stdlib.contains(method) {
            let mut values: Vec<Value> = Vec::with_capacity(args.len() + 1);
            values.push(receiver);
            values.extend(args);
            return Ok(self.stdlib.call(method, &values, &mut *self.out));
        }

        if args.is_empty() {
            return self.get_property(&receiver, method, line);
        }

        let message: String = format!("Undefined method '{}' on {}", method, receiver.type_name());
        Err(self.raise(line, message))
    }

    // ───────────────────────── classes ────────────────────────────

    /// A class is an object holding `__name__`, an optional `__parent__`
    /// and one `__method_<name>` function per method.
    fn define_class(&mut self, class: &ClassDef) -> Outcome {
        let mut object: Object = Object::new();
        object.set("__name__", Value::string(&class.name));

        if let Some(parent) = &class.parent {
            let found: Option<Value> = self.scope.borrow().get_variable(parent);
            match found {
                Some(value @ Value::Object(_)) => object.set("__parent__", value),
                _ => {
                    let message: String = format!("Undefined parent class: {}", parent);
                    return Err(self.raise(class.line, message));
                }
            }
        }

        for method in &class.methods {
            object.set(
                format!("__method_{}", method.name),
                Value::function(Rc::clone(method), &self.scope),
            );
        }

        debug!("Defined class '{}' with {} method(s)", class.name, class.methods.len());

        let value: Value = Value::object(object);
        self.scope
            .borrow_mut()
            .set_variable(class.name.as_str(), value.clone());

        Ok(value)
    }

    fn instantiate(&mut self, class_name: &str, args: Vec<Value>, line: usize) -> Outcome {
        let found: Option<Value> = self.scope.borrow().get_variable(class_name);
        let class: Value = match found {
            Some(value @ Value::Object(_)) if is_class(&value) => value,
            _ => return Err(self.raise(line, format!("Undefined class: {}", class_name))),
        };

        let mut object: Object = Object::new();
        object.set("__class__", class.clone());
        let instance: Value = Value::object(object);

        match find_method(&class, "constructor") {
            Some(Value::Function(constructor)) => {
                self.invoke_callable(
                    &constructor.def,
                    constructor.scope.upgrade(),
                    args,
                    Some(instance.clone()),
                    line,
                )?;
            }
            _ if !args.is_empty() => {
                let message: String =
                    format!("Class '{}' has no constructor but got arguments", class_name);
                return Err(self.raise(line, message));
            }
            _ => {}
        }

        Ok(instance)
    }

    // ───────────────────────── modules ────────────────────────────

    fn evaluate_import(&mut self, path: &str, names: &[String], line: usize) -> Outcome {
        let module: Value = self.load_module(path, line)?;
        let Value::Object(exports) = &module else {
            return Ok(module);
        };

        let bindings: Vec<(String, Value)> = if names.is_empty() {
            exports
                .borrow()
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect()
        } else {
            let mut bindings: Vec<(String, Value)> = Vec::with_capacity(names.len());
            for entry in names {
                let (original, alias) = entry
                    .split_once(':')
                    .unwrap_or((entry.as_str(), entry.as_str()));
                let found: Option<Value> = exports.borrow().get(original).cloned();
                match found {
                    Some(value) => bindings.push((alias.to_string(), value)),
                    None => {
                        let message: String =
                            format!("Module '{}' has no export '{}'", path, original);
                        return Err(self.raise(line, message));
                    }
                }
            }
            bindings
        };

        let mut scope = self.scope.borrow_mut();
        for (name, value) in bindings {
            debug!("import {} from '{}'", name, path);
            scope.set_variable(name, value);
        }
        drop(scope);

        Ok(module)
    }

    /// Load, evaluate and cache a module; returns its export object.
    fn load_module(&mut self, path: &str, line: usize) -> Outcome {
        if let Some(module) = self.modules.get(path) {
            debug!("Module '{}' served from cache", path);
            return Ok(module.exports.clone());
        }

        if self.loading.iter().any(|p| p == path) {
            let mut chain: Vec<&str> = self.loading.iter().map(String::as_str).collect();
            chain.push(path);
            let message: String = format!("Circular import: {}", chain.join(" -> "));
            return Err(self.raise(line, message));
        }

        info!("Loading module '{}'", path);

        let source: String = match self.loader.load(path) {
            Ok(source) => source,
            Err(e) => return Err(self.raise(line, e.to_string())),
        };

        let module_scope: ScopeRef = Scope::new_ref();
        let program: Program =
            Parser::new(&source, Rc::clone(&module_scope), &*self.stdlib).parse();

        if program.has_errors() {
            let message: String = format!(
                "Module '{}' has {} syntax error(s)",
                path,
                program.error_count()
            );
            return Err(self.raise(line, message));
        }

        let saved_scope: ScopeRef = mem::replace(&mut self.scope, Rc::clone(&module_scope));
        let saved_exports: Vec<(String, String)> = mem::take(&mut self.exports);

        self.loading.push(path.to_string());
        let outcome: Outcome = self.evaluate(&program.body);
        self.loading.pop();

        self.scope = saved_scope;
        let declared: Vec<(String, String)> = mem::replace(&mut self.exports, saved_exports);

        if let Err(Signal::Raised(exception)) = outcome {
            return Err(Signal::Raised(exception));
        }

        let mut exports: Object = Object::new();
        {
            let scope = module_scope.borrow();

            if declared.is_empty() {
                // everything public at the top level
                for name in scope.variable_names() {
                    if !name.starts_with('_') {
                        if let Some(value) = scope.get_variable(&name) {
                            exports.set(name, value);
                        }
                    }
                }
                for name in scope.function_names() {
                    if !name.starts_with('_') && !exports.contains_key(&name) {
                        if let Some(def) = scope.local_function(&name) {
                            exports.set(name, Value::function(def, &module_scope));
                        }
                    }
                }
            } else {
                for (exported, binding) in declared {
                    let value: Option<Value> = scope.get_variable(&binding).or_else(|| {
                        scope
                            .local_function(&binding)
                            .map(|def| Value::function(def, &module_scope))
                    });

                    match value {
                        Some(value) => exports.set(exported, value),
                        None => warn!("Module '{}' exports unknown name '{}'", path, binding),
                    }
                }
            }
        }

        let exports: Value = Value::object(exports);
        self.modules.insert(
            path.to_string(),
            LoadedModule {
                exports: exports.clone(),
                _scope: module_scope,
            },
        );

        Ok(exports)
    }

    fn evaluate_export(&mut self, item: &ExportItem) -> Outcome {
        match item {
            ExportItem::Declaration(declaration) => {
                let value: Value = self.evaluate(declaration)?;

                let name: Option<&str> = match &**declaration {
                    Ast::VariableDefinition { name, .. } => Some(name),
                    Ast::FunctionDefinition(def) => Some(&def.name),
                    _ => None,
                };
                if let Some(name) = name {
                    self.exports.push((name.to_string(), name.to_string()));
                }

                Ok(value)
            }

            ExportItem::Name { name, alias } => {
                let exported: String = alias.clone().unwrap_or_else(|| name.clone());
                self.exports.push((exported, name.clone()));
                Ok(Value::Null)
            }
        }
    }

    // ───────────────────────── key-path files ─────────────────────

    /// A file operand: a string value, or a bare name when no variable of
    /// that name exists.
    fn file_name(&mut self, target: &Ast) -> std::result::Result<String, Signal> {
        if let Ast::Variable { name, .. } = target {
            let found: Option<Value> = self.scope.borrow().get_variable(name);
            return Ok(match found {
                Some(value) => value.to_string(),
                None => name.clone(),
            });
        }

        Ok(self.evaluate(target)?.to_string())
    }

    fn store_get(&mut self, file: &str, path: &[String], line: usize) -> Outcome {
        match self.store.get(file, path) {
            Ok(value) => Ok(value),
            Err(e) => Err(self.raise(line, e.to_string())),
        }
    }

    // ───────────────────────── exceptions ─────────────────────────

    /// Record a runtime error in the exception slot and return the signal
    /// carrying it.
    fn raise<S: Into<String>>(&mut self, line: usize, message: S) -> Signal {
        let message: String = message.into();
        let value: Value = Value::error(message.as_str(), RUNTIME_ERROR_CODE);
        self.raise_value(line, value, message)
    }

    fn raise_value(&mut self, line: usize, value: Value, message: String) -> Signal {
        debug!("Raising at line {}: {}", line, message);

        let exception: Exception = Exception {
            value,
            message,
            line,
            trace: self.frames.iter().map(|f| f.function.name.clone()).collect(),
        };

        // last error wins
        self.exception = Some(exception.clone());
        Signal::Raised(exception)
    }
}

/// Write `value` at `index`, padding with nulls.  The index must be a
/// non-negative integer below [`MAX_ARRAY_LEN`].
fn store_index(
    items: &mut Vec<Value>,
    index: f64,
    value: Value,
) -> std::result::Result<(), String> {
    if !index.is_finite() || index < 0.0 || index.fract() != 0.0 {
        return Err(format!("Invalid array index {}", format_number(index)));
    }
    if index >= MAX_ARRAY_LEN {
        return Err(format!("Array index {} is too large", format_number(index)));
    }

    let index: usize = index as usize;
    if index >= items.len() {
        items.resize(index + 1, Value::Null);
    }
    items[index] = value;

    Ok(())
}

fn is_class(value: &Value) -> bool {
    match value {
        Value::Object(o) => o.borrow().contains_key("__name__"),
        _ => false,
    }
}

/// Walk `class` and its `__parent__` chain for `__method_<name>`.
fn find_method(class: &Value, name: &str) -> Option<Value> {
    let key: String = format!("__method_{}", name);
    let mut current: Value = class.clone();

    loop {
        let next: Value = {
            let Value::Object(object) = &current else {
                return None;
            };
            let object = object.borrow();

            if let Some(method) = object.get(&key) {
                return Some(method.clone());
            }
            object.get("__parent__")?.clone()
        };

        current = next;
    }
}
