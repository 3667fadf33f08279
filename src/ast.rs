//! Owned abstract syntax tree for Zen programs.
//!
//! Every node exclusively owns its children (`Box`/`Vec`), so dropping the
//! root releases the whole tree exactly once.  The two shared pieces are
//! function and class definitions: they sit behind an `Rc` because a
//! definition is also registered in a [`Scope`](crate::scope::Scope) and
//! captured by runtime function values after the tree itself is gone.
//!
//! The evaluator only ever reads nodes, which is what lets a retained tree be
//! evaluated any number of times (REPL history, module caches).

use serde::Serialize;
use std::rc::Rc;

/// Infix operators, in the order of their precedence groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Add,
    Subtract,
    Range,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Range => "..",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// A user function: `function name p1 p2 ...rest` followed by a block.
#[derive(Debug, PartialEq, Serialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,

    /// Trailing `...rest` parameter collecting surplus arguments.
    pub rest: Option<String>,

    pub body: Ast,
    pub line: usize,
}

impl FunctionDef {
    /// Number of arguments a call must supply at minimum.
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// `class Name [extends Parent]` with its methods.
#[derive(Debug, PartialEq, Serialize)]
pub struct ClassDef {
    pub name: String,
    pub parent: Option<String>,
    pub methods: Vec<Rc<FunctionDef>>,
    pub line: usize,
}

/// What an `export` statement publishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExportItem {
    /// `export function ...` / `export set ...`
    Declaration(Box<Ast>),

    /// `export name [as alias]`
    Name { name: String, alias: Option<String> },
}

/// **Abstract-Syntax-Tree node** for every statement and expression form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Ast {
    /// Statement list; evaluates to the value of its last statement.
    Compound(Vec<Ast>),

    /// Placeholder left where nothing (or nothing valid) was parsed.
    Noop,

    // ── literals ───────────────────────────────────────────────────────
    Number(f64),
    Str(String),
    Boolean(bool),
    Null,
    Undecidable,
    Array(Vec<Ast>),

    /// Ordered `key value` pairs.
    Object(Vec<(String, Ast)>),

    /// `...expr` inside an array literal or argument list.
    Spread(Box<Ast>),

    // ── names and bindings ─────────────────────────────────────────────
    Variable {
        name: String,
        line: usize,
    },

    /// `set name value`
    VariableDefinition {
        name: String,
        value: Box<Ast>,
        line: usize,
    },

    /// `set target.prop value` / `set target[index] value`
    Assignment {
        target: Box<Ast>,
        value: Box<Ast>,
        line: usize,
    },

    FunctionDefinition(Rc<FunctionDef>),

    /// `name arg1 arg2 ...`
    FunctionCall {
        name: String,
        args: Vec<Ast>,
        line: usize,
    },

    /// `object.method arg1 arg2 ...`
    MethodCall {
        object: Box<Ast>,
        method: String,
        args: Vec<Ast>,
        line: usize,
    },

    /// `object.property`
    PropertyAccess {
        object: Box<Ast>,
        property: String,
        line: usize,
    },

    /// `object[index]`
    IndexAccess {
        object: Box<Ast>,
        index: Box<Ast>,
        line: usize,
    },

    // ── operators ──────────────────────────────────────────────────────
    Binary {
        op: BinaryOp,
        left: Box<Ast>,
        right: Box<Ast>,
        line: usize,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Ast>,
        line: usize,
    },

    /// `condition ? then : otherwise`
    Ternary {
        condition: Box<Ast>,
        then_expr: Box<Ast>,
        else_expr: Box<Ast>,
    },

    // ── control flow ───────────────────────────────────────────────────
    /// `if` plus any `elif` arms, in source order.
    If {
        branches: Vec<(Ast, Ast)>,
        else_branch: Option<Box<Ast>>,
    },

    While {
        condition: Box<Ast>,
        body: Box<Ast>,
    },

    /// `for iterator in iterable`
    For {
        iterator: String,
        iterable: Box<Ast>,
        body: Box<Ast>,
    },

    Return(Option<Box<Ast>>),
    Break,
    Continue,

    // ── classes ────────────────────────────────────────────────────────
    ClassDefinition(Rc<ClassDef>),

    /// `new Class args...`
    New {
        class_name: String,
        args: Vec<Ast>,
        line: usize,
    },

    // ── modules ────────────────────────────────────────────────────────
    /// `import "path"` or `import a [as b], c from "path"`.
    /// Names are stored as `original` or `original:alias`.
    Import {
        path: String,
        names: Vec<String>,
        line: usize,
    },

    Export(ExportItem),

    // ── exceptions ─────────────────────────────────────────────────────
    TryCatch {
        try_block: Box<Ast>,
        catch_var: Option<String>,
        catch_block: Box<Ast>,
    },

    Throw {
        value: Box<Ast>,
        line: usize,
    },

    // ── key-path files ─────────────────────────────────────────────────
    /// `get target [.a.b]`
    FileGet {
        target: Box<Ast>,
        path: Vec<String>,
        line: usize,
    },

    /// `put target [.a.b] value`
    FilePut {
        target: Box<Ast>,
        path: Vec<String>,
        value: Box<Ast>,
        line: usize,
    },

    /// `"@ file dot.path"` used as a `put` value.
    FileReference {
        file: String,
        path: Vec<String>,
    },
}

impl Ast {
    /// Literal leaves whose value never depends on evaluation state.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Ast::Number(_) | Ast::Str(_) | Ast::Boolean(_) | Ast::Null | Ast::Undecidable
        )
    }

    /// Number of nodes in this subtree, the root included.
    pub fn node_count(&self) -> usize {
        let children: usize = match self {
            Ast::Compound(items) | Ast::Array(items) => items.iter().map(Ast::node_count).sum(),
            Ast::Object(pairs) => pairs.iter().map(|(_, v)| v.node_count()).sum(),
            Ast::Spread(inner) => inner.node_count(),
            Ast::VariableDefinition { value, .. } => value.node_count(),
            Ast::Assignment { target, value, .. } => target.node_count() + value.node_count(),
            Ast::FunctionDefinition(def) => def.body.node_count(),
            Ast::FunctionCall { args, .. } | Ast::New { args, .. } => {
                args.iter().map(Ast::node_count).sum()
            }
            Ast::MethodCall { object, args, .. } => {
                object.node_count() + args.iter().map(Ast::node_count).sum::<usize>()
            }
            Ast::PropertyAccess { object, .. } => object.node_count(),
            Ast::IndexAccess { object, index, .. } => object.node_count() + index.node_count(),
            Ast::Binary { left, right, .. } => left.node_count() + right.node_count(),
            Ast::Unary { operand, .. } => operand.node_count(),
            Ast::Ternary {
                condition,
                then_expr,
                else_expr,
            } => condition.node_count() + then_expr.node_count() + else_expr.node_count(),
            Ast::If {
                branches,
                else_branch,
            } => {
                branches
                    .iter()
                    .map(|(c, b)| c.node_count() + b.node_count())
                    .sum::<usize>()
                    + else_branch.as_ref().map_or(0, |b| b.node_count())
            }
            Ast::While { condition, body } => condition.node_count() + body.node_count(),
            Ast::For { iterable, body, .. } => iterable.node_count() + body.node_count(),
            Ast::Return(value) => value.as_ref().map_or(0, |v| v.node_count()),
            Ast::ClassDefinition(class) => class.methods.iter().map(|m| m.body.node_count()).sum(),
            Ast::Export(ExportItem::Declaration(inner)) => inner.node_count(),
            Ast::TryCatch {
                try_block,
                catch_block,
                ..
            } => try_block.node_count() + catch_block.node_count(),
            Ast::Throw { value, .. } => value.node_count(),
            Ast::FileGet { target, .. } => target.node_count(),
            Ast::FilePut { target, value, .. } => target.node_count() + value.node_count(),
            _ => 0,
        };

        children + 1
    }
}
