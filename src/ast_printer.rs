use crate::ast::{Ast, ExportItem, FunctionDef, UnaryOp};
use crate::value::format_number;

/// Renders a tree in parenthesised prefix form, one top-level statement per
/// line.  Used by `zen parse` and in tests to compare shapes compactly.
pub struct AstPrinter;

impl AstPrinter {
    pub fn print(node: &Ast) -> String {
        match node {
            Ast::Compound(statements) => {
                let parts: Vec<String> = statements.iter().map(Self::print).collect();
                parts.join("\n")
            }

            Ast::Noop => "(noop)".into(),

            // ── literals ────────────────────────────────────────────────
            Ast::Number(n) => format_number(*n),

            Ast::Str(s) => format!("{:?}", s),

            Ast::Boolean(b) => b.to_string(),

            Ast::Null => "null".into(),

            Ast::Undecidable => "undecidable".into(),

            Ast::Array(items) => Self::list("array", items),

            Ast::Object(pairs) => {
                let mut s = String::from("(object");
                for (key, value) in pairs {
                    s.push_str(&format!(" ({} {})", key, Self::print(value)));
                }
                s.push(')');
                s
            }

            Ast::Spread(inner) => format!("(... {})", Self::print(inner)),

            // ── names ───────────────────────────────────────────────────
            Ast::Variable { name, .. } => name.clone(),

            Ast::VariableDefinition { name, value, .. } => {
                format!("(set {} {})", name, Self::print(value))
            }

            Ast::Assignment { target, value, .. } => {
                format!("(set {} {})", Self::print(target), Self::print(value))
            }

            Ast::FunctionDefinition(def) => Self::function("function", def),

            Ast::FunctionCall { name, args, .. } => {
                let head: String = format!("call {}", name);
                Self::list(&head, args)
            }

            Ast::MethodCall {
                object,
                method,
                args,
                ..
            } => {
                let head: String = format!("call {}.{}", Self::print(object), method);
                Self::list(&head, args)
            }

            Ast::PropertyAccess {
                object, property, ..
            } => format!("(. {} {})", Self::print(object), property),

            Ast::IndexAccess { object, index, .. } => {
                format!("(index {} {})", Self::print(object), Self::print(index))
            }

            // ── operators ───────────────────────────────────────────────
            Ast::Binary {
                op, left, right, ..
            } => format!(
                "({} {} {})",
                op.symbol(),
                Self::print(left),
                Self::print(right)
            ),

            Ast::Unary { op, operand, .. } => {
                let symbol: &str = match op {
                    UnaryOp::Not => "not",
                    UnaryOp::Negate => "-",
                };
                format!("({} {})", symbol, Self::print(operand))
            }

            Ast::Ternary {
                condition,
                then_expr,
                else_expr,
            } => format!(
                "(? {} {} {})",
                Self::print(condition),
                Self::print(then_expr),
                Self::print(else_expr)
            ),

            // ── control flow ────────────────────────────────────────────
            Ast::If {
                branches,
                else_branch,
            } => {
                let mut s = String::from("(if");
                for (condition, body) in branches {
                    s.push_str(&format!(" ({} {})", Self::print(condition), Self::block(body)));
                }
                if let Some(body) = else_branch {
                    s.push_str(&format!(" (else {})", Self::block(body)));
                }
                s.push(')');
                s
            }

            Ast::While { condition, body } => {
                format!("(while {} {})", Self::print(condition), Self::block(body))
            }

            Ast::For {
                iterator,
                iterable,
                body,
            } => format!(
                "(for {} {} {})",
                iterator,
                Self::print(iterable),
                Self::block(body)
            ),

            Ast::Return(Some(value)) => format!("(return {})", Self::print(value)),
            Ast::Return(None) => "(return)".into(),
            Ast::Break => "(break)".into(),
            Ast::Continue => "(continue)".into(),

            // ── classes ─────────────────────────────────────────────────
            Ast::ClassDefinition(class) => {
                let mut s = format!("(class {}", class.name);
                if let Some(parent) = &class.parent {
                    s.push_str(&format!(" (extends {})", parent));
                }
                for method in &class.methods {
                    s.push(' ');
                    s.push_str(&Self::function("method", method));
                }
                s.push(')');
                s
            }

            Ast::New {
                class_name, args, ..
            } => {
                let head: String = format!("new {}", class_name);
                Self::list(&head, args)
            }

            // ── modules ─────────────────────────────────────────────────
            Ast::Import { path, names, .. } => {
                if names.is_empty() {
                    format!("(import {:?})", path)
                } else {
                    format!("(import {:?} {})", path, names.join(" "))
                }
            }

            Ast::Export(ExportItem::Declaration(inner)) => format!("(export {})", Self::print(inner)),

            Ast::Export(ExportItem::Name { name, alias }) => match alias {
                Some(alias) => format!("(export {} {})", name, alias),
                None => format!("(export {})", name),
            },

            // ── exceptions ──────────────────────────────────────────────
            Ast::TryCatch {
                try_block,
                catch_var,
                catch_block,
            } => format!(
                "(try {} (catch {}{}))",
                Self::block(try_block),
                catch_var.as_deref().map(|v| format!("{} ", v)).unwrap_or_default(),
                Self::block(catch_block)
            ),

            Ast::Throw { value, .. } => format!("(throw {})", Self::print(value)),

            // ── key-path files ──────────────────────────────────────────
            Ast::FileGet { target, path, .. } => {
                format!("(get {}{})", Self::print(target), Self::key_path(path))
            }

            Ast::FilePut {
                target,
                path,
                value,
                ..
            } => format!(
                "(put {}{} {})",
                Self::print(target),
                Self::key_path(path),
                Self::print(value)
            ),

            Ast::FileReference { file, path } => format!("(@ {}{})", file, Self::key_path(path)),
        }
    }

    fn list(head: &str, items: &[Ast]) -> String {
        let mut s = format!("({}", head);
        for item in items {
            s.push(' ');
            s.push_str(&Self::print(item));
        }
        s.push(')');
        s
    }

    /// Blocks print inline as `{a; b}`.
    fn block(node: &Ast) -> String {
        match node {
            Ast::Compound(statements) => {
                let parts: Vec<String> = statements.iter().map(Self::print).collect();
                format!("{{{}}}", parts.join("; "))
            }
            other => Self::print(other),
        }
    }

    fn function(keyword: &str, def: &FunctionDef) -> String {
        let mut params: Vec<String> = def.params.clone();
        if let Some(rest) = &def.rest {
            params.push(format!("...{}", rest));
        }

        format!(
            "({} {} ({}) {})",
            keyword,
            def.name,
            params.join(" "),
            Self::block(&def.body)
        )
    }

    fn key_path(path: &[String]) -> String {
        path.iter().map(|segment| format!(".{}", segment)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;

    #[test]
    fn binary_prints_in_prefix_form() {
        let node = Ast::Binary {
            op: BinaryOp::Add,
            left: Box::new(Ast::Number(1.0)),
            right: Box::new(Ast::Binary {
                op: BinaryOp::Multiply,
                left: Box::new(Ast::Number(2.0)),
                right: Box::new(Ast::Number(3.5)),
                line: 1,
            }),
            line: 1,
        };

        assert_eq!(AstPrinter::print(&node), "(+ 1 (* 2 3.5))");
    }
}
