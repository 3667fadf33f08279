/*!
Recursive-descent parser for Zen
================================

The parser pulls tokens lazily from a [`Lexer`] and builds an owned [`Ast`].
Parsing never aborts: unexpected tokens are recorded as [`ZenError::Parse`]
values and the parser resynchronises locally, leaving a gap (`Ast::Noop`) in
the tree instead of throwing the statement list away.

### Grammar (condensed)

```text
program      → statement* EOF ;
statement    → setStmt | funDef | ifStmt | whileStmt | forStmt | returnStmt
             | "break" | "continue" | classDef | import | export
             | tryStmt | throwStmt | getStmt | putStmt | expression ;
setStmt      → "set" IDENT ( "." IDENT | "[" expression "]" )* expression ;
funDef       → "function" IDENT ( IDENT ","? )* ( "..." IDENT )? block ;
ifStmt       → ( "if" | "when" | "unless" ) expression block
               ( "elif" expression block )* ( ( "else" | "otherwise" ) block )? ;
whileStmt    → ( "while" | "until" | "whenever" | "during" | "throughout" ) expression block ;
forStmt      → "for" IDENT "in" expression block ;
block        → "then"? ( NEWLINE+ INDENT statement* DEDENT | statement ) ;
expression   → ternary ( "," ternary )* ;          // outside calls and parentheses
ternary      → binary ( "?" ternary ":" ternary )? ;
binary       → unary ( OP binary )* ;              // precedence climbing
unary        → ( "not" | "-" ) unary | postfix ;
postfix      → primary ( "[" expression "]" | "." IDENT args? )* ;
```

### Precedence

| Level | Operators              |
|------:|------------------------|
| 1     | `or`                   |
| 2     | `and`                  |
| 3     | `=` `!=`               |
| 4     | `<` `>` `<=` `>=`      |
| 5     | `+` `-` `..`           |
| 6     | `*` `/` `%`            |

### Identifier disambiguation

Without delimiters `name x, y` may be a call, a variable or the start of an
object literal.  [`Parser::classify_identifier`] settles this with an ordered
decision table, evaluated after the identifier itself has been consumed:

1. `.` or an adjacent `[` → variable (the postfix loop takes over).
2. A known function followed by something that can start an argument → call.
3. `value , IDENT` ahead → object literal.
4. `IDENT NUMBER` / `IDENT IDENT` in an assignment (or before `,`/`:`) → object.
5. A terminator ahead → zero-argument call for known functions and at
   statement level, else variable.
6. Outside call arguments, anything that can start an argument → call.
7. Otherwise → variable.

### Recovery

[`Parser::eat`] records an error, enters panic mode and skips to the next
synchronisation token (`NEWLINE`, `;`, `{`, `}`, `set`, `function`, `DEDENT`,
`EOF`) without consuming it.  The statement loop guarantees progress by
forcing an advance whenever a statement consumed nothing.

### Logging Policy

| Location                      | Level   |
|-------------------------------|---------|
| `Parser::new`, `parse`        | `info`  |
| statements, classification    | `debug` |
| recorded errors, recovery     | `debug` |
*/

use std::collections::HashSet;
use std::mem;
use std::rc::Rc;

use log::{debug, info};

use crate::ast::{Ast, BinaryOp, ClassDef, ExportItem, FunctionDef, UnaryOp};
use crate::error::ZenError;
use crate::lexer::Lexer;
use crate::scope::ScopeRef;
use crate::stdlib::Stdlib;
use crate::token::{Token, TokenType};
use crate::value::Value;

/// Upper bound on tokens scanned when matching the `]` of an array value.
const BRACKET_SCAN_LIMIT: usize = 64;

/// Result of a parse: the program tree plus every recovered syntax error.
#[derive(Debug)]
pub struct Program {
    pub body: Ast,
    pub errors: Vec<ZenError>,
}

impl Program {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Top-level statements.
    pub fn statements(&self) -> &[Ast] {
        match &self.body {
            Ast::Compound(statements) => statements,
            _ => &[],
        }
    }
}

/// Flags describing where the parser currently is.  They steer the
/// identifier heuristics and comma handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseContext {
    pub in_variable_assignment: bool,
    pub in_function_call: bool,
    pub in_parentheses: bool,
    pub in_method_body: bool,
    pub in_array_literal: bool,
}

impl ParseContext {
    /// No enclosing expression construct: a bare statement.
    pub fn is_statement_level(&self) -> bool {
        !(self.in_variable_assignment
            || self.in_function_call
            || self.in_parentheses
            || self.in_array_literal)
    }
}

/// How an identifier in value position is to be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierForm {
    Variable,
    Call,
    ZeroArgCall,
    Object,
}

pub struct Parser<'a, 's> {
    lexer: Lexer<'a>,
    current: Token<'a>,
    previous: Token<'a>,
    scope: ScopeRef,
    stdlib: &'s dyn Stdlib,
    context: ParseContext,
    depth: usize,
    panic_mode: bool,
    errors: Vec<ZenError>,
    declared: HashSet<String>,
    current_function: Option<String>,
    consumed: usize,
}

impl<'a, 's> Parser<'a, 's> {
    /// Construct a parser over `source`.  Top-level function definitions are
    /// registered into `scope`; `stdlib` answers "is this a builtin".
    pub fn new(source: &'a str, scope: ScopeRef, stdlib: &'s dyn Stdlib) -> Self {
        info!("Parser created over {} bytes", source.len());

        let mut lexer: Lexer<'a> = Lexer::new(source);
        let current: Token<'a> = lexer.next_token();
        let previous: Token<'a> = current.clone();

        Self {
            lexer,
            current,
            previous,
            scope,
            stdlib,
            context: ParseContext::default(),
            depth: 0,
            panic_mode: false,
            errors: Vec::new(),
            declared: HashSet::new(),
            current_function: None,
            consumed: 0,
        }
    }

    // ───────────────────────── public API ─────────────────────────

    /// Parse the whole input.  Always returns a tree; syntax errors are
    /// collected in [`Program::errors`].
    pub fn parse(mut self) -> Program {
        info!("Beginning parse phase");

        let statements: Vec<Ast> = self.parse_statements();

        info!(
            "Parse finished: {} statement(s), {} error(s)",
            statements.len(),
            self.errors.len()
        );

        Program {
            body: Ast::Compound(statements),
            errors: self.errors,
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    // ───────────────────────── statement lists ────────────────────

    /// Statements up to EOF, or up to the DEDENT closing the current block.
    fn parse_statements(&mut self) -> Vec<Ast> {
        let mut statements: Vec<Ast> = Vec::new();

        loop {
            match self.current.token_type {
                TokenType::NEWLINE | TokenType::SEMICOLON => {
                    self.advance();
                    continue;
                }

                TokenType::EOF => break,

                TokenType::DEDENT => {
                    if self.depth > 0 {
                        break;
                    }

                    debug!("Skipping stray DEDENT on line {}", self.current.line);
                    self.advance();
                    continue;
                }

                TokenType::INDENT => {
                    // Indented run without a block header: parse it in place.
                    self.advance();
                    self.depth += 1;
                    let nested: Vec<Ast> = self.parse_statements();
                    self.depth -= 1;
                    self.matches(TokenType::DEDENT);
                    statements.extend(nested);
                    continue;
                }

                _ => {}
            }

            let before: usize = self.consumed;
            let statement: Ast = self.parse_statement();

            if !matches!(statement, Ast::Noop) {
                statements.push(statement);
            }

            if self.consumed == before {
                debug!("No progress at {}, skipping token", self.current);
                self.advance();
            }
        }

        statements
    }

    fn parse_statement(&mut self) -> Ast {
        debug!("Parsing statement at {}", self.current);

        match self.current.token_type {
            TokenType::SET => self.parse_variable_definition(),
            TokenType::FUNCTION => self.parse_function_definition(),
            TokenType::IF | TokenType::WHEN => self.parse_if(false),
            TokenType::UNLESS => self.parse_if(true),
            TokenType::WHILE | TokenType::WHENEVER | TokenType::DURING | TokenType::THROUGHOUT => {
                self.parse_while(false)
            }
            TokenType::UNTIL => self.parse_while(true),
            TokenType::FOR => self.parse_for(),
            TokenType::RETURN => self.parse_return(),
            TokenType::BREAK => {
                self.advance();
                Ast::Break
            }
            TokenType::CONTINUE => {
                self.advance();
                Ast::Continue
            }
            TokenType::CLASS => self.parse_class(),
            TokenType::IMPORT => self.parse_import(),
            TokenType::EXPORT => self.parse_export(),
            TokenType::TRY => self.parse_try(),
            TokenType::THROW => self.parse_throw(),
            TokenType::GET => self.parse_file_get(),
            TokenType::PUT => self.parse_file_put(),
            TokenType::ELSE | TokenType::ELIF | TokenType::OTHERWISE | TokenType::CATCH => {
                let message: String = format!("Unexpected '{}' without a matching block", self.current.lexeme);
                self.error_at_current(&message);
                self.advance();
                Ast::Noop
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Ast {
        let expression: Ast = self.parse_expression();

        // `obj.method` alone on a line is a zero-argument method call
        match expression {
            Ast::PropertyAccess {
                object,
                property,
                line,
            } if self.at_terminator() => Ast::MethodCall {
                object,
                method: property,
                args: Vec::new(),
                line,
            },
            other => other,
        }
    }

    // ───────────────────────── blocks ─────────────────────────────

    /// An indented block, or a single statement on the header's line.
    fn parse_block(&mut self) -> Ast {
        self.matches(TokenType::THEN);

        if self.check(TokenType::NEWLINE) {
            while self.matches(TokenType::NEWLINE) {}

            if self.matches(TokenType::INDENT) {
                self.depth += 1;
                let statements: Vec<Ast> = self.parse_statements();
                self.depth -= 1;

                self.eat(TokenType::DEDENT, "Expected end of block");

                return Ast::Compound(statements);
            }

            self.error_at_current("Expected an indented block");
            return Ast::Compound(Vec::new());
        }

        if self.at_terminator() {
            self.error_at_current("Expected a block");
            return Ast::Compound(Vec::new());
        }

        let statement: Ast = self.parse_statement();
        let statements: Vec<Ast> = match statement {
            Ast::Noop => Vec::new(),
            other => vec![other],
        };

        Ast::Compound(statements)
    }

    // ───────────────────────── declarations ───────────────────────

    fn parse_variable_definition(&mut self) -> Ast {
        let set: Token<'a> = self.advance();
        let line: usize = set.line;

        let Some(name) = self.eat(TokenType::IDENTIFIER, "Expected variable name after 'set'") else {
            return Ast::Noop;
        };
        let name: String = name.lexeme.to_string();

        // `set obj.prop value` / `set arr[i] value`
        let mut target: Option<Ast> = None;
        loop {
            if self.check(TokenType::DOT) && self.peek_is_name(1) {
                self.advance();
                let property: String = self.advance().lexeme.to_string();
                let object: Ast = target.take().unwrap_or_else(|| Ast::Variable {
                    name: name.clone(),
                    line,
                });
                target = Some(Ast::PropertyAccess {
                    object: Box::new(object),
                    property,
                    line,
                });
            } else if self.check(TokenType::LEFT_BRACKET) && self.adjacent_to_previous() {
                self.advance();
                let index: Ast = self.with_context(
                    |ctx| {
                        ctx.in_parentheses = true;
                        ctx.in_function_call = false;
                        ctx.in_array_literal = false;
                    },
                    |p| p.parse_expression(),
                );
                self.eat(TokenType::RIGHT_BRACKET, "Expected ']' after index");
                let object: Ast = target.take().unwrap_or_else(|| Ast::Variable {
                    name: name.clone(),
                    line,
                });
                target = Some(Ast::IndexAccess {
                    object: Box::new(object),
                    index: Box::new(index),
                    line,
                });
            } else {
                break;
            }
        }

        if self.at_terminator() {
            self.error_at_current(&format!("Expected a value for '{}'", name));
            return Ast::Noop;
        }

        let value: Ast = self.with_context(
            |ctx| {
                ctx.in_variable_assignment = true;
                ctx.in_function_call = false;
            },
            |p| p.parse_expression(),
        );

        match target {
            Some(target) => Ast::Assignment {
                target: Box::new(target),
                value: Box::new(value),
                line,
            },
            None => Ast::VariableDefinition {
                name,
                value: Box::new(value),
                line,
            },
        }
    }

    fn parse_function_definition(&mut self) -> Ast {
        let keyword: Token<'a> = self.advance();

        match self.parse_function_tail(keyword.line) {
            Some(def) => {
                if self.depth == 0 && !self.context.in_method_body {
                    self.scope.borrow_mut().add_function(Rc::clone(&def));
                }

                Ast::FunctionDefinition(def)
            }
            None => Ast::Noop,
        }
    }

    /// `name params... block` after `function` / `method`.
    fn parse_function_tail(&mut self, line: usize) -> Option<Rc<FunctionDef>> {
        let name: String = self
            .eat(TokenType::IDENTIFIER, "Expected function name")?
            .lexeme
            .to_string();

        // Known before the body is parsed so recursive calls resolve
        self.declared.insert(name.clone());

        let mut params: Vec<String> = Vec::new();
        let mut rest: Option<String> = None;

        loop {
            match self.current.token_type {
                TokenType::IDENTIFIER => {
                    params.push(self.advance().lexeme.to_string());
                }
                TokenType::COMMA => {
                    self.advance();
                }
                TokenType::SPREAD => {
                    self.advance();
                    if let Some(token) =
                        self.eat(TokenType::IDENTIFIER, "Expected a name after '...'")
                    {
                        rest = Some(token.lexeme.to_string());
                    }
                    if self.check(TokenType::IDENTIFIER) {
                        self.error_at_current("The rest parameter must come last");
                    }
                    break;
                }
                _ => break,
            }
        }

        debug!(
            "Function '{}' with params {:?} rest {:?}",
            name, params, rest
        );

        let saved: Option<String> = self.current_function.replace(name.clone());
        let body: Ast = self.parse_block();
        self.current_function = saved;

        Some(Rc::new(FunctionDef {
            name,
            params,
            rest,
            body,
            line,
        }))
    }

    fn parse_class(&mut self) -> Ast {
        let keyword: Token<'a> = self.advance();

        let Some(name) = self.eat(TokenType::IDENTIFIER, "Expected class name") else {
            return Ast::Noop;
        };
        let name: String = name.lexeme.to_string();

        let parent: Option<String> = if self.matches(TokenType::EXTENDS) {
            self.eat(TokenType::IDENTIFIER, "Expected parent class name after 'extends'")
                .map(|t| t.lexeme.to_string())
        } else {
            None
        };

        let mut methods: Vec<Rc<FunctionDef>> = Vec::new();

        while self.matches(TokenType::NEWLINE) {}

        if self.matches(TokenType::INDENT) {
            self.depth += 1;
            let saved: ParseContext = self.context;
            self.context.in_method_body = true;

            loop {
                while self.matches(TokenType::NEWLINE) || self.matches(TokenType::SEMICOLON) {}

                if self.matches(TokenType::DEDENT) || self.check(TokenType::EOF) {
                    break;
                }

                let is_member: bool = self.check(TokenType::FUNCTION)
                    || (self.check(TokenType::IDENTIFIER) && self.current.lexeme == "method");

                if !is_member {
                    // The class's DEDENT is left to the enclosing statement list
                    debug!(
                        "Class '{}' body ends at {}; deferring its DEDENT",
                        name, self.current
                    );
                    break;
                }

                let member: Token<'a> = self.advance();
                if let Some(method) = self.parse_function_tail(member.line) {
                    methods.push(method);
                }
            }

            self.context = saved;
            self.depth -= 1;
        }

        debug!("Class '{}' with {} method(s)", name, methods.len());

        Ast::ClassDefinition(Rc::new(ClassDef {
            name,
            parent,
            methods,
            line: keyword.line,
        }))
    }

    // ───────────────────────── control flow ───────────────────────

    fn condition(&mut self, negate: bool) -> Ast {
        let line: usize = self.current.line;
        let condition: Ast = self.parse_expression();

        if negate {
            Ast::Unary {
                op: UnaryOp::Not,
                operand: Box::new(condition),
                line,
            }
        } else {
            condition
        }
    }

    fn parse_if(&mut self, negate: bool) -> Ast {
        self.advance();

        let mut branches: Vec<(Ast, Ast)> = Vec::new();
        let condition: Ast = self.condition(negate);
        let body: Ast = self.parse_block();
        branches.push((condition, body));

        let mut else_branch: Option<Box<Ast>> = None;

        loop {
            if self.check(TokenType::NEWLINE)
                && matches!(
                    self.peek_type(1),
                    TokenType::ELIF | TokenType::ELSE | TokenType::OTHERWISE
                )
            {
                self.advance();
            }

            if self.matches(TokenType::ELIF) {
                let condition: Ast = self.condition(false);
                let body: Ast = self.parse_block();
                branches.push((condition, body));
                continue;
            }

            if self.matches(TokenType::ELSE) || self.matches(TokenType::OTHERWISE) {
                // `else if` continues the chain
                if self.matches(TokenType::IF) || self.matches(TokenType::WHEN) {
                    let condition: Ast = self.condition(false);
                    let body: Ast = self.parse_block();
                    branches.push((condition, body));
                    continue;
                }

                else_branch = Some(Box::new(self.parse_block()));
            }

            break;
        }

        Ast::If {
            branches,
            else_branch,
        }
    }

    fn parse_while(&mut self, negate: bool) -> Ast {
        self.advance();

        let condition: Ast = self.condition(negate);
        let body: Ast = self.parse_block();

        Ast::While {
            condition: Box::new(condition),
            body: Box::new(body),
        }
    }

    fn parse_for(&mut self) -> Ast {
        self.advance();

        let Some(iterator) = self.eat(TokenType::IDENTIFIER, "Expected loop variable after 'for'")
        else {
            return Ast::Noop;
        };
        let iterator: String = iterator.lexeme.to_string();

        if self.eat(TokenType::IN, "Expected 'in' after loop variable").is_none() {
            return Ast::Noop;
        }

        let iterable: Ast = self.parse_expression();
        let body: Ast = self.parse_block();

        Ast::For {
            iterator,
            iterable: Box::new(iterable),
            body: Box::new(body),
        }
    }

    fn parse_return(&mut self) -> Ast {
        self.advance();

        if self.at_terminator() {
            return Ast::Return(None);
        }

        Ast::Return(Some(Box::new(self.parse_expression())))
    }

    fn parse_try(&mut self) -> Ast {
        self.advance();

        let try_block: Ast = self.parse_block();

        if self.check(TokenType::NEWLINE) && self.peek_type(1) == TokenType::CATCH {
            self.advance();
        }

        let mut catch_var: Option<String> = None;
        let catch_block: Ast = if self.matches(TokenType::CATCH) {
            if self.check(TokenType::IDENTIFIER) {
                catch_var = Some(self.advance().lexeme.to_string());
            }
            self.parse_block()
        } else {
            Ast::Compound(Vec::new())
        };

        Ast::TryCatch {
            try_block: Box::new(try_block),
            catch_var,
            catch_block: Box::new(catch_block),
        }
    }

    fn parse_throw(&mut self) -> Ast {
        let keyword: Token<'a> = self.advance();

        if self.at_terminator() {
            self.error_at_current("Expected a value after 'throw'");
            return Ast::Noop;
        }

        Ast::Throw {
            value: Box::new(self.parse_expression()),
            line: keyword.line,
        }
    }

    // ───────────────────────── modules ────────────────────────────

    fn parse_import(&mut self) -> Ast {
        let keyword: Token<'a> = self.advance();

        if let TokenType::STRING(path) = &self.current.token_type {
            let path: String = path.clone();
            self.advance();

            return Ast::Import {
                path,
                names: Vec::new(),
                line: keyword.line,
            };
        }

        let mut names: Vec<String> = Vec::new();
        loop {
            let Some(original) = self.eat(TokenType::IDENTIFIER, "Expected a name to import") else {
                return Ast::Noop;
            };
            let original: &str = original.lexeme;

            let alias: Option<&str> = if self.matches(TokenType::AS) {
                self.eat(TokenType::IDENTIFIER, "Expected alias after 'as'")
                    .map(|t| t.lexeme)
            } else if self.check(TokenType::IDENTIFIER) {
                Some(self.advance().lexeme)
            } else {
                None
            };

            names.push(match alias {
                Some(alias) => format!("{}:{}", original, alias),
                None => original.to_string(),
            });

            if !self.matches(TokenType::COMMA) {
                break;
            }
        }

        if self.eat(TokenType::FROM, "Expected 'from' after import list").is_none() {
            return Ast::Noop;
        }

        let TokenType::STRING(path) = &self.current.token_type else {
            self.error_at_current("Expected a module path string");
            return Ast::Noop;
        };
        let path: String = path.clone();
        self.advance();

        Ast::Import {
            path,
            names,
            line: keyword.line,
        }
    }

    fn parse_export(&mut self) -> Ast {
        self.advance();

        match self.current.token_type {
            TokenType::FUNCTION => {
                let declaration: Ast = self.parse_function_definition();
                Ast::Export(ExportItem::Declaration(Box::new(declaration)))
            }
            TokenType::SET => {
                let declaration: Ast = self.parse_variable_definition();
                Ast::Export(ExportItem::Declaration(Box::new(declaration)))
            }
            TokenType::IDENTIFIER => {
                let name: String = self.advance().lexeme.to_string();
                let alias: Option<String> = if self.matches(TokenType::AS) {
                    self.eat(TokenType::IDENTIFIER, "Expected alias after 'as'")
                        .map(|t| t.lexeme.to_string())
                } else {
                    None
                };

                Ast::Export(ExportItem::Name { name, alias })
            }
            _ => {
                self.error_at_current("Expected 'function', 'set' or a name after 'export'");
                Ast::Noop
            }
        }
    }

    // ───────────────────────── key-path files ─────────────────────

    fn parse_file_get(&mut self) -> Ast {
        let keyword: Token<'a> = self.advance();
        let target: Ast = self.parse_file_target();
        let path: Vec<String> = self.parse_key_path();

        Ast::FileGet {
            target: Box::new(target),
            path,
            line: keyword.line,
        }
    }

    fn parse_file_put(&mut self) -> Ast {
        let keyword: Token<'a> = self.advance();
        let target: Ast = self.parse_file_target();
        let path: Vec<String> = self.parse_key_path();

        if self.at_terminator() {
            self.error_at_current("Expected a value after 'put' target");
            return Ast::Noop;
        }

        let value: Ast = match &self.current.token_type {
            TokenType::STRING(s) if s.starts_with("@ ") => {
                let reference: Ast = file_reference(s);
                self.advance();
                reference
            }
            TokenType::IDENTIFIER if self.strict_object_ahead() => {
                let key: String = self.advance().lexeme.to_string();
                self.parse_object(key)
            }
            _ => self.parse_expression(),
        };

        Ast::FilePut {
            target: Box::new(target),
            path,
            value: Box::new(value),
            line: keyword.line,
        }
    }

    /// The file operand: a string, a bare variable, or any unary expression.
    fn parse_file_target(&mut self) -> Ast {
        match &self.current.token_type {
            TokenType::STRING(s) => {
                let file: String = s.clone();
                self.advance();
                Ast::Str(file)
            }
            TokenType::IDENTIFIER => {
                let token: Token<'a> = self.advance();
                Ast::Variable {
                    name: token.lexeme.to_string(),
                    line: token.line,
                }
            }
            _ => self.parse_unary(),
        }
    }

    /// `.a.b.0` → `["a", "b", "0"]`.  `.0` lexes as a number, so those
    /// segments are taken from the lexeme.
    fn parse_key_path(&mut self) -> Vec<String> {
        let mut path: Vec<String> = Vec::new();

        loop {
            if self.check(TokenType::DOT) {
                self.advance();
                if self.is_name_token(&self.current) || matches!(self.current.token_type, TokenType::NUMBER(_)) {
                    path.push(self.advance().lexeme.to_string());
                } else {
                    self.error_at_current("Expected a property name after '.'");
                    break;
                }
            } else if matches!(self.current.token_type, TokenType::NUMBER(_))
                && self.current.lexeme.starts_with('.')
            {
                path.push(self.advance().lexeme[1..].to_string());
            } else {
                break;
            }
        }

        path
    }

    // ───────────────────────── expressions ────────────────────────

    /// A ternary expression, or a bare comma list outside calls/parentheses:
    /// all-identifier lists become `{a: a, b: b}` objects, others arrays.
    fn parse_expression(&mut self) -> Ast {
        let first: Ast = self.parse_ternary();

        if !self.check(TokenType::COMMA)
            || self.context.in_function_call
            || self.context.in_parentheses
            || self.context.in_array_literal
        {
            return first;
        }

        let variable: Option<(String, usize)> = match &first {
            Ast::Variable { name, line } => Some((name.clone(), *line)),
            _ => None,
        };

        if let Some((name, line)) = variable.filter(|_| self.identifier_list_ahead()) {
            let mut pairs: Vec<(String, Ast)> = vec![(
                name.clone(),
                Ast::Variable { name, line },
            )];

            while self.check(TokenType::COMMA) && self.peek_type(1) == TokenType::IDENTIFIER {
                self.advance();
                let token: Token<'a> = self.advance();
                let key: String = token.lexeme.to_string();
                pairs.push((
                    key.clone(),
                    Ast::Variable {
                        name: key,
                        line: token.line,
                    },
                ));
            }

            return Ast::Object(pairs);
        }

        self.comma_array(first)
    }

    /// `a, b + 1, c` outside any delimiter → array.
    fn comma_array(&mut self, first: Ast) -> Ast {
        let mut elements: Vec<Ast> = vec![first];
        while self.matches(TokenType::COMMA) {
            if self.at_terminator() {
                break;
            }
            elements.push(self.parse_ternary());
        }

        Ast::Array(elements)
    }

    fn parse_ternary(&mut self) -> Ast {
        let condition: Ast = self.parse_binary(1);

        if !self.matches(TokenType::QUESTION) {
            return condition;
        }

        let then_expr: Ast = self.parse_ternary();
        self.eat(TokenType::COLON, "Expected ':' in conditional expression");
        let else_expr: Ast = self.parse_ternary();

        Ast::Ternary {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        }
    }

    /// Precedence climbing; every level is left-associative.
    fn parse_binary(&mut self, min_precedence: u8) -> Ast {
        let mut left: Ast = self.parse_unary();

        loop {
            let Some((op, precedence)) = binary_operator(&self.current.token_type) else {
                break;
            };

            if precedence < min_precedence {
                break;
            }

            let operator: Token<'a> = self.advance();
            let right: Ast = self.parse_binary(precedence + 1);

            left = Ast::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                line: operator.line,
            };
        }

        left
    }

    fn parse_unary(&mut self) -> Ast {
        match self.current.token_type {
            TokenType::NOT => {
                let operator: Token<'a> = self.advance();
                let operand: Ast = self.parse_unary();

                Ast::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                    line: operator.line,
                }
            }

            TokenType::MINUS => {
                let operator: Token<'a> = self.advance();
                let operand: Ast = self.parse_unary();

                match operand {
                    Ast::Number(n) => Ast::Number(-n),
                    operand => Ast::Unary {
                        op: UnaryOp::Negate,
                        operand: Box::new(operand),
                        line: operator.line,
                    },
                }
            }

            _ => {
                let primary: Ast = self.parse_primary();
                self.parse_postfix(primary)
            }
        }
    }

    /// `[index]`, `.property` and `.method args...` after a primary.
    fn parse_postfix(&mut self, mut expression: Ast) -> Ast {
        loop {
            if self.check(TokenType::LEFT_BRACKET) {
                let bracket: Token<'a> = self.advance();
                let index: Ast = self.with_context(
                    |ctx| {
                        ctx.in_parentheses = true;
                        ctx.in_function_call = false;
                        ctx.in_array_literal = false;
                    },
                    |p| p.parse_expression(),
                );
                self.eat(TokenType::RIGHT_BRACKET, "Expected ']' after index");

                expression = Ast::IndexAccess {
                    object: Box::new(expression),
                    index: Box::new(index),
                    line: bracket.line,
                };
                continue;
            }

            // `items.0` lexes as `items` followed by the number `.0`
            if self.at_numeric_member() {
                let member: Token<'a> = self.advance();
                let index: f64 = member.lexeme[1..].parse().unwrap_or(0.0);

                expression = Ast::IndexAccess {
                    object: Box::new(expression),
                    index: Box::new(Ast::Number(index)),
                    line: member.line,
                };
                continue;
            }

            if self.check(TokenType::DOT) && self.peek_is_name(1) {
                self.advance();
                let name: Token<'a> = self.advance();
                let property: String = name.lexeme.to_string();

                if !self.context.in_function_call && self.can_start_argument(false) {
                    let args: Vec<Ast> = self.parse_arguments(false);
                    expression = Ast::MethodCall {
                        object: Box::new(expression),
                        method: property,
                        args,
                        line: name.line,
                    };
                } else {
                    expression = Ast::PropertyAccess {
                        object: Box::new(expression),
                        property,
                        line: name.line,
                    };
                }
                continue;
            }

            break;
        }

        expression
    }

    fn parse_primary(&mut self) -> Ast {
        match &self.current.token_type {
            TokenType::NUMBER(n) => {
                let n: f64 = *n;
                self.advance();
                Ast::Number(n)
            }

            TokenType::STRING(s) => {
                let s: String = s.clone();
                self.advance();
                Ast::Str(s)
            }

            TokenType::TRUE => {
                self.advance();
                Ast::Boolean(true)
            }

            TokenType::FALSE => {
                self.advance();
                Ast::Boolean(false)
            }

            TokenType::NULL => {
                self.advance();
                Ast::Null
            }

            TokenType::UNDECIDABLE => {
                self.advance();
                Ast::Undecidable
            }

            TokenType::LEFT_BRACKET => self.parse_array(),

            TokenType::LEFT_PAREN => {
                self.advance();
                let inner: Ast = self.with_context(
                    |ctx| {
                        ctx.in_parentheses = true;
                        ctx.in_function_call = false;
                        ctx.in_array_literal = false;
                    },
                    |p| p.parse_expression(),
                );
                self.eat(TokenType::RIGHT_PAREN, "Expected ')' after expression");
                inner
            }

            TokenType::IDENTIFIER => self.parse_identifier(),

            TokenType::NEW => self.parse_new(),

            TokenType::GET => self.parse_file_get(),

            TokenType::SPREAD => {
                self.advance();
                Ast::Spread(Box::new(self.parse_unary()))
            }

            _ => {
                let message: String = format!(
                    "Unexpected {} '{}'",
                    self.current.token_type.name(),
                    self.current.lexeme
                );
                self.error_at_current(&message);
                self.synchronize();
                Ast::Noop
            }
        }
    }

    fn parse_array(&mut self) -> Ast {
        self.advance();

        let elements: Vec<Ast> = self.with_context(
            |ctx| {
                ctx.in_array_literal = true;
                ctx.in_function_call = false;
                ctx.in_parentheses = false;
                ctx.in_variable_assignment = false;
            },
            |p| {
                let mut elements: Vec<Ast> = Vec::new();
                while p.matches(TokenType::NEWLINE) {}

                while !p.check(TokenType::RIGHT_BRACKET) && !p.check(TokenType::EOF) {
                    let before: usize = p.consumed;
                    let element: Ast = p.parse_ternary();
                    if !matches!(element, Ast::Noop) {
                        elements.push(element);
                    }

                    while p.matches(TokenType::NEWLINE) {}
                    if !p.matches(TokenType::COMMA) || p.consumed == before {
                        break;
                    }
                    while p.matches(TokenType::NEWLINE) {}
                }

                elements
            },
        );

        self.eat(TokenType::RIGHT_BRACKET, "Expected ']' after array elements");

        Ast::Array(elements)
    }

    fn parse_new(&mut self) -> Ast {
        let keyword: Token<'a> = self.advance();

        let Some(class_name) = self.eat(TokenType::IDENTIFIER, "Expected class name after 'new'")
        else {
            return Ast::Noop;
        };

        let args: Vec<Ast> = if self.can_start_argument(false) {
            self.parse_arguments(false)
        } else {
            Vec::new()
        };

        Ast::New {
            class_name: class_name.lexeme.to_string(),
            args,
            line: keyword.line,
        }
    }

    // ───────────────────────── identifiers ────────────────────────

    fn parse_identifier(&mut self) -> Ast {
        let token: Token<'a> = self.advance();
        let name: String = token.lexeme.to_string();
        let line: usize = token.line;

        let form: IdentifierForm = self.classify_identifier(&name);
        debug!("Identifier '{}' on line {} classified as {:?}", name, line, form);

        match form {
            IdentifierForm::Variable => Ast::Variable { name, line },
            IdentifierForm::ZeroArgCall => Ast::FunctionCall {
                name,
                args: Vec::new(),
                line,
            },
            IdentifierForm::Call => {
                // builtins and self-recursive calls take whole expressions
                let full: bool = self.stdlib.contains(&name)
                    || self.current_function.as_deref() == Some(name.as_str());
                let args: Vec<Ast> = self.parse_arguments(full);

                Ast::FunctionCall { name, args, line }
            }
            IdentifierForm::Object => self.parse_object(name),
        }
    }

    /// Ordered decision table for an identifier that has just been consumed.
    /// `self.current` is the token following it.
    pub fn classify_identifier(&self, name: &str) -> IdentifierForm {
        let known: bool = self.is_known_function(name);

        // access chains defer to the postfix loop
        if self.check(TokenType::DOT) || self.at_numeric_member() {
            return IdentifierForm::Variable;
        }
        if self.check(TokenType::LEFT_BRACKET) && (self.adjacent_to_previous() || !known) {
            return IdentifierForm::Variable;
        }

        if known && self.can_start_argument(true) {
            return IdentifierForm::Call;
        }

        if self.object_literal_ahead() {
            return IdentifierForm::Object;
        }

        match self.current.token_type {
            TokenType::NUMBER(_)
                if self.context.in_variable_assignment
                    || matches!(self.peek_type(1), TokenType::COMMA | TokenType::COLON) =>
            {
                return IdentifierForm::Object;
            }
            TokenType::IDENTIFIER
                if self.context.in_variable_assignment
                    || self.peek_type(1) == TokenType::COMMA =>
            {
                return IdentifierForm::Object;
            }
            _ => {}
        }

        if self.at_terminator() {
            return if known || self.context.is_statement_level() {
                IdentifierForm::ZeroArgCall
            } else {
                IdentifierForm::Variable
            };
        }

        if !self.context.in_function_call
            && !self.context.in_array_literal
            && self.can_start_argument(false)
        {
            return IdentifierForm::Call;
        }

        IdentifierForm::Variable
    }

    fn is_known_function(&self, name: &str) -> bool {
        if self.stdlib.contains(name) || self.declared.contains(name) {
            return true;
        }

        let scope = self.scope.borrow();
        scope.has_function(name) || matches!(scope.get_variable(name), Some(Value::Function(_)))
    }

    /// Space- or comma-separated call arguments.  `full` parses each
    /// argument as a whole expression; otherwise arguments stop at binary
    /// operators.
    ///
    /// Builtins and self-recursive calls are `full`, and a full argument
    /// swallows everything up to the end of the expression, later calls
    /// included: `fib n - 1 + fib n - 2` is `fib (n - 1 + fib (n - 2))`.
    /// Scripts that mean two calls write `(fib n - 1) + (fib n - 2)`.
    fn parse_arguments(&mut self, full: bool) -> Vec<Ast> {
        let in_array: bool = self.context.in_array_literal;

        self.with_context(
            |ctx| {
                ctx.in_function_call = true;
                ctx.in_variable_assignment = false;
            },
            |p| {
                let mut args: Vec<Ast> = Vec::new();
                let mut first: bool = true;

                while p.can_start_argument(first) {
                    let before: usize = p.consumed;
                    let arg: Ast = if full { p.parse_ternary() } else { p.parse_unary() };
                    if !matches!(arg, Ast::Noop) {
                        args.push(arg);
                    }
                    first = false;

                    if p.consumed == before {
                        break;
                    }

                    // inside `[...]` a comma separates elements, not arguments
                    if !in_array && p.check(TokenType::COMMA) && p.comma_continues_arguments() {
                        p.advance();
                    }
                }

                args
            },
        )
    }

    /// `key value, key value ...` after the first key has been consumed.
    /// A key followed by `,` or a terminator is shorthand for `key key`.
    fn parse_object(&mut self, first_key: String) -> Ast {
        let mut pairs: Vec<(String, Ast)> = Vec::new();
        let mut key: String = first_key;
        let mut line: usize = self.previous.line;

        loop {
            let value: Ast = if self.check(TokenType::COMMA) || self.at_terminator() {
                Ast::Variable {
                    name: key.clone(),
                    line,
                }
            } else {
                self.parse_object_value()
            };

            match pairs.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => pairs.push((key, value)),
            }

            if self.check(TokenType::COMMA) && self.peek_type(1) == TokenType::IDENTIFIER {
                self.advance();
                let token: Token<'a> = self.advance();
                key = token.lexeme.to_string();
                line = token.line;
                continue;
            }

            break;
        }

        Ast::Object(pairs)
    }

    fn parse_object_value(&mut self) -> Ast {
        match self.current.token_type {
            TokenType::IDENTIFIER => {
                let token: Token<'a> = self.advance();
                Ast::Variable {
                    name: token.lexeme.to_string(),
                    line: token.line,
                }
            }
            TokenType::LEFT_BRACKET => self.parse_array(),
            _ => self.with_context(
                |ctx| ctx.in_function_call = true,
                |p| p.parse_unary(),
            ),
        }
    }

    // ───────────────────────── lookahead predicates ───────────────

    /// Can the current token begin a call argument?  A `-` qualifies only as
    /// the first argument when written like a sign (`f -1`, not `f - 1`).
    fn can_start_argument(&self, allow_sign: bool) -> bool {
        match self.current.token_type {
            TokenType::IDENTIFIER
            | TokenType::NUMBER(_)
            | TokenType::STRING(_)
            | TokenType::TRUE
            | TokenType::FALSE
            | TokenType::NULL
            | TokenType::UNDECIDABLE
            | TokenType::LEFT_BRACKET
            | TokenType::LEFT_PAREN
            | TokenType::NOT
            | TokenType::NEW
            | TokenType::SPREAD => true,
            TokenType::MINUS => allow_sign && self.minus_is_sign(),
            _ => false,
        }
    }

    fn minus_is_sign(&self) -> bool {
        let previous_end: usize = self.previous.column + self.previous.lexeme.len();
        let next: Token<'a> = self.peek(1);

        self.current.line == self.previous.line
            && self.current.column > previous_end
            && next.line == self.current.line
            && next.column == self.current.column + 1
    }

    /// Pattern `value , IDENT`, where value is a literal, an identifier or a
    /// bracketed array.
    fn object_literal_ahead(&self) -> bool {
        let ahead: Vec<Token<'a>> = match self.current.token_type {
            TokenType::IDENTIFIER
            | TokenType::STRING(_)
            | TokenType::NUMBER(_)
            | TokenType::TRUE
            | TokenType::FALSE
            | TokenType::NULL
            | TokenType::UNDECIDABLE => self.lookahead(2),

            TokenType::LEFT_BRACKET => {
                let scan: Vec<Token<'a>> = self.lookahead(BRACKET_SCAN_LIMIT);
                let mut depth: usize = 1;
                let mut end: Option<usize> = None;

                for (i, token) in scan.iter().enumerate() {
                    match token.token_type {
                        TokenType::LEFT_BRACKET => depth += 1,
                        TokenType::RIGHT_BRACKET => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(i + 1);
                                break;
                            }
                        }
                        TokenType::NEWLINE | TokenType::EOF => return false,
                        _ => {}
                    }
                }

                match end {
                    Some(end) => scan.into_iter().skip(end).take(2).collect(),
                    None => return false,
                }
            }

            _ => return false,
        };

        ahead.len() == 2
            && ahead[0].is(TokenType::COMMA)
            && ahead[1].is(TokenType::IDENTIFIER)
    }

    /// The canonical `IDENT value , IDENT value` shape, with the first
    /// identifier still current.  Used for `put` values.
    fn strict_object_ahead(&self) -> bool {
        if !self.check(TokenType::IDENTIFIER) {
            return false;
        }

        let ahead: Vec<Token<'a>> = self.lookahead(4);
        let is_value = |t: &Token<'a>| {
            matches!(
                t.token_type,
                TokenType::IDENTIFIER
                    | TokenType::STRING(_)
                    | TokenType::NUMBER(_)
                    | TokenType::TRUE
                    | TokenType::FALSE
                    | TokenType::NULL
                    | TokenType::UNDECIDABLE
            )
        };

        ahead.len() == 4
            && is_value(&ahead[0])
            && ahead[1].is(TokenType::COMMA)
            && ahead[2].is(TokenType::IDENTIFIER)
            && is_value(&ahead[3])
    }

    /// `, IDENT (, IDENT)*` up to something that is not a comma.
    fn identifier_list_ahead(&self) -> bool {
        let mut probe: Lexer<'a> = self.lexer.clone();
        let mut token: Token<'a> = self.current.clone();

        while token.is(TokenType::COMMA) {
            if !probe.next_token().is(TokenType::IDENTIFIER) {
                return false;
            }
            token = probe.next_token();
        }

        true
    }

    /// Inside an argument list a comma separates arguments unless it starts
    /// the `, key value` tail of an object literal.
    fn comma_continues_arguments(&self) -> bool {
        let next: Token<'a> = self.peek(1);
        !matches!(
            next.token_type,
            TokenType::NEWLINE | TokenType::EOF | TokenType::DEDENT
        )
    }

    fn at_terminator(&self) -> bool {
        matches!(
            self.current.token_type,
            TokenType::NEWLINE
                | TokenType::EOF
                | TokenType::DEDENT
                | TokenType::SEMICOLON
                | TokenType::RIGHT_PAREN
                | TokenType::RIGHT_BRACKET
                | TokenType::THEN
        )
    }

    fn at_numeric_member(&self) -> bool {
        matches!(self.current.token_type, TokenType::NUMBER(_))
            && self.current.lexeme.len() > 1
            && self.current.lexeme.starts_with('.')
            && self.current.lexeme[1..].bytes().all(|b| b.is_ascii_digit())
            && self.adjacent_to_previous()
    }

    fn adjacent_to_previous(&self) -> bool {
        self.current.line == self.previous.line
            && self.current.column == self.previous.column + self.previous.lexeme.len()
    }

    fn is_name_token(&self, token: &Token<'a>) -> bool {
        !token.lexeme.is_empty()
            && !matches!(token.token_type, TokenType::NUMBER(_) | TokenType::STRING(_))
            && token
                .lexeme
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_')
    }

    fn peek_is_name(&self, offset: usize) -> bool {
        let token: Token<'a> = self.peek(offset);
        self.is_name_token(&token)
    }

    // ───────────────────────── utility helpers ────────────────────

    /// Run `parse` with adjusted flags, restoring them afterwards.
    fn with_context<T>(
        &mut self,
        update: impl FnOnce(&mut ParseContext),
        parse: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let saved: ParseContext = self.context;
        update(&mut self.context);
        let result: T = parse(self);
        self.context = saved;
        result
    }

    /// Token `offset` positions ahead; 0 is the current token.
    fn peek(&self, offset: usize) -> Token<'a> {
        if offset == 0 {
            self.current.clone()
        } else {
            self.lexer.peek_token(offset - 1)
        }
    }

    fn peek_type(&self, offset: usize) -> TokenType {
        self.peek(offset).token_type
    }

    /// The next `count` tokens after the current one.
    fn lookahead(&self, count: usize) -> Vec<Token<'a>> {
        let mut probe: Lexer<'a> = self.lexer.clone();
        (0..count).map(|_| probe.next_token()).collect()
    }

    #[inline(always)]
    fn check(&self, token_type: TokenType) -> bool {
        self.current.token_type == token_type
    }

    #[inline(always)]
    fn matches(&mut self, token_type: TokenType) -> bool {
        if self.check(token_type) {
            self.advance();

            return true;
        }

        false
    }

    /// Move to the next token and return the one just consumed.
    fn advance(&mut self) -> Token<'a> {
        if self.current.is(TokenType::EOF) {
            return self.current.clone();
        }

        let next: Token<'a> = self.lexer.next_token();
        self.previous = mem::replace(&mut self.current, next);
        self.consumed += 1;

        self.previous.clone()
    }

    /// Consume a token of the expected kind, or record an error and
    /// resynchronise.
    fn eat(&mut self, token_type: TokenType, message: &str) -> Option<Token<'a>> {
        if self.check(token_type) {
            return Some(self.advance());
        }

        self.error_at_current(message);
        self.panic_mode = true;
        self.synchronize();
        self.panic_mode = false;

        None
    }

    fn error_at_current(&mut self, message: &str) {
        if self.panic_mode {
            return;
        }

        let found: String = if self.current.lexeme.is_empty() {
            self.current.token_type.name().to_string()
        } else {
            format!("'{}'", self.current.lexeme.escape_debug())
        };

        debug!("Recording parse error: {} (found {})", message, found);

        self.errors.push(ZenError::parse(
            self.current.line,
            self.current.column,
            format!("{}, found {}", message, found),
        ));
    }

    /// Skip to the next synchronisation token without consuming it.
    fn synchronize(&mut self) {
        while !matches!(
            self.current.token_type,
            TokenType::NEWLINE
                | TokenType::SEMICOLON
                | TokenType::LEFT_BRACE
                | TokenType::RIGHT_BRACE
                | TokenType::SET
                | TokenType::FUNCTION
                | TokenType::DEDENT
                | TokenType::EOF
        ) {
            debug!("Synchronising: skipping {}", self.current);
            self.advance();
        }
    }
}

/// Operator and precedence for infix tokens.
fn binary_operator(token_type: &TokenType) -> Option<(BinaryOp, u8)> {
    let entry: (BinaryOp, u8) = match token_type {
        TokenType::OR => (BinaryOp::Or, 1),
        TokenType::AND => (BinaryOp::And, 2),
        TokenType::EQUALS => (BinaryOp::Equal, 3),
        TokenType::NOT_EQUALS => (BinaryOp::NotEqual, 3),
        TokenType::LESS => (BinaryOp::Less, 4),
        TokenType::GREATER => (BinaryOp::Greater, 4),
        TokenType::LESS_EQUAL => (BinaryOp::LessEqual, 4),
        TokenType::GREATER_EQUAL => (BinaryOp::GreaterEqual, 4),
        TokenType::PLUS => (BinaryOp::Add, 5),
        TokenType::MINUS => (BinaryOp::Subtract, 5),
        TokenType::RANGE => (BinaryOp::Range, 5),
        TokenType::STAR => (BinaryOp::Multiply, 6),
        TokenType::SLASH => (BinaryOp::Divide, 6),
        TokenType::PERCENT => (BinaryOp::Modulo, 6),
        _ => return None,
    };

    Some(entry)
}

/// `"@ file dot.path"` → `FileReference`.  The file name ends at the first
/// space after the marker; the rest is the key path.
fn file_reference(text: &str) -> Ast {
    let body: &str = text.trim_start_matches('@').trim_start();
    let (file, path) = body.split_once(' ').unwrap_or((body, ""));

    Ast::FileReference {
        file: file.to_string(),
        path: path
            .trim()
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect(),
    }
}
