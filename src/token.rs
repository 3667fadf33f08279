use log::debug;
use serde::Serialize;
use std::fmt;
use std::mem;

/// The different kinds of tokens recognized by the Zen lexer.
///
/// Variants without data represent punctuation, operators, keywords and the
/// synthetic block-structure tokens.  `STRING(String)` carries the decoded
/// literal (escapes resolved) and `NUMBER(f64)` the parsed numeral.
/// `IDENTIFIER` is used for user-defined names; the name itself is the lexeme.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Serialize)]
pub enum TokenType {
    // ── structure ──────────────────────────────────────────────────────
    /// End of a logical line
    NEWLINE,

    /// Indentation increased relative to the enclosing block
    INDENT,

    /// Indentation returned to an enclosing level (one per popped level)
    DEDENT,

    // ── literals ───────────────────────────────────────────────────────
    IDENTIFIER,

    /// A string literal (decoded contents without quotes)
    STRING(String),

    /// A numeric literal
    #[serde(rename = "NUMBER")]
    NUMBER(f64),

    TRUE,
    FALSE,
    NULL,
    UNDECIDABLE,

    // ── keywords ───────────────────────────────────────────────────────
    SET,
    FUNCTION,
    RETURN,
    IF,
    ELIF,
    ELSE,
    THEN,
    WHILE,
    FOR,
    IN,
    BREAK,
    CONTINUE,
    CLASS,
    NEW,
    EXTENDS,
    IMPORT,
    EXPORT,
    FROM,
    AS,
    TRY,
    CATCH,
    THROW,
    GET,
    PUT,
    AND,
    OR,
    NOT,

    // natural-language keywords
    WHEN,
    UNLESS,
    WHENEVER,
    UNTIL,
    DURING,
    THROUGHOUT,
    OTHERWISE,

    // ── operators ──────────────────────────────────────────────────────
    /// '=' (equality; assignment is spelled `set`)
    EQUALS,

    /// '!='
    NOT_EQUALS,

    /// '<'
    LESS,

    /// '>'
    GREATER,

    /// '<='
    LESS_EQUAL,

    /// '>='
    GREATER_EQUAL,

    PLUS,
    MINUS,
    STAR,
    SLASH,
    PERCENT,

    /// '..'
    RANGE,

    /// '...'
    SPREAD,

    // ── punctuation ────────────────────────────────────────────────────
    COMMA,
    DOT,
    COLON,
    QUESTION,
    SEMICOLON,
    LEFT_PAREN,
    RIGHT_PAREN,
    LEFT_BRACKET,
    RIGHT_BRACKET,
    LEFT_BRACE,
    RIGHT_BRACE,

    /// End-of-file marker
    EOF,
}

impl PartialEq for TokenType {
    /// Two TokenTypes are equal if they share the same variant
    /// (ignoring any inner data). Uses `mem::discriminant` to compare.
    fn eq(&self, other: &Self) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

impl TokenType {
    /// Upper-case variant name without payload, used by `tokenize` output.
    pub fn name(&self) -> &'static str {
        match self {
            TokenType::NEWLINE => "NEWLINE",
            TokenType::INDENT => "INDENT",
            TokenType::DEDENT => "DEDENT",
            TokenType::IDENTIFIER => "IDENTIFIER",
            TokenType::STRING(_) => "STRING",
            TokenType::NUMBER(_) => "NUMBER",
            TokenType::TRUE => "TRUE",
            TokenType::FALSE => "FALSE",
            TokenType::NULL => "NULL",
            TokenType::UNDECIDABLE => "UNDECIDABLE",
            TokenType::SET => "SET",
            TokenType::FUNCTION => "FUNCTION",
            TokenType::RETURN => "RETURN",
            TokenType::IF => "IF",
            TokenType::ELIF => "ELIF",
            TokenType::ELSE => "ELSE",
            TokenType::THEN => "THEN",
            TokenType::WHILE => "WHILE",
            TokenType::FOR => "FOR",
            TokenType::IN => "IN",
            TokenType::BREAK => "BREAK",
            TokenType::CONTINUE => "CONTINUE",
            TokenType::CLASS => "CLASS",
            TokenType::NEW => "NEW",
            TokenType::EXTENDS => "EXTENDS",
            TokenType::IMPORT => "IMPORT",
            TokenType::EXPORT => "EXPORT",
            TokenType::FROM => "FROM",
            TokenType::AS => "AS",
            TokenType::TRY => "TRY",
            TokenType::CATCH => "CATCH",
            TokenType::THROW => "THROW",
            TokenType::GET => "GET",
            TokenType::PUT => "PUT",
            TokenType::AND => "AND",
            TokenType::OR => "OR",
            TokenType::NOT => "NOT",
            TokenType::WHEN => "WHEN",
            TokenType::UNLESS => "UNLESS",
            TokenType::WHENEVER => "WHENEVER",
            TokenType::UNTIL => "UNTIL",
            TokenType::DURING => "DURING",
            TokenType::THROUGHOUT => "THROUGHOUT",
            TokenType::OTHERWISE => "OTHERWISE",
            TokenType::EQUALS => "EQUALS",
            TokenType::NOT_EQUALS => "NOT_EQUALS",
            TokenType::LESS => "LESS",
            TokenType::GREATER => "GREATER",
            TokenType::LESS_EQUAL => "LESS_EQUAL",
            TokenType::GREATER_EQUAL => "GREATER_EQUAL",
            TokenType::PLUS => "PLUS",
            TokenType::MINUS => "MINUS",
            TokenType::STAR => "STAR",
            TokenType::SLASH => "SLASH",
            TokenType::PERCENT => "PERCENT",
            TokenType::RANGE => "RANGE",
            TokenType::SPREAD => "SPREAD",
            TokenType::COMMA => "COMMA",
            TokenType::DOT => "DOT",
            TokenType::COLON => "COLON",
            TokenType::QUESTION => "QUESTION",
            TokenType::SEMICOLON => "SEMICOLON",
            TokenType::LEFT_PAREN => "LEFT_PAREN",
            TokenType::RIGHT_PAREN => "RIGHT_PAREN",
            TokenType::LEFT_BRACKET => "LEFT_BRACKET",
            TokenType::RIGHT_BRACKET => "RIGHT_BRACKET",
            TokenType::LEFT_BRACE => "LEFT_BRACE",
            TokenType::RIGHT_BRACE => "RIGHT_BRACE",
            TokenType::EOF => "EOF",
        }
    }

    /// Infix operators recognised by the precedence climber.
    pub fn is_binary_operator(&self) -> bool {
        matches!(
            self,
            TokenType::PLUS
                | TokenType::MINUS
                | TokenType::STAR
                | TokenType::SLASH
                | TokenType::PERCENT
                | TokenType::EQUALS
                | TokenType::NOT_EQUALS
                | TokenType::LESS
                | TokenType::GREATER
                | TokenType::LESS_EQUAL
                | TokenType::GREATER_EQUAL
                | TokenType::AND
                | TokenType::OR
                | TokenType::RANGE
        )
    }
}

/// A scanned token: its type, the original lexeme and its position.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Token<'a> {
    /// The category of this token.
    pub token_type: TokenType,

    /// The exact substring from the source that produced this token.
    /// Synthetic tokens (INDENT, DEDENT, EOF) carry an empty lexeme.
    pub lexeme: &'a str,

    /// 1-based line number in the source.
    pub line: usize,

    /// 1-based column of the first byte of the lexeme.
    pub column: usize,
}

impl<'a> Token<'a> {
    /// Create a new Token with the given type, lexeme and position.
    pub fn new(token_type: TokenType, lexeme: &'a str, line: usize, column: usize) -> Self {
        debug!(
            "Creating new token: type={:?}, lexeme={:?}, line={}, column={}",
            token_type, lexeme, line, column
        );

        Self {
            token_type,
            lexeme,
            line,
            column,
        }
    }

    #[inline]
    pub fn is(&self, token_type: TokenType) -> bool {
        self.token_type == token_type
    }
}

impl<'a> fmt::Display for Token<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant: &'static str = self.token_type.name();

        // NEWLINE prints escaped so one token stays on one output line
        let lexeme: &str = if self.lexeme == "\n" { "\\n" } else { self.lexeme };

        match &self.token_type {
            TokenType::STRING(s) => write!(f, "{} {} {}", variant, lexeme, s),
            TokenType::NUMBER(n) => {
                // 3 → "3.0", 3.14 → "3.14"
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    let mut buf: itoa::Buffer = itoa::Buffer::new();
                    write!(f, "{} {} {}.0", variant, lexeme, buf.format(*n as i64))
                } else {
                    write!(f, "{} {} {}", variant, lexeme, n)
                }
            }
            _ => write!(f, "{} {} null", variant, lexeme),
        }
    }
}
