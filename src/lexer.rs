//! Module `lexer` implements a one-pass, indentation-aware lexer for Zen.
//!
//! It transforms source text into a lazy sequence of [`Token`]s, skipping
//! insignificant whitespace and comments and synthesising the block-structure
//! tokens `NEWLINE`, `INDENT` and `DEDENT`.  Exactly one `EOF` token ends the
//! stream.  The lexer never fails: malformed input is recovered permissively.
//!
//! # Public API
//!
//! - `Lexer::new(src: &'a str) -> Lexer<'a>`
//! - `Lexer::next_token()` consumes and returns the next token.
//! - `Lexer::peek_token(offset)` returns the token `offset` positions ahead
//!   (0 is what `next_token` would return) without consuming anything.  It
//!   runs a speculative scan on a copy of the cursor, line, column and indent
//!   state, so the real cursor is never disturbed.
//! - `impl Iterator for Lexer<'a>` yields every token up to and including `EOF`.
//!
//! # Indentation
//!
//! At the start of each line leading whitespace is measured (space = 1,
//! tab = 4).  Measurement only matters for lines that carry content: blank
//! and comment-only lines never open or close a block.  Against the indent
//! stack a deeper line emits one `INDENT`; a shallower line pops every deeper
//! level and emits one `DEDENT` per popped level, queued across calls.  At end
//! of input the remaining levels are closed the same way before `EOF`.
//!
//! # Recognised lexemes
//!
//! - Numerals: digits with at most one `.`, a leading `.5` form, and an
//!   optional exponent (`e`/`E`, optional sign, digits).  A `.` that is not
//!   followed by a digit is left for the next token, so `1..5` is a range.
//! - Strings: `"` ... `"` with escapes `\n \t \r \\ \" \0`.  Unknown escapes
//!   keep both bytes.  An unterminated string runs to end of input.
//! - Comments: `//` to end of line (skipped with `memchr`) and `/* ... */`.
//!   An unterminated block comment runs to end of input.
//! - Identifiers/keywords: alphanumeric, `_` or non-ASCII sequences resolved
//!   through the perfect-hash `KEYWORDS` map.
//! - Unknown bytes are skipped.

use crate::token::{Token, TokenType};
use log::{debug, info};
use memchr::{memchr, memchr_iter, memmem, memrchr};
use phf::phf_map;
use std::iter::FusedIterator;

// ─────────────────────────────────────────────────────────────────────────────
// Static keyword map (compile-time perfect hash)
// ─────────────────────────────────────────────────────────────────────────────

static KEYWORDS: phf::Map<&'static [u8], TokenType> = phf_map! {
    b"true"        => TokenType::TRUE,
    b"false"       => TokenType::FALSE,
    b"null"        => TokenType::NULL,
    b"undecidable" => TokenType::UNDECIDABLE,
    b"set"         => TokenType::SET,
    b"function"    => TokenType::FUNCTION,
    b"return"      => TokenType::RETURN,
    b"if"          => TokenType::IF,
    b"elif"        => TokenType::ELIF,
    b"else"        => TokenType::ELSE,
    b"then"        => TokenType::THEN,
    b"while"       => TokenType::WHILE,
    b"for"         => TokenType::FOR,
    b"in"          => TokenType::IN,
    b"break"       => TokenType::BREAK,
    b"continue"    => TokenType::CONTINUE,
    b"class"       => TokenType::CLASS,
    b"new"         => TokenType::NEW,
    b"extends"     => TokenType::EXTENDS,
    b"import"      => TokenType::IMPORT,
    b"export"      => TokenType::EXPORT,
    b"from"        => TokenType::FROM,
    b"as"          => TokenType::AS,
    b"try"         => TokenType::TRY,
    b"catch"       => TokenType::CATCH,
    b"throw"       => TokenType::THROW,
    b"get"         => TokenType::GET,
    b"put"         => TokenType::PUT,
    b"and"         => TokenType::AND,
    b"or"          => TokenType::OR,
    b"not"         => TokenType::NOT,
    b"when"        => TokenType::WHEN,
    b"unless"      => TokenType::UNLESS,
    b"whenever"    => TokenType::WHENEVER,
    b"until"       => TokenType::UNTIL,
    b"during"      => TokenType::DURING,
    b"throughout"  => TokenType::THROUGHOUT,
    b"otherwise"   => TokenType::OTHERWISE,
};

/// Indentation width of a tab character.
const TAB_WIDTH: usize = 4;

/// A single pass **lexer** that converts Zen source into [`Token`]s.  The
/// lifetime `'a` ties every emitted token's `lexeme` slice back to the
/// original source.
///
/// `Clone` is cheap (a slice, a few counters and the indent stack) and is
/// what makes speculative lookahead possible.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    text: &'a str,          // entire source
    src: &'a [u8],          // same bytes, for fast scanning
    start: usize,           // index of the first byte of the current lexeme
    curr: usize,            // index one past the last byte examined
    line: usize,            // 1-based line of `curr`
    column: usize,          // 1-based column of `curr`
    start_line: usize,      // position of `start`
    start_column: usize,
    indent_stack: Vec<usize>,
    current_indent: usize,  // width measured on the current line so far
    at_line_start: bool,    // no content seen yet on the current line
    pending_dedents: usize, // DEDENTs still owed from a multi-level pop
    blank_input: bool,      // input holds nothing but whitespace
    done: bool,            // EOF already handed out by the iterator
}

impl<'a> Lexer<'a> {
    /// Create a new lexer over `text`.
    pub fn new(text: &'a str) -> Self {
        info!("Lexer created over {} bytes", text.len());

        let src: &[u8] = text.as_bytes();
        let blank_input: bool = src
            .iter()
            .all(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'));

        Self {
            text,
            src,
            start: 0,
            curr: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
            indent_stack: vec![0],
            current_indent: 0,
            at_line_start: true,
            pending_dedents: 0,
            blank_input,
            done: false,
        }
    }

    // ───────────────────────────── primitive helpers ────────────────────────

    #[inline(always)]
    const fn len(&self) -> usize {
        self.src.len()
    }

    #[inline(always)]
    fn is_at_end(&self) -> bool {
        self.curr >= self.len()
    }

    /// Advance one byte and return it, keeping line/column in sync.
    /// Callers guard with [`is_at_end`].
    #[inline(always)]
    fn advance(&mut self) -> u8 {
        let b = self.src[self.curr];
        self.curr += 1;

        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        b
    }

    /// Peek at the current byte without consuming it.  Returns `0` past EOF.
    #[inline(always)]
    fn peek(&self) -> u8 {
        self.byte_at(self.curr)
    }

    #[inline(always)]
    fn peek_next(&self) -> u8 {
        self.byte_at(self.curr + 1)
    }

    #[inline(always)]
    fn byte_at(&self, index: usize) -> u8 {
        if index >= self.len() {
            0
        } else {
            self.src[index]
        }
    }

    #[inline(always)]
    fn match_byte(&mut self, expected: u8) -> bool {
        if !self.is_at_end() && self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Jump the cursor to `target`, updating line/column for every newline
    /// crossed on the way.
    fn skip_to(&mut self, target: usize) {
        let skipped: &[u8] = &self.src[self.curr..target];
        let newlines: usize = memchr_iter(b'\n', skipped).count();

        if newlines > 0 {
            self.line += newlines;

            // memrchr cannot miss here: at least one newline was counted
            let last: usize = memrchr(b'\n', skipped).unwrap_or(0);
            self.column = skipped.len() - last;
        } else {
            self.column += skipped.len();
        }

        self.curr = target;
    }

    fn token(&self, token_type: TokenType) -> Token<'a> {
        Token::new(
            token_type,
            &self.text[self.start..self.curr],
            self.start_line,
            self.start_column,
        )
    }

    fn synthetic(&self, token_type: TokenType) -> Token<'a> {
        Token::new(token_type, "", self.line, self.column)
    }

    // ───────────────────────────── public API ──────────────────────────────

    /// Consume and return the next token.  After the input is exhausted every
    /// call returns `EOF`.
    pub fn next_token(&mut self) -> Token<'a> {
        if self.pending_dedents > 0 {
            self.pending_dedents -= 1;

            return self.synthetic(TokenType::DEDENT);
        }

        loop {
            // ── insignificant whitespace, comments, newlines ────────────
            match self.peek() {
                b'\n' if !self.is_at_end() => {
                    if self.blank_input {
                        self.advance();
                        continue;
                    }

                    self.start = self.curr;
                    self.start_line = self.line;
                    self.start_column = self.column;
                    self.advance();
                    self.at_line_start = true;
                    self.current_indent = 0;

                    return self.token(TokenType::NEWLINE);
                }

                b' ' => {
                    if self.at_line_start {
                        self.current_indent += 1;
                    }
                    self.advance();
                    continue;
                }

                b'\t' => {
                    if self.at_line_start {
                        self.current_indent += TAB_WIDTH;
                    }
                    self.advance();
                    continue;
                }

                b'\r' => {
                    self.advance();
                    continue;
                }

                b'/' if self.peek_next() == b'/' => {
                    // Fast-forward to the newline (kept: it still ends the line)
                    let target: usize = match memchr(b'\n', &self.src[self.curr..]) {
                        Some(pos) => self.curr + pos,
                        None => self.len(),
                    };
                    self.skip_to(target);
                    continue;
                }

                b'/' if self.peek_next() == b'*' => {
                    self.skip_block_comment();
                    continue;
                }

                _ => {}
            }

            // ── end of input: close open blocks, then EOF ───────────────
            if self.is_at_end() {
                if self.indent_stack.len() > 1 {
                    self.indent_stack.pop();
                    debug!("Closing block at end of input");

                    return self.synthetic(TokenType::DEDENT);
                }

                return self.synthetic(TokenType::EOF);
            }

            // ── indentation, measured on the first content of a line ─────
            if self.at_line_start {
                self.at_line_start = false;

                if let Some(token) = self.measure_indent() {
                    return token;
                }
            }

            // ── a real lexeme ────────────────────────────────────────────
            self.start = self.curr;
            self.start_line = self.line;
            self.start_column = self.column;

            if let Some(token_type) = self.scan_token() {
                let token: Token<'a> = self.token(token_type);
                debug!("Scanned token {} on line {}", token, token.line);

                return token;
            }
            // Otherwise an unknown byte was skipped → continue loop.
        }
    }

    /// Return the token `offset` positions ahead without consuming anything.
    pub fn peek_token(&self, offset: usize) -> Token<'a> {
        let mut probe: Lexer<'a> = self.clone();
        let mut token: Token<'a> = probe.next_token();

        for _ in 0..offset {
            if token.is(TokenType::EOF) {
                break;
            }
            token = probe.next_token();
        }

        token
    }

    // ───────────────────────────── core lexing ─────────────────────────────

    /// Compare the current line's indentation with the indent stack.
    fn measure_indent(&mut self) -> Option<Token<'a>> {
        let top: usize = *self.indent_stack.last().unwrap_or(&0);

        if self.current_indent > top {
            self.indent_stack.push(self.current_indent);
            debug!("Indent to {} on line {}", self.current_indent, self.line);

            return Some(self.synthetic(TokenType::INDENT));
        }

        if self.current_indent < top {
            let mut popped: usize = 0;

            while self.indent_stack.len() > 1
                && *self.indent_stack.last().unwrap_or(&0) > self.current_indent
            {
                self.indent_stack.pop();
                popped += 1;
            }

            debug!(
                "Dedent to {} on line {} ({} levels)",
                self.current_indent, self.line, popped
            );

            if popped > 0 {
                self.pending_dedents = popped - 1;

                return Some(self.synthetic(TokenType::DEDENT));
            }
        }

        None
    }

    fn skip_block_comment(&mut self) {
        self.advance(); // '/'
        self.advance(); // '*'

        let rest: &[u8] = &self.src[self.curr..];
        let target: usize = match memmem::find(rest, b"*/") {
            Some(pos) => self.curr + pos + 2,
            None => self.len(),
        };

        let crosses_line: bool = memchr(b'\n', &self.src[self.curr..target]).is_some();
        self.skip_to(target);

        if crosses_line {
            self.at_line_start = true;
            self.current_indent = 0;
        }
    }

    /// Scan one lexeme starting at `self.curr`.  Returns `None` when the byte
    /// was not recognised and has been skipped.
    fn scan_token(&mut self) -> Option<TokenType> {
        let c: u8 = self.peek();

        if c.is_ascii_digit() || (c == b'.' && self.peek_next().is_ascii_digit()) {
            return Some(self.parse_number());
        }

        if c.is_ascii_alphabetic() || c == b'_' || c >= 0x80 {
            return Some(self.parse_identifier());
        }

        self.advance();

        let tt = match c {
            b'"' => self.parse_string(),

            b'=' => {
                self.match_byte(b'=');
                TokenType::EQUALS
            }

            b'!' => {
                if self.match_byte(b'=') {
                    TokenType::NOT_EQUALS
                } else {
                    TokenType::NOT
                }
            }

            b'<' => {
                if self.match_byte(b'=') {
                    TokenType::LESS_EQUAL
                } else {
                    TokenType::LESS
                }
            }

            b'>' => {
                if self.match_byte(b'=') {
                    TokenType::GREATER_EQUAL
                } else {
                    TokenType::GREATER
                }
            }

            b'&' => {
                self.match_byte(b'&');
                TokenType::AND
            }

            b'|' => {
                self.match_byte(b'|');
                TokenType::OR
            }

            b'.' => {
                if self.peek() == b'.' && self.peek_next() == b'.' {
                    self.advance();
                    self.advance();
                    TokenType::SPREAD
                } else if self.match_byte(b'.') {
                    TokenType::RANGE
                } else {
                    TokenType::DOT
                }
            }

            b'+' => TokenType::PLUS,
            b'-' => TokenType::MINUS,
            b'*' => TokenType::STAR,
            b'/' => TokenType::SLASH,
            b'%' => TokenType::PERCENT,
            b',' => TokenType::COMMA,
            b':' => TokenType::COLON,
            b'?' => TokenType::QUESTION,
            b';' => TokenType::SEMICOLON,
            b'(' => TokenType::LEFT_PAREN,
            b')' => TokenType::RIGHT_PAREN,
            b'[' => TokenType::LEFT_BRACKET,
            b']' => TokenType::RIGHT_BRACKET,
            b'{' => TokenType::LEFT_BRACE,
            b'}' => TokenType::RIGHT_BRACE,

            _ => {
                debug!(
                    "Skipping unrecognised byte {:#04x} on line {}",
                    c, self.start_line
                );
                return None;
            }
        };

        Some(tt)
    }

    /// Parse a double-quoted string literal, decoding escapes.
    ///
    /// * The opening `"` has been consumed.
    /// * When we return, `self.curr` points past the closing `"` (or at EOF).
    fn parse_string(&mut self) -> TokenType {
        let mut bytes: Vec<u8> = Vec::new();

        while !self.is_at_end() && self.peek() != b'"' {
            let b: u8 = self.advance();

            if b != b'\\' || self.is_at_end() {
                bytes.push(b);
                continue;
            }

            let escaped: u8 = self.advance();
            match escaped {
                b'n' => bytes.push(b'\n'),
                b't' => bytes.push(b'\t'),
                b'r' => bytes.push(b'\r'),
                b'\\' => bytes.push(b'\\'),
                b'"' => bytes.push(b'"'),
                b'0' => bytes.push(0),
                other => {
                    bytes.push(b'\\');
                    bytes.push(other);
                }
            }
        }

        if !self.is_at_end() {
            self.advance(); // closing quote
        } else {
            debug!("Unterminated string starting on line {}", self.start_line);
        }

        TokenType::STRING(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Parse a numeral: `123`, `3.14`, `.5`, `1e5`, `2.5e-3`.
    fn parse_number(&mut self) -> TokenType {
        let mut seen_dot: bool = false;

        loop {
            let c: u8 = self.peek();

            if c.is_ascii_digit() {
                self.advance();
            } else if c == b'.' && !seen_dot && self.peek_next().is_ascii_digit() {
                seen_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        // Optional exponent, only when digits actually follow.
        if matches!(self.peek(), b'e' | b'E') {
            let next: u8 = self.peek_next();
            let signed: bool = matches!(next, b'+' | b'-');
            let digit_at: usize = if signed { self.curr + 2 } else { self.curr + 1 };

            if self.byte_at(digit_at).is_ascii_digit() {
                self.advance(); // e
                if signed {
                    self.advance();
                }
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            }
        }

        let s: &str = &self.text[self.start..self.curr];
        let n: f64 = s.parse::<f64>().unwrap_or(0.0); // shape checked above

        TokenType::NUMBER(n)
    }

    /// Parse an identifier and decide if it is a **keyword** or a generic
    /// `IDENTIFIER` token.
    fn parse_identifier(&mut self) -> TokenType {
        while {
            let c: u8 = self.peek();
            !self.is_at_end() && (c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80)
        } {
            self.advance();
        }

        let slice: &[u8] = &self.src[self.start..self.curr];

        KEYWORDS
            .get(slice)
            .cloned()
            .unwrap_or(TokenType::IDENTIFIER)
    }
}

// ───────────────────────── Iterator implementation ─────────────────────────

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let token: Token<'a> = self.next_token();

        if token.is(TokenType::EOF) {
            self.done = true;
        }

        Some(token)
    }
}

impl<'a> FusedIterator for Lexer<'a> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_does_not_move_the_cursor() {
        let mut lexer = Lexer::new("set x 1");

        assert_eq!(lexer.peek_token(2).token_type, TokenType::NUMBER(0.0));
        assert_eq!(lexer.next_token().token_type, TokenType::SET);
        assert_eq!(lexer.next_token().lexeme, "x");
    }

    #[test]
    fn multi_level_dedent_is_queued() {
        let kinds: Vec<TokenType> = Lexer::new("a\n  b\n    c\nd")
            .map(|t| t.token_type)
            .collect();

        let dedents = kinds.iter().filter(|k| **k == TokenType::DEDENT).count();
        assert_eq!(dedents, 2);
    }
}
