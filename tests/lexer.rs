#[cfg(test)]
mod lexer_tests {
    use zen::lexer::*;
    use zen::token::*;

    fn assert_token_sequence(source: &str, expected: &[(TokenType, &str)]) {
        let tokens: Vec<Token<'_>> = Lexer::new(source).collect();

        assert_eq!(
            tokens.len(),
            expected.len(),
            "token count differs for {:?}: {:?}",
            source,
            tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>()
        );

        for (actual, (expected_type, expected_lexeme)) in tokens.iter().zip(expected.iter()) {
            assert_eq!(actual.token_type, *expected_type);
            assert_eq!(actual.lexeme, *expected_lexeme);
        }
    }

    fn kinds(source: &str) -> Vec<TokenType> {
        Lexer::new(source).map(|t| t.token_type).collect()
    }

    fn numbers(source: &str) -> Vec<f64> {
        Lexer::new(source)
            .filter_map(|t| match t.token_type {
                TokenType::NUMBER(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_lexer_01_symbols() {
        assert_token_sequence(
            "({*.,+*})",
            &[
                (TokenType::LEFT_PAREN, "("),
                (TokenType::LEFT_BRACE, "{"),
                (TokenType::STAR, "*"),
                (TokenType::DOT, "."),
                (TokenType::COMMA, ","),
                (TokenType::PLUS, "+"),
                (TokenType::STAR, "*"),
                (TokenType::RIGHT_BRACE, "}"),
                (TokenType::RIGHT_PAREN, ")"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_lexer_02_operators() {
        assert_token_sequence(
            "== != <= >= && || ! .. ...",
            &[
                (TokenType::EQUALS, "=="),
                (TokenType::NOT_EQUALS, "!="),
                (TokenType::LESS_EQUAL, "<="),
                (TokenType::GREATER_EQUAL, ">="),
                (TokenType::AND, "&&"),
                (TokenType::OR, "||"),
                (TokenType::NOT, "!"),
                (TokenType::RANGE, ".."),
                (TokenType::SPREAD, "..."),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_lexer_03_keywords_and_identifiers() {
        assert_token_sequence(
            "set total unless otherwise whenever",
            &[
                (TokenType::SET, "set"),
                (TokenType::IDENTIFIER, "total"),
                (TokenType::UNLESS, "unless"),
                (TokenType::OTHERWISE, "otherwise"),
                (TokenType::WHENEVER, "whenever"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_lexer_04_numerals() {
        assert_eq!(numbers("42 3.14 .5 1e5 2.5e-3"), vec![42.0, 3.14, 0.5, 100000.0, 0.0025]);
    }

    #[test]
    fn test_lexer_05_range_is_not_a_decimal_point() {
        assert_token_sequence(
            "1..5",
            &[
                (TokenType::NUMBER(1.0), "1"),
                (TokenType::RANGE, ".."),
                (TokenType::NUMBER(5.0), "5"),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_lexer_06_exponent_needs_digits() {
        // `2e` is a number followed by the identifier `e`
        assert_eq!(
            kinds("2e"),
            vec![TokenType::NUMBER(0.0), TokenType::IDENTIFIER, TokenType::EOF]
        );
    }

    #[test]
    fn test_lexer_07_string_escapes() {
        let tokens: Vec<Token<'_>> = Lexer::new(r#""a\n\t\"b\"\\ \q""#).collect();

        match &tokens[0].token_type {
            TokenType::STRING(s) => assert_eq!(s, "a\n\t\"b\"\\ \\q"),
            other => panic!("expected a string, got {:?}", other),
        }
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_lexer_08_unterminated_string_runs_to_end() {
        let tokens: Vec<Token<'_>> = Lexer::new("print \"abc").collect();

        assert_eq!(tokens.len(), 3);
        match &tokens[1].token_type {
            TokenType::STRING(s) => assert_eq!(s, "abc"),
            other => panic!("expected a string, got {:?}", other),
        }
    }

    #[test]
    fn test_lexer_09_comments_are_skipped() {
        assert_eq!(
            kinds("set x 1 // note\n/* block\ncomment */\nset y 2"),
            vec![
                TokenType::SET,
                TokenType::IDENTIFIER,
                TokenType::NUMBER(0.0),
                TokenType::NEWLINE,
                TokenType::NEWLINE,
                TokenType::SET,
                TokenType::IDENTIFIER,
                TokenType::NUMBER(0.0),
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn test_lexer_10_indentation_blocks() {
        assert_eq!(
            kinds("if x\n    y\nz"),
            vec![
                TokenType::IF,
                TokenType::IDENTIFIER,
                TokenType::NEWLINE,
                TokenType::INDENT,
                TokenType::IDENTIFIER,
                TokenType::NEWLINE,
                TokenType::DEDENT,
                TokenType::IDENTIFIER,
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn test_lexer_11_blank_lines_do_not_change_blocks() {
        let kinds: Vec<TokenType> = kinds("if x\n    y\n\n    z\n");

        assert_eq!(kinds.iter().filter(|k| **k == TokenType::INDENT).count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == TokenType::DEDENT).count(), 1);
        assert_eq!(kinds.last(), Some(&TokenType::EOF));
    }

    #[test]
    fn test_lexer_12_open_blocks_close_at_end_of_input() {
        let kinds: Vec<TokenType> = kinds("a\n  b\n    c");
        let tail: &[TokenType] = &kinds[kinds.len() - 3..];

        assert_eq!(tail, &[TokenType::DEDENT, TokenType::DEDENT, TokenType::EOF]);
    }

    #[test]
    fn test_lexer_13_tabs_count_as_four() {
        // a tab and four spaces sit at the same depth
        let kinds: Vec<TokenType> = kinds("a\n\tb\n    c\n");

        assert_eq!(kinds.iter().filter(|k| **k == TokenType::INDENT).count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == TokenType::DEDENT).count(), 1);
    }

    #[test]
    fn test_lexer_14_positions() {
        let tokens: Vec<Token<'_>> = Lexer::new("set x 1\n  print x").collect();

        let x: &Token<'_> = &tokens[1];
        assert_eq!((x.line, x.column), (1, 5));

        let print: &Token<'_> = tokens
            .iter()
            .find(|t| t.lexeme == "print")
            .expect("print token");
        assert_eq!((print.line, print.column), (2, 3));
    }

    #[test]
    fn test_lexer_15_unknown_bytes_are_skipped() {
        assert_token_sequence(
            ",$#.",
            &[
                (TokenType::COMMA, ","),
                (TokenType::DOT, "."),
                (TokenType::EOF, ""),
            ],
        );
    }

    #[test]
    fn test_lexer_16_eof_repeats() {
        let mut lexer = Lexer::new("");

        assert_eq!(lexer.next_token().token_type, TokenType::EOF);
        assert_eq!(lexer.next_token().token_type, TokenType::EOF);
    }

    #[test]
    fn test_lexer_17_peek_matches_next() {
        let mut lexer = Lexer::new("function f\n    return 1\n");

        let peeked: Vec<TokenType> = (0..6).map(|i| lexer.peek_token(i).token_type).collect();
        let consumed: Vec<TokenType> = (0..6).map(|_| lexer.next_token().token_type).collect();

        assert_eq!(peeked, consumed);
    }
}
