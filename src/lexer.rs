use thiserror::Error;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerState {
    LineBegin,
    TokenStart,
}

enum StepOutcome<'a> {
    Emit(Token<'a>),
    Continue,
}

#[derive(Debug, Error, PartialEq)]
pub enum LexError {
    #[error("Inconsistent dedent to {indent} spaces at line {line}")]
    InvalidDedent { indent: usize, line: u32, column: u32 },
    #[error("Unexpected character '{character}' at line {line}, column {column}")]
    UnexpectedCharacter { character: char, line: u32, column: u32 },
    #[error("Tabs are not supported for indentation at line {line}")]
    TabIndentation { line: u32, column: u32 },
    #[error("Invalid number literal '{literal}' at line {line}")]
    InvalidNumberLiteral { literal: String, line: u32, column: u32 },
    #[error("Unterminated string literal at line {line}, column {column}")]
    UnterminatedString { line: u32, column: u32 },
    #[error("Lexer invariant violated: {message}")]
    InvariantViolation { message: &'static str },
}

impl LexError {
    /// Position the error points at, for diagnostics.
    pub fn position(&self) -> Option<Span> {
        match *self {
            LexError::InvalidDedent { line, column, .. }
            | LexError::UnexpectedCharacter { line, column, .. }
            | LexError::TabIndentation { line, column }
            | LexError::InvalidNumberLiteral { line, column, .. }
            | LexError::UnterminatedString { line, column } => Some(Span::new(line, column)),
            LexError::InvariantViolation { .. } => None,
        }
    }
}

pub type LexResult<T> = Result<T, LexError>;

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: u32,
    line_start: usize,
    indent_stack: Vec<usize>,
    pending_tokens: Vec<Token<'a>>,
    state: LexerState,
    line_has_tokens: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            line_start: 0,
            indent_stack: vec![0],
            pending_tokens: Vec::new(),
            state: LexerState::LineBegin,
            line_has_tokens: false,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        loop {
            if let Some(token) = self.pending_tokens.pop() {
                return Ok(token);
            }

            match self.step_state()? {
                StepOutcome::Emit(token) => return Ok(token),
                StepOutcome::Continue => continue,
            }
        }
    }

    fn step_state(&mut self) -> LexResult<StepOutcome<'a>> {
        match self.state {
            LexerState::LineBegin => self.handle_line_begin(),
            LexerState::TokenStart => {
                self.skip_whitespace();
                if self.peek_char() == Some('#') {
                    self.consume_while(|c| c != '\n');
                }

                if self.peek_char().is_none() {
                    return self.handle_eof();
                }

                Ok(StepOutcome::Emit(self.read_token_from_current_position()?))
            }
        }
    }

    /// Measures indentation and produces Indent/Dedent as needed. Blank and
    /// comment-only lines carry no layout: they are skipped whole, so they
    /// never shift indentation or emit tokens.
    fn handle_line_begin(&mut self) -> LexResult<StepOutcome<'a>> {
        let indent = loop {
            let indent = self.consume_while(|c| c == ' ');
            match self.peek_char() {
                Some('\t') => {
                    return Err(LexError::TabIndentation {
                        line: self.line,
                        column: self.column(),
                    });
                }
                Some('#') => {
                    self.consume_while(|c| c != '\n');
                }
                Some('\n') => {
                    self.consume_char();
                }
                Some(_) => break indent,
                None => {
                    self.state = LexerState::TokenStart;
                    return Ok(StepOutcome::Continue);
                }
            }
        };

        let current_indent = self.current_indent()?;
        let span = self.span_here();
        self.state = LexerState::TokenStart;

        if indent > current_indent {
            self.indent_stack.push(indent);
            return Ok(StepOutcome::Emit(Token::new(TokenKind::Indent, span)));
        }

        if indent < current_indent {
            while let Some(&top) = self.indent_stack.last() {
                if top > indent {
                    self.indent_stack.pop();
                    self.pending_tokens.push(Token::new(TokenKind::Dedent, span));
                } else {
                    break;
                }
            }
            if self.current_indent()? != indent {
                return Err(LexError::InvalidDedent {
                    indent,
                    line: self.line,
                    column: self.column(),
                });
            }
            return Ok(StepOutcome::Continue);
        }

        Ok(StepOutcome::Continue)
    }

    fn handle_eof(&mut self) -> LexResult<StepOutcome<'a>> {
        // An unterminated final line still ends its statement.
        if self.line_has_tokens {
            self.line_has_tokens = false;
            return Ok(StepOutcome::Emit(Token::new(TokenKind::Newline, self.span_here())));
        }

        self.flush_eof_dedents();
        if !self.pending_tokens.is_empty() {
            return Ok(StepOutcome::Continue);
        }

        Ok(StepOutcome::Emit(Token::new(TokenKind::Eof, self.span_here())))
    }

    fn skip_whitespace(&mut self) {
        self.consume_while(|c| c == ' ');
    }

    fn read_token_from_current_position(&mut self) -> LexResult<Token<'a>> {
        let span = self.span_here();
        let ch = self.peek_char().ok_or(LexError::InvariantViolation {
            message: "read_token_from_current_position called at EOF",
        })?;

        let token = match ch {
            '\n' => {
                self.consume_char();
                self.state = LexerState::LineBegin;
                self.line_has_tokens = false;
                return Ok(Token::new(TokenKind::Newline, span));
            }
            '"' | '\'' => self.read_string(ch, span)?,
            c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(span),
            c if c.is_ascii_digit() => self.read_number(span)?,
            _ => {
                if let Some(token) = self.try_consume_operator(ch, span) {
                    token
                } else {
                    return Err(LexError::UnexpectedCharacter {
                        character: ch,
                        line: span.line,
                        column: span.column,
                    });
                }
            }
        };

        self.line_has_tokens = true;
        Ok(token)
    }

    /// Multi-character operators are matched greedily before their
    /// one-character prefixes.
    fn try_consume_operator(&mut self, ch: char, span: Span) -> Option<Token<'a>> {
        let next = self.char_at(self.pos + ch.len_utf8());
        let (kind, len) = match (ch, next) {
            ('*', Some('=')) => (TokenKind::StarEq, 2),
            ('*', Some('*')) => (TokenKind::DoubleStar, 2),
            ('*', _) => (TokenKind::Star, 1),
            ('/', Some('=')) => (TokenKind::SlashEq, 2),
            ('/', Some('/')) => (TokenKind::DoubleSlash, 2),
            ('/', _) => (TokenKind::Slash, 1),
            ('+', Some('=')) => (TokenKind::PlusEq, 2),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', Some('=')) => (TokenKind::MinusEq, 2),
            ('-', _) => (TokenKind::Minus, 1),
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('=', _) => (TokenKind::Equal, 1),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('!', _) => return None,
            ('<', Some('=')) => (TokenKind::LessEq, 2),
            ('<', _) => (TokenKind::Less, 1),
            ('>', Some('=')) => (TokenKind::GreaterEq, 2),
            ('>', _) => (TokenKind::Greater, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            (',', _) => (TokenKind::Comma, 1),
            (':', _) => (TokenKind::Colon, 1),
            ('.', _) => (TokenKind::Dot, 1),
            _ => return None,
        };

        for _ in 0..len {
            self.consume_char();
        }
        Some(Token::new(kind, span))
    }

    fn read_identifier(&mut self, span: Span) -> Token<'a> {
        let start = self.pos;
        self.consume_while(|c| c.is_ascii_alphanumeric() || c == '_');
        let ident = &self.input[start..self.pos];

        let kind = match ident {
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "None" => TokenKind::None,
            _ => TokenKind::Identifier(ident),
        };
        Token::new(kind, span)
    }

    fn read_number(&mut self, span: Span) -> LexResult<Token<'a>> {
        let start = self.pos;
        self.consume_while(|c| c.is_ascii_digit());
        if self.peek_char() == Some('.')
            && self
                .char_at(self.pos + 1)
                .is_some_and(|c| c.is_ascii_digit())
        {
            self.consume_char();
            self.consume_while(|c| c.is_ascii_digit());
        }

        let literal = &self.input[start..self.pos];
        let value = literal
            .parse::<f64>()
            .map_err(|_| LexError::InvalidNumberLiteral {
                literal: literal.to_string(),
                line: span.line,
                column: span.column,
            })?;
        Ok(Token::new(TokenKind::Number(value), span))
    }

    fn read_string(&mut self, quote: char, span: Span) -> LexResult<Token<'a>> {
        self.consume_char(); // opening quote
        let mut content = String::new();

        loop {
            match self.peek_char() {
                Some(c) if c == quote => {
                    self.consume_char();
                    return Ok(Token::new(TokenKind::Str(content), span));
                }
                Some('\n') | None => {
                    return Err(LexError::UnterminatedString {
                        line: span.line,
                        column: span.column,
                    });
                }
                Some('\\') => {
                    self.consume_char();
                    match self.consume_char() {
                        Some('n') => content.push('\n'),
                        Some('t') => content.push('\t'),
                        Some('\\') => content.push('\\'),
                        Some('"') => content.push('"'),
                        Some('\'') => content.push('\''),
                        Some(other) => {
                            // Unknown escapes pass through verbatim.
                            content.push('\\');
                            content.push(other);
                        }
                        None => {
                            return Err(LexError::UnterminatedString {
                                line: span.line,
                                column: span.column,
                            });
                        }
                    }
                }
                Some(c) => {
                    self.consume_char();
                    content.push(c);
                }
            }
        }
    }

    fn consume_while<P>(&mut self, keep_predicate: P) -> usize
    where
        P: Fn(char) -> bool,
    {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if !keep_predicate(c) {
                break;
            }
            self.consume_char();
        }
        self.pos - start
    }

    fn char_at(&self, index: usize) -> Option<char> {
        if index >= self.input.len() {
            None
        } else {
            self.input[index..].chars().next()
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.char_at(self.pos)
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(c)
    }

    fn column(&self) -> u32 {
        (self.pos - self.line_start + 1) as u32
    }

    fn span_here(&self) -> Span {
        Span::new(self.line, self.column())
    }

    fn current_indent(&self) -> LexResult<usize> {
        self.indent_stack
            .last()
            .copied()
            .ok_or(LexError::InvariantViolation {
                message: "indent stack is empty",
            })
    }

    fn flush_eof_dedents(&mut self) {
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            let span = self.span_here();
            self.pending_tokens.push(Token::new(TokenKind::Dedent, span));
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LexResult<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) => Some(Ok(token)),
            Err(e) => Some(Err(e)),
        }
    }
}

pub fn tokenize(input: &str) -> LexResult<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds(input: &str) -> Vec<TokenKind<'_>> {
        tokenize(input)
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn tokenizes_function_definition() {
        let input = indoc! {"
            def double(n):
                return n * 2
            x = double(21)
        "};
        let expected = vec![
            TokenKind::Def,
            TokenKind::Identifier("double"),
            TokenKind::LParen,
            TokenKind::Identifier("n"),
            TokenKind::RParen,
            TokenKind::Colon,
            TokenKind::Newline,
            TokenKind::Indent,
            TokenKind::Return,
            TokenKind::Identifier("n"),
            TokenKind::Star,
            TokenKind::Number(2.0),
            TokenKind::Newline,
            TokenKind::Dedent,
            TokenKind::Identifier("x"),
            TokenKind::Equal,
            TokenKind::Identifier("double"),
            TokenKind::LParen,
            TokenKind::Number(21.0),
            TokenKind::RParen,
            TokenKind::Newline,
            TokenKind::Eof,
        ];
        assert_eq!(kinds(input), expected);
    }

    #[test]
    fn multi_character_operators_win_over_prefixes() {
        let expected = vec![
            TokenKind::Identifier("a"),
            TokenKind::DoubleStar,
            TokenKind::Identifier("b"),
            TokenKind::DoubleSlash,
            TokenKind::Identifier("c"),
            TokenKind::LessEq,
            TokenKind::Identifier("d"),
            TokenKind::NotEq,
            TokenKind::Identifier("e"),
            TokenKind::Newline,
            TokenKind::Eof,
        ];
        assert_eq!(kinds("a ** b // c <= d != e\n"), expected);

        let expected = vec![
            TokenKind::Identifier("x"),
            TokenKind::PlusEq,
            TokenKind::Number(1.0),
            TokenKind::Newline,
            TokenKind::Identifier("x"),
            TokenKind::SlashEq,
            TokenKind::Number(2.0),
            TokenKind::Newline,
            TokenKind::Eof,
        ];
        assert_eq!(kinds("x += 1\nx /= 2\n"), expected);
    }

    #[test]
    fn tokenizes_fractional_numbers() {
        let expected = vec![
            TokenKind::Identifier("x"),
            TokenKind::Equal,
            TokenKind::Number(2.5),
            TokenKind::Plus,
            TokenKind::Number(0.25),
            TokenKind::Newline,
            TokenKind::Eof,
        ];
        assert_eq!(kinds("x = 2.5 + 0.25\n"), expected);
    }

    #[test]
    fn processes_escape_sequences_in_both_quote_styles() {
        assert_eq!(
            kinds(r#"s = "a\n\t\\\"b""#)[2],
            TokenKind::Str("a\n\t\\\"b".to_string())
        );
        assert_eq!(
            kinds(r"s = 'it\'s'")[2],
            TokenKind::Str("it's".to_string())
        );
    }

    #[test]
    fn keywords_have_their_own_kinds() {
        let expected = vec![
            TokenKind::For,
            TokenKind::Identifier("e"),
            TokenKind::In,
            TokenKind::Identifier("xs"),
            TokenKind::Colon,
            TokenKind::Newline,
            TokenKind::Indent,
            TokenKind::Break,
            TokenKind::Newline,
            TokenKind::Dedent,
            TokenKind::Eof,
        ];
        assert_eq!(kinds("for e in xs:\n    break\n"), expected);
    }

    #[test]
    fn comment_lines_emit_no_tokens_and_do_not_shift_lines() {
        let input = indoc! {"
            # setup comment
            x = 1
            # middle comment

            y = 2
        "};
        let tokens = tokenize(input).expect("tokenize should succeed");

        assert_eq!(tokens[0].kind, TokenKind::Identifier("x"));
        assert_eq!(tokens[0].span.line, 2);
        let y = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Identifier("y"))
            .expect("expected token for y");
        assert_eq!(y.span.line, 5);
    }

    #[test]
    fn trailing_comment_does_not_swallow_newline() {
        let expected = vec![
            TokenKind::Identifier("x"),
            TokenKind::Equal,
            TokenKind::Number(1.0),
            TokenKind::Newline,
            TokenKind::Identifier("y"),
            TokenKind::Equal,
            TokenKind::Number(2.0),
            TokenKind::Newline,
            TokenKind::Eof,
        ];
        assert_eq!(kinds("x = 1  # note\ny = 2\n"), expected);
    }

    #[test]
    fn blank_line_does_not_change_indentation() {
        let input = indoc! {"
            if True:
                x = 1

                y = 2
        "};
        let expected = vec![
            TokenKind::If,
            TokenKind::True,
            TokenKind::Colon,
            TokenKind::Newline,
            TokenKind::Indent,
            TokenKind::Identifier("x"),
            TokenKind::Equal,
            TokenKind::Number(1.0),
            TokenKind::Newline,
            TokenKind::Identifier("y"),
            TokenKind::Equal,
            TokenKind::Number(2.0),
            TokenKind::Newline,
            TokenKind::Dedent,
            TokenKind::Eof,
        ];
        assert_eq!(kinds(input), expected);
    }

    #[test]
    fn token_lines_and_columns_are_one_based() {
        let tokens = tokenize("x = 1\n  # indented comment\nabc = x\n")
            .expect("tokenize should succeed");
        let positions: Vec<(u32, u32)> = tokens
            .iter()
            .map(|t| (t.span.line, t.span.column))
            .collect();
        assert_eq!(
            positions,
            vec![
                (1, 1), // x
                (1, 3), // =
                (1, 5), // 1
                (1, 6), // newline
                (3, 1), // abc
                (3, 5), // =
                (3, 7), // x
                (3, 8), // newline
                (4, 1), // eof
            ]
        );
    }

    #[test]
    fn synthesizes_newline_and_dedent_before_eof() {
        let expected = vec![
            TokenKind::If,
            TokenKind::True,
            TokenKind::Colon,
            TokenKind::Newline,
            TokenKind::Indent,
            TokenKind::Identifier("x"),
            TokenKind::Equal,
            TokenKind::Number(1.0),
            TokenKind::Newline,
            TokenKind::Dedent,
            TokenKind::Eof,
        ];
        assert_eq!(kinds("if True:\n    x = 1"), expected);
    }

    #[test]
    fn errors_on_tab_indentation() {
        let err = tokenize("\tx = 1\n").expect_err("expected tab indentation failure");
        assert_eq!(err, LexError::TabIndentation { line: 1, column: 1 });
    }

    #[test]
    fn errors_on_inconsistent_dedent() {
        let input = indoc! {"
            if True:
                x = 1
              y = 2
        "};
        let err = tokenize(input).expect_err("expected inconsistent dedent failure");
        assert_eq!(
            err,
            LexError::InvalidDedent {
                indent: 2,
                line: 3,
                column: 3
            }
        );
    }

    #[test]
    fn errors_on_unexpected_character() {
        let err = tokenize("x = 1 @ 2\n").expect_err("expected lexing failure");
        assert!(err.to_string().contains("Unexpected character '@'"));
    }

    #[test]
    fn errors_on_unterminated_string() {
        let err = tokenize("x = \"abc\n").expect_err("expected unterminated string failure");
        assert_eq!(err, LexError::UnterminatedString { line: 1, column: 5 });
    }
}
