use crate::ast::{BinaryOp, CompareOp, Expr, ExprKind, LogicalOp, Stmt, StmtKind};
use crate::diag::Diagnostic;
use crate::token::{Span, Token, TokenKind};

pub type ParseResult<T> = Result<T, Diagnostic>;

/// Recursive-descent parser over the lexer's token stream.
///
/// Fails fast: the first unexpected token produces a single fatal
/// `SyntaxError` diagnostic carrying line, column, and the offending token
/// text. No recovery is attempted.
pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(mut tokens: Vec<Token<'a>>) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::new(TokenKind::Eof, Span::default()));
        }
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !matches!(self.current_kind(), TokenKind::Eof) {
            if self.consume_newlines() {
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        match self.current_kind() {
            TokenKind::Def => self.parse_function_def(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                let line = self.current_line();
                self.advance();
                self.expect(TokenKind::Newline)?;
                Ok(Stmt::new(StmtKind::Break, line))
            }
            TokenKind::Continue => {
                let line = self.current_line();
                self.advance();
                self.expect(TokenKind::Newline)?;
                Ok(Stmt::new(StmtKind::Continue, line))
            }
            TokenKind::Identifier(_) => match self.peek_kind() {
                TokenKind::Equal => self.parse_assignment(),
                TokenKind::PlusEq => self.parse_aug_assignment(BinaryOp::Add),
                TokenKind::MinusEq => self.parse_aug_assignment(BinaryOp::Sub),
                TokenKind::StarEq => self.parse_aug_assignment(BinaryOp::Mul),
                TokenKind::SlashEq => self.parse_aug_assignment(BinaryOp::Div),
                _ => self.parse_expr_statement(),
            },
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_expr_statement(&mut self) -> ParseResult<Stmt> {
        let expr = self.parse_expression()?;
        self.expect(TokenKind::Newline)?;
        let line = expr.line;
        Ok(Stmt::new(StmtKind::Expr(expr), line))
    }

    fn parse_assignment(&mut self) -> ParseResult<Stmt> {
        let line = self.current_line();
        let name = self.expect_identifier()?;
        self.expect(TokenKind::Equal)?;
        let value = self.parse_expression()?;
        self.expect(TokenKind::Newline)?;
        Ok(Stmt::new(StmtKind::Assign { name, value }, line))
    }

    fn parse_aug_assignment(&mut self, op: BinaryOp) -> ParseResult<Stmt> {
        let line = self.current_line();
        let name = self.expect_identifier()?;
        self.advance(); // the augmented operator
        let value = self.parse_expression()?;
        self.expect(TokenKind::Newline)?;
        Ok(Stmt::new(StmtKind::AugAssign { name, op, value }, line))
    }

    fn parse_function_def(&mut self) -> ParseResult<Stmt> {
        let line = self.current_line();
        self.expect(TokenKind::Def)?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        if !matches!(self.current_kind(), TokenKind::RParen) {
            params.push(self.expect_identifier()?);
            while matches!(self.current_kind(), TokenKind::Comma) {
                self.advance();
                params.push(self.expect_identifier()?);
            }
        }
        self.expect(TokenKind::RParen)?;

        let body = self.parse_block()?;
        Ok(Stmt::new(StmtKind::FunctionDef { name, params, body }, line))
    }

    /// Parses an `if` (or `elif`) head plus its chain. `elif` arms desugar
    /// to a nested `If` that is the sole statement of the else body.
    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let line = self.current_line();
        self.advance(); // 'if' or 'elif'
        let condition = self.parse_expression()?;
        let then_body = self.parse_block()?;

        let else_body = match self.current_kind() {
            TokenKind::Elif => vec![self.parse_if()?],
            TokenKind::Else => {
                self.advance();
                self.parse_block()?
            }
            _ => Vec::new(),
        };

        Ok(Stmt::new(
            StmtKind::If {
                condition,
                then_body,
                else_body,
            },
            line,
        ))
    }

    fn parse_while(&mut self) -> ParseResult<Stmt> {
        let line = self.current_line();
        self.expect(TokenKind::While)?;
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::new(StmtKind::While { condition, body }, line))
    }

    fn parse_for(&mut self) -> ParseResult<Stmt> {
        let line = self.current_line();
        self.expect(TokenKind::For)?;
        let target = self.expect_identifier()?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::For {
                target,
                iterable,
                body,
            },
            line,
        ))
    }

    fn parse_return(&mut self) -> ParseResult<Stmt> {
        let line = self.current_line();
        self.expect(TokenKind::Return)?;
        if matches!(self.current_kind(), TokenKind::Newline) {
            self.advance();
            return Ok(Stmt::new(StmtKind::Return(None), line));
        }
        let value = self.parse_expression()?;
        self.expect(TokenKind::Newline)?;
        Ok(Stmt::new(StmtKind::Return(Some(value)), line))
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::Newline)?;
        self.expect(TokenKind::Indent)?;

        let mut body = Vec::new();
        while !matches!(self.current_kind(), TokenKind::Dedent | TokenKind::Eof) {
            if self.consume_newlines() {
                continue;
            }
            body.push(self.parse_statement()?);
        }
        self.expect(TokenKind::Dedent)?;
        Ok(body)
    }

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_and()?;
        while matches!(self.current_kind(), TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            let line = expr.line;
            expr = Expr::new(
                ExprKind::Logical {
                    left: Box::new(expr),
                    op: LogicalOp::Or,
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_not()?;
        while matches!(self.current_kind(), TokenKind::And) {
            self.advance();
            let right = self.parse_not()?;
            let line = expr.line;
            expr = Expr::new(
                ExprKind::Logical {
                    left: Box::new(expr),
                    op: LogicalOp::And,
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if matches!(self.current_kind(), TokenKind::Not) {
            let line = self.current_line();
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::new(ExprKind::Not(Box::new(operand)), line));
        }
        self.parse_comparison()
    }

    /// Comparisons are left-associative binary: `a < b < c` groups as
    /// `(a < b) < c`.
    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_additive()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::EqEq => CompareOp::Eq,
                TokenKind::NotEq => CompareOp::Ne,
                TokenKind::Less => CompareOp::Lt,
                TokenKind::Greater => CompareOp::Gt,
                TokenKind::LessEq => CompareOp::Le,
                TokenKind::GreaterEq => CompareOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            let line = expr.line;
            expr = Expr::new(
                ExprKind::Compare {
                    left: Box::new(expr),
                    op,
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            let line = expr.line;
            expr = Expr::new(
                ExprKind::Binary {
                    left: Box::new(expr),
                    op,
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::DoubleSlash => BinaryOp::FloorDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let line = expr.line;
            expr = Expr::new(
                ExprKind::Binary {
                    left: Box::new(expr),
                    op,
                    right: Box::new(right),
                },
                line,
            );
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        if matches!(self.current_kind(), TokenKind::Minus) {
            let line = self.current_line();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(ExprKind::Neg(Box::new(operand)), line));
        }
        self.parse_power()
    }

    /// `**` is right-associative and binds tighter than unary minus, so
    /// `-2 ** 2` is `-(2 ** 2)` and `2 ** 3 ** 2` is `2 ** (3 ** 2)`.
    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_postfix()?;
        if matches!(self.current_kind(), TokenKind::DoubleStar) {
            self.advance();
            let exponent = self.parse_unary()?;
            let line = base.line;
            return Ok(Expr::new(
                ExprKind::Binary {
                    left: Box::new(base),
                    op: BinaryOp::Pow,
                    right: Box::new(exponent),
                },
                line,
            ));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.current_kind() {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.current_kind(), TokenKind::RParen) {
                        args.push(self.parse_expression()?);
                        while matches!(self.current_kind(), TokenKind::Comma) {
                            self.advance();
                            args.push(self.parse_expression()?);
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    let line = expr.line;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        line,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_identifier()?;
                    let line = expr.line;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            object: Box::new(expr),
                            name,
                        },
                        line,
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket)?;
                    let line = expr.line;
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        line,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        let line = self.current_line();
        match self.current_kind().clone() {
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Number(value), line))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(value), line))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(true), line))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(false), line))
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::new(ExprKind::None, line))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::new(ExprKind::Name(name.to_string()), line))
            }
            TokenKind::LParen => {
                self.advance();
                let first = self.parse_expression()?;
                if matches!(self.current_kind(), TokenKind::Comma) {
                    let mut items = vec![first];
                    while matches!(self.current_kind(), TokenKind::Comma) {
                        self.advance();
                        if matches!(self.current_kind(), TokenKind::RParen) {
                            break;
                        }
                        items.push(self.parse_expression()?);
                    }
                    self.expect(TokenKind::RParen)?;
                    return Ok(Expr::new(ExprKind::Tuple(items), line));
                }
                self.expect(TokenKind::RParen)?;
                Ok(first)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !matches!(self.current_kind(), TokenKind::RBracket) {
                    items.push(self.parse_expression()?);
                    while matches!(self.current_kind(), TokenKind::Comma) {
                        self.advance();
                        if matches!(self.current_kind(), TokenKind::RBracket) {
                            break;
                        }
                        items.push(self.parse_expression()?);
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::new(ExprKind::List(items), line))
            }
            _ => Err(self.error("expression")),
        }
    }

    fn consume_newlines(&mut self) -> bool {
        let mut consumed = false;
        while matches!(self.current_kind(), TokenKind::Newline) {
            consumed = true;
            self.advance();
        }
        consumed
    }

    fn expect(&mut self, expected: TokenKind<'a>) -> ParseResult<()> {
        if *self.current_kind() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&expected.describe()))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = self.current_kind() {
            let name = name.to_string();
            self.advance();
            Ok(name)
        } else {
            Err(self.error("identifier"))
        }
    }

    fn current(&self) -> &Token<'a> {
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| self.tokens.last().expect("token stream is non-empty"))
    }

    fn current_kind(&self) -> &TokenKind<'a> {
        &self.current().kind
    }

    fn current_line(&self) -> u32 {
        self.current().span.line
    }

    fn peek_kind(&self) -> &TokenKind<'a> {
        self.tokens
            .get(self.pos + 1)
            .map(|token| &token.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn error(&self, expected: &str) -> Diagnostic {
        let token = self.current();
        Diagnostic::syntax(
            format!("Expected {expected}, got {}", token.kind.describe()),
            token.span,
        )
    }
}

pub fn parse_tokens<'a>(tokens: Vec<Token<'a>>) -> ParseResult<Vec<Stmt>> {
    Parser::new(tokens).parse_program()
}
