use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    end: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        let end = tokens.last().map(|(_, s)| s.end).unwrap_or(0);
        Parser { tokens, pos: 0, end }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .unwrap_or(Span::new(self.end, self.end))
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|(_, s)| *s)
            .unwrap_or(Span::UNKNOWN)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => Err(self.error(format!("expected {:?}, got {:?}", expected, tok))),
            None => Err(self.error(format!("expected {:?}, got EOF", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error(format!("expected identifier, got {:?}", tok))),
            None => Err(self.error("expected identifier, got EOF".into())),
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError {
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- Statements ----

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut statements = Vec::new();
        while !self.at_end() {
            if self.eat(&Token::Semi) {
                continue;
            }
            statements.push(self.parse_stmt()?);
        }
        Ok(Program { statements })
    }

    /// `{ stmt* }`
    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.advance();
                    return Ok(stmts);
                }
                Some(Token::Semi) => {
                    self.advance();
                }
                Some(_) => stmts.push(self.parse_stmt()?),
                None => return Err(self.error("expected '}', got EOF".into())),
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => {
                self.advance();
                let condition = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::While { condition, body })
            }
            Some(Token::Fn) => self.parse_function(),
            _ => {
                let stmt = self.parse_simple_stmt()?;
                self.end_simple_stmt()?;
                Ok(stmt)
            }
        }
    }

    /// Simple statements end in `;`, which may be left off before `}` or EOF.
    fn end_simple_stmt(&mut self) -> Result<()> {
        match self.peek() {
            Some(Token::Semi) => {
                self.advance();
                Ok(())
            }
            None | Some(Token::RBrace) => Ok(()),
            Some(tok) => Err(self.error(format!("expected ';', got {:?}", tok))),
        }
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Let) => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(&Token::Assign)?;
                let value = self.parse_expr()?;
                Ok(Stmt::Let { name, value })
            }
            Some(Token::Return) => {
                self.advance();
                if matches!(self.peek(), None | Some(Token::Semi) | Some(Token::RBrace)) {
                    return Err(self.error("return requires a value".into()));
                }
                Ok(Stmt::Return(self.parse_expr()?))
            }
            Some(Token::Break) => {
                self.advance();
                Ok(Stmt::Break { span: self.prev_span() })
            }
            Some(Token::Continue) => {
                self.advance();
                Ok(Stmt::Continue { span: self.prev_span() })
            }
            Some(Token::Ident(_)) if self.is_assignment() => self.parse_assignment(),
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    fn is_assignment(&self) -> bool {
        matches!(
            self.peek_at(1),
            Some(Token::Assign)
                | Some(Token::PlusEq)
                | Some(Token::MinusEq)
                | Some(Token::StarEq)
                | Some(Token::SlashEq)
                | Some(Token::PercentEq)
                | Some(Token::PlusPlus)
                | Some(Token::MinusMinus)
        )
    }

    /// `x = e`, `x op= e`, `x++`, `x--`; all become plain reassignment.
    fn parse_assignment(&mut self) -> Result<Stmt> {
        let name = self.expect_ident()?;
        let target = || Expr::Ref(name.clone());
        let value = match self.advance().cloned() {
            Some(Token::Assign) => self.parse_expr()?,
            Some(Token::PlusPlus) => Expr::binary(BinOp::Add, target(), Expr::int(1)),
            Some(Token::MinusMinus) => Expr::binary(BinOp::Subtract, target(), Expr::int(1)),
            Some(tok) => {
                let op = match tok {
                    Token::PlusEq => BinOp::Add,
                    Token::MinusEq => BinOp::Subtract,
                    Token::StarEq => BinOp::Multiply,
                    Token::SlashEq => BinOp::Divide,
                    Token::PercentEq => BinOp::Modulo,
                    other => unreachable!("is_assignment admitted {other:?}"),
                };
                Expr::binary(op, target(), self.parse_expr()?)
            }
            None => unreachable!("is_assignment checked lookahead"),
        };
        Ok(Stmt::Assign { name, value })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect(&Token::If)?;
        let condition = self.parse_expr()?;
        let body = self.parse_block()?;
        let alternative = if self.eat(&Token::Else) {
            if self.peek() == Some(&Token::If) {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If { condition, body, alternative })
    }

    /// `fn name(a, b) { body }`
    fn parse_function(&mut self) -> Result<Stmt> {
        let start = self.expect(&Token::Fn)?;
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                params.push(self.expect_ident()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(&Token::RParen)?;
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(Stmt::Function {
            name,
            params,
            body,
            span: start.merge(self.prev_span()),
        })
    }

    // ---- Expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_binary(1)
    }

    /// Precedence climbing over the binary levels; `**` is handled in
    /// `parse_power` because it binds tighter than unary operators.
    fn parse_binary(&mut self, min_level: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while let Some((op, level)) = self.peek().and_then(binary_op) {
            if level < min_level {
                break;
            }
            self.advance();
            let right = self.parse_binary(level + 1)?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Bang) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) })
            }
            Some(Token::Minus) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(match operand {
                    Expr::Literal(Literal::Int(n)) => Expr::int(-n),
                    Expr::Literal(Literal::Float(f)) => Expr::Literal(Literal::Float(-f)),
                    operand => Expr::Unary { op: UnaryOp::Negate, operand: Box::new(operand) },
                })
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if self.eat(&Token::StarStar) {
            // right associative, and `2 ** -1` is allowed
            let exponent = self.parse_unary()?;
            return Ok(Expr::binary(BinOp::Power, base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Int(n)) => {
                self.advance();
                Ok(Expr::int(n))
            }
            Some(Token::Float(f)) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(f)))
            }
            Some(Token::Text(s)) => {
                self.advance();
                Ok(Expr::Literal(Literal::Text(s)))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if self.peek() == Some(&Token::LParen) {
                    let args = self.parse_args()?;
                    Ok(Expr::Call { function: name, args })
                } else {
                    Ok(Expr::Ref(name))
                }
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(tok) => Err(self.error(format!("expected expression, got {:?}", tok))),
            None => Err(self.error("expected expression, got EOF".into())),
        }
    }

    /// `( expr, expr, ... )`
    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            return Ok(args);
        }
    }
}

/// Binary operator and its precedence level (higher binds tighter).
fn binary_op(token: &Token) -> Option<(BinOp, u8)> {
    let entry = match token {
        Token::OrOr => (BinOp::Or, 1),
        Token::AndAnd => (BinOp::And, 2),
        Token::EqEq => (BinOp::Equals, 3),
        Token::NotEq => (BinOp::NotEquals, 3),
        Token::Less => (BinOp::LessThan, 4),
        Token::LessEq => (BinOp::LessOrEqual, 4),
        Token::Greater => (BinOp::GreaterThan, 4),
        Token::GreaterEq => (BinOp::GreaterOrEqual, 4),
        Token::Plus => (BinOp::Add, 5),
        Token::Minus => (BinOp::Subtract, 5),
        Token::Star => (BinOp::Multiply, 6),
        Token::Slash => (BinOp::Divide, 6),
        Token::Percent => (BinOp::Modulo, 6),
        _ => return None,
    };
    Some(entry)
}

pub fn parse(tokens: Vec<(Token, Span)>) -> Result<Program> {
    Parser::new(tokens).parse_program()
}

/// Lex and parse in one step. Lex errors are reported as parse errors at the
/// offending byte.
pub fn parse_source(source: &str) -> Result<Program> {
    let tokens = crate::lexer::lex(source).map_err(|e| ParseError {
        position: 0,
        span: Span::new(e.position, e.position + e.snippet.len().max(1)),
        message: e.to_string(),
    })?;
    parse(tokens)
}
