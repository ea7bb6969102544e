//! Lexer, parser and AST for the PEXL page expression language.
//!
//! Parsing is pure over its input span: the recursive-descent parser builds
//! an immutable [`ast::Expression`] tree (or a [`ast::Pipeline`] of
//! `|>`-separated stages) and either succeeds completely or fails with a
//! [`SyntaxError`] carrying the offending position and a source snippet.
//!
//! ```rust
//! use pexl_parser::{ast::Expression, Parser};
//!
//! let ast = Parser::parse("a.b == 2").unwrap();
//! assert_eq!(ast, Parser::parse("a.b == 2").unwrap());
//! assert!(matches!(ast, Expression::Binary { .. }));
//! ```

pub mod ast;
mod lexer;
pub mod token;

use ast::{BinaryOp, Expression, Literal, LogicalOp, Pipeline, TemplatePart, UnaryOp};
use token::{RawTemplatePart, Token, TokenKind};

/// A fatal parse failure: malformed token stream, unbalanced delimiters or
/// an unexpected token. Aborts the whole parse.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at offset {offset} near '{snippet}'")]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
    pub snippet: String,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, src: &str, offset: usize) -> Self {
        let snippet: String = src[offset.min(src.len())..].chars().take(24).collect();
        let snippet = if snippet.is_empty() {
            "<end of input>".to_string()
        } else {
            snippet
        };
        SyntaxError {
            message: message.into(),
            offset,
            snippet,
        }
    }
}

pub struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Parse a single expression; trailing unconsumed tokens are an error.
    pub fn parse(input: &str) -> Result<Expression, SyntaxError> {
        let mut parser = Parser::new(input)?;
        let expr = parser.parse_expr()?;
        parser.expect_end()?;
        Ok(expr)
    }

    /// Parse a source expression followed by zero or more `|>` stages.
    pub fn parse_pipeline(input: &str) -> Result<Pipeline, SyntaxError> {
        let mut parser = Parser::new(input)?;
        let source = parser.parse_expr()?;
        let mut stages = Vec::new();
        while parser.eat(&TokenKind::PipeGt) {
            stages.push(parser.parse_stage()?);
        }
        parser.expect_end()?;
        Ok(Pipeline { source, stages })
    }

    /// Parse a callable target, normalizing a bare identifier or an
    /// identifier-with-empty-parens into the same zero-argument call shape.
    pub fn parse_call_target(input: &str) -> Result<Expression, SyntaxError> {
        let mut parser = Parser::new(input)?;
        let stage = parser.parse_stage()?;
        parser.expect_end()?;
        Ok(stage)
    }

    fn new(src: &'a str) -> Result<Self, SyntaxError> {
        Ok(Parser {
            src,
            tokens: lexer::tokenize(src)?,
            pos: 0,
        })
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current().map(|t| &t.kind == kind).unwrap_or(false)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), SyntaxError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", kind.describe())))
        }
    }

    fn expect_end(&self) -> Result<(), SyntaxError> {
        match self.current() {
            None => Ok(()),
            Some(token) => Err(SyntaxError::new(
                format!("unexpected trailing {}", token.kind.describe()),
                self.src,
                token.offset,
            )),
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        match self.current() {
            Some(token) => SyntaxError::new(
                format!("{expected}, found {}", token.kind.describe()),
                self.src,
                token.offset,
            ),
            None => SyntaxError::new(
                format!("{expected}, found end of input"),
                self.src,
                self.src.len(),
            ),
        }
    }

    fn parse_expr(&mut self) -> Result<Expression, SyntaxError> {
        self.parse_conditional()
    }

    /// `test ? consequent : alternate`, right-associative on the alternate.
    fn parse_conditional(&mut self) -> Result<Expression, SyntaxError> {
        let test = self.parse_logical_or()?;
        if !self.eat(&TokenKind::Question) {
            return Ok(test);
        }
        let consequent = self.parse_conditional()?;
        self.expect(&TokenKind::Colon)?;
        let alternate = self.parse_conditional()?;
        Ok(Expression::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_logical_or(&mut self) -> Result<Expression, SyntaxError> {
        let mut left = self.parse_logical_and()?;
        while self.check(&TokenKind::PipePipe) || self.check(&TokenKind::Or) {
            self.advance();
            let right = self.parse_logical_and()?;
            left = Expression::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expression, SyntaxError> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::AmpAmp) || self.check(&TokenKind::And) {
            self.advance();
            let right = self.parse_equality()?;
            left = Expression::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expression, SyntaxError> {
        let mut left = self.parse_relational()?;
        while let Some(op) = self.match_equality_op() {
            self.advance();
            let right = self.parse_relational()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expression, SyntaxError> {
        let mut left = self.parse_additive()?;
        while let Some(op) = self.match_relational_op() {
            self.advance();
            let right = self.parse_additive()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression, SyntaxError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.match_additive_op() {
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, SyntaxError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.match_multiplicative_op() {
            self.advance();
            let right = self.parse_unary()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, SyntaxError> {
        let op = match self.current().map(|t| &t.kind) {
            Some(TokenKind::Minus) => Some(UnaryOp::Minus),
            Some(TokenKind::Bang) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expression::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    /// Call and member/index access, chainable: `a[0].b('c').d`.
    fn parse_postfix(&mut self) -> Result<Expression, SyntaxError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::LParen) {
                let args = self.parse_args()?;
                expr = Expression::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident()?;
                expr = Expression::Member {
                    object: Box::new(expr),
                    property: Box::new(Expression::Identifier(name)),
                    computed: false,
                };
            } else if self.eat(&TokenKind::LBracket) {
                let property = self.parse_expr()?;
                self.expect(&TokenKind::RBracket)?;
                expr = Expression::Member {
                    object: Box::new(expr),
                    property: Box::new(property),
                    computed: true,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, SyntaxError> {
        let Some(token) = self.advance() else {
            return Err(self.unexpected("expected expression"));
        };
        match token.kind {
            TokenKind::Ident(name) => Ok(Expression::Identifier(name)),
            TokenKind::Int(n) => Ok(Expression::Literal(Literal::Int(n))),
            TokenKind::Float(n) => Ok(Expression::Literal(Literal::Float(n))),
            TokenKind::Str(s) => Ok(Expression::Literal(Literal::Text(s))),
            TokenKind::True => Ok(Expression::Literal(Literal::Bool(true))),
            TokenKind::False => Ok(Expression::Literal(Literal::Bool(false))),
            TokenKind::Null => Ok(Expression::Literal(Literal::Null)),
            TokenKind::Template(parts) => self.parse_template(parts, token.offset),
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                let mut elements = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    elements.push(self.parse_expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expression::Array(elements))
            }
            TokenKind::LBrace => self.parse_object(),
            kind => Err(SyntaxError::new(
                format!("expected expression, found {}", kind.describe()),
                self.src,
                token.offset,
            )),
        }
    }

    fn parse_object(&mut self) -> Result<Expression, SyntaxError> {
        let mut properties = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let key = match self.current().map(|t| t.kind.clone()) {
                Some(TokenKind::Ident(name)) => {
                    self.pos += 1;
                    name
                }
                Some(TokenKind::Str(s)) => {
                    self.pos += 1;
                    s
                }
                _ => return Err(self.unexpected("expected property key")),
            };
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expr()?;
            properties.push((key, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expression::Object(properties))
    }

    /// Sub-parse the raw interpolation sources pre-split by the lexer.
    fn parse_template(
        &self,
        parts: Vec<RawTemplatePart>,
        offset: usize,
    ) -> Result<Expression, SyntaxError> {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                RawTemplatePart::Text(text) => out.push(TemplatePart::Text(text)),
                RawTemplatePart::Expr(src) => {
                    let expr = Parser::parse(&src).map_err(|e| {
                        SyntaxError::new(format!("in template interpolation: {e}"), self.src, offset)
                    })?;
                    out.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expression::Template(out))
    }

    fn parse_args(&mut self) -> Result<Vec<Expression>, SyntaxError> {
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            args.push(self.parse_expr()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    /// One pipe stage or standalone call target: a bare identifier, a call
    /// with parenthesized arguments, the whitespace-argument form
    /// `name: arg`, or the arrow binding form `name => expr`. All normalize
    /// to a call on the identifier.
    fn parse_stage(&mut self) -> Result<Expression, SyntaxError> {
        let name = self.expect_ident()?;
        let args = if self.eat(&TokenKind::LParen) {
            self.parse_args()?
        } else if self.eat(&TokenKind::Colon) || self.eat(&TokenKind::FatArrow) {
            vec![self.parse_expr()?]
        } else {
            Vec::new()
        };
        Ok(Expression::Call {
            callee: Box::new(Expression::Identifier(name)),
            args,
        })
    }

    fn expect_ident(&mut self) -> Result<String, SyntaxError> {
        match self.current().map(|t| &t.kind) {
            Some(TokenKind::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("expected identifier")),
        }
    }

    fn match_equality_op(&self) -> Option<BinaryOp> {
        match self.current().map(|t| &t.kind) {
            Some(TokenKind::EqEq) => Some(BinaryOp::Eq),
            Some(TokenKind::NotEq) => Some(BinaryOp::NotEq),
            _ => None,
        }
    }

    fn match_relational_op(&self) -> Option<BinaryOp> {
        match self.current().map(|t| &t.kind) {
            Some(TokenKind::Lt) => Some(BinaryOp::Lt),
            Some(TokenKind::LtEq) => Some(BinaryOp::LtEq),
            Some(TokenKind::Gt) => Some(BinaryOp::Gt),
            Some(TokenKind::GtEq) => Some(BinaryOp::GtEq),
            _ => None,
        }
    }

    fn match_additive_op(&self) -> Option<BinaryOp> {
        match self.current().map(|t| &t.kind) {
            Some(TokenKind::Plus) => Some(BinaryOp::Add),
            Some(TokenKind::Minus) => Some(BinaryOp::Sub),
            _ => None,
        }
    }

    fn match_multiplicative_op(&self) -> Option<BinaryOp> {
        match self.current().map(|t| &t.kind) {
            Some(TokenKind::Star) => Some(BinaryOp::Mul),
            Some(TokenKind::Slash) => Some(BinaryOp::Div),
            Some(TokenKind::Percent) | Some(TokenKind::Mod) => Some(BinaryOp::Mod),
            _ => None,
        }
    }
}
