//! Recursive-descent parser producing the statement list for one source file.
//!
//! Context is tracked while descending so that placement rules can be
//! rejected at compile time: `return` only inside a function, no nested
//! function definitions (rebinding cannot retarget nested closures), classes
//! and imports only at top level.

use std::rc::Rc;

use crate::script::ast::{
    AssignTarget, BinaryOp, ClassDecl, Expr, FunctionDecl, Literal, Stmt, UnaryOp,
};
use crate::script::lexer::{tokenize, Token, TokenKind};
use crate::script::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    TopLevel,
    Function,
}

/// Parse a full source text into a statement list.
pub fn parse(source: &str) -> Result<Vec<Stmt>, CompileError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn program(&mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut stmts = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::Eof) {
            stmts.push(self.statement(Ctx::TopLevel)?);
            self.skip_newlines();
        }
        Ok(stmts)
    }

    // ------------------------------------------------------------------
    // Statements

    fn statement(&mut self, ctx: Ctx) -> Result<Stmt, CompileError> {
        let stmt = match &self.peek().kind {
            TokenKind::Fn => self.function_def(ctx)?,
            TokenKind::Class => self.class_def(ctx)?,
            TokenKind::Import => self.import_stmt(ctx)?,
            TokenKind::From => self.from_import_stmt(ctx)?,
            TokenKind::Return => self.return_stmt(ctx)?,
            TokenKind::If => self.if_stmt(ctx)?,
            TokenKind::While => self.while_stmt(ctx)?,
            _ => self.expr_or_assign()?,
        };
        self.end_of_statement()?;
        Ok(stmt)
    }

    fn function_def(&mut self, ctx: Ctx) -> Result<Stmt, CompileError> {
        let tok = self.peek().clone();
        if ctx == Ctx::Function {
            return Err(CompileError::new(
                "nested function definitions are not allowed",
                tok.line,
                tok.column,
            ));
        }
        let decl = self.function_decl()?;
        Ok(Stmt::FunctionDef(decl))
    }

    /// `fn name(params) { body }`, shared by top level and class bodies.
    fn function_decl(&mut self) -> Result<Rc<FunctionDecl>, CompileError> {
        let line = self.expect(TokenKind::Fn, "'fn'")?.line;
        let name = self.expect_ident("function name")?;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let param_tok = self.peek().clone();
                let param = self.expect_ident("parameter name")?;
                if params.contains(&param) {
                    return Err(CompileError::new(
                        format!("duplicate parameter '{}'", param),
                        param_tok.line,
                        param_tok.column,
                    ));
                }
                params.push(param);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.block(Ctx::Function)?;
        Ok(Rc::new(FunctionDecl {
            name,
            params,
            body,
            line,
        }))
    }

    fn class_def(&mut self, ctx: Ctx) -> Result<Stmt, CompileError> {
        let tok = self.peek().clone();
        if ctx != Ctx::TopLevel {
            return Err(CompileError::new(
                "class definitions are only allowed at top level",
                tok.line,
                tok.column,
            ));
        }
        let line = self.expect(TokenKind::Class, "'class'")?.line;
        let name = self.expect_ident("class name")?;
        let base = if self.eat(&TokenKind::LParen) {
            let base = self.expression()?;
            self.expect(TokenKind::RParen, "')'")?;
            Some(base)
        } else {
            None
        };

        self.expect(TokenKind::LBrace, "'{'")?;
        self.skip_newlines();
        let mut methods = Vec::new();
        let mut constants = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            match &self.peek().kind {
                TokenKind::Fn => methods.push(self.function_decl()?),
                TokenKind::Ident(_) => {
                    let const_name = self.expect_ident("constant name")?;
                    self.expect(TokenKind::Assign, "'='")?;
                    let value = self.expression()?;
                    constants.push((const_name, value));
                }
                other => {
                    let tok = self.peek();
                    return Err(CompileError::new(
                        format!(
                            "expected method or constant in class body, found {}",
                            other.describe()
                        ),
                        tok.line,
                        tok.column,
                    ));
                }
            }
            self.end_of_statement()?;
            self.skip_newlines();
        }
        self.expect(TokenKind::RBrace, "'}'")?;

        Ok(Stmt::ClassDef(Rc::new(ClassDecl {
            name,
            base,
            methods,
            constants,
            line,
        })))
    }

    fn import_stmt(&mut self, ctx: Ctx) -> Result<Stmt, CompileError> {
        let tok = self.peek().clone();
        if ctx != Ctx::TopLevel {
            return Err(CompileError::new(
                "imports are only allowed at top level",
                tok.line,
                tok.column,
            ));
        }
        let line = self.expect(TokenKind::Import, "'import'")?.line;
        let path = self.dotted_path()?;
        Ok(Stmt::Import { path, line })
    }

    fn from_import_stmt(&mut self, ctx: Ctx) -> Result<Stmt, CompileError> {
        let tok = self.peek().clone();
        if ctx != Ctx::TopLevel {
            return Err(CompileError::new(
                "imports are only allowed at top level",
                tok.line,
                tok.column,
            ));
        }
        let line = self.expect(TokenKind::From, "'from'")?.line;
        let path = self.dotted_path()?;
        self.expect(TokenKind::Import, "'import'")?;
        let mut names = vec![self.expect_ident("imported name")?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_ident("imported name")?);
        }
        Ok(Stmt::FromImport { path, names, line })
    }

    fn return_stmt(&mut self, ctx: Ctx) -> Result<Stmt, CompileError> {
        let tok = self.peek().clone();
        if ctx != Ctx::Function {
            return Err(CompileError::new(
                "'return' outside of a function",
                tok.line,
                tok.column,
            ));
        }
        let line = self.expect(TokenKind::Return, "'return'")?.line;
        let value = if self.at_statement_end() {
            None
        } else {
            Some(self.expression()?)
        };
        Ok(Stmt::Return { value, line })
    }

    fn if_stmt(&mut self, ctx: Ctx) -> Result<Stmt, CompileError> {
        let line = self.expect(TokenKind::If, "'if'")?.line;
        let cond = self.expression()?;
        let then_body = self.block(ctx)?;
        let else_body = if self.eat(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                vec![self.if_stmt(ctx)?]
            } else {
                self.block(ctx)?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
            line,
        })
    }

    fn while_stmt(&mut self, ctx: Ctx) -> Result<Stmt, CompileError> {
        let line = self.expect(TokenKind::While, "'while'")?.line;
        let cond = self.expression()?;
        let body = self.block(ctx)?;
        Ok(Stmt::While { cond, body, line })
    }

    fn expr_or_assign(&mut self) -> Result<Stmt, CompileError> {
        let tok = self.peek().clone();
        let expr = self.expression()?;
        if self.eat(&TokenKind::Assign) {
            let value = self.expression()?;
            let target = match expr {
                Expr::Name(name) => AssignTarget::Name(name),
                Expr::Attribute { object, name } => AssignTarget::Attribute {
                    object: *object,
                    name,
                },
                Expr::Index { object, index } => AssignTarget::Index {
                    object: *object,
                    index: *index,
                },
                _ => {
                    return Err(CompileError::new(
                        "invalid assignment target",
                        tok.line,
                        tok.column,
                    ));
                }
            };
            return Ok(Stmt::Assign {
                target,
                value,
                line: tok.line,
            });
        }
        Ok(Stmt::Expr {
            expr,
            line: tok.line,
        })
    }

    /// `{ ... }` with newline-separated statements. A single statement may
    /// share the braces' line.
    fn block(&mut self, ctx: Ctx) -> Result<Vec<Stmt>, CompileError> {
        self.expect(TokenKind::LBrace, "'{'")?;
        self.skip_newlines();
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                let tok = self.peek();
                return Err(CompileError::new(
                    "unexpected end of file inside block",
                    tok.line,
                    tok.column,
                ));
            }
            stmts.push(self.statement(ctx)?);
            self.skip_newlines();
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(stmts)
    }

    // ------------------------------------------------------------------
    // Expressions, by descending precedence.

    fn expression(&mut self) -> Result<Expr, CompileError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.and_expr()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.and_expr()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.equality()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.equality()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.comparison()?;
        loop {
            let op = if self.eat(&TokenKind::Eq) {
                BinaryOp::Eq
            } else if self.eat(&TokenKind::Ne) {
                BinaryOp::Ne
            } else {
                break;
            };
            let right = self.comparison()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.additive()?;
        loop {
            let op = if self.eat(&TokenKind::Lt) {
                BinaryOp::Lt
            } else if self.eat(&TokenKind::Le) {
                BinaryOp::Le
            } else if self.eat(&TokenKind::Gt) {
                BinaryOp::Gt
            } else if self.eat(&TokenKind::Ge) {
                BinaryOp::Ge
            } else {
                break;
            };
            let right = self.additive()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.eat(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.eat(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.eat(&TokenKind::Slash) {
                BinaryOp::Div
            } else if self.eat(&TokenKind::Percent) {
                BinaryOp::Rem
            } else {
                break;
            };
            let right = self.unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        let op = if self.eat(&TokenKind::Minus) {
            Some(UnaryOp::Neg)
        } else if self.eat(&TokenKind::Bang) {
            Some(UnaryOp::Not)
        } else {
            None
        };
        match op {
            Some(op) => Ok(Expr::Unary {
                op,
                operand: Box::new(self.unary()?),
            }),
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident("attribute name")?;
                expr = Expr::Attribute {
                    object: Box::new(expr),
                    name,
                };
            } else if self.eat(&TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RParen, "')'")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.expect(TokenKind::RBracket, "']'")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        let tok = self.peek().clone();
        let expr = match tok.kind {
            TokenKind::Nil => {
                self.advance();
                Expr::Literal(Literal::Nil)
            }
            TokenKind::True => {
                self.advance();
                Expr::Literal(Literal::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Expr::Literal(Literal::Bool(false))
            }
            TokenKind::Int(value) => {
                self.advance();
                Expr::Literal(Literal::Int(value))
            }
            TokenKind::Float(value) => {
                self.advance();
                Expr::Literal(Literal::Float(value))
            }
            TokenKind::Str(ref value) => {
                let value = value.clone();
                self.advance();
                Expr::Literal(Literal::Str(value))
            }
            TokenKind::Ident(ref name) => {
                let name = name.clone();
                self.advance();
                Expr::Name(name)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket, "']'")?;
                Expr::List(items)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                inner
            }
            _ => {
                return Err(CompileError::new(
                    format!("expected expression, found {}", tok.kind.describe()),
                    tok.line,
                    tok.column,
                ));
            }
        };
        Ok(expr)
    }

    // ------------------------------------------------------------------
    // Token plumbing

    fn peek(&self) -> &Token {
        // The token stream always ends with Eof, so this never runs past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(CompileError::new(
                format!("expected {}, found {}", what, tok.kind.describe()),
                tok.line,
                tok.column,
            ))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, CompileError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(CompileError::new(
                format!("expected {}, found {}", what, other.describe()),
                tok.line,
                tok.column,
            )),
        }
    }

    fn dotted_path(&mut self) -> Result<Vec<String>, CompileError> {
        let mut path = vec![self.expect_ident("namespace path")?];
        while self.eat(&TokenKind::Dot) {
            path.push(self.expect_ident("namespace path segment")?);
        }
        Ok(path)
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::RBrace | TokenKind::Eof
        )
    }

    fn end_of_statement(&mut self) -> Result<(), CompileError> {
        if self.eat(&TokenKind::Newline) {
            return Ok(());
        }
        // Allow a closing brace or the end of file to terminate the final
        // statement of a single-line block.
        if self.check(&TokenKind::RBrace) || self.check(&TokenKind::Eof) {
            return Ok(());
        }
        let tok = self.peek();
        Err(CompileError::new(
            format!("expected end of statement, found {}", tok.kind.describe()),
            tok.line,
            tok.column,
        ))
    }
}
