//! §4.6 grammar: hand-written recursive-descent parser over the token
//! stream, producing a [`QueryAst`].
//!
//! ```text
//! expression := COLLECTION
//!             | FILTER
//!             | expression (UNION|INTERSECTION|COMPLEMENT|SYMDIFF) expression
//!             | expression MODIFIER
//!             | LPAREN expression RPAREN
//! ```
//! All four set operators and the postfix MODIFIER share one
//! left-associative fold: `parse_expression` keeps a running `lhs` and,
//! on every iteration, either combines it with a freshly parsed primary
//! through a set operator or wraps it in a `Modifier`. Folding MODIFIER
//! into that same loop (rather than into the primary parse) is what
//! makes it bind to the whole accumulated expression instead of just the
//! nearest operand — `A + B | s` parses as `(A + B) | s`, not
//! `A + (B | s)`, matching the original `ply.yacc` grammar's reduction
//! order.

use crate::error::{QueryError, QueryResult};

use super::ast::{QueryAst, SetOp};
use super::lexer::Token;

pub fn parse(tokens: &[Token]) -> QueryResult<QueryAst> {
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_expression()?;
    if parser.pos != tokens.len() {
        return Err(QueryError::SyntaxError);
    }
    Ok(ast)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn parse_expression(&mut self) -> QueryResult<QueryAst> {
        let mut lhs = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Union) => {
                    self.pos += 1;
                    let rhs = self.parse_primary()?;
                    lhs = QueryAst::Op(Box::new(lhs), SetOp::Union, Box::new(rhs));
                }
                Some(Token::Intersection) => {
                    self.pos += 1;
                    let rhs = self.parse_primary()?;
                    lhs = QueryAst::Op(Box::new(lhs), SetOp::Intersection, Box::new(rhs));
                }
                Some(Token::Complement) => {
                    self.pos += 1;
                    let rhs = self.parse_primary()?;
                    lhs = QueryAst::Op(Box::new(lhs), SetOp::Complement, Box::new(rhs));
                }
                Some(Token::SymDiff) => {
                    self.pos += 1;
                    let rhs = self.parse_primary()?;
                    lhs = QueryAst::Op(Box::new(lhs), SetOp::SymDiff, Box::new(rhs));
                }
                Some(Token::Modifier(_)) => {
                    let Some(Token::Modifier(text)) = self.advance().cloned() else {
                        unreachable!()
                    };
                    lhs = QueryAst::Modifier(Box::new(lhs), text);
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> QueryResult<QueryAst> {
        match self.advance() {
            Some(Token::Collection(name)) => Ok(QueryAst::Collection(name.clone())),
            Some(Token::Filter {
                alias,
                exact,
                pattern,
            }) => Ok(QueryAst::Filter {
                alias: alias.clone(),
                exact: *exact,
                pattern: pattern.clone(),
            }),
            Some(Token::LParen) => {
                let inner = self.parse_expression()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(QueryError::SyntaxError),
                }
            }
            _ => Err(QueryError::SyntaxError),
        }
    }
}
