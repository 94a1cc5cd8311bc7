//! # Rule Expressions
//!
//! A small boolean language over identity strings:
//!
//! ```text
//! expr     := or
//! or       := and ( "|" and )*
//! and      := primary ( "&" primary )*
//! primary  := identity | "(" expr ")" | "threshold" "(" k "," identity ("," identity)* ")"
//! ```
//!
//! `threshold(k, a, b, c)` is satisfied when at least `k` of the listed
//! identities match. Expressions are stored in source form inside darcs and
//! parsed at evaluation time; the source form is canonical (it is part of
//! the darc hash).

use crate::errors::DarcError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Parsed rule expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    Identity(String),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Threshold { k: usize, identities: Vec<String> },
}

impl Expression {
    /// Parse expression source.
    pub fn parse(source: &str) -> Result<Expression, DarcError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(DarcError::InvalidExpression(format!(
                "trailing input at token {}",
                parser.pos
            )));
        }
        Ok(expr)
    }

    /// Expression matching any one of `identities`.
    pub fn any_of(identities: &[String]) -> Expression {
        identities
            .iter()
            .map(|id| Expression::Identity(id.clone()))
            .reduce(|a, b| Expression::Or(Box::new(a), Box::new(b)))
            .unwrap_or(Expression::Threshold {
                k: 1,
                identities: vec![],
            })
    }

    /// Expression requiring all of `identities`.
    pub fn all_of(identities: &[String]) -> Expression {
        identities
            .iter()
            .map(|id| Expression::Identity(id.clone()))
            .reduce(|a, b| Expression::And(Box::new(a), Box::new(b)))
            .unwrap_or(Expression::Threshold {
                k: 1,
                identities: vec![],
            })
    }

    /// Evaluate against a match predicate. The predicate decides whether a
    /// single identity string is satisfied by the present signers; darc
    /// identities recurse through it.
    pub fn evaluate(&self, matches: &mut dyn FnMut(&str) -> bool) -> bool {
        match self {
            Expression::Identity(id) => matches(id),
            Expression::And(a, b) => a.evaluate(matches) && b.evaluate(matches),
            Expression::Or(a, b) => a.evaluate(matches) || b.evaluate(matches),
            Expression::Threshold { k, identities } => {
                if *k == 0 || identities.is_empty() {
                    return false;
                }
                let hit = identities.iter().filter(|id| matches(id)).count();
                hit >= *k
            }
        }
    }

    /// Evaluate against a plain set of matched identity strings.
    pub fn evaluate_set(&self, matched: &HashSet<String>) -> bool {
        self.evaluate(&mut |id| matched.contains(id))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Identity(id) => write!(f, "{id}"),
            Expression::And(a, b) => write!(f, "({a} & {b})"),
            Expression::Or(a, b) => write!(f, "({a} | {b})"),
            Expression::Threshold { k, identities } => {
                write!(f, "threshold({k}, {})", identities.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Identity(String),
    Number(usize),
    Threshold,
    And,
    Or,
    Open,
    Close,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Token>, DarcError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '&' => {
                chars.next();
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                tokens.push(Token::Or);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            c if c.is_ascii_digit() => {
                let mut n = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        n.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = n
                    .parse()
                    .map_err(|_| DarcError::InvalidExpression(format!("bad number {n:?}")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut word = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' || d == ':' || d == '-' {
                        word.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if word == "threshold" {
                    tokens.push(Token::Threshold);
                } else {
                    tokens.push(Token::Identity(word));
                }
            }
            other => {
                return Err(DarcError::InvalidExpression(format!(
                    "unexpected character {other:?}"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), DarcError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(DarcError::InvalidExpression(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expression, DarcError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, DarcError> {
        let mut left = self.parse_primary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_primary()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expression, DarcError> {
        match self.next() {
            Some(Token::Identity(id)) => Ok(Expression::Identity(id)),
            Some(Token::Open) => {
                let inner = self.parse_or()?;
                self.expect(Token::Close)?;
                Ok(inner)
            }
            Some(Token::Threshold) => {
                self.expect(Token::Open)?;
                let k = match self.next() {
                    Some(Token::Number(k)) => k,
                    other => {
                        return Err(DarcError::InvalidExpression(format!(
                            "threshold wants a count, found {other:?}"
                        )))
                    }
                };
                let mut identities = Vec::new();
                while self.peek() == Some(&Token::Comma) {
                    self.next();
                    match self.next() {
                        Some(Token::Identity(id)) => identities.push(id),
                        other => {
                            return Err(DarcError::InvalidExpression(format!(
                                "threshold wants identities, found {other:?}"
                            )))
                        }
                    }
                }
                self.expect(Token::Close)?;
                if k == 0 || k > identities.len() {
                    return Err(DarcError::InvalidExpression(format!(
                        "threshold {k} of {} identities",
                        identities.len()
                    )));
                }
                Ok(Expression::Threshold { k, identities })
            }
            other => Err(DarcError::InvalidExpression(format!(
                "unexpected token {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_identity() {
        let expr = Expression::parse("ed25519:aabb").unwrap();
        assert!(expr.evaluate_set(&matched(&["ed25519:aabb"])));
        assert!(!expr.evaluate_set(&matched(&["ed25519:ccdd"])));
    }

    #[test]
    fn and_or_precedence() {
        // a | b & c parses as a | (b & c)
        let expr = Expression::parse("a | b & c").unwrap();
        assert!(expr.evaluate_set(&matched(&["a"])));
        assert!(expr.evaluate_set(&matched(&["b", "c"])));
        assert!(!expr.evaluate_set(&matched(&["b"])));
    }

    #[test]
    fn parentheses_override() {
        let expr = Expression::parse("(a | b) & c").unwrap();
        assert!(!expr.evaluate_set(&matched(&["a"])));
        assert!(expr.evaluate_set(&matched(&["a", "c"])));
        assert!(expr.evaluate_set(&matched(&["b", "c"])));
    }

    #[test]
    fn threshold_combinator() {
        let expr = Expression::parse("threshold(2, a, b, c)").unwrap();
        assert!(!expr.evaluate_set(&matched(&["a"])));
        assert!(expr.evaluate_set(&matched(&["a", "c"])));
        assert!(expr.evaluate_set(&matched(&["a", "b", "c"])));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Expression::parse("").is_err());
        assert!(Expression::parse("a &").is_err());
        assert!(Expression::parse("a ^ b").is_err());
        assert!(Expression::parse("threshold(4, a, b)").is_err());
        assert!(Expression::parse("a b").is_err());
    }

    #[test]
    fn builders() {
        let ids = vec!["a".to_string(), "b".to_string()];
        assert!(Expression::any_of(&ids).evaluate_set(&matched(&["b"])));
        assert!(!Expression::all_of(&ids).evaluate_set(&matched(&["b"])));
        assert!(Expression::all_of(&ids).evaluate_set(&matched(&["a", "b"])));
    }
}
