//! Boolean expressions over capability names
//!
//! Grammar (`+` binds tighter than `|`):
//!
//! ```text
//! any   := all ('|' all)*
//! all   := unary ('+' unary)*
//! unary := '!' unary | atom
//! atom  := NAME | '(' any ')'
//! ```
//!
//! `Premium + Admin` holds when both are active at the same time.

use crate::error::{Result, RuntimeError};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Anything that can answer "is this capability active?"
pub trait CapabilitySet {
    fn has_capability(&self, name: &str) -> bool;
}

impl CapabilitySet for BTreeSet<String> {
    fn has_capability(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl CapabilitySet for [&str] {
    fn has_capability(&self, name: &str) -> bool {
        self.iter().any(|n| *n == name)
    }
}

/// A parsed capability expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapExpr {
    Name(String),
    All(Vec<CapExpr>),
    Any(Vec<CapExpr>),
    Not(Box<CapExpr>),
}

impl CapExpr {
    pub fn name(name: impl Into<String>) -> Self {
        CapExpr::Name(name.into())
    }

    pub fn parse(source: &str) -> Result<Self> {
        let tokens = lex(source)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_any()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(RuntimeError::InvalidExpression(format!(
                "unexpected {} in `{}`",
                token, source
            ))),
        }
    }

    /// Evaluate left to right, short-circuiting
    pub fn eval<S: CapabilitySet + ?Sized>(&self, set: &S) -> bool {
        match self {
            CapExpr::Name(name) => set.has_capability(name),
            CapExpr::All(terms) => terms.iter().all(|t| t.eval(set)),
            CapExpr::Any(terms) => terms.iter().any(|t| t.eval(set)),
            CapExpr::Not(inner) => !inner.eval(set),
        }
    }

    /// Every capability name mentioned by the expression
    pub fn names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            CapExpr::Name(name) => {
                out.insert(name.as_str());
            }
            CapExpr::All(terms) | CapExpr::Any(terms) => {
                terms.iter().for_each(|t| t.collect_names(out));
            }
            CapExpr::Not(inner) => inner.collect_names(out),
        }
    }
}

impl FromStr for CapExpr {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        CapExpr::parse(s)
    }
}

impl From<&str> for CapExpr {
    fn from(name: &str) -> Self {
        CapExpr::Name(name.to_string())
    }
}

impl fmt::Display for CapExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, terms: &[CapExpr], op: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, term) in terms.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", term)?;
            }
            write!(f, ")")
        }
        match self {
            CapExpr::Name(name) => write!(f, "{}", name),
            CapExpr::All(terms) => join(f, terms, "+"),
            CapExpr::Any(terms) => join(f, terms, "|"),
            CapExpr::Not(inner) => write!(f, "!{}", inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Name(String),
    Plus,
    Pipe,
    Bang,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(name) => write!(f, "`{}`", name),
            Token::Plus => write!(f, "`+`"),
            Token::Pipe => write!(f, "`|`"),
            Token::Bang => write!(f, "`!`"),
            Token::LParen => write!(f, "`(`"),
            Token::RParen => write!(f, "`)`"),
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn lex(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '|' => Token::Pipe,
            '!' => Token::Bang,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if is_name_char(c) => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, next)) = chars.peek() {
                    if !is_name_char(next) {
                        break;
                    }
                    end = i + next.len_utf8();
                    chars.next();
                }
                Token::Name(source[start..end].to_string())
            }
            other => {
                return Err(RuntimeError::InvalidExpression(format!(
                    "unexpected character `{}` in `{}`",
                    other, source
                )))
            }
        };
        tokens.push(token);
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

/// Deepest nesting of `!` and parentheses a parsed expression may have
pub const MAX_NESTING: usize = 128;

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(RuntimeError::InvalidExpression(
                "expression nested too deeply".into(),
            ));
        }
        Ok(())
    }

    fn parse_any(&mut self) -> Result<CapExpr> {
        let mut terms = vec![self.parse_all()?];
        while self.consume(&Token::Pipe) {
            terms.push(self.parse_all()?);
        }
        Ok(flatten(terms, CapExpr::Any))
    }

    fn parse_all(&mut self) -> Result<CapExpr> {
        let mut terms = vec![self.parse_unary()?];
        while self.consume(&Token::Plus) {
            terms.push(self.parse_unary()?);
        }
        Ok(flatten(terms, CapExpr::All))
    }

    fn parse_unary(&mut self) -> Result<CapExpr> {
        if self.consume(&Token::Bang) {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(CapExpr::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<CapExpr> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Name(name)) => {
                self.pos += 1;
                Ok(CapExpr::Name(name))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                self.descend()?;
                let inner = self.parse_any()?;
                self.depth -= 1;
                if !self.consume(&Token::RParen) {
                    return Err(RuntimeError::InvalidExpression(
                        "unclosed parenthesis".into(),
                    ));
                }
                Ok(inner)
            }
            Some(other) => Err(RuntimeError::InvalidExpression(format!(
                "expected a capability name, found {}",
                other
            ))),
            None => Err(RuntimeError::InvalidExpression(
                "expected a capability name, found end of input".into(),
            )),
        }
    }
}

fn flatten(mut terms: Vec<CapExpr>, wrap: fn(Vec<CapExpr>) -> CapExpr) -> CapExpr {
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        wrap(terms)
    }
}

/// Ordered arms over capability expressions with a mandatory default
#[derive(Debug, Clone)]
pub struct Dispatch<T> {
    arms: Vec<(CapExpr, T)>,
    default: T,
}

impl<T> Dispatch<T> {
    pub fn new(default: T) -> Self {
        Self {
            arms: Vec::new(),
            default,
        }
    }

    pub fn when(mut self, expr: impl Into<CapExpr>, value: T) -> Self {
        self.arms.push((expr.into(), value));
        self
    }

    /// First matching arm wins
    pub fn select<S: CapabilitySet + ?Sized>(&self, set: &S) -> &T {
        self.arms
            .iter()
            .find(|(expr, _)| expr.eval(set))
            .map(|(_, value)| value)
            .unwrap_or(&self.default)
    }

    pub fn arms(&self) -> &[(CapExpr, T)] {
        &self.arms
    }
}
