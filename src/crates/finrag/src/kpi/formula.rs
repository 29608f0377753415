//! Arithmetic formulas over named inputs.
//!
//! ```text
//! expr   := term   (("+" | "-") term)*
//! term   := factor (("*" | "/") factor)*
//! factor := number | ident | "(" expr ")" | "-" factor
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::{FinragError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Bin(Op, Box<Expr>, Box<Expr>),
}

/// Why a formula could not be evaluated
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Inputs without a value, sorted
    Missing(Vec<String>),
    DivisionByZero,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Missing(names) => write!(f, "missing inputs: {}", names.join(", ")),
            EvalError::DivisionByZero => write!(f, "division by zero"),
        }
    }
}

/// A parsed formula
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Identifiers the formula reads
    pub fn variables(&self) -> BTreeSet<String> {
        let mut vars = BTreeSet::new();
        collect_vars(&self.expr, &mut vars);
        vars
    }

    pub fn evaluate(&self, values: &HashMap<String, f64>) -> std::result::Result<f64, EvalError> {
        let missing: Vec<String> = self
            .variables()
            .into_iter()
            .filter(|v| !values.contains_key(v))
            .collect();
        if !missing.is_empty() {
            return Err(EvalError::Missing(missing));
        }
        eval(&self.expr, values)
    }
}

fn collect_vars(expr: &Expr, vars: &mut BTreeSet<String>) {
    match expr {
        Expr::Num(_) => {}
        Expr::Var(name) => {
            vars.insert(name.clone());
        }
        Expr::Neg(inner) => collect_vars(inner, vars),
        Expr::Bin(_, lhs, rhs) => {
            collect_vars(lhs, vars);
            collect_vars(rhs, vars);
        }
    }
}

fn eval(expr: &Expr, values: &HashMap<String, f64>) -> std::result::Result<f64, EvalError> {
    Ok(match expr {
        Expr::Num(n) => *n,
        Expr::Var(name) => *values
            .get(name)
            .ok_or_else(|| EvalError::Missing(vec![name.clone()]))?,
        Expr::Neg(inner) => -eval(inner, values)?,
        Expr::Bin(op, lhs, rhs) => {
            let (a, b) = (eval(lhs, values)?, eval(rhs, values)?);
            match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div if b == 0.0 => return Err(EvalError::DivisionByZero),
                Op::Div => a / b,
            }
        }
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    Open,
    Close,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text.parse().map_err(|_| {
                    FinragError::Kpi(format!("bad number '{text}' in formula '{source}'"))
                })?;
                tokens.push(Token::Num(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(FinragError::Kpi(format!(
                    "unexpected '{other}' in formula '{source}'"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> FinragError {
        FinragError::Kpi(format!("{reason} at token {} of formula '{}'", self.pos, self.source))
    }

    fn peek_op(&self) -> Option<char> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek_op() {
            self.pos += 1;
            let rhs = self.term()?;
            let op = if op == '+' { Op::Add } else { Op::Sub };
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek_op() {
            self.pos += 1;
            let rhs = self.factor()?;
            let op = if op == '*' { Op::Mul } else { Op::Div };
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        match token {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::Op('-')) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.tokens.get(self.pos) {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(self.error("expected ')'")),
                }
            }
            _ => Err(self.error("expected a number, name or '('")),
        }
    }
}
