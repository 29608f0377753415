//! Metadata filter language.
//!
//! ```text
//! filter := clause ( "&&" clause )*
//! clause := term | "(" term ( "||" term )* ")"
//! term   := key "==" "`" value "`"
//! ```
//!
//! For example ``company_name == `Apple` && (year == `2022` || year == `2023`)``.
//! Values compare case-insensitively against [`DocumentMetadata::field`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::document::DocumentMetadata;
use crate::error::{FinragError, Result};

/// Filter keys from least to most specific. Rendering follows this order and
/// broadening drops from the end.
pub const FILTER_KEY_ORDER: [&str; 6] = ["company_name", "year", "quarter", "type", "item_10K", "topic"];

/// Metadata the LLM extracted from a question
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedMetadata {
    /// Company names as they appear in filings
    #[serde(default)]
    pub company_name: Vec<String>,
    /// Four-digit fiscal years
    #[serde(default)]
    pub year: Vec<String>,
    /// Quarters such as `Q1`
    #[serde(default)]
    pub quarter: Vec<String>,
    /// Filing types such as `10-K` or `10-Q`
    #[serde(default, rename = "type")]
    pub doc_type: Vec<String>,
    /// 10-K items such as `Item 1A`
    #[serde(default, rename = "item_10K")]
    pub item_10k: Vec<String>,
    #[serde(default)]
    pub topic: Vec<String>,
}

impl ExtractedMetadata {
    fn values(&self, key: &str) -> &[String] {
        match key {
            "company_name" => &self.company_name,
            "year" => &self.year,
            "quarter" => &self.quarter,
            "type" => &self.doc_type,
            "item_10K" => &self.item_10k,
            "topic" => &self.topic,
            _ => &[],
        }
    }
}

/// Render extracted metadata as a filter string; `None` when nothing usable
/// was extracted.
pub fn convert_metadata_to_jmespath(metadata: &ExtractedMetadata) -> Option<String> {
    let clauses: Vec<Clause> = FILTER_KEY_ORDER
        .iter()
        .filter_map(|key| {
            let mut values: Vec<&str> = Vec::new();
            for value in metadata.values(key) {
                let value = value.trim();
                if !value.is_empty() && !value.contains('`') && !values.contains(&value) {
                    values.push(value);
                }
            }
            (!values.is_empty()).then(|| Clause {
                terms: values
                    .into_iter()
                    .map(|value| Term {
                        key: key.to_string(),
                        value: value.to_string(),
                    })
                    .collect(),
            })
        })
        .collect();

    if clauses.is_empty() {
        None
    } else {
        Some(MetadataFilter { clauses }.to_string())
    }
}

/// `key == value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub key: String,
    pub value: String,
}

/// Disjunction of terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub terms: Vec<Term>,
}

impl Clause {
    fn matches(&self, metadata: &DocumentMetadata) -> bool {
        self.terms.iter().any(|term| {
            metadata
                .field(&term.key)
                .is_some_and(|actual| actual.trim().eq_ignore_ascii_case(term.value.trim()))
        })
    }

    fn specificity(&self) -> usize {
        self.terms
            .iter()
            .map(|term| {
                FILTER_KEY_ORDER
                    .iter()
                    .position(|k| *k == term.key)
                    .unwrap_or(FILTER_KEY_ORDER.len())
            })
            .max()
            .unwrap_or(0)
    }
}

/// Parsed filter: conjunction of clauses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    clauses: Vec<Clause>,
}

impl MetadataFilter {
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        Parser {
            input,
            tokens,
            pos: 0,
        }
        .filter()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Keys constrained by the filter, in clause order
    pub fn keys(&self) -> Vec<&str> {
        self.clauses
            .iter()
            .flat_map(|c| c.terms.iter().map(|t| t.key.as_str()))
            .collect()
    }

    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        self.clauses.iter().all(|clause| clause.matches(metadata))
    }

    /// Drop the most specific clause; `None` when nothing would remain
    pub fn broaden(&self) -> Option<MetadataFilter> {
        let (drop, _) = self
            .clauses
            .iter()
            .enumerate()
            .max_by_key(|(index, clause)| (clause.specificity(), *index))?;
        let clauses: Vec<Clause> = self
            .clauses
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != drop)
            .map(|(_, clause)| clause.clone())
            .collect();
        (!clauses.is_empty()).then_some(MetadataFilter { clauses })
    }
}

impl fmt::Display for MetadataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .clauses
            .iter()
            .map(|clause| {
                let terms: Vec<String> = clause
                    .terms
                    .iter()
                    .map(|t| format!("{} == `{}`", t.key, t.value))
                    .collect();
                if terms.len() == 1 {
                    terms[0].clone()
                } else {
                    format!("({})", terms.join(" || "))
                }
            })
            .collect();
        write!(f, "{}", rendered.join(" && "))
    }
}

impl std::str::FromStr for MetadataFilter {
    type Err = FinragError;

    fn from_str(s: &str) -> Result<Self> {
        MetadataFilter::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Key(String),
    Value(String),
    Eq,
    And,
    Or,
    Open,
    Close,
}

fn invalid(input: &str, reason: impl Into<String>) -> FinragError {
    FinragError::InvalidFilter {
        filter: input.to_string(),
        reason: reason.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((at, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '=' | '&' | '|' => match chars.next() {
                Some((_, next)) if next == c => tokens.push(match c {
                    '=' => Token::Eq,
                    '&' => Token::And,
                    _ => Token::Or,
                }),
                _ => return Err(invalid(input, format!("expected '{c}{c}' at {at}"))),
            },
            '`' => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, '`')) => break,
                        Some((_, ch)) => value.push(ch),
                        None => return Err(invalid(input, "unterminated value")),
                    }
                }
                tokens.push(Token::Value(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut key = c.to_string();
                while let Some((_, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || *ch == '_' {
                        key.push(*ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Key(key));
            }
            other => return Err(invalid(input, format!("unexpected '{other}' at {at}"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn filter(mut self) -> Result<MetadataFilter> {
        let mut clauses = vec![self.clause()?];
        while let Some(token) = self.next() {
            if token != Token::And {
                return Err(invalid(self.input, format!("expected '&&', found {token:?}")));
            }
            clauses.push(self.clause()?);
        }
        Ok(MetadataFilter { clauses })
    }

    fn clause(&mut self) -> Result<Clause> {
        if self.peek() != Some(&Token::Open) {
            return Ok(Clause {
                terms: vec![self.term()?],
            });
        }
        self.next();
        let mut terms = vec![self.term()?];
        loop {
            match self.next() {
                Some(Token::Or) => terms.push(self.term()?),
                Some(Token::Close) => return Ok(Clause { terms }),
                other => {
                    return Err(invalid(self.input, format!("expected '||' or ')', found {other:?}")))
                }
            }
        }
    }

    fn term(&mut self) -> Result<Term> {
        let key = match self.next() {
            Some(Token::Key(key)) => key,
            other => return Err(invalid(self.input, format!("expected a key, found {other:?}"))),
        };
        if self.next() != Some(Token::Eq) {
            return Err(invalid(self.input, format!("expected '==' after '{key}'")));
        }
        match self.next() {
            Some(Token::Value(value)) => Ok(Term { key, value }),
            other => Err(invalid(self.input, format!("expected a `value`, found {other:?}"))),
        }
    }
}
