use std::fmt;
use std::ops::Not;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::parse::{parse_condition, padded_version};

/// Comparison operators shared by plain and version comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A targeting condition in the JSON query language.
///
/// Built from JSON with [`Condition::from_json`] or in code with [`field()`].
/// Conditions never fail to evaluate: unknown or malformed parts become
/// variants that evaluate to `false`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `$and`, or an object with several keys. Empty is `true`.
    And(Vec<Condition>),
    /// `$or`. Empty is `true`.
    Or(Vec<Condition>),
    /// `$nor`.
    Nor(Vec<Condition>),
    /// `$not`.
    Not(Box<Condition>),
    /// Test the value at a dot-separated attribute path.
    Field { path: String, test: ValueTest },
    /// A condition that could not be understood. Always `false`.
    Invalid(String),
}

/// What a [`Condition::Field`] checks against the attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTest {
    /// Compare against a literal with loose coercion toward the literal's type.
    Literal(Value),
    /// Every operator must hold.
    Operators(Vec<Operator>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Compare(CompareOp, Value),
    /// Operand is stored pre-padded.
    Version(CompareOp, String),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    All(Vec<ValueTest>),
    ElemMatch(Box<ElemMatch>),
    Size(Box<ValueTest>),
    Exists(bool),
    Type(String),
    Regex(Pattern),
    Not(Box<ValueTest>),
    /// An operator tag nobody recognizes.
    Unknown(String),
    /// A known operator with an operand of the wrong shape.
    Malformed(String),
}

/// `$elemMatch` either tests elements as values or as nested documents.
#[derive(Debug, Clone, PartialEq)]
pub enum ElemMatch {
    Value(ValueTest),
    Condition(Condition),
}

/// A regular expression compiled once at load time.
///
/// An invalid source is kept for diagnostics and never matches.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    compiled: Option<Regex>,
}

impl Pattern {
    #[must_use]
    pub fn new(source: &str) -> Self {
        let compiled = match Regex::new(source) {
            Ok(regex) => Some(regex),
            Err(err) => {
                tracing::warn!(pattern = source, error = %err, "invalid $regex pattern never matches");
                None
            }
        };
        Self {
            source: source.to_owned(),
            compiled,
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.compiled.is_some()
    }

    #[must_use]
    pub fn is_match(&self, haystack: &str) -> bool {
        self.compiled
            .as_ref()
            .is_some_and(|regex| regex.is_match(haystack))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "$eq"),
            CompareOp::Neq => write!(f, "$ne"),
            CompareOp::Gt => write!(f, "$gt"),
            CompareOp::Gte => write!(f, "$gte"),
            CompareOp::Lt => write!(f, "$lt"),
            CompareOp::Lte => write!(f, "$lte"),
        }
    }
}

impl Condition {
    /// Parse a JSON condition document. Never fails; see [`Condition::Invalid`].
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        parse_condition(value)
    }

    /// Parse a condition from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not valid JSON.
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Ok(parse_condition(&value))
    }

    #[must_use]
    pub fn and(self, other: Condition) -> Condition {
        match self {
            Condition::And(mut all) => {
                all.push(other);
                Condition::And(all)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: Condition) -> Condition {
        match self {
            Condition::Or(mut any) => {
                any.push(other);
                Condition::Or(any)
            }
            first => Condition::Or(vec![first, other]),
        }
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        Condition::Not(Box::new(self))
    }
}

/// Any JSON value deserializes; unusable documents become [`Condition::Invalid`].
impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(|value| parse_condition(&value))
    }
}

/// Intermediate builder for attribute conditions.
/// Created by [`field()`]; requires a test method to produce a [`Condition`].
#[derive(Debug, Clone)]
pub struct FieldCondition {
    path: String,
}

impl FieldCondition {
    fn op(self, op: Operator) -> Condition {
        Condition::Field {
            path: self.path,
            test: ValueTest::Operators(vec![op]),
        }
    }

    /// Literal match, coercing the attribute toward the literal's type.
    #[must_use]
    pub fn equals(self, value: impl Into<Value>) -> Condition {
        Condition::Field {
            path: self.path,
            test: ValueTest::Literal(value.into()),
        }
    }

    #[must_use]
    pub fn eq(self, value: impl Into<Value>) -> Condition {
        self.op(Operator::Compare(CompareOp::Eq, value.into()))
    }

    #[must_use]
    pub fn ne(self, value: impl Into<Value>) -> Condition {
        self.op(Operator::Compare(CompareOp::Neq, value.into()))
    }

    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.op(Operator::Compare(CompareOp::Gt, value.into()))
    }

    #[must_use]
    pub fn gte(self, value: impl Into<Value>) -> Condition {
        self.op(Operator::Compare(CompareOp::Gte, value.into()))
    }

    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.op(Operator::Compare(CompareOp::Lt, value.into()))
    }

    #[must_use]
    pub fn lte(self, value: impl Into<Value>) -> Condition {
        self.op(Operator::Compare(CompareOp::Lte, value.into()))
    }

    #[must_use]
    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Condition {
        self.op(Operator::In(values.into_iter().map(Into::into).collect()))
    }

    #[must_use]
    pub fn not_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Condition {
        self.op(Operator::NotIn(values.into_iter().map(Into::into).collect()))
    }

    #[must_use]
    pub fn exists(self) -> Condition {
        self.op(Operator::Exists(true))
    }

    #[must_use]
    pub fn missing(self) -> Condition {
        self.op(Operator::Exists(false))
    }

    #[must_use]
    pub fn matches(self, pattern: &str) -> Condition {
        self.op(Operator::Regex(Pattern::new(pattern)))
    }

    /// Version comparison, e.g. `field("app").version(CompareOp::Gte, "2.1.0")`.
    #[must_use]
    pub fn version(self, op: CompareOp, version: &str) -> Condition {
        self.op(Operator::Version(op, padded_version(version)))
    }
}

#[must_use]
pub fn field(path: &str) -> FieldCondition {
    FieldCondition {
        path: path.to_owned(),
    }
}
