#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Blank,
    Bool,
    Number,
    Text,
}

/// A single cell value.
///
/// `Blank` is the sentinel for a slot that was never written. Arithmetic
/// failures are not errors: they produce `Number(NaN)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    #[default]
    Blank,
    Bool(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

impl ArithmeticOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("value {value:?} has non-numeric dtype {dtype:?}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is blank")]
    ValueIsBlank,
}

fn plain_number_pattern() -> &'static Regex {
    static PLAIN_NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    PLAIN_NUMBER_RE.get_or_init(|| {
        Regex::new(r"^[-+]?(?:\d+(?:\.\d*)?|\.\d+)$").expect("valid plain-number regex")
    })
}

/// Parse `text` as a plain integer or decimal (no exponent, no grouping).
#[must_use]
pub fn parse_plain_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if !plain_number_pattern().is_match(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Shortest display form: `2.0` prints as `2`, NaN prints as `NaN`.
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }
    if value == 0.0 {
        return "0".to_owned();
    }
    value.to_string()
}

impl Scalar {
    #[must_use]
    pub fn nan() -> Self {
        Self::Number(f64::NAN)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Blank => DType::Blank,
            Self::Bool(_) => DType::Bool,
            Self::Number(_) => DType::Number,
            Self::Text(_) => DType::Text,
        }
    }

    /// Blank cells and empty strings.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Blank => true,
            Self::Text(text) => text.is_empty(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Number(v) if v.is_nan())
    }

    /// Numeric view used by comparisons: numbers as-is, numeric-looking
    /// text parsed, everything else `None`.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(text) => parse_plain_number(text),
            Self::Blank | Self::Bool(_) => None,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Blank => Err(TypeError::ValueIsBlank),
            other => other.as_number().ok_or_else(|| TypeError::NonNumericValue {
                value: other.to_string(),
                dtype: other.dtype(),
            }),
        }
    }

    /// The boolean cast: blank and empty text are false, `Bool` is itself,
    /// everything else (including `0` and NaN) is true.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Bool(v) => *v,
            other => !other.is_blank(),
        }
    }

    /// Trim text and turn plain numbers into `Number`. Non-text values pass
    /// through untouched.
    #[must_use]
    pub fn magic_cast(self) -> Self {
        match self {
            Self::Text(text) => {
                let trimmed = text.trim();
                if let Some(value) = parse_plain_number(trimmed) {
                    return Self::Number(value);
                }
                if trimmed.len() == text.len() {
                    return Self::Text(text);
                }
                Self::Text(trimmed.to_owned())
            }
            other => other,
        }
    }

    /// Arithmetic over two numbers; any non-number operand yields NaN, as
    /// does division by zero. Modulo follows the sign of the divisor.
    #[must_use]
    pub fn arithmetic(&self, op: ArithmeticOp, other: &Self) -> Self {
        let (Self::Number(lhs), Self::Number(rhs)) = (self, other) else {
            return Self::nan();
        };
        let (lhs, rhs) = (*lhs, *rhs);
        let result = match op {
            ArithmeticOp::Add => lhs + rhs,
            ArithmeticOp::Sub => lhs - rhs,
            ArithmeticOp::Mul => lhs * rhs,
            ArithmeticOp::Div => {
                if rhs == 0.0 {
                    f64::NAN
                } else {
                    lhs / rhs
                }
            }
            ArithmeticOp::Mod => {
                if rhs == 0.0 {
                    f64::NAN
                } else {
                    let rem = lhs % rhs;
                    if rem != 0.0 && (rem < 0.0) != (rhs < 0.0) {
                        rem + rhs
                    } else {
                        rem
                    }
                }
            }
        };
        Self::Number(result)
    }

    #[must_use]
    pub fn negate(&self) -> Self {
        match self {
            Self::Number(v) => Self::Number(-v),
            _ => Self::nan(),
        }
    }

    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        Self::Text(format!("{self}{other}"))
    }

    /// Compare numerically when either side is a number, textually
    /// otherwise. Pairs that cannot be ordered only satisfy `!=`.
    #[must_use]
    pub fn compare(&self, op: ComparisonOp, other: &Self) -> bool {
        let ordering = if self.is_number() || other.is_number() {
            match (self.as_number(), other.as_number()) {
                (Some(lhs), Some(rhs)) => lhs.partial_cmp(&rhs),
                _ => None,
            }
        } else {
            Some(self.to_string().cmp(&other.to_string()))
        };

        match ordering {
            Some(ordering) => op.accepts(ordering),
            None => op == ComparisonOp::Ne,
        }
    }

    /// Total order used for sort keys: numbers ascending, then booleans,
    /// then text, then NaN, then blanks.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        fn rank(value: &Scalar) -> u8 {
            match value {
                Scalar::Number(v) if v.is_nan() => 3,
                Scalar::Number(_) => 0,
                Scalar::Bool(_) => 1,
                Scalar::Text(_) => 2,
                Scalar::Blank => 4,
            }
        }

        match (self, other) {
            (Self::Number(a), Self::Number(b)) if !a.is_nan() && !b.is_nan() => a.total_cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }

    /// Equality that treats two NaNs as the same value.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => (a.is_nan() && b.is_nan()) || a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blank => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Number(v) => f.write_str(&format_number(*v)),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}
